//! Append-only time-series buffers for logged output channels.
//!
//! Each `(driver, channel)` pair owns one [`TimeSeriesEntry`]. Entries are
//! written by the scheduler during the output pass only and rebuild their
//! time axis on demand:
//!
//! ```
//! use dos::logs::Logs;
//! use dos::signal::Signal;
//!
//! let mut logs = Logs::new(0.1);
//! logs.register("mount", "encoder", 2);
//! logs.add("mount", "encoder", Signal::vector(vec![1.0, 2.0])).unwrap();
//! logs.add("mount", "encoder", Signal::vector(vec![3.0, 4.0])).unwrap();
//!
//! let series = logs.time_series("mount", "encoder").unwrap();
//! assert_eq!(series.values.shape(), &[2, 2]);
//! assert!((series.time[1] - 0.2).abs() < 1e-12);
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::signal::Signal;
use crate::types::Tick;

/// Errors raised by the logs.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LogError {
    #[error("channel {0} has no sample: its shape cannot be inferred")]
    Empty(String),

    #[error("channel {channel}: sample shape {found:?} does not match {expected:?}")]
    ShapeMismatch {
        channel: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("channel {driver}/{channel} is not registered")]
    UnknownChannel { driver: String, channel: String },
}

/// Result type for log operations.
pub type LogResult<T> = Result<T, LogError>;

/// A reconstructed time series.
#[derive(Clone, Debug, PartialEq)]
pub struct TimeSeries {
    /// Sample times in seconds
    pub time: Vec<f64>,
    /// Stacked samples
    pub values: Signal,
}

/// Samples of one logged channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimeSeriesEntry {
    label: String,
    tau: f64,
    decimation: u64,
    data: Vec<Signal>,
}

impl TimeSeriesEntry {
    /// Creates an empty entry.
    ///
    /// `tau` is the base tick duration; a decimation of 0 is treated as 1.
    pub fn new(label: impl Into<String>, tau: f64, decimation: u64) -> Self {
        Self {
            label: label.into(),
            tau,
            decimation: decimation.max(1),
            data: Vec::new(),
        }
    }

    /// Appends one sample.
    ///
    /// The first sample fixes the shape of every later one.
    pub fn add(&mut self, value: Signal) -> LogResult<()> {
        if let Some(first) = self.data.first() {
            if !same_layout(first, &value) {
                return Err(self.mismatch(first, &value));
            }
        }
        self.data.push(value);
        Ok(())
    }

    fn mismatch(&self, expected: &Signal, found: &Signal) -> LogError {
        LogError::ShapeMismatch {
            channel: self.label.clone(),
            expected: expected.shape().to_vec(),
            found: found.shape().to_vec(),
        }
    }

    /// Returns true if a sample is due at `tick`.
    pub fn is_due(&self, tick: Tick) -> bool {
        tick % self.decimation == 0
    }

    /// Returns the decimation factor.
    pub fn decimation(&self) -> u64 {
        self.decimation
    }

    /// Returns the base tick duration.
    pub fn tau(&self) -> f64 {
        self.tau
    }

    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if no sample was added.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the raw samples.
    pub fn samples(&self) -> &[Signal] {
        &self.data
    }

    /// Builds the time axis and stacks the samples.
    ///
    /// Scalars and vectors are stacked along a new leading axis, giving
    /// `[n, m]` (`[n, 1]` for scalars). Higher-rank samples are stacked along
    /// a new trailing axis, giving `[.., n]`.
    pub fn time_series(&self) -> LogResult<TimeSeries> {
        let first = self
            .data
            .first()
            .ok_or_else(|| LogError::Empty(self.label.clone()))?;
        // entries read back from JSON bypass add()
        if let Some(bad) = self.data.iter().find(|s| !same_layout(first, s)) {
            return Err(self.mismatch(first, bad));
        }
        let n = self.data.len();
        let step = self.decimation as f64 * self.tau;
        let time = (0..n).map(|i| i as f64 * step).collect();

        let values = if first.ndim() < 2 {
            let width = first.len();
            let data: Vec<f64> = self
                .data
                .iter()
                .flat_map(|s| s.as_slice().iter().copied())
                .collect();
            Signal::new(vec![n, width], data)
        } else {
            let width = first.len();
            let mut data = vec![0.0; width * n];
            for (j, sample) in self.data.iter().enumerate() {
                for (i, &v) in sample.as_slice().iter().enumerate() {
                    data[i * n + j] = v;
                }
            }
            let mut shape = first.shape().to_vec();
            shape.push(n);
            Signal::new(shape, data)
        };

        let values = values.ok_or_else(|| self.mismatch(first, first))?;
        Ok(TimeSeries { time, values })
    }
}

fn same_layout(a: &Signal, b: &Signal) -> bool {
    a.shape() == b.shape() && a.len() == b.len()
}

/// All logged channels, keyed by driver then channel.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Logs {
    sampling_time: f64,
    entries: BTreeMap<String, BTreeMap<String, TimeSeriesEntry>>,
}

impl Logs {
    /// Creates an empty store for a base tick duration `sampling_time`.
    pub fn new(sampling_time: f64) -> Self {
        Self {
            sampling_time,
            entries: BTreeMap::new(),
        }
    }

    /// Registers a channel, replacing any previous entry for the same key.
    pub fn register(&mut self, driver: &str, channel: &str, decimation: u64) {
        let entry = TimeSeriesEntry::new(
            format!("{}/{}", driver, channel),
            self.sampling_time,
            decimation,
        );
        self.entries
            .entry(driver.to_string())
            .or_default()
            .insert(channel.to_string(), entry);
    }

    /// Appends a sample to a registered channel.
    pub fn add(&mut self, driver: &str, channel: &str, value: Signal) -> LogResult<()> {
        self.entry_mut(driver, channel)?.add(value)
    }

    /// Returns a channel entry.
    pub fn entry(&self, driver: &str, channel: &str) -> Option<&TimeSeriesEntry> {
        self.entries.get(driver).and_then(|d| d.get(channel))
    }

    fn entry_mut(&mut self, driver: &str, channel: &str) -> LogResult<&mut TimeSeriesEntry> {
        self.entries
            .get_mut(driver)
            .and_then(|d| d.get_mut(channel))
            .ok_or_else(|| LogError::UnknownChannel {
                driver: driver.to_string(),
                channel: channel.to_string(),
            })
    }

    /// Reconstructs the time series of a channel.
    pub fn time_series(&self, driver: &str, channel: &str) -> LogResult<TimeSeries> {
        self.entry(driver, channel)
            .ok_or_else(|| LogError::UnknownChannel {
                driver: driver.to_string(),
                channel: channel.to_string(),
            })?
            .time_series()
    }

    /// Returns true if `(driver, channel)` is registered.
    pub fn contains(&self, driver: &str, channel: &str) -> bool {
        self.entry(driver, channel).is_some()
    }

    /// Returns the channels of one driver.
    pub fn driver_entries(&self, driver: &str) -> Option<&BTreeMap<String, TimeSeriesEntry>> {
        self.entries.get(driver)
    }

    /// Iterates over `(driver, channel, entry)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &TimeSeriesEntry)> {
        self.entries.iter().flat_map(|(d, channels)| {
            channels
                .iter()
                .map(move |(c, e)| (d.as_str(), c.as_str(), e))
        })
    }

    /// Returns the total number of registered channels.
    pub fn entry_count(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    /// Returns the base tick duration.
    pub fn sampling_time(&self) -> f64 {
        self.sampling_time
    }

    /// Exports a snapshot to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Exports a snapshot to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }
}

impl fmt::Display for Logs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "The logs have no entries!");
        }
        write!(f, "The logs have {} entries:", self.entry_count())?;
        for (driver, channels) in &self.entries {
            write!(f, "\n * {}", driver)?;
            for (k, (channel, entry)) in channels.iter().enumerate() {
                match entry.samples().first() {
                    Some(first) => write!(
                        f,
                        "\n   {}. {}: {:?}x{}",
                        k + 1,
                        channel,
                        first.shape(),
                        entry.len()
                    )?,
                    None => write!(f, "\n   {}. {}", k + 1, channel)?,
                }
            }
        }
        Ok(())
    }
}

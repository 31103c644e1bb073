//! Run statistics and export.
//!
//! The scheduler counts ticks, hook invocations and logged samples; the
//! orchestrator adds broker traffic and wall-clock time at the end of a run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use std::time::Instant;

use crate::types::Tick;

/// Aggregate statistics for a simulation run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Run metadata
    pub metadata: RunMetadata,

    /// Ticks executed so far
    pub ticks: Tick,

    /// `update` hooks invoked, all drivers
    pub updates: u64,

    /// `output` hooks invoked, all drivers
    pub outputs: u64,

    /// Values published on output ports
    pub values_published: u64,

    /// Samples appended to the logs
    pub samples_logged: u64,

    /// Broker round trips, handshake included
    pub requests_sent: u64,

    /// Per-driver counters, by driver name
    pub drivers: BTreeMap<String, DriverStats>,

    /// Timing statistics
    pub timing: TimingStats,
}

/// Metadata about the run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Run name, from the context
    pub name: String,

    /// Ticks scheduled
    pub n_sample: Tick,

    /// Base tick rate in Hz
    pub sampling_frequency: f64,

    /// Configuration directory, if loaded from disk
    pub config_dir: Option<String>,
}

/// Counters of one driver.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverStats {
    /// Ticks on which the driver was due
    pub due_updates: u64,

    /// Values the driver published
    pub values_published: u64,
}

/// Timing/performance statistics.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TimingStats {
    /// Wall-clock time spent in the tick loop, in milliseconds
    pub total_wall_time_ms: f64,

    /// Ticks executed per wall-clock second
    pub ticks_per_second: f64,

    /// Simulated seconds per wall-clock second
    pub realtime_factor: f64,
}

impl RunStats {
    /// Creates a new empty statistics container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the run name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.metadata.name = name.into();
        self
    }

    /// Returns the counters of a driver, creating them on first use.
    pub fn driver_mut(&mut self, driver: &str) -> &mut DriverStats {
        self.drivers.entry(driver.to_string()).or_default()
    }

    /// Adds `wall_time_ms` to the loop time and recomputes the rates.
    pub fn add_wall_time(&mut self, wall_time_ms: f64) {
        self.timing.total_wall_time_ms += wall_time_ms;
        let seconds = self.timing.total_wall_time_ms / 1000.0;
        if seconds > 0.0 {
            self.timing.ticks_per_second = self.ticks as f64 / seconds;
            if self.metadata.sampling_frequency > 0.0 {
                let simulated = self.ticks as f64 / self.metadata.sampling_frequency;
                self.timing.realtime_factor = simulated / seconds;
            }
        }
    }

    /// Exports statistics to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Exports statistics to a JSON file.
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = self
            .to_json()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)
    }

    /// Exports summary statistics to CSV.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();

        csv.push_str("metric,value\n");
        csv.push_str(&format!("n_sample,{}\n", self.metadata.n_sample));
        csv.push_str(&format!("ticks,{}\n", self.ticks));
        csv.push_str(&format!("updates,{}\n", self.updates));
        csv.push_str(&format!("outputs,{}\n", self.outputs));
        csv.push_str(&format!("values_published,{}\n", self.values_published));
        csv.push_str(&format!("samples_logged,{}\n", self.samples_logged));
        csv.push_str(&format!("requests_sent,{}\n", self.requests_sent));
        csv.push_str(&format!("wall_time_ms,{:.2}\n", self.timing.total_wall_time_ms));
        csv.push_str(&format!("ticks_per_second,{:.2}\n", self.timing.ticks_per_second));

        csv
    }

    /// Exports summary statistics to a CSV file.
    pub fn to_csv_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, self.to_csv())
    }

    /// Exports per-driver counters to CSV.
    pub fn drivers_to_csv(&self) -> String {
        let mut csv = String::from("driver,due_updates,values_published\n");
        for (name, d) in &self.drivers {
            csv.push_str(&format!("{},{},{}\n", name, d.due_updates, d.values_published));
        }
        csv
    }

    /// Writes a human-readable summary to a writer.
    pub fn write_summary<W: Write>(&self, mut w: W) -> std::io::Result<()> {
        writeln!(w, "=== Run Statistics ===")?;
        if !self.metadata.name.is_empty() {
            writeln!(w, "Name: {}", self.metadata.name)?;
        }
        writeln!(w, "Ticks: {}/{}", self.ticks, self.metadata.n_sample)?;
        writeln!(w, "Updates: {}, outputs: {}", self.updates, self.outputs)?;
        writeln!(w, "Samples logged: {}", self.samples_logged)?;
        writeln!(w, "Requests sent: {}", self.requests_sent)?;
        writeln!(w, "Wall time: {:.2} ms", self.timing.total_wall_time_ms)?;

        if !self.drivers.is_empty() {
            writeln!(w, "--- Drivers ---")?;
            for (name, d) in &self.drivers {
                writeln!(
                    w,
                    "{}: {} due updates, {} values published",
                    name, d.due_updates, d.values_published
                )?;
            }
        }
        Ok(())
    }

    /// Returns the summary as a string.
    pub fn summary(&self) -> String {
        let mut buf = Vec::new();
        // writing into a Vec cannot fail
        let _ = self.write_summary(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }
}

/// Wall-clock stopwatch around [`Scheduler::run`](crate::scheduler::Scheduler::run).
#[derive(Clone, Copy, Debug)]
pub struct Timer(Instant);

impl Timer {
    pub fn start() -> Self {
        Timer(Instant::now())
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.0.elapsed().as_secs_f64()
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed_secs() * 1e3
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::start()
    }
}

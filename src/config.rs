//! Configuration system for the orchestrator.
//!
//! A configuration directory holds one top-level `dos.yaml` and one parameter
//! document `<driver>.yaml` per declared driver.
//!
//! # Configuration File Structure
//!
//! ```yaml
//! simulation:
//!   server:
//!     IP: 127.0.0.1
//!   sampling frequency: 10
//!   duration: 2
//!
//! drivers:
//!   atmosphere:
//!   mount:
//!     sampling rate: 1
//!     inputs:
//!       torque: { size: 2, lien: [controller, torque] }
//!     outputs:
//!       encoder: { size: 2, logs: { decimation: 1 } }
//!   controller:
//!     server: false
//!     client: pid
//!     outputs:
//!       torque: { size: 2 }
//! ```
//!
//! The order of the `drivers` mapping is kept: it is the order in which every
//! scheduler pass visits the drivers.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::types::Tick;
use crate::wiring::WiringPolicy;

/// Name of the top-level configuration file inside a configuration directory.
pub const CONFIG_FILE: &str = "dos.yaml";

/// Port of the remote execution server.
pub const DEFAULT_SERVER_PORT: u16 = 3650;

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("driver {driver}: unknown client model {model:?}")]
    UnknownClientModel { driver: String, model: String },
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// An ordered `name -> T` mapping.
///
/// Serialized as a plain map; a `null` value stands for `T::default()`.
#[derive(Clone, Debug, PartialEq)]
pub struct NamedMap<T>(Vec<(String, T)>);

impl<T> NamedMap<T> {
    /// Creates an empty mapping.
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends an entry.
    pub fn push(&mut self, name: impl Into<String>, value: T) {
        self.0.push((name.into(), value));
    }

    /// Looks an entry up by name.
    pub fn get(&self, name: &str) -> Option<&T> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Iterates in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    /// Iterates over the names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(n, _)| n.as_str())
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there is no entry.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<T> Default for NamedMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Serialize> Serialize for NamedMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (k, v) in &self.0 {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

struct NamedMapVisitor<T>(PhantomData<T>);

impl<'de, T> Visitor<'de> for NamedMapVisitor<T>
where
    T: Deserialize<'de> + Default,
{
    type Value = NamedMap<T>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a mapping of names")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((name, value)) = access.next_entry::<String, Option<T>>()? {
            entries.push((name, value.unwrap_or_default()));
        }
        Ok(NamedMap(entries))
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(NamedMap::new())
    }
}

impl<'de, T> Deserialize<'de> for NamedMap<T>
where
    T: Deserialize<'de> + Default,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(NamedMapVisitor(PhantomData))
    }
}

/// Remote execution server parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerParams {
    /// Host address of the server
    #[serde(rename = "IP", alias = "ip")]
    pub ip: String,

    /// TCP port of the server
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Reply timeout; `None` blocks indefinitely
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_server_port() -> u16 {
    DEFAULT_SERVER_PORT
}

impl ServerParams {
    /// Creates server parameters for a host with the default port.
    pub fn new(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            port: DEFAULT_SERVER_PORT,
            timeout_ms: None,
        }
    }

    /// Returns the ZeroMQ endpoint.
    pub fn endpoint(&self) -> String {
        format!("tcp://{}:{}", self.ip, self.port)
    }
}

/// Global simulation parameters.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimulationParams {
    /// Remote execution server
    pub server: ServerParams,

    /// Base tick rate in Hz
    #[serde(rename = "sampling_frequency", alias = "sampling frequency")]
    pub sampling_frequency: f64,

    /// Simulated duration in seconds
    pub duration: f64,

    /// Treatment of ties whose target does not exist
    #[serde(default)]
    pub wiring: WiringPolicy,
}

impl SimulationParams {
    /// Returns the number of ticks, `round(sampling_frequency × duration)`.
    pub fn n_sample(&self) -> Tick {
        (self.sampling_frequency * self.duration).round() as Tick
    }

    /// Returns the base tick duration τ.
    pub fn tau(&self) -> f64 {
        1.0 / self.sampling_frequency
    }
}

/// Logging parameters of an output port.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogSpec {
    /// Number of base ticks between two logged samples
    #[serde(default = "default_rate")]
    pub decimation: u64,
}

/// Target of a tie: `[driver, port]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TieTarget(pub String, pub String);

impl TieTarget {
    /// Creates a tie target.
    pub fn new(driver: impl Into<String>, port: impl Into<String>) -> Self {
        Self(driver.into(), port.into())
    }

    /// Returns the peer driver name.
    pub fn driver(&self) -> &str {
        &self.0
    }

    /// Returns the peer port name.
    pub fn port(&self) -> &str {
        &self.1
    }
}

/// Declaration of one port.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Length of the initial (zero) value
    #[serde(default = "default_size")]
    pub size: usize,

    /// Declared tie
    #[serde(default)]
    pub lien: Option<TieTarget>,

    /// Output period in base ticks; defaults to the driver's
    #[serde(default, alias = "sampling rate")]
    pub sampling_rate: Option<u64>,

    /// Logging of this output
    #[serde(default)]
    pub logs: Option<LogSpec>,
}

fn default_size() -> usize {
    1
}

fn default_rate() -> u64 {
    1
}

impl Default for PortSpec {
    fn default() -> Self {
        Self::new(default_size())
    }
}

impl PortSpec {
    /// Creates an untied port of the given size.
    pub fn new(size: usize) -> Self {
        Self {
            size,
            lien: None,
            sampling_rate: None,
            logs: None,
        }
    }

    /// Ties this port to a peer port.
    pub fn tied_to(mut self, driver: impl Into<String>, port: impl Into<String>) -> Self {
        self.lien = Some(TieTarget::new(driver, port));
        self
    }

    /// Logs this output with the given decimation.
    pub fn logged(mut self, decimation: u64) -> Self {
        self.logs = Some(LogSpec { decimation });
        self
    }

    /// Sets the output period.
    pub fn every(mut self, ticks: u64) -> Self {
        self.sampling_rate = Some(ticks);
        self
    }
}

/// Declaration of one driver in the `drivers` mapping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriverSpec {
    /// `false` selects an in-process client driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<bool>,

    /// Client model type; defaults to the driver name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,

    /// Update period in base ticks
    #[serde(default = "default_rate", alias = "sampling rate")]
    pub sampling_rate: u64,

    /// Ticks before the first update
    #[serde(default)]
    pub delay: Tick,

    /// Input ports
    #[serde(default)]
    pub inputs: NamedMap<PortSpec>,

    /// Output ports
    #[serde(default)]
    pub outputs: NamedMap<PortSpec>,
}

impl Default for DriverSpec {
    fn default() -> Self {
        Self {
            server: None,
            client: None,
            sampling_rate: default_rate(),
            delay: 0,
            inputs: NamedMap::new(),
            outputs: NamedMap::new(),
        }
    }
}

impl DriverSpec {
    /// Declares a server-backed driver.
    pub fn server() -> Self {
        Self::default()
    }

    /// Declares an in-process client driver running the given model type.
    pub fn client(model: impl Into<String>) -> Self {
        Self {
            server: Some(false),
            client: Some(model.into()),
            ..Self::default()
        }
    }

    /// Sets the update period.
    pub fn with_sampling_rate(mut self, ticks: u64) -> Self {
        self.sampling_rate = ticks;
        self
    }

    /// Sets the delay.
    pub fn with_delay(mut self, ticks: Tick) -> Self {
        self.delay = ticks;
        self
    }

    /// Adds an input port.
    pub fn with_input(mut self, name: impl Into<String>, port: PortSpec) -> Self {
        self.inputs.push(name, port);
        self
    }

    /// Adds an output port.
    pub fn with_output(mut self, name: impl Into<String>, port: PortSpec) -> Self {
        self.outputs.push(name, port);
        self
    }

    /// Returns true if the `server: false` flag is set.
    pub fn is_client(&self) -> bool {
        self.server == Some(false)
    }

    fn validate(&self, name: &str) -> ConfigResult<()> {
        if self.sampling_rate == 0 {
            return Err(ConfigError::Validation(format!(
                "Driver {} has a zero sampling rate",
                name
            )));
        }
        for (dir, ports) in [("input", &self.inputs), ("output", &self.outputs)] {
            let mut seen = HashSet::new();
            for (port, spec) in ports.iter() {
                if !seen.insert(port) {
                    return Err(ConfigError::Validation(format!(
                        "Driver {} declares {} {} twice",
                        name, dir, port
                    )));
                }
                if spec.sampling_rate == Some(0) {
                    return Err(ConfigError::Validation(format!(
                        "Port {}.{} has a zero sampling rate",
                        name, port
                    )));
                }
                if spec.logs.as_ref().is_some_and(|l| l.decimation == 0) {
                    return Err(ConfigError::Validation(format!(
                        "Port {}.{} has a zero decimation",
                        name, port
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Complete orchestrator configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimConfig {
    /// Global simulation parameters
    pub simulation: SimulationParams,

    /// Driver declarations, in scheduling order
    #[serde(default)]
    pub drivers: NamedMap<DriverSpec>,
}

impl SimConfig {
    /// Loads `dos.yaml` from a configuration directory.
    pub fn from_dir<P: AsRef<Path>>(dir: P) -> ConfigResult<Self> {
        Self::from_yaml_file(dir.as_ref().join(CONFIG_FILE))
    }

    /// Loads configuration from a YAML file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Loads configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let config: SimConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the entire configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        let sim = &self.simulation;
        if !(sim.sampling_frequency.is_finite() && sim.sampling_frequency > 0.0) {
            return Err(ConfigError::Validation(format!(
                "Invalid sampling frequency: {}",
                sim.sampling_frequency
            )));
        }
        if !(sim.duration.is_finite() && sim.duration >= 0.0) {
            return Err(ConfigError::Validation(format!(
                "Invalid duration: {}",
                sim.duration
            )));
        }
        if sim.server.ip.trim().is_empty() {
            return Err(ConfigError::Validation("Empty server IP".to_string()));
        }

        let mut names = HashSet::new();
        for (name, spec) in self.drivers.iter() {
            if !names.insert(name) {
                return Err(ConfigError::Validation(format!(
                    "Duplicate driver: {}",
                    name
                )));
            }
            spec.validate(name)?;
        }
        Ok(())
    }

    /// Converts to YAML string.
    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Returns the number of ticks of the run.
    pub fn n_sample(&self) -> Tick {
        self.simulation.n_sample()
    }

    /// Returns the base tick duration.
    pub fn tau(&self) -> f64 {
        self.simulation.tau()
    }
}

/// Returns the parameter document path of a driver.
pub fn resource_path(dir: &Path, driver: &str) -> PathBuf {
    dir.join(format!("{}.yaml", driver))
}

/// Reads a driver parameter document into a free-form value.
///
/// An empty document reads as `null`.
pub fn load_parameters(path: &Path) -> ConfigResult<serde_json::Value> {
    let content = read_to_string(path)?;
    if content.trim().is_empty() {
        return Ok(serde_json::Value::Null);
    }
    Ok(serde_yaml::from_str(&content)?)
}

fn read_to_string(path: &Path) -> ConfigResult<String> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Builder for creating SimConfig programmatically.
pub struct SimConfigBuilder {
    config: SimConfig,
}

impl SimConfigBuilder {
    /// Creates a builder for a 1 Hz, zero-length run against `127.0.0.1`.
    pub fn new() -> Self {
        Self {
            config: SimConfig {
                simulation: SimulationParams {
                    server: ServerParams::new("127.0.0.1"),
                    sampling_frequency: 1.0,
                    duration: 0.0,
                    wiring: WiringPolicy::default(),
                },
                drivers: NamedMap::new(),
            },
        }
    }

    /// Sets the server host.
    pub fn server(mut self, ip: impl Into<String>) -> Self {
        self.config.simulation.server.ip = ip.into();
        self
    }

    /// Sets the base tick rate.
    pub fn sampling_frequency(mut self, hz: f64) -> Self {
        self.config.simulation.sampling_frequency = hz;
        self
    }

    /// Sets the simulated duration.
    pub fn duration(mut self, seconds: f64) -> Self {
        self.config.simulation.duration = seconds;
        self
    }

    /// Sets the wiring policy.
    pub fn wiring(mut self, policy: WiringPolicy) -> Self {
        self.config.simulation.wiring = policy;
        self
    }

    /// Declares a driver.
    pub fn driver(mut self, name: impl Into<String>, spec: DriverSpec) -> Self {
        self.config.drivers.push(name, spec);
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> ConfigResult<SimConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for SimConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
simulation:
  server:
    IP: 10.0.0.7
  sampling frequency: 10
  duration: 2
drivers:
  atmosphere:
  mount:
    sampling rate: 2
    delay: 1
    inputs:
      torque: { size: 2, lien: [controller, torque] }
    outputs:
      encoder:
        size: 2
        logs: { decimation: 5 }
  controller:
    server: false
    client: pid
    outputs:
      torque: { size: 2 }
"#;

    #[test]
    fn test_yaml_parsing() {
        let config = SimConfig::from_yaml(YAML).unwrap();
        assert_eq!(config.simulation.server.ip, "10.0.0.7");
        assert_eq!(config.simulation.server.port, DEFAULT_SERVER_PORT);
        assert_eq!(config.simulation.server.endpoint(), "tcp://10.0.0.7:3650");
        assert_eq!(config.n_sample(), 20);
        assert!((config.tau() - 0.1).abs() < 1e-12);
        assert_eq!(config.simulation.wiring, WiringPolicy::Strict);

        let names: Vec<_> = config.drivers.names().collect();
        assert_eq!(names, vec!["atmosphere", "mount", "controller"]);

        let mount = config.drivers.get("mount").unwrap();
        assert_eq!(mount.sampling_rate, 2);
        assert_eq!(mount.delay, 1);
        let torque = mount.inputs.get("torque").unwrap();
        assert_eq!(torque.lien, Some(TieTarget::new("controller", "torque")));
        assert_eq!(
            mount.outputs.get("encoder").unwrap().logs,
            Some(LogSpec { decimation: 5 })
        );

        let atmosphere = config.drivers.get("atmosphere").unwrap();
        assert_eq!(atmosphere, &DriverSpec::default());

        let controller = config.drivers.get("controller").unwrap();
        assert!(controller.is_client());
        assert_eq!(controller.client.as_deref(), Some("pid"));
    }

    #[test]
    fn test_n_sample_rounds() {
        let config = SimConfigBuilder::new()
            .sampling_frequency(3.0)
            .duration(0.5)
            .build()
            .unwrap();
        assert_eq!(config.n_sample(), 2);
    }

    #[test]
    fn test_json_parsing() {
        let json = r#"{
            "simulation": {
                "server": {"IP": "localhost", "timeout_ms": 250},
                "sampling_frequency": 100,
                "duration": 1,
                "wiring": "lenient"
            },
            "drivers": {"a": {"server": false}}
        }"#;
        let config = SimConfig::from_json(json).unwrap();
        assert_eq!(config.n_sample(), 100);
        assert_eq!(config.simulation.server.timeout_ms, Some(250));
        assert_eq!(config.simulation.wiring, WiringPolicy::Lenient);
    }

    #[test]
    fn test_validation_duplicate_driver() {
        let config = SimConfigBuilder::new()
            .driver("a", DriverSpec::server())
            .driver("a", DriverSpec::server())
            .build();
        assert!(matches!(config, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_validation_bad_frequency() {
        let result = SimConfigBuilder::new().sampling_frequency(0.0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_zero_decimation() {
        let result = SimConfigBuilder::new()
            .driver(
                "a",
                DriverSpec::server().with_output("y", PortSpec::new(1).logged(0)),
            )
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_section_is_error() {
        let result = SimConfig::from_yaml("drivers: {}");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_yaml_roundtrip_keeps_order() {
        let config = SimConfig::from_yaml(YAML).unwrap();
        let restored = SimConfig::from_yaml(&config.to_yaml().unwrap()).unwrap();
        let names: Vec<_> = restored.drivers.names().collect();
        assert_eq!(names, vec!["atmosphere", "mount", "controller"]);
    }

    #[test]
    fn test_load_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let path = resource_path(dir.path(), "mount");
        std::fs::write(&path, "class_id: MOUNT\ngain: 2.5\n").unwrap();

        let params = load_parameters(&path).unwrap();
        assert_eq!(params["class_id"], "MOUNT");
        assert_eq!(params["gain"], 2.5);

        std::fs::write(&path, "").unwrap();
        assert!(load_parameters(&path).unwrap().is_null());

        let missing = load_parameters(&dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}

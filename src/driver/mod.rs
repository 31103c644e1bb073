//! Driver definitions and the `Driver` trait.
//!
//! A driver encapsulates the time-stepped behavior of one subsystem. The
//! scheduler sees every driver through the [`Driver`] capability interface;
//! the concrete variant is fixed once at construction in [`DriverKind`] and
//! [`AnyDriver`] dispatches on it.

pub mod client;
pub mod environment;
pub mod models;
pub mod server;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::broker::BrokerError;
use crate::config::{ConfigError, DriverSpec, NamedMap, PortSpec, TieTarget};
use crate::signal::Signal;
use crate::types::{Direction, Tick, ENVIRONMENT_ROLE};

pub use client::{ClientDriver, ClientModel};
pub use environment::EnvironmentDriver;
pub use server::ServerDriver;

/// Values exchanged on ports, keyed by port name.
pub type PortValues = BTreeMap<String, Signal>;

/// Errors raised by a driver hook.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("output {0} is not declared")]
    UnknownOutput(String),

    #[error("{0}")]
    Model(String),
}

impl DriverError {
    /// Creates a model error.
    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }
}

/// Result type for driver hooks.
pub type DriverResult<T> = Result<T, DriverError>;

/// The variant of a driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DriverKind {
    /// Backed by the remote execution server
    LocalServer,
    /// In-process client model, no server involvement
    RemoteClient,
    /// Environment driver bound directly to the broker
    Environment,
}

impl DriverKind {
    /// Selects the variant of a declared driver.
    ///
    /// `server: false` wins over the environment role.
    pub fn select(name: &str, spec: &DriverSpec) -> Self {
        if spec.is_client() {
            DriverKind::RemoteClient
        } else if name == ENVIRONMENT_ROLE {
            DriverKind::Environment
        } else {
            DriverKind::LocalServer
        }
    }
}

/// Update period and start delay of a driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timing {
    /// Update period in base ticks
    pub sampling_rate: u64,
    /// Ticks before the first update
    pub delay: Tick,
}

impl Timing {
    /// Creates a timing; a zero period is treated as 1.
    pub fn new(sampling_rate: u64, delay: Tick) -> Self {
        Self {
            sampling_rate: sampling_rate.max(1),
            delay,
        }
    }

    /// Returns true if a task of period `rate` runs at `tick`.
    pub fn is_due_every(&self, tick: Tick, rate: u64) -> bool {
        tick >= self.delay && tick % rate.max(1) == 0
    }

    /// Returns true if the driver updates at `tick`.
    pub fn is_due(&self, tick: Tick) -> bool {
        self.is_due_every(tick, self.sampling_rate)
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::new(1, 0)
    }
}

/// A named channel on a driver.
#[derive(Clone, Debug, PartialEq)]
pub struct Port {
    name: String,
    direction: Direction,
    size: usize,
    sampling_rate: u64,
    decimation: Option<u64>,
    tie: Option<TieTarget>,
}

impl Port {
    /// Creates an untied port.
    pub fn new(name: impl Into<String>, direction: Direction, size: usize) -> Self {
        Self {
            name: name.into(),
            direction,
            size,
            sampling_rate: 1,
            decimation: None,
            tie: None,
        }
    }

    /// Builds a port from its declaration; outputs inherit `driver_rate`.
    pub fn from_spec(name: &str, direction: Direction, spec: &PortSpec, driver_rate: u64) -> Self {
        Self {
            name: name.to_string(),
            direction,
            size: spec.size,
            sampling_rate: spec.sampling_rate.unwrap_or(driver_rate).max(1),
            decimation: match direction {
                Direction::Output => spec.logs.as_ref().map(|l| l.decimation.max(1)),
                Direction::Input => None,
            },
            tie: spec.lien.clone(),
        }
    }

    /// Declares a tie to a peer port.
    pub fn with_tie(mut self, driver: impl Into<String>, port: impl Into<String>) -> Self {
        self.tie = Some(TieTarget::new(driver, port));
        self
    }

    /// Logs this port with the given decimation.
    pub fn with_decimation(mut self, decimation: u64) -> Self {
        self.decimation = Some(decimation.max(1));
        self
    }

    /// Sets the port period.
    pub fn with_sampling_rate(mut self, ticks: u64) -> Self {
        self.sampling_rate = ticks.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn sampling_rate(&self) -> u64 {
        self.sampling_rate
    }

    /// Logging decimation, if the port is logged.
    pub fn decimation(&self) -> Option<u64> {
        self.decimation
    }

    /// Declared tie, before resolution.
    pub fn declared_tie(&self) -> Option<&TieTarget> {
        self.tie.as_ref()
    }

    /// Value seen before anything is published: zeros of the declared size.
    pub fn initial_value(&self) -> Signal {
        Signal::zeros(self.size)
    }
}

/// Input and output ports of a driver, in declaration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Ports {
    pub inputs: Vec<Port>,
    pub outputs: Vec<Port>,
}

impl Ports {
    /// Builds the ports declared in a driver specification.
    pub fn from_spec(spec: &DriverSpec) -> Self {
        let build = |ports: &NamedMap<PortSpec>, direction: Direction| -> Vec<Port> {
            ports
                .iter()
                .map(|(name, p)| Port::from_spec(name, direction, p, spec.sampling_rate))
                .collect()
        };
        Self {
            inputs: build(&spec.inputs, Direction::Input),
            outputs: build(&spec.outputs, Direction::Output),
        }
    }

    /// Returns the ports of one direction.
    pub fn of(&self, direction: Direction) -> &[Port] {
        match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        }
    }

    /// Looks a port up.
    pub fn find(&self, direction: Direction, name: &str) -> Option<&Port> {
        self.of(direction).iter().find(|p| p.name == name)
    }

    /// Names of the outputs whose period divides `tick`, once `timing` allows.
    pub fn due_outputs(&self, timing: &Timing, tick: Tick) -> Vec<String> {
        self.outputs
            .iter()
            .filter(|p| timing.is_due_every(tick, p.sampling_rate))
            .map(|p| p.name.clone())
            .collect()
    }
}

/// The capability interface every driver variant implements.
///
/// All hooks but `associate` have no-op defaults.
pub trait Driver: Send {
    /// Returns the driver name.
    fn name(&self) -> &str;

    /// Returns the driver variant.
    fn kind(&self) -> DriverKind;

    /// Returns the update period and delay.
    fn timing(&self) -> Timing;

    /// Returns the declared ports.
    fn ports(&self) -> &Ports;

    /// Binds the driver to its device parameter document.
    fn associate(&mut self, device: &Path) -> DriverResult<()>;

    /// Called once, when the configuration is pushed.
    fn start(&mut self) -> DriverResult<()> {
        Ok(())
    }

    /// Called once, before the first tick.
    fn init(&mut self) -> DriverResult<()> {
        Ok(())
    }

    /// Consumes the inputs of tick `tick`, as published during the previous tick.
    fn update(&mut self, _tick: Tick, _inputs: &PortValues) -> DriverResult<()> {
        Ok(())
    }

    /// Publishes outputs for tick `tick`.
    ///
    /// Ports absent from the result keep their previous value.
    fn output(&mut self, _tick: Tick) -> DriverResult<PortValues> {
        Ok(PortValues::new())
    }

    /// Called once, after the last tick.
    fn terminate(&mut self) -> DriverResult<()> {
        Ok(())
    }

    /// Update period in base ticks.
    fn sampling_rate(&self) -> u64 {
        self.timing().sampling_rate
    }

    /// Ticks before the first update.
    fn delay(&self) -> Tick {
        self.timing().delay
    }

    fn inputs(&self) -> &[Port] {
        &self.ports().inputs
    }

    fn outputs(&self) -> &[Port] {
        &self.ports().outputs
    }
}

/// A driver of any built-in variant.
pub enum AnyDriver {
    LocalServer(ServerDriver),
    RemoteClient(ClientDriver),
    Environment(EnvironmentDriver),
}

macro_rules! dispatch {
    ($self:ident, $d:ident => $e:expr) => {
        match $self {
            AnyDriver::LocalServer($d) => $e,
            AnyDriver::RemoteClient($d) => $e,
            AnyDriver::Environment($d) => $e,
        }
    };
}

impl Driver for AnyDriver {
    fn name(&self) -> &str {
        dispatch!(self, d => d.name())
    }

    fn kind(&self) -> DriverKind {
        match self {
            AnyDriver::LocalServer(_) => DriverKind::LocalServer,
            AnyDriver::RemoteClient(_) => DriverKind::RemoteClient,
            AnyDriver::Environment(_) => DriverKind::Environment,
        }
    }

    fn timing(&self) -> Timing {
        dispatch!(self, d => d.timing())
    }

    fn ports(&self) -> &Ports {
        dispatch!(self, d => d.ports())
    }

    fn associate(&mut self, device: &Path) -> DriverResult<()> {
        dispatch!(self, d => d.associate(device))
    }

    fn start(&mut self) -> DriverResult<()> {
        dispatch!(self, d => d.start())
    }

    fn init(&mut self) -> DriverResult<()> {
        dispatch!(self, d => d.init())
    }

    fn update(&mut self, tick: Tick, inputs: &PortValues) -> DriverResult<()> {
        dispatch!(self, d => d.update(tick, inputs))
    }

    fn output(&mut self, tick: Tick) -> DriverResult<PortValues> {
        dispatch!(self, d => d.output(tick))
    }

    fn terminate(&mut self) -> DriverResult<()> {
        dispatch!(self, d => d.terminate())
    }
}

impl std::fmt::Debug for AnyDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyDriver")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("timing", &self.timing())
            .finish()
    }
}

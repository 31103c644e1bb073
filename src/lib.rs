//! # DOS: driver orchestration for multi-rate simulations
//!
//! `dos` runs a set of independently-rated simulation *drivers* in a single
//! deterministic, time-stepped loop. Server-backed drivers relay their work
//! to a remote execution server over one request-reply channel; client
//! drivers run in-process models. Logged outputs are recorded as time series.
//!
//! ## Design Principles
//!
//! - **Two-pass ticks**: every tick runs all updates, then all outputs. A
//!   driver always reads what its peers published during the previous tick.
//! - **Multi-rate**: each driver updates every `sampling_rate` base ticks
//!   after an initial `delay`; outputs hold their value between publications.
//! - **Wiring at build time**: ties between ports are resolved and validated
//!   once, before the first tick.
//! - **Explicit context**: components log under spans created from a
//!   [`SimContext`] instead of reading global configuration.
//!
//! ## Features
//!
//! - `zmq` - Connect to the execution server over ZeroMQ (requires libzmq).
//!   Off by default; without it [`Simulation::from_dir`] cannot reach a server
//!   and setups must inject a [`Transport`].
//!
//! ## Quick Start
//!
//! ```rust
//! use dos::broker::loopback::{LoopbackTransport, RecordingServer};
//! use dos::config::{DriverSpec, PortSpec, SimConfigBuilder};
//! use dos::{SimContext, Simulation};
//!
//! let dir = tempfile::tempdir().unwrap();
//! std::fs::write(dir.path().join("source.yaml"), "values: { y: 1.5 }\n").unwrap();
//!
//! let config = SimConfigBuilder::new()
//!     .sampling_frequency(10.0)
//!     .duration(1.0)
//!     .driver(
//!         "source",
//!         DriverSpec::client("constant").with_output("y", PortSpec::new(1).logged(1)),
//!     )
//!     .build()
//!     .unwrap();
//!
//! let mut sim = Simulation::builder(config, dir.path())
//!     .context(SimContext::new("quick-start"))
//!     .transport(Box::new(LoopbackTransport::new(RecordingServer::new())))
//!     .build()
//!     .unwrap();
//! sim.run().unwrap();
//!
//! assert_eq!(sim.pct_complete(), 100);
//! assert_eq!(sim.logs().entry("source", "y").unwrap().len(), 10);
//! ```
//!
//! ## Configuration-Driven Setup
//!
//! ```rust,ignore
//! let mut sim = dos::Simulation::from_dir("config", dos::SimContext::new("run"))?;
//! sim.run()?;
//! println!("{}", sim.logs());
//! ```

pub mod broker;
pub mod config;
pub mod context;
pub mod diagram;
pub mod driver;
pub mod error;
pub mod logs;
pub mod registry;
pub mod scheduler;
pub mod signal;
pub mod simulation;
pub mod stats;
pub mod types;
pub mod wiring;

// Re-export commonly used types
pub use types::{Direction, DriverIndex, PortIndex, Tick};
pub use context::SimContext;
pub use signal::Signal;
pub use config::{ConfigError, DriverSpec, PortSpec, SimConfig, SimConfigBuilder};
pub use driver::{AnyDriver, ClientModel, Driver, DriverError, DriverKind, PortValues};
pub use registry::{create_default_registry, ClientRegistry};
pub use wiring::{Lien, PortGraph, WiringError, WiringPolicy};
pub use logs::{LogError, Logs, TimeSeries, TimeSeriesEntry};
pub use broker::{Broker, BrokerError, SharedBroker, Transport};
pub use scheduler::{Lifecycle, Step, Stepper};
pub use simulation::{Simulation, SimulationBuilder};
pub use diagram::Diagram;
pub use stats::{RunStats, Timer};
pub use error::{Phase, SetupWarning, SimError, SimResult};

/// Initialize the tracing subscriber for logging.
///
/// Call this at the start of your program to enable logging. `RUST_LOG`
/// takes precedence over `level`.
///
/// # Example
///
/// ```rust,ignore
/// dos::init_logging("info");
/// ```
pub fn init_logging(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level));

    // a second call keeps the first subscriber
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}

//! The orchestrator.
//!
//! A [`Simulation`] owns the broker, the drivers, their wiring, the logs and
//! the clock. It is built in one go from a configuration directory:
//!
//! 1. connect to the server (handshake),
//! 2. build one driver per declared name with a parameter document,
//! 3. resolve the ties,
//! 4. associate every driver with its parameter document,
//! 5. register the logged outputs.
//!
//! Any failure along the way aborts construction.
//!
//! # Example
//!
//! ```no_run
//! use dos::{SimContext, Simulation};
//!
//! let mut sim = Simulation::from_dir("config", SimContext::new("run"))?;
//! sim.run()?;
//! println!("{}", sim.logs());
//! # Ok::<(), dos::SimError>(())
//! ```

use std::path::{Path, PathBuf};
use tracing::Span;

use crate::broker::{Broker, SharedBroker, Transport};
use crate::config::{resource_path, SimConfig};
use crate::context::SimContext;
use crate::diagram::Diagram;
use crate::driver::{AnyDriver, Driver};
use crate::error::{SetupWarning, SimError, SimResult};
use crate::logs::Logs;
use crate::registry::{build_drivers, create_default_registry, ClientRegistry};
use crate::scheduler::{Lifecycle, Scheduler, Step};
use crate::stats::RunStats;
use crate::types::{Direction, Tick};
use crate::wiring::{Lien, PortGraph};

/// Builder for a [`Simulation`].
pub struct SimulationBuilder {
    config: SimConfig,
    dir: PathBuf,
    ctx: SimContext,
    clients: ClientRegistry,
    transport: Option<Box<dyn Transport>>,
}

impl SimulationBuilder {
    /// Starts from a loaded configuration; parameter documents are read from `dir`.
    pub fn new(config: SimConfig, dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            dir: dir.into(),
            ctx: SimContext::default(),
            clients: create_default_registry(),
            transport: None,
        }
    }

    /// Sets the logging context.
    pub fn context(mut self, ctx: SimContext) -> Self {
        self.ctx = ctx;
        self
    }

    /// Replaces the client model registry.
    pub fn clients(mut self, clients: ClientRegistry) -> Self {
        self.clients = clients;
        self
    }

    /// Talks to the server over `transport` instead of connecting to the
    /// configured endpoint.
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Builds the orchestrator.
    pub fn build(self) -> SimResult<Simulation> {
        let SimulationBuilder {
            config,
            dir,
            ctx,
            clients,
            transport,
        } = self;
        config.validate()?;
        let span = ctx.span("simulation");

        let broker = match transport {
            Some(transport) => Broker::with_transport(transport, &ctx)?,
            None => Broker::connect(&config.simulation.server, &ctx)?,
        }
        .shared();

        let (mut drivers, mut warnings) = span.in_scope(|| {
            build_drivers(&config, &dir, &clients, &broker, &ctx)
        })?;

        let graph = PortGraph::resolve(&drivers, config.simulation.wiring)?;
        warnings.extend(
            graph
                .unresolved()
                .iter()
                .cloned()
                .map(SetupWarning::UnresolvedTie),
        );

        for driver in &mut drivers {
            let device = resource_path(&dir, driver.name());
            driver
                .associate(&device)
                .map_err(|source| SimError::Association {
                    driver: driver.name().to_string(),
                    source,
                })?;
        }

        let scheduler = Scheduler::new(drivers, graph, config.n_sample(), config.tau(), &ctx);
        span.in_scope(|| {
            tracing::info!(
                "Simulation setup for a duration of {}s @ {}Hz ({} steps)!",
                config.simulation.duration,
                config.simulation.sampling_frequency,
                config.n_sample()
            )
        });

        Ok(Simulation {
            config,
            dir,
            broker,
            scheduler,
            warnings,
            span,
        })
    }
}

/// A configured, wired driver set bound to the execution server.
pub struct Simulation {
    config: SimConfig,
    dir: PathBuf,
    broker: SharedBroker,
    scheduler: Scheduler<AnyDriver>,
    warnings: Vec<SetupWarning>,
    span: Span,
}

impl Simulation {
    /// Reads `dos.yaml` from `dir` and builds the orchestrator with the
    /// built-in client models, connecting to the configured server.
    ///
    /// Reaching a real server needs the `zmq` cargo feature. Without it this
    /// fails with [`BrokerError::Unavailable`](crate::broker::BrokerError::Unavailable);
    /// use [`Simulation::builder`] with an explicit transport instead.
    pub fn from_dir<P: AsRef<Path>>(dir: P, ctx: SimContext) -> SimResult<Self> {
        let dir = dir.as_ref();
        ctx.span("simulation")
            .in_scope(|| tracing::info!("Reading config from {}", dir.display()));
        let config = SimConfig::from_dir(dir)?;
        SimulationBuilder::new(config, dir).context(ctx).build()
    }

    /// Starts a builder.
    pub fn builder(config: SimConfig, dir: impl Into<PathBuf>) -> SimulationBuilder {
        SimulationBuilder::new(config, dir)
    }

    /// Pushes every driver's configuration to the server, once.
    pub fn push(&mut self) -> SimResult<()> {
        self.scheduler.push()
    }

    /// Initializes every driver, once.
    pub fn init(&mut self) -> SimResult<()> {
        self.scheduler.init()
    }

    /// Runs every remaining tick, then terminates.
    pub fn run(&mut self) -> SimResult<()> {
        self.scheduler.run()
    }

    /// Executes one tick.
    pub fn step(&mut self) -> SimResult<Step> {
        self.scheduler.step()
    }

    /// Terminates every driver, once.
    pub fn terminate(&mut self) -> SimResult<()> {
        self.scheduler.terminate()
    }

    /// Progress of the run in percent.
    pub fn pct_complete(&self) -> u8 {
        self.scheduler.pct_complete()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.scheduler.lifecycle()
    }

    pub fn n_sample(&self) -> Tick {
        self.scheduler.stepper().n_sample()
    }

    pub fn logs(&self) -> &Logs {
        self.scheduler.logs()
    }

    /// Drivers in declaration order.
    pub fn drivers(&self) -> &[AnyDriver] {
        self.scheduler.drivers()
    }

    pub fn driver(&self, name: &str) -> Option<&AnyDriver> {
        self.scheduler.driver(name)
    }

    pub fn driver_mut(&mut self, name: &str) -> Option<&mut AnyDriver> {
        self.scheduler.driver_mut(name)
    }

    /// Resolved peer of a port.
    pub fn lien(&self, driver: &str, direction: Direction, port: &str) -> Option<Lien> {
        self.scheduler.graph().lien(driver, direction, port)
    }

    pub fn graph(&self) -> &PortGraph {
        self.scheduler.graph()
    }

    /// Timing diagram of the driver set.
    pub fn diagram(&self) -> Diagram {
        Diagram::build(
            self.scheduler.drivers(),
            self.scheduler.graph(),
            self.config.simulation.sampling_frequency,
        )
    }

    /// Statistics of the run so far.
    pub fn stats(&self) -> RunStats {
        let mut stats = self.scheduler.stats().clone();
        stats.requests_sent = self.broker.lock().requests_sent();
        stats.metadata.config_dir = Some(self.dir.display().to_string());
        stats
    }

    /// Non-fatal problems found during setup.
    pub fn warnings(&self) -> &[SetupWarning] {
        &self.warnings
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// The broker shared with the server-backed drivers.
    pub fn broker(&self) -> &SharedBroker {
        &self.broker
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("dir", &self.dir)
            .field("drivers", &self.scheduler.drivers())
            .field("lifecycle", &self.lifecycle())
            .field("pct_complete", &self.pct_complete())
            .finish()
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        if self.lifecycle() == Lifecycle::Running {
            self.span
                .in_scope(|| tracing::warn!("Dropped while running; drivers were not terminated"));
        }
    }
}

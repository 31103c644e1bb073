//! Two-pass step scheduler.
//!
//! Every tick runs an update pass over all drivers, then an output pass.
//! Inputs seen during the update pass of tick `k` are the values held on the
//! source outputs at the end of tick `k - 1` (zeros before the first
//! publication), so no driver observes another driver's tick-`k` output
//! before its own tick-`k` update.
//!
//! The clock lives in an explicit [`Stepper`]; the lifecycle of the driver
//! set is a small state machine whose transitions are idempotent.

use tracing::Span;

use crate::context::SimContext;
use crate::driver::{Driver, DriverError, PortValues};
use crate::error::{Phase, SimError, SimResult};
use crate::logs::Logs;
use crate::signal::Signal;
use crate::stats::{RunStats, Timer};
use crate::types::{Direction, DriverIndex, PortIndex, Tick};
use crate::wiring::PortGraph;

/// Result of advancing the clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// Tick `k` was executed
    Tick(Tick),
    /// Every tick has run
    Done,
}

/// The simulation clock.
#[derive(Clone, Debug)]
pub struct Stepper {
    next: Tick,
    n_sample: Tick,
    last: Option<Tick>,
}

impl Stepper {
    pub fn new(n_sample: Tick) -> Self {
        Self {
            next: 0,
            n_sample,
            last: None,
        }
    }

    /// Claims the next tick index.
    pub fn advance(&mut self) -> Step {
        if self.next >= self.n_sample {
            return Step::Done;
        }
        let k = self.next;
        self.next += 1;
        self.last = Some(k);
        Step::Tick(k)
    }

    pub fn n_sample(&self) -> Tick {
        self.n_sample
    }

    /// Last tick claimed, if any.
    pub fn last_tick(&self) -> Option<Tick> {
        self.last
    }

    pub fn is_done(&self) -> bool {
        self.next >= self.n_sample
    }

    /// Progress in percent; 100 only once the final tick has been claimed.
    pub fn pct_complete(&self) -> u8 {
        let Some(k) = self.last else {
            return 0;
        };
        if self.n_sample <= 1 {
            return 100;
        }
        let last = self.n_sample - 1;
        if k >= last {
            return 100;
        }
        let pct = (100.0 * k as f64 / last as f64).round() as u8;
        pct.min(99)
    }
}

/// Lifecycle of a driver set.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Lifecycle {
    Constructed,
    Pushed,
    Initialized,
    Running,
    Terminated,
}

/// Ports of one driver, resolved to arena indices.
#[derive(Debug, Default)]
struct DriverPorts {
    inputs: Vec<(String, PortIndex)>,
    outputs: Vec<(String, PortIndex, Option<u64>)>,
}

/// Values held on every port node, indexed like the arena.
///
/// Outputs keep their last published value; inputs keep their initial zeros
/// and stand in for untied inputs.
#[derive(Debug)]
pub struct SignalBus {
    held: Vec<Signal>,
    published: Vec<bool>,
}

impl SignalBus {
    fn new(graph: &PortGraph) -> Self {
        Self {
            held: graph.nodes().iter().map(|n| Signal::zeros(n.size)).collect(),
            published: vec![false; graph.nodes().len()],
        }
    }

    pub fn get(&self, id: PortIndex) -> Option<&Signal> {
        self.held.get(id)
    }

    /// Returns true once a value has been published on `id`.
    pub fn is_published(&self, id: PortIndex) -> bool {
        self.published.get(id).copied().unwrap_or(false)
    }

    fn publish(&mut self, id: PortIndex, value: Signal) {
        self.held[id] = value;
        self.published[id] = true;
    }

    fn gather(&self, graph: &PortGraph, inputs: &[(String, PortIndex)]) -> PortValues {
        inputs
            .iter()
            .map(|(name, id)| {
                let from = graph.source_of(*id).unwrap_or(*id);
                (name.clone(), self.held[from].clone())
            })
            .collect()
    }
}

/// Runs a driver set through its lifecycle.
pub struct Scheduler<D> {
    drivers: Vec<D>,
    ports: Vec<DriverPorts>,
    graph: PortGraph,
    bus: SignalBus,
    stepper: Stepper,
    lifecycle: Lifecycle,
    logs: Logs,
    stats: RunStats,
    span: Span,
    debug: bool,
}

impl<D: Driver> Scheduler<D> {
    /// Creates a scheduler over wired drivers and registers every logged output.
    pub fn new(drivers: Vec<D>, graph: PortGraph, n_sample: Tick, tau: f64, ctx: &SimContext) -> Self {
        let mut logs = Logs::new(tau);
        let mut stats = RunStats::new().with_name(ctx.name());
        stats.metadata.n_sample = n_sample;
        if tau > 0.0 {
            stats.metadata.sampling_frequency = 1.0 / tau;
        }

        let ports = drivers
            .iter()
            .enumerate()
            .map(|(i, d)| {
                stats.driver_mut(d.name());
                let inputs = d
                    .inputs()
                    .iter()
                    .filter_map(|p| {
                        let id = graph.port_at(i, Direction::Input, p.name())?;
                        Some((p.name().to_string(), id))
                    })
                    .collect();
                let outputs = d
                    .outputs()
                    .iter()
                    .filter_map(|p| {
                        if let Some(decimation) = p.decimation() {
                            logs.register(d.name(), p.name(), decimation);
                        }
                        let id = graph.port_at(i, Direction::Output, p.name())?;
                        Some((p.name().to_string(), id, p.decimation()))
                    })
                    .collect();
                DriverPorts { inputs, outputs }
            })
            .collect();

        Self {
            bus: SignalBus::new(&graph),
            drivers,
            ports,
            graph,
            stepper: Stepper::new(n_sample),
            lifecycle: Lifecycle::Constructed,
            logs,
            stats,
            span: ctx.span("scheduler"),
            debug: ctx.enabled(tracing::Level::DEBUG),
        }
    }

    fn each(&mut self, phase: Phase, mut hook: impl FnMut(&mut D) -> Result<(), DriverError>) -> SimResult<()> {
        for driver in &mut self.drivers {
            hook(driver).map_err(|source| SimError::Driver {
                driver: driver.name().to_string(),
                phase,
                source,
            })?;
        }
        Ok(())
    }

    /// Invokes every driver's `start` once.
    pub fn push(&mut self) -> SimResult<()> {
        if self.lifecycle >= Lifecycle::Pushed {
            return Ok(());
        }
        self.span.in_scope(|| tracing::info!("Pushing configuration to server"));
        self.each(Phase::Start, |d| d.start())?;
        self.lifecycle = Lifecycle::Pushed;
        Ok(())
    }

    /// Invokes every driver's `init` once, pushing first if needed.
    pub fn init(&mut self) -> SimResult<()> {
        if self.lifecycle >= Lifecycle::Initialized {
            return Ok(());
        }
        self.push()?;
        self.span.in_scope(|| tracing::info!("Initializing"));
        self.each(Phase::Init, |d| d.init())?;
        self.lifecycle = Lifecycle::Initialized;
        Ok(())
    }

    /// Executes the next tick.
    pub fn step(&mut self) -> SimResult<Step> {
        if self.lifecycle == Lifecycle::Terminated {
            return Ok(Step::Done);
        }
        self.init()?;
        self.lifecycle = Lifecycle::Running;
        match self.stepper.advance() {
            Step::Tick(k) => {
                self.tick(k)?;
                Ok(Step::Tick(k))
            }
            Step::Done => Ok(Step::Done),
        }
    }

    /// Runs every remaining tick, then terminates.
    ///
    /// A terminated scheduler is left untouched.
    pub fn run(&mut self) -> SimResult<()> {
        if self.lifecycle == Lifecycle::Terminated {
            self.span
                .in_scope(|| tracing::warn!("Run requested after termination; ignored"));
            return Ok(());
        }
        self.init()?;
        self.span.in_scope(|| tracing::info!("Running"));
        let timer = Timer::start();
        while let Step::Tick(_) = self.step()? {}
        let elapsed = timer.elapsed_ms();
        self.stats.add_wall_time(elapsed);
        self.span
            .in_scope(|| tracing::info!("Elapsed time: {:.3}s", elapsed / 1000.0));
        self.terminate()
    }

    /// Invokes every driver's `terminate` once.
    pub fn terminate(&mut self) -> SimResult<()> {
        if self.lifecycle == Lifecycle::Terminated {
            return Ok(());
        }
        self.span.in_scope(|| tracing::info!("Terminating"));
        self.lifecycle = Lifecycle::Terminated;
        self.each(Phase::Terminate, |d| d.terminate())
    }

    fn tick(&mut self, k: Tick) -> SimResult<()> {
        if self.debug {
            self.span.in_scope(|| tracing::debug!("Step #{}", k));
        }

        for (i, driver) in self.drivers.iter_mut().enumerate() {
            let inputs = self.bus.gather(&self.graph, &self.ports[i].inputs);
            if driver.timing().is_due(k) {
                self.stats.driver_mut(driver.name()).due_updates += 1;
            }
            driver.update(k, &inputs).map_err(|source| SimError::Driver {
                driver: driver.name().to_string(),
                phase: Phase::Update,
                source,
            })?;
            self.stats.updates += 1;
        }

        for (i, driver) in self.drivers.iter_mut().enumerate() {
            let values = driver.output(k).map_err(|source| SimError::Driver {
                driver: driver.name().to_string(),
                phase: Phase::Output,
                source,
            })?;
            self.stats.outputs += 1;

            let published = values.len() as u64;
            for (port, value) in values {
                let id = self
                    .graph
                    .port_at(i, Direction::Output, &port)
                    .ok_or_else(|| SimError::Driver {
                        driver: driver.name().to_string(),
                        phase: Phase::Output,
                        source: DriverError::UnknownOutput(port.clone()),
                    })?;
                self.bus.publish(id, value);
            }
            self.stats.values_published += published;
            self.stats.driver_mut(driver.name()).values_published += published;

            // outputs are logged on their held value, from their first publication on
            for (port, id, decimation) in &self.ports[i].outputs {
                if let Some(decimation) = decimation {
                    if k % decimation == 0 && self.bus.is_published(*id) {
                        self.logs
                            .add(driver.name(), port, self.bus.held[*id].clone())?;
                        self.stats.samples_logged += 1;
                    }
                }
            }
        }

        self.stats.ticks += 1;
        Ok(())
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn stepper(&self) -> &Stepper {
        &self.stepper
    }

    pub fn pct_complete(&self) -> u8 {
        self.stepper.pct_complete()
    }

    pub fn logs(&self) -> &Logs {
        &self.logs
    }

    pub fn drivers(&self) -> &[D] {
        &self.drivers
    }

    /// Looks a driver up by name.
    pub fn driver(&self, name: &str) -> Option<&D> {
        self.drivers.iter().find(|d| d.name() == name)
    }

    pub fn driver_mut(&mut self, name: &str) -> Option<&mut D> {
        self.drivers.iter_mut().find(|d| d.name() == name)
    }

    pub fn graph(&self) -> &PortGraph {
        &self.graph
    }

    /// Value currently held on an output port.
    pub fn held(&self, driver: &str, port: &str) -> Option<&Signal> {
        let id = self.graph.port_index(driver, Direction::Output, port)?;
        self.bus.get(id)
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Position of a driver in declaration order.
    pub fn driver_index(&self, name: &str) -> Option<DriverIndex> {
        self.graph.driver_index(name)
    }
}

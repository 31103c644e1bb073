//! Multi-rate scheduling tests.
//!
//! Client drivers run in-process, so these tests check the timing rules of
//! the scheduler end to end: rates, delays, zero-order hold, and the
//! one-tick latency between a publication and its consumers.

use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;

use dos::broker::loopback::{LoopbackTransport, RecordingServer};
use dos::config::{DriverSpec, PortSpec, SimConfig, SimConfigBuilder};
use dos::driver::DriverResult;
use dos::{
    create_default_registry, ClientModel, ClientRegistry, ConfigError, PortValues, SimContext,
    SimError, Signal, Simulation, Tick,
};

// ============================================================================
// Test Models
// ============================================================================

/// Publishes the tick of its last update on `t`.
#[derive(Default)]
struct Clock {
    last: f64,
}

impl ClientModel for Clock {
    fn update(&mut self, tick: Tick, _inputs: &PortValues) -> DriverResult<()> {
        self.last = tick as f64;
        Ok(())
    }

    fn output(&mut self, _tick: Tick) -> DriverResult<PortValues> {
        let mut values = PortValues::new();
        values.insert("t".into(), Signal::scalar(self.last));
        Ok(values)
    }
}

/// Records the first element of `t` at every update.
struct Recorder(Arc<Mutex<Vec<(Tick, f64)>>>);

impl ClientModel for Recorder {
    fn update(&mut self, tick: Tick, inputs: &PortValues) -> DriverResult<()> {
        let t = inputs.get("t").map_or(f64::NAN, |s| s.as_slice()[0]);
        self.0.lock().push((tick, t));
        Ok(())
    }

    fn output(&mut self, _tick: Tick) -> DriverResult<PortValues> {
        Ok(PortValues::new())
    }
}

fn registry(seen: &Arc<Mutex<Vec<(Tick, f64)>>>) -> ClientRegistry {
    let mut clients = create_default_registry();
    clients.register("clock", |_: &str| Box::new(Clock::default()) as Box<dyn ClientModel>);
    let seen = Arc::clone(seen);
    clients.register("recorder", move |_: &str| {
        Box::new(Recorder(Arc::clone(&seen))) as Box<dyn ClientModel>
    });
    clients
}

fn build(dir: &Path, config: SimConfig, clients: ClientRegistry) -> Result<Simulation, SimError> {
    for name in config.drivers.names() {
        std::fs::write(dir.join(format!("{}.yaml", name)), "").unwrap();
    }
    Simulation::builder(config, dir)
        .context(SimContext::new("multirate"))
        .clients(clients)
        .transport(Box::new(LoopbackTransport::new(RecordingServer::new())))
        .build()
}

// ============================================================================
// Timing
// ============================================================================

#[test]
fn test_slow_delayed_producer() {
    let dir = tempfile::tempdir().unwrap();
    let config = SimConfigBuilder::new()
        .sampling_frequency(8.0)
        .duration(1.0)
        .driver(
            "clock",
            DriverSpec::client("clock")
                .with_sampling_rate(2)
                .with_delay(1)
                .with_output("t", PortSpec::new(1).logged(1)),
        )
        .driver(
            "reader",
            DriverSpec::client("recorder").with_input("t", PortSpec::new(1).tied_to("clock", "t")),
        )
        .build()
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut sim = build(dir.path(), config, registry(&seen)).unwrap();
    sim.run().unwrap();

    // clock updates at 2, 4, 6; the reader sees each value one tick later
    let seen: Vec<f64> = seen.lock().iter().map(|(_, t)| *t).collect();
    assert_eq!(seen, vec![0.0, 0.0, 0.0, 2.0, 2.0, 4.0, 4.0, 6.0]);

    // logging starts with the first publication and holds between updates
    let t = sim.logs().time_series("clock", "t").unwrap();
    assert_eq!(t.values.shape(), &[6, 1]);
    assert_eq!(t.values.as_slice(), &[2.0, 2.0, 4.0, 4.0, 6.0, 6.0]);
}

#[test]
fn test_declaration_order_does_not_matter() {
    let run = |reader_first: bool| {
        let reader = DriverSpec::client("recorder")
            .with_input("t", PortSpec::new(1).tied_to("clock", "t"));
        let clock = DriverSpec::client("clock").with_output("t", PortSpec::new(1));
        let builder = SimConfigBuilder::new().sampling_frequency(5.0).duration(1.0);
        let builder = if reader_first {
            builder.driver("reader", reader).driver("clock", clock)
        } else {
            builder.driver("clock", clock).driver("reader", reader)
        };

        let dir = tempfile::tempdir().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut sim = build(dir.path(), builder.build().unwrap(), registry(&seen)).unwrap();
        sim.run().unwrap();
        let seen = seen.lock().clone();
        seen
    };

    let expected = vec![(0, 0.0), (1, 0.0), (2, 1.0), (3, 2.0), (4, 3.0)];
    assert_eq!(run(true), expected);
    assert_eq!(run(false), expected);
}

#[test]
fn test_output_rate_faster_than_update_rate() {
    let dir = tempfile::tempdir().unwrap();
    let config = SimConfigBuilder::new()
        .sampling_frequency(6.0)
        .duration(1.0)
        .driver(
            "clock",
            DriverSpec::client("clock")
                .with_sampling_rate(3)
                .with_output("t", PortSpec::new(1).every(1).logged(2)),
        )
        .build()
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut sim = build(dir.path(), config, registry(&seen)).unwrap();
    sim.run().unwrap();

    let t = sim.logs().time_series("clock", "t").unwrap();
    assert_eq!(t.values.as_slice(), &[0.0, 0.0, 3.0]);
    assert!((t.time[2] - 2.0 / 3.0).abs() < 1e-9);
}

// ============================================================================
// Built-in Models
// ============================================================================

#[test]
fn test_constant_into_integrator() {
    let dir = tempfile::tempdir().unwrap();
    let config = SimConfigBuilder::new()
        .sampling_frequency(5.0)
        .duration(1.0)
        .driver(
            "source",
            DriverSpec::client("constant").with_output("y", PortSpec::new(1)),
        )
        .driver(
            "sum",
            DriverSpec::client("integrator")
                .with_input("u", PortSpec::new(1).tied_to("source", "y"))
                .with_output("y", PortSpec::new(1).logged(1)),
        )
        .build()
        .unwrap();

    // a zeros vector reaches the integrator first, so the source publishes a vector too
    std::fs::write(dir.path().join("source.yaml"), "values: { y: [1.0] }\n").unwrap();
    std::fs::write(dir.path().join("sum.yaml"), "gain: 0.5\n").unwrap();
    let mut sim = Simulation::builder(config, dir.path())
        .transport(Box::new(LoopbackTransport::new(RecordingServer::new())))
        .build()
        .unwrap();
    sim.run().unwrap();

    let y = sim.logs().time_series("sum", "y").unwrap();
    assert_eq!(y.values.as_slice(), &[0.0, 0.5, 1.0, 1.5, 2.0]);
}

#[test]
fn test_unknown_client_model() {
    let dir = tempfile::tempdir().unwrap();
    let config = SimConfigBuilder::new()
        .sampling_frequency(1.0)
        .duration(1.0)
        .driver("pid", DriverSpec::client("pid"))
        .build()
        .unwrap();

    let err = build(dir.path(), config, create_default_registry()).unwrap_err();
    assert!(matches!(
        err,
        SimError::Config(ConfigError::UnknownClientModel { ref driver, ref model })
            if driver == "pid" && model == "pid"
    ));
}

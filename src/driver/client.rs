//! In-process driver running a user-supplied [`ClientModel`].

use std::path::Path;
use tracing::Span;

use crate::config::{load_parameters, DriverSpec};
use crate::context::SimContext;
use crate::driver::{Driver, DriverError, DriverKind, DriverResult, PortValues, Ports, Timing};
use crate::types::Tick;

/// Behavior of a client driver.
///
/// The driver handles timing: `update` is only called on due ticks, and
/// only the due outputs returned by `output` are published.
pub trait ClientModel: Send {
    /// Receives the driver's parameter document.
    fn associate(&mut self, _params: &serde_json::Value) -> DriverResult<()> {
        Ok(())
    }

    fn start(&mut self) -> DriverResult<()> {
        Ok(())
    }

    fn init(&mut self) -> DriverResult<()> {
        Ok(())
    }

    /// Consumes the inputs of a due tick.
    fn update(&mut self, tick: Tick, inputs: &PortValues) -> DriverResult<()>;

    /// Produces output values for a tick.
    fn output(&mut self, tick: Tick) -> DriverResult<PortValues>;

    fn terminate(&mut self) -> DriverResult<()> {
        Ok(())
    }
}

/// Client driver.
pub struct ClientDriver {
    name: String,
    timing: Timing,
    ports: Ports,
    model: Box<dyn ClientModel>,
    span: Span,
}

impl ClientDriver {
    /// Creates a driver from its declaration and model.
    pub fn new(name: &str, spec: &DriverSpec, model: Box<dyn ClientModel>, ctx: &SimContext) -> Self {
        Self {
            name: name.to_string(),
            timing: Timing::new(spec.sampling_rate, spec.delay),
            ports: Ports::from_spec(spec),
            model,
            span: ctx.span(name),
        }
    }
}

impl Driver for ClientDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DriverKind {
        DriverKind::RemoteClient
    }

    fn timing(&self) -> Timing {
        self.timing
    }

    fn ports(&self) -> &Ports {
        &self.ports
    }

    fn associate(&mut self, device: &Path) -> DriverResult<()> {
        let params = load_parameters(device)?;
        self.span
            .in_scope(|| tracing::debug!("Associated with {}", device.display()));
        self.model.associate(&params)
    }

    fn start(&mut self) -> DriverResult<()> {
        self.model.start()
    }

    fn init(&mut self) -> DriverResult<()> {
        self.model.init()
    }

    fn update(&mut self, tick: Tick, inputs: &PortValues) -> DriverResult<()> {
        if self.timing.is_due(tick) {
            self.model.update(tick, inputs)?;
        }
        Ok(())
    }

    fn output(&mut self, tick: Tick) -> DriverResult<PortValues> {
        let due = self.ports.due_outputs(&self.timing, tick);
        if due.is_empty() {
            return Ok(PortValues::new());
        }
        let mut values = self.model.output(tick)?;
        if let Some(extra) = values
            .keys()
            .find(|k| self.ports.outputs.iter().all(|p| p.name() != k.as_str()))
        {
            return Err(DriverError::UnknownOutput(extra.clone()));
        }
        values.retain(|k, _| due.contains(k));
        Ok(values)
    }

    fn terminate(&mut self) -> DriverResult<()> {
        self.span.in_scope(|| tracing::info!("Terminating"));
        self.model.terminate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PortSpec;
    use crate::signal::Signal;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Default)]
    struct Ramp;

    impl ClientModel for Ramp {
        fn update(&mut self, _tick: Tick, _inputs: &PortValues) -> DriverResult<()> {
            Ok(())
        }

        fn output(&mut self, tick: Tick) -> DriverResult<PortValues> {
            let mut values = PortValues::new();
            values.insert("fast".into(), Signal::scalar(tick as f64));
            values.insert("slow".into(), Signal::scalar(-(tick as f64)));
            Ok(values)
        }
    }

    fn ramp_driver() -> ClientDriver {
        let spec = DriverSpec::client("ramp")
            .with_sampling_rate(1)
            .with_delay(2)
            .with_output("fast", PortSpec::new(1))
            .with_output("slow", PortSpec::new(1).every(3));
        ClientDriver::new("ramp", &spec, Box::new(Ramp::default()), &SimContext::default())
    }

    #[test]
    fn test_delay_and_rates() {
        let mut driver = ramp_driver();
        assert_eq!(driver.kind(), DriverKind::RemoteClient);

        assert!(driver.output(1).unwrap().is_empty());

        let at3 = driver.output(3).unwrap();
        assert_eq!(at3.len(), 2);

        let at4 = driver.output(4).unwrap();
        assert_eq!(at4.keys().collect::<Vec<_>>(), vec!["fast"]);
        assert_eq!(at4["fast"], Signal::scalar(4.0));
    }

    #[test]
    fn test_update_only_when_due() {
        struct Probe(Arc<Mutex<Vec<Tick>>>);
        impl ClientModel for Probe {
            fn update(&mut self, tick: Tick, _: &PortValues) -> DriverResult<()> {
                self.0.lock().push(tick);
                Ok(())
            }
            fn output(&mut self, _: Tick) -> DriverResult<PortValues> {
                Ok(PortValues::new())
            }
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let spec = DriverSpec::client("probe").with_sampling_rate(2).with_delay(1);
        let mut driver = ClientDriver::new(
            "probe",
            &spec,
            Box::new(Probe(seen.clone())),
            &SimContext::default(),
        );
        for k in 0..7 {
            driver.update(k, &PortValues::new()).unwrap();
        }
        assert_eq!(*seen.lock(), vec![2, 4, 6]);
    }

    #[test]
    fn test_associate_hands_params_to_model() {
        struct Check(Option<f64>);
        impl ClientModel for Check {
            fn associate(&mut self, params: &serde_json::Value) -> DriverResult<()> {
                self.0 = params["gain"].as_f64();
                match self.0 {
                    Some(_) => Ok(()),
                    None => Err(DriverError::model("gain is required")),
                }
            }
            fn update(&mut self, _: Tick, _: &PortValues) -> DriverResult<()> {
                Ok(())
            }
            fn output(&mut self, _: Tick) -> DriverResult<PortValues> {
                Ok(PortValues::new())
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.yaml");
        std::fs::write(&path, "offset: 1\n").unwrap();

        let mut driver = ClientDriver::new(
            "c",
            &DriverSpec::client("check"),
            Box::new(Check(None)),
            &SimContext::default(),
        );
        let err = driver.associate(&path).unwrap_err();
        assert_eq!(err.to_string(), "gain is required");

        std::fs::write(&path, "gain: 2\n").unwrap();
        driver.associate(&path).unwrap();
    }
}

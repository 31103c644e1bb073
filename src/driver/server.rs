//! Driver whose behavior runs on the remote execution server.
//!
//! Every hook becomes one broker round trip. Updates and outputs are only
//! sent on the ticks where they are due, so a slow driver costs nothing on
//! the ticks it skips.

use std::path::Path;
use tracing::Span;

use crate::broker::{Request, SharedBroker};
use crate::config::{load_parameters, DriverSpec};
use crate::context::SimContext;
use crate::driver::{Driver, DriverError, DriverKind, DriverResult, PortValues, Ports, Timing};
use crate::types::Tick;

/// Server-backed driver.
pub struct ServerDriver {
    name: String,
    timing: Timing,
    ports: Ports,
    broker: SharedBroker,
    class_id: String,
    params: serde_json::Value,
    span: Span,
    debug: bool,
}

impl ServerDriver {
    /// Creates a driver from its declaration.
    pub fn new(name: &str, spec: &DriverSpec, broker: SharedBroker, ctx: &SimContext) -> Self {
        Self {
            name: name.to_string(),
            timing: Timing::new(spec.sampling_rate, spec.delay),
            ports: Ports::from_spec(spec),
            broker,
            class_id: name.to_uppercase(),
            params: serde_json::Value::Null,
            span: ctx.span(name),
            debug: ctx.enabled(tracing::Level::DEBUG),
        }
    }

    /// Server-side class; `class_id` in the parameter document, else the
    /// upper-cased driver name.
    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    /// Parameter document loaded by `associate`.
    pub fn params(&self) -> &serde_json::Value {
        &self.params
    }

    /// Invokes an arbitrary server-side method and returns its result.
    pub fn command(&mut self, method: &str, args: serde_json::Value) -> DriverResult<serde_json::Value> {
        let reply = self.broker.lock().request(&Request::Command {
            driver: self.name.clone(),
            method: method.to_string(),
            args,
        })?;
        Ok(reply.into_value()?)
    }
}

impl Driver for ServerDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DriverKind {
        DriverKind::LocalServer
    }

    fn timing(&self) -> Timing {
        self.timing
    }

    fn ports(&self) -> &Ports {
        &self.ports
    }

    fn associate(&mut self, device: &Path) -> DriverResult<()> {
        self.params = load_parameters(device)?;
        if let Some(class_id) = self.params.get("class_id").and_then(|v| v.as_str()) {
            self.class_id = class_id.to_string();
        }
        self.span
            .in_scope(|| tracing::debug!("Associated with {} ({})", device.display(), self.class_id));
        Ok(())
    }

    fn start(&mut self) -> DriverResult<()> {
        self.span.in_scope(|| tracing::info!("Pushing {} configuration", self.class_id));
        self.broker
            .lock()
            .request(&Request::PushConfig {
                driver: self.name.clone(),
                class_id: self.class_id.clone(),
                params: self.params.clone(),
            })?
            .into_ack()?;
        Ok(())
    }

    fn init(&mut self) -> DriverResult<()> {
        self.broker
            .lock()
            .request(&Request::Init {
                driver: self.name.clone(),
                args: serde_json::Value::Null,
            })?
            .into_ack()?;
        Ok(())
    }

    fn update(&mut self, tick: Tick, inputs: &PortValues) -> DriverResult<()> {
        if !self.timing.is_due(tick) {
            return Ok(());
        }
        self.broker
            .lock()
            .request(&Request::Update {
                driver: self.name.clone(),
                tick,
                inputs: inputs.clone(),
            })?
            .into_ack()?;
        Ok(())
    }

    fn output(&mut self, tick: Tick) -> DriverResult<PortValues> {
        let ports = self.ports.due_outputs(&self.timing, tick);
        if ports.is_empty() {
            return Ok(PortValues::new());
        }
        let values = self
            .broker
            .lock()
            .request(&Request::Output {
                driver: self.name.clone(),
                tick,
                ports: ports.clone(),
            })?
            .into_outputs()?;

        if let Some(extra) = values.keys().find(|k| !ports.contains(k)) {
            return Err(DriverError::UnknownOutput(extra.clone()));
        }
        if self.debug {
            self.span
                .in_scope(|| tracing::debug!("Tick {}: {} outputs", tick, values.len()));
        }
        Ok(values)
    }

    fn terminate(&mut self) -> DriverResult<()> {
        self.span.in_scope(|| tracing::info!("Terminating"));
        self.broker
            .lock()
            .request(&Request::Terminate {
                driver: self.name.clone(),
            })?
            .into_ack()?;
        Ok(())
    }
}

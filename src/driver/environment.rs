//! Environment driver: pushes the shared environment model to the server.
//!
//! It has no port and takes no part in the tick passes; only `start` and
//! `terminate` reach the broker.

use std::path::Path;
use tracing::Span;

use crate::broker::{Request, SharedBroker};
use crate::config::{load_parameters, DriverSpec};
use crate::context::SimContext;
use crate::driver::{Driver, DriverKind, DriverResult, Ports, Timing};

/// Server-side class of the environment model.
pub const ENVIRONMENT_CLASS: &str = "ATMOSPHERE";

pub struct EnvironmentDriver {
    name: String,
    ports: Ports,
    broker: SharedBroker,
    class_id: String,
    params: serde_json::Value,
    span: Span,
}

impl EnvironmentDriver {
    /// Creates the driver; declared ports are ignored.
    pub fn new(name: &str, spec: &DriverSpec, broker: SharedBroker, ctx: &SimContext) -> Self {
        let span = ctx.span(name);
        if !spec.inputs.is_empty() || !spec.outputs.is_empty() {
            span.in_scope(|| tracing::warn!("Ports declared on the environment driver are ignored"));
        }
        Self {
            name: name.to_string(),
            ports: Ports::default(),
            broker,
            class_id: ENVIRONMENT_CLASS.to_string(),
            params: serde_json::Value::Null,
            span,
        }
    }

    pub fn class_id(&self) -> &str {
        &self.class_id
    }
}

impl Driver for EnvironmentDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DriverKind {
        DriverKind::Environment
    }

    fn timing(&self) -> Timing {
        Timing::default()
    }

    fn ports(&self) -> &Ports {
        &self.ports
    }

    fn associate(&mut self, device: &Path) -> DriverResult<()> {
        self.params = load_parameters(device)?;
        if let Some(class_id) = self.params.get("class_id").and_then(|v| v.as_str()) {
            self.class_id = class_id.to_string();
        }
        Ok(())
    }

    fn start(&mut self) -> DriverResult<()> {
        self.span.in_scope(|| tracing::info!("Pushing environment"));
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

    fn terminate(&mut self) -> DriverResult<()> {
        self.broker
            .lock()
            .request(&Request::Terminate {
                driver: self.name.clone(),
            })?
            .into_ack()?;
        Ok(())
    }
}

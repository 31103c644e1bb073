//! Client model registry and driver construction.
//!
//! Client models are registered by name, so a configuration can select the
//! in-process behavior of a `server: false` driver with its `client` field.
//!
//! # Example
//!
//! ```
//! use dos::registry::ClientRegistry;
//! use dos::driver::models::GainModel;
//!
//! let mut registry = ClientRegistry::new();
//! registry.register("half", |_driver| Box::new(GainModel::new(0.5)));
//!
//! let model = registry.create("half", "controller");
//! assert!(model.is_some());
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::broker::SharedBroker;
use crate::config::{resource_path, ConfigError, SimConfig};
use crate::context::SimContext;
use crate::driver::{
    AnyDriver, ClientDriver, ClientModel, DriverKind, EnvironmentDriver, ServerDriver,
};
use crate::error::{SetupWarning, SimResult};

/// Type alias for client model factories; the argument is the driver name.
pub type ClientFactory = Arc<dyn Fn(&str) -> Box<dyn ClientModel> + Send + Sync>;

/// A registry for client model factories.
#[derive(Default, Clone)]
pub struct ClientRegistry {
    factories: HashMap<String, ClientFactory>,
}

impl ClientRegistry {
    /// Creates a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a model factory under a type name.
    ///
    /// Registering an existing name replaces its factory.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&str) -> Box<dyn ClientModel> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
    }

    /// Creates a model for `driver`, if `type_name` is registered.
    pub fn create(&self, type_name: &str, driver: &str) -> Option<Box<dyn ClientModel>> {
        self.factories.get(type_name).map(|f| f(driver))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.factories.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Returns the registered type names.
    pub fn type_names(&self) -> impl Iterator<Item = &String> {
        self.factories.keys()
    }

    /// Unregisters a model type.
    pub fn unregister(&mut self, type_name: &str) -> bool {
        self.factories.remove(type_name).is_some()
    }
}

impl std::fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ClientRegistry")
            .field("registered_types", &names)
            .finish()
    }
}

/// Creates a registry with the built-in models.
///
/// Includes:
/// - `constant` - ConstantModel
/// - `gain` - GainModel
/// - `integrator` - IntegratorModel
pub fn create_default_registry() -> ClientRegistry {
    use crate::driver::models::{ConstantModel, GainModel, IntegratorModel};

    let mut registry = ClientRegistry::new();
    registry.register("constant", |_| Box::new(ConstantModel::new()));
    registry.register("gain", |_| Box::new(GainModel::default()));
    registry.register("integrator", |_| Box::new(IntegratorModel::default()));
    registry
}

/// Builds one driver per declared name that has a parameter document in `dir`.
///
/// Drivers come back in declaration order. Names without a `<name>.yaml` are
/// skipped and reported as warnings.
pub fn build_drivers(
    config: &SimConfig,
    dir: &Path,
    clients: &ClientRegistry,
    broker: &SharedBroker,
    ctx: &SimContext,
) -> SimResult<(Vec<AnyDriver>, Vec<SetupWarning>)> {
    let mut drivers = Vec::with_capacity(config.drivers.len());
    let mut warnings = Vec::new();

    for (name, spec) in config.drivers.iter() {
        let path = resource_path(dir, name);
        if !path.is_file() {
            tracing::warn!("{} is missing!", path.display());
            warnings.push(SetupWarning::MissingDriverResource {
                driver: name.to_string(),
                path,
            });
            continue;
        }

        tracing::info!("New driver: {}", name);
        let driver = match DriverKind::select(name, spec) {
            DriverKind::RemoteClient => {
                let model_name = spec.client.as_deref().unwrap_or(name);
                let model = clients.create(model_name, name).ok_or_else(|| {
                    ConfigError::UnknownClientModel {
                        driver: name.to_string(),
                        model: model_name.to_string(),
                    }
                })?;
                AnyDriver::RemoteClient(ClientDriver::new(name, spec, model, ctx))
            }
            DriverKind::Environment => {
                AnyDriver::Environment(EnvironmentDriver::new(name, spec, broker.clone(), ctx))
            }
            DriverKind::LocalServer => {
                AnyDriver::LocalServer(ServerDriver::new(name, spec, broker.clone(), ctx))
            }
        };
        drivers.push(driver);
    }

    Ok((drivers, warnings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::loopback::{LoopbackTransport, RecordingServer};
    use crate::broker::Broker;
    use crate::config::{DriverSpec, SimConfigBuilder};
    use crate::driver::Driver;
    use crate::error::SimError;

    fn broker() -> SharedBroker {
        Broker::with_transport(
            Box::new(LoopbackTransport::new(RecordingServer::new())),
            &SimContext::default(),
        )
        .unwrap()
        .shared()
    }

    #[test]
    fn test_registry_basics() {
        let mut registry = create_default_registry();
        assert_eq!(registry.len(), 3);
        assert!(registry.contains("gain"));
        assert!(registry.create("nope", "d").is_none());
        assert!(registry.unregister("gain"));
        assert!(!registry.contains("gain"));
        assert!(format!("{:?}", registry).contains("constant"));
    }

    #[test]
    fn test_build_in_declaration_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["mount", "atmosphere", "ctrl"] {
            std::fs::write(dir.path().join(format!("{}.yaml", name)), "").unwrap();
        }
        let config = SimConfigBuilder::new()
            .driver("mount", DriverSpec::server())
            .driver("missing", DriverSpec::server())
            .driver("atmosphere", DriverSpec::server())
            .driver("ctrl", DriverSpec::client("gain"))
            .build()
            .unwrap();

        let (drivers, warnings) = build_drivers(
            &config,
            dir.path(),
            &create_default_registry(),
            &broker(),
            &SimContext::default(),
        )
        .unwrap();

        let kinds: Vec<_> = drivers.iter().map(|d| (d.name(), d.kind())).collect();
        assert_eq!(
            kinds,
            vec![
                ("mount", DriverKind::LocalServer),
                ("atmosphere", DriverKind::Environment),
                ("ctrl", DriverKind::RemoteClient),
            ]
        );
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            &warnings[0],
            SetupWarning::MissingDriverResource { driver, .. } if driver == "missing"
        ));
    }

    #[test]
    fn test_client_model_defaults_to_driver_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("integrator.yaml"), "gain: 2\n").unwrap();
        let spec = DriverSpec {
            server: Some(false),
            ..DriverSpec::default()
        };
        let config = SimConfigBuilder::new()
            .driver("integrator", spec)
            .build()
            .unwrap();
        let (drivers, _) = build_drivers(
            &config,
            dir.path(),
            &create_default_registry(),
            &broker(),
            &SimContext::default(),
        )
        .unwrap();
        assert_eq!(drivers[0].kind(), DriverKind::RemoteClient);
    }

    #[test]
    fn test_unknown_client_model() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ctrl.yaml"), "").unwrap();
        let config = SimConfigBuilder::new()
            .driver("ctrl", DriverSpec::client("pid"))
            .build()
            .unwrap();
        let err = build_drivers(
            &config,
            dir.path(),
            &create_default_registry(),
            &broker(),
            &SimContext::default(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            SimError::Config(ConfigError::UnknownClientModel { ref driver, ref model })
                if driver == "ctrl" && model == "pid"
        ));
    }
}

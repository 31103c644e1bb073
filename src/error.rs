//! Top-level error and warning types.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::broker::BrokerError;
use crate::config::ConfigError;
use crate::driver::DriverError;
use crate::logs::LogError;
use crate::wiring::{UnresolvedTie, WiringError};

/// Driver hook a failure happened in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Start,
    Init,
    Update,
    Output,
    Terminate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Start => "start",
            Phase::Init => "init",
            Phase::Update => "update",
            Phase::Output => "output",
            Phase::Terminate => "terminate",
        };
        f.write_str(name)
    }
}

/// Errors raised while building or running a simulation.
#[derive(Error, Debug)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Wiring(#[from] WiringError),

    #[error("broker: {0}")]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("driver {driver}: association failed: {source}")]
    Association {
        driver: String,
        #[source]
        source: DriverError,
    },

    #[error("driver {driver}: {phase} failed: {source}")]
    Driver {
        driver: String,
        phase: Phase,
        #[source]
        source: DriverError,
    },
}

impl SimError {
    /// Name of the driver the error is attributed to, if any.
    pub fn driver(&self) -> Option<&str> {
        match self {
            SimError::Association { driver, .. } | SimError::Driver { driver, .. } => Some(driver.as_str()),
            SimError::Wiring(WiringError::UnresolvedTie(tie)) => Some(tie.driver.as_str()),
            SimError::Wiring(WiringError::SameTickCycle { driver, .. })
            | SimError::Wiring(WiringError::ConflictingSources { driver, .. }) => {
                Some(driver.as_str())
            }
            SimError::Config(ConfigError::UnknownClientModel { driver, .. }) => {
                Some(driver.as_str())
            }
            _ => None,
        }
    }
}

/// Result type for orchestrator operations.
pub type SimResult<T> = Result<T, SimError>;

/// Non-fatal problems found during setup.
#[derive(Clone, Debug, PartialEq)]
pub enum SetupWarning {
    /// The driver was declared but has no parameter document; it was skipped.
    MissingDriverResource { driver: String, path: PathBuf },
    /// A tie could not be resolved and the port was left unwired.
    UnresolvedTie(UnresolvedTie),
}

impl fmt::Display for SetupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupWarning::MissingDriverResource { driver, path } => {
                write!(f, "{} is missing, driver {} skipped", path.display(), driver)
            }
            SetupWarning::UnresolvedTie(tie) => write!(f, "{}", tie),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TieTarget;
    use crate::types::Direction;

    #[test]
    fn test_messages_name_the_driver() {
        let err = SimError::Driver {
            driver: "mount".into(),
            phase: Phase::Update,
            source: DriverError::model("diverged"),
        };
        assert_eq!(err.to_string(), "driver mount: update failed: diverged");
        assert_eq!(err.driver(), Some("mount"));

        let err: SimError = WiringError::UnresolvedTie(UnresolvedTie {
            driver: "plant".into(),
            port: "u".into(),
            direction: Direction::Input,
            target: TieTarget::new("ghost", "y"),
        })
        .into();
        assert_eq!(err.driver(), Some("plant"));
        assert!(err.to_string().contains("ghost.y"));
    }

    #[test]
    fn test_warning_display() {
        let w = SetupWarning::MissingDriverResource {
            driver: "m2".into(),
            path: PathBuf::from("/cfg/m2.yaml"),
        };
        assert_eq!(w.to_string(), "/cfg/m2.yaml is missing, driver m2 skipped");
    }
}

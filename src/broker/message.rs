//! Tagged message schema exchanged with the remote execution server.

use serde::{Deserialize, Serialize};

use crate::broker::{BrokerError, BrokerResult};
use crate::driver::PortValues;
use crate::types::Tick;

/// Greeting sent on connection.
pub const HANDSHAKE: &str = "Acknowledging connection from SIMCEO client!";

/// A request sent to the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// First exchange after connecting
    Handshake { greeting: String },

    /// Pushes a driver's parameter document and instantiates it server-side
    PushConfig {
        driver: String,
        class_id: String,
        params: serde_json::Value,
    },

    /// Initializes a pushed driver
    Init {
        driver: String,
        args: serde_json::Value,
    },

    /// Feeds the inputs of one tick
    Update {
        driver: String,
        tick: Tick,
        inputs: PortValues,
    },

    /// Asks for the outputs of one tick
    Output {
        driver: String,
        tick: Tick,
        ports: Vec<String>,
    },

    /// Releases a driver server-side
    Terminate { driver: String },

    /// Invokes an arbitrary method on a driver
    Command {
        driver: String,
        method: String,
        args: serde_json::Value,
    },
}

impl Request {
    /// Returns the driver this request addresses, if any.
    pub fn driver(&self) -> Option<&str> {
        match self {
            Request::Handshake { .. } => None,
            Request::PushConfig { driver, .. }
            | Request::Init { driver, .. }
            | Request::Update { driver, .. }
            | Request::Output { driver, .. }
            | Request::Terminate { driver }
            | Request::Command { driver, .. } => Some(driver),
        }
    }

    /// Returns the variant name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Handshake { .. } => "Handshake",
            Request::PushConfig { .. } => "PushConfig",
            Request::Init { .. } => "Init",
            Request::Update { .. } => "Update",
            Request::Output { .. } => "Output",
            Request::Terminate { .. } => "Terminate",
            Request::Command { .. } => "Command",
        }
    }
}

/// A reply from the server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    /// Plain acknowledgement
    Ack { message: String },

    /// Output values of one tick
    Outputs { values: PortValues },

    /// Free-form result of a command
    Value { value: serde_json::Value },

    /// Server-side failure
    Error { message: String },
}

impl Reply {
    /// Creates an acknowledgement.
    pub fn ack(message: impl Into<String>) -> Self {
        Reply::Ack {
            message: message.into(),
        }
    }

    /// Expects an acknowledgement.
    pub fn into_ack(self) -> BrokerResult<String> {
        match self {
            Reply::Ack { message } => Ok(message),
            other => Err(BrokerError::unexpected("Ack", &other)),
        }
    }

    /// Expects output values.
    pub fn into_outputs(self) -> BrokerResult<PortValues> {
        match self {
            Reply::Outputs { values } => Ok(values),
            other => Err(BrokerError::unexpected("Outputs", &other)),
        }
    }

    /// Expects a free-form value.
    pub fn into_value(self) -> BrokerResult<serde_json::Value> {
        match self {
            Reply::Value { value } => Ok(value),
            other => Err(BrokerError::unexpected("Value", &other)),
        }
    }

    /// Returns the variant name, for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Ack { .. } => "Ack",
            Reply::Outputs { .. } => "Outputs",
            Reply::Value { .. } => "Value",
            Reply::Error { .. } => "Error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_driver() {
        let req = Request::Terminate {
            driver: "mount".into(),
        };
        assert_eq!(req.driver(), Some("mount"));
        assert_eq!(req.kind(), "Terminate");

        let hs = Request::Handshake {
            greeting: HANDSHAKE.into(),
        };
        assert_eq!(hs.driver(), None);
    }

    #[test]
    fn test_reply_expectations() {
        assert_eq!(Reply::ack("ok").into_ack().unwrap(), "ok");

        let err = Reply::ack("ok").into_outputs().unwrap_err();
        assert!(matches!(err, BrokerError::UnexpectedReply { .. }));
        assert!(err.to_string().contains("Outputs"));
    }
}

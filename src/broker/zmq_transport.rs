//! ZeroMQ REQ transport.
//!
//! Built only with the `zmq` feature; without it, [`ZmqTransport::connect`]
//! reports [`BrokerError::Unavailable`] so the rest of the crate, and every
//! test running over the loopback transport, builds without libzmq.

use crate::broker::{BrokerError, BrokerResult, Transport};

/// REQ socket connected to the remote execution server.
#[cfg(feature = "zmq")]
pub struct ZmqTransport {
    socket: Option<zmq::Socket>,
    context: Option<zmq::Context>,
    endpoint: String,
    timeout_ms: Option<u64>,
}

#[cfg(feature = "zmq")]
impl ZmqTransport {
    /// Opens a context and a REQ socket, then connects it to `endpoint`.
    ///
    /// ZeroMQ connects lazily: an unreachable server only shows up on the
    /// first receive, which blocks unless `timeout_ms` is set.
    pub fn connect(endpoint: &str, timeout_ms: Option<u64>) -> BrokerResult<Self> {
        let context = zmq::Context::new();
        let socket = context.socket(zmq::REQ).map_err(BrokerError::transport)?;
        socket.set_linger(0).map_err(BrokerError::transport)?;
        if let Some(ms) = timeout_ms {
            let ms = i32::try_from(ms).unwrap_or(i32::MAX);
            socket.set_rcvtimeo(ms).map_err(BrokerError::transport)?;
        }
        socket.connect(endpoint).map_err(BrokerError::transport)?;

        Ok(Self {
            socket: Some(socket),
            context: Some(context),
            endpoint: endpoint.to_string(),
            timeout_ms,
        })
    }

    fn socket(&self) -> BrokerResult<&zmq::Socket> {
        self.socket.as_ref().ok_or(BrokerError::Closed)
    }
}

#[cfg(feature = "zmq")]
impl Transport for ZmqTransport {
    fn send(&mut self, frame: &[u8]) -> BrokerResult<()> {
        self.socket()?.send(frame, 0).map_err(BrokerError::transport)
    }

    fn recv(&mut self) -> BrokerResult<Vec<u8>> {
        match self.socket()?.recv_bytes(0) {
            Ok(frame) => Ok(frame),
            Err(zmq::Error::EAGAIN) => Err(BrokerError::Timeout(self.timeout_ms.unwrap_or(0))),
            Err(e) => Err(BrokerError::transport(e)),
        }
    }

    fn close(&mut self) {
        // socket first: terminating the context waits for its sockets
        drop(self.socket.take());
        drop(self.context.take());
    }

    fn peer(&self) -> String {
        self.endpoint.clone()
    }
}

// ============================================================================
// Fallback when the zmq feature is disabled
// ============================================================================

/// Placeholder that cannot connect without the `zmq` feature.
#[cfg(not(feature = "zmq"))]
pub struct ZmqTransport {
    endpoint: String,
}

#[cfg(not(feature = "zmq"))]
impl ZmqTransport {
    /// Always fails: the crate was built without ZeroMQ.
    pub fn connect(endpoint: &str, _timeout_ms: Option<u64>) -> BrokerResult<Self> {
        Err(BrokerError::Unavailable(format!(
            "cannot reach {}: built without the `zmq` feature",
            endpoint
        )))
    }
}

#[cfg(not(feature = "zmq"))]
impl Transport for ZmqTransport {
    fn send(&mut self, _frame: &[u8]) -> BrokerResult<()> {
        Err(BrokerError::Closed)
    }

    fn recv(&mut self) -> BrokerResult<Vec<u8>> {
        Err(BrokerError::Closed)
    }

    fn peer(&self) -> String {
        self.endpoint.clone()
    }
}

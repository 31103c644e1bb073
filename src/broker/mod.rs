//! Request-reply channel to the remote execution server.
//!
//! The [`Broker`] owns one [`Transport`] and runs strict request/reply
//! exchanges over it: every [`Broker::request`] blocks until its single reply
//! arrives, so at most one request is ever in flight. Frames are produced by
//! the [`codec::Codec`] from the tagged [`message`] schema.
//!
//! Server-backed drivers share the broker through a [`SharedBroker`].
//!
//! # Example
//!
//! ```
//! use dos::broker::loopback::{LoopbackTransport, RecordingServer};
//! use dos::broker::message::Request;
//! use dos::broker::Broker;
//! use dos::SimContext;
//!
//! let server = RecordingServer::new();
//! let transport = LoopbackTransport::new(server.clone());
//! let mut broker = Broker::with_transport(Box::new(transport), &SimContext::default()).unwrap();
//!
//! broker.request(&Request::Terminate { driver: "mount".into() }).unwrap();
//! assert_eq!(server.requests().len(), 2); // handshake + terminate
//! ```

pub mod codec;
pub mod loopback;
pub mod message;
pub mod zmq_transport;

use parking_lot::Mutex;
use std::sync::Arc;
use thiserror::Error;
use tracing::Span;

use crate::config::ServerParams;
use crate::context::SimContext;

pub use codec::Codec;
pub use message::{Reply, Request, HANDSHAKE};
pub use zmq_transport::ZmqTransport;

/// Errors raised by the broker and its transports.
#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("No reply after {0}ms")]
    Timeout(u64),

    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error("Server error: {0}")]
    Remote(String),

    #[error("Expected {expected} reply, got {found}")]
    UnexpectedReply {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Broker is closed")]
    Closed,
}

impl BrokerError {
    /// Creates a transport error.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Creates an unexpected-reply error.
    pub fn unexpected(expected: &'static str, found: &Reply) -> Self {
        Self::UnexpectedReply {
            expected,
            found: found.kind(),
        }
    }
}

/// Result type for broker operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// A blocking, ordered, frame-oriented request-reply link.
pub trait Transport: Send {
    /// Sends one request frame.
    fn send(&mut self, frame: &[u8]) -> BrokerResult<()>;

    /// Blocks until the reply frame of the last request arrives.
    fn recv(&mut self) -> BrokerResult<Vec<u8>>;

    /// Releases the underlying resources. Called at most once.
    fn close(&mut self) {}

    /// Describes the remote end, for logs.
    fn peer(&self) -> String;
}

/// The broker shared by every server-backed driver.
pub type SharedBroker = Arc<Mutex<Broker>>;

/// Single request-reply channel to one fixed endpoint.
pub struct Broker {
    transport: Option<Box<dyn Transport>>,
    codec: Codec,
    peer: String,
    requests: u64,
    span: Span,
    trace_frames: bool,
}

impl Broker {
    /// Connects to the configured server over ZeroMQ and performs the handshake.
    ///
    /// Returns [`BrokerError::Unavailable`] when built without the `zmq` feature.
    pub fn connect(server: &ServerParams, ctx: &SimContext) -> BrokerResult<Self> {
        let span = ctx.span("broker");
        span.in_scope(|| tracing::info!("Connecting to server {}...", server.endpoint()));
        let transport = ZmqTransport::connect(&server.endpoint(), server.timeout_ms)?;
        Self::with_transport(Box::new(transport), ctx)
    }

    /// Wraps a transport and performs the handshake.
    ///
    /// Fails if the acknowledgement is a server error.
    pub fn with_transport(transport: Box<dyn Transport>, ctx: &SimContext) -> BrokerResult<Self> {
        let mut broker = Self {
            peer: transport.peer(),
            transport: Some(transport),
            codec: Codec::default(),
            requests: 0,
            span: ctx.span("broker"),
            trace_frames: ctx.enabled(tracing::Level::TRACE),
        };
        let ack = broker.request(&Request::Handshake {
            greeting: HANDSHAKE.to_string(),
        })?;
        broker
            .span
            .in_scope(|| tracing::info!("Connected to {}: {:?}", broker.peer, ack));
        Ok(broker)
    }

    /// Wraps an existing broker for sharing among drivers.
    pub fn shared(self) -> SharedBroker {
        Arc::new(Mutex::new(self))
    }

    /// Sends one request and blocks for its reply.
    ///
    /// A [`Reply::Error`] is turned into [`BrokerError::Remote`].
    pub fn request(&mut self, request: &Request) -> BrokerResult<Reply> {
        let transport = self.transport.as_mut().ok_or(BrokerError::Closed)?;
        let frame = self.codec.encode(request)?;
        if self.trace_frames {
            self.span.in_scope(|| {
                tracing::trace!(
                    "-> {} {:?} ({} bytes)",
                    request.kind(),
                    request.driver(),
                    frame.len()
                )
            });
        }
        transport.send(&frame)?;
        let frame = transport.recv()?;
        self.requests += 1;

        let reply: Reply = self.codec.decode(&frame)?;
        if self.trace_frames {
            self.span
                .in_scope(|| tracing::trace!("<- {} ({} bytes)", reply.kind(), frame.len()));
        }
        match reply {
            Reply::Error { message } => Err(BrokerError::Remote(message)),
            reply => Ok(reply),
        }
    }

    /// Returns the number of completed round trips, handshake included.
    pub fn requests_sent(&self) -> u64 {
        self.requests
    }

    /// Returns the remote end description.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Returns true once the channel has been closed.
    pub fn is_closed(&self) -> bool {
        self.transport.is_none()
    }

    /// Closes the channel; later calls do nothing.
    pub fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            self.span
                .in_scope(|| tracing::info!("Disconnecting from server {}", self.peer));
            transport.close();
        }
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("peer", &self.peer)
            .field("requests", &self.requests)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::loopback::{LoopbackTransport, RecordingServer};
    use super::*;

    #[test]
    fn test_handshake_on_construction() {
        let server = RecordingServer::new();
        let broker =
            Broker::with_transport(Box::new(LoopbackTransport::new(server.clone())), &SimContext::default())
                .unwrap();

        assert_eq!(broker.requests_sent(), 1);
        assert_eq!(
            server.requests(),
            vec![Request::Handshake {
                greeting: HANDSHAKE.to_string()
            }]
        );
    }

    #[test]
    fn test_rejected_handshake() {
        let transport = LoopbackTransport::new(|_req: Request| Reply::Error {
            message: "busy".into(),
        });
        let err = Broker::with_transport(Box::new(transport), &SimContext::default()).unwrap_err();
        assert!(matches!(err, BrokerError::Remote(ref m) if m == "busy"));
    }

    #[test]
    fn test_close_is_idempotent() {
        let server = RecordingServer::new();
        let mut broker =
            Broker::with_transport(Box::new(LoopbackTransport::new(server.clone())), &SimContext::default())
                .unwrap();
        broker.close();
        broker.close();
        assert!(broker.is_closed());
        assert_eq!(server.closed_count(), 1);

        let err = broker
            .request(&Request::Terminate { driver: "x".into() })
            .unwrap_err();
        assert!(matches!(err, BrokerError::Closed));
        drop(broker);
        assert_eq!(server.closed_count(), 1);
    }

    #[test]
    fn test_drop_closes() {
        let server = RecordingServer::new();
        let broker =
            Broker::with_transport(Box::new(LoopbackTransport::new(server.clone())), &SimContext::default())
                .unwrap();
        drop(broker);
        assert_eq!(server.closed_count(), 1);
    }
}

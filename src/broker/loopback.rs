//! In-process transport that answers requests with a local handler.
//!
//! Frames still go through the [`Codec`], so a broker running over a
//! [`LoopbackTransport`] exercises exactly the same envelope as one talking to
//! a real server.

use parking_lot::Mutex;
use std::sync::Arc;

use crate::broker::message::{Reply, Request};
use crate::broker::{BrokerError, BrokerResult, Codec, Transport};

/// Server-side logic answering one request at a time.
pub trait RequestHandler: Send {
    /// Produces the reply to one request.
    fn handle(&mut self, request: Request) -> Reply;

    /// Called when the client closes the channel.
    fn on_close(&mut self) {}
}

impl<F> RequestHandler for F
where
    F: FnMut(Request) -> Reply + Send,
{
    fn handle(&mut self, request: Request) -> Reply {
        self(request)
    }
}

/// Transport whose peer is a [`RequestHandler`] in the same process.
pub struct LoopbackTransport<H> {
    handler: H,
    codec: Codec,
    pending: Option<Vec<u8>>,
}

impl<H: RequestHandler> LoopbackTransport<H> {
    /// Creates a transport answered by `handler`.
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            codec: Codec::default(),
            pending: None,
        }
    }
}

impl<H: RequestHandler> Transport for LoopbackTransport<H> {
    fn send(&mut self, frame: &[u8]) -> BrokerResult<()> {
        if self.pending.is_some() {
            return Err(BrokerError::transport(
                "request sent while the previous reply is pending",
            ));
        }
        let request: Request = self.codec.decode(frame)?;
        let reply = self.handler.handle(request);
        self.pending = Some(self.codec.encode(&reply)?);
        Ok(())
    }

    fn recv(&mut self) -> BrokerResult<Vec<u8>> {
        self.pending
            .take()
            .ok_or_else(|| BrokerError::transport("receive without a pending request"))
    }

    fn close(&mut self) {
        self.handler.on_close();
    }

    fn peer(&self) -> String {
        "loopback".to_string()
    }
}

#[derive(Debug, Default)]
struct Recording {
    requests: Vec<Request>,
    closed: usize,
}

/// Handler that acknowledges every request and records it.
///
/// `Output` requests are answered with an empty [`Reply::Outputs`]. Clones
/// share the same record, so a test can keep one clone and hand the other to
/// the transport.
#[derive(Clone, Debug, Default)]
pub struct RecordingServer {
    record: Arc<Mutex<Recording>>,
}

impl RecordingServer {
    /// Creates a server with an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<Request> {
        self.record.lock().requests.clone()
    }

    /// Returns the requests received for one driver.
    pub fn requests_for(&self, driver: &str) -> Vec<Request> {
        self.record
            .lock()
            .requests
            .iter()
            .filter(|r| r.driver() == Some(driver))
            .cloned()
            .collect()
    }

    /// Returns how many times the channel was closed.
    pub fn closed_count(&self) -> usize {
        self.record.lock().closed
    }
}

impl RequestHandler for RecordingServer {
    fn handle(&mut self, request: Request) -> Reply {
        let reply = match &request {
            Request::Output { .. } => Reply::Outputs {
                values: Default::default(),
            },
            other => Reply::ack(other.kind()),
        };
        self.record.lock().requests.push(request);
        reply
    }

    fn on_close(&mut self) {
        self.record.lock().closed += 1;
    }
}

//! Call-scoped send/receive primitives.
//!
//! A [`Call`] couples a shape and a deadline with one [`Inbound`] and one
//! [`Outbound`] channel. Handlers only ever see these two traits, so the same
//! state machine runs over a live `tonic::Streaming` body or over an in-memory
//! script in tests.

use scorer_core::{
    Error, Result,
    proto::{ScoreRequest, ScoreResponse},
    types::CallShape,
};
use tokio::{sync::mpsc, time::Instant};
use tonic::{Status, Streaming};

/// Inbound half of a call.
#[tonic::async_trait]
pub trait Inbound: Send {
    /// Waits for the next request.
    ///
    /// `Ok(None)` signals a clean end of input; `Err` is a transport failure.
    async fn recv(&mut self) -> Result<Option<ScoreRequest>>;
}

/// Outbound half of a call.
#[tonic::async_trait]
pub trait Outbound: Send {
    /// Sends one response, waiting for buffer space if necessary.
    async fn send(&mut self, response: ScoreResponse) -> Result<()>;
}

#[tonic::async_trait]
impl Inbound for Streaming<ScoreRequest> {
    async fn recv(&mut self) -> Result<Option<ScoreRequest>> {
        Ok(self.message().await?)
    }
}

/// Inbound side of the shapes that carry exactly one request.
#[derive(Debug)]
pub struct OnceInbound(Option<ScoreRequest>);

impl OnceInbound {
    pub const fn new(request: ScoreRequest) -> Self {
        Self(Some(request))
    }
}

#[tonic::async_trait]
impl Inbound for OnceInbound {
    async fn recv(&mut self) -> Result<Option<ScoreRequest>> {
        Ok(self.0.take())
    }
}

/// Outbound side backed by the bounded response channel of a call.
#[derive(Debug, Clone)]
pub struct ChannelOutbound {
    tx: mpsc::Sender<core::result::Result<ScoreResponse, Status>>,
}

impl ChannelOutbound {
    pub const fn new(tx: mpsc::Sender<core::result::Result<ScoreResponse, Status>>) -> Self {
        Self { tx }
    }
}

#[tonic::async_trait]
impl Outbound for ChannelOutbound {
    async fn send(&mut self, response: ScoreResponse) -> Result<()> {
        self.tx
            .send(Ok(response))
            .await
            .map_err(|e| Error::ChannelError {
                context: format!("Failed to forward response: {e}"),
            })
    }
}

/// One logical RPC invocation.
///
/// The call exclusively owns both of its channels; nothing in it is shared
/// with other calls.
pub struct Call {
    shape: CallShape,
    deadline: Option<Instant>,
    inbound: Box<dyn Inbound>,
    outbound: Box<dyn Outbound>,
}

impl Call {
    pub fn new(
        shape: CallShape,
        deadline: Option<Instant>,
        inbound: impl Inbound + 'static,
        outbound: impl Outbound + 'static,
    ) -> Self {
        Self {
            shape,
            deadline,
            inbound: Box::new(inbound),
            outbound: Box::new(outbound),
        }
    }

    pub const fn shape(&self) -> CallShape {
        self.shape
    }

    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub async fn recv(&mut self) -> Result<Option<ScoreRequest>> {
        self.inbound.recv().await
    }

    pub async fn send(&mut self, result: String) -> Result<()> {
        self.outbound.send(ScoreResponse { result }).await
    }
}

impl core::fmt::Debug for Call {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Call")
            .field("shape", &self.shape)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

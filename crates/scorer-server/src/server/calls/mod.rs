//! Call-shape state machines.
//!
//! Each gRPC call shape is one implementation of [`CallHandler`]:
//!
//! - [`unary::UnaryHandler`] - one request, one scored response.
//! - [`client_stream::ClientStreamAggregator`] - aggregates every request into
//!   one response once the client half-closes.
//! - [`server_stream::ServerStreamGenerator`] - a paced, fixed-length sequence
//!   of responses with best-effort sends.
//! - [`bidi::BidiBatcher`] - batches a fixed number of requests, flushing on
//!   even receive indexes and discarding the trailing partial batch.
//!
//! [`Handlers`] selects the implementation for a [`CallShape`], and
//! [`dispatch`] runs it under the call's deadline.

pub mod accumulator;
pub mod bidi;
pub mod channel;
pub mod client_stream;
pub mod server_stream;
pub mod unary;

#[cfg(test)]
pub(crate) mod testing;

use crate::server::config::ServerConfig;
use bidi::BidiBatcher;
use channel::Call;
use client_stream::ClientStreamAggregator;
use core::time::Duration;
use scorer_core::{Error, Result, types::CallShape, types::UNARY_SUFFIX};
use server_stream::ServerStreamGenerator;
use tokio::time;
use unary::UnaryHandler;

/// Placeholder scoring computation.
pub fn score(prompt: &str) -> String {
    format!("{prompt}{UNARY_SUFFIX}")
}

/// A state machine that drives one call of a single shape to completion.
///
/// `handle` returns once the call's protocol is complete. An `Err` becomes the
/// call's terminal status and never affects other calls.
#[tonic::async_trait]
pub trait CallHandler: Send + Sync {
    /// The shape this handler implements.
    fn shape(&self) -> CallShape;

    async fn handle(&self, call: &mut Call) -> Result<()>;
}

/// Fixed delays of the streaming shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Delay after each server-streaming response.
    pub stream_interval: Duration,
    /// Delay after each bidirectional receive.
    pub batch_interval: Duration,
}

impl Pacing {
    /// No delays; used by tests that only care about message contents.
    pub const IMMEDIATE: Self = Self {
        stream_interval: Duration::ZERO,
        batch_interval: Duration::ZERO,
    };
}

impl From<&ServerConfig> for Pacing {
    fn from(config: &ServerConfig) -> Self {
        Self {
            stream_interval: config.stream_interval,
            batch_interval: config.batch_interval,
        }
    }
}

/// One handler per call shape.
#[derive(Debug)]
pub struct Handlers {
    unary: UnaryHandler,
    client_stream: ClientStreamAggregator,
    server_stream: ServerStreamGenerator,
    bidi: BidiBatcher,
}

impl Handlers {
    pub const fn new(pacing: Pacing) -> Self {
        Self {
            unary: UnaryHandler,
            client_stream: ClientStreamAggregator,
            server_stream: ServerStreamGenerator::new(pacing.stream_interval),
            bidi: BidiBatcher::new(pacing.batch_interval),
        }
    }

    pub fn get(&self, shape: CallShape) -> &dyn CallHandler {
        match shape {
            CallShape::Unary => &self.unary,
            CallShape::ClientStream => &self.client_stream,
            CallShape::ServerStream => &self.server_stream,
            CallShape::BiDiStream => &self.bidi,
        }
    }
}

/// Runs `handler` over `call`, bounded by the call's deadline.
///
/// When the deadline elapses the handler future is dropped at its current
/// suspension point, so nothing is sent after expiry, and the call fails with
/// [`Error::DeadlineExceeded`].
pub async fn dispatch(handler: &dyn CallHandler, mut call: Call) -> Result<()> {
    debug_assert_eq!(handler.shape(), call.shape());

    match call.deadline() {
        Some(deadline) => time::timeout_at(deadline, handler.handle(&mut call))
            .await
            .map_err(|_| Error::DeadlineExceeded)?,
        None => handler.handle(&mut call).await,
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{RecordingOutbound, ScriptedInbound};
    use super::*;
    use tokio::time::Instant;

    #[test]
    fn score_appends_suffix() {
        assert_eq!(score("Today is"), "Today is sunny");
    }

    #[test]
    fn handlers_are_selected_by_shape() {
        let handlers = Handlers::new(Pacing::IMMEDIATE);
        for shape in CallShape::ALL {
            assert_eq!(handlers.get(shape).shape(), shape);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_without_deadline_runs_to_completion() {
        let handlers = Handlers::new(Pacing::IMMEDIATE);
        let outbound = RecordingOutbound::default();
        let call = Call::new(
            CallShape::Unary,
            None,
            ScriptedInbound::prompts(["Today is"]),
            outbound.clone(),
        );

        dispatch(handlers.get(CallShape::Unary), call).await.unwrap();
        assert_eq!(outbound.results(), vec!["Today is sunny"]);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_deadline_fails_a_blocked_receive() {
        let handlers = Handlers::new(Pacing::IMMEDIATE);
        let outbound = RecordingOutbound::default();
        let call = Call::new(
            CallShape::ClientStream,
            Some(Instant::now() + Duration::from_millis(100)),
            ScriptedInbound::prompts(["0", "1"]).then_hang(),
            outbound.clone(),
        );

        let err = dispatch(handlers.get(CallShape::ClientStream), call)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DeadlineExceeded));
        assert!(outbound.results().is_empty());
    }
}

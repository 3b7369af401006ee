use super::{CallHandler, channel::Call};
use core::time::Duration;
use scorer_core::{
    Error, Result,
    types::{CallShape, SERVER_STREAM_MESSAGES},
};
use tokio::time;

/// Emits a fixed-length, paced sequence of responses for one prompt.
///
/// Response `i` is `"{prompt} {i}"`. Each send is awaited before the next, and
/// the generator sleeps `interval` after every send. Sends are best-effort: a
/// failed send is logged and the sequence carries on, so the caller may see
/// fewer than [`SERVER_STREAM_MESSAGES`] responses on a successful call.
#[derive(Debug, Clone, Copy)]
pub struct ServerStreamGenerator {
    interval: Duration,
}

impl ServerStreamGenerator {
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[tonic::async_trait]
impl CallHandler for ServerStreamGenerator {
    fn shape(&self) -> CallShape {
        CallShape::ServerStream
    }

    async fn handle(&self, call: &mut Call) -> Result<()> {
        let prompt = call.recv().await?.ok_or(Error::MissingRequest)?.prompt;
        tracing::info!(%prompt, "Sending first response for the server streaming request");

        let mut delivered = 0;
        for index in 0..SERVER_STREAM_MESSAGES {
            match call.send(format!("{prompt} {index}")).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(index, "Failed to send server streaming response: {e}"),
            }
            time::sleep(self.interval).await;
        }

        tracing::info!(delivered, "Sent all server streaming responses");
        Ok(())
    }
}

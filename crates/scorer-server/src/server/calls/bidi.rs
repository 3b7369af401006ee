use super::{CallHandler, accumulator::BatchAccumulator, channel::Call};
use core::time::Duration;
use scorer_core::{
    Error, Result,
    types::{BATCH_END_MARKER, BATCH_START_MARKER, BIDI_RECEIVES, CallShape},
};
use tokio::time;

/// Batches a fixed number of inbound prompts into interleaved responses.
///
/// For receive index `i` in `0..BIDI_RECEIVES` the batcher appends the prompt
/// and, when `i` is even, emits the batch and starts a new one. The first
/// batch therefore holds one prompt and every later one holds two. Prompts
/// received after the last even index are discarded when the call closes.
///
/// Any receive failure, including the inbound stream ending early, closes the
/// call immediately without flushing. Sends are best effort: a batch that
/// cannot be delivered is logged and dropped, and receiving continues.
#[derive(Debug, Clone, Copy)]
pub struct BidiBatcher {
    interval: Duration,
}

impl BidiBatcher {
    pub const fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

#[tonic::async_trait]
impl CallHandler for BidiBatcher {
    fn shape(&self) -> CallShape {
        CallShape::BiDiStream
    }

    async fn handle(&self, call: &mut Call) -> Result<()> {
        tracing::info!("Starting the bidirectional request processing");
        let mut batch = BatchAccumulator::new(BATCH_START_MARKER, BATCH_END_MARKER);

        for index in 0..BIDI_RECEIVES {
            let request = match call.recv().await {
                Ok(Some(request)) => request,
                Ok(None) => {
                    return Err(Error::UnexpectedEndOfStream {
                        expected: BIDI_RECEIVES,
                        received: index,
                    });
                }
                Err(e) => {
                    tracing::warn!(index, "Could not process bidirectional request: {e}");
                    return Err(e);
                }
            };
            batch.push(request.prompt);

            if index % 2 == 0 {
                let result = batch.flush();
                tracing::debug!(index, %result, "Sending current batch");
                if let Err(e) = call.send(result).await {
                    tracing::warn!(index, "Failed to send bidirectional batch: {e}");
                }
            }

            time::sleep(self.interval).await;
        }

        if !batch.is_empty() {
            tracing::debug!(
                discarded = batch.pending(),
                "Discarding trailing partial batch"
            );
        }
        tracing::info!("Ending the bidirectional request processing");
        Ok(())
    }
}

use super::{CallHandler, accumulator::BatchAccumulator, channel::Call};
use scorer_core::{
    Result,
    types::{CallShape, END_MARKER, START_MARKER},
};

/// Aggregates every inbound prompt into one response.
///
/// The response is emitted only after the client half-closes. A receive error
/// before that terminates the call with the error and no response.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClientStreamAggregator;

#[tonic::async_trait]
impl CallHandler for ClientStreamAggregator {
    fn shape(&self) -> CallShape {
        CallShape::ClientStream
    }

    async fn handle(&self, call: &mut Call) -> Result<()> {
        let mut batch = BatchAccumulator::new(START_MARKER, END_MARKER);

        loop {
            match call.recv().await {
                Ok(Some(request)) => {
                    if batch.is_empty() {
                        tracing::debug!("First request received from client");
                    }
                    batch.push(request.prompt);
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        received = batch.pending(),
                        "Client stream failed before end of input: {e}"
                    );
                    return Err(e);
                }
            }
        }

        let received = batch.pending();
        let result = batch.flush();
        tracing::info!(received, %result, "End of streaming request");
        call.send(result).await
    }
}

use super::{CallHandler, channel::Call, score};
use scorer_core::{Error, Result, types::CallShape};

/// One request in, one scored response out.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnaryHandler;

#[tonic::async_trait]
impl CallHandler for UnaryHandler {
    fn shape(&self) -> CallShape {
        CallShape::Unary
    }

    async fn handle(&self, call: &mut Call) -> Result<()> {
        let request = call.recv().await?.ok_or(Error::MissingRequest)?;
        tracing::info!(prompt = %request.prompt, "Received unary request");
        call.send(score(&request.prompt)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::calls::testing::{RecordingOutbound, ScriptedInbound};

    #[tokio::test]
    async fn scores_the_single_prompt() {
        let outbound = RecordingOutbound::default();
        let mut call = Call::new(
            CallShape::Unary,
            None,
            ScriptedInbound::prompts(["Today is"]),
            outbound.clone(),
        );

        UnaryHandler.handle(&mut call).await.unwrap();
        assert_eq!(outbound.results(), vec!["Today is sunny"]);
    }

    #[tokio::test]
    async fn missing_request_is_an_error() {
        let outbound = RecordingOutbound::default();
        let mut call = Call::new(
            CallShape::Unary,
            None,
            ScriptedInbound::default(),
            outbound.clone(),
        );

        let err = UnaryHandler.handle(&mut call).await.unwrap_err();
        assert!(matches!(err, Error::MissingRequest));
        assert_eq!(outbound.attempts(), 0);
    }
}

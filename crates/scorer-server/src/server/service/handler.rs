//! gRPC service implementation for every call shape of the scorer.
//!
//! This module defines [`ScoreService`], the concrete implementation of the
//! [`Scorer`] gRPC service defined in the protobuf specification.
//!
//! ## Responsibilities
//!
//! - Derive each call's deadline from the `grpc-timeout` header and the
//!   configured default, measured from the request's arrival.
//! - Wrap the request body in an [`Inbound`] and a bounded response channel in
//!   an [`Outbound`], then [`dispatch`] the call to its shape's handler.
//! - Run streaming-response calls on their own task, feeding a
//!   [`ReceiverStream`], and append the terminal error status if the handler
//!   fails.

use crate::server::{
    calls::{
        Handlers, Pacing,
        channel::{Call, ChannelOutbound, Inbound, OnceInbound},
        dispatch,
    },
    config::ServerConfig,
    service::arrival::Arrival,
    telemetry::{
        decrement_calls_inflight, increment_call_errors, increment_calls,
        increment_calls_inflight, record_call_duration,
    },
};
use core::{pin::Pin, time::Duration};
use scorer_core::{
    Error,
    deadline::{GRPC_TIMEOUT_HEADER, parse_grpc_timeout},
    proto::{ScoreRequest, ScoreResponse, scorer_server::Scorer},
    types::CallShape,
};
use std::sync::Arc;
use tokio::{sync::mpsc, time::Instant};
use tokio_stream::{Stream, wrappers::ReceiverStream};
use tonic::{Request, Response, Status, Streaming};
use tracing::Instrument;

/// Response stream shared by the streaming-response call shapes.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ScoreResponse, Status>> + Send>>;

/// gRPC scoring service.
///
/// Cheap to clone; every clone shares the same immutable handler set. No
/// mutable state lives here: each call owns its own channels and
/// accumulators.
#[derive(Debug, Clone)]
pub struct ScoreService {
    handlers: Arc<Handlers>,
    default_call_timeout: Option<Duration>,
    stream_buffer_size: usize,
}

impl ScoreService {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            handlers: Arc::new(Handlers::new(Pacing::from(config))),
            default_call_timeout: config.default_call_timeout,
            stream_buffer_size: config.stream_buffer_size,
        }
    }

    /// The earlier of the client's `grpc-timeout` and the server default,
    /// measured from the request's [`Arrival`], or from now when unstamped.
    fn deadline<T>(&self, request: &Request<T>) -> Option<Instant> {
        let requested = request
            .metadata()
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_grpc_timeout);

        let timeout = match (requested, self.default_call_timeout) {
            (Some(requested), Some(default)) => Some(requested.min(default)),
            (requested, default) => requested.or(default),
        };
        let start = request
            .extensions()
            .get::<Arrival>()
            .map_or_else(Instant::now, |arrival| arrival.0);
        timeout.map(|timeout| start + timeout)
    }

    /// Runs a call whose single response is returned inline.
    ///
    /// Handlers only ever answer through an
    /// [`Outbound`](crate::server::calls::channel::Outbound), whatever the shape,
    /// so the single response travels through a one-slot channel and is read
    /// back once [`dispatch`] returns.
    async fn run_single(
        &self,
        shape: CallShape,
        inbound: impl Inbound + 'static,
        deadline: Option<Instant>,
    ) -> Result<ScoreResponse, Status> {
        let started = Instant::now();
        call_started(shape);

        let (tx, mut rx) = mpsc::channel(1);
        let call = Call::new(shape, deadline, inbound, ChannelOutbound::new(tx));
        let outcome = dispatch(self.handlers.get(shape), call).await;
        call_finished(shape, started, &outcome);
        outcome?;

        match rx.recv().await {
            Some(response) => response,
            None => Err(Error::ChannelError {
                context: format!("{shape} handler completed without a response"),
            }
            .into()),
        }
    }

    /// Spawns a call whose responses are streamed back to the client.
    fn run_streaming(
        &self,
        shape: CallShape,
        inbound: impl Inbound + 'static,
        deadline: Option<Instant>,
    ) -> ResponseStream {
        let (resp_tx, resp_rx) = mpsc::channel(self.stream_buffer_size);
        let call = Call::new(shape, deadline, inbound, ChannelOutbound::new(resp_tx.clone()));
        let handlers = Arc::clone(&self.handlers);

        let fut = async move {
            let started = Instant::now();
            call_started(shape);

            let outcome = dispatch(handlers.get(shape), call).await;
            call_finished(shape, started, &outcome);

            if let Err(e) = outcome {
                // The client may already be gone; the failure is logged above.
                if let Err(_e) = resp_tx.send(Err(e.into())).await {
                    tracing::debug!("Failed to forward terminal status: {_e}");
                }
            }
        };
        tokio::spawn(fut.instrument(tracing::info_span!("call", shape = %shape)));

        Box::pin(ReceiverStream::new(resp_rx))
    }
}

fn call_started(shape: CallShape) {
    tracing::debug!(%shape, "Call started");
    increment_calls(shape);
    increment_calls_inflight(shape);
}

fn call_finished(shape: CallShape, started: Instant, outcome: &scorer_core::Result<()>) {
    decrement_calls_inflight(shape);
    record_call_duration(shape, started.elapsed().as_secs_f64() * 1000.0);

    match outcome {
        Ok(()) => tracing::info!(%shape, "Call completed"),
        Err(e) => {
            increment_call_errors(shape);
            tracing::warn!(%shape, "Call failed: {e}");
        }
    }
}

#[tonic::async_trait]
impl Scorer for ScoreService {
    type StreamingResponseScoreStream = ResponseStream;
    type BidirectionalScoreStream = ResponseStream;

    #[tracing::instrument(skip_all, fields(shape = "unary"))]
    async fn score(
        &self,
        request: Request<ScoreRequest>,
    ) -> Result<Response<ScoreResponse>, Status> {
        let deadline = self.deadline(&request);
        let inbound = OnceInbound::new(request.into_inner());
        let response = self.run_single(CallShape::Unary, inbound, deadline).await?;
        Ok(Response::new(response))
    }

    #[tracing::instrument(skip_all, fields(shape = "client_stream"))]
    async fn streaming_request_score(
        &self,
        request: Request<Streaming<ScoreRequest>>,
    ) -> Result<Response<ScoreResponse>, Status> {
        let deadline = self.deadline(&request);
        let response = self
            .run_single(CallShape::ClientStream, request.into_inner(), deadline)
            .await?;
        Ok(Response::new(response))
    }

    async fn streaming_response_score(
        &self,
        request: Request<ScoreRequest>,
    ) -> Result<Response<Self::StreamingResponseScoreStream>, Status> {
        let deadline = self.deadline(&request);
        let inbound = OnceInbound::new(request.into_inner());
        Ok(Response::new(self.run_streaming(
            CallShape::ServerStream,
            inbound,
            deadline,
        )))
    }

    async fn bidirectional_score(
        &self,
        request: Request<Streaming<ScoreRequest>>,
    ) -> Result<Response<Self::BidirectionalScoreStream>, Status> {
        let deadline = self.deadline(&request);
        Ok(Response::new(self.run_streaming(
            CallShape::BiDiStream,
            request.into_inner(),
            deadline,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::calls::testing::ScriptedInbound;
    use tokio::time;
    use tokio_stream::StreamExt;
    use tonic::Code;

    fn service(stream_interval: Duration, default_call_timeout: Option<Duration>) -> ScoreService {
        ScoreService::new(&ServerConfig {
            stream_interval,
            batch_interval: Duration::ZERO,
            default_call_timeout,
            ..ServerConfig::default()
        })
    }

    fn with_timeout<T>(message: T, timeout: &str) -> Request<T> {
        let mut request = Request::new(message);
        request
            .metadata_mut()
            .insert(GRPC_TIMEOUT_HEADER, timeout.parse().unwrap());
        request
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_the_earlier_of_header_and_default() {
        let svc = service(Duration::ZERO, Some(Duration::from_secs(30)));
        let now = Instant::now();

        assert_eq!(
            svc.deadline(&with_timeout((), "100m")),
            Some(now + Duration::from_millis(100))
        );
        assert_eq!(
            svc.deadline(&with_timeout((), "1H")),
            Some(now + Duration::from_secs(30))
        );
        assert_eq!(
            svc.deadline(&Request::new(())),
            Some(now + Duration::from_secs(30))
        );
        assert_eq!(service(Duration::ZERO, None).deadline(&Request::new(())), None);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_measured_from_arrival() {
        let svc = service(Duration::ZERO, Some(Duration::from_secs(30)));
        let arrived = Instant::now();
        let mut request = with_timeout((), "100m");
        request.extensions_mut().insert(Arrival(arrived));

        time::advance(Duration::from_millis(40)).await;
        assert_eq!(
            svc.deadline(&request),
            Some(arrived + Duration::from_millis(100))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_client_stream_reports_deadline_exceeded() {
        let svc = service(Duration::ZERO, None);
        let status = svc
            .run_single(
                CallShape::ClientStream,
                ScriptedInbound::prompts(["a"]).then_hang(),
                Some(Instant::now() + Duration::from_millis(300)),
            )
            .await
            .unwrap_err();
        assert_eq!(status.code(), Code::DeadlineExceeded);
    }

    #[tokio::test]
    async fn unary_returns_scored_prompt() {
        let svc = service(Duration::ZERO, None);
        let response = svc
            .score(Request::new(ScoreRequest {
                prompt: "Today is".into(),
            }))
            .await
            .unwrap();
        assert_eq!(response.into_inner().result, "Today is sunny");
    }

    #[tokio::test]
    async fn server_stream_yields_ten_responses() {
        let svc = service(Duration::ZERO, None);
        let stream = svc
            .streaming_response_score(Request::new(ScoreRequest {
                prompt: "P".into(),
            }))
            .await
            .unwrap()
            .into_inner();

        let results: Vec<String> = stream.map(|r| r.unwrap().result).collect().await;
        let expected: Vec<String> = (0..10).map(|i| format!("P {i}")).collect();
        assert_eq!(results, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_stream_ends_with_deadline_status() {
        let svc = service(Duration::from_millis(250), None);
        let stream = svc
            .streaming_response_score(with_timeout(
                ScoreRequest {
                    prompt: "P".into(),
                },
                "600m",
            ))
            .await
            .unwrap()
            .into_inner();

        let items: Vec<Result<ScoreResponse, Status>> = stream.collect().await;
        assert_eq!(items.len(), 4);
        for (i, item) in items[..3].iter().enumerate() {
            assert_eq!(item.as_ref().unwrap().result, format!("P {i}"));
        }
        assert_eq!(
            items[3].as_ref().unwrap_err().code(),
            Code::DeadlineExceeded
        );
    }
}

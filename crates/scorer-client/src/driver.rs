//! Exercises the scorer service one call shape at a time.

use core::{fmt, str::FromStr, time::Duration};
use futures::{Stream, StreamExt};
use scorer_core::{
    proto::{ScoreRequest, scorer_client::ScorerClient},
    types::{BIDI_RECEIVES, CallShape},
};
use tokio::{
    sync::mpsc,
    task::JoinSet,
    time::{self, Instant},
};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{
    Request, Status,
    metadata::{AsciiMetadataValue, errors::InvalidMetadataValue},
    service::{Interceptor, interceptor::InterceptedService},
    transport::{Channel, ClientTlsConfig, Endpoint},
};

pub const UNARY_PROMPT: &str = "Today is";
pub const SERVER_STREAM_PROMPT: &str = "Input size is ";
/// The client stream sends the squares of `0..=CLIENT_STREAM_LAST`.
pub const CLIENT_STREAM_LAST: u64 = 10;

pub const USAGE_HINT: &str = "Supported values are Unary, cStream, sStream, BiDi, All";

/// What a single driver run exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Single(CallShape),
    /// Every shape concurrently over one channel.
    All,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No matching test found for {0}, {USAGE_HINT}")]
pub struct UnknownSelection(pub String);

impl FromStr for Selection {
    type Err = UnknownSelection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unary" => Ok(Self::Single(CallShape::Unary)),
            "cStream" => Ok(Self::Single(CallShape::ClientStream)),
            "sStream" => Ok(Self::Single(CallShape::ServerStream)),
            "BiDi" => Ok(Self::Single(CallShape::BiDiStream)),
            "All" => Ok(Self::All),
            other => Err(UnknownSelection(other.to_owned())),
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(CallShape::Unary) => f.write_str("Unary"),
            Self::Single(CallShape::ClientStream) => f.write_str("cStream"),
            Self::Single(CallShape::ServerStream) => f.write_str("sStream"),
            Self::Single(CallShape::BiDiStream) => f.write_str("BiDi"),
            Self::All => f.write_str("All"),
        }
    }
}

/// Attaches `authorization: Bearer <token>` to every call when a token is
/// configured.
#[derive(Debug, Clone, Default)]
pub struct AuthInterceptor {
    authorization: Option<AsciiMetadataValue>,
}

impl AuthInterceptor {
    pub fn bearer(token: Option<&str>) -> Result<Self, InvalidMetadataValue> {
        let authorization = token
            .map(|token| format!("Bearer {token}").parse())
            .transpose()?;
        Ok(Self { authorization })
    }
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        if let Some(value) = &self.authorization {
            request.metadata_mut().insert("authorization", value.clone());
        }
        Ok(request)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DriverConfig {
    /// Deadline of each call, sent as `grpc-timeout` and enforced locally.
    pub timeout: Duration,
    /// Pause between consecutive sends of the streaming-request shapes.
    pub send_interval: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            send_interval: Duration::from_millis(250),
        }
    }
}

/// Outcome of one call shape.
#[derive(Debug)]
pub struct ShapeReport {
    pub shape: CallShape,
    pub elapsed: Duration,
    /// Every result string received, in order.
    pub outcome: Result<Vec<String>, Status>,
}

type Client = ScorerClient<InterceptedService<Channel, AuthInterceptor>>;

/// Runs scripted calls against a scorer service. Clones share the channel.
#[derive(Debug, Clone)]
pub struct Driver {
    client: Client,
    config: DriverConfig,
}

impl Driver {
    pub fn new(channel: Channel, auth: AuthInterceptor, config: DriverConfig) -> Self {
        Self {
            client: ScorerClient::with_interceptor(channel, auth),
            config,
        }
    }

    /// Connects to `addr`, using TLS with the platform's root certificates
    /// when `tls` is set.
    pub async fn connect(
        addr: &str,
        tls: bool,
        auth: AuthInterceptor,
        config: DriverConfig,
    ) -> anyhow::Result<Self> {
        let mut endpoint = Endpoint::from_shared(addr.to_owned())?.connect_timeout(config.timeout);
        if tls {
            endpoint = endpoint.tls_config(ClientTlsConfig::new().with_native_roots())?;
        }
        let channel = endpoint.connect().await?;
        Ok(Self::new(channel, auth, config))
    }

    fn request<T>(&self, message: T) -> Request<T> {
        let mut request = Request::new(message);
        request.set_timeout(self.config.timeout);
        request
    }

    /// Bounds a whole call, including its response stream, by the timeout.
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, Status>>,
    ) -> Result<T, Status> {
        time::timeout(self.config.timeout, call)
            .await
            .unwrap_or_else(|_| Err(Status::deadline_exceeded("Deadline exceeded")))
    }

    pub async fn unary(&self) -> Result<String, Status> {
        let mut client = self.client.clone();
        let request = self.request(ScoreRequest {
            prompt: UNARY_PROMPT.to_owned(),
        });
        let response = self.bounded(client.score(request)).await?;
        let result = response.into_inner().result;
        tracing::info!(%result, "Unary result");
        Ok(result)
    }

    pub async fn client_stream(&self) -> Result<String, Status> {
        let mut client = self.client.clone();
        let prompts = squares(0..=CLIENT_STREAM_LAST);
        let request = self.request(paced(prompts, self.config.send_interval));
        let response = self
            .bounded(client.streaming_request_score(request))
            .await?;
        let result = response.into_inner().result;
        tracing::info!(%result, "cStream response");
        Ok(result)
    }

    pub async fn server_stream(&self) -> Result<Vec<String>, Status> {
        let mut client = self.client.clone();
        let request = self.request(ScoreRequest {
            prompt: SERVER_STREAM_PROMPT.to_owned(),
        });
        self.bounded(async move {
            let mut stream = client.streaming_response_score(request).await?.into_inner();
            let mut results = Vec::new();
            while let Some(response) = stream.message().await? {
                tracing::info!(result = %response.result, "sStream received response");
                results.push(response.result);
            }
            tracing::info!("Completed receiving all the responses from the server");
            Ok(results)
        })
        .await
    }

    /// Sends the squares of `0..BIDI_RECEIVES`, reading one batch after each
    /// even-indexed send, then drains the stream to its final status.
    pub async fn bidi(&self) -> Result<Vec<String>, Status> {
        let mut client = self.client.clone();
        let interval = self.config.send_interval;
        let (tx, rx) = mpsc::channel(BIDI_RECEIVES);
        let request = self.request(ReceiverStream::new(rx));

        self.bounded(async move {
            let mut inbound = client.bidirectional_score(request).await?.into_inner();
            let mut results = Vec::new();

            for (index, prompt) in squares(0..BIDI_RECEIVES as u64).enumerate() {
                tracing::debug!(%prompt, "BiDi sending");
                tx.send(ScoreRequest { prompt })
                    .await
                    .map_err(|_| Status::unavailable("BiDi request stream closed"))?;

                if index % 2 == 0 {
                    let Some(response) = inbound.message().await? else {
                        return Err(Status::out_of_range(format!(
                            "BiDi response stream ended after {} batches",
                            results.len()
                        )));
                    };
                    tracing::info!(result = %response.result, "BiDi received");
                    results.push(response.result);
                }
                time::sleep(interval).await;
            }

            drop(tx);
            while let Some(response) = inbound.message().await? {
                results.push(response.result);
            }
            Ok(results)
        })
        .await
    }

    /// Runs one shape and records what happened without failing the driver.
    pub async fn run_shape(&self, shape: CallShape) -> ShapeReport {
        tracing::info!(%shape, "Testing");
        let started = Instant::now();
        let outcome = match shape {
            CallShape::Unary => self.unary().await.map(|r| vec![r]),
            CallShape::ClientStream => self.client_stream().await.map(|r| vec![r]),
            CallShape::ServerStream => self.server_stream().await,
            CallShape::BiDiStream => self.bidi().await,
        };
        if let Err(status) = &outcome {
            tracing::warn!(%shape, code = ?status.code(), "Call failed: {}", status.message());
        }
        ShapeReport {
            shape,
            elapsed: started.elapsed(),
            outcome,
        }
    }

    /// Runs `selection`. `All` runs one task per shape; a failing shape does
    /// not stop the others. Reports are returned in [`CallShape::ALL`] order.
    pub async fn run(&self, selection: Selection) -> Vec<ShapeReport> {
        match selection {
            Selection::Single(shape) => vec![self.run_shape(shape).await],
            Selection::All => {
                let mut tasks = JoinSet::new();
                for shape in CallShape::ALL {
                    let driver = self.clone();
                    tasks.spawn(async move { driver.run_shape(shape).await });
                }

                let mut reports = Vec::with_capacity(CallShape::ALL.len());
                while let Some(joined) = tasks.join_next().await {
                    match joined {
                        Ok(report) => reports.push(report),
                        Err(e) => tracing::error!("Driver task failed: {e}"),
                    }
                }
                reports.sort_by_key(|report| {
                    CallShape::ALL.iter().position(|shape| *shape == report.shape)
                });
                reports
            }
        }
    }
}

fn squares(range: impl Iterator<Item = u64>) -> impl Iterator<Item = String> {
    range.map(|i| (i * i).to_string())
}

/// Yields one request per prompt, pausing `interval` between requests.
fn paced<I>(prompts: I, interval: Duration) -> impl Stream<Item = ScoreRequest> + Send + 'static
where
    I: IntoIterator<Item = String>,
    I::IntoIter: Send + 'static,
{
    futures::stream::iter(prompts)
        .enumerate()
        .then(move |(index, prompt)| async move {
            if index > 0 {
                time::sleep(interval).await;
            }
            tracing::debug!(%prompt, "cStream sending");
            ScoreRequest { prompt }
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_supported_selection() {
        let cases = [
            ("Unary", Selection::Single(CallShape::Unary)),
            ("cStream", Selection::Single(CallShape::ClientStream)),
            ("sStream", Selection::Single(CallShape::ServerStream)),
            ("BiDi", Selection::Single(CallShape::BiDiStream)),
            ("All", Selection::All),
        ];
        for (input, expected) in cases {
            assert_eq!(input.parse::<Selection>().unwrap(), expected);
            assert_eq!(expected.to_string(), input);
        }
    }

    #[test]
    fn unknown_selection_carries_usage_hint() {
        let err = "unary".parse::<Selection>().unwrap_err();
        assert_eq!(err, UnknownSelection("unary".into()));
        assert!(err.to_string().contains(USAGE_HINT));
    }

    #[test]
    fn interceptor_sets_bearer_token() {
        let mut auth = AuthInterceptor::bearer(Some("secret")).unwrap();
        let request = auth.call(Request::new(())).unwrap();
        assert_eq!(
            request.metadata().get("authorization").unwrap(),
            "Bearer secret"
        );

        let mut anonymous = AuthInterceptor::bearer(None).unwrap();
        let request = anonymous.call(Request::new(())).unwrap();
        assert!(request.metadata().get("authorization").is_none());
    }

    #[test]
    fn client_stream_payload_is_squares() {
        let prompts: Vec<String> = squares(0..=CLIENT_STREAM_LAST).collect();
        assert_eq!(
            prompts,
            ["0", "1", "4", "9", "16", "25", "36", "49", "64", "81", "100"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn paced_stream_waits_between_requests() {
        let start = Instant::now();
        let requests: Vec<ScoreRequest> = paced(squares(0..3), Duration::from_millis(250))
            .collect()
            .await;

        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].prompt, "4");
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }
}

use core::time::Duration;
use scorer_client::{AuthInterceptor, Driver, DriverConfig, Selection};
use scorer_core::{
    proto::{ScoreRequest, scorer_client::ScorerClient},
    types::CallShape,
};
use scorer_server::server::{self, config::ServerConfig};
use std::net::SocketAddr;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
    time,
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Request};

struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start(config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(server::run(listener, config, shutdown.clone()));
        Self {
            addr,
            shutdown,
            handle,
        }
    }

    fn uri(&self) -> String {
        format!("http://{}", self.addr)
    }

    async fn stop(self) {
        self.shutdown.cancel();
        time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not shut down")
            .unwrap()
            .unwrap();
    }
}

fn fast_config() -> ServerConfig {
    ServerConfig {
        server_addr: String::from("127.0.0.1:0"),
        stream_interval: Duration::ZERO,
        batch_interval: Duration::ZERO,
        ..ServerConfig::default()
    }
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test(flavor = "multi_thread")]
async fn driver_exercises_every_shape_on_one_port() {
    let server = TestServer::start(fast_config()).await;
    let driver = Driver::connect(
        &server.uri(),
        false,
        AuthInterceptor::bearer(Some("test-token")).unwrap(),
        DriverConfig {
            timeout: Duration::from_secs(5),
            send_interval: Duration::ZERO,
        },
    )
    .await
    .unwrap();

    let reports = driver.run(Selection::All).await;
    let shapes: Vec<CallShape> = reports.iter().map(|r| r.shape).collect();
    assert_eq!(shapes, CallShape::ALL);

    let results: Vec<Vec<String>> = reports
        .into_iter()
        .map(|r| r.outcome.unwrap())
        .collect();

    assert_eq!(results[0], ["Today is sunny"]);
    assert_eq!(
        results[1],
        ["START __0__1__4__9__16__25__36__49__64__81__100 END"]
    );
    let expected_stream: Vec<String> = (0..10).map(|i| format!("Input size is  {i}")).collect();
    assert_eq!(results[2], expected_stream);
    assert_eq!(
        results[3],
        [
            "BATCH START __0 BATCH END",
            "BATCH START __1__4 BATCH END",
            "BATCH START __9__16 BATCH END",
            "BATCH START __25__36 BATCH END",
            "BATCH START __49__64 BATCH END",
        ]
    );

    drop(driver);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn healthcheck_shares_the_grpc_port() {
    let server = TestServer::start(fast_config()).await;

    let response = http_get(server.addr, "/healthcheck").await;
    assert!(response.starts_with("HTTP/1.1 200 OK"), "{response}");
    assert!(response.ends_with("\r\n\r\nok"), "{response}");

    let response = http_get(server.addr, "/missing").await;
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");

    let driver = Driver::connect(
        &server.uri(),
        false,
        AuthInterceptor::default(),
        DriverConfig::default(),
    )
    .await
    .unwrap();
    assert_eq!(driver.unary().await.unwrap(), "Today is sunny");

    drop(driver);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn server_stream_stops_at_the_client_deadline() {
    let server = TestServer::start(ServerConfig {
        stream_interval: Duration::from_millis(250),
        ..fast_config()
    })
    .await;

    let mut client = ScorerClient::connect(server.uri()).await.unwrap();
    let mut request = Request::new(ScoreRequest {
        prompt: String::from("P"),
    });
    request.set_timeout(Duration::from_millis(600));

    let mut stream = client
        .streaming_response_score(request)
        .await
        .unwrap()
        .into_inner();

    let mut received = Vec::new();
    let status = loop {
        match stream.message().await {
            Ok(Some(response)) => received.push(response.result),
            Ok(None) => panic!("stream ended without a deadline status: {received:?}"),
            Err(status) => break status,
        }
    };

    assert_eq!(status.code(), Code::DeadlineExceeded);
    assert_eq!(received, ["P 0", "P 1", "P 2"]);

    drop(client);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stalled_client_stream_gets_deadline_exceeded() {
    let server = TestServer::start(fast_config()).await;
    let mut client = ScorerClient::connect(server.uri()).await.unwrap();

    let (tx, rx) = mpsc::channel(1);
    tx.send(ScoreRequest {
        prompt: String::from("a"),
    })
    .await
    .unwrap();
    let mut request = Request::new(ReceiverStream::new(rx));
    request.set_timeout(Duration::from_millis(300));

    let status = client.streaming_request_score(request).await.unwrap_err();
    assert_eq!(status.code(), Code::DeadlineExceeded, "{status:?}");

    drop(tx);
    drop(client);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn bidi_client_that_stops_early_gets_out_of_range() {
    let server = TestServer::start(fast_config()).await;
    let mut client = ScorerClient::connect(server.uri()).await.unwrap();

    let requests = tokio_stream::iter(["a", "b", "c"].map(|prompt| ScoreRequest {
        prompt: prompt.to_owned(),
    }));
    let mut stream = client
        .bidirectional_score(requests)
        .await
        .unwrap()
        .into_inner();

    let mut received = Vec::new();
    let status = loop {
        match stream.message().await {
            Ok(Some(response)) => received.push(response.result),
            Ok(None) => panic!("stream ended without an error status: {received:?}"),
            Err(status) => break status,
        }
    };

    assert_eq!(status.code(), Code::OutOfRange);
    assert_eq!(
        received,
        ["BATCH START __a BATCH END", "BATCH START __b__c BATCH END"]
    );

    drop(client);
    server.stop().await;
}

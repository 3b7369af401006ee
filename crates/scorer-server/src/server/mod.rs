//! The scorer server: gRPC and an HTTP health check sharing one listener.
//!
//! [`run`] wires the pieces together:
//!
//! - [`demux`] accepts TCP connections and routes each one by protocol.
//! - The tonic server receives the RPC route and hosts the scorer service,
//!   `grpc.health.v1.Health`, and server reflection.
//! - The axum server receives the HTTP route and serves [`http::router`].
//!
//! All three run concurrently until the shutdown token is cancelled.

pub mod calls;
pub mod config;
pub mod demux;
pub mod http;
pub mod service;
pub mod telemetry;

use config::ServerConfig;
use demux::{Classifier, Demux, DemuxSettings};
use scorer_core::proto::{FILE_DESCRIPTOR_SET, scorer_server::ScorerServer};
use service::{arrival, handler::ScoreService};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tonic::{body::Body, codec::CompressionEncoding, transport::Server};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tower::ServiceBuilder;

/// Serves every protocol on `listener` until `shutdown` is cancelled, then
/// drains in-flight work.
pub async fn run(
    listener: TcpListener,
    config: ServerConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let (demux, routes) = Demux::new(
        listener,
        Classifier::standard(),
        DemuxSettings::from(&config),
    )?;

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<ScorerServer<ScoreService>>()
        .await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let grpc = Server::builder()
        .http2_adaptive_window(Some(true))
        .layer(ServiceBuilder::new().map_request(arrival::stamp::<Body>))
        .add_service(health_service)
        .add_service(reflection)
        .add_service(build_score_service(ScoreService::new(&config)))
        .serve_with_incoming_shutdown(
            routes.rpc,
            publish_not_serving(health_reporter, shutdown.clone()),
        );

    let http = axum::serve(routes.http, http::router())
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();

    let (grpc, http, ()) = tokio::join!(grpc, http, demux.serve(shutdown));
    grpc?;
    http?;

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn build_score_service(service: ScoreService) -> ScorerServer<ScoreService> {
    ScorerServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Deflate)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Deflate)
}

async fn publish_not_serving(health_reporter: HealthReporter, shutdown: CancellationToken) {
    shutdown.cancelled().await;
    tracing::info!("Shutdown requested, draining in-flight calls");
    health_reporter
        .set_not_serving::<ScorerServer<ScoreService>>()
        .await;
}

//! Connection demultiplexer.
//!
//! One TCP listener serves two protocols. Every accepted connection is
//! classified from its leading bytes by a [`Classifier`] and handed, with
//! those bytes replayed through a [`PeekedStream`], to the [`SubListener`] of
//! its [`Route`]:
//!
//! - [`Route::Http`] feeds the axum health-check server.
//! - [`Route::Rpc`] feeds the tonic gRPC server.
//!
//! Classification runs on a task per connection under the peek timeout, so a
//! slow or silent client never holds up the accept loop or other
//! connections. A connection that cannot be classified is dropped.

pub mod matcher;
pub mod peeked;

use crate::server::{
    config::ServerConfig,
    telemetry::{increment_connections_dropped, increment_connections_routed},
};
use bytes::{Bytes, BytesMut};
use core::{
    fmt,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use futures::Stream;
pub use matcher::{AnyMatcher, Classifier, Http1Matcher, Matcher, Verdict};
pub use peeked::PeekedStream;
use scorer_core::{Error, Result};
use std::{io, net::SocketAddr, sync::Arc};
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Destination of a classified connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Http,
    Rpc,
}

impl Route {
    pub const fn as_str(self) -> &'static str {
        match self {
            Route::Http => "http",
            Route::Rpc => "rpc",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bytes read per socket read while classifying.
const READ_CHUNK: usize = 512;
/// Delay before accepting again after the listener reports an error.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Limits applied to each connection while it is being classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemuxSettings {
    /// Maximum number of leading bytes inspected.
    pub peek_window: usize,
    /// Time allowed for the client to send enough bytes to be classified.
    pub peek_timeout: Duration,
    /// Classified connections queued per route before classification waits.
    pub backlog: usize,
}

impl From<&ServerConfig> for DemuxSettings {
    fn from(config: &ServerConfig) -> Self {
        Self {
            peek_window: config.peek_window_bytes,
            peek_timeout: config.peek_timeout,
            backlog: 128,
        }
    }
}

/// Reads from `stream` until `classifier` decides or `window` bytes are
/// buffered.
///
/// Returns the route and every byte consumed from the stream. Never reads past
/// the window. A stream that ends first is a [`Error::ProtocolMismatch`].
pub async fn classify_connection<S>(
    stream: &mut S,
    classifier: &Classifier,
    window: usize,
) -> Result<(Route, Bytes)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(window.min(READ_CHUNK));
    loop {
        let exhausted = buf.len() >= window;
        if let Some(route) = classifier.classify(&buf, exhausted) {
            return Ok((route, buf.freeze()));
        }

        let limit = (window - buf.len()).min(READ_CHUNK);
        buf.reserve(limit);
        let n = (&mut *stream).take(limit as u64).read_buf(&mut buf).await?;
        if n == 0 {
            return Err(Error::ProtocolMismatch {
                reason: format!(
                    "connection closed after {} bytes, before it could be classified",
                    buf.len()
                ),
            });
        }
    }
}

type Accepted = (PeekedStream<TcpStream>, SocketAddr);

#[derive(Clone)]
struct RouteSenders {
    http: mpsc::Sender<Accepted>,
    rpc: mpsc::Sender<Accepted>,
}

impl RouteSenders {
    fn get(&self, route: Route) -> &mpsc::Sender<Accepted> {
        match route {
            Route::Http => &self.http,
            Route::Rpc => &self.rpc,
        }
    }
}

/// Accept loop that classifies connections and forwards them to a route.
pub struct Demux {
    listener: TcpListener,
    classifier: Arc<Classifier>,
    settings: DemuxSettings,
    senders: RouteSenders,
}

/// Per-route listeners produced by [`Demux::new`].
#[derive(Debug)]
pub struct Routes {
    pub http: SubListener,
    pub rpc: SubListener,
}

impl Demux {
    pub fn new(
        listener: TcpListener,
        classifier: Classifier,
        settings: DemuxSettings,
    ) -> io::Result<(Self, Routes)> {
        let local_addr = listener.local_addr()?;
        let (http_tx, http_rx) = mpsc::channel(settings.backlog);
        let (rpc_tx, rpc_rx) = mpsc::channel(settings.backlog);

        let demux = Self {
            listener,
            classifier: Arc::new(classifier),
            settings,
            senders: RouteSenders {
                http: http_tx,
                rpc: rpc_tx,
            },
        };
        let routes = Routes {
            http: SubListener::new(http_rx, local_addr),
            rpc: SubListener::new(rpc_rx, local_addr),
        };
        Ok((demux, routes))
    }

    /// Accepts connections until `shutdown` is cancelled.
    ///
    /// Connections still being classified when the loop stops are routed as
    /// usual; the sub-listeners end once the last of them is handed off.
    pub async fn serve(self, shutdown: CancellationToken) {
        tracing::info!(order = ?self.classifier, "Demultiplexer accepting connections");
        loop {
            let accepted = tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("Failed to accept connection: {e}");
                    time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };

            let classifier = Arc::clone(&self.classifier);
            let senders = self.senders.clone();
            let settings = self.settings;
            tokio::spawn(
                route_connection(stream, peer, classifier, settings, senders)
                    .instrument(tracing::debug_span!("connection", %peer)),
            );
        }
        tracing::info!("Demultiplexer stopped accepting connections");
    }
}

async fn route_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    classifier: Arc<Classifier>,
    settings: DemuxSettings,
    senders: RouteSenders,
) {
    let classified = time::timeout(
        settings.peek_timeout,
        classify_connection(&mut stream, &classifier, settings.peek_window),
    )
    .await
    .unwrap_or_else(|_| {
        Err(Error::ProtocolMismatch {
            reason: format!("no protocol identified within {:?}", settings.peek_timeout),
        })
    });

    let (route, prefix) = match classified {
        Ok(classified) => classified,
        Err(e) => {
            increment_connections_dropped();
            tracing::warn!("Dropping connection: {e}");
            return;
        }
    };

    tracing::debug!(%route, peeked = prefix.len(), "Connection classified");
    increment_connections_routed(route);
    if senders
        .get(route)
        .send((PeekedStream::new(prefix, stream), peer))
        .await
        .is_err()
    {
        tracing::debug!(%route, "Route listener closed; dropping connection");
    }
}

/// The connections classified to one [`Route`].
///
/// Usable as the incoming stream of a tonic server and as an axum
/// [`Listener`](axum::serve::Listener).
pub struct SubListener {
    rx: mpsc::Receiver<Accepted>,
    local_addr: SocketAddr,
}

impl SubListener {
    fn new(rx: mpsc::Receiver<Accepted>, local_addr: SocketAddr) -> Self {
        Self { rx, local_addr }
    }
}

impl fmt::Debug for SubListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubListener")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl Stream for SubListener {
    type Item = io::Result<PeekedStream<TcpStream>>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
            .map(|accepted| accepted.map(|(stream, _)| Ok(stream)))
    }
}

impl axum::serve::Listener for SubListener {
    type Io = PeekedStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        match self.rx.recv().await {
            Some(accepted) => accepted,
            // axum never stops polling a listener; shutdown comes from its
            // graceful-shutdown signal instead.
            None => core::future::pending().await,
        }
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok(self.local_addr)
    }
}

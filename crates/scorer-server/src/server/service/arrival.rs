//! Arrival timestamps for incoming calls.
//!
//! The transport enforces `grpc-timeout` with its own timer, started when the
//! request enters the service stack, and reports expiry as `CANCELLED`.
//! [`stamp`] runs inside that stack before the transport timer starts, so a
//! deadline measured from [`Arrival`] never falls after the transport's and
//! the call's own `DEADLINE_EXCEEDED` is produced first.

use axum::http;
use tokio::time::Instant;

/// When the request was handed to the service stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arrival(pub Instant);

/// Records the current instant as the request's [`Arrival`].
pub fn stamp<B>(mut request: http::Request<B>) -> http::Request<B> {
    request.extensions_mut().insert(Arrival(Instant::now()));
    request
}

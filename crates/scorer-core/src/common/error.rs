//! Error types for the scoring service.
//!
//! This module defines the central `Error` enum, which captures every failure
//! a call or a demultiplexed connection can run into. It implements
//! `From<Error>` for `tonic::Status` so handler failures propagate to the
//! owning caller with an appropriate status code.
//!
//! ## Error Cases
//! - `Transport`: a receive or send failed inside the gRPC transport.
//! - `DeadlineExceeded`: the call deadline elapsed before the handler finished.
//! - `MissingRequest`: a call shape that needs one request received none.
//! - `UnexpectedEndOfStream`: a fixed-length inbound stream ended early.
//! - `ChannelError`: the outbound side of a call is gone.
//! - `ProtocolMismatch`: a connection could not be classified.
//! - `Io`: socket I/O failed while classifying a connection.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the scoring service.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The transport reported a failure on a call's channel.
    #[error("Transport error: {0}")]
    Transport(#[from] Status),

    /// The call deadline elapsed.
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// A call shape that consumes exactly one request received none.
    #[error("Call ended before a request was received")]
    MissingRequest,

    /// The inbound stream ended before the expected number of messages.
    #[error("Inbound stream ended after {received} of {expected} messages")]
    UnexpectedEndOfStream { expected: usize, received: usize },

    /// The outbound channel of a call was closed.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// The demultiplexer could not classify a connection.
    #[error("Protocol mismatch: {reason}")]
    ProtocolMismatch { reason: String },

    /// Socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Transport(status) => status,
            Error::DeadlineExceeded => Status::deadline_exceeded("Deadline exceeded"),
            Error::MissingRequest => Status::invalid_argument("Expected a request message"),
            Error::UnexpectedEndOfStream { expected, received } => Status::out_of_range(format!(
                "Expected {expected} request messages, received {received}"
            )),
            Error::ChannelError { context } => {
                Status::unavailable(format!("Channel error: {context}"))
            }
            Error::ProtocolMismatch { reason } => Status::unavailable(reason),
            Error::Io(e) => Status::internal(format!("I/O error: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn transport_status_passes_through_unchanged() {
        let status: Status = Error::Transport(Status::cancelled("client went away")).into();
        assert_eq!(status.code(), Code::Cancelled);
        assert_eq!(status.message(), "client went away");
    }

    #[test]
    fn maps_call_errors_to_status_codes() {
        assert_eq!(
            Status::from(Error::DeadlineExceeded).code(),
            Code::DeadlineExceeded
        );
        assert_eq!(
            Status::from(Error::MissingRequest).code(),
            Code::InvalidArgument
        );
        let status = Status::from(Error::UnexpectedEndOfStream {
            expected: 10,
            received: 3,
        });
        assert_eq!(status.code(), Code::OutOfRange);
        assert_eq!(status.message(), "Expected 10 request messages, received 3");
        assert_eq!(
            Status::from(Error::ChannelError {
                context: "closed".into()
            })
            .code(),
            Code::Unavailable
        );
    }
}

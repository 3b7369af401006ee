pub mod deadline;
pub mod error;
pub mod types;

pub use error::{Error, Result};

/// gRPC service and message definitions generated from `proto/scorer.proto`.
///
/// ## Service
///
/// - `Score` - unary.
/// - `StreamingRequestScore` - client streaming.
/// - `StreamingResponseScore` - server streaming.
/// - `BidirectionalScore` - bidirectional streaming.
///
/// ## Messages
///
/// - [`ScoreRequest`](proto::ScoreRequest) - a single `prompt`.
/// - [`ScoreResponse`](proto::ScoreResponse) - a single `result`.
pub mod proto {
    tonic::include_proto!("scorer");

    /// Encoded descriptor set for `scorer.proto`, registered with gRPC
    /// reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("scorer_descriptor");
}

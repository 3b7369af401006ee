//! # Call Shapes and Scoring Markers
//!
//! Shared vocabulary between the server handlers and the driver:
//!
//! - [`CallShape`] - the four request/response cardinality patterns.
//! - Marker and delimiter constants that frame aggregated and batched results.
//! - Fixed message counts of the streaming shapes.
//!
//! A flushed batch is every accumulated element, the start marker first,
//! joined by [`DELIMITER`] and followed by the end marker. Three prompts fed to
//! a client-streaming call therefore come back as `"START __a__b__c END"`.

use core::fmt;

/// Suffix appended to the prompt by the unary placeholder scorer.
pub const UNARY_SUFFIX: &str = " sunny";

/// Separator placed between accumulated batch elements.
pub const DELIMITER: &str = "__";

/// First element of a client-streaming aggregate.
pub const START_MARKER: &str = "START ";

/// Appended to a client-streaming aggregate.
pub const END_MARKER: &str = " END";

/// First element of every bidirectional batch.
pub const BATCH_START_MARKER: &str = "BATCH START ";

/// Appended to every bidirectional batch.
pub const BATCH_END_MARKER: &str = " BATCH END";

/// Number of responses a server-streaming call emits.
pub const SERVER_STREAM_MESSAGES: usize = 10;

/// Number of requests a bidirectional call receives before closing.
pub const BIDI_RECEIVES: usize = 10;

/// Request/response cardinality of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallShape {
    /// One request, one response.
    Unary,
    /// Many requests, one response after the inbound stream ends.
    ClientStream,
    /// One request, many responses.
    ServerStream,
    /// Interleaved requests and responses.
    BiDiStream,
}

impl CallShape {
    /// All shapes, in the order the driver exercises them.
    pub const ALL: [CallShape; 4] = [
        CallShape::Unary,
        CallShape::ClientStream,
        CallShape::ServerStream,
        CallShape::BiDiStream,
    ];

    /// Stable lowercase label, used for log fields and metric attributes.
    pub const fn as_str(self) -> &'static str {
        match self {
            CallShape::Unary => "unary",
            CallShape::ClientStream => "client_stream",
            CallShape::ServerStream => "server_stream",
            CallShape::BiDiStream => "bidi_stream",
        }
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

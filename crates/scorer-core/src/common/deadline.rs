//! Parsing of the `grpc-timeout` request header.
//!
//! Clients encode a call deadline as a relative timeout: one to eight ASCII
//! digits followed by a unit (`H`, `M`, `S`, `m`, `u`, `n`). The server turns
//! it back into a [`Duration`] to bound every suspension point of the call.

use core::time::Duration;

/// Metadata key carrying the call timeout.
pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

const MAX_TIMEOUT_DIGITS: usize = 8;

/// Parses a `grpc-timeout` header value.
///
/// Returns `None` for anything that is not a well-formed value, so a
/// malformed header behaves like an absent one.
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || !value.is_ascii() {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > MAX_TIMEOUT_DIGITS || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    match unit {
        "H" => Some(Duration::from_secs(amount * 60 * 60)),
        "M" => Some(Duration::from_secs(amount * 60)),
        "S" => Some(Duration::from_secs(amount)),
        "m" => Some(Duration::from_millis(amount)),
        "u" => Some(Duration::from_micros(amount)),
        "n" => Some(Duration::from_nanos(amount)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_unit() {
        assert_eq!(parse_grpc_timeout("2H"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_grpc_timeout("3M"), Some(Duration::from_secs(180)));
        assert_eq!(parse_grpc_timeout("3S"), Some(Duration::from_secs(3)));
        assert_eq!(parse_grpc_timeout("2999m"), Some(Duration::from_millis(2999)));
        assert_eq!(parse_grpc_timeout("40u"), Some(Duration::from_micros(40)));
        assert_eq!(parse_grpc_timeout("12345678n"), Some(Duration::from_nanos(12_345_678)));
    }

    #[test]
    fn rejects_malformed_values() {
        assert_eq!(parse_grpc_timeout(""), None);
        assert_eq!(parse_grpc_timeout("S"), None);
        assert_eq!(parse_grpc_timeout("10"), None);
        assert_eq!(parse_grpc_timeout("10x"), None);
        assert_eq!(parse_grpc_timeout("-1S"), None);
        assert_eq!(parse_grpc_timeout("123456789S"), None);
        assert_eq!(parse_grpc_timeout("1 S"), None);
    }
}

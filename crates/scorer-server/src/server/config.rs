use anyhow::bail;
use clap::Parser;
use core::time::Duration;

/// Smallest peek window that still fits a short HTTP/1.x request line.
const MIN_PEEK_WINDOW_BYTES: usize = 16;

/// Runtime configuration for the `scorer-server` binary.
///
/// These settings control the listening address, the pacing of the streaming
/// call shapes, call deadlines, and how long the connection demultiplexer may
/// inspect a new connection. All values are parsed from CLI arguments or
/// environment variables (a `.env` file is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "scorer-server",
    version,
    about = "A gRPC scoring service that shares its port with an HTTP health check"
)]
pub struct CliArgs {
    /// TCP address serving both gRPC and the HTTP health check.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:5001"))]
    pub server_addr: String,

    /// Delay after each response of a server-streaming call, in milliseconds.
    ///
    /// Environment variable: `STREAM_INTERVAL_MS`
    #[arg(long, env = "STREAM_INTERVAL_MS", default_value_t = 250)]
    pub stream_interval_ms: u64,

    /// Delay after each receive of a bidirectional call, in milliseconds.
    ///
    /// Environment variable: `BATCH_INTERVAL_MS`
    #[arg(long, env = "BATCH_INTERVAL_MS", default_value_t = 125)]
    pub batch_interval_ms: u64,

    /// Upper bound on every call's lifetime, in milliseconds.
    ///
    /// A shorter `grpc-timeout` sent by the client wins. `0` disables the
    /// server-side bound so only client deadlines apply.
    ///
    /// Environment variable: `DEFAULT_CALL_TIMEOUT_MS`
    #[arg(long, env = "DEFAULT_CALL_TIMEOUT_MS", default_value_t = 30_000)]
    pub default_call_timeout_ms: u64,

    /// Capacity of the response buffer between a streaming handler and the
    /// gRPC stream.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 8)]
    pub stream_buffer_size: usize,

    /// Maximum number of leading bytes inspected to classify a connection.
    ///
    /// Environment variable: `PEEK_WINDOW_BYTES`
    #[arg(long, env = "PEEK_WINDOW_BYTES", default_value_t = 4096)]
    pub peek_window_bytes: usize,

    /// How long a new connection may take to send enough bytes to be
    /// classified, in milliseconds.
    ///
    /// Environment variable: `PEEK_TIMEOUT_MS`
    #[arg(long, env = "PEEK_TIMEOUT_MS", default_value_t = 2_000)]
    pub peek_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: String,
    pub stream_interval: Duration,
    pub batch_interval: Duration,
    pub default_call_timeout: Option<Duration>,
    pub stream_buffer_size: usize,
    pub peek_window_bytes: usize,
    pub peek_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_addr: String::from("0.0.0.0:5001"),
            stream_interval: Duration::from_millis(250),
            batch_interval: Duration::from_millis(125),
            default_call_timeout: Some(Duration::from_secs(30)),
            stream_buffer_size: 8,
            peek_window_bytes: 4096,
            peek_timeout: Duration::from_secs(2),
        }
    }
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        if args.peek_window_bytes < MIN_PEEK_WINDOW_BYTES {
            bail!(
                "PEEK_WINDOW_BYTES ({}) must be at least {}",
                args.peek_window_bytes,
                MIN_PEEK_WINDOW_BYTES
            );
        }

        if args.peek_timeout_ms == 0 {
            bail!("PEEK_TIMEOUT_MS must be greater than 0");
        }

        let default_call_timeout = (args.default_call_timeout_ms > 0)
            .then(|| Duration::from_millis(args.default_call_timeout_ms));

        Ok(Self {
            server_addr: args.server_addr,
            stream_interval: Duration::from_millis(args.stream_interval_ms),
            batch_interval: Duration::from_millis(args.batch_interval_ms),
            default_call_timeout,
            stream_buffer_size: args.stream_buffer_size,
            peek_window_bytes: args.peek_window_bytes,
            peek_timeout: Duration::from_millis(args.peek_timeout_ms),
        })
    }
}

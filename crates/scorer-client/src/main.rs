use clap::Parser;
use core::time::Duration;
use scorer_client::{AuthInterceptor, Driver, DriverConfig, Selection, ShapeReport};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "scorer-client",
    version,
    about = "Exercises every call shape of the scorer gRPC service"
)]
struct CliArgs {
    /// Call shape to run: Unary, cStream, sStream, BiDi or All.
    selection: Option<String>,

    /// Server URI.
    #[arg(long, env = "SCORER_ADDR", default_value = "http://localhost:5001")]
    addr: String,

    /// Deadline of each call, in milliseconds.
    #[arg(long, env = "SCORER_TIMEOUT_MS", default_value_t = 3_000)]
    timeout_ms: u64,

    /// Pause between consecutive streamed requests, in milliseconds.
    #[arg(long, env = "SCORER_SEND_INTERVAL_MS", default_value_t = 250)]
    send_interval_ms: u64,

    /// Bearer token attached to every call.
    #[arg(long, env = "SCORER_TOKEN")]
    token: Option<String>,

    /// Connect over TLS using the platform's root certificates.
    #[arg(long, env = "SCORER_TLS")]
    tls: bool,

    /// After each run, read the next selection from stdin until `Exit`.
    #[arg(long)]
    interactive: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let config = DriverConfig {
        timeout: Duration::from_millis(args.timeout_ms),
        send_interval: Duration::from_millis(args.send_interval_ms),
    };
    let auth = AuthInterceptor::bearer(args.token.as_deref())?;
    let driver = Driver::connect(&args.addr, args.tls, auth, config).await?;

    let mut selection = args.selection.unwrap_or_else(|| {
        tracing::info!("No call shape provided, defaulting to Unary");
        String::from("Unary")
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match selection.parse::<Selection>() {
            Ok(parsed) => {
                for report in driver.run(parsed).await {
                    log_report(&report);
                }
            }
            Err(e) => tracing::warn!("{e}"),
        }

        if !args.interactive {
            break;
        }

        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(b"Enter next test type Unary, cStream, sStream, BiDi, All, Exit: ")
            .await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        selection = line.trim().to_owned();
        if selection == "Exit" || selection == "exit" {
            break;
        }
    }

    tracing::info!("Exiting, closing the connection");
    Ok(())
}

fn log_report(report: &ShapeReport) {
    match &report.outcome {
        Ok(results) => tracing::info!(
            shape = %report.shape,
            elapsed = ?report.elapsed,
            responses = results.len(),
            "Call completed"
        ),
        Err(status) => tracing::error!(
            shape = %report.shape,
            elapsed = ?report.elapsed,
            code = ?status.code(),
            "Call failed: {}",
            status.message()
        ),
    }
}

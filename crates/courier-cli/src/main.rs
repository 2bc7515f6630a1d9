//! # Courier CLI Entry Point
//!
//! Small command-line client for the courier messaging layer: loads a
//! configuration file, submits one message and prints the streamed
//! response.
//!
//! ## Usage
//!
//! ```bash
//! # send "ping" to the echo handle of the echo service
//! courier call -c courier.json echo echo ping
//!
//! # with an explicit deadline and retry budget
//! courier call -c courier.json echo echo ping --deadline 2.0 --max-retries 1
//! ```

use anyhow::{bail, Context as _, Result};
use argh::FromArgs;
use courier_client::Courier;
use courier_common::{CourierConfig, MessagePath, RpcCode};
use std::io::Write;
use std::time::Duration;

/// Courier, a messaging client for discovered services
#[derive(FromArgs)]
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Call(CallArgs),
}

/// send one message and print the streamed response
#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
struct CallArgs {
    /// path to the JSON configuration file
    #[argh(option, short = 'c')]
    config: String,

    /// service name (must appear in the configuration)
    #[argh(positional)]
    service: String,

    /// handle name exposed by the service's app
    #[argh(positional)]
    handle: String,

    /// message payload
    #[argh(positional)]
    payload: String,

    /// total deadline in seconds (0 disables)
    #[argh(option)]
    deadline: Option<f64>,

    /// ack timeout in seconds
    #[argh(option)]
    ack_timeout: Option<f64>,

    /// reschedules allowed after a lost ack
    #[argh(option)]
    max_retries: Option<u32>,

    /// how long to wait for the response before giving up, seconds
    #[argh(option, default = "30.0")]
    wait: f64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli: Cli = argh::from_env();
    match cli.command {
        Commands::Call(args) => call(args).await,
    }
}

async fn call(args: CallArgs) -> Result<()> {
    let config = CourierConfig::from_file(&args.config)
        .with_context(|| format!("could not load configuration from {}", args.config))?;

    let mut policy = config.policy_for(&args.service);
    if let Some(deadline) = args.deadline {
        policy.deadline = deadline;
    }
    if let Some(ack_timeout) = args.ack_timeout {
        policy.ack_timeout = ack_timeout;
    }
    if let Some(max_retries) = args.max_retries {
        policy.max_retries = max_retries;
    }

    let courier = Courier::new(config).await?;
    let mut response = courier
        .send_message(
            args.payload.into_bytes(),
            MessagePath::new(args.service, args.handle),
            Some(policy),
        )
        .await?;

    let outcome = tokio::time::timeout(Duration::from_secs_f64(args.wait), async {
        let mut stdout = std::io::stdout();
        while let Some(chunk) = response.get().await {
            match chunk.code {
                RpcCode::Chunk => {
                    stdout.write_all(&chunk.data)?;
                    stdout.write_all(b"\n")?;
                    stdout.flush()?;
                }
                RpcCode::Choke => return Ok(()),
                RpcCode::Error => bail!(
                    "error {}: {}",
                    chunk.error_code.unwrap_or(0),
                    chunk.error_message.unwrap_or_default()
                ),
                RpcCode::Ack => {}
            }
        }
        bail!("response stream ended without a terminal chunk")
    })
    .await;

    let result = match outcome {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("timed out after {}s", args.wait)),
    };

    courier.shutdown().await;
    result
}

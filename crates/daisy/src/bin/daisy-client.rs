use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use daisy::schema::{self, Echo, EchoResponse, Ping, PingResponse, DEBUG_PING, TEST_ECHO};
use daisy::services::StrobeListener;
use daisy::{init_tracing, DaisyConfig};
use tracing::warn;

const STROBE_WAIT: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "daisy-client", version, about = "daisy RPC demo client")]
struct Args {
    /// TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `client.connect`.
    #[arg(long)]
    connect: Option<String>,

    /// Overrides `logging.level`.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs.
    #[arg(long)]
    json_logs: bool,

    /// Payload for `debug.ping`.
    #[arg(long, default_value = "hello")]
    ping: String,

    /// Payload for `test.echo`.
    #[arg(long, default_value = "hello")]
    echo: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let args = Args::parse();

    let mut config = DaisyConfig::load(args.config.as_deref()).context("load config")?;
    if let Some(connect) = args.connect {
        config.client.connect = connect;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.logging.json |= args.json_logs;
    init_tracing(&config.logging);

    let registry = schema::registry().context("build registry")?;
    let (listener, mut strobes) = StrobeListener::new();
    let mut builder = registry.client().config(config.rpc.clone());
    builder
        .register_module(listener)
        .context("register Test")?;
    let client = builder
        .connect(config.client.connect.as_str())
        .await
        .with_context(|| format!("connect {}", config.client.connect))?;

    let pong: PingResponse = client
        .call(DEBUG_PING, &Ping { ping: args.ping.clone() })
        .await
        .with_context(|| format!("call {DEBUG_PING}"))?;
    println!("{DEBUG_PING}: {} -> {}", args.ping, pong.pong);

    let echo: EchoResponse = client
        .call(TEST_ECHO, &Echo { req: args.echo.clone() })
        .await
        .with_context(|| format!("call {TEST_ECHO}"))?;
    println!("{TEST_ECHO}: {} -> {}", args.echo, echo.resp);

    match tokio::time::timeout(STROBE_WAIT, strobes.recv()).await {
        Ok(Some(msg)) => println!("{}: {msg}", schema::TEST_STROBE),
        _ => warn!("no strobe received"),
    }

    client.close();
    Ok(())
}

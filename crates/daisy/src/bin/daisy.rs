use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use daisy::services::{Debug, Test};
use daisy::{init_tracing, schema, DaisyConfig};
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "daisy", version, about = "daisy RPC demo server")]
struct Args {
    /// TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides `server.listen`.
    #[arg(long)]
    listen: Option<String>,

    /// Overrides `logging.level`.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON logs.
    #[arg(long)]
    json_logs: bool,
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
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.logging.json |= args.json_logs;
    init_tracing(&config.logging);

    let registry = schema::registry().context("build registry")?;
    let server = registry.server(config.rpc.clone());
    server.register_module(Debug).context("register Debug")?;
    server.register_module(Test).context("register Test")?;

    let listener = TcpListener::bind(config.server.listen.as_str())
        .await
        .with_context(|| format!("bind {}", config.server.listen))?;
    info!(listen = %config.server.listen, "daisy server starting");

    server
        .serve_with_shutdown(listener, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("accept connections")?;
    Ok(())
}

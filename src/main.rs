//! Console front end: reads operator commands from stdin and prints replies.

use anyhow::{Context, Result};
use clap::Parser;
use courier::{
    init_tracing, AppContext, ControlSurface, DispatchConfig, DispatchService,
    GatewayOptions, GatewaySessionFactory, Input, JsonFileStore, OperatorId,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

/// Rate-controlled message dispatch over a JSON-RPC messaging gateway
#[derive(Parser, Debug)]
#[command(name = "courier")]
struct Args {
    /// Gateway JSON-RPC endpoint
    #[arg(long, env = "COURIER_GATEWAY_URL", default_value = "http://127.0.0.1:8645")]
    gateway_url: String,

    /// Operator id of the console user; owns the instance
    #[arg(long, env = "COURIER_OWNER", default_value = "0")]
    owner: OperatorId,

    /// Directory holding accounts.json and operators.json
    #[arg(long, env = "COURIER_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Largest worker count a job may request
    #[arg(long, env = "COURIER_MAX_WORKERS", default_value = "5")]
    max_workers: usize,

    /// Pause after every successful send, in milliseconds
    #[arg(long, env = "COURIER_PACING_MS", default_value = "240")]
    pacing_ms: u64,

    /// Session refresh interval in seconds
    #[arg(long, env = "COURIER_REFRESH_SECS", default_value = "60")]
    refresh_secs: u64,

    /// Upper bound for any single gateway call, in seconds
    #[arg(long, env = "COURIER_IO_TIMEOUT_SECS", default_value = "30")]
    io_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = DispatchConfig::builder()
        .max_concurrency(args.max_workers)
        .pacing_delay(Duration::from_millis(args.pacing_ms))
        .refresh_interval(Duration::from_secs(args.refresh_secs))
        .io_timeout(Duration::from_secs(args.io_timeout_secs))
        .build()
        .context("invalid dispatch configuration")?;

    let options = GatewayOptions {
        request_timeout: Duration::from_secs(args.io_timeout_secs),
        ..GatewayOptions::default()
    };
    options.validate().context("invalid gateway options")?;

    let service = DispatchService::new(config);
    let factory = Arc::new(GatewaySessionFactory::new(args.gateway_url.clone(), options));
    let store = Arc::new(JsonFileStore::new(args.data_dir.clone()));
    let ctx = AppContext::load(args.owner, service, factory, store).await?;
    let surface = ControlSurface::new(Arc::new(ctx));

    tracing::info!(
        gateway = %args.gateway_url,
        data_dir = %args.data_dir.display(),
        "courier ready; send /help"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("interrupt received");
                break;
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                let input = match line.trim().strip_prefix("/upload") {
                    Some(path) => match read_document(Path::new(path.trim())).await {
                        Ok(input) => input,
                        Err(err) => {
                            println!("{err:#}");
                            continue;
                        }
                    },
                    None => Input::Text(line),
                };
                let reply = surface.handle(args.owner, input).await;
                if !reply.is_empty() {
                    println!("{reply}");
                }
            }
        }
    }

    surface.context().service().shutdown().await;
    tracing::info!("courier stopped");
    Ok(())
}

async fn read_document(path: &Path) -> Result<Input> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Input::Document { name, bytes })
}

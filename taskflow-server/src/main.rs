//! taskflow server - HTTP API, runner protocol and live event stream.

mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use taskflow::io::config::{load_config, write_config};
use taskflow::io::store::Store;
use taskflow::{Broadcaster, DispatchSettings, Orchestrator};

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "taskflow-server")]
#[command(about = "Task/run state machine and job dispatch server")]
struct Args {
    /// Path to the TOML config file (defaults apply when missing)
    #[arg(long, default_value = "taskflow.toml")]
    config: PathBuf,

    /// Address to bind the server to (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database file (overrides config)
    #[arg(long)]
    database: Option<PathBuf>,

    /// Write the effective config to the --config path and exit
    #[arg(long)]
    write_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    taskflow::logging::init("taskflow=info,taskflow_server=info");

    let args = Args::parse();

    let mut config = load_config(&args.config)?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }
    config.validate().context("validate config overrides")?;

    if args.write_config {
        write_config(&args.config, &config)?;
        info!(path = %args.config.display(), "wrote config");
        return Ok(());
    }

    let store = Store::open(&config.database_path)
        .with_context(|| format!("open database {}", config.database_path.display()))?;
    info!(database = %config.database_path.display(), "store ready");

    let orchestrator = Orchestrator::new(
        store,
        Broadcaster::new(config.subscriber_buffer),
        DispatchSettings::from_config(&config),
    );
    let state = AppState::new(orchestrator, &config);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = routes::router(state).layer(cors);

    let addr: SocketAddr = format!("{}:{}", config.bind, config.port)
        .parse()
        .with_context(|| format!("parse listen address {}:{}", config.bind, config.port))?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

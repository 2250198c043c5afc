//! objrpc server - HTTP binding for the demo object graph.
//!
//! Serves the root API at the base path and every registered object at
//! `<base>/<id>`. Prints `OBJRPC_PORT=<port>` once the listener is bound so
//! callers that pass `--port 0` can find it.

mod handler;
mod server;

use anyhow::Result;
use clap::Parser;
use objrpc::demo::DemoApi;
use objrpc::{Registry, Server, ServerConfig};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "objrpc-server")]
#[command(about = "JSON-RPC object server for the objrpc demo API")]
struct Args {
    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value = "0")]
    port: u16,

    /// Host to bind to
    #[arg(long, default_value = ServerConfig::DEFAULT_HOST)]
    host: String,

    /// Path of the delivery route
    #[arg(long, default_value = ServerConfig::DEFAULT_BASE_PATH)]
    base_path: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting objrpc server");

    let registry = Arc::new(Registry::new());
    let api = DemoApi::new(&registry)?;
    let rpc = Server::with_registry(registry, api)?;
    info!("Registered {} objects", rpc.registry().len());

    let addr = server::start_server(Arc::new(rpc), &args.host, args.port, &args.base_path).await?;

    // Print the port for callers to discover
    println!("OBJRPC_PORT={}", addr.port());

    info!("objrpc server running on http://{}{}", addr, args.base_path);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    Ok(())
}

//! HTTP server binary exposing the Watchpost agent-output surface.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use watchpost::app::Watchpost;
use watchpost::cache::{Cache, InMemoryStorage};

#[derive(Parser, Debug)]
#[command(name = "watchpostd", about = "Serve Watchpost check results over HTTP")]
struct Args {
    /// Address to bind the HTTP server to.
    #[arg(long, env = "WATCHPOST_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Agent OS string embedded in emitted agent output.
    #[arg(long, env = "WATCHPOST_AGENT_OS", default_value = "linux")]
    agent_os: String,

    /// Name of the environment this agent is executing from.
    #[arg(long, env = "WATCHPOST_EXECUTION_ENVIRONMENT", default_value = "default")]
    execution_environment: String,

    /// Log level filter, e.g. "info", "watchpost=debug".
    #[arg(long, env = "WATCHPOST_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log))
        .init();

    tracing::info!(version = %watchpost::version::version_string(), "starting watchpostd");

    let app = Arc::new(Watchpost::new(
        args.agent_os,
        Cache::new(Arc::new(InMemoryStorage::new())),
        args.execution_environment,
    ));

    let router = watchpost::http::router(app);
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(addr = %args.bind, "listening");
    axum::serve(listener, router).await?;

    Ok(())
}

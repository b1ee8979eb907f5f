use anyhow::Result;
use axum::Router;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{fmt, EnvFilter};
use webrank_core::rank::RankConfig;
use webrank_server::build_app;

#[derive(Parser)]
struct Args {
    /// Published index directory
    #[arg(long, default_value = "./index")]
    index: PathBuf,
    /// Host to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,
    /// Port to bind
    #[arg(long, default_value_t = 8080)]
    port: u16,
    /// Deadline for semantic scoring before falling back to traditional
    #[arg(long, default_value_t = 2000)]
    semantic_deadline_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    let args = Args::parse();

    // Deployments with an embedding model inject it here; without one the
    // server answers semantic requests in traditional mode and says so.
    let app: Router = build_app(
        args.index,
        None,
        RankConfig::default(),
        Duration::from_millis(args.semantic_deadline_ms),
    )?;

    let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

use std::net::SocketAddr;

use tracing::info;

use sayhi_server::config::Config;
use sayhi_server::{build_router, build_state};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sayhi=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = sayhi_db::Database::open(&config.db_path)?;

    let state = build_state(db, &config);
    let app = build_router(state, &config)?;

    let addr: SocketAddr = config.addr().parse()?;
    info!("SayHi server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

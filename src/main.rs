use std::env;
use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;

use lea_backend::core::config::AppPaths;
use lea_backend::core::logging;
use lea_backend::server;
use lea_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = Arc::new(AppPaths::new());
    logging::init(&paths);

    let args: Vec<String> = env::args().skip(1).collect();
    let state = AppState::initialize(paths).await?;

    match args.first().map(String::as_str) {
        None | Some("serve") => serve(state).await,
        Some("index") => {
            let full = args.iter().any(|arg| arg == "--full");
            let report = state
                .run_indexing(full)
                .await
                .context("Indexing pass failed")?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.failed > 0 {
                tracing::warn!("{} documents failed and will be retried next run", report.failed);
            }
            Ok(())
        }
        Some(other) => {
            anyhow::bail!("unknown command '{}' (expected 'serve' or 'index [--full]')", other)
        }
    }
}

async fn serve(state: Arc<AppState>) -> anyhow::Result<()> {
    let bind_addr = format!("{}:{}", state.settings.server.host, state.settings.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let addr = listener.local_addr()?;

    println!("LEA_PORT={}", addr.port());
    tracing::info!(
        "Listening on {} ({} fragments indexed, {} corrections)",
        addr,
        state.index.count().await.unwrap_or(0),
        state.corrections.count().await
    );

    let app: Router = server::router::router(state);
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

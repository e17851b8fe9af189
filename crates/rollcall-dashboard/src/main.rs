use anyhow::{Context, Result};
use axum::extract::State;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use rollcall_core::{AttendanceStore, Config};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

mod render;

#[derive(Parser)]
#[command(name = "rollcall-dashboard", about = "Self-refreshing attendance dashboard")]
struct Cli {
    /// TOML config file (ROLLCALL_* environment variables still apply on top)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding `dashboard_addr`
    #[arg(short, long)]
    addr: Option<SocketAddr>,
}

struct AppState {
    store: AttendanceStore,
    refresh_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let addr = cli.addr.unwrap_or(config.dashboard_addr);

    let state = Arc::new(AppState {
        store: AttendanceStore::new(&config.attendance_path),
        refresh_secs: config.refresh_secs,
    });
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        %addr,
        attendance = %config.attendance_path.display(),
        refresh_secs = config.refresh_secs,
        "dashboard listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new().route("/", get(dashboard)).with_state(state)
}

/// Re-read the ledger on every request so the page tracks the camera loop.
async fn dashboard(State(state): State<Arc<AppState>>) -> Html<String> {
    let today = chrono::Local::now().date_naive();
    let store = state.store.clone();
    let loaded = tokio::task::spawn_blocking(move || {
        if !store.path().exists() {
            return Ok(None);
        }
        store.load().map(Some)
    })
    .await;

    let records = match loaded {
        Ok(Ok(ledger)) => ledger.map(|l| l.records),
        Ok(Err(e)) => {
            tracing::warn!(path = %state.store.path().display(), error = %e, "failed to read attendance file");
            None
        }
        Err(e) => {
            tracing::error!(error = %e, "attendance reader task failed");
            None
        }
    };

    Html(render::page(&render::PageInput {
        records: records.as_deref(),
        today,
        refresh_secs: state.refresh_secs,
    }))
}

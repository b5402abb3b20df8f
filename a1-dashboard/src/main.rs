//! a1 dashboard - JSON control API and live event stream for a project's runs.

mod routes;
mod sse;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tower_http::services::ServeDir;
use tracing::info;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "a1-dashboard")]
#[command(about = "Web control API for monitoring and steering a1 runs")]
struct Args {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Port to listen on
    #[arg(long, default_value = "7331")]
    port: u16,

    /// Project directory (contains .a1/)
    #[arg(long, default_value = ".")]
    project_dir: PathBuf,

    /// Directory of pre-built UI files to serve (defaults to <project>/.a1/ui)
    #[arg(long)]
    ui_dir: Option<PathBuf>,
}

async fn shutdown_signal(state: AppState) {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
        state.ctx.request_stop();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("a1_dashboard=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let project_dir = args.project_dir.canonicalize().unwrap_or(args.project_dir);
    info!(project_dir = %project_dir.display(), "starting a1-dashboard");

    let state = AppState::new(project_dir.clone());
    let mut app = routes::app(state.clone());

    let ui_dir = args
        .ui_dir
        .unwrap_or_else(|| project_dir.join(".a1").join("ui"));
    if ui_dir.exists() {
        info!(ui_dir = %ui_dir.display(), "serving static UI files");
        app = app.fallback_service(ServeDir::new(ui_dir).append_index_html_on_directories(true));
    } else {
        info!(ui_dir = %ui_dir.display(), "UI directory not found, API-only mode");
    }

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port).parse()?;
    info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    Ok(())
}

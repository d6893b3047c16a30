use anyhow::{Context, Result};
use clap::Parser;
use retrospace::config::ServiceConfig;
use retrospace::server::{self, AppState};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "retrospace")]
#[command(about = "Retrospace music sharing server", long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "RETROSPACE_PORT", default_value = "3000")]
    port: u16,

    #[command(flatten)]
    service: ServiceConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("retrospace=debug,tower_http=debug")),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let cli = Cli::parse();

    tracing::info!("Starting Retrospace");
    tracing::info!("Data directory: {}", cli.service.data_dir.display());
    tracing::info!("Database: {}", cli.service.database_path().display());

    let public_url = cli.service.public_url(cli.port);
    let state = AppState::open(&cli.service, public_url)
        .await
        .context("Failed to initialize storage")?;

    let app = server::create_router(state);
    let addr = format!("0.0.0.0:{}", cli.port);

    tracing::info!("Server listening on http://{}", addr);
    tracing::info!("API endpoints:");
    tracing::info!("  POST /functions/v1/upload-song       - Upload a song (multipart)");
    tracing::info!("  POST /auth/signup | /auth/signin     - Accounts");
    tracing::info!("  GET  /songs                          - List songs");
    tracing::info!("  GET  /playlists, POST /playlists     - Playlists");
    tracing::info!("  GET  /playlists/:id/songs            - Playlist songs in order");
    tracing::info!("  POST /storage/sign                   - Signed playback URL");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

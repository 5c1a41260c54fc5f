use tika2md::backend::TikaClient;
use tika2md::server::{self, AppState};
use tika2md::{Config, ConvertOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let backend = TikaClient::new(&config)?;
    let options = ConvertOptions {
        strip_boilerplate: config.strip_boilerplate,
    };
    let app = server::router(AppState::new(backend, options), config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!(backend = %config.tika_server, "listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

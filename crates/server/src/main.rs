use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use mediaconv_transcoder::TranscoderConfig;
use mediaconv_transcoder::router::SessionEventRouter;
use mediaconv_transcoder::service::ConversionService;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // Engine path: config record, then PATH, then bare name
    let config_path: PathBuf = std::env::var("MEDIACONV_CONFIG")
        .unwrap_or_else(|_| "config.json".to_string())
        .into();
    let engine_path = mediaconv_transcoder::locate::resolve_engine_path(&config_path);

    let upload_dir: PathBuf = std::env::var("MEDIACONV_UPLOAD_DIR")
        .unwrap_or_else(|_| "./uploads".to_string())
        .into();
    let output_dir: PathBuf = std::env::var("MEDIACONV_OUTPUT_DIR")
        .unwrap_or_else(|_| "./public/output".to_string())
        .into();
    std::fs::create_dir_all(&upload_dir).context("failed to create upload dir")?;
    std::fs::create_dir_all(&output_dir).context("failed to create output dir")?;

    let max_concurrent: usize = std::env::var("MEDIACONV_MAX_CONCURRENT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);
    let task_timeout = std::env::var("MEDIACONV_TASK_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs);
    // 0 keeps finished batches downloadable until restart
    let result_ttl = match std::env::var("MEDIACONV_RESULT_TTL_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
    {
        Some(0) => None,
        Some(secs) => Some(Duration::from_secs(secs)),
        None => Some(mediaconv_transcoder::DEFAULT_RESULT_TTL),
    };

    let tc_config = TranscoderConfig {
        engine_path,
        output_dir,
        max_concurrent,
        task_timeout,
        result_ttl,
    };
    info!(?tc_config, upload_dir = %upload_dir.display(), "transcoder configured");

    let router = Arc::new(SessionEventRouter::new());
    let app_state = mediaconv_server::state::AppState {
        converter: ConversionService::new(tc_config, router),
        upload_dir,
    };

    let app = mediaconv_server::routes::build_router(app_state);

    let bind_addr = std::env::var("MEDIACONV_BIND").unwrap_or_else(|_| {
        let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
        format!("0.0.0.0:{port}")
    });
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .context("failed to bind")?;
    info!(addr = %bind_addr, "server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

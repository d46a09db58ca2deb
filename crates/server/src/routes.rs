use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::header;
use axum::response::Response;
use axum::routing::{get, post};
use mediaconv_core::error::ApiError;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::AppError;
use crate::state::AppState;
use crate::upload::read_conversion_form;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/convert", post(convert))
        .route("/convert-batch", post(convert_batch))
        .route("/events/{session_id}", get(crate::events::session_events))
        .route("/output/{file}", get(crate::output::serve_output))
        .route("/download-batch/{session_id}", get(download_batch))
        .route("/formats", get(formats))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::disable()),
        )
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    engine: String,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        engine: state
            .converter
            .config()
            .engine_path
            .to_string_lossy()
            .into_owned(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionStarted {
    session_id: String,
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

async fn convert(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SessionStarted>, AppError> {
    let form = read_conversion_form(multipart, &state.upload_dir).await?;
    let declared = form.declared_kind();

    let mut files = form.files.into_iter();
    let Some(file) = files.next() else {
        return Err(ApiError::BadRequest("No file uploaded".into()).into());
    };
    if files.len() > 0 {
        warn!(extra = files.len(), "single conversion received extra files, ignoring them");
    }

    let session_id = state.converter.start_single(file, form.options, declared)?;
    info!(session_id = %session_id, "conversion accepted");
    Ok(Json(SessionStarted { session_id }))
}

async fn convert_batch(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<SessionStarted>, AppError> {
    let form = read_conversion_form(multipart, &state.upload_dir).await?;
    let declared = form.declared_kind();
    let total = form.files.len();

    let session_id = state
        .converter
        .start_batch(form.files, form.options, declared)?;
    info!(session_id = %session_id, total, "batch accepted");
    Ok(Json(SessionStarted { session_id }))
}

// ---------------------------------------------------------------------------
// Batch archive
// ---------------------------------------------------------------------------

async fn download_batch(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Response, AppError> {
    let archive = state.converter.build_archive(&session_id).await?;
    let file = tokio::fs::File::from_std(archive.file);

    Response::builder()
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"converted_{session_id}.zip\""),
        )
        .header(header::CONTENT_LENGTH, archive.len.to_string())
        .body(Body::from_stream(tokio_util::io::ReaderStream::new(file)))
        .map_err(|e| ApiError::Internal(format!("response error: {e}")).into())
}

// ---------------------------------------------------------------------------
// Engine info
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct FormatsResponse {
    output: String,
}

async fn formats(State(state): State<AppState>) -> Result<Json<FormatsResponse>, AppError> {
    let output =
        mediaconv_transcoder::formats::list_formats(&state.converter.config().engine_path).await?;
    Ok(Json(FormatsResponse { output }))
}

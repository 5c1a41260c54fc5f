use std::sync::Arc;

use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::backend::TikaClient;
use crate::convert::ConvertOptions;
use crate::error::PipelineError;
use crate::models::{HealthResponse, UploadedDocument};
use crate::pipeline;
use crate::response;

const FILE_FIELD: &str = "file";

#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<TikaClient>,
    pub options: ConvertOptions,
}

impl AppState {
    pub fn new(backend: TikaClient, options: ConvertOptions) -> Self {
        Self {
            backend: Arc::new(backend),
            options,
        }
    }
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/", post(convert_endpoint))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn convert_endpoint(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let result = async {
        let multipart = multipart.map_err(|e| upload_error(e.status(), e))?;
        let doc = read_upload(multipart).await?;
        let upload_bytes = doc.bytes.len();
        let file_name = doc.file_name.clone();
        let converted = pipeline::convert_document(&state.backend, &state.options, doc).await?;
        Ok::<_, PipelineError>((converted, upload_bytes, file_name))
    }
    .await;

    match result {
        Ok((converted, upload_bytes, file_name)) => {
            let doc = &converted.conversion.document;
            let assembled = response::assemble(doc, converted.title.as_deref());
            tracing::info!(
                file = file_name.as_deref().unwrap_or("-"),
                title = converted.title.as_deref().unwrap_or("-"),
                upload_bytes,
                resources = converted.resources,
                blocks = doc.blocks.len(),
                images_inlined = converted.conversion.stats.images_inlined,
                images_unresolved = converted.conversion.stats.images_unresolved,
                markdown_bytes = assembled.bytes,
                "converted document"
            );
            assembled.response
        }
        Err(e) => {
            match &e {
                PipelineError::InvalidInput(_) => tracing::info!(error = %e, "rejected upload"),
                _ => tracing::warn!(error = %e, "conversion failed"),
            }
            e.into_response()
        }
    }
}

/// The bytes of the `file` field; other fields are ignored.
async fn read_upload(mut multipart: Multipart) -> Result<UploadedDocument, PipelineError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| upload_error(e.status(), e))?
    {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let media_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| upload_error(e.status(), e))?;
        if bytes.is_empty() {
            return Err(PipelineError::InvalidInput("empty file".to_string()));
        }
        return Ok(UploadedDocument {
            bytes,
            media_type,
            file_name,
        });
    }
    Err(PipelineError::InvalidInput(format!(
        "missing multipart field '{}'",
        FILE_FIELD
    )))
}

/// A body over the configured limit surfaces as a multipart read error with
/// status 413; name the cause instead of reporting a generic read failure.
fn upload_error(status: StatusCode, e: impl std::fmt::Display) -> PipelineError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        PipelineError::InvalidInput(format!("upload exceeds the size limit: {}", e))
    } else {
        PipelineError::InvalidInput(format!("unreadable upload: {}", e))
    }
}

use axum::http::StatusCode;

/// Failures that abort a conversion request.
///
/// A missing resource for a single image is not represented here: the
/// converter absorbs it and renders the image's alt text only.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("backend unreachable: {0}")]
    BackendUnavailable(String),
    #[error("backend error: {0}")]
    BackendError(String),
    #[error("conversion failed: {0}")]
    InternalConversionFailure(String),
}

impl PipelineError {
    pub fn status(&self) -> StatusCode {
        match self {
            PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            PipelineError::BackendUnavailable(_) | PipelineError::BackendError(_) => {
                StatusCode::BAD_GATEWAY
            }
            PipelineError::InternalConversionFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for PipelineError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PipelineError::BackendUnavailable(format!("TimeoutError: {}", e))
        } else if e.is_connect() {
            PipelineError::BackendUnavailable(format!("ConnectError: {}", e))
        } else if e.is_status() {
            PipelineError::BackendError(e.to_string())
        } else {
            PipelineError::BackendUnavailable(format!("RequestError: {}", e))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

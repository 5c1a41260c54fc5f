use axum::http::{header, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};

use crate::error::PipelineError;
use crate::models::MarkdownDocument;

pub const MARKDOWN_CONTENT_TYPE: &str = "text/markdown; charset=utf-8";
const ERROR_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

pub static DOCUMENT_TITLE_HEADER: HeaderName = HeaderName::from_static("x-document-title");

/// Successful conversion response and the size of its body.
pub struct Assembled {
    pub response: Response,
    pub bytes: usize,
}

/// Join the blocks into the Markdown body and wrap it in a `200` response.
pub fn assemble(doc: &MarkdownDocument, title: Option<&str>) -> Assembled {
    let body = doc.to_text();
    let bytes = body.len();

    let mut response = ([(header::CONTENT_TYPE, MARKDOWN_CONTENT_TYPE)], body).into_response();
    if let Some(value) = title.and_then(title_header_value) {
        response
            .headers_mut()
            .insert(DOCUMENT_TITLE_HEADER.clone(), value);
    }

    Assembled { response, bytes }
}

/// Header values must be visible ASCII; other titles are only logged.
fn title_header_value(title: &str) -> Option<HeaderValue> {
    let title = title.trim();
    if title.is_empty() || !title.chars().all(|c| c == ' ' || c.is_ascii_graphic()) {
        return None;
    }
    HeaderValue::from_str(title).ok()
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match &self {
            PipelineError::InternalConversionFailure(_) => "internal conversion failure".to_string(),
            other => other.to_string(),
        };
        (status, [(header::CONTENT_TYPE, ERROR_CONTENT_TYPE)], detail).into_response()
    }
}

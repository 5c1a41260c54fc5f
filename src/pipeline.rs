use crate::backend::TikaClient;
use crate::convert::{convert_with, Conversion, ConvertOptions};
use crate::error::PipelineError;
use crate::models::{ExtractionResult, UploadedDocument};
use crate::resources::ResourceIndex;

/// Everything the response needs from one conversion.
pub struct Converted {
    pub conversion: Conversion,
    pub title: Option<String>,
    pub resources: usize,
}

/// Fetch both extraction artifacts, index the resources and convert.
///
/// Empty uploads are rejected before the backend is contacted.
pub async fn convert_document(
    backend: &TikaClient,
    options: &ConvertOptions,
    doc: UploadedDocument,
) -> Result<Converted, PipelineError> {
    if doc.bytes.is_empty() {
        return Err(PipelineError::InvalidInput("empty file".to_string()));
    }

    let (rendering, mut archive) = backend.fetch_all(&doc).await?;
    let title = rendering.title().map(str::to_string);
    let ExtractionResult {
        html,
        metadata,
        embedded,
    } = rendering;
    archive.apply_declared_types(&embedded);
    let resources = archive.len();

    tracing::debug!(
        metadata_keys = metadata.len(),
        embedded = embedded.len(),
        resources,
        html_bytes = html.len(),
        "backend extraction complete"
    );

    let options = options.clone();
    let conversion = tokio::task::spawn_blocking(move || {
        let index = ResourceIndex::build(archive);
        convert_with(&html, &index, &options)
    })
    .await
    .map_err(|e| {
        tracing::error!(error = %e, "conversion task failed");
        PipelineError::InternalConversionFailure(e.to_string())
    })?;

    Ok(Converted {
        conversion,
        title,
        resources,
    })
}

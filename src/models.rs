use std::collections::HashMap;

use axum::body::Bytes;
use serde::Serialize;

/// Raw upload as received from the multipart field.
#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub bytes: Bytes,
    pub media_type: Option<String>,
    pub file_name: Option<String>,
}

/// Rendering returned by the backend's rich-text extraction call.
#[derive(Debug, Clone, Default)]
pub struct ExtractionResult {
    pub html: String,
    pub metadata: HashMap<String, String>,
    /// Metadata records of embedded resources, in backend order.
    pub embedded: Vec<EmbeddedRecord>,
}

impl ExtractionResult {
    pub fn title(&self) -> Option<&str> {
        ["dc:title", "title"]
            .iter()
            .find_map(|k| self.metadata.get(*k))
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
    }
}

/// What the rendering call says about one embedded resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedRecord {
    pub resource_name: String,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceEntry {
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// Embedded resources unpacked from the backend's archive, in archive order.
#[derive(Debug, Clone, Default)]
pub struct ResourceArchive {
    pub entries: Vec<ResourceEntry>,
}

impl ResourceArchive {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Prefer the content types the rendering declared for embedded resources
    /// over whatever was sniffed from the bytes.
    pub fn apply_declared_types(&mut self, records: &[EmbeddedRecord]) {
        if records.is_empty() {
            return;
        }
        let declared: HashMap<String, &str> = records
            .iter()
            .filter_map(|r| {
                let ct = r.content_type.as_deref()?;
                Some((basename(&r.resource_name).to_lowercase(), ct))
            })
            .collect();
        for entry in &mut self.entries {
            if let Some(ct) = declared.get(&basename(&entry.name).to_lowercase()) {
                entry.content_type = Some(media_type_only(ct));
            }
        }
    }
}

/// Ordered Markdown blocks; each block is valid on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkdownDocument {
    pub blocks: Vec<String>,
}

impl MarkdownDocument {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Blocks separated by one blank line, newline-terminated.
    pub fn to_text(&self) -> String {
        if self.blocks.is_empty() {
            return String::new();
        }
        let mut out = self.blocks.join("\n\n");
        out.push('\n');
        out
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Final path segment, accepting both `/` and `\` separators.
pub fn basename(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}

/// `image/png; charset=...` → `image/png`
fn media_type_only(ct: &str) -> String {
    ct.split(';').next().unwrap_or(ct).trim().to_string()
}

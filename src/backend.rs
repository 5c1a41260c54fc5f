use std::collections::HashMap;
use std::io::{Cursor, Read};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use reqwest::StatusCode;
use serde_json::Value;

use crate::config::Config;
use crate::error::PipelineError;
use crate::models::{
    EmbeddedRecord, ExtractionResult, ResourceArchive, ResourceEntry, UploadedDocument,
};

// ── Constants ────────────────────────────────────────────────────────────────

const USER_AGENT: &str = concat!("tika2md/", env!("CARGO_PKG_VERSION"));
const RMETA_PATH: &str = "rmeta";
const UNPACK_PATH: &str = "unpack/all";
const CONTENT_KEY: &str = "X-TIKA:content";
const RESOURCE_NAME_KEYS: &[&str] = &[
    "resourceName",
    "X-TIKA:embedded_resource_path",
    "X-TIKA:embedded_resource_name",
];

// ── Lazy static regexes ──────────────────────────────────────────────────────

/// Decimal NUL refs need the `;`. The hex form may omit it, but only when no
/// further hex digit follows, so `&#x00A0;` is left alone.
static NUL_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)&#0+;|&#x0+(;|[^0-9a-f;]|$)").unwrap());

static CONTROL_CHAR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F]").unwrap());

// ── Client ───────────────────────────────────────────────────────────────────

/// HTTP client for the Tika server. Built once from [`Config`] and shared by
/// every request.
#[derive(Debug, Clone)]
pub struct TikaClient {
    http: reqwest::Client,
    base: String,
    max_resource_bytes: u64,
}

impl TikaClient {
    pub fn new(config: &Config) -> Result<Self, PipelineError> {
        let http = reqwest::ClientBuilder::new()
            .connect_timeout(config.connect_timeout)
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PipelineError::InternalConversionFailure(e.to_string()))?;

        Ok(Self {
            http,
            base: config.tika_server.as_str().trim_end_matches('/').to_string(),
            max_resource_bytes: config.max_resource_bytes,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    fn put(&self, path: &str, doc: &UploadedDocument) -> reqwest::RequestBuilder {
        let mut request = self.http.put(self.endpoint(path)).body(doc.bytes.clone());
        if let Some(media_type) = doc
            .media_type
            .as_deref()
            .filter(|m| !m.is_empty() && !m.eq_ignore_ascii_case("application/octet-stream"))
        {
            request = request.header(reqwest::header::CONTENT_TYPE, media_type);
        }
        request
    }

    /// Both backend calls, issued concurrently. The first failure wins and
    /// drops the other in-flight call.
    pub async fn fetch_all(
        &self,
        doc: &UploadedDocument,
    ) -> Result<(ExtractionResult, ResourceArchive), PipelineError> {
        tokio::try_join!(self.fetch_rendering(doc), self.fetch_resources(doc))
    }

    /// Rendering call: main document HTML plus metadata, via `/rmeta`.
    pub async fn fetch_rendering(
        &self,
        doc: &UploadedDocument,
    ) -> Result<ExtractionResult, PipelineError> {
        let response = self
            .put(RMETA_PATH, doc)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "rendering request failed");
                PipelineError::from(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(%status, "rendering call returned an error status");
            return Err(PipelineError::BackendError(format!(
                "rendering call returned {}",
                status
            )));
        }

        let text = response.text().await.map_err(PipelineError::from)?;
        parse_rmeta(&text)
    }

    /// Resource call: every embedded resource as a zip, via `/unpack/all`.
    ///
    /// An answer that is not a readable zip is an empty archive, not an
    /// error, so the text can still be converted.
    pub async fn fetch_resources(
        &self,
        doc: &UploadedDocument,
    ) -> Result<ResourceArchive, PipelineError> {
        let response = self
            .put(UNPACK_PATH, doc)
            .header(reqwest::header::ACCEPT, "application/zip")
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "resource request failed");
                PipelineError::from(e)
            })?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(ResourceArchive::default());
        }
        if !status.is_success() {
            tracing::warn!(%status, "resource call returned an error status");
            return Err(PipelineError::BackendError(format!(
                "resource call returned {}",
                status
            )));
        }

        let bytes = response.bytes().await.map_err(PipelineError::from)?;
        let max = self.max_resource_bytes;
        tokio::task::spawn_blocking(move || read_archive(&bytes, max))
            .await
            .map_err(|e| PipelineError::InternalConversionFailure(e.to_string()))
    }
}

// ── Rendering payload ────────────────────────────────────────────────────────

/// Parse an `/rmeta` body: a JSON array of records, a single record, or one
/// record per line.
pub fn parse_rmeta(text: &str) -> Result<ExtractionResult, PipelineError> {
    let records: Vec<serde_json::Map<String, Value>> = match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => items.into_iter().filter_map(into_object).collect(),
        Ok(Value::Object(map)) => vec![map],
        Ok(_) => {
            return Err(PipelineError::BackendError(
                "rendering payload is not a metadata record".to_string(),
            ))
        }
        Err(_) => {
            let records: Vec<_> = text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .filter_map(|l| serde_json::from_str::<Value>(l).ok())
                .filter_map(into_object)
                .collect();
            if records.is_empty() && !text.trim().is_empty() {
                return Err(PipelineError::BackendError(
                    "rendering payload is not valid JSON".to_string(),
                ));
            }
            records
        }
    };

    let mut records = records.into_iter();
    let Some(main) = records.next() else {
        return Ok(ExtractionResult::default());
    };

    let html = main
        .get(CONTENT_KEY)
        .and_then(Value::as_str)
        .map(sanitize_html)
        .unwrap_or_default();

    let metadata: HashMap<String, String> = main
        .iter()
        .filter(|(k, _)| k.as_str() != CONTENT_KEY)
        .filter_map(|(k, v)| flatten_value(v).map(|v| (k.clone(), v)))
        .collect();

    let embedded = records
        .filter_map(|record| {
            let resource_name = RESOURCE_NAME_KEYS
                .iter()
                .find_map(|k| record.get(*k).and_then(flatten_value))?;
            let content_type = record.get("Content-Type").and_then(flatten_value);
            Some(EmbeddedRecord {
                resource_name,
                content_type,
            })
        })
        .collect();

    Ok(ExtractionResult {
        html,
        metadata,
        embedded,
    })
}

fn into_object(value: Value) -> Option<serde_json::Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn flatten_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(flatten_value).collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join(", "))
            }
        }
        _ => None,
    }
}

/// Strip NUL character references and control characters that would leak
/// into the Markdown output.
pub fn sanitize_html(html: &str) -> String {
    let html = NUL_REF_RE.replace_all(html, |caps: &Captures| match caps.get(1) {
        Some(next) if next.as_str() != ";" => next.as_str().to_string(),
        _ => String::new(),
    });
    CONTROL_CHAR_RE.replace_all(&html, "").into_owned()
}

// ── Resource archive ─────────────────────────────────────────────────────────

/// Decode an `/unpack/all` zip. Never fails: unreadable archives and entries
/// are logged and skipped.
pub fn read_archive(bytes: &[u8], max_entry_bytes: u64) -> ResourceArchive {
    if bytes.is_empty() {
        return ResourceArchive::default();
    }

    let mut zip = match zip::ZipArchive::new(Cursor::new(bytes)) {
        Ok(zip) => zip,
        Err(e) => {
            tracing::warn!(error = %e, "resource archive is not a readable zip, ignoring it");
            return ResourceArchive::default();
        }
    };

    let mut entries = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let mut file = match zip.by_index(i) {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!(index = i, error = %e, "skipping unreadable archive entry");
                continue;
            }
        };
        if file.is_dir() {
            continue;
        }
        let name = file.name().to_string();
        if file.size() > max_entry_bytes {
            tracing::warn!(name = %name, size = file.size(), "archive entry too large, skipping");
            continue;
        }

        let mut data = Vec::with_capacity(file.size() as usize);
        if let Err(e) = file.read_to_end(&mut data) {
            tracing::debug!(name = %name, error = %e, "failed to read archive entry");
            continue;
        }

        let content_type = sniff_content_type(&data)
            .or_else(|| content_type_from_extension(&name))
            .map(str::to_string);
        tracing::debug!(name = %name, bytes = data.len(), content_type = ?content_type, "archive entry");
        entries.push(ResourceEntry {
            name,
            bytes: data,
            content_type,
        });
    }

    ResourceArchive { entries }
}

/// Content type from magic bytes, for the common raster formats.
pub fn sniff_content_type(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if data.starts_with(b"BM") && data.len() > 14 {
        Some("image/bmp")
    } else if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        Some("image/webp")
    } else if data.starts_with(b"II*\0") || data.starts_with(b"MM\0*") {
        Some("image/tiff")
    } else {
        None
    }
}

fn content_type_from_extension(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1.to_lowercase();
    let ct = match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" | "jpe" => "image/jpeg",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        "tif" | "tiff" => "image/tiff",
        "svg" => "image/svg+xml",
        "emf" => "image/emf",
        "wmf" => "image/wmf",
        _ => return None,
    };
    Some(ct)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::FileOptions;

    fn build_zip(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in files {
            writer.start_file(*name, FileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn rmeta_array_splits_main_and_embedded() {
        let payload = r#"[
            {"X-TIKA:content": "<html><body><p>Hi</p></body></html>",
             "dc:title": "Report", "Author": ["A", "B"], "xmpTPg:NPages": 3},
            {"resourceName": "image0.jpg", "Content-Type": "image/jpeg"},
            {"X-TIKA:embedded_resource_path": "/image1.png"}
        ]"#;
        let result = parse_rmeta(payload).unwrap();
        assert!(result.html.contains("<p>Hi</p>"));
        assert_eq!(result.metadata.get("dc:title").unwrap(), "Report");
        assert_eq!(result.metadata.get("Author").unwrap(), "A, B");
        assert_eq!(result.metadata.get("xmpTPg:NPages").unwrap(), "3");
        assert!(!result.metadata.contains_key(CONTENT_KEY));
        assert_eq!(
            result.embedded,
            vec![
                EmbeddedRecord {
                    resource_name: "image0.jpg".into(),
                    content_type: Some("image/jpeg".into()),
                },
                EmbeddedRecord {
                    resource_name: "/image1.png".into(),
                    content_type: None,
                },
            ]
        );
    }

    #[test]
    fn rmeta_single_object_and_ndjson() {
        let single = parse_rmeta(r#"{"X-TIKA:content": "<p>One</p>"}"#).unwrap();
        assert_eq!(single.html, "<p>One</p>");

        let ndjson = "{\"X-TIKA:content\": \"<p>Two</p>\"}\nnot json\n{\"resourceName\": \"a.png\"}\n";
        let result = parse_rmeta(ndjson).unwrap();
        assert_eq!(result.html, "<p>Two</p>");
        assert_eq!(result.embedded.len(), 1);
    }

    #[test]
    fn rmeta_garbage_is_backend_error() {
        assert!(matches!(
            parse_rmeta("<html>oops</html>"),
            Err(PipelineError::BackendError(_))
        ));
        assert!(matches!(parse_rmeta("42"), Err(PipelineError::BackendError(_))));
    }

    #[test]
    fn rmeta_empty_list_is_empty_rendering() {
        let result = parse_rmeta("[]").unwrap();
        assert!(result.html.is_empty());
        assert!(result.metadata.is_empty());
    }

    #[test]
    fn sanitize_removes_nul_refs_and_controls() {
        let dirty = "<p>a&#0;b&#x00;c\u{0001}d\te\nf</p>";
        assert_eq!(sanitize_html(dirty), "<p>abcd\te\nf</p>");
    }

    #[test]
    fn sanitize_keeps_zero_padded_hex_refs() {
        assert_eq!(
            sanitize_html("<p>a&#x00A0;b &#x0041;</p>"),
            "<p>a&#x00A0;b &#x0041;</p>"
        );
        assert_eq!(sanitize_html("<p>x&#x0 y&#X00</p>"), "<p>x y</p>");
    }

    #[test]
    fn archive_entries_keep_order_and_types() {
        let png = b"\x89PNG\r\n\x1a\nrest";
        let zip = build_zip(&[
            ("images/fig1.png", &png[..]),
            ("img0.jpg", &b"not really a jpeg"[..]),
            ("notes.bin", &b"\x00\x01"[..]),
        ]);
        let archive = read_archive(&zip, u64::MAX);
        let names: Vec<_> = archive.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["images/fig1.png", "img0.jpg", "notes.bin"]);
        assert_eq!(archive.entries[0].content_type.as_deref(), Some("image/png"));
        assert_eq!(archive.entries[0].bytes, png);
        assert_eq!(archive.entries[1].content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(archive.entries[2].content_type, None);
    }

    #[test]
    fn unreadable_archive_is_empty() {
        assert!(read_archive(b"definitely not a zip", u64::MAX).is_empty());
        assert!(read_archive(b"", u64::MAX).is_empty());
    }

    #[test]
    fn oversized_entries_are_skipped() {
        let zip = build_zip(&[("big.png", &[0u8; 64][..]), ("small.png", &[0u8; 4][..])]);
        let archive = read_archive(&zip, 16);
        assert_eq!(archive.len(), 1);
        assert_eq!(archive.entries[0].name, "small.png");
    }

    #[test]
    fn sniffing_recognizes_common_formats() {
        assert_eq!(sniff_content_type(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_content_type(b"GIF89a...."), Some("image/gif"));
        assert_eq!(sniff_content_type(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_content_type(b"plain"), None);
    }
}

//! HTTP service that turns any document Apache Tika can parse into one
//! self-contained Markdown file, with embedded images inlined as `data:` URIs.

pub mod backend;
pub mod cleanup;
pub mod config;
pub mod convert;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod resources;
pub mod response;
pub mod server;

pub use config::Config;
pub use convert::{convert, convert_with, ConvertOptions};
pub use error::PipelineError;
pub use models::{MarkdownDocument, ResourceArchive, ResourceEntry};
pub use resources::ResourceIndex;

//! Opaque collaborator seams.
//!
//! The orchestrator drives three black boxes it does not implement: a
//! source fetcher, a markdown converter and a PDF page splitter. Concrete
//! adapters live with the deployment (the server crate ships command-line
//! and HTTP adapters); tests script their own fakes.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::EngineResult;
use crate::job::{ConvertOptions, SourceSpec};

/// What a converter hands back for one document or page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertOutput {
    pub markdown: String,
    pub title: Option<String>,
    pub author: Option<String>,
}

/// Materializes a source document on the local filesystem.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Resolve `source` to a local file, downloading into `dest_dir` when
    /// the source is remote. Errors map to `fetch_failed`.
    async fn fetch(&self, source: &SourceSpec, dest_dir: &Path) -> EngineResult<PathBuf>;
}

/// Converts one local document (or page) to markdown.
#[async_trait]
pub trait DocumentConverter: Send + Sync {
    /// Errors map to `convert_failed` and carry the converter's message.
    async fn convert(&self, path: &Path, options: &ConvertOptions) -> EngineResult<ConvertOutput>;
}

/// Splits a PDF into one file per page.
#[async_trait]
pub trait PageSplitter: Send + Sync {
    /// Number of pages in the PDF, probed without splitting.
    async fn page_count(&self, path: &Path) -> EngineResult<u32>;

    /// Write one file per page into `out_dir`, returned in page order.
    /// Errors map to `split_failed`.
    async fn split(&self, path: &Path, out_dir: &Path) -> EngineResult<Vec<PathBuf>>;
}

//! Concrete collaborator adapters.
//!
//! The engine treats the fetcher, converter and splitter as black boxes.
//! This deployment resolves uploads and local paths directly, downloads
//! URL sources over HTTP(S), and shells out to external tools for the
//! conversion and split steps (`markitdown` and `qpdf` by default).

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;
use uuid::Uuid;

use pagesmith_core::convert::{ConvertOutput, DocumentConverter, PageSplitter, SourceFetcher};
use pagesmith_core::error::{EngineError, EngineResult};
use pagesmith_core::job::SourceSpec;

/// Resolves uploads and local paths, downloads URL sources.
pub struct HttpFetcher {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            client: reqwest::Client::new(),
            max_bytes,
        }
    }

    async fn download(&self, url: &str, dest_dir: &Path) -> EngineResult<PathBuf> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(EngineError::FetchFailed(format!(
                "only http(s) sources are supported: {url}"
            )));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| EngineError::FetchFailed(err.to_string()))?;
        if !response.status().is_success() {
            return Err(EngineError::FetchFailed(format!(
                "remote returned {} for {url}",
                response.status()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| EngineError::FetchFailed(err.to_string()))?;
        if bytes.len() as u64 > self.max_bytes {
            return Err(EngineError::FetchFailed(format!(
                "remote document exceeds the {} byte limit",
                self.max_bytes
            )));
        }

        let filename = url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty() && !name.contains('?'))
            .unwrap_or("download.bin");
        let path = dest_dir.join(format!("source-{}-{}", Uuid::new_v4(), sanitize(filename)));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|err| EngineError::FetchFailed(format!("cannot spool download: {err}")))?;
        debug!(url, bytes = bytes.len(), path = %path.display(), "downloaded source");
        Ok(path)
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch(&self, source: &SourceSpec, dest_dir: &Path) -> EngineResult<PathBuf> {
        match source {
            SourceSpec::Upload { path, .. } | SourceSpec::LocalPath { path } => {
                tokio::fs::metadata(path).await.map_err(|err| {
                    EngineError::FetchFailed(format!("{}: {err}", path.display()))
                })?;
                Ok(path.clone())
            }
            SourceSpec::Url { url } => self.download(url, dest_dir).await,
        }
    }
}

/// Runs an external converter command, reading markdown from stdout.
pub struct CommandConverter {
    command: Vec<String>,
}

impl CommandConverter {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl DocumentConverter for CommandConverter {
    async fn convert(
        &self,
        path: &Path,
        _options: &pagesmith_core::job::ConvertOptions,
    ) -> EngineResult<ConvertOutput> {
        let Some((program, args)) = self.command.split_first() else {
            return Err(EngineError::ConvertFailed(
                "no converter command configured".to_string(),
            ));
        };

        let output = Command::new(program)
            .args(args)
            .arg(path)
            .output()
            .await
            .map_err(|err| EngineError::Internal(format!("cannot spawn {program}: {err}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::ConvertFailed(
                stderr.trim().lines().last().unwrap_or("converter failed").to_string(),
            ));
        }

        let markdown = String::from_utf8_lossy(&output.stdout).into_owned();
        let title = markdown
            .lines()
            .find_map(|line| line.strip_prefix("# "))
            .map(str::to_string);
        Ok(ConvertOutput {
            markdown,
            title,
            author: None,
        })
    }
}

/// Shells out to an external tool for page counting and page splitting.
pub struct CommandSplitter {
    split_command: Vec<String>,
    page_count_command: Vec<String>,
}

impl CommandSplitter {
    pub fn new(split_command: Vec<String>, page_count_command: Vec<String>) -> Self {
        Self {
            split_command,
            page_count_command,
        }
    }
}

#[async_trait]
impl PageSplitter for CommandSplitter {
    async fn page_count(&self, path: &Path) -> EngineResult<u32> {
        let Some((program, args)) = self.page_count_command.split_first() else {
            return Err(EngineError::SplitFailed(
                "no page-count command configured".to_string(),
            ));
        };

        let output = Command::new(program)
            .args(args)
            .arg(path)
            .output()
            .await
            .map_err(|err| EngineError::Internal(format!("cannot spawn {program}: {err}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::SplitFailed(
                stderr.trim().lines().last().unwrap_or("page count failed").to_string(),
            ));
        }

        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .map_err(|_| EngineError::SplitFailed("unreadable page count".to_string()))
    }

    async fn split(&self, path: &Path, out_dir: &Path) -> EngineResult<Vec<PathBuf>> {
        let Some((program, args)) = self.split_command.split_first() else {
            return Err(EngineError::SplitFailed(
                "no split command configured".to_string(),
            ));
        };

        let pattern = out_dir.join("page-%d.pdf");
        let output = Command::new(program)
            .args(args)
            .arg(path)
            .arg(&pattern)
            .output()
            .await
            .map_err(|err| EngineError::Internal(format!("cannot spawn {program}: {err}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::SplitFailed(
                stderr.trim().lines().last().unwrap_or("split failed").to_string(),
            ));
        }

        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(out_dir)
            .await
            .map_err(|err| EngineError::SplitFailed(err.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| EngineError::SplitFailed(err.to_string()))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "pdf") {
                pages.push(path);
            }
        }
        pages.sort_by_key(|path| page_index(path));
        Ok(pages)
    }
}

/// Numeric ordering for `page-<n>.pdf` style names; zero-padded or not.
fn page_index(path: &Path) -> u64 {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(|stem| {
            stem.chars()
                .filter(char::is_ascii_digit)
                .collect::<String>()
        })
        .and_then(|digits| digits.parse().ok())
        .unwrap_or(u64::MAX)
}

fn sanitize(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

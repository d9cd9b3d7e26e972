//! Server configuration, loaded from environment variables at startup.

use pagesmith_core::EngineConfig;

/// Configuration for the control plane process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// SQLite database path, or the literal `memory` for the in-memory store.
    pub db_path: String,
    /// Emit JSON log lines instead of the human format.
    pub log_json: bool,
    /// External converter command; the document path is appended.
    pub convert_command: Vec<String>,
    /// External split command; input path and output pattern are appended.
    pub split_command: Vec<String>,
    /// External page-count command; the document path is appended.
    pub page_count_command: Vec<String>,
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            db_path: "pagesmith.db".to_string(),
            log_json: false,
            convert_command: vec!["markitdown".to_string()],
            split_command: vec!["qpdf".to_string(), "--split-pages=1".to_string()],
            page_count_command: vec!["qpdf".to_string(), "--show-npages".to_string()],
            engine: EngineConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("PAGESMITH_HOST").unwrap_or(defaults.host),
            port: std::env::var("PAGESMITH_PORT")
                .ok()
                .and_then(|value| value.parse().ok())
                .unwrap_or(defaults.port),
            db_path: std::env::var("PAGESMITH_DB").unwrap_or(defaults.db_path),
            log_json: std::env::var("PAGESMITH_LOG_JSON")
                .map(|value| value.eq_ignore_ascii_case("true"))
                .unwrap_or(defaults.log_json),
            convert_command: command_var("PAGESMITH_CONVERT_CMD")
                .unwrap_or(defaults.convert_command),
            split_command: command_var("PAGESMITH_SPLIT_CMD").unwrap_or(defaults.split_command),
            page_count_command: command_var("PAGESMITH_PAGE_COUNT_CMD")
                .unwrap_or(defaults.page_count_command),
            engine: EngineConfig::from_env(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn command_var(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    let parts: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    (!parts.is_empty()).then_some(parts)
}

use std::path::PathBuf;
use std::time::Duration;

/// Process-level configuration read from the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Memory stores are used when unset.
    pub database_url: Option<String>,
    /// Fixture pages are used when unset.
    pub source_url: Option<String>,
    pub source_token: Option<String>,
    pub fixtures_dir: PathBuf,
    pub reference_file: PathBuf,
    pub artifacts_dir: Option<PathBuf>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub web_port: u16,
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: non_empty_var("DATABASE_URL"),
            source_url: non_empty_var("VEHISYNC_SOURCE_URL"),
            source_token: non_empty_var("VEHISYNC_SOURCE_TOKEN"),
            fixtures_dir: non_empty_var("VEHISYNC_FIXTURES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("fixtures/sample-source")),
            reference_file: non_empty_var("VEHISYNC_REFERENCE_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("reference_data.yaml")),
            artifacts_dir: non_empty_var("ARTIFACTS_DIR").map(PathBuf::from),
            user_agent: non_empty_var("VEHISYNC_USER_AGENT")
                .unwrap_or_else(|| "vehisync/0.1".to_string()),
            http_timeout_secs: non_empty_var("VEHISYNC_HTTP_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(20),
            web_port: non_empty_var("VEHISYNC_WEB_PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
        }
    }
}

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub page_size: u32,
    /// Hard cap on listing pages per run.
    pub max_pages: u32,
    pub batch_size: usize,
    pub batch_pause: Duration,
    pub max_item_errors: usize,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_pages: 100,
            batch_size: 10,
            batch_pause: Duration::from_millis(500),
            max_item_errors: 50,
        }
    }
}

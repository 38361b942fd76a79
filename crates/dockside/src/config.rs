//! Configuration for the dockside service.
//!
//! Settings come from a TOML file merged with environment-variable
//! overrides, so container deployments can run without a config file at
//! all. Variable names follow the service's historical `.env` surface
//! (`S3_BUCKET_NAME`, `SQS_ENABLED`, `SYNC_INTERVAL_HOURS`, ...).

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub ocr: OcrConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Object store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Bucket holding the documents.
    #[serde(default)]
    pub bucket: String,

    #[serde(default = "default_region")]
    pub region: String,

    /// Key prefixes to scan; empty means the whole bucket.
    #[serde(default)]
    pub prefixes: Vec<String>,

    /// Custom endpoint for S3-compatible services.
    #[serde(default)]
    pub endpoint_url: Option<String>,

    /// Object GET timeout in seconds.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_fetch_timeout() -> u64 {
    60
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: default_region(),
            prefixes: Vec::new(),
            endpoint_url: None,
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

/// Event queue settings.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Full queue URL.
    #[serde(default)]
    pub url: String,

    /// Long-poll wait in seconds, at most 20.
    #[serde(default = "default_wait_time")]
    pub wait_time_secs: u64,

    /// Deliveries before a permanently failing message is acknowledged.
    #[serde(default = "default_max_receives")]
    pub max_receives: u32,
}

fn default_wait_time() -> u64 {
    20
}

fn default_max_receives() -> u32 {
    3
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            wait_time_secs: default_wait_time(),
            max_receives: default_max_receives(),
        }
    }
}

/// OCR engine selection. The choice is fixed for the process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrMode {
    /// Dedicated OCR service taking multipart uploads.
    Fast,
    /// Vision language model behind a chat-completion API.
    Llm,
}

/// OCR settings.
#[derive(Debug, Clone, Deserialize)]
pub struct OcrConfig {
    #[serde(default = "default_ocr_mode")]
    pub mode: OcrMode,

    #[serde(default = "default_fast_endpoint")]
    pub fast_endpoint: String,

    #[serde(default = "default_llm_endpoint")]
    pub llm_endpoint: String,

    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    #[serde(default)]
    pub llm_api_key: Option<String>,

    /// Per page/image timeout in seconds.
    #[serde(default = "default_ocr_timeout")]
    pub timeout_secs: u64,

    /// Extra OCR elision expansions on top of the built-in table.
    #[serde(default)]
    pub extra_elisions: Vec<(String, String)>,
}

fn default_ocr_mode() -> OcrMode {
    OcrMode::Fast
}

fn default_fast_endpoint() -> String {
    "http://localhost:8088/ocr".to_string()
}

fn default_llm_endpoint() -> String {
    "http://localhost:8080/v1/chat/completions".to_string()
}

fn default_llm_model() -> String {
    "qwen2.5-vl-3b-instruct".to_string()
}

fn default_ocr_timeout() -> u64 {
    120
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            mode: default_ocr_mode(),
            fast_endpoint: default_fast_endpoint(),
            llm_endpoint: default_llm_endpoint(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            timeout_secs: default_ocr_timeout(),
            extra_elisions: Vec::new(),
        }
    }
}

/// Embedding service settings.
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    /// Optional batch endpoint; absent means sequential singles.
    #[serde(default)]
    pub batch_endpoint: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,

    /// Concurrent embedding requests across all workers.
    #[serde(default = "default_embedding_concurrency")]
    pub max_concurrent: usize,
}

fn default_embedding_endpoint() -> String {
    "http://localhost:8001/embed".to_string()
}

fn default_embedding_model() -> String {
    "bge-small-en-v1.5".to_string()
}

fn default_embedding_timeout() -> u64 {
    30
}

fn default_embedding_concurrency() -> usize {
    4
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: default_embedding_endpoint(),
            batch_endpoint: None,
            model: default_embedding_model(),
            timeout_secs: default_embedding_timeout(),
            max_concurrent: default_embedding_concurrency(),
        }
    }
}

/// Search index settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    #[serde(default = "default_index_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_index_name")]
    pub name: String,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_index_timeout")]
    pub timeout_secs: u64,
}

fn default_index_endpoint() -> String {
    "http://localhost:9200".to_string()
}

fn default_index_name() -> String {
    "documents_v1".to_string()
}

fn default_index_timeout() -> u64 {
    30
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            endpoint: default_index_endpoint(),
            name: default_index_name(),
            username: None,
            password: None,
            timeout_secs: default_index_timeout(),
        }
    }
}

/// Pipeline and coordinator settings.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Worker lane count.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Ingest the whole bucket at startup before entering queue mode.
    #[serde(default)]
    pub full_scan: bool,

    #[serde(default = "default_reconcile_enabled")]
    pub reconcile_enabled: bool,

    #[serde(default = "default_reconcile_hours")]
    pub reconcile_interval_hours: u64,

    #[serde(default = "default_drain_deadline")]
    pub drain_deadline_secs: u64,

    /// Chunk window size in tokens.
    #[serde(default = "default_chunk_window")]
    pub chunk_window: usize,

    /// Chunk overlap in tokens.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_workers() -> usize {
    4
}

fn default_reconcile_enabled() -> bool {
    true
}

fn default_reconcile_hours() -> u64 {
    6
}

fn default_drain_deadline() -> u64 {
    30
}

fn default_chunk_window() -> usize {
    512
}

fn default_chunk_overlap() -> usize {
    50
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            full_scan: false,
            reconcile_enabled: default_reconcile_enabled(),
            reconcile_interval_hours: default_reconcile_hours(),
            drain_deadline_secs: default_drain_deadline(),
            chunk_window: default_chunk_window(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load from an optional TOML file, then apply environment
    /// overrides, then validate.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
                toml::from_str(&text)
                    .map_err(|e| anyhow::anyhow!("cannot parse {}: {e}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Overlay recognized environment variables.
    fn apply_env(&mut self) {
        env_string("S3_BUCKET_NAME", &mut self.store.bucket);
        env_string("AWS_REGION", &mut self.store.region);
        if let Ok(value) = std::env::var("S3_ENDPOINT_URL") {
            self.store.endpoint_url = Some(value);
        }
        if let Ok(value) = std::env::var("S3_PREFIXES") {
            self.store.prefixes = value
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }

        env_bool("SQS_ENABLED", &mut self.queue.enabled);
        env_string("SQS_QUEUE_URL", &mut self.queue.url);

        if let Ok(value) = std::env::var("USE_LLM_FOR_OCR") {
            self.ocr.mode = if value.trim().eq_ignore_ascii_case("true") {
                OcrMode::Llm
            } else {
                OcrMode::Fast
            };
        }
        env_string("OCR_ENDPOINT", &mut self.ocr.fast_endpoint);
        env_string("LLM_ENDPOINT", &mut self.ocr.llm_endpoint);
        env_string("LLM_MODEL_NAME", &mut self.ocr.llm_model);
        if let Ok(value) = std::env::var("LLM_API_KEY") {
            if !value.is_empty() {
                self.ocr.llm_api_key = Some(value);
            }
        }

        env_string("EMBEDDING_ENDPOINT", &mut self.embedding.endpoint);
        env_string("EMBEDDING_MODEL_NAME", &mut self.embedding.model);
        if let Ok(value) = std::env::var("EMBEDDING_BATCH_ENDPOINT") {
            self.embedding.batch_endpoint = Some(value);
        }

        env_string("ELASTICSEARCH_HOST", &mut self.index.endpoint);
        env_string("ELASTICSEARCH_INDEX", &mut self.index.name);
        if let Ok(value) = std::env::var("ELASTICSEARCH_USERNAME") {
            self.index.username = Some(value);
        }
        if let Ok(value) = std::env::var("ELASTICSEARCH_PASSWORD") {
            self.index.password = Some(value);
        }

        env_bool("FIRST_RUN_FULL_INGEST", &mut self.pipeline.full_scan);
        env_bool("ENABLE_BACKGROUND_SYNC", &mut self.pipeline.reconcile_enabled);
        if let Ok(value) = std::env::var("SYNC_INTERVAL_HOURS") {
            if let Ok(hours) = value.trim().parse() {
                self.pipeline.reconcile_interval_hours = hours;
            }
        }
        if let Ok(value) = std::env::var("PIPELINE_WORKERS") {
            if let Ok(workers) = value.trim().parse() {
                self.pipeline.workers = workers;
            }
        }

        env_string("LOG_LEVEL", &mut self.logging.level);
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.store.bucket.is_empty() {
            anyhow::bail!("store.bucket (or S3_BUCKET_NAME) is required");
        }
        if self.queue.enabled && self.queue.url.is_empty() {
            anyhow::bail!("queue.url (or SQS_QUEUE_URL) is required when the queue is enabled");
        }
        if self.pipeline.chunk_overlap >= self.pipeline.chunk_window {
            anyhow::bail!("pipeline.chunk_overlap must be smaller than pipeline.chunk_window");
        }
        if !self.queue.enabled && !self.pipeline.full_scan && !self.pipeline.reconcile_enabled {
            anyhow::bail!(
                "nothing to do: enable the queue, the full scan, or reconciliation"
            );
        }
        Ok(())
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.pipeline.reconcile_interval_hours * 3600)
    }
}

fn env_string(name: &str, target: &mut String) {
    if let Ok(value) = std::env::var(name) {
        if !value.is_empty() {
            *target = value;
        }
    }
}

fn env_bool(name: &str, target: &mut bool) {
    if let Ok(value) = std::env::var(name) {
        *target = value.trim().eq_ignore_ascii_case("true");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn base_toml() -> &'static str {
        "[store]\nbucket = \"docs\"\n[pipeline]\nfull_scan = true\n"
    }

    #[test]
    fn test_load_minimal_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(base_toml().as_bytes()).unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.store.bucket, "docs");
        assert!(config.pipeline.full_scan);
        assert_eq!(config.pipeline.workers, 4);
        assert_eq!(config.pipeline.reconcile_interval_hours, 6);
        assert_eq!(config.ocr.mode, OcrMode::Fast);
        assert_eq!(config.index.name, "documents_v1");
    }

    #[test]
    fn test_missing_bucket_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[pipeline]\nfull_scan = true\n").unwrap();

        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_queue_enabled_requires_url() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[store]\nbucket = \"docs\"\n[queue]\nenabled = true\n")
            .unwrap();

        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_overlap_must_be_below_window() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            b"[store]\nbucket = \"docs\"\n[pipeline]\nfull_scan = true\nchunk_window = 64\nchunk_overlap = 64\n",
        )
        .unwrap();

        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_idle_configuration_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            b"[store]\nbucket = \"docs\"\n[pipeline]\nreconcile_enabled = false\n",
        )
        .unwrap();

        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn test_reconcile_interval_conversion() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(
            b"[store]\nbucket = \"docs\"\n[pipeline]\nfull_scan = true\nreconcile_interval_hours = 2\n",
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.reconcile_interval(), Duration::from_secs(7200));
    }
}

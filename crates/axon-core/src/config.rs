use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 18600;
pub const DEFAULT_BIND: &str = "0.0.0.0";

/// Ceiling on fenced context characters handed to the LLM per turn.
pub const DEFAULT_CONTEXT_MAX_CHARS: usize = 8_000;
/// Ceiling on retrieved sources included in the prompt.
pub const DEFAULT_CONTEXT_MAX_SOURCES: usize = 5;

/// Top-level config (axon.toml + AXON_* env overrides).
///
/// Loaded once in `main`, validated, then passed by `Arc` into every
/// component. Never mutated after startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxonConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub milvus: MilvusConfig,
    #[serde(default)]
    pub ragflow: RagflowConfig,
    #[serde(default)]
    pub pii: PiiConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Shared bearer token checked on every non-health route.
    /// `None` disables the check (local development only).
    pub auth_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
            auth_token: None,
        }
    }
}

/// OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    pub model: String,
    /// Output dimension the collection was built for.
    pub dimension: usize,
    #[serde(default = "default_ten")]
    pub timeout_secs: u64,
    /// When true, a dimension/metric mismatch at startup aborts the process.
    #[serde(default = "bool_true")]
    pub contract_strict: bool,
}

/// Direct vector-store search backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilvusConfig {
    #[serde(default = "default_milvus_url")]
    pub base_url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_ten")]
    pub timeout_secs: u64,
}

impl Default for MilvusConfig {
    fn default() -> Self {
        Self {
            base_url: default_milvus_url(),
            collection: default_collection(),
            timeout_secs: default_ten(),
        }
    }
}

/// External retrieval-engine backend (`POST /v1/retrieval`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagflowConfig {
    #[serde(default = "default_ragflow_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Dataset id per domain, e.g. `policy = "ds-policy"`.
    #[serde(default)]
    pub dataset_ids: DatasetIds,
    #[serde(default = "default_ten")]
    pub timeout_secs: u64,
}

impl Default for RagflowConfig {
    fn default() -> Self {
        Self {
            base_url: default_ragflow_url(),
            api_key: None,
            dataset_ids: DatasetIds::default(),
            timeout_secs: default_ten(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatasetIds {
    pub policy: Option<String>,
    pub incident: Option<String>,
    pub education: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiConfig {
    #[serde(default = "default_pii_url")]
    pub base_url: String,
    /// Disabled ⇒ INPUT/OUTPUT stages pass text through unmasked.
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_five")]
    pub timeout_secs: u64,
}

impl Default for PiiConfig {
    fn default() -> Self {
        Self {
            base_url: default_pii_url(),
            enabled: true,
            timeout_secs: default_five(),
        }
    }
}

/// The web-application backend: render specs, personalisation facts,
/// completion callbacks, telemetry ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub base_url: String,
    /// Value for the `X-Internal-Token` header on internal calls.
    pub internal_token: String,
    #[serde(default = "default_ten")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `local` writes under `local_root`; `http` PUTs to `base_url/{key}`.
    #[serde(default = "default_storage_mode")]
    pub mode: StorageMode,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_local_root")]
    pub local_root: String,
    /// Prefix for URLs returned to clients.
    #[serde(default)]
    pub public_base_url: Option<String>,
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_secs: u64,
    #[serde(default = "default_upload_attempts")]
    pub upload_attempts: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: default_storage_mode(),
            base_url: None,
            local_root: default_local_root(),
            public_base_url: None,
            upload_timeout_secs: default_upload_timeout(),
            upload_attempts: default_upload_attempts(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    Local,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_tts_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_tts_timeout")]
    pub timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: default_tts_url(),
            api_key: None,
            voice: default_voice(),
            timeout_secs: default_tts_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Per-job temporary directories are created under this root.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg_path: String,
    /// Still-slide rendering is style-dependent; off by default.
    #[serde(default)]
    pub render_slides: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            work_dir: default_work_dir(),
            ffmpeg_path: default_ffmpeg(),
            render_slides: false,
        }
    }
}

/// Which retrieval backend a service uses by default.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RetrieverChoice {
    Milvus,
    Ragflow,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_context_max_chars")]
    pub context_max_chars: usize,
    #[serde(default = "default_context_max_sources")]
    pub context_max_sources: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_retriever")]
    pub retriever: RetrieverChoice,
    #[serde(default = "default_retriever")]
    pub faq_retriever: RetrieverChoice,
    #[serde(default = "default_retriever")]
    pub script_retriever: RetrieverChoice,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Below this classifier confidence the turn is answered with a
    /// clarifying question instead of running retrieval.
    #[serde(default = "default_clarify_threshold")]
    pub clarify_threshold: f32,
    #[serde(default = "default_chat_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retrieval_timeout")]
    pub retrieval_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            context_max_chars: DEFAULT_CONTEXT_MAX_CHARS,
            context_max_sources: DEFAULT_CONTEXT_MAX_SOURCES,
            top_k: default_top_k(),
            retriever: default_retriever(),
            faq_retriever: default_retriever(),
            script_retriever: default_retriever(),
            cache_ttl_secs: default_cache_ttl(),
            cache_capacity: default_cache_capacity(),
            clarify_threshold: default_clarify_threshold(),
            timeout_secs: default_chat_timeout(),
            retrieval_timeout_secs: default_retrieval_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    /// Events POST here when set; otherwise `backend.base_url` is used.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_five")]
    pub timeout_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            timeout_secs: default_five(),
        }
    }
}

impl AxonConfig {
    /// Load config from a TOML file with AXON_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. AXON_CONFIG env var
    ///   3. ./axon.toml
    ///
    /// Env overrides use double-underscore nesting:
    /// `AXON_LLM__BASE_URL`, `AXON_CHAT__CONTEXT_MAX_CHARS`, …
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("AXON_CONFIG").ok())
            .unwrap_or_else(|| "axon.toml".to_string());

        let config: AxonConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("AXON_").split("__"))
            .extract()
            .map_err(|e| crate::error::AxonError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot serve traffic.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.llm.base_url.is_empty() {
            return Err(crate::error::AxonError::Config(
                "llm.base_url must be set".into(),
            ));
        }
        if self.embedding.dimension == 0 {
            return Err(crate::error::AxonError::Config(
                "embedding.dimension must be non-zero".into(),
            ));
        }
        if self.storage.mode == StorageMode::Http && self.storage.base_url.is_none() {
            return Err(crate::error::AxonError::Config(
                "storage.base_url required when storage.mode = \"http\"".into(),
            ));
        }
        Ok(())
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_temperature() -> f32 {
    0.2
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_llm_timeout() -> u64 {
    30
}
fn default_stream_timeout() -> u64 {
    60
}
fn default_five() -> u64 {
    5
}
fn default_ten() -> u64 {
    10
}
fn default_milvus_url() -> String {
    "http://localhost:19530".to_string()
}
fn default_collection() -> String {
    "documents".to_string()
}
fn default_ragflow_url() -> String {
    "http://localhost:9380".to_string()
}
fn default_pii_url() -> String {
    "http://localhost:8600".to_string()
}
fn default_tts_url() -> String {
    "http://localhost:8880".to_string()
}
fn default_voice() -> String {
    "default".to_string()
}
fn default_tts_timeout() -> u64 {
    120
}
fn default_storage_mode() -> StorageMode {
    StorageMode::Local
}
fn default_local_root() -> String {
    "./storage".to_string()
}
fn default_upload_timeout() -> u64 {
    60
}
fn default_upload_attempts() -> u32 {
    3
}
fn default_db_path() -> String {
    "./axon-render.db".to_string()
}
fn default_work_dir() -> String {
    std::env::temp_dir()
        .join("axon-render")
        .to_string_lossy()
        .into_owned()
}
fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}
fn default_context_max_chars() -> usize {
    DEFAULT_CONTEXT_MAX_CHARS
}
fn default_context_max_sources() -> usize {
    DEFAULT_CONTEXT_MAX_SOURCES
}
fn default_top_k() -> usize {
    5
}
fn default_retriever() -> RetrieverChoice {
    RetrieverChoice::Milvus
}
fn default_cache_ttl() -> u64 {
    300
}
fn default_cache_capacity() -> usize {
    512
}
fn default_clarify_threshold() -> f32 {
    0.35
}
fn default_chat_timeout() -> u64 {
    30
}
fn default_retrieval_timeout() -> u64 {
    10
}
fn bool_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> AxonConfig {
        AxonConfig {
            gateway: GatewayConfig::default(),
            llm: LlmConfig {
                base_url: "http://llm".into(),
                api_key: None,
                model: "test-model".into(),
                temperature: default_temperature(),
                max_tokens: default_max_tokens(),
                timeout_secs: default_llm_timeout(),
                stream_timeout_secs: default_stream_timeout(),
            },
            embedding: EmbeddingConfig {
                base_url: "http://emb".into(),
                api_key: None,
                model: "embed".into(),
                dimension: 768,
                timeout_secs: default_ten(),
                contract_strict: true,
            },
            milvus: MilvusConfig::default(),
            ragflow: RagflowConfig::default(),
            pii: PiiConfig::default(),
            backend: BackendConfig {
                base_url: "http://backend".into(),
                internal_token: "secret".into(),
                timeout_secs: default_ten(),
            },
            storage: StorageConfig::default(),
            tts: TtsConfig::default(),
            render: RenderConfig::default(),
            chat: ChatConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }

    #[test]
    fn minimal_config_validates() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn http_storage_requires_base_url() {
        let mut cfg = minimal();
        cfg.storage.mode = StorageMode::Http;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_dimension_rejected() {
        let mut cfg = minimal();
        cfg.embedding.dimension = 0;
        assert!(cfg.validate().is_err());
    }
}

//! Settings schema definitions for kudos.
//!
//! All settings structs use `#[serde(default)]` to allow partial configuration files.
//! Missing fields are filled with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ai::retry::RetryPolicy;
use crate::ai::workflow::checkpoint::{
    CheckpointLimits, DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_TTL_SECS,
};
use crate::ai::workflow::models::{TransitionPolicy, DEFAULT_MAX_DEBUG_ATTEMPTS};
use crate::retrieval::DEFAULT_TOP_K;
use crate::sql::database::DatabaseConfig;
use crate::sql::sandbox::SandboxLimits;

/// Root settings structure.
///
/// Loaded from `~/.kudos/settings.toml` with environment variable interpolation support.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KudosSettings {
    /// Schema version for migrations
    pub version: u32,

    pub ai: AiSettings,
    pub embeddings: EmbeddingSettings,
    pub database: DatabaseSettings,
    pub retrieval: RetrievalSettings,
    pub sandbox: SandboxSettings,
    pub workflow: WorkflowSettings,
    pub schema: SchemaSettings,
    pub advanced: AdvancedSettings,
}

/// Completion provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiProvider {
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
}

impl AiProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            AiProvider::Gemini => "gemini",
            AiProvider::OpenAi => "openai",
        }
    }
}

/// Completion model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    /// "gemini" | "openai"
    pub provider: AiProvider,

    pub model: String,
    pub temperature: f64,
    pub max_tokens: u64,

    /// Falls back to GEMINI_API_KEY / GOOGLE_API_KEY or OPENAI_API_KEY
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Per-attempt timeout for model and embedding calls
    pub request_timeout_secs: u64,

    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl AiSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

/// Where embeddings are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddingBackend {
    /// Provider embedding endpoint via rig
    Remote,
    /// On-device fastembed model (384 dimensions)
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    pub model: String,
    pub dimension: usize,

    /// Model cache for the local backend; defaults to ~/.kudos/models
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<String>,
}

impl EmbeddingSettings {
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| kudos_home().join("models"))
    }

    /// Dimension of the vectors this backend actually produces.
    pub fn effective_dimension(&self) -> usize {
        match self.backend {
            EmbeddingBackend::Remote => self.dimension,
            EmbeddingBackend::Local => crate::ai::embeddings::LOCAL_EMBEDDING_DIM,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Falls back to DATABASE_URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl DatabaseSettings {
    pub fn to_config(&self, url: String) -> DatabaseConfig {
        DatabaseConfig {
            url,
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
        }
    }
}

/// Known-good store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalBackend {
    Postgres,
    Lance,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    /// "postgres" | "lance" | "memory"
    pub backend: RetrievalBackend,

    /// Postgres table holding known-good queries
    pub table: String,

    /// LanceDB directory; defaults to ~/.kudos/known_good
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    pub top_k: usize,
}

impl RetrievalSettings {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| kudos_home().join("known_good"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    pub row_cap: usize,
    pub statement_timeout_secs: u64,
}

impl SandboxSettings {
    pub fn limits(&self) -> SandboxLimits {
        SandboxLimits {
            row_cap: self.row_cap,
            statement_timeout: Duration::from_secs(self.statement_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSettings {
    /// Automatic SQL repairs per turn
    pub max_debug_attempts: u32,

    /// Store questions whose SQL executed successfully as known-good
    pub auto_promote_known_good: bool,

    /// Idle seconds before a conversation checkpoint is dropped
    pub session_ttl_secs: u64,

    /// Conversation checkpoints held in memory
    pub max_sessions: usize,
}

impl WorkflowSettings {
    pub fn transition_policy(&self) -> TransitionPolicy {
        TransitionPolicy::new(self.max_debug_attempts)
    }

    pub fn checkpoint_limits(&self) -> CheckpointLimits {
        CheckpointLimits {
            ttl: Duration::from_secs(self.session_ttl_secs),
            max_sessions: self.max_sessions,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SchemaSettings {
    /// YAML file overriding the built-in schema context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Advanced/debug settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdvancedSettings {
    /// Log level: "error" | "warn" | "info" | "debug" | "trace"
    pub log_level: String,
}

/// `~/.kudos`
pub fn kudos_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".kudos")
}

// =============================================================================
// Default implementations
// =============================================================================

impl Default for KudosSettings {
    fn default() -> Self {
        Self {
            version: 1,
            ai: AiSettings::default(),
            embeddings: EmbeddingSettings::default(),
            database: DatabaseSettings::default(),
            retrieval: RetrievalSettings::default(),
            sandbox: SandboxSettings::default(),
            workflow: WorkflowSettings::default(),
            schema: SchemaSettings::default(),
            advanced: AdvancedSettings::default(),
        }
    }
}

impl Default for AiSettings {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            provider: AiProvider::Gemini,
            model: "gemini-2.0-flash".to_string(),
            temperature: 0.0,
            max_tokens: 2048,
            api_key: None,
            request_timeout_secs: retry.timeout.as_secs(),
            retry_max_attempts: retry.max_attempts,
            retry_base_delay_ms: retry.base_delay.as_millis() as u64,
            retry_max_delay_ms: retry.max_delay.as_millis() as u64,
        }
    }
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Remote,
            model: "text-embedding-004".to_string(),
            dimension: 768,
            cache_dir: None,
        }
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        let config = DatabaseConfig::default();
        Self {
            url: None,
            max_connections: config.max_connections,
            min_connections: config.min_connections,
            acquire_timeout_secs: config.acquire_timeout.as_secs(),
        }
    }
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            backend: RetrievalBackend::Postgres,
            table: crate::retrieval::postgres::DEFAULT_TABLE.to_string(),
            data_dir: None,
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl Default for SandboxSettings {
    fn default() -> Self {
        let limits = SandboxLimits::default();
        Self {
            row_cap: limits.row_cap,
            statement_timeout_secs: limits.statement_timeout.as_secs(),
        }
    }
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            max_debug_attempts: DEFAULT_MAX_DEBUG_ATTEMPTS,
            auto_promote_known_good: false,
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

//! Public configuration types.
//!
//! These are the resolved, ready-to-use structs that subsystems consume.
//! Raw TOML deserialization types live in `raw.rs`.

use std::path::PathBuf;
use std::time::Duration;

use crate::types::UserRole;

// ── Credentials ─────────────────────────────────────────────────────────────

/// API keys resolved from the `[credentials]` table (after `${VAR}` substitution).
///
/// Empty strings are normalised to `None`.
#[derive(Clone, Default)]
pub struct Credentials {
    pub openai_api_key: Option<String>,
    pub perplexity_api_key: Option<String>,
    pub deepgram_api_key: Option<String>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("Credentials")
            .field("openai_api_key", &mask(&self.openai_api_key))
            .field("perplexity_api_key", &mask(&self.perplexity_api_key))
            .field("deepgram_api_key", &mask(&self.deepgram_api_key))
            .finish()
    }
}

// ── LLM ─────────────────────────────────────────────────────────────────────

/// Chat + vision model settings for the OpenAI-compatible provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Active provider name (`"openai"` or `"offline"`).
    pub provider: String,
    pub api_base_url: String,
    pub chat_model: String,
    pub vision_model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

// ── External collaborators ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechProvider {
    Whisper,
    Deepgram,
}

#[derive(Debug, Clone)]
pub struct SpeechConfig {
    pub provider: SpeechProvider,
    pub whisper_url: String,
    pub whisper_model: String,
    pub deepgram_url: String,
    pub deepgram_model: String,
}

#[derive(Debug, Clone)]
pub struct FactCheckConfig {
    pub api_base_url: String,
    pub model: String,
}

// ── Store ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Neo4j,
    Sqlite,
}

#[derive(Clone)]
pub struct Neo4jConfig {
    /// HTTP(S) base URI of the Neo4j server, e.g. `http://localhost:7474`.
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl std::fmt::Debug for Neo4jConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Neo4jConfig")
            .field("uri", &self.uri)
            .field("user", &self.user)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Present only when `backend` is `Neo4j`.
    pub neo4j: Option<Neo4jConfig>,
}

// ── Workflow policy ─────────────────────────────────────────────────────────

/// The three independent workflow switches.
#[derive(Debug, Clone, Copy)]
pub struct FeatureFlags {
    /// Confident, non-sensitive patient cases resolve without a clinician.
    pub autonomous_mode: bool,
    /// Escalations park in the in-app review queue instead of being referred out.
    pub doctor_validation: bool,
    /// Confidence comes from the external fact-checker instead of the judge.
    pub perplexity_check: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct ValidationConfig {
    pub confidence_threshold: f32,
    pub max_retries: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct RetrievalConfig {
    pub similar_case_limit: usize,
    pub relation_limit: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkflowConfig {
    pub step_timeout: Duration,
    pub default_role: UserRole,
}

// ── Comms ───────────────────────────────────────────────────────────────────

/// PTY (console) channel configuration.
#[derive(Debug, Clone)]
pub struct PtyConfig {
    pub enabled: bool,
}

/// Axum HTTP channel configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    /// Socket address to bind the listener to.
    pub bind: String,
}

#[derive(Debug, Clone)]
pub struct CommsConfig {
    pub pty: PtyConfig,
    pub http: HttpConfig,
}

// ── Top-level ───────────────────────────────────────────────────────────────

/// Fully resolved application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: String,
    pub work_dir: PathBuf,
    pub log_level: String,
    pub credentials: Credentials,
    pub llm: LlmConfig,
    pub speech: SpeechConfig,
    pub factcheck: FactCheckConfig,
    pub store: StoreConfig,
    pub features: FeatureFlags,
    pub validation: ValidationConfig,
    pub retrieval: RetrievalConfig,
    pub workflow: WorkflowConfig,
    pub comms: CommsConfig,
}

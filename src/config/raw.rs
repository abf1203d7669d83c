//! Raw TOML deserialization types.
//!
//! These structs mirror the TOML file shape and use `serde` defaults.
//! The `load` module converts them into the public `types` structs.

use serde::Deserialize;

// ── Top-level ────────────────────────────────────────────────────────────────

/// Raw TOML shape, the serde target before resolution.
#[derive(Deserialize)]
pub(super) struct RawConfig {
    pub app: RawApp,
    #[serde(default)]
    pub credentials: RawCredentials,
    #[serde(default)]
    pub llm: RawLlm,
    #[serde(default)]
    pub speech: RawSpeech,
    #[serde(default)]
    pub factcheck: RawFactCheck,
    #[serde(default)]
    pub store: RawStore,
    #[serde(default)]
    pub neo4j: RawNeo4j,
    #[serde(default)]
    pub features: RawFeatures,
    #[serde(default)]
    pub validation: RawValidation,
    #[serde(default)]
    pub retrieval: RawRetrieval,
    #[serde(default)]
    pub workflow: RawWorkflow,
    #[serde(default)]
    pub comms: RawComms,
}

#[derive(Deserialize)]
pub(super) struct RawApp {
    #[serde(default = "default_app_name")]
    pub name: String,
    pub work_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Deserialize, Default)]
pub(super) struct RawCredentials {
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub perplexity_api_key: Option<String>,
    #[serde(default)]
    pub deepgram_api_key: Option<String>,
}

// ── LLM ─────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawLlm {
    #[serde(rename = "default", default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_openai_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for RawLlm {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_base_url: default_openai_api_base_url(),
            chat_model: default_chat_model(),
            vision_model: default_vision_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_seconds: default_llm_timeout_seconds(),
        }
    }
}

// ── External collaborators ──────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawSpeech {
    #[serde(default = "default_speech_provider")]
    pub provider: String,
    #[serde(default = "default_whisper_url")]
    pub whisper_url: String,
    #[serde(default = "default_whisper_model")]
    pub whisper_model: String,
    #[serde(default = "default_deepgram_url")]
    pub deepgram_url: String,
    #[serde(default = "default_deepgram_model")]
    pub deepgram_model: String,
}

impl Default for RawSpeech {
    fn default() -> Self {
        Self {
            provider: default_speech_provider(),
            whisper_url: default_whisper_url(),
            whisper_model: default_whisper_model(),
            deepgram_url: default_deepgram_url(),
            deepgram_model: default_deepgram_model(),
        }
    }
}

#[derive(Deserialize)]
pub(super) struct RawFactCheck {
    #[serde(default = "default_factcheck_url")]
    pub api_base_url: String,
    #[serde(default = "default_factcheck_model")]
    pub model: String,
}

impl Default for RawFactCheck {
    fn default() -> Self {
        Self { api_base_url: default_factcheck_url(), model: default_factcheck_model() }
    }
}

// ── Store ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawStore {
    #[serde(default = "default_store_backend")]
    pub backend: String,
}

impl Default for RawStore {
    fn default() -> Self {
        Self { backend: default_store_backend() }
    }
}

#[derive(Deserialize)]
pub(super) struct RawNeo4j {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_neo4j_database")]
    pub database: String,
}

impl Default for RawNeo4j {
    fn default() -> Self {
        Self { uri: None, user: None, password: None, database: default_neo4j_database() }
    }
}

// ── Workflow policy ─────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub(super) struct RawFeatures {
    #[serde(default = "default_false")]
    pub autonomous_mode: bool,
    #[serde(default = "default_true")]
    pub doctor_validation: bool,
    #[serde(default = "default_false")]
    pub perplexity_check: bool,
}

impl Default for RawFeatures {
    fn default() -> Self {
        Self { autonomous_mode: false, doctor_validation: true, perplexity_check: false }
    }
}

#[derive(Deserialize)]
pub(super) struct RawValidation {
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for RawValidation {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Deserialize)]
pub(super) struct RawRetrieval {
    #[serde(default = "default_similar_case_limit")]
    pub similar_case_limit: usize,
    #[serde(default = "default_relation_limit")]
    pub relation_limit: usize,
}

impl Default for RawRetrieval {
    fn default() -> Self {
        Self {
            similar_case_limit: default_similar_case_limit(),
            relation_limit: default_relation_limit(),
        }
    }
}

#[derive(Deserialize)]
pub(super) struct RawWorkflow {
    #[serde(default = "default_step_timeout_seconds")]
    pub step_timeout_seconds: u64,
    #[serde(default = "default_role")]
    pub default_role: String,
}

impl Default for RawWorkflow {
    fn default() -> Self {
        Self { step_timeout_seconds: default_step_timeout_seconds(), default_role: default_role() }
    }
}

// ── Comms ───────────────────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
pub(super) struct RawComms {
    #[serde(default)]
    pub pty: RawPty,
    #[serde(default)]
    pub http: RawHttp,
}

#[derive(Deserialize)]
pub(super) struct RawPty {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RawPty {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Deserialize)]
pub(super) struct RawHttp {
    #[serde(default = "default_false")]
    pub enabled: bool,
    #[serde(default = "default_http_bind")]
    pub bind: String,
}

impl Default for RawHttp {
    fn default() -> Self {
        Self { enabled: false, bind: default_http_bind() }
    }
}

// ── Defaults ────────────────────────────────────────────────────────────────

fn default_true() -> bool {
    true
}

fn default_false() -> bool {
    false
}

fn default_app_name() -> String {
    "medical-copilot".into()
}

fn default_log_level() -> String {
    "info".into()
}

fn default_llm_provider() -> String {
    "openai".into()
}

pub(super) fn default_openai_api_base_url() -> String {
    "https://api.openai.com/v1/chat/completions".into()
}

pub(super) fn default_chat_model() -> String {
    "gpt-4o".into()
}

pub(super) fn default_vision_model() -> String {
    "gpt-4o".into()
}

pub(super) fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f32 {
    0.2
}

fn default_llm_timeout_seconds() -> u64 {
    60
}

fn default_speech_provider() -> String {
    "whisper".into()
}

pub(super) fn default_whisper_url() -> String {
    "https://api.openai.com/v1/audio/transcriptions".into()
}

pub(super) fn default_whisper_model() -> String {
    "whisper-1".into()
}

pub(super) fn default_deepgram_url() -> String {
    "https://api.deepgram.com/v1/listen".into()
}

pub(super) fn default_deepgram_model() -> String {
    "nova-2-medical".into()
}

pub(super) fn default_factcheck_url() -> String {
    "https://api.perplexity.ai/chat/completions".into()
}

pub(super) fn default_factcheck_model() -> String {
    "sonar".into()
}

fn default_store_backend() -> String {
    "sqlite".into()
}

pub(super) fn default_neo4j_database() -> String {
    "medical_copilot".into()
}

pub(super) fn default_confidence_threshold() -> f32 {
    0.8
}

pub(super) fn default_max_retries() -> u32 {
    1
}

pub(super) fn default_similar_case_limit() -> usize {
    5
}

pub(super) fn default_relation_limit() -> usize {
    10
}

pub(super) fn default_step_timeout_seconds() -> u64 {
    90
}

fn default_role() -> String {
    "patient".into()
}

pub(super) fn default_http_bind() -> String {
    "127.0.0.1:8080".into()
}

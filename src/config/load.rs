//! Configuration loading with env-var substitution and overrides.
//!
//! Reads TOML files, replaces `${VAR}` references from the process
//! environment, follows `[meta] base = "..."` inheritance chains, and applies
//! `MEDCOPILOT_WORK_DIR` and `MEDCOPILOT_LOG_LEVEL` env overrides. The
//! resolved config is checked for missing credentials before it is returned.

use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;

use crate::error::AppError;
use crate::types::UserRole;

use super::raw::{self, RawConfig};
use super::types::*;

/// Deep-merge two TOML values.
/// Tables are merged recursively; the overlay only needs to specify keys that
/// differ from the base. For every other type the overlay value replaces the
/// base value wholesale.
fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_tbl), toml::Value::Table(overlay_tbl)) => {
            for (key, ov_val) in overlay_tbl {
                let merged = match base_tbl.remove(&key) {
                    Some(base_val) => merge_toml(base_val, ov_val),
                    None => ov_val,
                };
                base_tbl.insert(key, merged);
            }
            toml::Value::Table(base_tbl)
        }
        (_, overlay) => overlay,
    }
}

static VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static var pattern")
});

/// Replace every `${VAR}` in `text` using `lookup`.
///
/// Comment lines are left untouched. Returns the name of the first referenced
/// variable that `lookup` cannot resolve.
pub(super) fn substitute_vars(
    text: &str,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    for line in text.split_inclusive('\n') {
        if line.trim_start().starts_with('#') {
            out.push_str(line);
            continue;
        }
        let mut last = 0;
        for caps in VAR_PATTERN.captures_iter(line) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let value = lookup(name.as_str()).ok_or_else(|| name.as_str().to_string())?;
            out.push_str(&line[last..whole.start()]);
            // TOML basic strings: keep quotes and backslashes from breaking the literal.
            out.push_str(&value.replace('\\', "\\\\").replace('"', "\\\""));
            last = whole.end();
        }
        out.push_str(&line[last..]);
    }
    Ok(out)
}

/// Read a config file, follow any `[meta] base = "..."` chain, and return the
/// fully merged `toml::Value`. `visited` carries canonicalized paths already
/// seen in this chain so circular references are caught early.
fn load_raw_merged(
    path: &Path,
    visited: &mut HashSet<PathBuf>,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<toml::Value, AppError> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical) {
        return Err(AppError::Config(format!(
            "circular base reference detected at: {}",
            path.display()
        )));
    }

    let text = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    let text = substitute_vars(&text, lookup).map_err(|var| {
        AppError::Config(format!(
            "environment variable '{var}' is referenced in {} but not set",
            path.display()
        ))
    })?;

    let overlay_val: toml::Value = toml::from_str(&text)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    if let Some(base_str) = overlay_val
        .get("meta")
        .and_then(|m| m.get("base"))
        .and_then(|b| b.as_str())
    {
        let base_path = if Path::new(base_str).is_absolute() {
            PathBuf::from(base_str)
        } else {
            path.parent().unwrap_or(Path::new(".")).join(base_str)
        };
        let base_val = load_raw_merged(&base_path, visited, lookup)?;
        Ok(merge_toml(base_val, overlay_val))
    } else {
        Ok(overlay_val)
    }
}

/// Load config from the given path, or `config/default.toml`, then apply env-var overrides.
/// If no path is given and `config/default.toml` does not exist, returns a
/// built-in default that uses the offline provider and the SQLite store.
pub fn load(config_path: Option<&str>) -> Result<Config, AppError> {
    let work_dir_override = env::var("MEDCOPILOT_WORK_DIR").ok();
    let log_level_override = env::var("MEDCOPILOT_LOG_LEVEL").ok();

    if let Some(path) = config_path {
        return load_from(
            Path::new(path),
            work_dir_override.as_deref(),
            log_level_override.as_deref(),
        );
    }

    let default_path = Path::new("config/default.toml");
    if default_path.exists() {
        load_from(
            default_path,
            work_dir_override.as_deref(),
            log_level_override.as_deref(),
        )
    } else {
        let work_dir = expand_home(work_dir_override.as_deref().unwrap_or("~/.medical-copilot"));
        let log_level = log_level_override.unwrap_or_else(|| "info".to_string());
        Ok(Config::builtin(work_dir, log_level))
    }
}

/// Internal loader; accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let lookup = |name: &str| env::var(name).ok();
    let merged_val = load_raw_merged(path, &mut HashSet::new(), &lookup)?;

    let parsed: RawConfig = Deserialize::deserialize(merged_val)
        .map_err(|e: toml::de::Error| {
            AppError::Config(format!("config error in {}: {e}", path.display()))
        })?;

    let cfg = resolve(parsed, work_dir_override, log_level_override)?;
    validate(&cfg)?;
    Ok(cfg)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn resolve(
    parsed: RawConfig,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let app = parsed.app;
    let work_dir = expand_home(work_dir_override.unwrap_or(&app.work_dir));
    let log_level = log_level_override.unwrap_or(&app.log_level).to_string();

    let speech_provider = match parsed.speech.provider.as_str() {
        "whisper" => SpeechProvider::Whisper,
        "deepgram" => SpeechProvider::Deepgram,
        other => {
            return Err(AppError::Config(format!(
                "unknown speech provider '{other}' (expected whisper or deepgram)"
            )));
        }
    };

    let backend = match parsed.store.backend.as_str() {
        "neo4j" => StoreBackend::Neo4j,
        "sqlite" => StoreBackend::Sqlite,
        other => {
            return Err(AppError::Config(format!(
                "unknown store backend '{other}' (expected neo4j or sqlite)"
            )));
        }
    };

    let neo4j = match backend {
        StoreBackend::Sqlite => None,
        StoreBackend::Neo4j => {
            let n = parsed.neo4j;
            let missing = |field: &str| {
                AppError::Config(format!("store backend 'neo4j' requires [neo4j] {field}"))
            };
            Some(Neo4jConfig {
                uri: non_empty(n.uri).ok_or_else(|| missing("uri"))?,
                user: non_empty(n.user).ok_or_else(|| missing("user"))?,
                password: non_empty(n.password).ok_or_else(|| missing("password"))?,
                database: n.database,
            })
        }
    };

    let default_role: UserRole = parsed
        .workflow
        .default_role
        .parse()
        .map_err(|e: String| AppError::Config(format!("[workflow] default_role: {e}")))?;

    Ok(Config {
        app_name: app.name,
        work_dir,
        log_level,
        credentials: Credentials {
            openai_api_key: non_empty(parsed.credentials.openai_api_key),
            perplexity_api_key: non_empty(parsed.credentials.perplexity_api_key),
            deepgram_api_key: non_empty(parsed.credentials.deepgram_api_key),
        },
        llm: LlmConfig {
            provider: parsed.llm.provider,
            api_base_url: parsed.llm.api_base_url,
            chat_model: parsed.llm.chat_model,
            vision_model: parsed.llm.vision_model,
            max_tokens: parsed.llm.max_tokens,
            temperature: parsed.llm.temperature,
            timeout_seconds: parsed.llm.timeout_seconds,
        },
        speech: SpeechConfig {
            provider: speech_provider,
            whisper_url: parsed.speech.whisper_url,
            whisper_model: parsed.speech.whisper_model,
            deepgram_url: parsed.speech.deepgram_url,
            deepgram_model: parsed.speech.deepgram_model,
        },
        factcheck: FactCheckConfig {
            api_base_url: parsed.factcheck.api_base_url,
            model: parsed.factcheck.model,
        },
        store: StoreConfig { backend, neo4j },
        features: FeatureFlags {
            autonomous_mode: parsed.features.autonomous_mode,
            doctor_validation: parsed.features.doctor_validation,
            perplexity_check: parsed.features.perplexity_check,
        },
        validation: ValidationConfig {
            confidence_threshold: parsed.validation.confidence_threshold,
            max_retries: parsed.validation.max_retries,
        },
        retrieval: RetrievalConfig {
            similar_case_limit: parsed.retrieval.similar_case_limit.max(1),
            relation_limit: parsed.retrieval.relation_limit.max(1),
        },
        workflow: WorkflowConfig {
            step_timeout: Duration::from_secs(parsed.workflow.step_timeout_seconds.max(1)),
            default_role,
        },
        comms: CommsConfig {
            pty: PtyConfig { enabled: parsed.comms.pty.enabled },
            http: HttpConfig { enabled: parsed.comms.http.enabled, bind: parsed.comms.http.bind },
        },
    })
}

/// Fail fast on combinations that would only break at first use.
pub(super) fn validate(cfg: &Config) -> Result<(), AppError> {
    crate::logger::parse_level(&cfg.log_level)
        .map_err(|e| AppError::Config(format!("[app] log_level: {e}")))?;

    let creds = &cfg.credentials;
    match cfg.llm.provider.as_str() {
        "openai" => {
            if creds.openai_api_key.is_none() {
                return Err(AppError::Config(
                    "llm provider 'openai' requires [credentials] openai_api_key".into(),
                ));
            }
        }
        "offline" => {}
        other => {
            return Err(AppError::Config(format!(
                "unknown llm provider '{other}' (expected openai or offline)"
            )));
        }
    }

    if cfg.features.perplexity_check && creds.perplexity_api_key.is_none() {
        return Err(AppError::Config(
            "features.perplexity_check requires [credentials] perplexity_api_key".into(),
        ));
    }

    match cfg.speech.provider {
        SpeechProvider::Deepgram if creds.deepgram_api_key.is_none() => {
            return Err(AppError::Config(
                "speech provider 'deepgram' requires [credentials] deepgram_api_key".into(),
            ));
        }
        SpeechProvider::Whisper if cfg.llm.provider == "openai" && creds.openai_api_key.is_none() => {
            return Err(AppError::Config(
                "speech provider 'whisper' requires [credentials] openai_api_key".into(),
            ));
        }
        _ => {}
    }

    if let Some(neo4j) = &cfg.store.neo4j {
        let uri = neo4j.uri.to_ascii_lowercase();
        if !(uri.starts_with("http://") || uri.starts_with("https://")) {
            return Err(AppError::Config(format!(
                "[neo4j] uri must be an http(s) URL for the transactional endpoint, got '{}'",
                neo4j.uri
            )));
        }
    }

    let threshold = cfg.validation.confidence_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        return Err(AppError::Config(format!(
            "[validation] confidence_threshold must be within [0, 1], got {threshold}"
        )));
    }

    Ok(())
}

impl Config {
    /// Built-in configuration used when no config file exists.
    pub fn builtin(work_dir: PathBuf, log_level: String) -> Self {
        Self {
            app_name: "medical-copilot".into(),
            work_dir,
            log_level,
            credentials: Credentials::default(),
            llm: LlmConfig {
                provider: "offline".into(),
                api_base_url: raw::default_openai_api_base_url(),
                chat_model: raw::default_chat_model(),
                vision_model: raw::default_vision_model(),
                max_tokens: raw::default_max_tokens(),
                temperature: 0.2,
                timeout_seconds: 60,
            },
            speech: SpeechConfig {
                provider: SpeechProvider::Whisper,
                whisper_url: raw::default_whisper_url(),
                whisper_model: raw::default_whisper_model(),
                deepgram_url: raw::default_deepgram_url(),
                deepgram_model: raw::default_deepgram_model(),
            },
            factcheck: FactCheckConfig {
                api_base_url: raw::default_factcheck_url(),
                model: raw::default_factcheck_model(),
            },
            store: StoreConfig { backend: StoreBackend::Sqlite, neo4j: None },
            features: FeatureFlags {
                autonomous_mode: false,
                doctor_validation: true,
                perplexity_check: false,
            },
            validation: ValidationConfig {
                confidence_threshold: raw::default_confidence_threshold(),
                max_retries: raw::default_max_retries(),
            },
            retrieval: RetrievalConfig {
                similar_case_limit: raw::default_similar_case_limit(),
                relation_limit: raw::default_relation_limit(),
            },
            workflow: WorkflowConfig {
                step_timeout: Duration::from_secs(raw::default_step_timeout_seconds()),
                default_role: UserRole::Patient,
            },
            comms: CommsConfig {
                pty: PtyConfig { enabled: true },
                http: HttpConfig { enabled: false, bind: raw::default_http_bind() },
            },
        }
    }
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

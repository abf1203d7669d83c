//! Configuration loading with env-var substitution and overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `MEDCOPILOT_WORK_DIR` and `MEDCOPILOT_LOG_LEVEL` env overrides.
//!
//! # Module layout
//!
//! - **types**: Public configuration structs consumed by subsystems
//!   (`Config`, `FeatureFlags`, `LlmConfig`, etc.).
//! - **raw**: Raw TOML deserialization types (`RawConfig`, `RawLlm`, …).
//!   These mirror the file shape and use serde defaults; kept private.
//! - **load**: Loading logic: `${VAR}` substitution, `merge_toml`,
//!   `load_raw_merged`, `load`, `load_from`, credential validation.

mod load;
mod raw;
mod types;

pub use load::{expand_home, load, load_from};
pub use types::*;

impl Config {
    /// Safe `Config` for tests: offline LLM, SQLite store, no API keys.
    ///
    /// Feature flags start at their documented defaults; tests flip them as needed.
    pub fn test_default(work_dir: &std::path::Path) -> Self {
        let mut cfg = Self::builtin(work_dir.to_path_buf(), "info".into());
        cfg.app_name = "test".into();
        cfg.llm.api_base_url = "http://localhost:0/v1/chat/completions".into();
        cfg.llm.timeout_seconds = 1;
        cfg.workflow.step_timeout = std::time::Duration::from_secs(5);
        cfg.comms.pty.enabled = false;
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserRole;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    const MINIMAL_TOML: &str = r#"
[app]
name = "test-copilot"
work_dir = "~/.medical-copilot"
log_level = "info"

[llm]
default = "offline"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_basic_config() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.app_name, "test-copilot");
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.store.backend, StoreBackend::Sqlite);
    }

    #[test]
    fn feature_defaults() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert!(!cfg.features.autonomous_mode);
        assert!(cfg.features.doctor_validation);
        assert!(!cfg.features.perplexity_check);
        assert!((cfg.validation.confidence_threshold - 0.8).abs() < f32::EPSILON);
        assert_eq!(cfg.validation.max_retries, 1);
        assert_eq!(cfg.retrieval.similar_case_limit, 5);
        assert_eq!(cfg.workflow.default_role, UserRole::Patient);
        assert_eq!(cfg.workflow.step_timeout.as_secs(), 90);
    }

    #[test]
    fn overrides_win_over_file() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("/tmp/mc-test"), Some("debug")).unwrap();
        assert_eq!(cfg.work_dir, std::path::PathBuf::from("/tmp/mc-test"));
        assert_eq!(cfg.log_level, "debug");
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.medical-copilot");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".medical-copilot"));
    }

    #[test]
    fn substitute_replaces_known_vars() {
        let env: HashMap<&str, &str> = HashMap::from([("KEY", "sk-123"), ("HOST", "db")]);
        let lookup = |n: &str| env.get(n).map(|v| v.to_string());
        let out = load::substitute_vars("a = \"${KEY}\"\nb = \"http://${HOST}:7474\"\n", &lookup)
            .unwrap();
        assert_eq!(out, "a = \"sk-123\"\nb = \"http://db:7474\"\n");
    }

    #[test]
    fn substitute_escapes_quotes() {
        let lookup = |_: &str| Some("pa\"ss".to_string());
        let out = load::substitute_vars("p = \"${P}\"", &lookup).unwrap();
        assert_eq!(out, "p = \"pa\\\"ss\"");
    }

    #[test]
    fn substitute_reports_missing_var() {
        let lookup = |_: &str| None;
        let err = load::substitute_vars("k = \"${NOPE}\"", &lookup).unwrap_err();
        assert_eq!(err, "NOPE");
    }

    #[test]
    fn substitute_skips_comment_lines() {
        let lookup = |_: &str| None;
        let out = load::substitute_vars("# export ${NOT_NEEDED}\nk = 1\n", &lookup).unwrap();
        assert!(out.contains("${NOT_NEEDED}"));
    }

    #[test]
    fn unset_env_var_fails_load() {
        let f = write_toml(
            r#"
[app]
work_dir = "/tmp"

[llm]
default = "offline"

[credentials]
openai_api_key = "${MEDCOPILOT_TEST_VAR_THAT_IS_NEVER_SET_4B1D}"
"#,
        );
        let err = load_from(f.path(), None, None).unwrap_err();
        assert!(err.to_string().contains("MEDCOPILOT_TEST_VAR_THAT_IS_NEVER_SET_4B1D"));
    }

    #[test]
    fn openai_provider_requires_key() {
        let f = write_toml(
            r#"
[app]
work_dir = "/tmp"

[llm]
default = "openai"
"#,
        );
        let err = load_from(f.path(), None, None).unwrap_err();
        assert!(err.to_string().contains("openai_api_key"));
    }

    #[test]
    fn perplexity_check_requires_key() {
        let f = write_toml(
            r#"
[app]
work_dir = "/tmp"

[llm]
default = "offline"

[features]
perplexity_check = true
"#,
        );
        let err = load_from(f.path(), None, None).unwrap_err();
        assert!(err.to_string().contains("perplexity_api_key"));
    }

    #[test]
    fn deepgram_requires_key() {
        let f = write_toml(
            r#"
[app]
work_dir = "/tmp"

[llm]
default = "offline"

[speech]
provider = "deepgram"
"#,
        );
        let err = load_from(f.path(), None, None).unwrap_err();
        assert!(err.to_string().contains("deepgram_api_key"));
    }

    #[test]
    fn neo4j_requires_http_uri() {
        let f = write_toml(
            r#"
[app]
work_dir = "/tmp"

[llm]
default = "offline"

[store]
backend = "neo4j"

[neo4j]
uri = "bolt://localhost:7687"
user = "neo4j"
password = "secret"
"#,
        );
        let err = load_from(f.path(), None, None).unwrap_err();
        assert!(err.to_string().contains("http(s)"));
    }

    #[test]
    fn neo4j_missing_password_fails() {
        let f = write_toml(
            r#"
[app]
work_dir = "/tmp"

[llm]
default = "offline"

[store]
backend = "neo4j"

[neo4j]
uri = "http://localhost:7474"
user = "neo4j"
"#,
        );
        let err = load_from(f.path(), None, None).unwrap_err();
        assert!(err.to_string().contains("password"));
    }

    #[test]
    fn threshold_out_of_range_fails() {
        let f = write_toml(
            r#"
[app]
work_dir = "/tmp"

[llm]
default = "offline"

[validation]
confidence_threshold = 1.5
"#,
        );
        assert!(load_from(f.path(), None, None).is_err());
    }

    #[test]
    fn unknown_role_fails() {
        let f = write_toml(
            r#"
[app]
work_dir = "/tmp"

[llm]
default = "offline"

[workflow]
default_role = "nurse"
"#,
        );
        assert!(load_from(f.path(), None, None).is_err());
    }

    #[test]
    fn meta_base_merges_tables() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("base.toml"),
            r#"
[app]
work_dir = "/tmp"

[llm]
default = "offline"

[features]
autonomous_mode = false
perplexity_check = false
"#,
        )
        .unwrap();
        let child = dir.path().join("child.toml");
        std::fs::write(
            &child,
            r#"
[meta]
base = "base.toml"

[features]
autonomous_mode = true
"#,
        )
        .unwrap();
        let cfg = load_from(&child, None, None).unwrap();
        assert!(cfg.features.autonomous_mode);
        assert!(!cfg.features.perplexity_check);
        assert_eq!(cfg.llm.provider, "offline");
    }

    #[test]
    fn meta_base_cycle_detected() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.toml");
        let b = dir.path().join("b.toml");
        std::fs::write(&a, "[meta]\nbase = \"b.toml\"\n").unwrap();
        std::fs::write(&b, "[meta]\nbase = \"a.toml\"\n").unwrap();
        let err = load_from(&a, None, None).unwrap_err();
        assert!(err.to_string().contains("circular"));
    }

    #[test]
    fn credentials_debug_masks_values() {
        let creds = Credentials {
            openai_api_key: Some("sk-secret".into()),
            ..Default::default()
        };
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<set>"));
    }

    #[test]
    fn test_default_is_offline() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::test_default(dir.path());
        assert_eq!(cfg.llm.provider, "offline");
        assert!(cfg.credentials.openai_api_key.is_none());
    }
}

//! Prompt templates under config/prompts must exist and carry the
//! variables the workflow steps fill in.

use std::fs;

fn template(name: &str) -> String {
    let path = format!("config/prompts/{name}");
    fs::read_to_string(&path).unwrap_or_else(|e| panic!("{path} unreadable: {e}"))
}

fn assert_vars(name: &str, vars: &[&str]) {
    let text = template(name);
    for var in vars {
        let placeholder = format!("{{{{{var}}}}}");
        assert!(text.contains(&placeholder), "{name} should contain {placeholder}");
    }
}

#[test]
fn extract_prompt_takes_narrative() {
    assert_vars("extract_symptoms.txt", &["narrative"]);
}

#[test]
fn retrieval_prompt_takes_context() {
    assert_vars("analyze_context.txt", &["symptoms", "similar_cases", "relations"]);
}

#[test]
fn risk_prompt_vars() {
    assert_vars("assess_risk.txt", &["symptoms", "context"]);
}

#[test]
fn diagnose_prompt_vars() {
    assert_vars("diagnose.txt", &["symptoms", "context", "risk", "feedback"]);
}

#[test]
fn review_prompts_take_diagnosis() {
    assert_vars("alternatives.txt", &["symptoms", "diagnosis"]);
    assert_vars("judge.txt", &["symptoms", "diagnosis", "risk"]);
    assert_vars("fact_check.txt", &["symptoms", "diagnosis"]);
}

#[test]
fn recommend_prompt_is_role_aware() {
    assert_vars("recommend.txt", &["symptoms", "diagnosis", "risk", "role"]);
}

#[test]
fn image_prompt_is_static() {
    let text = template("describe_image.txt");
    assert!(!text.trim().is_empty());
    assert!(!text.contains("{{"));
}

#[test]
fn json_steps_ask_for_json() {
    for name in ["extract_symptoms.txt", "assess_risk.txt", "diagnose.txt", "judge.txt", "fact_check.txt"] {
        assert!(template(name).contains("JSON"), "{name} should request a JSON reply");
    }
}

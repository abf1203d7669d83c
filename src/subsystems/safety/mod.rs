//! Safety filter: PII redaction, sensitive-term flagging and role-based
//! access checks.
//!
//! Everything here is synchronous and pure apart from [`audit`], which emits
//! a `tracing` event on the `audit` target. Raw matched values are never
//! kept; a [`PiiMatch`] records only the kind and byte span.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::{RetrievedContext, UserRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    Email,
    Phone,
    Ssn,
    CreditCard,
    DateOfBirth,
}

impl PiiKind {
    pub fn label(self) -> &'static str {
        match self {
            PiiKind::Email => "EMAIL",
            PiiKind::Phone => "PHONE",
            PiiKind::Ssn => "SSN",
            PiiKind::CreditCard => "CREDIT_CARD",
            PiiKind::DateOfBirth => "DATE_OF_BIRTH",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiMatch {
    pub kind: PiiKind,
    pub start: usize,
    pub end: usize,
}

/// Result of screening one piece of text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SafetyScreen {
    pub redacted: String,
    pub pii: Vec<PiiMatch>,
    /// Sensitive terms found, in list order, each reported once.
    pub sensitive_terms: Vec<String>,
}

impl SafetyScreen {
    pub fn has_pii(&self) -> bool {
        !self.pii.is_empty()
    }

    pub fn is_sensitive(&self) -> bool {
        !self.sensitive_terms.is_empty()
    }

    pub fn pii_kinds(&self) -> Vec<PiiKind> {
        let mut out = Vec::new();
        for m in &self.pii {
            if !out.contains(&m.kind) {
                out.push(m.kind);
            }
        }
        out
    }
}

static PII_PATTERNS: LazyLock<Vec<(Regex, PiiKind)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}").unwrap(),
            PiiKind::Email,
        ),
        (Regex::new(r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b").unwrap(), PiiKind::Phone),
        (Regex::new(r"\b\d{3}-?\d{2}-?\d{4}\b").unwrap(), PiiKind::Ssn),
        (
            Regex::new(r"\b\d{4}[- ]?\d{4}[- ]?\d{4}[- ]?\d{4}\b").unwrap(),
            PiiKind::CreditCard,
        ),
        (
            Regex::new(r"\b(0?[1-9]|1[0-2])[/-](0?[1-9]|[12]\d|3[01])[/-]\d{4}\b").unwrap(),
            PiiKind::DateOfBirth,
        ),
    ]
});

const SENSITIVE_TERMS: &[&str] = &[
    "HIV",
    "AIDS",
    "mental health",
    "suicide",
    "abuse",
    "substance abuse",
    "STD",
    "STI",
    "pregnancy",
    "abortion",
    "cancer",
    "terminal",
    "palliative",
    "hospice",
];

static SENSITIVE_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    SENSITIVE_TERMS
        .iter()
        .map(|term| {
            let pattern = format!(r"(?i)\b{}\b", regex::escape(term));
            (Regex::new(&pattern).unwrap(), *term)
        })
        .collect()
});

/// Find every PII span. Overlaps keep the earliest match, and among matches
/// starting at the same offset the longest.
pub fn find_pii(text: &str) -> Vec<PiiMatch> {
    let mut all: Vec<PiiMatch> = PII_PATTERNS
        .iter()
        .flat_map(|(re, kind)| {
            re.find_iter(text).map(move |m| PiiMatch { kind: *kind, start: m.start(), end: m.end() })
        })
        .collect();
    all.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    let mut kept: Vec<PiiMatch> = Vec::new();
    for m in all {
        if kept.last().is_none_or(|last| m.start >= last.end) {
            kept.push(m);
        }
    }
    kept
}

/// Replace each match with `[REDACTED <KIND>]`. `matches` must be sorted and
/// non-overlapping, as [`find_pii`] returns them.
pub fn redact(text: &str, matches: &[PiiMatch]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for m in matches {
        out.push_str(&text[cursor..m.start]);
        out.push_str("[REDACTED ");
        out.push_str(m.kind.label());
        out.push(']');
        cursor = m.end;
    }
    out.push_str(&text[cursor..]);
    out
}

pub fn sensitive_terms(text: &str) -> Vec<String> {
    SENSITIVE_PATTERNS
        .iter()
        .filter(|(re, _)| re.is_match(text))
        .map(|(_, term)| term.to_string())
        .collect()
}

pub fn screen(text: &str) -> SafetyScreen {
    let pii = find_pii(text);
    SafetyScreen {
        redacted: redact(text, &pii),
        sensitive_terms: sensitive_terms(text),
        pii,
    }
}

pub fn can_access(role: UserRole, text: &str) -> bool {
    role.is_clinician() || sensitive_terms(text).is_empty()
}

pub fn access_level(role: UserRole) -> &'static str {
    if role.is_clinician() { "full" } else { "limited" }
}

/// Drop retrieved items a patient may not see.
pub fn sanitize_context(ctx: RetrievedContext, role: UserRole) -> RetrievedContext {
    if role.is_clinician() {
        return ctx;
    }
    let RetrievedContext { similar_cases, relations, analysis } = ctx;
    RetrievedContext {
        similar_cases: similar_cases
            .into_iter()
            .filter(|c| {
                c.symptoms.iter().chain(c.diagnoses.iter()).all(|t| can_access(role, t))
            })
            .collect(),
        relations: relations
            .into_iter()
            .filter(|r| can_access(role, &r.symptom) && can_access(role, &r.related_name))
            .collect(),
        analysis,
    }
}

pub fn audit(role: UserRole, resource: &str, granted: bool) {
    info!(
        target: "audit",
        role = role.as_str(),
        access_level = access_level(role),
        resource,
        granted,
        "access"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SimilarCase, SymptomRelation};

    #[test]
    fn redacts_each_kind() {
        let s = screen("mail me at jane.doe@example.com or call 555-123-4567, born 04/12/1980");
        assert_eq!(
            s.redacted,
            "mail me at [REDACTED EMAIL] or call [REDACTED PHONE], born [REDACTED DATE_OF_BIRTH]"
        );
        assert_eq!(s.pii_kinds(), vec![PiiKind::Email, PiiKind::Phone, PiiKind::DateOfBirth]);
    }

    #[test]
    fn overlapping_matches_prefer_longest_at_same_start() {
        // The local part is also a phone number.
        let s = screen("reach 5551234567@example.com today");
        assert_eq!(s.redacted, "reach [REDACTED EMAIL] today");
        assert_eq!(s.pii.len(), 1);
    }

    #[test]
    fn grouped_card_number_is_redacted() {
        let s = screen("card 4111 1111 1111 1111 please");
        assert_eq!(s.redacted, "card [REDACTED CREDIT_CARD] please");
    }

    #[test]
    fn ssn_is_redacted() {
        let s = screen("ssn 123-45-6789");
        assert_eq!(s.redacted, "ssn [REDACTED SSN]");
    }

    #[test]
    fn clean_text_passes_through() {
        let s = screen("I have a headache and a mild fever");
        assert!(!s.has_pii());
        assert!(!s.is_sensitive());
        assert_eq!(s.redacted, "I have a headache and a mild fever");
    }

    #[test]
    fn sensitive_terms_respect_word_boundaries() {
        assert_eq!(sensitive_terms("worried about Cancer"), vec!["cancer"]);
        assert!(sensitive_terms("stiff neck and a rash").is_empty());
        assert!(sensitive_terms("history of substance abuse").contains(&"substance abuse".to_string()));
    }

    #[test]
    fn access_rules_by_role() {
        assert!(can_access(UserRole::Doctor, "hiv test"));
        assert!(!can_access(UserRole::Patient, "hiv test"));
        assert!(can_access(UserRole::Patient, "sore throat"));
        assert_eq!(access_level(UserRole::Doctor), "full");
        assert_eq!(access_level(UserRole::Patient), "limited");
    }

    fn ctx() -> RetrievedContext {
        RetrievedContext {
            similar_cases: vec![
                SimilarCase {
                    case_id: "a".into(),
                    symptoms: vec!["fatigue".into()],
                    diagnoses: vec!["cancer".into()],
                    matching_symptoms: 1,
                },
                SimilarCase {
                    case_id: "b".into(),
                    symptoms: vec!["fatigue".into()],
                    diagnoses: vec!["anemia".into()],
                    matching_symptoms: 1,
                },
            ],
            relations: vec![SymptomRelation {
                symptom: "fatigue".into(),
                relationship: "ASSOCIATED_WITH".into(),
                related_kind: "Diagnosis".into(),
                related_name: "hiv".into(),
            }],
            analysis: String::new(),
        }
    }

    #[test]
    fn patient_context_drops_sensitive_items() {
        let clean = sanitize_context(ctx(), UserRole::Patient);
        assert_eq!(clean.similar_cases.len(), 1);
        assert_eq!(clean.similar_cases[0].case_id, "b");
        assert!(clean.relations.is_empty());
    }

    #[test]
    fn doctor_context_unchanged() {
        let full = sanitize_context(ctx(), UserRole::Doctor);
        assert_eq!(full.similar_cases.len(), 2);
        assert_eq!(full.relations.len(), 1);
    }
}

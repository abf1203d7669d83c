//! Knowledge retriever: bounded lookup of similar past cases and symptom
//! relations from the Case Store.

use tracing::debug;

use crate::config::RetrievalConfig;
use crate::error::AppError;
use crate::store::GraphStore;
use crate::types::RetrievedContext;

/// Similar cases (at most `similar_case_limit`) plus at most
/// `relation_limit` relations across all `symptoms`. `analysis` is left
/// empty for the workflow to fill in.
pub async fn retrieve(
    store: &GraphStore,
    symptoms: &[String],
    limits: &RetrievalConfig,
) -> Result<RetrievedContext, AppError> {
    let similar_cases = store.find_similar_cases(symptoms, limits.similar_case_limit).await?;

    let mut relations = Vec::new();
    for symptom in symptoms {
        let remaining = limits.relation_limit.saturating_sub(relations.len());
        if remaining == 0 {
            break;
        }
        relations.extend(store.symptom_relations(symptom, remaining).await?);
    }

    debug!(
        store = store.name(),
        similar = similar_cases.len(),
        relations = relations.len(),
        "context retrieved"
    );
    Ok(RetrievedContext { similar_cases, relations, analysis: String::new() })
}

#[cfg(all(test, feature = "store-sqlite"))]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteStore;
    use crate::types::{CaseRecord, RecordedDiagnosis, UserRole};
    use chrono::Utc;
    use uuid::Uuid;

    async fn seeded() -> (tempfile::TempDir, GraphStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = GraphStore::Sqlite(SqliteStore::open(dir.path()).unwrap());
        for (symptoms, dx) in [
            (vec!["fever", "cough", "fatigue"], "Influenza"),
            (vec!["fever", "cough"], "Bronchitis"),
            (vec!["fever", "rash"], "Measles"),
        ] {
            store
                .store_case(&CaseRecord {
                    case_id: Uuid::now_v7(),
                    recorded_at: Utc::now(),
                    symptoms: symptoms.into_iter().map(String::from).collect(),
                    diagnoses: vec![RecordedDiagnosis { name: dx.into(), confidence: 0.9 }],
                    confidence: 0.9,
                    risk_level: "low".into(),
                    user_role: UserRole::Doctor,
                    sensitive_content: false,
                })
                .await
                .unwrap();
        }
        (dir, store)
    }

    #[tokio::test]
    async fn limits_are_respected() {
        let (_dir, store) = seeded().await;
        let limits = RetrievalConfig { similar_case_limit: 2, relation_limit: 3 };
        let ctx = retrieve(&store, &["fever".into(), "cough".into()], &limits).await.unwrap();
        assert_eq!(ctx.similar_cases.len(), 2);
        assert!(ctx.similar_cases[0].matching_symptoms >= ctx.similar_cases[1].matching_symptoms);
        assert_eq!(ctx.relations.len(), 3);
        assert!(ctx.analysis.is_empty());
    }

    #[tokio::test]
    async fn no_symptoms_no_context() {
        let (_dir, store) = seeded().await;
        let limits = RetrievalConfig { similar_case_limit: 5, relation_limit: 10 };
        let ctx = retrieve(&store, &[], &limits).await.unwrap();
        assert!(ctx.similar_cases.is_empty());
        assert!(ctx.relations.is_empty());
    }
}

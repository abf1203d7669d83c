//! Case Store: persistent graph of cases, symptoms and diagnoses.
//!
//! `GraphStore` is enum-dispatched over two backends with identical
//! semantics:
//!
//! - **neo4j**: `Case`, `Symptom` and `Diagnosis` nodes joined by
//!   `HAS_SYMPTOM` / `HAS_DIAGNOSIS`, spoken to over the HTTP transactional
//!   Cypher endpoint.
//! - **sqlite** (feature `store-sqlite`): the same graph as join tables in
//!   `{work_dir}/cases.db`.
//!
//! Symptom and diagnosis names are normalised (trimmed, lowercased) on both
//! write and lookup so the two backends match the same way.

pub mod neo4j;
#[cfg(feature = "store-sqlite")]
pub mod sqlite;

use crate::config::{Config, StoreBackend};
use crate::error::AppError;
use crate::types::{CaseRecord, CaseStatistics, Comorbidity, SimilarCase, SymptomRelation};

/// Comorbidity queries always return at most this many rows.
pub const COMORBIDITY_LIMIT: usize = 10;

#[derive(Debug, Clone)]
pub enum GraphStore {
    Neo4j(neo4j::Neo4jStore),
    #[cfg(feature = "store-sqlite")]
    Sqlite(sqlite::SqliteStore),
}

impl GraphStore {
    /// Build the configured backend. Does not touch the network; call
    /// [`GraphStore::ping`] to check connectivity.
    pub fn from_config(config: &Config) -> Result<Self, AppError> {
        match config.store.backend {
            StoreBackend::Neo4j => {
                let n = config.store.neo4j.as_ref().ok_or_else(|| {
                    AppError::Store("neo4j backend selected without [neo4j] settings".into())
                })?;
                Ok(GraphStore::Neo4j(neo4j::Neo4jStore::new(n, config.llm.timeout_seconds)?))
            }
            #[cfg(feature = "store-sqlite")]
            StoreBackend::Sqlite => Ok(GraphStore::Sqlite(sqlite::SqliteStore::open(&config.work_dir)?)),
            #[cfg(not(feature = "store-sqlite"))]
            StoreBackend::Sqlite => Err(AppError::Store(
                "sqlite backend requires the `store-sqlite` feature".into(),
            )),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GraphStore::Neo4j(_) => "neo4j",
            #[cfg(feature = "store-sqlite")]
            GraphStore::Sqlite(_) => "sqlite",
        }
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        match self {
            GraphStore::Neo4j(s) => s.ping().await,
            #[cfg(feature = "store-sqlite")]
            GraphStore::Sqlite(s) => s.ping().await,
        }
    }

    pub async fn store_case(&self, record: &CaseRecord) -> Result<(), AppError> {
        match self {
            GraphStore::Neo4j(s) => s.store_case(record).await,
            #[cfg(feature = "store-sqlite")]
            GraphStore::Sqlite(s) => s.store_case(record).await,
        }
    }

    /// Past cases ranked by how many of `symptoms` they share.
    pub async fn find_similar_cases(
        &self,
        symptoms: &[String],
        limit: usize,
    ) -> Result<Vec<SimilarCase>, AppError> {
        let symptoms = normalize_all(symptoms);
        if symptoms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        match self {
            GraphStore::Neo4j(s) => s.find_similar_cases(&symptoms, limit).await,
            #[cfg(feature = "store-sqlite")]
            GraphStore::Sqlite(s) => s.find_similar_cases(&symptoms, limit).await,
        }
    }

    /// Diagnoses and symptoms linked to `symptom` through past cases.
    pub async fn symptom_relations(
        &self,
        symptom: &str,
        limit: usize,
    ) -> Result<Vec<SymptomRelation>, AppError> {
        let symptom = normalize_name(symptom);
        if symptom.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        match self {
            GraphStore::Neo4j(s) => s.symptom_relations(&symptom, limit).await,
            #[cfg(feature = "store-sqlite")]
            GraphStore::Sqlite(s) => s.symptom_relations(&symptom, limit).await,
        }
    }

    /// Diagnoses recorded on the same cases as `diagnosis`.
    pub async fn find_comorbidities(&self, diagnosis: &str) -> Result<Vec<Comorbidity>, AppError> {
        let diagnosis = normalize_name(diagnosis);
        if diagnosis.is_empty() {
            return Ok(Vec::new());
        }
        match self {
            GraphStore::Neo4j(s) => s.find_comorbidities(&diagnosis).await,
            #[cfg(feature = "store-sqlite")]
            GraphStore::Sqlite(s) => s.find_comorbidities(&diagnosis).await,
        }
    }

    pub async fn case_statistics(&self) -> Result<CaseStatistics, AppError> {
        match self {
            GraphStore::Neo4j(s) => s.case_statistics().await,
            #[cfg(feature = "store-sqlite")]
            GraphStore::Sqlite(s) => s.case_statistics().await,
        }
    }
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Normalise, drop empties and de-duplicate while keeping first-seen order.
pub(crate) fn normalize_all(names: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for n in names {
        let n = normalize_name(n);
        if !n.is_empty() && !out.contains(&n) {
            out.push(n);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize_name("  Chest   Pain "), "chest pain");
    }

    #[test]
    fn normalize_all_dedupes() {
        let names = vec!["Fever".to_string(), "fever ".to_string(), "".to_string(), "Cough".to_string()];
        assert_eq!(normalize_all(&names), vec!["fever", "cough"]);
    }

    #[cfg(feature = "store-sqlite")]
    #[test]
    fn sqlite_from_test_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let cfg = Config::test_default(dir.path());
        let store = GraphStore::from_config(&cfg).unwrap();
        assert_eq!(store.name(), "sqlite");
        assert!(dir.path().join("cases.db").exists());
    }
}

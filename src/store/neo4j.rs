//! Neo4j backend for the Case Store, over the HTTP transactional endpoint
//! (`POST {uri}/db/{database}/tx/commit`).
//!
//! Every call is a single auto-commit transaction. Rows come back as JSON
//! arrays in `results[i].data[j].row`; the `row_*` helpers below map them
//! onto the store DTOs.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, error};

use crate::config::Neo4jConfig;
use crate::error::AppError;
use crate::types::{CaseRecord, CaseStatistics, Comorbidity, SimilarCase, SymptomRelation};

use super::{COMORBIDITY_LIMIT, normalize_all, normalize_name};

const STORE_CASE: &str = "
MERGE (c:Case {id: $case_id})
SET c.recorded_at = $recorded_at,
    c.confidence = $confidence,
    c.risk_level = $risk_level,
    c.user_role = $user_role,
    c.sensitive_content = $sensitive_content
WITH c
UNWIND $symptoms AS symptom_name
MERGE (s:Symptom {name: symptom_name})
MERGE (c)-[:HAS_SYMPTOM]->(s)";

const LINK_DIAGNOSES: &str = "
MATCH (c:Case {id: $case_id})
UNWIND $diagnoses AS dx
MERGE (d:Diagnosis {name: dx.name})
MERGE (c)-[r:HAS_DIAGNOSIS]->(d)
SET r.confidence = dx.confidence";

const SIMILAR_CASES: &str = "
MATCH (c:Case)-[:HAS_SYMPTOM]->(s:Symptom)
WHERE s.name IN $symptoms
WITH c, count(DISTINCT s) AS matches
ORDER BY matches DESC, c.recorded_at DESC
LIMIT $limit
OPTIONAL MATCH (c)-[:HAS_DIAGNOSIS]->(d:Diagnosis)
WITH c, matches, collect(DISTINCT d.name) AS diagnoses
OPTIONAL MATCH (c)-[:HAS_SYMPTOM]->(all:Symptom)
RETURN c.id, matches, diagnoses, collect(DISTINCT all.name) AS symptoms
ORDER BY matches DESC";

const SYMPTOM_RELATIONS: &str = "
CALL {
  MATCH (s:Symptom {name: $symptom})<-[:HAS_SYMPTOM]-(c:Case)-[:HAS_DIAGNOSIS]->(d:Diagnosis)
  RETURN 'ASSOCIATED_WITH' AS relationship, 'Diagnosis' AS kind, d.name AS name, count(DISTINCT c) AS weight
  UNION ALL
  MATCH (s:Symptom {name: $symptom})<-[:HAS_SYMPTOM]-(c:Case)-[:HAS_SYMPTOM]->(o:Symptom)
  WHERE o <> s
  RETURN 'CO_OCCURS_WITH' AS relationship, 'Symptom' AS kind, o.name AS name, count(DISTINCT c) AS weight
}
RETURN relationship, kind, name
ORDER BY weight DESC, name
LIMIT $limit";

const COMORBIDITIES: &str = "
MATCH (d1:Diagnosis {name: $diagnosis})<-[:HAS_DIAGNOSIS]-(c:Case)-[:HAS_DIAGNOSIS]->(d2:Diagnosis)
WHERE d1 <> d2
RETURN d2.name, count(DISTINCT c) AS co_occurrence
ORDER BY co_occurrence DESC, d2.name
LIMIT $limit";

const CASE_STATISTICS: &str = "
CALL { MATCH (c:Case) RETURN count(c) AS total_cases }
CALL { MATCH (s:Symptom) RETURN count(s) AS total_symptoms }
CALL { MATCH (d:Diagnosis) RETURN count(d) AS total_diagnoses }
CALL { MATCH (c:Case) WHERE (c)-[:HAS_DIAGNOSIS]->() RETURN count(c) AS cases_with_diagnosis }
RETURN total_cases, total_symptoms, total_diagnoses, cases_with_diagnosis";

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Statement<'a> {
    statement: &'a str,
    parameters: Value,
}

#[derive(Debug, Serialize)]
struct TxRequest<'a> {
    statements: Vec<Statement<'a>>,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<TxResult>,
    #[serde(default)]
    errors: Vec<TxError>,
}

#[derive(Debug, Deserialize)]
struct TxResult {
    #[serde(default)]
    data: Vec<TxRow>,
}

#[derive(Debug, Deserialize)]
struct TxRow {
    row: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct TxError {
    code: String,
    message: String,
}

// ── Store ─────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Neo4jStore {
    client: Client,
    endpoint: String,
    user: String,
    password: String,
}

impl std::fmt::Debug for Neo4jStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Neo4jStore")
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl Neo4jStore {
    pub fn new(config: &Neo4jConfig, timeout_seconds: u64) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| AppError::Store(format!("neo4j: build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: tx_endpoint(&config.uri, &config.database),
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    /// Run `statements` in one auto-commit transaction and return each
    /// statement's rows.
    async fn run(&self, statements: Vec<Statement<'_>>) -> Result<Vec<Vec<Vec<Value>>>, AppError> {
        debug!(endpoint = %self.endpoint, statements = statements.len(), "neo4j transaction");
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, Some(&self.password))
            .json(&TxRequest { statements })
            .send()
            .await
            .map_err(|e| {
                error!(endpoint = %self.endpoint, error = %e, "neo4j request failed (transport)");
                AppError::Store(format!("neo4j: request failed: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Store(format!("neo4j: HTTP {status}: {body}")));
        }

        let parsed: TxResponse = response
            .json()
            .await
            .map_err(|e| AppError::Store(format!("neo4j: parse response: {e}")))?;
        rows_or_error(parsed)
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        self.run(vec![Statement { statement: "RETURN 1", parameters: json!({}) }]).await.map(|_| ())
    }

    pub async fn store_case(&self, record: &CaseRecord) -> Result<(), AppError> {
        let case_id = record.case_id.to_string();
        let diagnoses: Vec<Value> = record
            .diagnoses
            .iter()
            .map(|d| (normalize_name(&d.name), d.confidence))
            .filter(|(name, _)| !name.is_empty())
            .map(|(name, confidence)| json!({ "name": name, "confidence": confidence }))
            .collect();
        let statements = vec![
            Statement {
                statement: STORE_CASE,
                parameters: json!({
                    "case_id": case_id,
                    "recorded_at": record.recorded_at.to_rfc3339(),
                    "confidence": record.confidence,
                    "risk_level": record.risk_level,
                    "user_role": record.user_role.as_str(),
                    "sensitive_content": record.sensitive_content,
                    "symptoms": normalize_all(&record.symptoms),
                }),
            },
            Statement {
                statement: LINK_DIAGNOSES,
                parameters: json!({ "case_id": case_id, "diagnoses": diagnoses }),
            },
        ];
        self.run(statements).await.map(|_| ())
    }

    pub async fn find_similar_cases(
        &self,
        symptoms: &[String],
        limit: usize,
    ) -> Result<Vec<SimilarCase>, AppError> {
        let rows = self
            .single(SIMILAR_CASES, json!({ "symptoms": symptoms, "limit": limit }))
            .await?;
        Ok(rows.iter().filter_map(|r| row_similar_case(r)).collect())
    }

    pub async fn symptom_relations(
        &self,
        symptom: &str,
        limit: usize,
    ) -> Result<Vec<SymptomRelation>, AppError> {
        let rows = self
            .single(SYMPTOM_RELATIONS, json!({ "symptom": symptom, "limit": limit }))
            .await?;
        Ok(rows.iter().filter_map(|r| row_relation(symptom, r)).collect())
    }

    pub async fn find_comorbidities(&self, diagnosis: &str) -> Result<Vec<Comorbidity>, AppError> {
        let rows = self
            .single(COMORBIDITIES, json!({ "diagnosis": diagnosis, "limit": COMORBIDITY_LIMIT }))
            .await?;
        Ok(rows.iter().filter_map(|r| row_comorbidity(r)).collect())
    }

    pub async fn case_statistics(&self) -> Result<CaseStatistics, AppError> {
        let rows = self.single(CASE_STATISTICS, json!({})).await?;
        rows.first()
            .map(|r| row_statistics(r))
            .ok_or_else(|| AppError::Store("neo4j: statistics query returned no rows".into()))
    }

    async fn single(&self, statement: &str, parameters: Value) -> Result<Vec<Vec<Value>>, AppError> {
        let mut results = self.run(vec![Statement { statement, parameters }]).await?;
        Ok(results.pop().unwrap_or_default())
    }
}

/// `http://host:7474/` + `db` → `http://host:7474/db/db/tx/commit`.
fn tx_endpoint(uri: &str, database: &str) -> String {
    format!("{}/db/{}/tx/commit", uri.trim_end_matches('/'), database)
}

fn rows_or_error(parsed: TxResponse) -> Result<Vec<Vec<Vec<Value>>>, AppError> {
    if let Some(err) = parsed.errors.first() {
        return Err(AppError::Store(format!("neo4j: {}: {}", err.code, err.message)));
    }
    Ok(parsed
        .results
        .into_iter()
        .map(|r| r.data.into_iter().map(|d| d.row).collect())
        .collect())
}

fn string_list(v: Option<&Value>) -> Vec<String> {
    v.and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

fn count_at(row: &[Value], i: usize) -> u64 {
    row.get(i).and_then(Value::as_u64).unwrap_or(0)
}

fn row_similar_case(row: &[Value]) -> Option<SimilarCase> {
    Some(SimilarCase {
        case_id: row.first()?.as_str()?.to_string(),
        matching_symptoms: u32::try_from(count_at(row, 1)).unwrap_or(u32::MAX),
        diagnoses: string_list(row.get(2)),
        symptoms: string_list(row.get(3)),
    })
}

fn row_relation(symptom: &str, row: &[Value]) -> Option<SymptomRelation> {
    Some(SymptomRelation {
        symptom: symptom.to_string(),
        relationship: row.first()?.as_str()?.to_string(),
        related_kind: row.get(1)?.as_str()?.to_string(),
        related_name: row.get(2)?.as_str()?.to_string(),
    })
}

fn row_comorbidity(row: &[Value]) -> Option<Comorbidity> {
    Some(Comorbidity {
        diagnosis: row.first()?.as_str()?.to_string(),
        co_occurrence: count_at(row, 1),
    })
}

fn row_statistics(row: &[Value]) -> CaseStatistics {
    CaseStatistics {
        total_cases: count_at(row, 0),
        total_symptoms: count_at(row, 1),
        total_diagnoses: count_at(row, 2),
        cases_with_diagnosis: count_at(row, 3),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_shape() {
        assert_eq!(
            tx_endpoint("http://localhost:7474/", "medical_copilot"),
            "http://localhost:7474/db/medical_copilot/tx/commit"
        );
    }

    #[test]
    fn errors_in_body_surface() {
        let parsed: TxResponse = serde_json::from_str(
            r#"{"results":[],"errors":[{"code":"Neo.ClientError.Statement.SyntaxError","message":"bad"}]}"#,
        )
        .unwrap();
        let err = rows_or_error(parsed).unwrap_err();
        assert!(err.to_string().contains("SyntaxError"));
    }

    #[test]
    fn similar_case_rows_map() {
        let parsed: TxResponse = serde_json::from_str(
            r#"{"results":[{"columns":["c.id","matches","diagnoses","symptoms"],
                "data":[{"row":["abc",2,["influenza"],["fever","cough"]],"meta":[]}]}],"errors":[]}"#,
        )
        .unwrap();
        let rows = rows_or_error(parsed).unwrap();
        let case = row_similar_case(&rows[0][0]).unwrap();
        assert_eq!(case.case_id, "abc");
        assert_eq!(case.matching_symptoms, 2);
        assert_eq!(case.diagnoses, vec!["influenza"]);
        assert_eq!(case.symptoms, vec!["fever", "cough"]);
    }

    #[test]
    fn malformed_rows_are_skipped() {
        assert!(row_similar_case(&[json!(1)]).is_none());
        assert!(row_relation("fever", &[json!("ASSOCIATED_WITH")]).is_none());
    }

    #[test]
    fn statistics_row_maps() {
        let stats = row_statistics(&[json!(4), json!(7), json!(3), json!(2)]);
        assert_eq!(stats.total_cases, 4);
        assert_eq!(stats.cases_with_diagnosis, 2);
    }

    #[tokio::test]
    async fn unreachable_server_is_store_error() {
        let cfg = Neo4jConfig {
            uri: "http://127.0.0.1:9".into(),
            user: "neo4j".into(),
            password: "x".into(),
            database: "medical_copilot".into(),
        };
        let store = Neo4jStore::new(&cfg, 1).unwrap();
        assert!(matches!(store.ping().await, Err(AppError::Store(_))));
    }
}

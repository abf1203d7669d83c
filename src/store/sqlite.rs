//! Embedded SQLite backend for the Case Store.
//!
//! One connection per operation, opened inside `spawn_blocking`. The graph is
//! stored as three tables:
//!
//! - `cases`: one row per persisted case.
//! - `case_symptoms`: `(case_id, symptom)` edges.
//! - `case_diagnoses`: `(case_id, diagnosis, confidence)` edges.

use std::path::{Path, PathBuf};

use chrono::SecondsFormat;
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};

use crate::error::AppError;
use crate::types::{CaseRecord, CaseStatistics, Comorbidity, SimilarCase, SymptomRelation};

use super::{COMORBIDITY_LIMIT, normalize_name};

pub(crate) const DB_FILENAME: &str = "cases.db";

/// Schema version stored in `PRAGMA user_version`.
const SCHEMA_VERSION: i64 = 1;

fn init_schema(conn: &Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS cases (
            case_id TEXT PRIMARY KEY,
            recorded_at TEXT NOT NULL,
            confidence REAL NOT NULL,
            risk_level TEXT NOT NULL,
            user_role TEXT NOT NULL,
            sensitive_content INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS case_symptoms (
            case_id TEXT NOT NULL REFERENCES cases(case_id) ON DELETE CASCADE,
            symptom TEXT NOT NULL,
            PRIMARY KEY (case_id, symptom)
        );
        CREATE INDEX IF NOT EXISTS idx_case_symptoms_symptom ON case_symptoms(symptom);

        CREATE TABLE IF NOT EXISTS case_diagnoses (
            case_id TEXT NOT NULL REFERENCES cases(case_id) ON DELETE CASCADE,
            diagnosis TEXT NOT NULL,
            confidence REAL NOT NULL,
            PRIMARY KEY (case_id, diagnosis)
        );
        CREATE INDEX IF NOT EXISTS idx_case_diagnoses_diagnosis ON case_diagnoses(diagnosis);
        ",
    )
    .map_err(|e| AppError::Store(format!("sqlite: initialize schema: {e}")))?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(|e| AppError::Store(format!("sqlite: set user_version: {e}")))
}

/// Open a connection to `db_path` with WAL, foreign keys and a busy timeout.
fn open_conn(db_path: &Path) -> Result<Connection, AppError> {
    let conn = Connection::open(db_path)
        .map_err(|e| AppError::Store(format!("sqlite: open {}: {e}", db_path.display())))?;

    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| AppError::Store(format!("sqlite: set journal_mode WAL: {e}")))?;
    conn.pragma_update(None, "foreign_keys", "ON")
        .map_err(|e| AppError::Store(format!("sqlite: set foreign_keys ON: {e}")))?;
    conn.pragma_update(None, "busy_timeout", 5000)
        .map_err(|e| AppError::Store(format!("sqlite: set busy_timeout: {e}")))?;

    Ok(conn)
}

fn db_err(context: &'static str) -> impl Fn(rusqlite::Error) -> AppError {
    move |e| AppError::Store(format!("sqlite: {context}: {e}"))
}

#[derive(Debug, Clone)]
pub struct SqliteStore {
    db_path: PathBuf,
}

impl SqliteStore {
    /// Create `work_dir` if needed and initialise the schema.
    pub fn open(work_dir: &Path) -> Result<Self, AppError> {
        std::fs::create_dir_all(work_dir)?;
        let db_path = work_dir.join(DB_FILENAME);
        let conn = open_conn(&db_path)?;
        init_schema(&conn)?;
        Ok(Self { db_path })
    }

    async fn blocking<T, F>(&self, op: &'static str, f: F) -> Result<T, AppError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, AppError> + Send + 'static,
    {
        let db_path = self.db_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = open_conn(&db_path)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| AppError::Store(format!("sqlite {op} join: {e}")))?
    }

    pub async fn ping(&self) -> Result<(), AppError> {
        self.blocking("ping", |conn| {
            conn.query_row("SELECT 1", [], |_| Ok(())).map_err(db_err("ping"))
        })
        .await
    }

    pub async fn store_case(&self, record: &CaseRecord) -> Result<(), AppError> {
        let record = record.clone();
        self.blocking("store_case", move |conn| {
            let tx = conn.transaction().map_err(db_err("begin"))?;
            let case_id = record.case_id.to_string();
            tx.execute(
                "INSERT OR REPLACE INTO cases
                   (case_id, recorded_at, confidence, risk_level, user_role, sensitive_content)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    case_id,
                    record.recorded_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                    f64::from(record.confidence),
                    record.risk_level,
                    record.user_role.as_str(),
                    record.sensitive_content,
                ],
            )
            .map_err(db_err("insert case"))?;
            for symptom in &record.symptoms {
                let name = normalize_name(symptom);
                if name.is_empty() {
                    continue;
                }
                tx.execute(
                    "INSERT OR IGNORE INTO case_symptoms (case_id, symptom) VALUES (?1, ?2)",
                    params![case_id, name],
                )
                .map_err(db_err("insert symptom"))?;
            }
            for dx in &record.diagnoses {
                let name = normalize_name(&dx.name);
                if name.is_empty() {
                    continue;
                }
                tx.execute(
                    "INSERT OR REPLACE INTO case_diagnoses (case_id, diagnosis, confidence)
                     VALUES (?1, ?2, ?3)",
                    params![case_id, name, f64::from(dx.confidence)],
                )
                .map_err(db_err("insert diagnosis"))?;
            }
            tx.commit().map_err(db_err("commit"))
        })
        .await
    }

    pub async fn find_similar_cases(
        &self,
        symptoms: &[String],
        limit: usize,
    ) -> Result<Vec<SimilarCase>, AppError> {
        let symptoms = symptoms.to_vec();
        self.blocking("find_similar_cases", move |conn| {
            let placeholders = vec!["?"; symptoms.len()].join(", ");
            let sql = format!(
                "SELECT cs.case_id, COUNT(*) AS matches
                   FROM case_symptoms cs
                   JOIN cases c ON c.case_id = cs.case_id
                  WHERE cs.symptom IN ({placeholders})
                  GROUP BY cs.case_id
                  ORDER BY matches DESC, c.recorded_at DESC
                  LIMIT ?"
            );
            let mut bind: Vec<Value> = symptoms.iter().map(|s| Value::Text(s.clone())).collect();
            bind.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
            let mut stmt = conn.prepare(&sql).map_err(db_err("prepare similar"))?;
            let ranked = stmt
                .query_map(params_from_iter(bind.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(db_err("query similar"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_err("read similar"))?;

            let mut out = Vec::with_capacity(ranked.len());
            for (case_id, matches) in ranked {
                out.push(SimilarCase {
                    symptoms: column_for_case(
                        conn,
                        "SELECT symptom FROM case_symptoms WHERE case_id = ?1 ORDER BY symptom",
                        &case_id,
                    )?,
                    diagnoses: column_for_case(
                        conn,
                        "SELECT diagnosis FROM case_diagnoses WHERE case_id = ?1 ORDER BY confidence DESC",
                        &case_id,
                    )?,
                    matching_symptoms: u32::try_from(matches).unwrap_or(u32::MAX),
                    case_id,
                });
            }
            Ok(out)
        })
        .await
    }

    pub async fn symptom_relations(
        &self,
        symptom: &str,
        limit: usize,
    ) -> Result<Vec<SymptomRelation>, AppError> {
        let symptom = symptom.to_string();
        self.blocking("symptom_relations", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT relationship, kind, name, weight FROM (
                        SELECT 'ASSOCIATED_WITH' AS relationship, 'Diagnosis' AS kind,
                               d.diagnosis AS name, COUNT(DISTINCT d.case_id) AS weight
                          FROM case_symptoms s
                          JOIN case_diagnoses d ON d.case_id = s.case_id
                         WHERE s.symptom = ?1
                         GROUP BY d.diagnosis
                        UNION ALL
                        SELECT 'CO_OCCURS_WITH', 'Symptom',
                               o.symptom, COUNT(DISTINCT o.case_id)
                          FROM case_symptoms s
                          JOIN case_symptoms o ON o.case_id = s.case_id AND o.symptom <> s.symptom
                         WHERE s.symptom = ?1
                         GROUP BY o.symptom
                     )
                     ORDER BY weight DESC, name
                     LIMIT ?2",
                )
                .map_err(db_err("prepare relations"))?;
            let limit = i64::try_from(limit).unwrap_or(i64::MAX);
            stmt.query_map(params![symptom, limit], |row| {
                Ok(SymptomRelation {
                    symptom: symptom.clone(),
                    relationship: row.get(0)?,
                    related_kind: row.get(1)?,
                    related_name: row.get(2)?,
                })
            })
            .map_err(db_err("query relations"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err("read relations"))
        })
        .await
    }

    pub async fn find_comorbidities(&self, diagnosis: &str) -> Result<Vec<Comorbidity>, AppError> {
        let diagnosis = diagnosis.to_string();
        self.blocking("find_comorbidities", move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT d2.diagnosis, COUNT(DISTINCT d2.case_id) AS co
                       FROM case_diagnoses d1
                       JOIN case_diagnoses d2
                         ON d2.case_id = d1.case_id AND d2.diagnosis <> d1.diagnosis
                      WHERE d1.diagnosis = ?1
                      GROUP BY d2.diagnosis
                      ORDER BY co DESC, d2.diagnosis
                      LIMIT ?2",
                )
                .map_err(db_err("prepare comorbidities"))?;
            stmt.query_map(params![diagnosis, COMORBIDITY_LIMIT as i64], |row| {
                Ok(Comorbidity {
                    diagnosis: row.get(0)?,
                    co_occurrence: u64::try_from(row.get::<_, i64>(1)?).unwrap_or(0),
                })
            })
            .map_err(db_err("query comorbidities"))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err("read comorbidities"))
        })
        .await
    }

    pub async fn case_statistics(&self) -> Result<CaseStatistics, AppError> {
        self.blocking("case_statistics", |conn| {
            let count = |sql: &str| -> Result<u64, AppError> {
                conn.query_row(sql, [], |row| row.get::<_, i64>(0))
                    .map(|n| u64::try_from(n).unwrap_or(0))
                    .map_err(db_err("statistics"))
            };
            Ok(CaseStatistics {
                total_cases: count("SELECT COUNT(*) FROM cases")?,
                total_symptoms: count("SELECT COUNT(DISTINCT symptom) FROM case_symptoms")?,
                total_diagnoses: count("SELECT COUNT(DISTINCT diagnosis) FROM case_diagnoses")?,
                cases_with_diagnosis: count("SELECT COUNT(DISTINCT case_id) FROM case_diagnoses")?,
            })
        })
        .await
    }
}

fn column_for_case(conn: &Connection, sql: &str, case_id: &str) -> Result<Vec<String>, AppError> {
    let mut stmt = conn.prepare_cached(sql).map_err(db_err("prepare case column"))?;
    stmt.query_map(params![case_id], |row| row.get::<_, String>(0))
        .map_err(db_err("query case column"))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(db_err("read case column"))
}

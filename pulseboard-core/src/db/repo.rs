//! Database repository layer
//!
//! SQLite-backed implementation of [`DocumentStore`]. Collections are rows of
//! the `documents` table; filters and pipelines compile to `json_extract`
//! queries.

use super::query::{Condition, Document, DocumentStore, Filter, Pipeline, Projection};
use crate::error::{Error, Result};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, ErrorCode};
use serde_json::{json, Value};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default deadline for a single query.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of SQLite VM instructions between deadline checks.
const PROGRESS_CHECK_OPS: i32 = 1_000;

/// Database handle with connection pooling (single connection for now)
pub struct Database {
    conn: Mutex<Connection>,
    query_timeout: Duration,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
        })
    }

    /// Set the deadline applied to every read.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.connection();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        // Reads only; a poisoned lock still guards a consistent connection
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ============================================
    // Loading (bootstrap and tests only)
    // ============================================

    /// Insert one document into a collection.
    pub fn insert_document(&self, collection: &str, document: &Value) -> Result<i64> {
        let conn = self.connection();
        conn.execute(
            "INSERT INTO documents (collection, body) VALUES (?1, ?2)",
            params![collection, serde_json::to_string(document)?],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Insert many documents into a collection in one transaction.
    pub fn insert_documents(&self, collection: &str, documents: &[Value]) -> Result<usize> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare("INSERT INTO documents (collection, body) VALUES (?1, ?2)")?;
            for document in documents {
                stmt.execute(params![collection, serde_json::to_string(document)?])?;
            }
        }
        tx.commit()?;

        tracing::debug!(collection, count = documents.len(), "Inserted documents");
        Ok(documents.len())
    }

    /// Load a JSON Lines file into a collection. Blank lines are skipped.
    pub fn import_jsonl(&self, collection: &str, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path)?;
        let documents = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str::<Value>)
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let count = self.insert_documents(collection, &documents)?;
        tracing::info!(collection, path = %path.display(), count, "Imported documents");
        Ok(count)
    }

    /// Count documents in a collection.
    pub fn count_documents(&self, collection: &str) -> Result<i64> {
        let conn = self.connection();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            [collection],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// List collections with their document counts.
    pub fn list_collections(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            "SELECT collection, COUNT(*) FROM documents GROUP BY collection ORDER BY collection",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    // ============================================
    // Deadline handling
    // ============================================

    /// Run `f` with the query deadline armed.
    ///
    /// SQLite calls the progress handler every [`PROGRESS_CHECK_OPS`]
    /// instructions; once the deadline has passed the statement is
    /// interrupted and the call fails with [`Error::QueryTimeout`].
    fn with_deadline<T>(
        &self,
        collection: &str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let conn = self.connection();
        let deadline = Instant::now() + self.query_timeout;
        conn.progress_handler(PROGRESS_CHECK_OPS, Some(move || Instant::now() >= deadline));

        let started = Instant::now();
        let result = f(&conn);
        conn.progress_handler(0, None::<fn() -> bool>);

        match result {
            Ok(value) => {
                tracing::trace!(
                    collection,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Query completed"
                );
                Ok(value)
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::OperationInterrupted =>
            {
                let timeout_ms = self.query_timeout.as_millis() as u64;
                tracing::warn!(collection, timeout_ms, "Query interrupted by deadline");
                Err(Error::QueryTimeout {
                    collection: collection.to_string(),
                    timeout_ms,
                })
            }
            Err(e) => Err(Error::Database(e)),
        }
    }
}

impl DocumentStore for Database {
    fn find(
        &self,
        collection: &str,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Vec<Document>> {
        let (sql, args) = compile_find(collection, filter);
        tracing::debug!(collection, conditions = filter.conditions.len(), "find");

        let bodies: Vec<String> = self.with_deadline(collection, |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(args.iter()), |row| row.get(0))?;
            rows.collect()
        })?;

        let mut documents = Vec::with_capacity(bodies.len());
        for body in bodies {
            match serde_json::from_str::<Value>(&body)? {
                Value::Object(doc) => documents.push(projection.apply(doc)),
                other => {
                    tracing::warn!(collection, kind = %json_kind(&other), "Skipping non-object document");
                }
            }
        }
        Ok(documents)
    }

    fn aggregate(&self, collection: &str, pipeline: &Pipeline) -> Result<Vec<Document>> {
        tracing::debug!(collection, pipeline = pipeline.name(), "aggregate");

        let rows: Vec<Vec<SqlValue>> = self.with_deadline(collection, |conn| {
            let (sql, args, width) = compile_pipeline(collection, pipeline);
            let mut stmt = conn.prepare(sql.as_str())?;
            let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
                (0..width)
                    .map(|i| row.get::<_, SqlValue>(i))
                    .collect::<rusqlite::Result<Vec<SqlValue>>>()
            })?;
            rows.collect()
        })?;

        let columns = pipeline_columns(pipeline);
        Ok(rows
            .into_iter()
            .map(|values| {
                columns
                    .iter()
                    .zip(values)
                    .map(|(name, v)| (name.to_string(), sql_to_json(v)))
                    .collect()
            })
            .collect())
    }
}

// ============================================
// Query compilation
// ============================================

/// JSON path for a (possibly dotted) field name.
fn json_path(field: &str) -> String {
    format!("$.{field}")
}

fn compile_find(collection: &str, filter: &Filter) -> (String, Vec<SqlValue>) {
    let mut sql = String::from("SELECT body FROM documents WHERE collection = ?");
    let mut args = vec![SqlValue::Text(collection.to_string())];

    for condition in &filter.conditions {
        match condition {
            Condition::Eq { field, value } => {
                sql.push_str(" AND json_extract(body, ?) = ?");
                args.push(SqlValue::Text(json_path(field)));
                args.push(json_to_sql(value));
            }
            Condition::Range {
                field,
                lower,
                upper,
            } => {
                for (bound, inclusive_op, exclusive_op) in
                    [(lower, ">=", ">"), (upper, "<=", "<")]
                {
                    let (op, value) = match bound {
                        Bound::Included(v) => (inclusive_op, v),
                        Bound::Excluded(v) => (exclusive_op, v),
                        Bound::Unbounded => continue,
                    };
                    sql.push_str(&format!(" AND json_extract(body, ?) {op} ?"));
                    args.push(SqlValue::Text(json_path(field)));
                    args.push(json_to_sql(value));
                }
            }
        }
    }

    sql.push_str(" ORDER BY id");
    (sql, args)
}

fn compile_pipeline(collection: &str, pipeline: &Pipeline) -> (String, Vec<SqlValue>, usize) {
    let collection = SqlValue::Text(collection.to_string());
    match pipeline {
        Pipeline::DistinctUsersByCountry { heavy_only } => {
            let heavy = if *heavy_only {
                "AND json_extract(body, '$.cycles_consumed') >= json_extract(body, '$.max_cycles')"
            } else {
                ""
            };
            let sql = format!(
                r#"
                SELECT json_extract(body, '$.country') AS country,
                       COUNT(DISTINCT json_extract(body, '$.user_id')) AS users
                FROM documents
                WHERE collection = ?1 {heavy}
                GROUP BY country
                ORDER BY country
                "#
            );
            (sql, vec![collection], 2)
        }
        Pipeline::UsersByCountryAndCycles => (
            r#"
            SELECT json_extract(body, '$.country') AS country,
                   json_extract(body, '$.cycles_consumed') AS cycles,
                   COUNT(*) AS users
            FROM documents
            WHERE collection = ?1
            GROUP BY country, cycles
            ORDER BY country, cycles
            "#
            .to_string(),
            vec![collection],
            3,
        ),
        Pipeline::UsersByCyclesCountryYear => (
            r#"
            SELECT json_extract(body, '$.cycles_consumed') AS cycles,
                   json_extract(body, '$.country') AS country,
                   CAST(strftime('%Y', json_extract(body, '$.last_date')) AS INTEGER) AS year,
                   COUNT(*) AS users
            FROM documents
            WHERE collection = ?1
            GROUP BY cycles, country, year
            ORDER BY country, cycles, year
            "#
            .to_string(),
            vec![collection],
            4,
        ),
        Pipeline::DailyCountByEpoch {
            field,
            from,
            to,
            utc_offset_secs,
        } => (
            r#"
            SELECT date(json_extract(body, ?2) + ?3, 'unixepoch') AS localdate,
                   COUNT(*) AS count
            FROM documents
            WHERE collection = ?1
              AND json_extract(body, ?2) >= ?4
              AND json_extract(body, ?2) < ?5
            GROUP BY localdate
            ORDER BY localdate
            "#
            .to_string(),
            vec![
                collection,
                SqlValue::Text(json_path(field)),
                SqlValue::Integer(i64::from(*utc_offset_secs)),
                SqlValue::Integer(*from),
                SqlValue::Integer(*to),
            ],
            2,
        ),
    }
}

fn pipeline_columns(pipeline: &Pipeline) -> &'static [&'static str] {
    match pipeline {
        Pipeline::DistinctUsersByCountry { .. } => &["country", "users"],
        Pipeline::UsersByCountryAndCycles => &["country", "cycles_consumed", "users"],
        Pipeline::UsersByCyclesCountryYear => &["cycles_consumed", "country", "last_date", "users"],
        Pipeline::DailyCountByEpoch { .. } => &["localdate", "count"],
    }
}

fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn sql_to_json(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(i) => json!(i),
        SqlValue::Real(f) => json!(f),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::String(String::from_utf8_lossy(&b).into_owned()),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        let db = Database::open_in_memory().expect("open in-memory db");
        db.migrate().expect("migrate schema");
        db
    }

    #[test]
    fn test_find_range_and_projection() {
        let db = test_db();
        db.insert_documents(
            "dau-by-country",
            &[
                json!({"_id": "a", "date": "2025-01-01", "country": "AR", "dau": 10}),
                json!({"_id": "b", "date": "2025-01-02", "country": "AR", "dau": 12}),
                json!({"_id": "c", "date": "2025-01-03", "country": "AR", "dau": 14}),
            ],
        )
        .unwrap();
        db.insert_document("other", &json!({"date": "2025-01-02"}))
            .unwrap();

        let filter = Filter::new().range(
            "date",
            Bound::Included(json!("2025-01-02")),
            Bound::Excluded(json!("2025-01-04")),
        );
        let docs = db
            .find("dau-by-country", &filter, &Projection::fields(&["date", "dau"]))
            .unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["date"], "2025-01-02");
        assert!(!docs[0].contains_key("_id"));
        assert!(!docs[0].contains_key("country"));
    }

    #[test]
    fn test_find_nested_equality() {
        let db = test_db();
        db.insert_documents(
            "calls",
            &[
                json!({"localdate": "2025-01-01", "result": {"type": "youtube_transcription"}}),
                json!({"localdate": "2025-01-01", "result": {"type": "other"}}),
            ],
        )
        .unwrap();

        let filter = Filter::new().eq("result.type", "youtube_transcription");
        let docs = db.find("calls", &filter, &Projection::All).unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn test_distinct_users_by_country() {
        let db = test_db();
        db.insert_documents(
            "free",
            &[
                json!({"user_id": 1, "country": "AR", "cycles_consumed": 5, "max_cycles": 5}),
                json!({"user_id": 1, "country": "AR", "cycles_consumed": 1, "max_cycles": 5}),
                json!({"user_id": 2, "country": "AR", "cycles_consumed": 2, "max_cycles": 5}),
                json!({"user_id": 3, "country": "BR", "cycles_consumed": 9, "max_cycles": 3}),
            ],
        )
        .unwrap();

        let all = db
            .aggregate("free", &Pipeline::DistinctUsersByCountry { heavy_only: false })
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["country"], "AR");
        assert_eq!(all[0]["users"], 2);

        let heavy = db
            .aggregate("free", &Pipeline::DistinctUsersByCountry { heavy_only: true })
            .unwrap();
        assert_eq!(heavy.len(), 2);
        assert_eq!(heavy[0]["users"], 1);
        assert_eq!(heavy[1]["country"], "BR");
    }

    #[test]
    fn test_users_by_cycles_country_year() {
        let db = test_db();
        db.insert_documents(
            "free",
            &[
                json!({"country": "AR", "cycles_consumed": 2, "last_date": "2024-03-01T10:00:00Z"}),
                json!({"country": "AR", "cycles_consumed": 2, "last_date": "2024-07-11T10:00:00Z"}),
                json!({"country": "AR", "cycles_consumed": 2, "last_date": "2025-01-01T00:00:00Z"}),
            ],
        )
        .unwrap();

        let docs = db
            .aggregate("free", &Pipeline::UsersByCyclesCountryYear)
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["last_date"], 2024);
        assert_eq!(docs[0]["users"], 2);
        assert_eq!(docs[1]["last_date"], 2025);
    }

    #[test]
    fn test_daily_count_by_epoch_applies_offset() {
        let db = test_db();
        // 2025-01-02T01:00:00Z is still 2025-01-01 at UTC-3
        db.insert_documents(
            "lists",
            &[
                json!({"created_at": 1_735_779_600}),
                json!({"created_at": 1_735_819_200}),
            ],
        )
        .unwrap();

        let docs = db
            .aggregate(
                "lists",
                &Pipeline::DailyCountByEpoch {
                    field: "created_at".to_string(),
                    from: 0,
                    to: i64::MAX,
                    utc_offset_secs: -3 * 3600,
                },
            )
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["localdate"], "2025-01-01");
        assert_eq!(docs[0]["count"], 1);
        assert_eq!(docs[1]["localdate"], "2025-01-02");
    }

    #[test]
    fn test_query_timeout_interrupts_long_statement() {
        let db = test_db().with_query_timeout(Duration::from_millis(20));
        let result = db.with_deadline("slow", |conn| {
            conn.query_row(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) \
                 SELECT MAX(x) FROM c",
                [],
                |r| r.get::<_, i64>(0),
            )
        });
        assert!(matches!(result, Err(Error::QueryTimeout { .. })));

        // The handler is cleared afterwards
        assert_eq!(db.count_documents("slow").unwrap(), 0);
    }
}

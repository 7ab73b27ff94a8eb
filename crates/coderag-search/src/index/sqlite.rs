//! SQLite-backed index backends.
//!
//! Both backends keep document fields in a plain table keyed by identity key.
//! The vector store keeps embeddings as JSON arrays and scores them by
//! brute-force cosine; the full-text store mirrors searchable columns into an
//! FTS5 table and ranks with `bm25()`.
//!
//! # Tokenizer
//!
//! FTS5 `unicode61` without stemming. It splits on `_`, so `parse_json` in a
//! query becomes the phrase `"parse json"` and still matches identifiers.

use anyhow::{Context, Result};
use coderag_core::error::RetrievalError;
use coderag_core::model::{Document, HitFilter, ScoredHit, VectorPoint, assign_ranks};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};
use std::path::Path;
use tracing::debug;

use super::{FullTextIndex, SuggestField, VectorIndex, cosine_score};
use crate::lexical::tokenize;

const DOCUMENT_COLUMNS: &str =
    "d.id, d.file_path, d.start_line, d.end_line, d.content, d.structure_type, d.structure_name";

fn document_from_row(row: &Row<'_>) -> rusqlite::Result<Document> {
    Ok(Document {
        id: row.get(0)?,
        file_path: row.get(1)?,
        start_line: row.get(2)?,
        end_line: row.get(3)?,
        content: row.get(4)?,
        structure_type: row.get(5)?,
        structure_name: row.get(6)?,
    })
}

fn open_connection(path: &Path) -> Result<Connection> {
    Connection::open(path).with_context(|| format!("open index database {}", path.display()))
}

// ---------------------------------------------------------------------------
// Vector store
// ---------------------------------------------------------------------------

const VECTOR_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS vector_points (
    doc_key        TEXT PRIMARY KEY,
    id             TEXT NOT NULL,
    file_path      TEXT NOT NULL,
    start_line     INTEGER,
    end_line       INTEGER,
    content        TEXT NOT NULL,
    structure_type TEXT,
    structure_name TEXT,
    embedding_json TEXT NOT NULL
);";

/// Vector store persisted in SQLite, scanned in full on every search.
pub struct SqliteVectorIndex {
    conn: Mutex<Connection>,
    dimension: usize,
}

impl SqliteVectorIndex {
    /// Open (or create) the store at `path`.
    ///
    /// # Errors
    ///
    /// Fails when the database cannot be opened or the schema cannot be created.
    pub fn open(path: &Path, dimension: usize) -> Result<Self> {
        Self::from_connection(open_connection(path)?, dimension)
    }

    /// # Errors
    ///
    /// Fails when the schema cannot be created.
    pub fn open_in_memory(dimension: usize) -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory vector db")?;
        Self::from_connection(conn, dimension)
    }

    fn from_connection(conn: Connection, dimension: usize) -> Result<Self> {
        conn.execute_batch(VECTOR_SCHEMA)
            .context("create vector_points table")?;
        Ok(Self {
            conn: Mutex::new(conn),
            dimension,
        })
    }
}

impl VectorIndex for SqliteVectorIndex {
    fn name(&self) -> &'static str {
        "sqlite-vector"
    }

    fn add(&self, points: &[VectorPoint]) -> Result<usize> {
        for point in points {
            point.document.validate()?;
            if point.embedding.len() != self.dimension {
                return Err(RetrievalError::invalid_input(format!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    point.embedding.len()
                ))
                .into());
            }
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("begin vector upsert")?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR REPLACE INTO vector_points
                     (doc_key, id, file_path, start_line, end_line, content,
                      structure_type, structure_name, embedding_json)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )
                .context("prepare vector upsert")?;
            for point in points {
                let doc = &point.document;
                let embedding_json =
                    serde_json::to_string(&point.embedding).context("encode embedding")?;
                stmt.execute(params![
                    doc.identity_key(),
                    doc.id,
                    doc.file_path,
                    doc.start_line,
                    doc.end_line,
                    doc.content,
                    doc.structure_type,
                    doc.structure_name,
                    embedding_json,
                ])
                .with_context(|| format!("upsert vector point {}", doc.identity_key()))?;
            }
        }
        tx.commit().context("commit vector upsert")?;
        Ok(points.len())
    }

    fn search(&self, embedding: &[f32], k: usize) -> Result<Vec<ScoredHit>> {
        if embedding.len() != self.dimension {
            return Err(RetrievalError::invalid_input(format!(
                "query embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                embedding.len()
            ))
            .into());
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {DOCUMENT_COLUMNS}, d.embedding_json FROM vector_points d ORDER BY d.rowid"
            ))
            .context("prepare vector scan")?;
        let rows = stmt
            .query_map([], |row| Ok((document_from_row(row)?, row.get::<_, String>(7)?)))
            .context("execute vector scan")?;

        let mut hits = Vec::new();
        for row in rows {
            let (document, embedding_json) = row.context("read vector row")?;
            let stored: Vec<f32> = match serde_json::from_str(&embedding_json) {
                Ok(value) => value,
                Err(err) => {
                    debug!(key = document.identity_key(), %err, "skipping malformed embedding row");
                    continue;
                }
            };
            if stored.len() != self.dimension {
                debug!(
                    key = document.identity_key(),
                    dimension = stored.len(),
                    "skipping embedding row with wrong dimension"
                );
                continue;
            }
            hits.push(ScoredHit::new(document, cosine_score(embedding, &stored), 0));
        }

        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(k);
        assign_ranks(&mut hits);
        Ok(hits)
    }

    fn clear(&self) -> Result<()> {
        self.conn
            .lock()
            .execute("DELETE FROM vector_points", [])
            .context("clear vector_points")?;
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM vector_points", [], |row| row.get(0))
            .context("count vector points")?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// Full-text store
// ---------------------------------------------------------------------------

const FULLTEXT_SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS fts_documents (
    doc_key        TEXT PRIMARY KEY,
    id             TEXT NOT NULL,
    file_path      TEXT NOT NULL,
    start_line     INTEGER,
    end_line       INTEGER,
    content        TEXT NOT NULL,
    structure_type TEXT,
    structure_name TEXT
);
CREATE VIRTUAL TABLE IF NOT EXISTS code_fts USING fts5(
    doc_key UNINDEXED,
    content,
    structure_name,
    file_path,
    tokenize = 'unicode61'
);";

/// Column weights for `bm25()`: content, structure name, file path. The
/// unindexed `doc_key` column is weighted 0.
const BM25_WEIGHTS: (f64, f64, f64) = (1.0, 2.0, 0.5);

/// FTS5 full-text index.
pub struct SqliteFullTextIndex {
    conn: Mutex<Connection>,
}

impl SqliteFullTextIndex {
    /// Open (or create) the index at `path`.
    ///
    /// # Errors
    ///
    /// Fails when the database cannot be opened or FTS5 is unavailable.
    pub fn open(path: &Path) -> Result<Self> {
        Self::from_connection(open_connection(path)?)
    }

    /// # Errors
    ///
    /// Fails when FTS5 is unavailable.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory full-text db")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(FULLTEXT_SCHEMA)
            .context("create FTS5 tables")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn query(&self, query: &str, limit: usize, filter: &HitFilter) -> Result<Vec<ScoredHit>> {
        let Some(match_expr) = fts_match_expression(query) else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut sql = format!(
            "SELECT {DOCUMENT_COLUMNS}, bm25(code_fts, 0.0, ?1, ?2, ?3) AS rank \
             FROM code_fts f \
             INNER JOIN fts_documents d ON d.doc_key = f.doc_key \
             WHERE code_fts MATCH ?4"
        );
        let (w_content, w_name, w_path) = BM25_WEIGHTS;
        let mut args = vec![
            Value::Real(w_content),
            Value::Real(w_name),
            Value::Real(w_path),
            Value::Text(match_expr),
        ];
        if let Some(prefix) = &filter.file_path_prefix {
            args.push(Value::Text(format!("{}%", escape_like(prefix))));
            sql.push_str(&format!(" AND d.file_path LIKE ?{} ESCAPE '\\'", args.len()));
        }
        if let Some(structure_type) = &filter.structure_type {
            args.push(Value::Text(structure_type.clone()));
            sql.push_str(&format!(" AND d.structure_type = ?{}", args.len()));
        }
        args.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        sql.push_str(&format!(" ORDER BY rank LIMIT ?{}", args.len()));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).context("prepare FTS5 search")?;
        let rows = stmt
            .query_map(params_from_iter(args), |row| {
                Ok((document_from_row(row)?, row.get::<_, f64>(7)?))
            })
            .with_context(|| format!("execute FTS5 search for '{query}'"))?;

        let mut hits = Vec::new();
        for row in rows {
            let (document, rank) = row.context("read FTS5 search hit")?;
            // bm25() is lower-is-better and negative for matches.
            #[allow(clippy::cast_possible_truncation)]
            let score = (-rank).max(0.0) as f32;
            hits.push(ScoredHit::new(document, score, 0));
        }
        assign_ranks(&mut hits);
        Ok(hits)
    }
}

impl FullTextIndex for SqliteFullTextIndex {
    fn name(&self) -> &'static str {
        "sqlite-fts5"
    }

    fn add(&self, documents: &[Document]) -> Result<usize> {
        for doc in documents {
            doc.validate()?;
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("begin full-text upsert")?;
        for doc in documents {
            let key = doc.identity_key();
            tx.execute("DELETE FROM code_fts WHERE doc_key = ?1", [key])
                .with_context(|| format!("drop stale FTS5 row for {key}"))?;
            tx.execute(
                "INSERT OR REPLACE INTO fts_documents
                 (doc_key, id, file_path, start_line, end_line, content, structure_type, structure_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    key,
                    doc.id,
                    doc.file_path,
                    doc.start_line,
                    doc.end_line,
                    doc.content,
                    doc.structure_type,
                    doc.structure_name,
                ],
            )
            .with_context(|| format!("upsert document {key}"))?;
            tx.execute(
                "INSERT INTO code_fts (doc_key, content, structure_name, file_path)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    key,
                    doc.content,
                    doc.structure_name.as_deref().unwrap_or_default(),
                    doc.file_path,
                ],
            )
            .with_context(|| format!("index document {key}"))?;
        }
        tx.commit().context("commit full-text upsert")?;
        Ok(documents.len())
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredHit>> {
        self.query(query, limit, &HitFilter::default())
    }

    fn search_filtered(
        &self,
        query: &str,
        limit: usize,
        filter: &HitFilter,
    ) -> Result<Vec<ScoredHit>> {
        self.query(query, limit, filter)
    }

    /// SQLite's `lower()` folds ASCII letters only.
    fn suggest(&self, prefix: &str, field: SuggestField, limit: usize) -> Result<Vec<String>> {
        if prefix.trim().is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let column = field.column();
        let sql = format!(
            "SELECT {column} FROM fts_documents \
             WHERE {column} IS NOT NULL AND lower({column}) LIKE ?1 ESCAPE '\\' \
             GROUP BY {column} ORDER BY MIN(rowid) LIMIT ?2"
        );
        let pattern = format!("{}%", escape_like(&prefix.to_lowercase()));

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).context("prepare suggest query")?;
        let rows = stmt
            .query_map(
                params![pattern, i64::try_from(limit).unwrap_or(i64::MAX)],
                |row| row.get::<_, String>(0),
            )
            .with_context(|| format!("execute suggest for '{prefix}'"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("read suggestion")
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().context("begin full-text delete")?;
        let existed = tx
            .query_row(
                "SELECT 1 FROM fts_documents WHERE doc_key = ?1",
                [id],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .context("look up document for delete")?
            .is_some();
        tx.execute("DELETE FROM code_fts WHERE doc_key = ?1", [id])
            .context("delete FTS5 row")?;
        tx.execute("DELETE FROM fts_documents WHERE doc_key = ?1", [id])
            .context("delete document row")?;
        tx.commit().context("commit full-text delete")?;
        Ok(existed)
    }

    fn clear(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch("DELETE FROM code_fts; DELETE FROM fts_documents;")
            .context("clear full-text index")?;
        Ok(())
    }

    fn len(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM fts_documents", [], |row| row.get(0))
            .context("count full-text documents")?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

/// Turn free text into an FTS5 query that matches any of its words.
///
/// Each token is quoted so FTS5 operators and punctuation in user input are
/// never interpreted. `None` when the text has no searchable tokens.
fn fts_match_expression(query: &str) -> Option<String> {
    let terms: Vec<String> = tokenize(query)
        .into_iter()
        .map(|t| format!("\"{t}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, path: &str, content: &str) -> Document {
        Document::new(id, path, content)
    }

    #[test]
    fn match_expression_quotes_terms() {
        assert_eq!(
            fts_match_expression("parse_json OR \"drop\"").as_deref(),
            Some("\"parse_json\" OR \"or\" OR \"drop\"")
        );
        assert_eq!(fts_match_expression(" :: -> "), None);
    }

    #[test]
    fn like_patterns_are_escaped() {
        assert_eq!(escape_like("src/my_mod%"), "src/my\\_mod\\%");
    }

    #[test]
    fn vector_store_round_trips_documents() {
        let index = SqliteVectorIndex::open_in_memory(2).expect("open");
        let document = doc("a", "src/a.rs", "fn a() {}")
            .with_lines(3, 9)
            .with_structure("function", "a");
        index
            .add(&[
                VectorPoint::new(document.clone(), vec![1.0, 0.0]),
                VectorPoint::new(doc("b", "src/b.rs", "fn b() {}"), vec![0.0, 1.0]),
            ])
            .expect("add");

        let hits = index.search(&[1.0, 0.0], 1).expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document, document);
        assert_eq!(hits[0].rank, 1);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn vector_store_upserts_and_clears() {
        let index = SqliteVectorIndex::open_in_memory(2).expect("open");
        index
            .add(&[VectorPoint::new(doc("a", "a.rs", "old"), vec![1.0, 0.0])])
            .expect("add");
        index
            .add(&[VectorPoint::new(doc("a", "a.rs", "new"), vec![1.0, 0.0])])
            .expect("re-add");
        assert_eq!(index.len().expect("len"), 1);
        assert_eq!(
            index.search(&[1.0, 0.0], 5).expect("search")[0].document.content,
            "new"
        );

        index.clear().expect("clear");
        assert!(index.is_empty().expect("is_empty"));
    }

    #[test]
    fn vector_store_rejects_wrong_dimension() {
        let index = SqliteVectorIndex::open_in_memory(3).expect("open");
        assert!(index.search(&[1.0], 5).is_err());
        assert!(
            index
                .add(&[VectorPoint::new(doc("a", "a.rs", "x"), vec![1.0])])
                .is_err()
        );
    }

    #[test]
    fn vector_store_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vectors.db");
        {
            let index = SqliteVectorIndex::open(&path, 2).expect("open");
            index
                .add(&[VectorPoint::new(doc("a", "a.rs", "persisted"), vec![0.6, 0.8])])
                .expect("add");
        }
        let reopened = SqliteVectorIndex::open(&path, 2).expect("reopen");
        assert_eq!(reopened.len().expect("len"), 1);
    }

    fn fts() -> SqliteFullTextIndex {
        let index = SqliteFullTextIndex::open_in_memory().expect("open");
        index
            .add(&[
                doc("auth", "src/auth.rs", "verify oauth token expiry")
                    .with_structure("function", "verify_token"),
                doc("pool", "src/db/pool.rs", "database connection pool timeout")
                    .with_structure("struct", "Pool"),
                doc("docs", "docs/readme.md", "how to configure the token cache"),
            ])
            .expect("add");
        index
    }

    #[test]
    fn fts_search_ranks_matches() {
        let index = fts();
        let hits = index.search("token", 10).expect("search");
        let ids: Vec<_> = hits.iter().map(|h| h.document.id.as_str()).collect();
        assert_eq!(hits.len(), 2);
        assert!(ids.contains(&"auth") && ids.contains(&"docs"));
        assert!(hits.iter().all(|h| h.score >= 0.0));
        assert_eq!(hits[0].rank, 1);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn fts_query_syntax_in_input_is_inert() {
        let index = fts();
        assert!(index.search("\"unbalanced AND (", 5).is_ok());
        assert!(index.search("*", 5).expect("search").is_empty());
    }

    #[test]
    fn fts_filtered_search() {
        let index = fts();
        let hits = index
            .search_filtered("token", 10, &HitFilter::file_path_prefix("src/"))
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document.id, "auth");

        let none = index
            .search_filtered("token", 10, &HitFilter::default().with_structure_type("struct"))
            .expect("search");
        assert!(none.is_empty());
    }

    #[test]
    fn fts_upsert_replaces_content() {
        let index = fts();
        index
            .add(&[doc("pool", "src/db/pool.rs", "retry with exponential backoff")])
            .expect("upsert");
        assert_eq!(index.len().expect("len"), 3);
        assert!(index.search("timeout", 5).expect("search").is_empty());
        assert_eq!(index.search("backoff", 5).expect("search")[0].document.id, "pool");
    }

    #[test]
    fn fts_delete_and_clear() {
        let index = fts();
        assert!(index.delete("auth").expect("delete"));
        assert!(!index.delete("auth").expect("delete again"));
        assert_eq!(index.search("oauth", 5).expect("search").len(), 0);

        index.clear().expect("clear");
        index.clear().expect("clear twice");
        assert!(index.is_empty().expect("is_empty"));
    }

    #[test]
    fn fts_suggest_by_prefix() {
        let index = fts();
        assert_eq!(
            index.suggest("VER", SuggestField::StructureName, 5).expect("suggest"),
            vec!["verify_token"]
        );
        assert_eq!(
            index.suggest("src/", SuggestField::FilePath, 5).expect("suggest"),
            vec!["src/auth.rs", "src/db/pool.rs"]
        );
        assert_eq!(
            index.suggest("src/", SuggestField::FilePath, 1).expect("suggest"),
            vec!["src/auth.rs"]
        );
        assert!(index.suggest("", SuggestField::Content, 5).expect("suggest").is_empty());
        assert!(index.suggest("100%", SuggestField::Content, 5).expect("suggest").is_empty());
    }
}

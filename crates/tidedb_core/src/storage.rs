//! SQLite storage adapter.
//!
//! A thin, typed layer over the relational engine: it owns the connection,
//! the `docs` schema, and every SQL statement the store issues. Callers
//! above it deal in [`RevisionRow`]s, never in SQL.
//!
//! Statement handles are prepared through the connection's statement cache
//! and dropped on every exit path, so no query leaves a live cursor behind.

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::revid::RevId;
use crate::transaction::{ScopeOutcome, TransactionState};
use crate::types::Sequence;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tracing::trace;

/// The authoritative schema. `sequence` must be `AUTOINCREMENT` so values
/// are monotonic and never reused, even across deletes; uniqueness of
/// `(docid, revid)` is an invariant and is enforced by index.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS docs (
    sequence INTEGER PRIMARY KEY AUTOINCREMENT,
    docid    TEXT NOT NULL,
    revid    TEXT NOT NULL,
    parent   INTEGER NULL REFERENCES docs(sequence) ON DELETE SET NULL,
    current  BOOLEAN NOT NULL,
    deleted  BOOLEAN NOT NULL DEFAULT 0,
    json     BLOB NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS docs_by_revid ON docs(docid, revid);
CREATE INDEX IF NOT EXISTS docs_current ON docs(docid, current);
";

/// One row of the `docs` table.
#[derive(Debug, Clone)]
pub(crate) struct RevisionRow {
    pub sequence: Sequence,
    pub doc_id: String,
    pub rev_id: RevId,
    pub parent: Option<Sequence>,
    pub current: bool,
    pub deleted: bool,
    pub json: Option<Vec<u8>>,
}

impl RevisionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            sequence: row.get("sequence")?,
            doc_id: row.get("docid")?,
            rev_id: row.get("revid")?,
            parent: row.get("parent")?,
            current: row.get("current")?,
            deleted: row.get("deleted")?,
            json: row.get("json")?,
        })
    }
}

const ROW_COLUMNS: &str = "sequence, docid, revid, parent, current, deleted, json";

/// Owns the SQLite connection and the transaction scope state.
pub(crate) struct Storage {
    conn: Connection,
    txn: TransactionState,
}

impl Storage {
    /// Opens (and if permitted, creates) the single-file database at `path`.
    pub(crate) fn open(path: &Path, config: &Config) -> CoreResult<Self> {
        let exists = path.exists();
        if !exists && !config.create_if_missing {
            return Err(CoreError::not_found(format!(
                "database file {} does not exist",
                path.display()
            )));
        }
        if exists && config.error_if_exists {
            return Err(CoreError::bad_request(format!(
                "database file {} already exists",
                path.display()
            )));
        }
        Self::initialize(Connection::open(path)?, config)
    }

    /// Opens a fresh in-memory database.
    pub(crate) fn open_in_memory(config: &Config) -> CoreResult<Self> {
        Self::initialize(Connection::open_in_memory()?, config)
    }

    fn initialize(conn: Connection, config: &Config) -> CoreResult<Self> {
        conn.busy_timeout(config.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            txn: TransactionState::new(),
        })
    }

    // ---- transaction scoping -------------------------------------------

    /// Enters a scope, issuing the real `BEGIN` on the outermost entry.
    pub(crate) fn begin(&self) -> CoreResult<()> {
        if self.txn.will_enter() {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
            trace!("transaction begun");
        }
        self.txn.entered();
        Ok(())
    }

    /// Leaves a scope. On the outermost exit, commits unless the fail flag
    /// was set, in which case it rolls back. Returns the outcome (`None`
    /// while still nested).
    pub(crate) fn end(&self) -> CoreResult<Option<ScopeOutcome>> {
        let Some(outcome) = self.txn.exited() else {
            return Ok(None);
        };
        match outcome {
            ScopeOutcome::Committed => {
                if let Err(err) = self.conn.execute_batch("COMMIT") {
                    // A failed COMMIT leaves the transaction open; make
                    // sure it is torn down before surfacing the error.
                    let _ = self.conn.execute_batch("ROLLBACK");
                    return Err(err.into());
                }
                trace!("transaction committed");
            }
            ScopeOutcome::RolledBack => {
                self.conn.execute_batch("ROLLBACK")?;
                trace!("transaction rolled back");
            }
        }
        Ok(Some(outcome))
    }

    /// Dooms the current transaction. Write-once until the outermost exit.
    pub(crate) fn mark_failed(&self) {
        self.txn.mark_failed();
    }

    /// True while any scope is open.
    pub(crate) fn in_transaction(&self) -> bool {
        self.txn.in_transaction()
    }

    /// True if the current transaction will roll back.
    pub(crate) fn is_failed(&self) -> bool {
        self.txn.is_failed()
    }

    // ---- writes ---------------------------------------------------------

    /// Inserts a revision row and returns its assigned sequence.
    pub(crate) fn insert_revision(
        &self,
        doc_id: &str,
        rev_id: &RevId,
        parent: Option<Sequence>,
        current: bool,
        deleted: bool,
        json: Option<&[u8]>,
    ) -> CoreResult<Sequence> {
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO docs (docid, revid, parent, current, deleted, json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        stmt.execute(params![doc_id, rev_id, parent, current, deleted, json])?;
        Ok(Sequence::new(self.conn.last_insert_rowid()))
    }

    /// Demotes a row from the leaf set.
    pub(crate) fn set_not_current(&self, sequence: Sequence) -> CoreResult<()> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE docs SET current = 0 WHERE sequence = ?1")?;
        stmt.execute(params![sequence])?;
        Ok(())
    }

    /// Discards the bodies of all non-current revisions. Returns the
    /// number of rows affected.
    pub(crate) fn null_non_current_json(&self) -> CoreResult<usize> {
        let mut stmt = self
            .conn
            .prepare_cached("UPDATE docs SET json = NULL WHERE current = 0 AND json IS NOT NULL")?;
        Ok(stmt.execute([])?)
    }

    /// Reclaims file space. Must run outside any transaction.
    pub(crate) fn vacuum(&self) -> CoreResult<()> {
        debug_assert!(!self.in_transaction());
        self.conn.execute_batch("VACUUM")?;
        Ok(())
    }

    // ---- single-revision reads -----------------------------------------

    /// Fetches the row addressed by `(doc_id, rev_id)`.
    pub(crate) fn revision_row(
        &self,
        doc_id: &str,
        rev_id: &RevId,
    ) -> CoreResult<Option<RevisionRow>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {ROW_COLUMNS} FROM docs WHERE docid = ?1 AND revid = ?2"
        ))?;
        Ok(stmt
            .query_row(params![doc_id, rev_id], RevisionRow::from_row)
            .optional()?)
    }

    /// Fetches the winning current row of a document: the current leaf
    /// with the byte-lexicographically greatest rev ID, deleted or not.
    pub(crate) fn winning_row(&self, doc_id: &str) -> CoreResult<Option<RevisionRow>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {ROW_COLUMNS} FROM docs
             WHERE docid = ?1 AND current = 1
             ORDER BY revid DESC LIMIT 1"
        ))?;
        Ok(stmt
            .query_row(params![doc_id], RevisionRow::from_row)
            .optional()?)
    }

    /// Like [`Storage::winning_row`] but skips deletion tombstones.
    pub(crate) fn winning_live_row(&self, doc_id: &str) -> CoreResult<Option<RevisionRow>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {ROW_COLUMNS} FROM docs
             WHERE docid = ?1 AND current = 1 AND deleted = 0
             ORDER BY revid DESC LIMIT 1"
        ))?;
        Ok(stmt
            .query_row(params![doc_id], RevisionRow::from_row)
            .optional()?)
    }

    /// True if the document has any current leaf, live or deleted.
    pub(crate) fn has_current_revision(&self, doc_id: &str) -> CoreResult<bool> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT 1 FROM docs WHERE docid = ?1 AND current = 1 LIMIT 1")?;
        Ok(stmt.exists(params![doc_id])?)
    }

    // ---- multi-revision reads ------------------------------------------

    /// All current non-deleted leaves of a document, winning rev first.
    pub(crate) fn current_leaf_rows(&self, doc_id: &str) -> CoreResult<Vec<RevisionRow>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {ROW_COLUMNS} FROM docs
             WHERE docid = ?1 AND current = 1 AND deleted = 0
             ORDER BY revid DESC"
        ))?;
        let rows = stmt.query_map(params![doc_id], RevisionRow::from_row)?;
        collect_rows(rows)
    }

    /// Every revision of a document, newest sequence first.
    pub(crate) fn doc_rows(&self, doc_id: &str) -> CoreResult<Vec<RevisionRow>> {
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {ROW_COLUMNS} FROM docs WHERE docid = ?1 ORDER BY sequence DESC"
        ))?;
        let rows = stmt.query_map(params![doc_id], RevisionRow::from_row)?;
        collect_rows(rows)
    }

    /// Current rows with `sequence > since`, ascending, capped at `limit`.
    pub(crate) fn rows_since(&self, since: Sequence, limit: usize) -> CoreResult<Vec<RevisionRow>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = self.conn.prepare_cached(&format!(
            "SELECT {ROW_COLUMNS} FROM docs
             WHERE sequence > ?1 AND current = 1
             ORDER BY sequence ASC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![since, limit], RevisionRow::from_row)?;
        collect_rows(rows)
    }

    /// Winning live revision per document over an optional doc-ID range,
    /// paginated. With `descending`, the range bounds swap roles so
    /// `start_key` is always the first key in iteration order.
    pub(crate) fn all_docs_rows(
        &self,
        start_key: Option<&str>,
        end_key: Option<&str>,
        descending: bool,
        limit: usize,
        skip: usize,
    ) -> CoreResult<Vec<RevisionRow>> {
        let mut sql = String::from(
            "SELECT sequence, docid, MAX(revid) AS revid, parent, current, deleted, json
             FROM docs WHERE current = 1 AND deleted = 0",
        );
        let (lower, upper) = if descending {
            (end_key, start_key)
        } else {
            (start_key, end_key)
        };
        let mut args: Vec<&dyn rusqlite::ToSql> = Vec::new();
        if let Some(lower) = &lower {
            sql.push_str(" AND docid >= ?");
            args.push(lower);
        }
        if let Some(upper) = &upper {
            sql.push_str(" AND docid <= ?");
            args.push(upper);
        }
        sql.push_str(" GROUP BY docid ORDER BY docid");
        if descending {
            sql.push_str(" DESC");
        }
        sql.push_str(" LIMIT ? OFFSET ?");
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let skip = i64::try_from(skip).unwrap_or(i64::MAX);
        args.push(&limit);
        args.push(&skip);

        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(args.as_slice(), RevisionRow::from_row)?;
        collect_rows(rows)
    }

    /// `(docid, revid)` pairs from `candidates` that exist locally.
    ///
    /// One indexed query over the union of doc IDs and rev IDs; the pair
    /// match is exact because results are checked against the unique
    /// `(docid, revid)` index.
    pub(crate) fn existing_pairs(
        &self,
        doc_ids: &[&str],
        rev_ids: &[&str],
    ) -> CoreResult<Vec<(String, RevId)>> {
        if doc_ids.is_empty() || rev_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut sql = String::from("SELECT docid, revid FROM docs WHERE docid IN (");
        push_placeholders(&mut sql, doc_ids.len());
        sql.push_str(") AND revid IN (");
        push_placeholders(&mut sql, rev_ids.len());
        sql.push(')');

        let mut args: Vec<&dyn rusqlite::ToSql> = Vec::with_capacity(doc_ids.len() + rev_ids.len());
        for id in doc_ids {
            args.push(id);
        }
        for id in rev_ids {
            args.push(id);
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(args.as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, RevId>(1)?))
        })?;
        let mut pairs = Vec::new();
        for pair in rows {
            pairs.push(pair?);
        }
        Ok(pairs)
    }

    // ---- aggregates -----------------------------------------------------

    /// Greatest sequence ever assigned; zero on an empty store.
    pub(crate) fn max_sequence(&self) -> CoreResult<Sequence> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT IFNULL(MAX(sequence), 0) FROM docs")?;
        Ok(stmt.query_row([], |row| row.get(0))?)
    }

    /// Number of distinct documents with a live current leaf.
    pub(crate) fn live_document_count(&self) -> CoreResult<u64> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT COUNT(DISTINCT docid) FROM docs WHERE current = 1 AND deleted = 0",
        )?;
        let count: i64 = stmt.query_row([], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Total row count, used by tests and diagnostics.
    pub(crate) fn row_count(&self) -> CoreResult<u64> {
        let mut stmt = self.conn.prepare_cached("SELECT COUNT(*) FROM docs")?;
        let count: i64 = stmt.query_row([], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

fn push_placeholders(sql: &mut String, n: usize) {
    for i in 0..n {
        if i > 0 {
            sql.push(',');
        }
        sql.push('?');
    }
}

fn collect_rows(
    rows: impl Iterator<Item = rusqlite::Result<RevisionRow>>,
) -> CoreResult<Vec<RevisionRow>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

//! Database facade.
//!
//! [`Database`] is the primary entry point: it owns the storage adapter,
//! enforces the revision-tree invariants on every write, assigns sequence
//! numbers, and dispatches change notifications after commit.
//!
//! The store is single-writer, multi-reader within a process. The handle
//! is `Send` but not `Sync`; callers on multiple threads must serialize
//! access externally, which matches the single underlying SQL connection.

use crate::change_feed::{ChangeEvent, ChangeFeed};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::query::{AllDocsPage, QueryOptions};
use crate::revid::RevId;
use crate::revision::{Body, NewRevision, Revision};
use crate::storage::{RevisionRow, Storage};
use crate::transaction::ScopeOutcome;
use crate::types::{Sequence, Status};
use parking_lot::Mutex;
use serde_json::Value;
use std::cell::Cell;
use std::path::Path;
use tracing::{debug, warn};
use uuid::Uuid;

/// A snapshot of store-level counters, taken in a single transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Documents with at least one live current revision.
    pub document_count: u64,
    /// Greatest sequence ever assigned.
    pub last_sequence: Sequence,
}

/// The document-revision store.
///
/// Documents are versioned JSON bodies arranged in a branching revision
/// DAG. Local writers use [`Database::put`]; replication splices remote
/// chains in with [`Database::force_insert`] and reads the cursor with
/// [`Database::changes_since`].
///
/// # Opening a store
///
/// ```rust,ignore
/// use tidedb_core::Database;
/// use std::path::Path;
///
/// let db = Database::open(Path::new("app.tidedb"))?;
/// ```
///
/// For tests, [`Database::open_in_memory`] gives a non-persistent store.
pub struct Database {
    storage: Storage,
    feed: ChangeFeed,
    /// Changes committed by the open transaction, not yet visible to
    /// observers. Flushed to the feed on outermost commit, discarded on
    /// rollback.
    pending: Mutex<Vec<ChangeEvent>>,
    is_open: Cell<bool>,
}

impl Database {
    /// Opens the single-file store at `path` with default configuration.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens the single-file store at `path`.
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let storage = Storage::open(path, &config)?;
        debug!(path = %path.display(), "database opened");
        Ok(Self::with_storage(storage, &config))
    }

    /// Opens a fresh in-memory store, mainly for tests.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_in_memory_with_config(Config::default())
    }

    /// Opens a fresh in-memory store with explicit configuration.
    pub fn open_in_memory_with_config(config: Config) -> CoreResult<Self> {
        let storage = Storage::open_in_memory(&config)?;
        Ok(Self::with_storage(storage, &config))
    }

    fn with_storage(storage: Storage, config: &Config) -> Self {
        Self {
            storage,
            feed: ChangeFeed::new(config.change_history_limit),
            pending: Mutex::new(Vec::new()),
            is_open: Cell::new(true),
        }
    }

    /// Returns true until [`Database::close`] is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.is_open.get()
    }

    /// Closes the store. Subsequent operations fail with
    /// [`CoreError::Closed`]; the underlying file handle is released when
    /// the value is dropped.
    pub fn close(&self) -> CoreResult<()> {
        self.check_open()?;
        self.is_open.set(false);
        debug!("database closed");
        Ok(())
    }

    pub(crate) fn check_open(&self) -> CoreResult<()> {
        if self.is_open.get() {
            Ok(())
        } else {
            Err(CoreError::Closed)
        }
    }

    pub(crate) fn storage(&self) -> &Storage {
        &self.storage
    }

    pub(crate) fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    // ---- transactions ---------------------------------------------------

    /// Runs `f` inside a transaction scope.
    ///
    /// Scopes nest: an inner scope shares the single underlying
    /// transaction, and a failure anywhere dooms the whole thing. When the
    /// outermost scope exits, the transaction commits (dispatching the
    /// queued change notifications in commit order) or rolls back
    /// (dispatching nothing).
    pub fn in_transaction<T>(&self, f: impl FnOnce(&Self) -> CoreResult<T>) -> CoreResult<T> {
        self.check_open()?;
        self.storage.begin()?;
        let result = f(self);
        if result.is_err() {
            self.storage.mark_failed();
        }
        match self.storage.end() {
            Ok(Some(ScopeOutcome::Committed)) => self.flush_pending(),
            Ok(Some(ScopeOutcome::RolledBack)) => {
                warn!("transaction rolled back");
                self.discard_pending();
            }
            Ok(None) => {}
            Err(err) => {
                self.discard_pending();
                return result.and(Err(err));
            }
        }
        result
    }

    pub(crate) fn queue_change(&self, rev: Revision, seq: Sequence) {
        self.pending.lock().push(ChangeEvent { rev, seq });
    }

    fn flush_pending(&self) {
        let events = std::mem::take(&mut *self.pending.lock());
        for event in events {
            self.feed.emit(event);
        }
    }

    fn discard_pending(&self) {
        self.pending.lock().clear();
    }

    // ---- reads ----------------------------------------------------------

    /// Fetches a revision.
    ///
    /// With a rev ID, returns exactly that revision of the document. With
    /// `None`, returns the winning current non-deleted revision: the live
    /// leaf with the byte-lexicographically greatest rev ID. The body is
    /// populated when its JSON is still stored.
    pub fn get(&self, doc_id: &str, rev_id: Option<&RevId>) -> CoreResult<Option<Revision>> {
        self.check_open()?;
        let row = match rev_id {
            Some(rev_id) => self.storage.revision_row(doc_id, rev_id)?,
            None => self.storage.winning_live_row(doc_id)?,
        };
        row.map(|row| row_to_revision(row, true)).transpose()
    }

    /// Fetches the winning revision and annotates its body with the rev
    /// IDs of the other live leaves under `_conflicts`.
    ///
    /// A document in conflict has several current non-deleted leaves;
    /// replication clients enumerate them this way.
    pub fn get_with_conflicts(&self, doc_id: &str) -> CoreResult<Option<Revision>> {
        self.check_open()?;
        let mut leaves = self.storage.current_leaf_rows(doc_id)?;
        if leaves.is_empty() {
            return Ok(None);
        }
        let winner = leaves.remove(0);
        let mut rev = row_to_revision(winner, true)?;
        if !leaves.is_empty() {
            if let Some(mut body) = rev.body().cloned() {
                body.insert(
                    "_conflicts".to_owned(),
                    Value::Array(
                        leaves
                            .iter()
                            .map(|row| Value::String(row.rev_id.as_str().to_owned()))
                            .collect(),
                    ),
                );
                rev.set_body(body);
            }
        }
        Ok(Some(rev))
    }

    /// Populates `rev.body` from storage.
    ///
    /// No-op if the body is already present. Fails with `NotFound` if the
    /// row is gone entirely; if the JSON was compacted away the body comes
    /// back as just the store-owned metadata properties.
    pub fn load_body(&self, rev: &mut Revision) -> CoreResult<()> {
        self.check_open()?;
        if rev.body().is_some() {
            return Ok(());
        }
        let rev_id = rev.rev_id().clone();
        let row = self
            .storage
            .revision_row(rev.doc_id(), &rev_id)?
            .ok_or_else(|| {
                CoreError::not_found(format!("revision {}/{} is gone", rev.doc_id(), rev_id))
            })?;
        if rev.sequence().is_none() {
            rev.set_sequence(row.sequence);
        }
        let loaded = row_to_revision(row, true)?;
        match loaded.into_body() {
            Some(body) => rev.set_body(body),
            None => {
                // Compacted away: only the metadata survives.
                let mut body = Body::new();
                inject_metadata(&mut body, rev.doc_id(), &rev_id, rev.is_deleted());
                rev.set_body(body);
            }
        }
        Ok(())
    }

    /// Count of documents with at least one live current revision.
    pub fn document_count(&self) -> CoreResult<u64> {
        self.check_open()?;
        self.storage.live_document_count()
    }

    /// Greatest sequence assigned so far; zero on an empty store.
    pub fn last_sequence(&self) -> CoreResult<Sequence> {
        self.check_open()?;
        self.storage.max_sequence()
    }

    /// Snapshots the store counters in a single transaction.
    pub fn stats(&self) -> CoreResult<DatabaseStats> {
        self.in_transaction(|db| {
            Ok(DatabaseStats {
                document_count: db.storage.live_document_count()?,
                last_sequence: db.storage.max_sequence()?,
            })
        })
    }

    /// Lists the winning live revision of every document.
    ///
    /// Rows are sorted by doc ID (direction per `options.descending`,
    /// range per `start_key`/`end_key`), paginated by `limit`/`skip`.
    /// Bodies are populated only when `options.include_docs` is set.
    /// `update_seq`, if requested, is snapshotted in the same transaction
    /// as the rows.
    pub fn all_documents(&self, options: &QueryOptions) -> CoreResult<AllDocsPage> {
        self.in_transaction(|db| {
            let total_rows = db.storage.live_document_count()?;
            let update_seq = if options.update_seq {
                Some(db.storage.max_sequence()?)
            } else {
                None
            };
            let rows = db.storage.all_docs_rows(
                options.start_key.as_deref(),
                options.end_key.as_deref(),
                options.descending,
                options.limit,
                options.skip,
            )?;
            let rows = rows
                .into_iter()
                .map(|row| row_to_revision(row, options.include_docs))
                .collect::<CoreResult<Vec<_>>>()?;
            Ok(AllDocsPage {
                rows,
                total_rows,
                offset: options.skip,
                update_seq,
            })
        })
    }

    // ---- writes ---------------------------------------------------------

    /// Stores a new revision written by a local caller.
    ///
    /// `prev_rev_id` names the parent revision, which must be a current
    /// leaf; omitting it means a fresh insert. The store assigns the new
    /// revision ID and sequence. Rules enforced here, all inside one
    /// transaction:
    ///
    /// - A parent that exists but is no longer current fails with
    ///   `Conflict`; a parent that never existed fails with `NotFound`.
    /// - A fresh insert over a live document fails with `Conflict`; over a
    ///   deleted one it is promoted to a normal update of the tombstone.
    /// - A deletion requires a parent and stores no body.
    ///
    /// Returns the stored revision and `Created` for new content or `Ok`
    /// for a deletion. On error the store is observably unchanged and no
    /// change notification fires.
    pub fn put(
        &self,
        new: NewRevision,
        prev_rev_id: Option<&RevId>,
    ) -> CoreResult<(Revision, Status)> {
        self.check_open()?;
        let (doc_id, deleted, properties) = new.into_parts();

        if deleted && prev_rev_id.is_none() {
            return Err(CoreError::bad_request("deletion requires a parent revision"));
        }
        if doc_id.is_none() && prev_rev_id.is_some() {
            return Err(CoreError::bad_request(
                "a parent revision requires a document ID",
            ));
        }
        if matches!(&doc_id, Some(id) if id.is_empty()) {
            return Err(CoreError::bad_request("document ID must be non-empty"));
        }
        if !deleted && properties.is_none() {
            return Err(CoreError::bad_request("a revision requires a body"));
        }

        self.in_transaction(|db| db.put_in_txn(doc_id, deleted, properties, prev_rev_id))
    }

    fn put_in_txn(
        &self,
        doc_id: Option<String>,
        deleted: bool,
        properties: Option<Body>,
        prev_rev_id: Option<&RevId>,
    ) -> CoreResult<(Revision, Status)> {
        // Resolve the parent and demote it from the leaf set.
        let (doc_id, parent) = match prev_rev_id {
            Some(prev) => {
                let doc_id = doc_id
                    .ok_or_else(|| CoreError::bad_request("a parent revision requires a document ID"))?;
                match self.storage.revision_row(&doc_id, prev)? {
                    Some(row) if row.current => {
                        self.storage.set_not_current(row.sequence)?;
                        (doc_id, Some(row))
                    }
                    _ => {
                        return if self.storage.has_current_revision(&doc_id)? {
                            Err(CoreError::conflict(doc_id))
                        } else {
                            Err(CoreError::not_found(format!(
                                "document {doc_id} has no current revision {prev}"
                            )))
                        };
                    }
                }
            }
            None => {
                let doc_id = doc_id.unwrap_or_else(generate_doc_id);
                match self.storage.winning_row(&doc_id)? {
                    Some(row) if !row.deleted => return Err(CoreError::conflict(doc_id)),
                    Some(row) => {
                        // The winner is a tombstone: recreate the document
                        // as a child of it.
                        self.storage.set_not_current(row.sequence)?;
                        (doc_id, Some(row))
                    }
                    None => (doc_id, None),
                }
            }
        };

        let scrubbed = properties.map(|props| crate::revision::scrub_properties(&props));
        let canonical = match &scrubbed {
            Some(props) => serde_json::to_vec(props)?,
            None => Vec::new(),
        };
        let parent_rev_id = parent.as_ref().map(|row| &row.rev_id);
        let rev_id = RevId::next(parent_rev_id, deleted, &canonical);

        let json = match &scrubbed {
            Some(props) => {
                let mut stored = props.clone();
                inject_metadata(&mut stored, &doc_id, &rev_id, deleted);
                Some(serde_json::to_vec(&stored)?)
            }
            None => None,
        };

        let sequence = self.storage.insert_revision(
            &doc_id,
            &rev_id,
            parent.as_ref().map(|row| row.sequence),
            true,
            deleted,
            json.as_deref(),
        )?;
        debug!(doc_id = %doc_id, rev_id = %rev_id, %sequence, deleted, "stored revision");

        let mut rev = Revision::new(doc_id.clone(), rev_id.clone(), deleted).with_sequence(sequence);
        if let Some(mut body) = scrubbed {
            inject_metadata(&mut body, &doc_id, &rev_id, deleted);
            rev.set_body(body);
        }

        self.queue_change(Revision::new(doc_id, rev_id, deleted).with_sequence(sequence), sequence);

        let status = if deleted { Status::Ok } else { Status::Created };
        Ok((rev, status))
    }

    /// Discards the bodies of all non-current revisions and reclaims file
    /// space. History structure (rev IDs, parent links, flags) is fully
    /// preserved; the discarded bodies are not recoverable.
    pub fn compact(&self) -> CoreResult<()> {
        self.check_open()?;
        let pruned = self.in_transaction(|db| db.storage.null_non_current_json())?;
        debug!(pruned, "compacted non-current revision bodies");
        self.storage.vacuum()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("is_open", &self.is_open.get())
            .finish_non_exhaustive()
    }
}

/// Generates a doc ID for an insert that did not name one.
fn generate_doc_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Injects the store-owned metadata properties into a body.
pub(crate) fn inject_metadata(body: &mut Body, doc_id: &str, rev_id: &RevId, deleted: bool) {
    body.insert("_id".to_owned(), Value::String(doc_id.to_owned()));
    body.insert("_rev".to_owned(), Value::String(rev_id.as_str().to_owned()));
    if deleted {
        body.insert("_deleted".to_owned(), Value::Bool(true));
    }
}

/// Converts a storage row into a [`Revision`], optionally parsing and
/// annotating its stored body.
pub(crate) fn row_to_revision(row: RevisionRow, include_body: bool) -> CoreResult<Revision> {
    let RevisionRow {
        sequence,
        doc_id,
        rev_id,
        deleted,
        json,
        ..
    } = row;
    let mut rev = Revision::new(doc_id, rev_id, deleted).with_sequence(sequence);
    if include_body {
        if let Some(json) = json {
            let mut body: Body = serde_json::from_slice(&json)?;
            let rev_id = rev.rev_id().clone();
            inject_metadata(&mut body, rev.doc_id(), &rev_id, rev.is_deleted());
            rev.set_body(body);
        }
    }
    Ok(rev)
}

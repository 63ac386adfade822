//! Replication support queries.
//!
//! Three operations drive bidirectional replication: a puller diffs the
//! remote change feed against local state with
//! [`Database::find_missing`] and splices fetched revisions in with
//! [`Database::force_insert`]; a pusher walks
//! [`Database::get_revision_history`] to tell the remote where a leaf
//! came from.

use crate::database::Database;
use crate::error::{CoreError, CoreResult};
use crate::revid::RevId;
use crate::revision::{scrub_properties, Revision, RevisionList};
use crate::types::{Sequence, Status};
use tracing::debug;

impl Database {
    /// Removes from `revs` every `(doc_id, rev_id)` pair already present
    /// locally.
    ///
    /// The residual list is exactly what the remote must transfer. Runs as
    /// a single indexed query over the union of doc IDs and rev IDs; a
    /// row only matches if its exact pair is stored, so unrelated
    /// cross-products cannot remove anything.
    pub fn find_missing(&self, revs: &mut RevisionList) -> CoreResult<()> {
        self.check_open()?;
        if revs.is_empty() {
            return Ok(());
        }

        let doc_ids: Vec<String> = revs.doc_ids().into_iter().map(str::to_owned).collect();
        let rev_ids: Vec<String> = revs
            .rev_ids()
            .into_iter()
            .map(|rev| rev.as_str().to_owned())
            .collect();
        let doc_refs: Vec<&str> = doc_ids.iter().map(String::as_str).collect();
        let rev_refs: Vec<&str> = rev_ids.iter().map(String::as_str).collect();

        for (doc_id, rev_id) in self.storage().existing_pairs(&doc_refs, &rev_refs)? {
            revs.remove(&doc_id, &rev_id);
        }
        Ok(())
    }

    /// Returns every stored revision of a document, newest sequence first,
    /// with deletion flags and sequences populated and bodies omitted.
    pub fn get_all_revisions(&self, doc_id: &str) -> CoreResult<RevisionList> {
        self.check_open()?;
        let rows = self.storage().doc_rows(doc_id)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                Revision::new(row.doc_id, row.rev_id, row.deleted).with_sequence(row.sequence)
            })
            .collect())
    }

    /// Returns the linear ancestry of `rev`, newest first, ending at a
    /// root revision.
    ///
    /// The walk follows parent-sequence links, so it reports the one
    /// branch `rev` sits on even when the document's DAG has others. The
    /// result includes `rev` itself.
    pub fn get_revision_history(&self, rev: &Revision) -> CoreResult<Vec<Revision>> {
        self.check_open()?;
        let rows = self.storage().doc_rows(rev.doc_id())?;

        let mut next = match rev.sequence() {
            Some(seq) => Some(seq),
            None => rows
                .iter()
                .find(|row| row.rev_id == *rev.rev_id())
                .map(|row| row.sequence),
        };
        if next.is_none() {
            return Err(CoreError::not_found(format!(
                "document {} has no revision {}",
                rev.doc_id(),
                rev.rev_id()
            )));
        }

        let mut history = Vec::new();
        while let Some(seq) = next {
            let row = rows.iter().find(|row| row.sequence == seq).ok_or_else(|| {
                CoreError::not_found(format!(
                    "revision chain of {} is broken at {seq}",
                    rev.doc_id()
                ))
            })?;
            history.push(
                Revision::new(row.doc_id.clone(), row.rev_id.clone(), row.deleted)
                    .with_sequence(row.sequence),
            );
            next = row.parent;
        }
        Ok(history)
    }

    /// Splices a remote revision chain into the local tree.
    ///
    /// `history` is the leaf's ancestry, newest first, and must begin with
    /// `leaf`'s own rev ID. Ancestors already present locally are reused
    /// as splice points; missing ones are inserted as bodiless stubs; the
    /// leaf itself is inserted as a new current revision, and the deepest
    /// pre-existing ancestor is demoted from the leaf set. The operation
    /// is idempotent: replaying the same `(leaf, history)` inserts no rows
    /// and leaves the last sequence unchanged.
    ///
    /// Unlike [`Database::put`] this performs no conflict check: a chain
    /// that diverges from the local tree simply becomes another current
    /// leaf, which is how conflicts are represented. On return, `leaf`
    /// carries its local sequence.
    pub fn force_insert(&self, leaf: &mut Revision, history: &[RevId]) -> CoreResult<Status> {
        self.check_open()?;
        if leaf.doc_id().is_empty() {
            return Err(CoreError::bad_request("document ID must be non-empty"));
        }
        if history.first() != Some(leaf.rev_id()) {
            return Err(CoreError::bad_request(
                "history must begin with the leaf's rev ID",
            ));
        }
        if !leaf.is_deleted() && leaf.body().is_none() {
            return Err(CoreError::bad_request("a non-deletion leaf requires a body"));
        }

        let sequence = self.in_transaction(|db| db.force_insert_in_txn(leaf, history))?;
        leaf.set_sequence(sequence);
        Ok(Status::Created)
    }

    fn force_insert_in_txn(&self, leaf: &Revision, history: &[RevId]) -> CoreResult<Sequence> {
        let doc_id = leaf.doc_id();
        let local = self.storage().doc_rows(doc_id)?;

        let mut parent: Option<Sequence> = None;
        // Deepest revision of the chain that already existed locally; it
        // stops being a leaf once the new chain is spliced onto it.
        let mut splice_base: Option<Sequence> = None;
        let mut inserted_leaf = false;

        for (idx, rev_id) in history.iter().enumerate().rev() {
            if let Some(row) = local.iter().find(|row| row.rev_id == *rev_id) {
                parent = Some(row.sequence);
                splice_base = Some(row.sequence);
            } else if idx == 0 {
                let json = match leaf.body() {
                    Some(body) => {
                        let mut stored = scrub_properties(body);
                        crate::database::inject_metadata(
                            &mut stored,
                            doc_id,
                            rev_id,
                            leaf.is_deleted(),
                        );
                        Some(serde_json::to_vec(&stored)?)
                    }
                    None => None,
                };
                let seq = self.storage().insert_revision(
                    doc_id,
                    rev_id,
                    parent,
                    true,
                    leaf.is_deleted(),
                    json.as_deref(),
                )?;
                parent = Some(seq);
                inserted_leaf = true;
            } else {
                let seq = self
                    .storage()
                    .insert_revision(doc_id, rev_id, parent, false, false, None)?;
                parent = Some(seq);
            }
        }

        // The walk visited at least the leaf entry, so `parent` holds its
        // sequence now.
        let sequence = parent.ok_or_else(|| CoreError::bad_request("history must not be empty"))?;

        if inserted_leaf {
            if let Some(base) = splice_base {
                self.storage().set_not_current(base)?;
            }
            debug!(doc_id = %doc_id, rev_id = %leaf.rev_id(), %sequence, "spliced remote revision chain");
        }

        self.queue_change(
            Revision::new(doc_id, leaf.rev_id().clone(), leaf.is_deleted()).with_sequence(sequence),
            sequence,
        );
        Ok(sequence)
    }
}

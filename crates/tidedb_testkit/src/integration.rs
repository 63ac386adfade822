//! Tracked-state harness for integration and property testing.
//!
//! [`StoreHarness`] drives a real store while maintaining a shadow model
//! of what the revision forest should look like: every stored rev ID per
//! document, and the set of current leaves with their deletion flags.
//! `verify_all` then checks the store against the model: winners,
//! document counts, row counts, and the full leaf set as reported by the
//! change feed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use tidedb_core::{
    Body, CoreError, Database, NewRevision, QueryOptions, RevId, Revision, Sequence,
};

/// Shadow model of one document's revision forest.
#[derive(Debug, Default)]
struct DocModel {
    /// Current leaves: rev ID → deleted flag.
    leaves: BTreeMap<String, bool>,
    /// Every rev ID ever stored for the document.
    revs: BTreeSet<String>,
}

impl DocModel {
    /// The leaf the store should pick as winner: greatest rev ID,
    /// byte-lexicographically, deleted or not.
    fn winning_leaf(&self) -> Option<(&str, bool)> {
        self.leaves
            .iter()
            .next_back()
            .map(|(rev, deleted)| (rev.as_str(), *deleted))
    }

    /// The winner among live leaves only, i.e. what `get` should return.
    fn live_winner(&self) -> Option<&str> {
        self.leaves
            .iter()
            .rev()
            .find(|(_, deleted)| !**deleted)
            .map(|(rev, _)| rev.as_str())
    }
}

/// A test harness pairing a real store with a shadow model.
pub struct StoreHarness {
    db: Database,
    docs: HashMap<String, DocModel>,
    rows: u64,
}

impl StoreHarness {
    /// Creates a harness over a fresh in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            db: Database::open_in_memory().expect("failed to open in-memory database"),
            docs: HashMap::new(),
            rows: 0,
        }
    }

    /// The store under test.
    #[must_use]
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Rows the model believes have been inserted.
    #[must_use]
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Attempts a fresh insert. Succeeds when the document's winning leaf
    /// is absent or a tombstone; otherwise the store must report a
    /// conflict and stay unchanged.
    pub fn create(&mut self, doc_id: &str, body: Body) -> Option<Revision> {
        let expect_conflict =
            matches!(self.model(doc_id).winning_leaf(), Some((_, false)));
        let result = self.db.put(NewRevision::with_body(doc_id, body), None);

        if expect_conflict {
            assert!(
                matches!(result, Err(CoreError::Conflict { .. })),
                "insert over live document {doc_id} must conflict"
            );
            return None;
        }

        let (rev, _) = result.expect("insert must succeed");
        let parent = self
            .model(doc_id)
            .winning_leaf()
            .map(|(rev, _)| rev.to_owned());
        self.record_child(doc_id, parent.as_deref(), &rev);
        Some(rev)
    }

    /// Updates the winning leaf (live or tombstone), if the document has
    /// any revision at all.
    pub fn update(&mut self, doc_id: &str, body: Body) -> Option<Revision> {
        let parent = self.model(doc_id).winning_leaf()?.0.to_owned();
        let parent_rev: RevId = parent.parse().expect("model rev IDs are well-formed");
        let (rev, _) = self
            .db
            .put(NewRevision::with_body(doc_id, body), Some(&parent_rev))
            .expect("update of the winning leaf must succeed");
        self.record_child(doc_id, Some(&parent), &rev);
        Some(rev)
    }

    /// Deletes the winning leaf, if it is live.
    pub fn delete(&mut self, doc_id: &str) -> Option<Revision> {
        let parent = match self.model(doc_id).winning_leaf() {
            Some((rev, false)) => rev.to_owned(),
            _ => return None,
        };
        let parent_rev: RevId = parent.parse().expect("model rev IDs are well-formed");
        let (rev, _) = self
            .db
            .put(NewRevision::deletion(doc_id), Some(&parent_rev))
            .expect("deletion of the live winner must succeed");
        self.record_child(doc_id, Some(&parent), &rev);
        Some(rev)
    }

    /// Splices a remote chain (newest first) with the given leaf body.
    pub fn splice(&mut self, doc_id: &str, chain: &[RevId], body: Body) {
        let mut leaf = Revision::new(doc_id, chain[0].clone(), false).with_body(body);
        self.db
            .force_insert(&mut leaf, chain)
            .expect("forced insert of a well-formed chain must succeed");

        let model = self.docs.entry(doc_id.to_owned()).or_default();
        let mut deepest_existing: Option<String> = None;
        let mut inserted_leaf = false;
        let mut inserted = 0;
        for (idx, rev) in chain.iter().enumerate().rev() {
            if model.revs.contains(rev.as_str()) {
                deepest_existing = Some(rev.as_str().to_owned());
            } else {
                model.revs.insert(rev.as_str().to_owned());
                inserted += 1;
                if idx == 0 {
                    inserted_leaf = true;
                }
            }
        }
        self.rows += inserted;
        if inserted_leaf {
            let model = self.docs.entry(doc_id.to_owned()).or_default();
            if let Some(base) = deepest_existing {
                model.leaves.remove(&base);
            }
            model.leaves.insert(chain[0].as_str().to_owned(), false);
        }
    }

    fn model(&mut self, doc_id: &str) -> &DocModel {
        self.docs.entry(doc_id.to_owned()).or_default()
    }

    fn record_child(&mut self, doc_id: &str, parent: Option<&str>, rev: &Revision) {
        self.rows += 1;
        let model = self.docs.entry(doc_id.to_owned()).or_default();
        if let Some(parent) = parent {
            model.leaves.remove(parent);
        }
        model
            .leaves
            .insert(rev.rev_id().as_str().to_owned(), rev.is_deleted());
        model.revs.insert(rev.rev_id().as_str().to_owned());
    }

    /// Checks the store against the shadow model.
    ///
    /// Verifies row and sequence accounting, document counts, per-document
    /// winners and stored-revision counts, and that the change feed's
    /// current rows are exactly the model's leaf set.
    pub fn verify_all(&self) {
        assert_eq!(
            self.db.last_sequence().expect("last_sequence"),
            Sequence::new(i64::try_from(self.rows).expect("row count fits")),
            "sequence must equal the number of inserted rows"
        );

        let live_docs = self
            .docs
            .values()
            .filter(|model| model.live_winner().is_some())
            .count() as u64;
        assert_eq!(self.db.document_count().expect("document_count"), live_docs);

        for (doc_id, model) in &self.docs {
            let revs = self.db.get_all_revisions(doc_id).expect("get_all_revisions");
            assert_eq!(revs.len(), model.revs.len(), "row count for {doc_id}");

            let winner = self.db.get(doc_id, None).expect("get");
            match model.live_winner() {
                Some(expected) => {
                    let rev = winner.unwrap_or_else(|| panic!("{doc_id} must have a winner"));
                    assert_eq!(rev.rev_id().as_str(), expected, "winner of {doc_id}");
                }
                None => assert!(winner.is_none(), "{doc_id} must read as absent"),
            }
        }

        // The feed's current rows are exactly the leaves of every DAG.
        let mut actual_leaves: BTreeSet<(String, String, bool)> = BTreeSet::new();
        for rev in self
            .db
            .changes_since(Sequence::ZERO, &QueryOptions::default())
            .expect("changes_since")
        {
            actual_leaves.insert((
                rev.doc_id().to_owned(),
                rev.rev_id().as_str().to_owned(),
                rev.is_deleted(),
            ));
        }
        let mut expected_leaves: BTreeSet<(String, String, bool)> = BTreeSet::new();
        for (doc_id, model) in &self.docs {
            for (rev, deleted) in &model.leaves {
                expected_leaves.insert((doc_id.clone(), rev.clone(), *deleted));
            }
        }
        assert_eq!(actual_leaves, expected_leaves, "leaf sets must agree");
    }
}

impl Default for StoreHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{init_tracing, TestDatabase};
    use crate::generators::{body_strategy, doc_id_strategy, rev_chain_strategy};
    use proptest::prelude::*;
    use tidedb_core::RevisionList;

    const DOC_POOL: &[&str] = &["alpha", "beta", "gamma"];

    #[derive(Debug, Clone)]
    enum Op {
        Create(usize, Body),
        Update(usize, Body),
        Delete(usize),
        Splice(usize, Vec<RevId>, Body),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        let doc = 0..DOC_POOL.len();
        prop_oneof![
            (doc.clone(), body_strategy()).prop_map(|(d, b)| Op::Create(d, b)),
            (doc.clone(), body_strategy()).prop_map(|(d, b)| Op::Update(d, b)),
            doc.clone().prop_map(Op::Delete),
            (doc, rev_chain_strategy(4), body_strategy())
                .prop_map(|(d, chain, b)| Op::Splice(d, chain, b)),
        ]
    }

    proptest! {
        // Row accounting and winner/leaf-set consistency over arbitrary
        // operation interleavings.
        #[test]
        fn random_operations_preserve_invariants(ops in prop::collection::vec(op_strategy(), 1..25)) {
            let mut harness = StoreHarness::new();
            for op in ops {
                match op {
                    Op::Create(d, body) => { harness.create(DOC_POOL[d], body); }
                    Op::Update(d, body) => { harness.update(DOC_POOL[d], body); }
                    Op::Delete(d) => { harness.delete(DOC_POOL[d]); }
                    Op::Splice(d, chain, body) => harness.splice(DOC_POOL[d], &chain, body),
                }
            }
            harness.verify_all();
        }

        // Sequences assigned by successful writes strictly increase.
        #[test]
        fn sequences_strictly_increase(
            doc_ids in prop::collection::hash_set(doc_id_strategy(), 1..10),
            body in body_strategy(),
        ) {
            let store = TestDatabase::memory();
            let mut last = Sequence::ZERO;
            for doc_id in doc_ids {
                let (rev, _) = store
                    .put(NewRevision::with_body(doc_id, body.clone()), None)
                    .expect("insert");
                let seq = rev.sequence().expect("assigned sequence");
                prop_assert!(seq > last, "sequence {seq} must exceed {last}");
                last = seq;
            }
        }

        // Replaying a splice changes nothing: no rows, same last sequence.
        #[test]
        fn force_insert_is_idempotent(chain in rev_chain_strategy(5), body in body_strategy()) {
            let mut harness = StoreHarness::new();
            harness.splice("doc", &chain, body.clone());
            harness.verify_all();

            let rows = harness.rows();
            harness.splice("doc", &chain, body);
            prop_assert_eq!(harness.rows(), rows);
            harness.verify_all();
        }

        // Missing-revision diffing removes exactly the stored pairs.
        #[test]
        fn find_missing_is_exact(
            doc_ids in prop::collection::hash_set(doc_id_strategy(), 1..6),
            body in body_strategy(),
            ghosts in prop::collection::vec(rev_chain_strategy(1), 1..6),
        ) {
            let store = TestDatabase::memory();

            let mut list = RevisionList::new();
            let stored = doc_ids.len();
            for doc_id in doc_ids {
                let (rev, _) = store
                    .put(NewRevision::with_body(doc_id, body.clone()), None)
                    .expect("insert");
                list.push(Revision::new(rev.doc_id(), rev.rev_id().clone(), false));
            }
            // Uppercase is outside the generated doc-ID alphabet, so the
            // ghosts can never collide with a stored document.
            for (idx, chain) in ghosts.iter().enumerate() {
                list.push(Revision::new(format!("GHOST-{idx}"), chain[0].clone(), false));
            }

            store.find_missing(&mut list).expect("find_missing");

            prop_assert_eq!(list.len(), ghosts.len());
            for (idx, chain) in ghosts.iter().enumerate() {
                let ghost_id = format!("GHOST-{}", idx);
                prop_assert!(list.contains(&ghost_id, &chain[0]));
            }
            prop_assert_eq!(store.document_count().expect("count"), stored as u64);
        }

        // Any error path leaves the store observably unchanged.
        #[test]
        fn failed_puts_write_nothing(body in body_strategy()) {
            let mut harness = StoreHarness::new();
            harness.create("doc", body.clone());
            let rows = harness.rows();
            let db = harness.db();

            // Fresh insert over a live document.
            prop_assert!(db.put(NewRevision::with_body("doc", body.clone()), None).is_err());
            // Branch from a revision that was never stored.
            let stale: RevId = "9-ffffffffffffffff".parse().expect("rev");
            prop_assert!(db.put(NewRevision::with_body("doc", body), Some(&stale)).is_err());

            prop_assert_eq!(
                db.last_sequence().expect("last_sequence"),
                Sequence::new(rows as i64)
            );
            harness.verify_all();
        }
    }

    // Writes survive a close and a reopen of the backing file.
    #[test]
    fn file_store_round_trip() {
        init_tracing();
        let store = TestDatabase::file();

        let mut body = Body::new();
        body.insert("x".to_owned(), 1.into());
        let (rev, _) = store
            .put(NewRevision::with_body("d1", body), None)
            .expect("insert");
        store.close().expect("close");

        let path = store.path().expect("file-backed store has a path");
        let reopened = Database::open(&path).expect("reopen");
        let fetched = reopened.get("d1", None).expect("get").expect("present");
        assert_eq!(fetched.rev_id(), rev.rev_id());
        assert_eq!(
            reopened.last_sequence().expect("last_sequence"),
            Sequence::new(1)
        );
    }
}

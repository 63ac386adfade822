//! Integration tests for replication support: forced chain splicing,
//! missing-revision diffing, and history traversal.

use serde_json::Value;
use tidedb_core::{
    Body, CoreError, Database, NewRevision, QueryOptions, RevId, Revision, RevisionList, Sequence,
    Status,
};

fn body(json: &str) -> Body {
    serde_json::from_str(json).expect("test body must be valid JSON")
}

fn rev(s: &str) -> RevId {
    s.parse().expect("test rev ID must be well-formed")
}

fn db() -> Database {
    Database::open_in_memory().expect("in-memory database")
}

#[test]
fn splice_full_chain_into_empty_store() {
    let db = db();
    let history = [rev("3-C"), rev("2-B"), rev("1-A")];
    let mut leaf = Revision::new("d2", rev("3-C"), false).with_body(body(r#"{"x":1}"#));

    let status = db.force_insert(&mut leaf, &history).unwrap();

    assert_eq!(status, Status::Created);
    assert_eq!(leaf.sequence(), Some(Sequence::new(3)));
    assert_eq!(db.last_sequence().unwrap(), Sequence::new(3));
    assert_eq!(db.document_count().unwrap(), 1);

    // The leaf wins; the ancestors are bodiless non-current stubs.
    let winner = db.get("d2", None).unwrap().unwrap();
    assert_eq!(winner.rev_id(), &rev("3-C"));
    assert_eq!(winner.body().unwrap()["x"], Value::from(1));
    let stub = db.get("d2", Some(&rev("2-B"))).unwrap().unwrap();
    assert!(stub.body().is_none());

    let chain = db.get_revision_history(&leaf).unwrap();
    let generations: Vec<u64> = chain.iter().map(Revision::generation).collect();
    assert_eq!(generations, vec![3, 2, 1]);
}

#[test]
fn force_insert_is_idempotent() {
    let db = db();
    let history = [rev("3-C"), rev("2-B"), rev("1-A")];
    let mut leaf = Revision::new("d2", rev("3-C"), false).with_body(body(r#"{"x":1}"#));
    db.force_insert(&mut leaf, &history).unwrap();
    let rows_before = db.get_all_revisions("d2").unwrap().len();
    let seq_before = db.last_sequence().unwrap();

    let mut replay = Revision::new("d2", rev("3-C"), false).with_body(body(r#"{"x":1}"#));
    let status = db.force_insert(&mut replay, &history).unwrap();

    assert_eq!(status, Status::Created);
    assert_eq!(replay.sequence(), leaf.sequence());
    assert_eq!(db.get_all_revisions("d2").unwrap().len(), rows_before);
    assert_eq!(db.last_sequence().unwrap(), seq_before);
}

#[test]
fn splice_extends_local_chain_and_demotes_old_leaf() {
    let db = db();
    let (rev1, _) = db
        .put(NewRevision::with_body("d1", body(r#"{"v":1}"#)), None)
        .unwrap();
    let (rev2, _) = db
        .put(
            NewRevision::with_body("d1", body(r#"{"v":2}"#)),
            Some(rev1.rev_id()),
        )
        .unwrap();

    // Remote continued our chain by two more generations.
    let history = [
        rev("4-RR"),
        rev("3-QQ"),
        rev2.rev_id().clone(),
        rev1.rev_id().clone(),
    ];
    let mut leaf = Revision::new("d1", rev("4-RR"), false).with_body(body(r#"{"v":4}"#));
    db.force_insert(&mut leaf, &history).unwrap();

    // Only the two genuinely new revisions were inserted.
    assert_eq!(db.get_all_revisions("d1").unwrap().len(), 4);
    let winner = db.get("d1", None).unwrap().unwrap();
    assert_eq!(winner.rev_id(), &rev("4-RR"));

    // The old leaf is an ancestor now, not a conflict.
    let conflicted = db.get_with_conflicts("d1").unwrap().unwrap();
    assert!(!conflicted.body().unwrap().contains_key("_conflicts"));

    let chain = db.get_revision_history(&leaf).unwrap();
    let generations: Vec<u64> = chain.iter().map(Revision::generation).collect();
    assert_eq!(generations, vec![4, 3, 2, 1]);
}

#[test]
fn divergent_chain_becomes_conflict_leaf() {
    let db = db();
    let (rev1, _) = db
        .put(NewRevision::with_body("d1", body(r#"{"v":1}"#)), None)
        .unwrap();
    let (rev2, _) = db
        .put(
            NewRevision::with_body("d1", body(r#"{"v":2}"#)),
            Some(rev1.rev_id()),
        )
        .unwrap();

    // Remote branched from generation 1: same root, different child.
    let history = [rev("2-zzz"), rev1.rev_id().clone()];
    let mut leaf = Revision::new("d1", rev("2-zzz"), false).with_body(body(r#"{"v":9}"#));
    db.force_insert(&mut leaf, &history).unwrap();

    // Both branches are current leaves of one document.
    assert_eq!(db.document_count().unwrap(), 1);
    let conflicted = db.get_with_conflicts("d1").unwrap().unwrap();
    let winner_id = conflicted.rev_id().clone();
    let conflicts = conflicted.body().unwrap()["_conflicts"]
        .as_array()
        .expect("conflict leaves listed")
        .clone();
    assert_eq!(conflicts.len(), 1);

    // The winner is the lexicographically greater rev ID; the loser is
    // the one listed under _conflicts.
    let mut leaves = vec![rev2.rev_id().clone(), rev("2-zzz")];
    leaves.sort();
    assert_eq!(&winner_id, leaves.last().unwrap());
    assert_eq!(
        conflicts[0],
        Value::from(leaves.first().unwrap().as_str())
    );

    // Deleting the winner makes the surviving branch win again.
    let (_, status) = db
        .put(NewRevision::deletion("d1"), Some(&winner_id))
        .unwrap();
    assert_eq!(status, Status::Ok);
    let winner = db.get("d1", None).unwrap().unwrap();
    assert_eq!(winner.rev_id(), leaves.first().unwrap());
    assert_eq!(db.document_count().unwrap(), 1);
}

#[test]
fn force_insert_validation() {
    let db = db();

    // History must begin with the leaf's own rev ID.
    let mut leaf = Revision::new("d1", rev("2-b"), false).with_body(body("{}"));
    let result = db.force_insert(&mut leaf, &[rev("1-a")]);
    assert!(matches!(result, Err(CoreError::BadRequest { .. })));

    // An empty history cannot name the leaf either.
    let result = db.force_insert(&mut leaf, &[]);
    assert!(matches!(result, Err(CoreError::BadRequest { .. })));

    // A non-deletion leaf must carry a body.
    let mut bodiless = Revision::new("d1", rev("1-a"), false);
    let result = db.force_insert(&mut bodiless, &[rev("1-a")]);
    assert!(matches!(result, Err(CoreError::BadRequest { .. })));

    // A deleted leaf needs no body.
    let mut tombstone = Revision::new("d1", rev("2-b"), true);
    let status = db
        .force_insert(&mut tombstone, &[rev("2-b"), rev("1-a")])
        .unwrap();
    assert_eq!(status, Status::Created);
    assert_eq!(db.document_count().unwrap(), 0);
}

#[test]
fn find_missing_removes_only_stored_pairs() {
    let db = db();
    let (rev1, _) = db
        .put(NewRevision::with_body("d1", body(r#"{"v":1}"#)), None)
        .unwrap();
    let (rev2, _) = db
        .put(NewRevision::with_body("d2", body(r#"{"v":2}"#)), None)
        .unwrap();

    let mut revs = RevisionList::new();
    revs.push(Revision::new("d1", rev1.rev_id().clone(), false));
    revs.push(Revision::new("d2", rev2.rev_id().clone(), false));
    revs.push(Revision::new("d1", rev("9-missing"), false));
    // In the cross product of the stored doc IDs and rev IDs, but not a
    // stored pair, so it must survive the diff.
    revs.push(Revision::new("d1", rev2.rev_id().clone(), false));

    db.find_missing(&mut revs).unwrap();

    assert_eq!(revs.len(), 2);
    assert!(revs.contains("d1", &rev("9-missing")));
    assert!(revs.contains("d1", rev2.rev_id()));
}

#[test]
fn find_missing_on_empty_list_is_a_no_op() {
    let db = db();
    let mut revs = RevisionList::new();
    db.find_missing(&mut revs).unwrap();
    assert!(revs.is_empty());
}

#[test]
fn get_all_revisions_reports_every_row_newest_first() {
    let db = db();
    let (rev1, _) = db
        .put(NewRevision::with_body("d1", body(r#"{"v":1}"#)), None)
        .unwrap();
    let (rev2, _) = db
        .put(
            NewRevision::with_body("d1", body(r#"{"v":2}"#)),
            Some(rev1.rev_id()),
        )
        .unwrap();
    db.put(NewRevision::deletion("d1"), Some(rev2.rev_id()))
        .unwrap();

    let revs = db.get_all_revisions("d1").unwrap();
    assert_eq!(revs.len(), 3);
    let seqs: Vec<i64> = revs
        .iter()
        .map(|r| r.sequence().unwrap().as_i64())
        .collect();
    assert_eq!(seqs, vec![3, 2, 1]);
    assert!(revs.iter().next().unwrap().is_deleted());
    assert!(revs.iter().all(|r| r.body().is_none()));

    // An unknown document yields an empty list.
    assert!(db.get_all_revisions("ghost").unwrap().is_empty());
}

#[test]
fn revision_history_follows_one_branch() {
    let db = db();
    let (rev1, _) = db
        .put(NewRevision::with_body("d1", body(r#"{"v":1}"#)), None)
        .unwrap();
    let (rev2, _) = db
        .put(
            NewRevision::with_body("d1", body(r#"{"v":2}"#)),
            Some(rev1.rev_id()),
        )
        .unwrap();

    // A divergent remote branch off the same root.
    let history = [rev("2-zzz"), rev1.rev_id().clone()];
    let mut remote_leaf = Revision::new("d1", rev("2-zzz"), false).with_body(body(r#"{"v":9}"#));
    db.force_insert(&mut remote_leaf, &history).unwrap();

    // Each leaf reports its own ancestry back to the shared root.
    let local_chain = db.get_revision_history(&rev2).unwrap();
    let ids: Vec<&str> = local_chain.iter().map(|r| r.rev_id().as_str()).collect();
    assert_eq!(ids, vec![rev2.rev_id().as_str(), rev1.rev_id().as_str()]);

    let remote_chain = db.get_revision_history(&remote_leaf).unwrap();
    let ids: Vec<&str> = remote_chain.iter().map(|r| r.rev_id().as_str()).collect();
    assert_eq!(ids, vec!["2-zzz", rev1.rev_id().as_str()]);

    // History of an unknown revision is an error.
    let ghost = Revision::new("d1", rev("9-nope"), false);
    assert!(matches!(
        db.get_revision_history(&ghost),
        Err(CoreError::NotFound { .. })
    ));
}

#[test]
fn spliced_changes_flow_through_the_feed() {
    let db = db();
    let rx = db.subscribe();

    let history = [rev("2-B"), rev("1-A")];
    let mut leaf = Revision::new("d3", rev("2-B"), false).with_body(body(r#"{"x":1}"#));
    db.force_insert(&mut leaf, &history).unwrap();

    // One notification for the leaf, none for the stub ancestry.
    let event = rx.try_recv().unwrap();
    assert_eq!(event.rev.rev_id(), &rev("2-B"));
    assert_eq!(event.seq, leaf.sequence().unwrap());
    assert!(rx.try_recv().is_err());

    // The change feed shows the leaf as the document's one current row.
    let changes = db
        .changes_since(Sequence::ZERO, &QueryOptions::default())
        .unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].rev_id(), &rev("2-B"));
}

//! Revisions and revision lists.

use crate::revid::{Generation, RevId};
use crate::types::Sequence;
use serde_json::Value;
use std::fmt;

/// A document body: a JSON object, keyed by property name.
///
/// `serde_json`'s map keeps keys sorted, so serializing a body always
/// yields the same canonical bytes for the same properties.
pub type Body = serde_json::Map<String, Value>;

/// Property names the store owns. Caller-supplied values for these are
/// stripped on write and re-injected canonically on read.
pub(crate) const RESERVED_PROPERTIES: &[&str] =
    &["_id", "_rev", "_deleted", "_conflicts", "_attachments"];

/// Returns a copy of `props` with the store-owned properties removed.
pub(crate) fn scrub_properties(props: &Body) -> Body {
    props
        .iter()
        .filter(|(key, _)| !RESERVED_PROPERTIES.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// An immutable-after-commit snapshot of a document at one point in its
/// revision DAG.
///
/// A revision is addressed by `(doc_id, rev_id)`. The `sequence` is present
/// once the revision has been stored locally; revisions received from a
/// remote (e.g. in a replication batch) carry `None` until spliced in. The
/// body is optional: change-feed rows and replication lists omit it, and
/// compaction discards the bodies of non-current revisions permanently.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    doc_id: String,
    rev_id: RevId,
    deleted: bool,
    sequence: Option<Sequence>,
    body: Option<Body>,
}

impl Revision {
    /// Creates a bodiless revision stub, as used in replication lists.
    #[must_use]
    pub fn new(doc_id: impl Into<String>, rev_id: RevId, deleted: bool) -> Self {
        Self {
            doc_id: doc_id.into(),
            rev_id,
            deleted,
            sequence: None,
            body: None,
        }
    }

    /// Attaches a body to the revision.
    #[must_use]
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Attaches a sequence number to the revision.
    #[must_use]
    pub fn with_sequence(mut self, sequence: Sequence) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Returns the document ID.
    #[must_use]
    pub fn doc_id(&self) -> &str {
        &self.doc_id
    }

    /// Returns the revision ID.
    #[must_use]
    pub fn rev_id(&self) -> &RevId {
        &self.rev_id
    }

    /// Returns the generation of the revision ID.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.rev_id.generation()
    }

    /// Returns true if this revision is a deletion tombstone.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Returns the local sequence number, if assigned.
    #[must_use]
    pub const fn sequence(&self) -> Option<Sequence> {
        self.sequence
    }

    /// Returns the body, if loaded.
    #[must_use]
    pub const fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    /// Consumes the revision and returns its body, if loaded.
    #[must_use]
    pub fn into_body(self) -> Option<Body> {
        self.body
    }

    pub(crate) fn set_sequence(&mut self, sequence: Sequence) {
        self.sequence = Some(sequence);
    }

    pub(crate) fn set_body(&mut self, body: Body) {
        self.body = Some(body);
    }

    /// True if this revision addresses the same `(doc_id, rev_id)` pair.
    #[must_use]
    pub fn same_revision_as(&self, doc_id: &str, rev_id: &RevId) -> bool {
        self.doc_id == doc_id && self.rev_id == *rev_id
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{} #{}}}", self.doc_id, self.rev_id)
    }
}

/// A not-yet-stored revision handed to [`crate::Database::put`].
///
/// The store assigns the revision ID; callers only name the document,
/// supply properties, or flag a deletion. The doc ID may be omitted only
/// for a fresh insert, in which case the store generates one.
#[derive(Debug, Clone)]
pub struct NewRevision {
    doc_id: Option<String>,
    deleted: bool,
    properties: Option<Body>,
}

impl NewRevision {
    /// A new revision of (or fresh insert for) a named document.
    #[must_use]
    pub fn with_body(doc_id: impl Into<String>, properties: Body) -> Self {
        Self {
            doc_id: Some(doc_id.into()),
            deleted: false,
            properties: Some(properties),
        }
    }

    /// A fresh insert with a store-generated document ID.
    #[must_use]
    pub fn insert(properties: Body) -> Self {
        Self {
            doc_id: None,
            deleted: false,
            properties: Some(properties),
        }
    }

    /// A deletion tombstone for the named document.
    #[must_use]
    pub fn deletion(doc_id: impl Into<String>) -> Self {
        Self {
            doc_id: Some(doc_id.into()),
            deleted: true,
            properties: None,
        }
    }

    /// Returns the target document ID, if named.
    #[must_use]
    pub fn doc_id(&self) -> Option<&str> {
        self.doc_id.as_deref()
    }

    /// Returns true if this write is a deletion.
    #[must_use]
    pub const fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Returns the caller-supplied properties.
    #[must_use]
    pub const fn properties(&self) -> Option<&Body> {
        self.properties.as_ref()
    }

    pub(crate) fn into_parts(self) -> (Option<String>, bool, Option<Body>) {
        (self.doc_id, self.deleted, self.properties)
    }
}

/// An ordered collection of [`Revision`]s used by replication.
///
/// Supports lookup by `(doc_id, rev_id)` and the bulk set-difference that
/// missing-revision diffing performs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevisionList {
    revs: Vec<Revision>,
}

impl RevisionList {
    /// Creates an empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a revision.
    pub fn push(&mut self, rev: Revision) {
        self.revs.push(rev);
    }

    /// Returns the number of revisions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.revs.len()
    }

    /// Returns true if the list holds no revisions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.revs.is_empty()
    }

    /// Finds a revision by `(doc_id, rev_id)`.
    #[must_use]
    pub fn find(&self, doc_id: &str, rev_id: &RevId) -> Option<&Revision> {
        self.revs.iter().find(|r| r.same_revision_as(doc_id, rev_id))
    }

    /// Returns true if the pair is present.
    #[must_use]
    pub fn contains(&self, doc_id: &str, rev_id: &RevId) -> bool {
        self.find(doc_id, rev_id).is_some()
    }

    /// Removes the revision addressed by `(doc_id, rev_id)`, if present.
    pub fn remove(&mut self, doc_id: &str, rev_id: &RevId) -> Option<Revision> {
        let idx = self
            .revs
            .iter()
            .position(|r| r.same_revision_as(doc_id, rev_id))?;
        Some(self.revs.remove(idx))
    }

    /// Keeps only revisions for which the predicate holds.
    pub fn retain(&mut self, f: impl FnMut(&Revision) -> bool) {
        self.revs.retain(f);
    }

    /// Sorts by ascending sequence; revisions without one sort first.
    pub fn sort_by_sequence(&mut self) {
        self.revs.sort_by_key(Revision::sequence);
    }

    /// Truncates to at most `n` revisions.
    pub fn limit(&mut self, n: usize) {
        self.revs.truncate(n);
    }

    /// Iterates over the revisions in order.
    pub fn iter(&self) -> impl Iterator<Item = &Revision> {
        self.revs.iter()
    }

    /// Returns every doc ID in the list, in order, with duplicates.
    #[must_use]
    pub fn doc_ids(&self) -> Vec<&str> {
        self.revs.iter().map(Revision::doc_id).collect()
    }

    /// Returns every rev ID in the list, in order.
    #[must_use]
    pub fn rev_ids(&self) -> Vec<&RevId> {
        self.revs.iter().map(Revision::rev_id).collect()
    }
}

impl FromIterator<Revision> for RevisionList {
    fn from_iter<I: IntoIterator<Item = Revision>>(iter: I) -> Self {
        Self {
            revs: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for RevisionList {
    type Item = Revision;
    type IntoIter = std::vec::IntoIter<Revision>;

    fn into_iter(self) -> Self::IntoIter {
        self.revs.into_iter()
    }
}

impl<'a> IntoIterator for &'a RevisionList {
    type Item = &'a Revision;
    type IntoIter = std::slice::Iter<'a, Revision>;

    fn into_iter(self) -> Self::IntoIter {
        self.revs.iter()
    }
}

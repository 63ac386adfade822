//! Query options and result pages.

use crate::revision::Revision;
use crate::types::Sequence;

/// Options for [`crate::Database::all_documents`] and
/// [`crate::Database::changes_since`].
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// First doc ID in iteration order (inclusive).
    pub start_key: Option<String>,
    /// Last doc ID in iteration order (inclusive).
    pub end_key: Option<String>,
    /// Rows to skip before the first returned one.
    pub skip: usize,
    /// Maximum number of rows returned.
    pub limit: usize,
    /// Iterate doc IDs in descending order.
    pub descending: bool,
    /// Populate document bodies in the result rows.
    pub include_docs: bool,
    /// Snapshot the last sequence into the result page.
    pub update_seq: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            start_key: None,
            end_key: None,
            skip: 0,
            limit: usize::MAX,
            descending: false,
            include_docs: false,
            update_seq: false,
        }
    }
}

impl QueryOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the first key in iteration order.
    #[must_use]
    pub fn start_key(mut self, key: impl Into<String>) -> Self {
        self.start_key = Some(key.into());
        self
    }

    /// Sets the last key in iteration order.
    #[must_use]
    pub fn end_key(mut self, key: impl Into<String>) -> Self {
        self.end_key = Some(key.into());
        self
    }

    /// Sets the number of rows to skip.
    #[must_use]
    pub const fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Sets the row cap.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Sets descending iteration.
    #[must_use]
    pub const fn descending(mut self, value: bool) -> Self {
        self.descending = value;
        self
    }

    /// Sets whether bodies are populated.
    #[must_use]
    pub const fn include_docs(mut self, value: bool) -> Self {
        self.include_docs = value;
        self
    }

    /// Sets whether the result snapshots the last sequence.
    #[must_use]
    pub const fn update_seq(mut self, value: bool) -> Self {
        self.update_seq = value;
        self
    }
}

/// One page of [`crate::Database::all_documents`] output.
#[derive(Debug, Clone)]
pub struct AllDocsPage {
    /// The winning live revision of each document in the page, sorted by
    /// doc ID in the requested direction.
    pub rows: Vec<Revision>,
    /// Count of live documents in the whole store, not just this page.
    pub total_rows: u64,
    /// Number of rows skipped before this page.
    pub offset: usize,
    /// Last sequence at query time, if `update_seq` was requested;
    /// snapshotted in the same transaction as the rows.
    pub update_seq: Option<Sequence>,
}

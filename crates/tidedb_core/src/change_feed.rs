//! Change feed and in-process change notifications.
//!
//! Every committed insert produces a [`ChangeEvent`]. Events are queued
//! inside the transaction and dispatched only after the outermost commit,
//! in commit order; a rolled-back transaction dispatches nothing.
//! Observers receive events over `mpsc` channels, so a handler never runs
//! on the committing stack frame and cannot re-enter the store mid-commit.

use crate::database::Database;
use crate::error::CoreResult;
use crate::query::QueryOptions;
use crate::revision::Revision;
use crate::types::Sequence;
use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// A single committed change: the revision (body omitted) and the
/// sequence assigned to it.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// The inserted revision, without its body.
    pub rev: Revision,
    /// The sequence the insert committed at.
    pub seq: Sequence,
}

/// Distributes committed changes to subscribers.
///
/// The feed:
/// - Emits only committed changes, in commit order
/// - Supports multiple subscribers
/// - Keeps a bounded history for cursor-style polling
pub struct ChangeFeed {
    /// Subscribers (senders).
    subscribers: RwLock<Vec<Sender<ChangeEvent>>>,
    /// Recent events for polling observers that missed the live dispatch.
    history: RwLock<Vec<ChangeEvent>>,
    /// Bound on `history`.
    max_history: usize,
}

impl ChangeFeed {
    /// Creates a feed retaining at most `max_history` events.
    #[must_use]
    pub fn new(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
        }
    }

    /// Subscribes to the feed.
    ///
    /// Returns a receiver that is handed every future change event. The
    /// receiver should be drained regularly; a dropped receiver is pruned
    /// on the next emit.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits one committed change to all subscribers.
    pub fn emit(&self, event: ChangeEvent) {
        {
            let mut history = self.history.write();
            history.push(event.clone());
            if history.len() > self.max_history {
                let excess = history.len() - self.max_history;
                history.drain(0..excess);
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns retained events with `seq > cursor`, up to `limit`.
    #[must_use]
    pub fn poll(&self, cursor: Sequence, limit: usize) -> Vec<ChangeEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| e.seq > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Database {
    /// Returns the ordered change batch since a replication cursor.
    ///
    /// Revisions with `sequence > since` that are current leaves, in
    /// ascending sequence order, capped at `options.limit`. Bodies are not
    /// populated; call [`Database::load_body`] on the revisions that need
    /// them.
    pub fn changes_since(
        &self,
        since: Sequence,
        options: &QueryOptions,
    ) -> CoreResult<Vec<Revision>> {
        self.check_open()?;
        let rows = self.storage().rows_since(since, options.limit)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                Revision::new(row.doc_id, row.rev_id, row.deleted).with_sequence(row.sequence)
            })
            .collect())
    }

    /// Subscribes to committed changes.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.feed().subscribe()
    }
}

//! # tidedb Core
//!
//! Core document-revision store for tidedb: an embedded, single-file
//! database of versioned JSON documents intended as the local endpoint of
//! an eventually-consistent, master-master replication protocol.
//!
//! This crate provides:
//! - Documents as branching revision DAGs with single-current-leaf
//!   conflict semantics
//! - Transactional writes with counted scope nesting and rollback
//! - A monotonic per-database sequence that orders every commit and
//!   serves as the replication cursor
//! - The change feed and the queries replication needs (missing-revision
//!   diffing, history traversal, forced chain splicing)
//!
//! The SQL engine (SQLite), JSON codec (serde_json), view indexing, and
//! any network transport are external collaborators: this crate is only
//! the store.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod change_feed;
pub mod config;
pub mod database;
pub mod error;
pub mod query;
pub mod revid;
pub mod revision;
pub mod types;

mod replication;
mod storage;
mod transaction;

pub use change_feed::{ChangeEvent, ChangeFeed};
pub use config::Config;
pub use database::{Database, DatabaseStats};
pub use error::{CoreError, CoreResult};
pub use query::{AllDocsPage, QueryOptions};
pub use revid::{Generation, RevId};
pub use revision::{Body, NewRevision, Revision, RevisionList};
pub use types::{Sequence, Status};

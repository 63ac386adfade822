//! Test fixtures and database helpers.

use std::path::PathBuf;
use std::sync::Once;
use tempfile::TempDir;
use tidedb_core::Database;

/// A test database with automatic cleanup.
pub struct TestDatabase {
    /// The database instance.
    pub db: Database,
    /// The temporary directory (kept alive to prevent early cleanup).
    temp_dir: Option<TempDir>,
}

impl TestDatabase {
    /// Creates a new in-memory test database.
    #[must_use]
    pub fn memory() -> Self {
        Self {
            db: Database::open_in_memory().expect("failed to open in-memory database"),
            temp_dir: None,
        }
    }

    /// Creates a new file-based test database in a temp directory.
    #[must_use]
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let db = Database::open(&temp_dir.path().join("test.tidedb"))
            .expect("failed to open file database");
        Self {
            db,
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the database file path if file-based, `None` if in-memory.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir
            .as_ref()
            .map(|dir| dir.path().join("test.tidedb"))
    }
}

impl std::ops::Deref for TestDatabase {
    type Target = Database;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

/// Installs a tracing subscriber honoring `RUST_LOG`, once per process.
///
/// Call at the top of a test when you want to see store-level trace
/// output while debugging a failure.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

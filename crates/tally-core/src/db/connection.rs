//! Database connection management

use crate::error::{Error, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

use super::migrations;

/// Database wrapper for `SQLite` connections
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Open a database at the given path, creating it if it doesn't exist
    ///
    /// Runs migrations automatically. A file that is not a valid database is
    /// moved aside and a fresh database is created in its place.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        match Self::open_file(&path) {
            Ok(db) => Ok(db),
            Err(error) if is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local database at {} is unreadable: {}. Moving it aside and starting fresh.",
                    path.display(),
                    error
                );
                quarantine_corrupted_db_files(&path)?;
                Self::open_file(&path)
            }
            Err(error) => Err(error),
        }
    }

    /// Open an in-memory database (useful for testing)
    pub fn open_in_memory() -> Result<Self> {
        let mut database = Self {
            conn: Connection::open_in_memory()?,
            path: None,
        };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    fn open_file(path: &Path) -> Result<Self> {
        let mut database = Self {
            conn: Connection::open(path)?,
            path: Some(path.to_path_buf()),
        };
        database.configure()?;
        database.migrate()?;
        Ok(database)
    }

    /// Configure `SQLite` for optimal performance
    fn configure(&self) -> Result<()> {
        // WAL is unavailable for in-memory databases; ignore the refusal
        self.conn.execute_batch("PRAGMA journal_mode = WAL;").ok();
        self.conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = 10000;",
        )?;
        Ok(())
    }

    /// Run database migrations
    fn migrate(&mut self) -> Result<()> {
        migrations::run(&mut self.conn)
    }

    /// Filesystem location, `None` for in-memory databases
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Get a reference to the underlying connection
    pub const fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Get a mutable reference to the underlying connection (transactions)
    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }
}

fn is_corrupted_db_error(error: &Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("file is not a database") || message.contains("database disk image is malformed")
}

fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
    if db_path.exists() {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let base_name = db_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("tally.db");
        let backup_path = db_path.with_file_name(format!("{base_name}.corrupt-{timestamp}"));

        std::fs::rename(db_path, &backup_path)
            .map_err(|error| Error::Database(format!("failed to quarantine database: {error}")))?;
        tracing::warn!(
            "Moved corrupted local DB file from {} to {}",
            db_path.display(),
            backup_path.display()
        );
    }

    let Some(parent) = db_path.parent() else {
        return Ok(());
    };
    let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
        return Ok(());
    };

    for suffix in ["-wal", "-shm", "-journal"] {
        let sidecar = parent.join(format!("{base_name}{suffix}"));
        if sidecar.exists() {
            std::fs::remove_file(&sidecar)?;
            tracing::warn!("Removed stale database sidecar {}", sidecar.display());
        }
    }

    Ok(())
}

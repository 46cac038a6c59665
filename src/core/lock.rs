//! Purpose: Cross-process uri claims backed by a small SQLite relation.
//! Exports: `LockStore`, `ClaimOutcome`, `LockRow`, `STALE_LOCK_SECS`.
//! Role: The only state shared between processes using one cache directory.
//! Invariants: At most one row per uri; a claim is a single conditional insert.
//! Invariants: Conflicts are reported as `ClaimOutcome::Conflict`, never as errors.
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension, params};

use crate::core::error::{Error, ErrorKind};

/// Age after which a claim is treated as abandoned.
pub const STALE_LOCK_SECS: f64 = 10.0;

#[derive(Clone, Debug, PartialEq)]
pub struct LockRow {
    pub uri: String,
    pub owner: u32,
    pub claimed_at: f64,
}

impl LockRow {
    pub fn age(&self, now: f64) -> f64 {
        now - self.claimed_at
    }

    pub fn is_stale(&self, now: f64, threshold: f64) -> bool {
        self.age(now) > threshold
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ClaimOutcome {
    Claimed,
    Conflict(LockRow),
}

pub struct LockStore {
    path: PathBuf,
    conn: Connection,
}

impl LockStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(|err| db_error("open lock db", &path, err))?;
        conn.execute_batch(
            "PRAGMA busy_timeout = 5000;
             CREATE TABLE IF NOT EXISTS locks (
                uri TEXT PRIMARY KEY,
                owner INTEGER NOT NULL,
                claimed_at REAL NOT NULL
             );",
        )
        .map_err(|err| db_error("create lock table", &path, err))?;
        Ok(Self { path, conn })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn claim(&self, uri: &str, owner: u32, now: f64) -> Result<ClaimOutcome, Error> {
        let inserted = self
            .conn
            .execute(
                "INSERT OR IGNORE INTO locks (uri, owner, claimed_at) VALUES (?1, ?2, ?3)",
                params![uri, owner, now],
            )
            .map_err(|err| db_error("insert lock row", &self.path, err))?;
        if inserted == 1 {
            return Ok(ClaimOutcome::Claimed);
        }
        match self.row(uri)? {
            Some(row) => Ok(ClaimOutcome::Conflict(row)),
            // Released between our insert and read.
            None => {
                let inserted = self
                    .conn
                    .execute(
                        "INSERT OR IGNORE INTO locks (uri, owner, claimed_at) VALUES (?1, ?2, ?3)",
                        params![uri, owner, now],
                    )
                    .map_err(|err| db_error("insert lock row", &self.path, err))?;
                if inserted == 1 {
                    Ok(ClaimOutcome::Claimed)
                } else {
                    self.row(uri)?
                        .map(ClaimOutcome::Conflict)
                        .ok_or_else(|| {
                            Error::new(ErrorKind::Internal)
                                .with_message("lock row vanished twice during claim")
                                .with_uri(uri)
                        })
                }
            }
        }
    }

    /// Deletes the exact row observed during a conflict. Returns whether a row was removed.
    pub fn reclaim(&self, row: &LockRow) -> Result<bool, Error> {
        self.delete_exact(row, "delete stale lock row")
    }

    /// Releases a claim only while it is still the caller's. Returns false when
    /// the row was reclaimed by someone else in the meantime.
    pub fn release_claim(&self, row: &LockRow) -> Result<bool, Error> {
        self.delete_exact(row, "release lock row")
    }

    /// Unconditional release of whatever row holds `uri`.
    pub fn release(&self, uri: &str) -> Result<(), Error> {
        self.conn
            .execute("DELETE FROM locks WHERE uri = ?1", params![uri])
            .map_err(|err| db_error("delete lock row", &self.path, err))?;
        Ok(())
    }

    pub fn row(&self, uri: &str) -> Result<Option<LockRow>, Error> {
        self.conn
            .query_row(
                "SELECT uri, owner, claimed_at FROM locks WHERE uri = ?1",
                params![uri],
                |row| {
                    Ok(LockRow {
                        uri: row.get(0)?,
                        owner: row.get(1)?,
                        claimed_at: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(|err| db_error("read lock row", &self.path, err))
    }

    pub fn rows(&self) -> Result<Vec<LockRow>, Error> {
        let mut stmt = self
            .conn
            .prepare("SELECT uri, owner, claimed_at FROM locks ORDER BY claimed_at")
            .map_err(|err| db_error("prepare lock listing", &self.path, err))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LockRow {
                    uri: row.get(0)?,
                    owner: row.get(1)?,
                    claimed_at: row.get(2)?,
                })
            })
            .map_err(|err| db_error("list lock rows", &self.path, err))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|err| db_error("decode lock row", &self.path, err))
    }

    /// Removes every row older than `threshold`. Returns the number removed.
    pub fn purge_stale(&self, now: f64, threshold: f64) -> Result<usize, Error> {
        self.conn
            .execute(
                "DELETE FROM locks WHERE ?1 - claimed_at > ?2",
                params![now, threshold],
            )
            .map_err(|err| db_error("purge stale lock rows", &self.path, err))
    }

    fn delete_exact(&self, row: &LockRow, action: &str) -> Result<bool, Error> {
        let deleted = self
            .conn
            .execute(
                "DELETE FROM locks WHERE uri = ?1 AND owner = ?2 AND claimed_at = ?3",
                params![row.uri, row.owner, row.claimed_at],
            )
            .map_err(|err| db_error(action, &self.path, err))?;
        Ok(deleted == 1)
    }
}

fn db_error(action: &str, path: &Path, err: rusqlite::Error) -> Error {
    Error::new(ErrorKind::Io)
        .with_message(format!("{action} failed"))
        .with_path(path)
        .with_source(err)
}

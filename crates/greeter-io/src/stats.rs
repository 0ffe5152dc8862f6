//! Daily greeting counts in SQLite.

use chrono::NaiveDate;
use greeter_core::types::day_key;
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("failed to create stats directory {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },
    #[error("stats database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Persistent day → greeting count mapping.
pub trait StatsStore: Send {
    /// Add one greeting for `day`; returns the new count.
    fn increment(&mut self, day: NaiveDate) -> Result<u64, StatsError>;

    /// Every day with its count, oldest first.
    fn read_all(&self) -> Result<BTreeMap<String, u64>, StatsError>;
}

pub struct SqliteStats {
    conn: Connection,
}

impl SqliteStats {
    /// Open (or create) the stats database at `path`.
    pub fn open(path: &Path) -> Result<Self, StatsError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StatsError::CreateDir {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self::init(conn)?;
        tracing::info!(path = %path.display(), "stats store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StatsError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StatsError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS greeting_stats (
                day TEXT PRIMARY KEY,
                count INTEGER NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }
}

impl StatsStore for SqliteStats {
    fn increment(&mut self, day: NaiveDate) -> Result<u64, StatsError> {
        let key = day_key(day);
        let count: i64 = self.conn.query_row(
            "INSERT INTO greeting_stats (day, count) VALUES (?1, 1)
             ON CONFLICT(day) DO UPDATE SET count = count + 1
             RETURNING count",
            params![key],
            |row| row.get(0),
        )?;
        tracing::debug!(day = %key, count, "greeting recorded");
        Ok(count.max(0) as u64)
    }

    fn read_all(&self) -> Result<BTreeMap<String, u64>, StatsError> {
        let mut stmt = self
            .conn
            .prepare("SELECT day, count FROM greeting_stats ORDER BY day")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut all = BTreeMap::new();
        for row in rows {
            let (day, count) = row?;
            all.insert(day, count.max(0) as u64);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    #[test]
    fn test_increment_upserts() {
        let mut stats = SqliteStats::open_in_memory().unwrap();
        assert_eq!(stats.increment(day(5)).unwrap(), 1);
        assert_eq!(stats.increment(day(5)).unwrap(), 2);
        assert_eq!(stats.increment(day(6)).unwrap(), 1);
    }

    #[test]
    fn test_read_all_ordered_by_day() {
        let mut stats = SqliteStats::open_in_memory().unwrap();
        stats.increment(day(9)).unwrap();
        stats.increment(day(1)).unwrap();
        stats.increment(day(9)).unwrap();

        let all = stats.read_all().unwrap();
        let entries: Vec<_> = all.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        assert_eq!(entries, vec![("2024-03-01", 1), ("2024-03-09", 2)]);
    }

    #[test]
    fn test_empty_store() {
        let stats = SqliteStats::open_in_memory().unwrap();
        assert!(stats.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_counts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("stats.db");
        {
            let mut stats = SqliteStats::open(&path).unwrap();
            stats.increment(day(2)).unwrap();
            stats.increment(day(2)).unwrap();
        }
        let mut stats = SqliteStats::open(&path).unwrap();
        assert_eq!(stats.increment(day(2)).unwrap(), 3);
        assert_eq!(stats.read_all().unwrap().get("2024-03-02"), Some(&3));
    }
}

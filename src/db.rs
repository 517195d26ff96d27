//! Page cache: raw markup keyed by URL path. Seeded by `crawl`, read by the
//! fetch capability. The pipeline itself never writes here.

use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

pub struct PageCache {
    conn: Mutex<Connection>,
}

pub struct CacheStats {
    pub pages: usize,
    pub bytes: i64,
}

impl PageCache {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS pages (
                path       TEXT PRIMARY KEY,
                html       BLOB NOT NULL,
                fetched_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Raw markup for a URL path, if a prior crawl stored it.
    pub fn get(&self, url_path: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock().unwrap();
        let row = conn
            .query_row(
                "SELECT html FROM pages WHERE path = ?1",
                params![url_path],
                |r| r.get(0),
            )
            .optional()?;
        Ok(row)
    }

    pub fn contains(&self, url_path: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row(
            "SELECT count(*) FROM pages WHERE path = ?1",
            params![url_path],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    }

    /// Store one fetched page. Returns false when the path was already cached.
    pub fn put(&self, url_path: &str, html: &[u8]) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO pages (path, html) VALUES (?1, ?2)",
            params![url_path, html],
        )?;
        Ok(changed > 0)
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let conn = self.conn.lock().unwrap();
        let (pages, bytes) = conn.query_row(
            "SELECT count(*), coalesce(sum(length(html)), 0) FROM pages",
            [],
            |r| Ok((r.get::<_, i64>(0)? as usize, r.get(1)?)),
        )?;
        Ok(CacheStats { pages, bytes })
    }
}

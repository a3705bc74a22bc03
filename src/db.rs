use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use rusqlite::Connection;
use tracing::info;

use crate::extract::Record;

pub const DB_PATH: &str = "data/records.sqlite";

pub fn connect(path: &str) -> Result<Connection> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS records (
            id         INTEGER PRIMARY KEY,
            source     TEXT UNIQUE NOT NULL,
            name       TEXT,
            fetched_at TEXT NOT NULL,
            row_json   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_records_name ON records(name);
        ",
    )?;
    Ok(())
}

/// Store one raw (pre-normalization) record keyed by its source URL.
pub fn insert_record(conn: &Connection, source: &str, name: &str, record: &Record) -> Result<()> {
    let row_json = serde_json::to_string(record)?;
    conn.execute(
        "INSERT OR REPLACE INTO records (source, name, fetched_at, row_json)
         VALUES (?1, ?2, ?3, ?4)",
        rusqlite::params![source, name, Utc::now().to_rfc3339(), row_json],
    )?;
    info!("Stored {} in record store", source);
    Ok(())
}

/// Every source identifier ever stored; drives the tracker's alternate
/// restore path.
pub fn list_sources(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT source FROM records")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    let mut sources = Vec::new();
    for row in rows {
        sources.push(row?);
    }
    Ok(sources)
}

pub struct StoreStats {
    pub total: i64,
    pub last_fetched_at: Option<String>,
}

pub fn get_stats(conn: &Connection) -> Result<StoreStats> {
    let total = conn.query_row("SELECT COUNT(*) FROM records", [], |r| r.get(0))?;
    let last_fetched_at = conn
        .query_row("SELECT MAX(fetched_at) FROM records", [], |r| r.get(0))
        .unwrap_or(None);
    Ok(StoreStats {
        total,
        last_fetched_at,
    })
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mem() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn insert_and_list_sources() {
        let conn = mem();
        let mut record = Record::new();
        record.insert("Product Name".into(), json!("Laptop One"));
        insert_record(&conn, "https://example.com/one/", "Laptop One", &record).unwrap();
        insert_record(&conn, "https://example.com/two/", "Laptop Two", &record).unwrap();

        let mut sources = list_sources(&conn).unwrap();
        sources.sort();
        assert_eq!(
            sources,
            vec!["https://example.com/one/", "https://example.com/two/"]
        );
    }

    #[test]
    fn reinsert_same_source_does_not_duplicate() {
        let conn = mem();
        let record = Record::new();
        insert_record(&conn, "https://example.com/one/", "A", &record).unwrap();
        insert_record(&conn, "https://example.com/one/", "A", &record).unwrap();
        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.total, 1);
    }

    #[test]
    fn stats_on_empty_store() {
        let conn = mem();
        let stats = get_stats(&conn).unwrap();
        assert_eq!(stats.total, 0);
        assert!(stats.last_fetched_at.is_none());
    }
}

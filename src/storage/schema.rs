//! Database schema definitions
//!
//! This module contains the SQL schema for the shared crawl metadata store.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per fetched URL
CREATE TABLE IF NOT EXISTS siterecord (
    url TEXT PRIMARY KEY,
    crawl_date INTEGER NOT NULL,
    fingerprint INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_siterecord_fingerprint ON siterecord(fingerprint);

-- One row per distinct body
CREATE TABLE IF NOT EXISTS fingerprints (
    fingerprint INTEGER PRIMARY KEY,
    storage_path TEXT NOT NULL,
    last_parsed INTEGER NOT NULL
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

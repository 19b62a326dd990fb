use std::path::Path;

use rusqlite::Connection;

use crate::error::Result;

// Amounts are integer milliunits throughout, so the corpus never does
// float arithmetic on money.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS approved_transactions (
    id INTEGER PRIMARY KEY,
    transaction_id TEXT NOT NULL UNIQUE,
    payee TEXT NOT NULL,
    category_id TEXT NOT NULL,
    category_name TEXT NOT NULL,
    amount INTEGER NOT NULL,
    date TEXT NOT NULL,
    was_split INTEGER DEFAULT 0,
    approved_at TEXT DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_approved_payee ON approved_transactions(payee);

CREATE TABLE IF NOT EXISTS imports (
    id INTEGER PRIMARY KEY,
    filename TEXT NOT NULL,
    import_date TEXT DEFAULT (datetime('now')),
    record_count INTEGER,
    checksum TEXT
);

CREATE TABLE IF NOT EXISTS decisions (
    id INTEGER PRIMARY KEY,
    transaction_id TEXT NOT NULL,
    payee TEXT NOT NULL,
    category_id TEXT,
    category_name TEXT,
    tier INTEGER,
    confidence REAL NOT NULL,
    needs_review INTEGER DEFAULT 0,
    decided_at TEXT DEFAULT (datetime('now'))
);
";

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

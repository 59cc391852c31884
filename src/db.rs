use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

pub const DB_FILE: &str = "edufaced.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn open_in_memory() -> anyhow::Result<Connection> {
    let conn = Connection::open_in_memory()?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS documents(
            partition TEXT PRIMARY KEY,
            body TEXT NOT NULL,
            revision INTEGER NOT NULL
        )",
        [],
    )?;
    // Workspaces created before revision timestamps existed lack updated_at.
    ensure_documents_updated_at(conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

fn ensure_documents_updated_at(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "documents", "updated_at")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE documents ADD COLUMN updated_at TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Raw stored document: body text is returned unparsed.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub body: String,
    pub revision: i64,
}

pub fn document_get(conn: &Connection, partition: &str) -> rusqlite::Result<Option<StoredDocument>> {
    conn.query_row(
        "SELECT body, revision FROM documents WHERE partition = ?",
        [partition],
        |r| {
            Ok(StoredDocument {
                body: r.get(0)?,
                revision: r.get(1)?,
            })
        },
    )
    .optional()
}

pub enum PutOutcome {
    Stored(i64),
    Conflict { current: Option<i64> },
}

/// Writes `body` if the stored revision still equals `expected` (None = absent).
pub fn document_put(
    conn: &mut Connection,
    partition: &str,
    body: &str,
    expected: Option<i64>,
) -> rusqlite::Result<PutOutcome> {
    let tx = conn.transaction()?;
    let current: Option<i64> = tx
        .query_row(
            "SELECT revision FROM documents WHERE partition = ?",
            [partition],
            |r| r.get(0),
        )
        .optional()?;
    if current != expected {
        return Ok(PutOutcome::Conflict { current });
    }
    let next = current.unwrap_or(0) + 1;
    let now = chrono::Utc::now().to_rfc3339();
    tx.execute(
        "INSERT INTO documents(partition, body, revision, updated_at) VALUES(?, ?, ?, ?)
         ON CONFLICT(partition) DO UPDATE SET
           body = excluded.body,
           revision = excluded.revision,
           updated_at = excluded.updated_at",
        (partition, body, next, &now),
    )?;
    tx.commit()?;
    Ok(PutOutcome::Stored(next))
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, &text),
    )?;
    Ok(())
}

pub fn settings_delete(conn: &Connection, key: &str) -> anyhow::Result<()> {
    conn.execute("DELETE FROM settings WHERE key = ?", [key])?;
    Ok(())
}

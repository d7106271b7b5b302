use crate::EvalsetError;
use crate::config::EvalsetConfig;
use crate::db::{open_session_db, open_warehouse_readonly};
use crate::session::{CURRENT_AGENT, get_meta, load_store};
use crate::warehouse::TableName;
use rusqlite::Connection;
use std::path::Path;

pub fn handle_status(
    config: &EvalsetConfig,
    warehouse_path: &Path,
    session_path: &Path,
) -> Result<(), EvalsetError> {
    if session_path.exists() {
        let conn = open_session_db(session_path)?;
        let store = load_store(&conn)?;
        let size = std::fs::metadata(session_path)?.len();
        eprintln!(
            "evalset: session — {} ({}, {} records)",
            session_path.display(),
            fmt_size(size),
            store.len()
        );
        if let Some(agent) = get_meta(&conn, CURRENT_AGENT)? {
            eprintln!("evalset: current agent — {agent}");
        }
    } else {
        eprintln!("evalset: no session at {}", session_path.display());
    }

    if !warehouse_path.exists() {
        eprintln!("evalset: no warehouse at {}", warehouse_path.display());
        return Ok(());
    }
    let size = std::fs::metadata(warehouse_path)?.len();
    eprintln!(
        "evalset: warehouse — {} ({})",
        warehouse_path.display(),
        fmt_size(size)
    );

    let conn = open_warehouse_readonly(warehouse_path)?;
    let events = config.events_table()?;
    let agents = config.agents_table()?;
    eprintln!("evalset: events ({events}) — {}", fmt_count(row_count(&conn, &events)?));
    eprintln!("evalset: agents ({agents}) — {}", fmt_count(row_count(&conn, &agents)?));
    eprintln!("evalset: correlation — {:?}", config.query.mode);
    Ok(())
}

/// `None` when the table does not exist.
fn row_count(conn: &Connection, table: &TableName) -> Result<Option<i64>, EvalsetError> {
    if !table.exists(conn)? {
        return Ok(None);
    }
    let n = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table.sql()), [], |r| r.get(0))?;
    Ok(Some(n))
}

fn fmt_count(count: Option<i64>) -> String {
    match count {
        Some(n) => n.to_string(),
        None => "missing".into(),
    }
}

fn fmt_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

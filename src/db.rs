use crate::EvalsetError;
use crate::schema::MIGRATIONS;
use rusqlite::{Connection, OpenFlags};
use std::path::Path;

#[cfg(unix)]
fn ensure_secure_permissions(db_path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(dir) = db_path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)?;
        // Only set permissions on dirs we created
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))?;
    }
    if db_path.exists() {
        std::fs::set_permissions(db_path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_secure_permissions(db_path: &Path) -> std::io::Result<()> {
    if let Some(dir) = db_path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Apply standard PRAGMAs.
fn apply_pragmas(conn: &Connection, readonly: bool) -> Result<(), EvalsetError> {
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    if !readonly {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
    }
    Ok(())
}

/// Open (creating if needed) the per-user session database and bring its
/// schema up to date.
pub fn open_session_db(db_path: &Path) -> Result<Connection, EvalsetError> {
    ensure_secure_permissions(db_path)?;

    let mut conn = Connection::open(db_path)?;
    apply_pragmas(&conn, false)?;
    MIGRATIONS.to_latest(&mut conn)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(db_path, std::fs::Permissions::from_mode(0o600))?;
    }

    Ok(conn)
}

/// Open an existing warehouse for reading. A missing file is reported as an
/// unavailable source rather than silently created.
pub fn open_warehouse_readonly(db_path: &Path) -> Result<Connection, EvalsetError> {
    if !db_path.exists() {
        return Err(EvalsetError::SourceUnavailable(format!(
            "warehouse not found: {}",
            db_path.display()
        )));
    }
    let conn = Connection::open_with_flags(
        db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| EvalsetError::SourceUnavailable(format!("{}: {e}", db_path.display())))?;
    apply_pragmas(&conn, true)?;
    Ok(conn)
}

/// Open the warehouse for writing, creating the file if needed.
pub fn open_warehouse(db_path: &Path) -> Result<Connection, EvalsetError> {
    if let Some(dir) = db_path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)?;
    }
    let conn = Connection::open(db_path)?;
    apply_pragmas(&conn, false)?;
    Ok(conn)
}

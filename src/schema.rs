use rusqlite_migration::{M, Migrations};
use std::sync::LazyLock;

/// Session database: the working dataset between CLI invocations.
pub static MIGRATIONS: LazyLock<Migrations<'static>> = LazyLock::new(|| {
    Migrations::new(vec![
        M::up(
            "
CREATE TABLE dataset_records (
    position        INTEGER PRIMARY KEY,
    input_query     TEXT NOT NULL,
    expected_tools  TEXT NOT NULL
);
",
        ),
        M::up(
            "
CREATE TABLE session_meta (
    key         TEXT PRIMARY KEY,
    value       TEXT NOT NULL,
    updated_at  INTEGER NOT NULL DEFAULT (unixepoch('now'))
);
",
        ),
    ])
});

pub mod assemble;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod correlate;
pub mod dataset;
pub mod db;
pub mod model;
pub mod query;
pub mod schema;
pub mod session;
pub mod sink;
pub mod source;
pub mod status;
pub mod text;
pub mod tools;
pub mod warehouse;

#[derive(Debug)]
pub enum EvalsetError {
    Database(rusqlite::Error),
    Io(std::io::Error),
    Json(serde_json::Error),
    Csv(csv::Error),
    Config(String),
    SourceUnavailable(String),
    SchemaMismatch(String),
    Validation(String),
}

impl std::fmt::Display for EvalsetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalsetError::Database(e) => write!(f, "database: {e}"),
            EvalsetError::Io(e) => write!(f, "io: {e}"),
            EvalsetError::Json(e) => write!(f, "json: {e}"),
            EvalsetError::Csv(e) => write!(f, "csv: {e}"),
            EvalsetError::Config(msg) => write!(f, "config: {msg}"),
            EvalsetError::SourceUnavailable(msg) => write!(f, "event source unavailable: {msg}"),
            EvalsetError::SchemaMismatch(msg) => write!(f, "schema mismatch: {msg}"),
            EvalsetError::Validation(msg) => write!(f, "invalid input: {msg}"),
        }
    }
}

impl std::error::Error for EvalsetError {}

impl From<rusqlite::Error> for EvalsetError {
    fn from(e: rusqlite::Error) -> Self {
        EvalsetError::Database(e)
    }
}

impl From<std::io::Error> for EvalsetError {
    fn from(e: std::io::Error) -> Self {
        EvalsetError::Io(e)
    }
}

impl From<serde_json::Error> for EvalsetError {
    fn from(e: serde_json::Error) -> Self {
        EvalsetError::Json(e)
    }
}

impl From<csv::Error> for EvalsetError {
    fn from(e: csv::Error) -> Self {
        EvalsetError::Csv(e)
    }
}

impl From<rusqlite_migration::Error> for EvalsetError {
    fn from(e: rusqlite_migration::Error) -> Self {
        match e {
            rusqlite_migration::Error::RusqliteError { query: _, err } => EvalsetError::Database(err),
            other => EvalsetError::Config(format!("migration: {other}")),
        }
    }
}

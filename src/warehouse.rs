use crate::EvalsetError;
use crate::db::open_warehouse;
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, params};
use serde::Deserialize;
use serde_json::Value;
use std::io::BufRead;
use std::path::Path;
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// A `[SCHEMA.]TABLE` reference inside the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableName {
    pub schema: Option<String>,
    pub table: String,
}

impl TableName {
    pub fn parse(raw: &str) -> Result<Self, EvalsetError> {
        let parts: Vec<&str> = raw.trim().split('.').map(str::trim).collect();
        let (schema, table) = match parts.as_slice() {
            [table] => (None, *table),
            [schema, table] => (Some(*schema), *table),
            _ => {
                return Err(EvalsetError::Validation(format!(
                    "invalid table name {raw:?} (expected TABLE or SCHEMA.TABLE)"
                )));
            }
        };
        for part in schema.iter().chain(std::iter::once(&table)) {
            if !IDENTIFIER.is_match(part) {
                return Err(EvalsetError::Validation(format!(
                    "invalid identifier {part:?} in table name {raw:?}"
                )));
            }
        }
        Ok(Self {
            schema: schema.map(str::to_string),
            table: table.to_string(),
        })
    }

    pub fn to_uppercase(&self) -> Self {
        Self {
            schema: self.schema.as_ref().map(|s| s.to_uppercase()),
            table: self.table.to_uppercase(),
        }
    }

    /// Quoted form for interpolation into SQL. Identifiers are validated on
    /// parse, so quoting cannot be escaped.
    pub fn sql(&self) -> String {
        match &self.schema {
            Some(schema) => format!("\"{schema}\".\"{}\"", self.table),
            None => format!("\"{}\"", self.table),
        }
    }

    /// Column names, empty if the table does not exist.
    pub fn columns(&self, conn: &Connection) -> Result<Vec<String>, EvalsetError> {
        let sql = match &self.schema {
            Some(schema) => format!("PRAGMA \"{schema}\".table_info(\"{}\")", self.table),
            None => format!("PRAGMA table_info(\"{}\")", self.table),
        };
        let mut stmt = conn.prepare(&sql)?;
        let cols = stmt
            .query_map([], |r| r.get::<_, String>(1))?
            .collect::<Result<_, _>>()?;
        Ok(cols)
    }

    pub fn exists(&self, conn: &Connection) -> Result<bool, EvalsetError> {
        Ok(!self.columns(conn)?.is_empty())
    }
}

impl std::fmt::Display for TableName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.schema {
            Some(schema) => write!(f, "{schema}.{}", self.table),
            None => write!(f, "{}", self.table),
        }
    }
}

pub fn ensure_events_table(conn: &Connection, table: &TableName) -> Result<(), EvalsetError> {
    let t = table.sql();
    conn.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {t} (
    id                 INTEGER PRIMARY KEY,
    timestamp          TEXT NOT NULL,
    start_timestamp    TEXT,
    scope              TEXT,
    record             TEXT,
    record_attributes  TEXT,
    value              TEXT
);
"
    ))?;
    Ok(())
}

pub fn ensure_agents_table(conn: &Connection, table: &TableName) -> Result<(), EvalsetError> {
    let t = table.sql();
    conn.execute_batch(&format!(
        "
CREATE TABLE IF NOT EXISTS {t} (
    database_name  TEXT NOT NULL,
    schema_name    TEXT NOT NULL,
    name           TEXT NOT NULL,
    agent_spec     TEXT,
    PRIMARY KEY (database_name, schema_name, name)
);
"
    ))?;
    Ok(())
}

#[derive(Deserialize)]
struct EventLine {
    timestamp: String,
    #[serde(default)]
    start_timestamp: Option<String>,
    #[serde(default)]
    scope: Option<Value>,
    #[serde(default)]
    record: Option<Value>,
    #[serde(default)]
    record_attributes: Option<Value>,
    #[serde(default)]
    value: Option<Value>,
}

#[derive(Deserialize)]
struct AgentDefinition {
    database_name: String,
    schema_name: String,
    name: String,
    #[serde(default)]
    agent_spec: Option<Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IngestLine {
    Agent { agent: AgentDefinition },
    Event(EventLine),
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub events: usize,
    pub agents: usize,
    pub skipped: usize,
}

/// Any scalar column as text; numbers are stringified.
pub(crate) fn column_text(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(n) => Some(n.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}

fn canonical_ts(raw: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn json_text(value: &Option<Value>) -> Result<Option<String>, EvalsetError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => Ok(Some(serde_json::to_string(v)?)),
    }
}

/// Insert JSON-lines events and agent definitions in one transaction.
/// Lines that are blank, unparseable, or carry a bad timestamp are skipped.
pub fn ingest<R: BufRead>(
    conn: &Connection,
    events_table: &TableName,
    agents_table: &TableName,
    reader: R,
) -> Result<IngestReport, EvalsetError> {
    ensure_events_table(conn, events_table)?;
    ensure_agents_table(conn, agents_table)?;

    let tx = conn.unchecked_transaction()?;
    let mut report = IngestReport::default();
    {
        let mut insert_event = tx.prepare(&format!(
            "INSERT INTO {} (timestamp, start_timestamp, scope, record, record_attributes, value)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            events_table.sql()
        ))?;
        let mut insert_agent = tx.prepare(&format!(
            "INSERT OR REPLACE INTO {} (database_name, schema_name, name, agent_spec)
             VALUES (?1, ?2, ?3, ?4)",
            agents_table.sql()
        ))?;

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let parsed: IngestLine = match serde_json::from_str(trimmed) {
                Ok(p) => p,
                Err(e) => {
                    log::warn!("record: line {}: {e}", i + 1);
                    report.skipped += 1;
                    continue;
                }
            };
            match parsed {
                IngestLine::Agent { agent } => {
                    insert_agent.execute(params![
                        agent.database_name,
                        agent.schema_name,
                        agent.name,
                        json_text(&agent.agent_spec)?,
                    ])?;
                    report.agents += 1;
                }
                IngestLine::Event(event) => {
                    let Some(ts) = canonical_ts(&event.timestamp) else {
                        log::warn!("record: line {}: bad timestamp {:?}", i + 1, event.timestamp);
                        report.skipped += 1;
                        continue;
                    };
                    let start = event.start_timestamp.as_deref().and_then(canonical_ts);
                    insert_event.execute(params![
                        ts,
                        start,
                        json_text(&event.scope)?,
                        json_text(&event.record)?,
                        json_text(&event.record_attributes)?,
                        json_text(&event.value)?,
                    ])?;
                    report.events += 1;
                }
            }
        }
    }
    tx.commit()?;
    Ok(report)
}

pub fn handle_record(
    warehouse_path: &Path,
    events_table: &TableName,
    agents_table: &TableName,
) -> Result<(), EvalsetError> {
    let conn = open_warehouse(warehouse_path)?;
    let stdin = std::io::stdin();
    let report = ingest(&conn, events_table, agents_table, stdin.lock())?;
    eprintln!(
        "evalset: recorded {} events, {} agents ({} lines skipped)",
        report.events, report.agents, report.skipped
    );
    Ok(())
}

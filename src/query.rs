use crate::EvalsetError;
use crate::catalog::object_name;
use crate::cli::QueryArgs;
use crate::config::EvalsetConfig;
use crate::db::{open_warehouse, open_warehouse_readonly};
use crate::model::{EventFilters, Turn};
use crate::source::{WarehouseSource, load_turns};
use crate::warehouse::TableName;
use rusqlite::{Connection, params};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// One correlated turn as shown by `evalset query`. Texts are raw, as logged.
#[derive(Debug, Serialize)]
pub struct TurnRow {
    pub turn_id: String,
    pub start_time: String,
    pub end_time: String,
    pub latency_seconds: f64,
    pub agent_name: Option<String>,
    pub thread_id: Option<String>,
    pub input_query: Option<String>,
    pub agent_response: Option<String>,
    pub agent_planning: Option<String>,
    pub tool_invocations: serde_json::Value,
    pub user_feedback: Option<bool>,
    pub user_feedback_message: Option<String>,
}

const COLUMNS: [&str; 12] = [
    "TURN_ID",
    "START_TIME",
    "END_TIME",
    "LATENCY_SECONDS",
    "AGENT_NAME",
    "THREAD_ID",
    "INPUT_QUERY",
    "AGENT_RESPONSE",
    "AGENT_PLANNING",
    "TOOL_INVOCATIONS",
    "USER_FEEDBACK",
    "USER_FEEDBACK_MESSAGE",
];

impl TurnRow {
    pub fn from_turn(turn: &Turn) -> Result<Self, EvalsetError> {
        Ok(TurnRow {
            turn_id: turn.turn_id.clone(),
            start_time: turn.start_time.to_rfc3339(),
            end_time: turn.end_time.to_rfc3339(),
            latency_seconds: turn.latency_seconds(),
            agent_name: turn.agent_name.clone(),
            thread_id: turn.thread_id.clone(),
            input_query: turn.input_query.clone(),
            agent_response: turn.agent_response.clone(),
            agent_planning: turn.agent_planning.clone(),
            tool_invocations: serde_json::to_value(&turn.tool_invocations)?,
            user_feedback: turn.user_feedback,
            user_feedback_message: turn.user_feedback_message.clone(),
        })
    }

    /// Flat string cells in `COLUMNS` order; nulls become empty cells.
    fn cells(&self) -> Result<Vec<String>, EvalsetError> {
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();
        Ok(vec![
            self.turn_id.clone(),
            self.start_time.clone(),
            self.end_time.clone(),
            self.latency_seconds.to_string(),
            opt(&self.agent_name),
            opt(&self.thread_id),
            opt(&self.input_query),
            opt(&self.agent_response),
            opt(&self.agent_planning),
            serde_json::to_string(&self.tool_invocations)?,
            self.user_feedback.map(|b| b.to_string()).unwrap_or_default(),
            opt(&self.user_feedback_message),
        ])
    }
}

pub fn turn_rows(turns: &[Turn]) -> Result<Vec<TurnRow>, EvalsetError> {
    turns.iter().map(TurnRow::from_turn).collect()
}

pub fn write_json_lines<W: Write>(mut out: W, rows: &[TurnRow]) -> Result<(), EvalsetError> {
    for row in rows {
        serde_json::to_writer(&mut out, row)?;
        out.write_all(b"\n")?;
    }
    out.flush()?;
    Ok(())
}

pub fn write_csv<W: Write>(out: W, rows: &[TurnRow]) -> Result<(), EvalsetError> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(COLUMNS)?;
    for row in rows {
        writer.write_record(row.cells()?)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write turn rows into a warehouse table, creating it if absent. With
/// `overwrite` existing rows are removed first.
pub fn write_table(
    conn: &Connection,
    table: &TableName,
    rows: &[TurnRow],
    overwrite: bool,
) -> Result<usize, EvalsetError> {
    let columns = COLUMNS
        .iter()
        .map(|c| format!("{c} TEXT"))
        .collect::<Vec<_>>()
        .join(", ");
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {} ({columns});",
        table.sql()
    ))?;

    let existing = table.columns(conn)?;
    for required in COLUMNS {
        if !existing.iter().any(|c| c.eq_ignore_ascii_case(required)) {
            return Err(EvalsetError::SchemaMismatch(format!(
                "table {table} is missing column {required}"
            )));
        }
    }

    let tx = conn.unchecked_transaction()?;
    if overwrite {
        tx.execute(&format!("DELETE FROM {}", table.sql()), [])?;
    }
    {
        let placeholders = (1..=COLUMNS.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut insert = tx.prepare(&format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            table.sql(),
            COLUMNS.join(", ")
        ))?;
        for row in rows {
            insert.execute(params![
                row.turn_id,
                row.start_time,
                row.end_time,
                row.latency_seconds,
                row.agent_name,
                row.thread_id,
                row.input_query,
                row.agent_response,
                row.agent_planning,
                serde_json::to_string(&row.tool_invocations)?,
                row.user_feedback.map(|b| b.to_string()),
                row.user_feedback_message,
            ])?;
        }
    }
    tx.commit()?;
    Ok(rows.len())
}

pub fn handle_query(
    config: &EvalsetConfig,
    warehouse_path: &Path,
    args: &QueryArgs,
) -> Result<(), EvalsetError> {
    let mode = args.mode.unwrap_or(config.query.mode);
    let conn = open_warehouse_readonly(warehouse_path)?;
    let source = WarehouseSource::new(&conn, config.events_table()?, mode);

    if args.show_sql {
        println!("{}", source.sql());
        return Ok(());
    }

    let filters = EventFilters {
        agent_name: args.agent.as_deref().map(object_name).map(str::to_string),
        thread_id: args.thread.clone(),
        record_id: args.record_id.clone(),
        feedback: args.feedback,
    };
    let turns = load_turns(&source, &filters)?;
    let rows = turn_rows(&turns)?;
    drop(conn);

    if let Some(path) = &args.csv {
        write_csv(std::fs::File::create(path)?, &rows)?;
        eprintln!("evalset: wrote {} turns to {}", rows.len(), path.display());
    }

    if let Some(raw) = &args.table {
        let table = TableName::parse(raw)?;
        let conn = open_warehouse(warehouse_path)?;
        let n = write_table(&conn, &table, &rows, args.overwrite)?;
        eprintln!("evalset: wrote {n} turns to table {table}");
    }

    if args.csv.is_none() && args.table.is_none() {
        write_json_lines(std::io::stdout().lock(), &rows)?;
    }
    eprintln!("evalset: {} turns", rows.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RawToolCall, ToolOutput};
    use chrono::DateTime;

    fn turn() -> Turn {
        Turn {
            turn_id: "r1".into(),
            start_time: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            end_time: DateTime::from_timestamp(1_700_000_004, 0).unwrap(),
            agent_name: Some("sales".into()),
            thread_id: Some("42".into()),
            input_query: Some("\"Q1, please\"".into()),
            agent_response: None,
            agent_planning: None,
            tool_invocations: vec![RawToolCall {
                tool_name: "CortexAnalystTool_sales".into(),
                tool_type: Some("cortex_analyst_text_to_sql".into()),
                tool_output: ToolOutput {
                    sql: Some("SELECT 1".into()),
                    ..Default::default()
                },
            }],
            user_feedback: Some(true),
            user_feedback_message: None,
        }
    }

    #[test]
    fn json_lines_carry_latency_and_raw_text() {
        let rows = turn_rows(&[turn()]).unwrap();
        let mut out = Vec::new();
        write_json_lines(&mut out, &rows).unwrap();
        let line: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(line["latency_seconds"], 4.0);
        assert_eq!(line["input_query"], "\"Q1, please\"");
        assert_eq!(line["tool_invocations"][0]["tool_output"]["SQL"], "SELECT 1");
        assert_eq!(line["user_feedback"], true);
    }

    #[test]
    fn csv_has_header_and_one_row_per_turn() {
        let rows = turn_rows(&[turn(), turn()]).unwrap();
        let mut out = Vec::new();
        write_csv(&mut out, &rows).unwrap();
        let mut reader = csv::Reader::from_reader(out.as_slice());
        assert_eq!(reader.headers().unwrap().len(), COLUMNS.len());
        let records: Vec<csv::StringRecord> = reader.records().map(Result::unwrap).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[0][6], "\"Q1, please\"");
        assert_eq!(&records[0][10], "true");
    }

    #[test]
    fn table_write_appends_or_overwrites() {
        let conn = Connection::open_in_memory().unwrap();
        let table = TableName::parse("turns").unwrap();
        let rows = turn_rows(&[turn()]).unwrap();
        write_table(&conn, &table, &rows, false).unwrap();
        write_table(&conn, &table, &rows, false).unwrap();
        let count = |c: &Connection| -> i64 {
            c.query_row("SELECT COUNT(*) FROM turns", [], |r| r.get(0)).unwrap()
        };
        assert_eq!(count(&conn), 2);
        write_table(&conn, &table, &rows, true).unwrap();
        assert_eq!(count(&conn), 1);
    }
}

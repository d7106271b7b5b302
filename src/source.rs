use crate::EvalsetError;
use crate::assemble::assemble;
use crate::correlate::{correlate, filter_by_feedback};
use crate::model::{CorrelationMode, EvaluationRecord, EventAttributes, EventFilters, RawEvent, Turn};
use crate::warehouse::{TableName, column_text};
use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, Row, params};
use serde_json::Value;

/// Anything that can answer a row-level event query.
pub trait EventSource {
    /// Events matching the row-level filters, already attributed to their
    /// `(agent_name, thread_id)` partition. Failures are fatal to the caller.
    fn run_query(&self, filters: &EventFilters) -> Result<Vec<RawEvent>, EvalsetError>;

    /// The attribute this source reports as the correlation key.
    fn mode(&self) -> CorrelationMode;
}

const AGENT_NAME: &str = "snow.ai.observability.object.name";
const THREAD_ID: &str = "snow.ai.observability.agent.thread_id";
const RECORD_ID: &str = "ai.observability.record_id";
const INPUT: &str = "ai.observability.record_root.input";
const OUTPUT: &str = "ai.observability.record_root.output";
const PLANNING: &str = "snow.ai.observability.agent.planning.thinking_response";
const TOOL_ID: &str = "snow.ai.observability.agent.tool.id";
const TOOL_TYPE: &str = "snow.ai.observability.agent.planning.tool_selection.type";
const ANALYST_SQL: &str = "snow.ai.observability.agent.tool.cortex_analyst.sql_query";
const SEARCH_RESULTS: &str = "snow.ai.observability.agent.tool.cortex_search.results";
const CUSTOM_RESULT: &str = "snow.ai.observability.agent.tool.custom_tool.results";

const AGENT_SCOPE: &str = "snow.cortex.agent";

fn attr(name: &str) -> String {
    format!("json_extract(record_attributes, '$.\"{name}\"')")
}

/// Event log stored in a warehouse table.
pub struct WarehouseSource<'a> {
    conn: &'a Connection,
    table: TableName,
    mode: CorrelationMode,
}

impl<'a> WarehouseSource<'a> {
    pub fn new(conn: &'a Connection, table: TableName, mode: CorrelationMode) -> Self {
        Self { conn, table, mode }
    }

    /// Row-level query. Filter values are bound as ?1 (agent), ?2 (thread),
    /// ?3 (record id); NULL disables a filter.
    pub fn sql(&self) -> String {
        format!(
            "SELECT
    timestamp,
    start_timestamp,
    {agent} AS agent_name,
    {thread} AS thread_id,
    {key} AS correlation_key,
    json_extract(record, '$.name') AS operation,
    {input} AS input_query,
    {output} AS agent_response,
    {planning} AS agent_planning,
    {tool_id} AS tool_id,
    {tool_type} AS tool_type,
    {sql} AS generated_sql,
    json_quote({search}) AS search_results,
    json_quote({custom}) AS custom_tool_result,
    json_extract(value, '$.positive') AS user_feedback,
    json_extract(value, '$.feedback_message') AS user_feedback_message
FROM {table}
WHERE json_extract(scope, '$.name') = '{AGENT_SCOPE}'
  AND json_extract(record, '$.name') != 'Agent'
  AND (?1 IS NULL OR CAST({agent} AS TEXT) = ?1)
  AND (?2 IS NULL OR CAST({thread} AS TEXT) = ?2)
  AND (?3 IS NULL OR CAST({record_id} AS TEXT) = ?3)
ORDER BY thread_id, timestamp, start_timestamp",
            agent = attr(AGENT_NAME),
            thread = attr(THREAD_ID),
            key = attr(self.mode.attribute()),
            record_id = attr(RECORD_ID),
            input = attr(INPUT),
            output = attr(OUTPUT),
            planning = attr(PLANNING),
            tool_id = attr(TOOL_ID),
            tool_type = attr(TOOL_TYPE),
            sql = attr(ANALYST_SQL),
            search = attr(SEARCH_RESULTS),
            custom = attr(CUSTOM_RESULT),
            table = self.table.sql(),
        )
    }
}

impl EventSource for WarehouseSource<'_> {
    fn run_query(&self, filters: &EventFilters) -> Result<Vec<RawEvent>, EvalsetError> {
        let unavailable = |e: rusqlite::Error| {
            EvalsetError::SourceUnavailable(format!("query on {} failed: {e}", self.table))
        };

        let mut stmt = self.conn.prepare(&self.sql()).map_err(unavailable)?;
        let rows: Vec<Option<RawEvent>> = stmt
            .query_map(
                params![filters.agent_name, filters.thread_id, filters.record_id],
                map_event,
            )
            .map_err(unavailable)?
            .collect::<Result<_, _>>()
            .map_err(unavailable)?;

        let total = rows.len();
        let events: Vec<RawEvent> = rows.into_iter().flatten().collect();
        if events.len() < total {
            log::warn!(
                "source: skipped {} events with unparseable timestamps",
                total - events.len()
            );
        }
        log::info!("source: {} events from {}", events.len(), self.table);
        Ok(events)
    }

    fn mode(&self) -> CorrelationMode {
        self.mode
    }
}

/// Query, correlate, then apply the feedback filter.
pub fn load_turns(
    source: &dyn EventSource,
    filters: &EventFilters,
) -> Result<Vec<Turn>, EvalsetError> {
    let events = source.run_query(filters)?;
    let turns = correlate(events, source.mode());
    Ok(filter_by_feedback(turns, filters.feedback))
}

/// Full log-to-dataset pipeline for one filter set.
pub fn load_records(
    source: &dyn EventSource,
    filters: &EventFilters,
) -> Result<Vec<EvaluationRecord>, EvalsetError> {
    let turns = load_turns(source, filters)?;
    Ok(assemble(&turns))
}

/// `None` when the row's timestamp cannot be parsed.
fn map_event(row: &Row<'_>) -> rusqlite::Result<Option<RawEvent>> {
    let Some(timestamp) = text(row, 0)?.as_deref().and_then(parse_ts) else {
        return Ok(None);
    };
    Ok(Some(RawEvent {
        timestamp,
        start_timestamp: text(row, 1)?.as_deref().and_then(parse_ts),
        agent_name: text(row, 2)?,
        thread_id: text(row, 3)?,
        correlation_key: text(row, 4)?,
        operation: text(row, 5)?,
        attributes: EventAttributes {
            input_query: text(row, 6)?,
            agent_response: text(row, 7)?,
            agent_planning: text(row, 8)?,
            tool_id: text(row, 9)?,
            tool_type: text(row, 10)?,
            generated_sql: text(row, 11)?,
            search_results: json(row, 12)?,
            custom_tool_result: json(row, 13)?,
            feedback: feedback(row, 14)?,
            feedback_message: text(row, 15)?,
        },
    }))
}

fn parse_ts(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn text(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<String>> {
    Ok(column_text(row.get_ref(idx)?))
}

/// A `json_quote`d column. Unparseable JSON is kept as a plain string.
fn json(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Value>> {
    Ok(match text(row, idx)? {
        None => None,
        Some(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Null) => None,
            Ok(v) => Some(v),
            Err(_) => Some(Value::String(raw)),
        },
    })
}

/// `positive` may be a JSON boolean (extracted as 0/1) or the strings
/// "true"/"false". Anything else is no feedback.
fn feedback(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<bool>> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Integer(1) => Some(true),
        ValueRef::Integer(0) => Some(false),
        ValueRef::Text(t) => match t.to_ascii_lowercase().as_slice() {
            b"true" => Some(true),
            b"false" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warehouse::{ensure_agents_table, ensure_events_table, ingest};

    fn warehouse(lines: &str) -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        let events = TableName::parse("ai_observability_events").unwrap();
        let agents = TableName::parse("agents").unwrap();
        ensure_events_table(&conn, &events).unwrap();
        ensure_agents_table(&conn, &agents).unwrap();
        ingest(&conn, &events, &agents, lines.as_bytes()).unwrap();
        conn
    }

    fn source(conn: &Connection, mode: CorrelationMode) -> WarehouseSource<'_> {
        WarehouseSource::new(conn, TableName::parse("ai_observability_events").unwrap(), mode)
    }

    const EVENTS: &str = r#"
{"timestamp":"2025-03-01T10:00:00Z","scope":{"name":"snow.cortex.agent"},"record":{"name":"ResponseGeneration"},"record_attributes":{"snow.ai.observability.object.name":"sales","snow.ai.observability.agent.thread_id":42,"ai.observability.record_id":"r1","ai.observability.record_root.input":"\"What were Q1 sales?\""}}
{"timestamp":"2025-03-01T10:00:02Z","scope":{"name":"snow.cortex.agent"},"record":{"name":"CortexSearchService_docs"},"record_attributes":{"snow.ai.observability.object.name":"sales","snow.ai.observability.agent.thread_id":42,"snow.ai.observability.agent.tool.id":"t-9","snow.ai.observability.agent.tool.cortex_search.results":[{"doc":"q1.pdf"}]}}
{"timestamp":"2025-03-01T10:00:03Z","scope":{"name":"snow.cortex.agent"},"record":{"name":"Agent"},"record_attributes":{"snow.ai.observability.object.name":"sales"}}
{"timestamp":"2025-03-01T10:00:04Z","scope":{"name":"other.scope"},"record":{"name":"X"},"record_attributes":{"snow.ai.observability.object.name":"sales"}}
{"timestamp":"2025-03-01T10:00:05Z","scope":{"name":"snow.cortex.agent"},"record":{"name":"Feedback"},"record_attributes":{"snow.ai.observability.object.name":"sales","snow.ai.observability.agent.thread_id":42},"value":{"positive":true,"feedback_message":"great"}}
{"timestamp":"2025-03-01T11:00:00Z","scope":{"name":"snow.cortex.agent"},"record":{"name":"ResponseGeneration"},"record_attributes":{"snow.ai.observability.object.name":"support","snow.ai.observability.agent.thread_id":"7","ai.observability.record_id":"r2"},"value":{"positive":"false"}}
"#;

    #[test]
    fn extracts_attributes_and_drops_out_of_scope_rows() {
        let conn = warehouse(EVENTS);
        let events = source(&conn, CorrelationMode::RecordId)
            .run_query(&EventFilters::default())
            .unwrap();
        assert_eq!(events.len(), 4);

        let first = events
            .iter()
            .find(|e| e.correlation_key.as_deref() == Some("r1"))
            .unwrap();
        assert_eq!(first.agent_name.as_deref(), Some("sales"));
        assert_eq!(first.thread_id.as_deref(), Some("42"));
        assert_eq!(first.attributes.input_query.as_deref(), Some("\"What were Q1 sales?\""));

        let search = events
            .iter()
            .find(|e| e.operation.as_deref() == Some("CortexSearchService_docs"))
            .unwrap();
        assert_eq!(search.attributes.tool_id.as_deref(), Some("t-9"));
        assert_eq!(
            search.attributes.search_results,
            Some(serde_json::json!([{"doc": "q1.pdf"}]))
        );
        assert_eq!(search.correlation_key, None);

        let fb = events
            .iter()
            .find(|e| e.operation.as_deref() == Some("Feedback"))
            .unwrap();
        assert_eq!(fb.attributes.feedback, Some(true));
        assert_eq!(fb.attributes.feedback_message.as_deref(), Some("great"));

        let other = events
            .iter()
            .find(|e| e.correlation_key.as_deref() == Some("r2"))
            .unwrap();
        assert_eq!(other.attributes.feedback, Some(false));
    }

    #[test]
    fn row_level_filters_are_bound() {
        let conn = warehouse(EVENTS);
        let src = source(&conn, CorrelationMode::RecordId);
        let sales = src
            .run_query(&EventFilters {
                agent_name: Some("sales".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(sales.len(), 3);

        let by_record = src
            .run_query(&EventFilters {
                record_id: Some("r2".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_record.len(), 1);

        let numeric_thread = src
            .run_query(&EventFilters {
                thread_id: Some("42".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(numeric_thread.len(), 3);

        let injected = src
            .run_query(&EventFilters {
                agent_name: Some("x' OR '1'='1".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(injected.is_empty());
    }

    #[test]
    fn missing_table_is_source_unavailable() {
        let conn = Connection::open_in_memory().unwrap();
        let err = source(&conn, CorrelationMode::RecordId)
            .run_query(&EventFilters::default())
            .unwrap_err();
        assert!(matches!(err, EvalsetError::SourceUnavailable(_)));
    }

    #[test]
    fn parent_message_mode_reads_other_attribute() {
        let conn = warehouse(
            r#"{"timestamp":"2025-03-01T10:00:00Z","scope":{"name":"snow.cortex.agent"},"record":{"name":"R"},"record_attributes":{"snow.ai.observability.agent.parent_message_id":"m1","ai.observability.record_id":"r1"}}"#,

        );
        let events = source(&conn, CorrelationMode::ParentMessage)
            .run_query(&EventFilters::default())
            .unwrap();
        assert_eq!(events[0].correlation_key.as_deref(), Some("m1"));
    }
}

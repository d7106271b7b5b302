use crate::EvalsetError;
use crate::assemble::{manual_record, number_manual_tools};
use crate::catalog::{WarehouseCatalog, object_name, unknown_tools};
use crate::cli::{AddArgs, EditArgs, IndexArgs, ListArgs, LoadArgs, LoadTableArgs};
use crate::config::EvalsetConfig;
use crate::dataset::{DatasetStore, out_of_range};
use crate::db::{open_session_db, open_warehouse_readonly};
use crate::model::{EvaluationRecord, EventFilters, ExpectedTools};
use crate::sink::load_from_table;
use crate::source::{WarehouseSource, load_records};
use crate::warehouse::TableName;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;

pub const CURRENT_AGENT: &str = "current_agent";

/// Read the persisted dataset in position order.
pub fn load_store(conn: &Connection) -> Result<DatasetStore, EvalsetError> {
    let mut stmt =
        conn.prepare("SELECT input_query, expected_tools FROM dataset_records ORDER BY position")?;
    let rows: Vec<(String, String)> = stmt
        .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?
        .collect::<Result<_, _>>()?;

    let mut records = Vec::with_capacity(rows.len());
    for (input_query, expected_tools) in rows {
        let expected_tools: ExpectedTools = serde_json::from_str(&expected_tools)?;
        records.push(EvaluationRecord {
            input_query,
            expected_tools,
        });
    }
    Ok(DatasetStore::from_records(records))
}

/// Overwrite the persisted dataset with `store`. Either every row lands or
/// none do.
pub fn save_store(conn: &Connection, store: &DatasetStore) -> Result<(), EvalsetError> {
    let tx = conn.unchecked_transaction()?;
    write_records(&tx, store)?;
    tx.commit()?;
    Ok(())
}

fn write_records(conn: &Connection, store: &DatasetStore) -> Result<(), EvalsetError> {
    conn.execute("DELETE FROM dataset_records", [])?;
    let mut insert = conn.prepare(
        "INSERT INTO dataset_records (position, input_query, expected_tools) VALUES (?1, ?2, ?3)",
    )?;
    for (position, record) in store.records().iter().enumerate() {
        let expected = serde_json::to_string(&record.expected_tools)?;
        insert.execute(params![position as i64, record.input_query, expected])?;
    }
    log::debug!("session: saved {} records", store.len());
    Ok(())
}

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<(), EvalsetError> {
    conn.execute(
        "INSERT INTO session_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = unixepoch('now')",
        params![key, value],
    )?;
    Ok(())
}

pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>, EvalsetError> {
    let value = conn
        .query_row(
            "SELECT value FROM session_meta WHERE key = ?1",
            params![key],
            |r| r.get(0),
        )
        .optional()?;
    Ok(value)
}

/// Load, apply `f`, save, all inside one write transaction. `f` failing
/// rolls back and leaves the persisted dataset untouched.
pub fn with_store<T>(
    conn: &Connection,
    f: impl FnOnce(&mut DatasetStore) -> Result<T, EvalsetError>,
) -> Result<T, EvalsetError> {
    let tx = conn.unchecked_transaction()?;
    let mut store = load_store(&tx)?;
    let out = f(&mut store)?;
    write_records(&tx, &store)?;
    tx.commit()?;
    Ok(out)
}

pub fn handle_load(
    config: &EvalsetConfig,
    warehouse_path: &Path,
    session_path: &Path,
    args: &LoadArgs,
) -> Result<(), EvalsetError> {
    let mode = args.correlation.unwrap_or(config.query.mode);
    let records = {
        let conn = open_warehouse_readonly(warehouse_path)?;
        let source = WarehouseSource::new(&conn, config.events_table()?, mode);
        let filters = EventFilters {
            agent_name: Some(object_name(&args.agent).to_string()),
            thread_id: None,
            record_id: args.record_id.clone(),
            feedback: args.feedback,
        };
        load_records(&source, &filters)?
    };

    let conn = open_session_db(session_path)?;
    set_meta(&conn, CURRENT_AGENT, &args.agent)?;
    if records.is_empty() {
        eprintln!("evalset: no records found for agent {}", args.agent);
        return Ok(());
    }

    let loaded = records.len();
    let total = with_store(&conn, |store| {
        store.load(records, args.mode);
        Ok(store.len())
    })?;
    eprintln!(
        "evalset: loaded {loaded} records for agent {} (dataset now {total})",
        args.agent
    );
    Ok(())
}

pub fn handle_load_table(
    warehouse_path: &Path,
    session_path: &Path,
    args: &LoadTableArgs,
) -> Result<(), EvalsetError> {
    let table = TableName::parse(&args.table)?.to_uppercase();
    let records = {
        let conn = open_warehouse_readonly(warehouse_path)?;
        load_from_table(&conn, &table)?
    };
    if records.is_empty() {
        eprintln!("evalset: table {table} contains no records");
        return Ok(());
    }

    let conn = open_session_db(session_path)?;
    let loaded = records.len();
    let total = with_store(&conn, |store| {
        store.load(records, args.mode);
        Ok(store.len())
    })?;
    eprintln!("evalset: loaded {loaded} records from {table} (dataset now {total})");
    Ok(())
}

pub fn handle_add(
    config: &EvalsetConfig,
    warehouse_path: &Path,
    session_path: &Path,
    args: &AddArgs,
) -> Result<(), EvalsetError> {
    let record = manual_record(&args.input, &args.response, &args.tools)?;
    let conn = open_session_db(session_path)?;

    let agent = match &args.agent {
        Some(a) => Some(a.clone()),
        None => get_meta(&conn, CURRENT_AGENT)?,
    };
    if let Some(agent) = agent {
        warn_unknown_tools(config, warehouse_path, &agent, &record);
    }

    let total = with_store(&conn, |store| {
        store.append(vec![record]);
        Ok(store.len())
    })?;
    eprintln!("evalset: added record {total}");
    Ok(())
}

/// Catalog problems never block a manual entry.
fn warn_unknown_tools(
    config: &EvalsetConfig,
    warehouse_path: &Path,
    agent: &str,
    record: &EvaluationRecord,
) {
    let names: Vec<&str> = record
        .expected_tools
        .ground_truth_invocations
        .iter()
        .map(|t| t.tool_name.as_str())
        .collect();
    if names.is_empty() {
        return;
    }
    let check = || -> Result<Vec<String>, EvalsetError> {
        let conn = open_warehouse_readonly(warehouse_path)?;
        let catalog = WarehouseCatalog::new(&conn, config.agents_table()?);
        unknown_tools(&catalog, agent, &names)
    };
    match check() {
        Ok(unknown) => {
            for name in unknown {
                eprintln!("evalset: warning: tool {name:?} is not configured for agent {agent}");
            }
        }
        Err(e) => log::debug!("add: tool catalog unavailable: {e}"),
    }
}

pub fn handle_edit(session_path: &Path, args: &EditArgs) -> Result<(), EvalsetError> {
    let conn = open_session_db(session_path)?;
    let position = args.position();
    with_store(&conn, |store| {
        let current = store
            .get(position)
            .cloned()
            .ok_or_else(|| out_of_range(position, store.len()))?;

        let ground_truth_output = match &args.response {
            Some(r) if r.trim().is_empty() => {
                return Err(EvalsetError::Validation("agent response must not be empty".into()));
            }
            Some(r) => Some(r.trim().to_string()),
            None => current.expected_tools.ground_truth_output,
        };
        let ground_truth_invocations = if args.clear_tools {
            Vec::new()
        } else if !args.tools.is_empty() {
            number_manual_tools(&args.tools)
        } else {
            current.expected_tools.ground_truth_invocations
        };
        let input_query = match &args.input {
            Some(q) => q.trim().to_string(),
            None => current.input_query,
        };

        store.update_at(
            position,
            EvaluationRecord {
                input_query,
                expected_tools: ExpectedTools {
                    ground_truth_invocations,
                    ground_truth_output,
                },
            },
        )
    })?;
    eprintln!("evalset: updated record {}", args.index);
    Ok(())
}

pub fn handle_delete(session_path: &Path, args: &IndexArgs) -> Result<(), EvalsetError> {
    let conn = open_session_db(session_path)?;
    let remaining = with_store(&conn, |store| {
        store.delete_at(args.position())?;
        Ok(store.len())
    })?;
    eprintln!("evalset: deleted record {} ({remaining} remaining)", args.index);
    Ok(())
}

pub fn handle_list(session_path: &Path, args: &ListArgs) -> Result<(), EvalsetError> {
    let conn = open_session_db(session_path)?;
    let store = load_store(&conn)?;
    for (i, record) in store.records().iter().enumerate() {
        if args.json {
            println!("{}", serde_json::to_string(record)?);
        } else {
            let tools: Vec<&str> = record
                .expected_tools
                .ground_truth_invocations
                .iter()
                .map(|t| t.tool_name.as_str())
                .collect();
            println!("{:>4}  {}  [{}]", i + 1, record.input_query, tools.join(", "));
        }
    }
    eprintln!("evalset: {} records", store.len());
    Ok(())
}

pub fn handle_reset(session_path: &Path) -> Result<(), EvalsetError> {
    let conn = open_session_db(session_path)?;
    let cleared = with_store(&conn, |store| {
        let n = store.len();
        store.reset();
        Ok(n)
    })?;
    eprintln!("evalset: cleared {cleared} records");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NormalizedToolCall, ToolOutput};
    use crate::schema::MIGRATIONS;

    fn session() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        MIGRATIONS.to_latest(&mut conn).unwrap();
        conn
    }

    fn record(q: &str) -> EvaluationRecord {
        EvaluationRecord {
            input_query: q.into(),
            expected_tools: ExpectedTools {
                ground_truth_invocations: vec![NormalizedToolCall {
                    tool_sequence: 1,
                    tool_name: "sales_model".into(),
                    tool_output: ToolOutput {
                        sql: Some("SELECT 1".into()),
                        ..Default::default()
                    },
                }],
                ground_truth_output: Some("one".into()),
            },
        }
    }

    #[test]
    fn save_then_load_preserves_order() {
        let conn = session();
        let store = DatasetStore::from_records(vec![record("b"), record("a"), record("c")]);
        save_store(&conn, &store).unwrap();
        assert_eq!(load_store(&conn).unwrap(), store);

        let smaller = DatasetStore::from_records(vec![record("z")]);
        save_store(&conn, &smaller).unwrap();
        assert_eq!(load_store(&conn).unwrap().len(), 1);
    }

    #[test]
    fn failed_edit_leaves_store_untouched() {
        let conn = session();
        save_store(&conn, &DatasetStore::from_records(vec![record("a")])).unwrap();
        let err = with_store(&conn, |store| {
            store.reset();
            store.delete_at(0).map(|_| ())
        });
        assert!(err.is_err());
        assert_eq!(load_store(&conn).unwrap().len(), 1);
    }

    #[test]
    fn store_is_read_and_written_in_one_transaction() {
        let conn = session();
        save_store(&conn, &DatasetStore::from_records(vec![record("a")])).unwrap();
        let seen = with_store(&conn, |store| {
            assert!(!conn.is_autocommit());
            store.append(vec![record("b")]);
            Ok(store.len())
        })
        .unwrap();
        assert_eq!(seen, 2);
        assert!(conn.is_autocommit());
        assert_eq!(load_store(&conn).unwrap().len(), 2);
    }

    #[test]
    fn meta_upserts() {
        let conn = session();
        assert_eq!(get_meta(&conn, "agent").unwrap(), None);
        set_meta(&conn, "agent", "sales").unwrap();
        set_meta(&conn, "agent", "support").unwrap();
        assert_eq!(get_meta(&conn, "agent").unwrap().as_deref(), Some("support"));
    }
}

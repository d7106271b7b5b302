use crate::EvalsetError;
use crate::cli::ExportArgs;
use crate::config::EvalsetConfig;
use crate::db::{open_session_db, open_warehouse};
use crate::model::{EvaluationRecord, ExpectedTools};
use crate::session::load_store;
use crate::warehouse::{TableName, column_text};
use rusqlite::{Connection, params};
use std::io::Write;
use std::path::Path;

pub const INPUT_QUERY_COLUMN: &str = "INPUT_QUERY";
pub const EXPECTED_TOOLS_COLUMN: &str = "EXPECTED_TOOLS";

/// Downstream persistence for a finished dataset. Records are written in
/// the shape they serialize to, with `EXPECTED_TOOLS` as one JSON payload.
pub trait DatasetSink {
    fn append(&mut self, records: &[EvaluationRecord]) -> Result<usize, EvalsetError>;
    fn replace_all(&mut self, records: &[EvaluationRecord]) -> Result<usize, EvalsetError>;
}

/// `INPUT_QUERY TEXT, EXPECTED_TOOLS TEXT` table in the warehouse.
pub struct WarehouseTableSink<'a> {
    conn: &'a Connection,
    table: TableName,
}

impl<'a> WarehouseTableSink<'a> {
    pub fn new(conn: &'a Connection, table: TableName) -> Self {
        Self { conn, table }
    }

    fn ensure_table(&self) -> Result<(), EvalsetError> {
        if let Some(schema) = &self.table.schema {
            let attached: bool = self.conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM pragma_database_list WHERE name = ?1 COLLATE NOCASE)",
                params![schema],
                |r| r.get(0),
            )?;
            if !attached {
                return Err(EvalsetError::Validation(format!(
                    "schema {schema} is not attached to the warehouse"
                )));
            }
        }
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {} ({INPUT_QUERY_COLUMN} TEXT, {EXPECTED_TOOLS_COLUMN} TEXT);",
            self.table.sql()
        ))?;
        let columns = self.table.columns(self.conn)?;
        check_dataset_columns(&self.table, &columns)
    }

    fn write(&self, records: &[EvaluationRecord], overwrite: bool) -> Result<usize, EvalsetError> {
        self.ensure_table()?;
        let tx = self.conn.unchecked_transaction()?;
        if overwrite {
            tx.execute(&format!("DELETE FROM {}", self.table.sql()), [])?;
        }
        {
            let mut insert = tx.prepare(&format!(
                "INSERT INTO {} ({INPUT_QUERY_COLUMN}, {EXPECTED_TOOLS_COLUMN}) VALUES (?1, ?2)",
                self.table.sql()
            ))?;
            for record in records {
                let expected = serde_json::to_string(&record.expected_tools)?;
                insert.execute(params![record.input_query, expected])?;
            }
        }
        tx.commit()?;
        log::info!("sink: wrote {} records to {}", records.len(), self.table);
        Ok(records.len())
    }

    /// Total rows in the table after a write.
    pub fn row_count(&self) -> Result<i64, EvalsetError> {
        let n = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table.sql()),
            [],
            |r| r.get(0),
        )?;
        Ok(n)
    }
}

impl DatasetSink for WarehouseTableSink<'_> {
    fn append(&mut self, records: &[EvaluationRecord]) -> Result<usize, EvalsetError> {
        self.write(records, false)
    }

    fn replace_all(&mut self, records: &[EvaluationRecord]) -> Result<usize, EvalsetError> {
        self.write(records, true)
    }
}

/// CSV with an `INPUT_QUERY,EXPECTED_TOOLS` header; the second column holds
/// JSON. A CSV stream cannot be rewound, so both operations write the full
/// batch after the header.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> CsvSink<W> {
    pub fn new(inner: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(inner),
        }
    }

    pub fn into_inner(self) -> Result<W, EvalsetError> {
        self.writer
            .into_inner()
            .map_err(|e| EvalsetError::Io(e.into_error()))
    }

    fn write(&mut self, records: &[EvaluationRecord]) -> Result<usize, EvalsetError> {
        self.writer
            .write_record([INPUT_QUERY_COLUMN, EXPECTED_TOOLS_COLUMN])?;
        for record in records {
            let expected = serde_json::to_string(&record.expected_tools)?;
            self.writer
                .write_record([record.input_query.as_str(), expected.as_str()])?;
        }
        self.writer.flush()?;
        Ok(records.len())
    }
}

impl<W: Write> DatasetSink for CsvSink<W> {
    fn append(&mut self, records: &[EvaluationRecord]) -> Result<usize, EvalsetError> {
        self.write(records)
    }

    fn replace_all(&mut self, records: &[EvaluationRecord]) -> Result<usize, EvalsetError> {
        self.write(records)
    }
}

fn check_dataset_columns(table: &TableName, columns: &[String]) -> Result<(), EvalsetError> {
    if columns.is_empty() {
        return Err(EvalsetError::SchemaMismatch(format!("table {table} does not exist")));
    }
    for required in [INPUT_QUERY_COLUMN, EXPECTED_TOOLS_COLUMN] {
        if !columns.iter().any(|c| c.eq_ignore_ascii_case(required)) {
            return Err(EvalsetError::SchemaMismatch(format!(
                "table {table} is missing required column {required}"
            )));
        }
    }
    Ok(())
}

/// Read a previously exported dataset back. Rows without an input query are
/// skipped; an `EXPECTED_TOOLS` value that is not the record JSON aborts.
pub fn load_from_table(
    conn: &Connection,
    table: &TableName,
) -> Result<Vec<EvaluationRecord>, EvalsetError> {
    check_dataset_columns(table, &table.columns(conn)?)?;

    let mut stmt = conn.prepare(&format!(
        "SELECT {INPUT_QUERY_COLUMN}, {EXPECTED_TOOLS_COLUMN} FROM {}",
        table.sql()
    ))?;
    let rows: Vec<(Option<String>, Option<String>)> = stmt
        .query_map([], |r| Ok((column_text(r.get_ref(0)?), column_text(r.get_ref(1)?))))?
        .collect::<Result<_, _>>()?;

    let mut records = Vec::with_capacity(rows.len());
    let mut skipped = 0usize;
    for (i, (input_query, expected)) in rows.into_iter().enumerate() {
        let input_query = match input_query {
            Some(q) if !q.trim().is_empty() => q.trim().to_string(),
            _ => {
                skipped += 1;
                continue;
            }
        };
        let expected_tools = match expected {
            None => ExpectedTools::default(),
            Some(raw) => serde_json::from_str::<ExpectedTools>(&raw).map_err(|e| {
                EvalsetError::SchemaMismatch(format!(
                    "{table} row {}: {EXPECTED_TOOLS_COLUMN} is not a valid record payload: {e}",
                    i + 1
                ))
            })?,
        };
        records.push(EvaluationRecord {
            input_query,
            expected_tools,
        });
    }
    if skipped > 0 {
        log::warn!("load-table: skipped {skipped} rows from {table} without {INPUT_QUERY_COLUMN}");
    }
    Ok(records)
}

/// Write the session dataset out. With neither `--table` nor `--csv` the
/// configured default table is used.
pub fn handle_export(
    config: &EvalsetConfig,
    warehouse_path: &Path,
    session_path: &Path,
    args: &ExportArgs,
) -> Result<(), EvalsetError> {
    let store = {
        let conn = open_session_db(session_path)?;
        load_store(&conn)?
    };
    if store.is_empty() {
        return Err(EvalsetError::Validation("dataset is empty, nothing to export".into()));
    }

    let table = match (&args.table, &args.csv) {
        (Some(raw), _) => Some(TableName::parse(raw)?.to_uppercase()),
        (None, None) => Some(config.export_table()?),
        (None, Some(_)) => None,
    };

    if let Some(path) = &args.csv {
        let mut sink = CsvSink::new(std::fs::File::create(path)?);
        let n = sink.replace_all(store.records())?;
        eprintln!("evalset: wrote {n} records to {}", path.display());
    }

    if let Some(table) = table {
        let conn = open_warehouse(warehouse_path)?;
        let mut sink = WarehouseTableSink::new(&conn, table.clone());
        let n = if args.overwrite {
            sink.replace_all(store.records())?
        } else {
            sink.append(store.records())?
        };
        eprintln!(
            "evalset: saved {n} records to {table} (total in table: {})",
            sink.row_count()?
        );
    }
    Ok(())
}

use crate::EvalsetError;
use crate::cli::ToolsArgs;
use crate::config::EvalsetConfig;
use crate::db::open_warehouse_readonly;
use crate::warehouse::TableName;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Deserialize;
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRef {
    pub database_name: String,
    pub schema_name: String,
    pub name: String,
}

impl AgentRef {
    pub fn fully_qualified_name(&self) -> String {
        format!("{}.{}.{}", self.database_name, self.schema_name, self.name)
    }
}

/// The object name events are tagged with. `DATABASE.SCHEMA.NAME` resolves
/// to `NAME`; anything else is already a bare name.
pub fn object_name(agent: &str) -> &str {
    match agent.splitn(3, '.').collect::<Vec<_>>()[..] {
        [_, _, name] if !name.is_empty() => name,
        _ => agent,
    }
}

/// Agents registered in the warehouse, ordered by fully qualified name.
/// A missing agents table yields an empty list.
pub fn list_agents(conn: &Connection, table: &TableName) -> Result<Vec<AgentRef>, EvalsetError> {
    if !table.exists(conn)? {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT database_name, schema_name, name FROM {}
         ORDER BY database_name, schema_name, name",
        table.sql()
    ))?;
    let agents = stmt
        .query_map([], |r| {
            Ok(AgentRef {
                database_name: r.get(0)?,
                schema_name: r.get(1)?,
                name: r.get(2)?,
            })
        })?
        .collect::<Result<_, _>>()?;
    Ok(agents)
}

/// Source of the tool names an agent is configured with.
pub trait ToolCatalog {
    /// `Ok(None)` when the agent or its definition is unknown, so callers
    /// can skip catalog checks.
    fn list_tool_names(&self, agent: &str) -> Result<Option<Vec<String>>, EvalsetError>;
}

#[derive(Deserialize)]
struct AgentSpec {
    #[serde(default)]
    tools: Vec<ToolEntry>,
}

#[derive(Deserialize)]
struct ToolEntry {
    tool_spec: Option<ToolSpec>,
}

#[derive(Deserialize)]
struct ToolSpec {
    name: Option<String>,
}

/// Tool names from an `agent_spec` document. The spec may arrive as a JSON
/// object or as a string holding one.
pub fn parse_tool_names(agent_spec: &str) -> Result<Vec<String>, EvalsetError> {
    let mut value: Value = serde_json::from_str(agent_spec)?;
    if let Value::String(inner) = &value {
        value = serde_json::from_str(inner)?;
    }
    let spec: AgentSpec = serde_json::from_value(value)?;
    Ok(spec
        .tools
        .into_iter()
        .filter_map(|t| t.tool_spec.and_then(|s| s.name))
        .collect())
}

/// Catalog backed by the warehouse agents table.
pub struct WarehouseCatalog<'a> {
    conn: &'a Connection,
    table: TableName,
}

impl<'a> WarehouseCatalog<'a> {
    pub fn new(conn: &'a Connection, table: TableName) -> Self {
        Self { conn, table }
    }
}

impl ToolCatalog for WarehouseCatalog<'_> {
    /// `agent` is either a bare name or `DATABASE.SCHEMA.NAME`.
    fn list_tool_names(&self, agent: &str) -> Result<Option<Vec<String>>, EvalsetError> {
        if !self.table.exists(self.conn)? {
            return Ok(None);
        }
        let spec: Option<Option<String>> = self
            .conn
            .query_row(
                &format!(
                    "SELECT agent_spec FROM {}
                     WHERE name = ?1 OR database_name || '.' || schema_name || '.' || name = ?1
                     ORDER BY database_name, schema_name
                     LIMIT 1",
                    self.table.sql()
                ),
                params![agent],
                |r| r.get(0),
            )
            .optional()?;
        match spec.flatten() {
            Some(raw) => parse_tool_names(&raw).map(Some),
            None => Ok(None),
        }
    }
}

/// Names in `requested` that the catalog does not know. Empty when no
/// catalog is available for the agent.
pub fn unknown_tools(
    catalog: &dyn ToolCatalog,
    agent: &str,
    requested: &[&str],
) -> Result<Vec<String>, EvalsetError> {
    let Some(known) = catalog.list_tool_names(agent)? else {
        log::debug!("catalog: no tool catalog for {agent}");
        return Ok(Vec::new());
    };
    Ok(requested
        .iter()
        .filter(|name| !known.iter().any(|k| k == *name))
        .map(|name| name.to_string())
        .collect())
}

pub fn handle_agents(config: &EvalsetConfig, warehouse_path: &Path) -> Result<(), EvalsetError> {
    let conn = open_warehouse_readonly(warehouse_path)?;
    let agents = list_agents(&conn, &config.agents_table()?)?;
    for agent in &agents {
        println!("{}", agent.fully_qualified_name());
    }
    eprintln!("evalset: {} agents", agents.len());
    Ok(())
}

pub fn handle_tools(
    config: &EvalsetConfig,
    warehouse_path: &Path,
    args: &ToolsArgs,
) -> Result<(), EvalsetError> {
    let conn = open_warehouse_readonly(warehouse_path)?;
    let catalog = WarehouseCatalog::new(&conn, config.agents_table()?);
    match catalog.list_tool_names(&args.agent)? {
        Some(names) => {
            for name in &names {
                println!("{name}");
            }
            eprintln!("evalset: {} tools for {}", names.len(), args.agent);
        }
        None => eprintln!("evalset: no tool catalog for agent {}", args.agent),
    }
    Ok(())
}

use crate::assemble::ManualTool;
use crate::dataset::LoadMode;
use crate::model::{CorrelationMode, FeedbackClass};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "evalset",
    version,
    about = "Build agent evaluation datasets from observability event logs"
)]
pub struct Cli {
    /// Warehouse database path (overrides [warehouse] path in config)
    #[arg(long, env = "EVALSET_WAREHOUSE", global = true)]
    pub warehouse: Option<PathBuf>,

    /// Session database holding the working dataset
    #[arg(long, env = "EVALSET_SESSION", global = true)]
    pub session: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Ingest observability events and agent definitions (JSON lines) from stdin
    Record,
    /// Show correlated turns from the event log
    Query(QueryArgs),
    /// Build records from an agent's event log and add them to the dataset
    Load(LoadArgs),
    /// Load a previously exported dataset from a warehouse table
    LoadTable(LoadTableArgs),
    /// Add a record by hand
    Add(AddArgs),
    /// Replace fields of an existing record
    Edit(EditArgs),
    /// Remove a record
    Delete(IndexArgs),
    /// Print the working dataset
    List(ListArgs),
    /// Clear the working dataset
    Reset,
    /// Write the dataset to a warehouse table and/or a CSV file
    Export(ExportArgs),
    /// List agents registered in the warehouse
    Agents,
    /// List the tools an agent is configured with
    Tools(ToolsArgs),
    /// Show dataset size and warehouse health
    Status,
}

#[derive(Parser)]
pub struct QueryArgs {
    /// Filter by agent name
    #[arg(long)]
    pub agent: Option<String>,

    /// Filter by thread ID
    #[arg(long)]
    pub thread: Option<String>,

    /// Filter by record ID
    #[arg(long)]
    pub record_id: Option<String>,

    /// Keep turns with feedback: positive, negative, any
    #[arg(long)]
    pub feedback: Option<FeedbackClass>,

    /// Group events by record_id or parent_message (default from config)
    #[arg(long)]
    pub mode: Option<CorrelationMode>,

    /// Write turns to a CSV file instead of stdout
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Write turns to a warehouse table ([SCHEMA.]TABLE)
    #[arg(long)]
    pub table: Option<String>,

    /// Used with --table: replace existing rows
    #[arg(long, requires = "table")]
    pub overwrite: bool,

    /// Print the generated row query and exit
    #[arg(long)]
    pub show_sql: bool,
}

#[derive(Parser)]
pub struct LoadArgs {
    /// Agent whose events to load
    #[arg(long)]
    pub agent: String,

    /// Only this record ID
    #[arg(long)]
    pub record_id: Option<String>,

    /// Keep turns with feedback: positive, negative, any
    #[arg(long)]
    pub feedback: Option<FeedbackClass>,

    /// append or replace (an empty dataset is always replaced)
    #[arg(long, default_value = "append")]
    pub mode: LoadMode,

    /// Group events by record_id or parent_message (default from config)
    #[arg(long)]
    pub correlation: Option<CorrelationMode>,
}

#[derive(Parser)]
pub struct LoadTableArgs {
    /// Source table ([SCHEMA.]TABLE) with INPUT_QUERY and EXPECTED_TOOLS columns
    pub table: String,

    /// append or replace (an empty dataset is always replaced)
    #[arg(long, default_value = "append")]
    pub mode: LoadMode,
}

#[derive(Parser)]
pub struct AddArgs {
    /// The question posed to the agent
    #[arg(long)]
    pub input: String,

    /// The expected final answer
    #[arg(long)]
    pub response: String,

    /// Expected tool call as KIND:NAME=OUTPUT, KIND one of sql, search, custom (repeatable)
    #[arg(long = "tool")]
    pub tools: Vec<ManualTool>,

    /// Check tool names against this agent's catalog (default: last loaded agent)
    #[arg(long)]
    pub agent: Option<String>,
}

#[derive(Parser)]
pub struct EditArgs {
    /// Record number as shown by `evalset list`
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub index: u64,

    /// New input query
    #[arg(long)]
    pub input: Option<String>,

    /// New expected answer
    #[arg(long)]
    pub response: Option<String>,

    /// Replacement tool calls as KIND:NAME=OUTPUT (repeatable)
    #[arg(long = "tool")]
    pub tools: Vec<ManualTool>,

    /// Remove all expected tool calls
    #[arg(long, conflicts_with = "tools")]
    pub clear_tools: bool,
}

#[derive(Parser)]
pub struct IndexArgs {
    /// Record number as shown by `evalset list`
    #[arg(value_parser = clap::value_parser!(u64).range(1..))]
    pub index: u64,
}

#[derive(Parser)]
pub struct ListArgs {
    /// Print full records as JSON lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct ExportArgs {
    /// Target table ([SCHEMA.]TABLE, upper-cased; default from config)
    #[arg(long)]
    pub table: Option<String>,

    /// Also (or only, without --table) write a CSV file
    #[arg(long)]
    pub csv: Option<PathBuf>,

    /// Replace existing rows in the target table instead of appending
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Parser)]
pub struct ToolsArgs {
    /// Agent name or DATABASE.SCHEMA.NAME
    pub agent: String,
}

impl EditArgs {
    pub fn position(&self) -> usize {
        self.index as usize - 1
    }
}

impl IndexArgs {
    pub fn position(&self) -> usize {
        self.index as usize - 1
    }
}

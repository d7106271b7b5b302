use crate::EvalsetError;
use crate::model::CorrelationMode;
use crate::warehouse::TableName;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default)]
pub struct EvalsetConfig {
    #[serde(default)]
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub query: QueryConfig,
}

#[derive(Debug, Deserialize)]
pub struct WarehouseConfig {
    pub path: Option<PathBuf>,
    #[serde(default = "default_events_table")]
    pub events_table: String,
    #[serde(default = "default_agents_table")]
    pub agents_table: String,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: None,
            events_table: default_events_table(),
            agents_table: default_agents_table(),
        }
    }
}

fn default_events_table() -> String {
    "ai_observability_events".into()
}

fn default_agents_table() -> String {
    "agents".into()
}

#[derive(Debug, Deserialize)]
pub struct ExportConfig {
    #[serde(default = "default_export_table")]
    pub default_table: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_table: default_export_table(),
        }
    }
}

fn default_export_table() -> String {
    "EVAL_DATASET".into()
}

#[derive(Debug, Deserialize, Default)]
pub struct QueryConfig {
    #[serde(default)]
    pub mode: CorrelationMode,
}

impl EvalsetConfig {
    pub fn events_table(&self) -> Result<TableName, EvalsetError> {
        TableName::parse(&self.warehouse.events_table)
    }

    pub fn agents_table(&self) -> Result<TableName, EvalsetError> {
        TableName::parse(&self.warehouse.agents_table)
    }

    pub fn export_table(&self) -> Result<TableName, EvalsetError> {
        Ok(TableName::parse(&self.export.default_table)?.to_uppercase())
    }
}

/// Load config from EVALSET_CONFIG env var, ~/.evalset/config.toml, or defaults.
pub fn load_config() -> Result<EvalsetConfig, EvalsetError> {
    match config_path() {
        Some(p) if p.exists() => load_config_from(&p),
        _ => Ok(EvalsetConfig::default()),
    }
}

pub fn load_config_from(path: &Path) -> Result<EvalsetConfig, EvalsetError> {
    let content = std::fs::read_to_string(path)?;
    let config: EvalsetConfig = toml::from_str(&content)
        .map_err(|e| EvalsetError::Config(format!("{}: {e}", path.display())))?;
    validate_config(&config)
        .map_err(|e| EvalsetError::Config(format!("{}: {e}", path.display())))?;
    Ok(config)
}

fn config_path() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("EVALSET_CONFIG") {
        return Some(PathBuf::from(p));
    }
    let home = std::env::var("HOME").ok()?;
    Some(Path::new(&home).join(".evalset").join("config.toml"))
}

fn validate_config(config: &EvalsetConfig) -> Result<(), EvalsetError> {
    config.events_table()?;
    config.agents_table()?;
    config.export_table()?;
    Ok(())
}

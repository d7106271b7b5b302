use clap::Parser;
use evalset::cli::{Cli, Command};
use evalset::config::load_config;
use evalset::{EvalsetError, catalog, query, session, sink, status, warehouse};
use std::path::PathBuf;
use std::process::ExitCode;

fn evalset_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".evalset")
}

fn run() -> Result<(), EvalsetError> {
    let cli = Cli::parse();
    let config = load_config()?;
    let warehouse_path = cli
        .warehouse
        .or_else(|| config.warehouse.path.clone())
        .unwrap_or_else(|| evalset_dir().join("warehouse.db"));
    let session_path = cli
        .session
        .unwrap_or_else(|| evalset_dir().join("session.db"));
    log::debug!(
        "warehouse {}, session {}",
        warehouse_path.display(),
        session_path.display()
    );

    match cli.command {
        Command::Record => warehouse::handle_record(
            &warehouse_path,
            &config.events_table()?,
            &config.agents_table()?,
        ),
        Command::Query(args) => query::handle_query(&config, &warehouse_path, &args),
        Command::Load(args) => session::handle_load(&config, &warehouse_path, &session_path, &args),
        Command::LoadTable(args) => session::handle_load_table(&warehouse_path, &session_path, &args),
        Command::Add(args) => session::handle_add(&config, &warehouse_path, &session_path, &args),
        Command::Edit(args) => session::handle_edit(&session_path, &args),
        Command::Delete(args) => session::handle_delete(&session_path, &args),
        Command::List(args) => session::handle_list(&session_path, &args),
        Command::Reset => session::handle_reset(&session_path),
        Command::Export(args) => sink::handle_export(&config, &warehouse_path, &session_path, &args),
        Command::Agents => catalog::handle_agents(&config, &warehouse_path),
        Command::Tools(args) => catalog::handle_tools(&config, &warehouse_path, &args),
        Command::Status => status::handle_status(&config, &warehouse_path, &session_path),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("evalset: {e}");
            ExitCode::from(1)
        }
    }
}

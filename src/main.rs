//! gitdb-ws - inspect the diff, workspace and branch-control tables of a
//! GitDB database from the command line.

use std::path::PathBuf;
use std::process::ExitCode;

use serde_json::Value;
use tracing_subscriber::EnvFilter;

use gitdb_workspace::context::Context;
use gitdb_workspace::db::{Database, DatabaseConfig, SystemTable};
use gitdb_workspace::dtables::{
    BRANCH_CONTROL_TABLE, BRANCH_NAMESPACE_TABLE, DIFF_TABLE_PREFIX, WORKSPACE_TABLE_PREFIX,
};

enum Command {
    Diff(String),
    Workspace(String),
    BranchControl,
    BranchNamespaceControl,
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    // Parse simple command line args.
    let mut path = PathBuf::from(".gitdb");
    let mut verbose = false;
    let mut branch_control: Option<PathBuf> = None;
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-d" | "--database" => {
                i += 1;
                if i < args.len() {
                    path = PathBuf::from(&args[i]);
                }
            }
            "--branch-control-file" => {
                i += 1;
                if i < args.len() {
                    branch_control = Some(PathBuf::from(&args[i]));
                }
            }
            "-v" | "--verbose" => {
                verbose = true;
            }
            "-h" | "--help" => {
                print_help();
                return ExitCode::SUCCESS;
            }
            "--version" => {
                println!("gitdb-ws v{}", env!("CARGO_PKG_VERSION"));
                return ExitCode::SUCCESS;
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown option: {}", arg);
                return ExitCode::FAILURE;
            }
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    init_logging(verbose);

    let command = match parse_command(&positional) {
        Some(command) => command,
        None => {
            print_help();
            return ExitCode::FAILURE;
        }
    };

    let mut config = DatabaseConfig::new(&path).create_if_missing(false).verbose(verbose);
    if let Some(file) = branch_control {
        config = config.branch_control_path(file);
    }

    let db = match Database::open_with_config(config) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Error opening database: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&db, command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .try_init();
}

fn parse_command(args: &[String]) -> Option<Command> {
    match args {
        [cmd, table] if cmd == "diff" => Some(Command::Diff(table.clone())),
        [cmd, table] if cmd == "workspace" => Some(Command::Workspace(table.clone())),
        [cmd] if cmd == "branch-control" => Some(Command::BranchControl),
        [cmd] if cmd == "branch-namespace-control" => Some(Command::BranchNamespaceControl),
        _ => None,
    }
}

fn print_help() {
    println!("gitdb-ws - inspect GitDB system tables");
    println!();
    println!("Usage: gitdb-ws [OPTIONS] <COMMAND>");
    println!();
    println!("Commands:");
    println!("  diff <TABLE>          Every change to TABLE, commit by commit");
    println!("  workspace <TABLE>     Staged and unstaged changes to TABLE");
    println!("  branch-control        Branch access rules");
    println!("  branch-namespace-control");
    println!("                        Who may create branches under which names");
    println!();
    println!("Options:");
    println!("  -d, --database PATH           Path to database directory (default: .gitdb)");
    println!("  --branch-control-file PATH    File holding branch access rules");
    println!("  -v, --verbose                 Enable debug logging (RUST_LOG overrides)");
    println!("  -h, --help                    Show this help message");
    println!("  --version                     Show version");
}

fn run(db: &Database, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    let name = match command {
        Command::Diff(table) => format!("{}{}", DIFF_TABLE_PREFIX, table),
        Command::Workspace(table) => format!("{}{}", WORKSPACE_TABLE_PREFIX, table),
        Command::BranchControl => BRANCH_CONTROL_TABLE.to_string(),
        Command::BranchNamespaceControl => BRANCH_NAMESPACE_TABLE.to_string(),
    };
    let table = db.system_table(&name)?;
    print_table(&table, &Context::background())
}

fn print_table(table: &SystemTable, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let rows = table.scan(ctx)?;
    println!("{}", table.schema());
    for row in &rows {
        let values: Vec<String> = row.iter().map(format_value).collect();
        println!("{}", values.join("\t"));
    }
    println!("({} rows)", rows.len());
    Ok(())
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        _ => value.to_string(),
    }
}

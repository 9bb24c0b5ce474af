//! querymind CLI.
//!
//! This binary is a thin operational front-end over the library: it loads
//! settings, resolves a connection, and (once the orchestrator pipeline is
//! wired up) submits natural-language questions against it. For now it
//! exposes the pieces already in place: config loading and dialect
//! inspection, useful for validating a deployment's settings file.
//!
//! Usage:
//!   querymind config check <settings.toml>
//!   querymind dialect show <dialect>

use clap::{Parser, Subcommand, ValueEnum};
use querymind::config::Settings;
use querymind::sql::Dialect;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "querymind")]
#[command(about = "NL-to-SQL query orchestration pipeline over a governed semantic layer")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Config-related operations.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Dialect inspection, useful for checking what a given dialect supports.
    Dialect {
        #[command(subcommand)]
        command: DialectCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Load and validate a settings file.
    Check {
        /// Path to the TOML settings file.
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum DialectCommands {
    /// Print the feature flags for a dialect.
    Show {
        #[arg(value_enum)]
        dialect: DialectArg,
    },
}

#[derive(Clone, ValueEnum)]
enum DialectArg {
    Postgres,
    Mysql,
    Tsql,
    Oracle,
    Snowflake,
    Bigquery,
}

impl From<DialectArg> for Dialect {
    fn from(arg: DialectArg) -> Self {
        match arg {
            DialectArg::Postgres => Dialect::Postgres,
            DialectArg::Mysql => Dialect::MySql,
            DialectArg::Tsql => Dialect::TSql,
            DialectArg::Oracle => Dialect::Oracle,
            DialectArg::Snowflake => Dialect::Snowflake,
            DialectArg::Bigquery => Dialect::BigQuery,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Config { command } => match command {
            ConfigCommands::Check { file } => cmd_config_check(file),
        },
        Commands::Dialect { command } => match command {
            DialectCommands::Show { dialect } => cmd_dialect_show(dialect.into()),
        },
    }
}

fn cmd_config_check(file: PathBuf) -> ExitCode {
    match Settings::from_file(&file) {
        Ok(settings) => {
            println!("OK: {} is valid", file.display());
            println!("  connections: {}", settings.connections.len());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Invalid settings file '{}': {}", file.display(), e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_dialect_show(dialect: Dialect) -> ExitCode {
    use querymind::sql::dialect::SqlDialect;

    println!("dialect: {}", dialect);
    println!("  supports_merge: {}", dialect.supports_merge());
    println!("  supports_returning: {}", dialect.supports_returning());
    println!(
        "  supports_nulls_ordering: {}",
        dialect.supports_nulls_ordering()
    );
    println!(
        "  supports_native_pivot: {}",
        dialect.supports_native_pivot()
    );
    println!(
        "  requires_order_by_for_offset: {}",
        dialect.requires_order_by_for_offset()
    );
    ExitCode::SUCCESS
}

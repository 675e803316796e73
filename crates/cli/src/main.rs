mod commands;
mod logging;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use commands::{CliError, MigrationArgs};
use devroach::DevroachConfig;
use logging::{LogFormat, LoggingConfig};

#[derive(Debug, Parser)]
#[command(name = "devroach")]
#[command(version, about = "Disposable CockroachDB for local development, migrated on start")]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start or reuse the dev database and keep it until Ctrl+C (default)
    Up {
        #[command(flatten)]
        migrations: MigrationArgs,
    },

    /// Apply migrations to a running database
    Migrate {
        /// Connection URL of the target database
        #[arg(long)]
        url: String,

        #[command(flatten)]
        migrations: MigrationArgs,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    logging::init_logging(&LoggingConfig {
        level: cli.log_level,
        format: cli.log_format,
    })
    .map_err(|e| CliError::Logging(e.to_string()))?;

    let config = DevroachConfig::from_env()?;

    match cli.command {
        None => commands::up::run(&MigrationArgs::default(), &config).await,
        Some(Commands::Up { migrations }) => commands::up::run(&migrations, &config).await,
        Some(Commands::Migrate { url, migrations }) => commands::migrate::run(&url, &migrations, &config).await,
    }
}

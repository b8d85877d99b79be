mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use upshift_config::ConfigLoader;

#[derive(Parser)]
#[command(name = "upshift", version, about = "Reversible schema migrations for SQLite")]
struct Cli {
    /// Path to upshift.yml / upshift.toml (default: search CWD, then user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the database path from config
    #[arg(long, global = true, env = "UPSHIFT_DATABASE")]
    database: Option<PathBuf>,

    /// Override the migrations directory from config
    #[arg(long, global = true, env = "UPSHIFT_MIGRATIONS_DIR")]
    migrations: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations (all, or up to --to <id>)
    Up {
        /// Stop after this migration id (inclusive)
        #[arg(long)]
        to: Option<u64>,
    },
    /// Revert the most recently applied migrations
    Down {
        /// How many migrations to revert
        #[arg(long, default_value_t = 1)]
        count: usize,
    },
    /// Show applied/pending state of every known migration
    Status,
    /// Scaffold a new up/down migration pair
    New {
        /// Snake_case migration name, e.g. add_widgets_table
        name: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let result = run(&cli);
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let mut config = ConfigLoader::load(cli.config.as_deref())?;
    if let Some(database) = &cli.database {
        config.database.path = database.clone();
    }
    if let Some(migrations) = &cli.migrations {
        config.migrations.dir = migrations.clone();
    }
    tracing::debug!(
        "database: {}, migrations: {}",
        config.database.path.display(),
        config.migrations.dir.display()
    );

    match &cli.command {
        Commands::Up { to } => commands::up(&config, *to)?,
        Commands::Down { count } => commands::down(&config, *count)?,
        Commands::Status => commands::status(&config)?,
        Commands::New { name } => commands::new(&config, name)?,
    }

    Ok(())
}

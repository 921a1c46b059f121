mod output;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use migrator_core::config::{CliOverrides, Settings};
use migrator_core::discovery::{self, Discovery};
use migrator_core::error::MigratorError;
use migrator_core::manifest::ManifestFormat;
use migrator_core::{Direction, GenerateOptions, InfraConfig, Migrator, PostgresEngine};

#[derive(Parser)]
#[command(
    name = "encore-migrate",
    about = "Run database migrations for Encore.dev applications",
    version = concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_HASH"), " ", env!("BUILD_TIME"), ")"
    )
)]
struct Cli {
    /// Infrastructure config JSON file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Encore application root (default: .)
    #[arg(short, long, value_name = "PATH")]
    app: Option<PathBuf>,

    /// Manifest file instead of scanning sources ("auto" to search default locations)
    #[arg(short, long, value_name = "PATH")]
    manifest: Option<String>,

    /// Override database host, e.g. tailnet-db:5432
    #[arg(long, value_name = "HOST[:PORT]")]
    host: Option<String>,

    /// Override database username
    #[arg(short, long, value_name = "USER")]
    user: Option<String>,

    /// Override database password
    #[arg(short, long, value_name = "PASSWORD")]
    password: Option<String>,

    /// Number of retries when connecting to a database (max 20)
    #[arg(long, value_name = "N")]
    connect_retries: Option<u32>,

    /// Connection timeout in seconds (default: 30, 0 = no timeout)
    #[arg(long, value_name = "SECS")]
    connect_timeout: Option<u32>,

    /// Output results as JSON
    #[arg(long)]
    json: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Enable verbose/debug output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations
    Up {
        /// Only this database (default: all)
        #[arg(short, long, value_name = "NAME")]
        database: Option<String>,

        /// Number of migrations to apply (default: all pending)
        #[arg(long, value_name = "N", default_value_t = 0)]
        steps: i64,
    },

    /// Roll back migrations
    Down {
        /// Only this database (default: all)
        #[arg(short, long, value_name = "NAME")]
        database: Option<String>,

        /// Number of migrations to roll back
        #[arg(long, value_name = "N", default_value_t = 1)]
        steps: i64,

        /// Roll back every migration
        #[arg(long, conflicts_with = "steps")]
        all: bool,
    },

    /// Show migration status for all databases
    Status {
        /// Only this database (default: all)
        #[arg(short, long, value_name = "NAME")]
        database: Option<String>,
    },

    /// List discovered databases
    List,

    /// Set the migration version without running migrations (dirty-state recovery)
    Force {
        /// Database to force
        #[arg(short, long, value_name = "NAME")]
        database: String,

        /// Version to record; -1 clears it
        #[arg(long, value_name = "V", allow_negative_numbers = true)]
        version: i64,
    },

    /// Write a manifest from the databases found in the application sources
    Generate {
        /// Manifest path (default: print to stdout)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Copy each migrations directory into <DIR>/<database>
        #[arg(long, value_name = "DIR")]
        copy_to: Option<PathBuf>,

        /// yaml or json (default: from the output extension)
        #[arg(long, value_name = "FORMAT")]
        format: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Set up logging (suppress when JSON output is requested)
    let filter = if cli.json {
        "error"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        print_error(&e);
        process::exit(exit_code(&e));
    }
}

/// Map error types to differentiated exit codes.
fn exit_code(error: &MigratorError) -> i32 {
    match error {
        MigratorError::ConfigError(_)
        | MigratorError::ConfigNotFound { .. }
        | MigratorError::SecretUnresolved { .. } => 2,
        MigratorError::ManifestError(_)
        | MigratorError::MissingMigrationsDir { .. }
        | MigratorError::WalkError(_)
        | MigratorError::DatabaseNotFound(_)
        | MigratorError::NoDatabases => 3,
        MigratorError::DatabaseError(_) | MigratorError::ConnectTimeout(_) => 4,
        MigratorError::MigrationParseError(_)
        | MigratorError::MissingMigration { .. }
        | MigratorError::DirtyState { .. }
        | MigratorError::MigrationFailed { .. }
        | MigratorError::AggregateFailure { .. } => 5,
        MigratorError::LockError(_) => 6,
        MigratorError::IoError(_) => 1,
    }
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<(), MigratorError> {
    let json = serde_json::to_string_pretty(value).map_err(std::io::Error::from)?;
    println!("{}", json);
    Ok(())
}

fn discover(settings: &Settings) -> Result<Discovery, MigratorError> {
    let manifest = settings.manifest_path()?;
    discovery::discover(&settings.app_root, manifest.as_deref())
}

async fn run(cli: Cli) -> Result<(), MigratorError> {
    let json_output = cli.json;

    let overrides = CliOverrides {
        config: cli.config,
        app: cli.app,
        manifest: cli.manifest,
        host: cli.host,
        user: cli.user,
        password: cli.password,
        connect_retries: cli.connect_retries,
        connect_timeout: cli.connect_timeout,
    };
    let settings = Settings::load(&overrides);

    match cli.command {
        Commands::List => {
            let discovery = discover(&settings)?;
            if json_output {
                print_json(&discovery)?;
            } else {
                output::print_database_list(&discovery.databases);
            }
            return Ok(());
        }
        Commands::Generate {
            output,
            copy_to,
            format,
        } => {
            let format = format.map(|f| f.parse::<ManifestFormat>()).transpose()?;
            let app_root = std::path::absolute(&settings.app_root)?;
            // Generation always reads the sources; a manifest is what it produces.
            let discovery = discovery::discover(&app_root, None)?;
            let report = migrator_core::commands::generate::execute(
                &discovery.databases,
                &GenerateOptions {
                    app_root,
                    output,
                    copy_to,
                    format,
                },
            )?;
            if json_output {
                print_json(&report)?;
            } else {
                output::print_generate_result(&report);
            }
            return Ok(());
        }
        _ => {}
    }

    let infra = InfraConfig::load(settings.require_config_path()?)?;
    let discovery = discover(&settings)?;

    for name in infra.database_names() {
        if !discovery.databases.iter().any(|db| db.name == name) {
            tracing::debug!(database = %name, "Configured database was not discovered");
        }
    }

    let engine = PostgresEngine::new(settings.connect_retries, settings.connect_timeout_secs);
    let migrator = Migrator::new(infra, engine, settings.overrides.clone());
    let databases = &discovery.databases;

    match cli.command {
        Commands::Up { database, steps } => {
            let report = migrator
                .migrate(databases, database.as_deref(), Direction::Up, steps)
                .await?;
            if json_output {
                print_json(&report)?;
            } else {
                output::print_migrate_summary(&report);
            }
            report.ensure_success()?;
        }
        Commands::Down {
            database,
            steps,
            all,
        } => {
            let steps = if all { 0 } else { steps };
            if steps <= 0 && !all {
                return Err(MigratorError::ConfigError(
                    "--steps must be positive; use --all to roll back everything".to_string(),
                ));
            }
            let report = migrator
                .migrate(databases, database.as_deref(), Direction::Down, steps)
                .await?;
            if json_output {
                print_json(&report)?;
            } else {
                output::print_migrate_summary(&report);
            }
            report.ensure_success()?;
        }
        Commands::Status { database } => {
            let rows = migrator.status(databases, database.as_deref()).await?;
            if json_output {
                print_json(&rows)?;
            } else {
                output::print_status_table(&rows);
            }
        }
        Commands::Force { database, version } => {
            migrator.force(databases, &database, version).await?;
            if json_output {
                print_json(&serde_json::json!({"success": true, "database": database, "version": version}))?;
            } else {
                println!(
                    "{}",
                    format!("Forced '{}' to version {}.", database, version)
                        .green()
                        .bold()
                );
            }
        }
        Commands::List | Commands::Generate { .. } => {}
    }

    Ok(())
}

fn print_error(error: &MigratorError) {
    eprintln!("{} {}", "ERROR:".red().bold(), error);

    // Provide actionable guidance
    let hint = match error {
        MigratorError::ConfigError(_) => {
            "Hint: Pass --config or set ENCORE_MIGRATE_CONFIG to the infrastructure config JSON.".to_string()
        }
        MigratorError::ConfigNotFound { .. } => {
            "Hint: Add the database under sql_servers[].databases in the infrastructure config.".to_string()
        }
        MigratorError::SecretUnresolved { var, .. } => {
            format!("Hint: Export {} or pass --user/--password to override.", var)
        }
        MigratorError::NoDatabases => {
            "Hint: Check that --app points at the Encore application root, or pass --manifest.".to_string()
        }
        MigratorError::DatabaseError(_) | MigratorError::ConnectTimeout(_) => {
            "Hint: Verify the database is reachable; use --host to connect through a tunnel.".to_string()
        }
        MigratorError::DirtyState { version } => format!(
            "Hint: Fix the failed migration, then run 'encore-migrate force -d <database> --version {}'.",
            version
        ),
        MigratorError::AggregateFailure { .. } => {
            "Hint: Re-run with -d <database> to retry a single database.".to_string()
        }
        _ => return,
    };
    eprintln!("{}", hint.dimmed());
}

//! # Contract review CLI (`crv`)
//!
//! ## Usage
//!
//! ```bash
//! crv --config ./config/crv.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `crv init` | Create the SQLite database and schema |
//! | `crv serve` | Start the HTTP API and progress WebSocket |
//! | `crv upload <file>` | Create a draft contract (or, with `--contract`, a new version) |
//! | `crv versions <id>` | List a contract's versions |
//! | `crv review <id>` | Run the two-stage review on the latest version |
//! | `crv delete <id>` | Delete a contract with all versions and files |
//!
//! Logs go to stderr (`-v`, `-vv`, `RUST_LOG`, `--log-format json`); command
//! results go to stdout.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use contract_review::app::App;
use contract_review::config;
use contract_review::contracts::{FileUpload, SYSTEM_USER};
use contract_review::migrate;
use contract_review::progress::ProgressMode;
use contract_review::server;

/// Contract version ledger and two-stage review pipeline.
#[derive(Parser)]
#[command(
    name = "crv",
    version,
    about = "Contract review: versioned uploads, extraction and knowledge-graph review"
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/crv.toml")]
    config: PathBuf,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log format on stderr.
    #[arg(long, value_enum, default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProgressArg {
    Human,
    Json,
    Off,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Upload a .pdf or .docx file.
    ///
    /// Without `--contract`, creates a draft contract named after the file.
    Upload {
        file: PathBuf,

        /// Add the file as a new version of this contract instead.
        #[arg(long)]
        contract: Option<i64>,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        department: Option<String>,

        /// Version remark (only with `--contract`).
        #[arg(long)]
        remark: Option<String>,

        /// Recorded creator; defaults to the system user.
        #[arg(long)]
        user: Option<String>,
    },

    /// List the versions of a contract.
    Versions { id: i64 },

    /// Review the latest version of a contract.
    Review {
        id: i64,

        /// Progress on stderr; defaults to human on a TTY, off otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Delete a contract, its versions, content and remote files.
    Delete { id: i64 },
}

fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = match cli.verbose {
        0 => "crv=info,contract_review=info",
        1 => "crv=debug,contract_review=debug,tower_http=debug",
        _ => "crv=trace,contract_review=trace,tower_http=trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Upload {
            file,
            contract,
            category,
            department,
            remark,
            user,
        } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let file_name = file
                .file_name()
                .and_then(|n| n.to_str())
                .context("file name is not valid UTF-8")?
                .to_string();
            let upload = FileUpload { file_name, bytes };
            let user = user.unwrap_or_else(|| SYSTEM_USER.to_string());

            let app = App::open(&cfg).await?;
            match contract {
                Some(id) => {
                    let version = app
                        .contracts
                        .add_version(id, &upload, remark.as_deref(), Some(&user))
                        .await?;
                    println!(
                        "contract {}  version {}  {}",
                        id, version.version_number, version.storage_path
                    );
                }
                None => {
                    let created = app
                        .contracts
                        .upload_contract(
                            &upload,
                            category.as_deref(),
                            department.as_deref(),
                            Some(&user),
                        )
                        .await?;
                    println!(
                        "contract {}  {}  {}",
                        created.contract.id,
                        created.contract.contract_number,
                        created.contract.contract_name
                    );
                }
            }
        }
        Commands::Versions { id } => {
            let app = App::open(&cfg).await?;
            let versions = app.contracts.list_versions(id).await?;
            if versions.is_empty() {
                println!("contract {} has no versions", id);
            }
            for v in versions {
                println!(
                    "v{}  {}  {} bytes  {}  {}",
                    v.version_number,
                    v.file_name,
                    v.file_size,
                    &v.content_hash[..12.min(v.content_hash.len())],
                    v.remark.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Review { id, progress } => {
            let mode = match progress {
                Some(ProgressArg::Human) => ProgressMode::Human,
                Some(ProgressArg::Json) => ProgressMode::Json,
                Some(ProgressArg::Off) => ProgressMode::Off,
                None => ProgressMode::default_for_tty(),
            };
            let reporter = mode.reporter();
            let app = App::open(&cfg).await?;
            let outcome = app.pipeline.review(id, reporter.as_ref()).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Delete { id } => {
            let app = App::open(&cfg).await?;
            let removed = app.contracts.delete_contract(id).await?;
            println!("Deleted contract {} ({} versions).", id, removed);
        }
    }

    Ok(())
}

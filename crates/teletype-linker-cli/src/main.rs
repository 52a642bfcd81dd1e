//! Teletype Linker CLI - locators and lock files for collaborative keynotes

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::Serialize;
use teletype_linker_core::config::Config;
use teletype_linker_core::domain::events::EventBus;
use teletype_linker_core::domain::locator::SessionLocator;
use teletype_linker_core::domain::locking::{LockRecord, LockStore};
use teletype_linker_core::error::Error;
use tracing::debug;

#[derive(Parser)]
#[command(name = "teletype-linker")]
#[command(author, version, about = "Exclusive file collaboration over Teletype", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a linker locator and show what it asks for
    Parse {
        /// Locator, e.g. atom://teletype-revit-linker/new?file=...
        uri: String,
    },

    /// Create the lock file for a file
    Lock {
        file: PathBuf,
        /// Session locator written into the lock file
        #[arg(short, long)]
        session: String,
    },

    /// Remove the lock file for a file, whichever session wrote it
    Unlock { file: PathBuf },

    /// Show whether a file is locked and by which session
    Status { file: PathBuf },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Show the configuration file path
    Path,
    /// Reset configuration to defaults
    Reset,
}

#[derive(Serialize)]
struct ParseOutput<'a> {
    uri: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    locator: Option<SessionLocator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ignored: Option<String>,
}

#[derive(Serialize)]
struct StatusOutput<'a> {
    file: &'a Path,
    locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    record: Option<LockRecord>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("teletype_linker=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Parse { uri } => cmd_parse(&uri, cli.format),
        Commands::Lock { file, session } => cmd_lock(&file, &session, cli.format, cli.quiet).await,
        Commands::Unlock { file } => cmd_unlock(&file, cli.format, cli.quiet).await,
        Commands::Status { file } => cmd_status(&file, cli.format).await,
        Commands::Config { action } => cmd_config(action, cli.format, cli.quiet),
    }
}

fn lock_store() -> anyhow::Result<LockStore> {
    let config = Config::load()?;
    debug!(extension = %config.linker.lock_extension, "Using lock configuration");
    Ok(LockStore::new(
        config.lock_config(),
        EventBus::new(config.events.capacity),
    ))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print a core error with its code and hint, then hand it back for the exit status
fn report(error: Error) -> anyhow::Error {
    eprintln!("Error [{}]: {}", error.code(), error);
    if let Some(suggestion) = error.suggestion() {
        eprintln!("  Try: {}", suggestion);
    }
    anyhow::Error::new(error)
}

fn cmd_parse(uri: &str, format: OutputFormat) -> anyhow::Result<()> {
    let parsed = SessionLocator::parse(uri);

    if format == OutputFormat::Json {
        let output = match parsed {
            Ok(locator) => ParseOutput {
                uri,
                locator: Some(locator),
                ignored: None,
            },
            Err(e) => ParseOutput {
                uri,
                locator: None,
                ignored: Some(e.to_string()),
            },
        };
        return print_json(&output);
    }

    match parsed {
        Ok(SessionLocator::New { file }) => println!("new file={}", file.display()),
        Ok(SessionLocator::Join { session_uri }) => println!("join session={}", session_uri),
        Err(e) => println!("ignored: {}", e),
    }
    Ok(())
}

async fn cmd_lock(
    file: &Path,
    session: &str,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    let store = lock_store()?;
    let lock_path = store
        .acquire(file, session)
        .await
        .map_err(|e| report(e.into()))?;

    if format == OutputFormat::Json {
        let record = store.inspect(file).await.map_err(|e| report(e.into()))?;
        return print_json(&record);
    }
    if !quiet {
        println!("Locked {} ({})", file.display(), lock_path.display());
    }
    Ok(())
}

async fn cmd_unlock(file: &Path, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    let store = lock_store()?;
    // A fresh process tracks nothing, so this is always a manual override
    store.force_release(file).await.map_err(|e| report(e.into()))?;

    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "file": file,
            "unlocked": true,
        }));
    }
    if !quiet {
        println!("Unlocked {}", file.display());
    }
    Ok(())
}

async fn cmd_status(file: &Path, format: OutputFormat) -> anyhow::Result<()> {
    let store = lock_store()?;
    let record = store.inspect(file).await.map_err(|e| report(e.into()))?;

    if format == OutputFormat::Json {
        return print_json(&StatusOutput {
            file,
            locked: record.is_some(),
            record,
        });
    }

    match record {
        Some(record) => {
            println!("{}: locked", file.display());
            if let Some(session) = &record.session_uri {
                println!("  session: {}", session);
            }
            println!("  join:    {}", record.join_uri);
            if let Some(locked_at) = record.locked_at {
                let local = locked_at.with_timezone(&chrono::Local);
                println!("  since:   {}", local.format("%Y-%m-%d %H:%M:%S"));
            }
        }
        None => println!("{}: not locked", file.display()),
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, format: OutputFormat, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            if format == OutputFormat::Json {
                let map: serde_json::Map<String, serde_json::Value> = items
                    .into_iter()
                    .map(|(k, v)| (k, serde_json::Value::String(v)))
                    .collect();
                return print_json(&map);
            }
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path()?.display());
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
    }
    Ok(())
}

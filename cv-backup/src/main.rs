//! cv-backup: backup server and command-line client.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use cv_backup::api;
use cv_backup_core::config::{BackupConfig, Config, ServerConfig};
use cv_backup_core::storage::named::NamedBackupStore;
use cv_backup_core::storage::remote::RemoteProxyDriver;
use cv_backup_core::{BackupMode, BackupPolicy, Document};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cv-backup")]
#[command(about = "Tiered backup storage for CV documents")]
struct Cli {
    /// JSON config file with `client` and `server` sections
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the local store, handle registry and sandbox
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// File the picker answers with
    #[arg(long, global = true)]
    file: Option<PathBuf>,

    /// Ask for a file path on the terminal when none is known
    #[arg(long, global = true)]
    interactive: bool,

    /// Probe and use the backup server
    #[arg(long, global = true)]
    dev: bool,

    /// Base URL of the backup server
    #[arg(long, global = true)]
    remote_url: Option<String>,

    /// Named slot on the backup server
    #[arg(long, global = true)]
    slot: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the named backup server
    Serve {
        /// Listen address
        #[arg(short, long)]
        addr: Option<String>,

        /// Directory of named backups
        #[arg(long)]
        backups_dir: Option<PathBuf>,

        /// Path of the legacy backup file
        #[arg(long)]
        legacy_file: Option<PathBuf>,
    },

    /// Write a JSON document as backup (`-` reads stdin)
    Write {
        #[arg(short, long)]
        mode: Option<BackupMode>,

        input: PathBuf,
    },

    /// Print the current backup
    Read {
        #[arg(short, long)]
        mode: Option<BackupMode>,
    },

    /// Restore the backup into the local autosave snapshot
    Load {
        #[arg(short, long)]
        mode: Option<BackupMode>,
    },

    /// Print the local autosave snapshot
    Snapshot,

    /// Show or change the backup mode
    Mode { mode: Option<BackupMode> },

    /// Manage backups on the server
    Remote {
        #[command(subcommand)]
        action: RemoteAction,
    },
}

#[derive(Subcommand)]
enum RemoteAction {
    /// List named backups
    List,

    /// Delete a named backup
    Delete { id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    apply_flags(&cli, &mut config.client);

    match cli.command {
        Commands::Serve {
            addr,
            backups_dir,
            legacy_file,
        } => {
            let mut server = config.server;
            if let Some(addr) = addr {
                server.addr = addr;
            }
            if let Some(dir) = backups_dir {
                server.backups_dir = dir;
            }
            if let Some(file) = legacy_file {
                server.legacy_file = file;
            }
            run_server(server).await?;
        }
        Commands::Write { mode, input } => {
            let doc = read_document(&input)?;
            let policy = BackupPolicy::from_config(&config.client)?;
            let outcome = policy.write_backup(&doc, mode).await;
            print_json(&outcome)?;
            if !outcome.ok {
                bail!("backup failed");
            }
        }
        Commands::Read { mode } => {
            let policy = BackupPolicy::from_config(&config.client)?;
            match policy.read_backup(mode).await {
                Some(doc) => print_json(&doc)?,
                None => bail!("no backup found"),
            }
        }
        Commands::Load { mode } => {
            let policy = BackupPolicy::from_config(&config.client)?;
            let outcome = policy.load_backup_into_local(mode).await;
            print_json(&outcome)?;
            if !outcome.ok {
                bail!("no backup found");
            }
        }
        Commands::Snapshot => {
            let policy = BackupPolicy::from_config(&config.client)?;
            match policy.snapshots().load() {
                Some(doc) => print_json(&doc)?,
                None => bail!("no local snapshot"),
            }
        }
        Commands::Mode { mode } => {
            let policy = BackupPolicy::from_config(&config.client)?;
            if let Some(mode) = mode {
                policy.set_backup_mode(mode)?;
            }
            println!("{}", policy.backup_mode());
        }
        Commands::Remote { action } => {
            let client = RemoteProxyDriver::new(config.client.remote_url.clone(), None, true);
            match action {
                RemoteAction::List => print_json(&client.list().await?)?,
                RemoteAction::Delete { id } => print_json(&client.delete(&id).await?)?,
            }
        }
    }

    Ok(())
}

fn apply_flags(cli: &Cli, client: &mut BackupConfig) {
    if let Some(dir) = &cli.data_dir {
        client.data_dir = dir.clone();
    }
    if let Some(file) = &cli.file {
        client.file_target = Some(file.clone());
    }
    if cli.interactive {
        client.interactive = true;
    }
    if cli.dev {
        client.dev_mode = true;
    }
    if let Some(url) = &cli.remote_url {
        client.remote_url = url.clone();
    }
    if let Some(slot) = &cli.slot {
        client.remote_slot = Some(slot.clone());
    }
}

async fn run_server(config: ServerConfig) -> Result<()> {
    let store = Arc::new(NamedBackupStore::new(
        config.backups_dir.clone(),
        config.legacy_file.clone(),
    ));
    let app = api::router(store);
    let listener = TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("binding {}", config.addr))?;
    info!(
        addr = %config.addr,
        backups = %config.backups_dir.display(),
        legacy = %config.legacy_file.display(),
        "backup server listening"
    );
    axum::serve(listener, app).await?;
    Ok(())
}

fn read_document(input: &Path) -> Result<Document> {
    let raw = if input.as_os_str() == "-" {
        let mut raw = String::new();
        std::io::stdin().read_to_string(&mut raw)?;
        raw
    } else {
        std::fs::read_to_string(input)
            .with_context(|| format!("reading {}", input.display()))?
    };
    serde_json::from_str(&raw).context("document is not valid JSON")
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;
use weavesync::ledger::GatewayClient;
use weavesync::price::CommunityTip;
use weavesync::sharing::ShareLinks;
use weavesync::StoreQueries;
use weavesync::{FjallStore, Privacy, SyncConfig, SyncEngine};

#[derive(Parser, Debug)]
#[command(name = "weavesync")]
#[command(about = "Sync a local folder to a permanent ledger", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (default: ~/.config/weavesync/config.toml)
    #[arg(long, global = true, env = "WEAVESYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Gateway URL, overrides the config file
    #[arg(long, global = true, env = "WEAVESYNC_GATEWAY")]
    pub gateway: Option<String>,

    /// Store directory, overrides the config file
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Register a local folder as a drive
    CreateDrive {
        login: String,
        name: String,
        path: PathBuf,
        /// Encrypt everything uploaded from this drive
        #[arg(long)]
        private: bool,
    },
    /// List drives
    Drives {
        #[arg(long)]
        login: Option<String>,
    },
    /// Classify every file and folder under a drive's root
    Scan { drive_id: Uuid },
    /// Price the next upload batch
    Estimate { login: String },
    /// Poll confirmations of submitted transactions once
    Status { login: String },
    /// Print the sharing link of a public drive, or of one of its files
    Share {
        drive_id: Uuid,
        /// File inside the drive
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn engine(cli: &Cli) -> Result<(SyncEngine<FjallStore>, Arc<GatewayClient>)> {
    let mut config =
        SyncConfig::load_or_default(cli.config.as_deref()).context("Failed to load config")?;
    if let Some(gateway) = &cli.gateway {
        config.gateway_url = gateway.clone();
    }
    if let Some(store) = &cli.store {
        config.store_path = Some(store.clone());
    }
    config.validate()?;

    let store_path = config.store_path()?;
    let store = FjallStore::open(&store_path)
        .with_context(|| format!("Failed to open store at {}", store_path.display()))?;
    let gateway = Arc::new(GatewayClient::new(
        &config.gateway_url,
        config.upload.request_timeout(),
    )?);
    Ok((SyncEngine::new(config, store, gateway.clone()), gateway))
}

pub async fn run(cli: Cli) -> Result<()> {
    let (engine, gateway) = engine(&cli)?;

    match cli.command {
        Commands::CreateDrive {
            login,
            name,
            path,
            private,
        } => {
            let privacy = if private {
                Privacy::Private
            } else {
                Privacy::Public
            };
            let path = path
                .canonicalize()
                .with_context(|| format!("Cannot resolve {}", path.display()))?;
            let drive = engine.create_drive(&login, &name, privacy, path)?;
            println!("{} {} ({})", "Created drive".green(), drive.name.bold(), drive.drive_id);
        }
        Commands::Drives { login } => {
            let drives = engine.drives(login.as_deref())?;
            if drives.is_empty() {
                println!("No drives");
            }
            for drive in drives {
                println!(
                    "{}  {:<20} {:<8} {:<12} {}",
                    drive.drive_id,
                    drive.name.bold(),
                    drive.privacy.as_str(),
                    drive.metadata_sync_status.to_string(),
                    drive.root_path.display()
                );
            }
        }
        Commands::Scan { drive_id } => {
            let summary = engine.scan_drive(drive_id).await?;
            println!("{}", "Scan complete".green().bold());
            println!("  new:          {}", summary.new);
            println!("  new versions: {}", summary.new_versions);
            println!("  renamed:      {}", summary.renamed);
            println!("  moved:        {}", summary.moved);
            println!("  unchanged:    {}", summary.unchanged);
            println!("  skipped:      {}", summary.skipped);
            if summary.failed > 0 {
                println!("  {}       {}", "failed:".red(), summary.failed);
            }
            println!("{} queued for upload", summary.queued().to_string().bold());
        }
        Commands::Estimate { login } => {
            let tip = CommunityTip::default();
            let estimate = engine.estimate(&login, gateway.as_ref(), &tip, None).await?;
            if estimate.is_empty() {
                println!("Nothing to upload");
                return Ok(());
            }
            println!(
                "{} files ({}), {} metadata-only, {} folders",
                estimate.files,
                estimate.human_size(),
                estimate.metadata_only,
                estimate.folders
            );
            if estimate.deferred > 0 {
                println!(
                    "{}",
                    format!("{} files deferred to a later batch", estimate.deferred).yellow()
                );
            }
            if estimate.purged > 0 {
                println!("{} vanished entries removed from the queue", estimate.purged);
            }
            println!("Total: {} AR", format!("{:.6}", estimate.total_ar()).bold());
        }
        Commands::Status { login } => {
            let report = engine.check_status(&login, Utc::now()).await?;
            println!(
                "{} confirmed, {} pending, {} requeued",
                report.confirmed.to_string().green(),
                report.pending,
                report.requeued.to_string().yellow()
            );
            if report.errors > 0 {
                println!("{}", format!("{} status requests failed", report.errors).red());
            }
        }
        Commands::Share { drive_id, file } => {
            let links = ShareLinks::new(&engine.config().app_url)?;
            let drive = engine.drive(drive_id)?;
            let link = match file {
                None => links.public_drive(&drive)?,
                Some(path) => {
                    let path = path
                        .canonicalize()
                        .with_context(|| format!("Cannot resolve {}", path.display()))?;
                    let entity = engine
                        .store()
                        .file_at_path(drive.drive_id, &path)?
                        .with_context(|| format!("{} has not been scanned", path.display()))?;
                    links.public_file(&entity)?
                }
            };
            println!("{}", link);
        }
    }
    Ok(())
}

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use coldcache::asset::{Asset, Listing};
use coldcache::config::ColdCacheConfig;
use coldcache::crypto::sign::LocalWallet;
use coldcache::detect;
use coldcache::download::{DownloadProgress, Downloader};
use coldcache::error::{Result, VaultError};
use coldcache::ledger::memory::MemoryLedger;
use coldcache::ledger::AccountAddress;
use coldcache::plan::{self, format_size, GIB, KIB, MIB};
use coldcache::retry;
use coldcache::seal::LocalKeyServer;
use coldcache::storage::{self, BlobFile, BlobStore, ChunkId, MemoryStore, WalrusStore};
use coldcache::upload::Publisher;

#[derive(Parser)]
#[command(name = "coldcache")]
#[command(about = "Partial-encryption distribution of large game packages")]
#[command(version)]
struct Cli {
    /// TOML config file; defaults apply when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the split plan for a file size (e.g. 40MiB, 2GiB, 1048576)
    Plan { size: String },
    /// Classify an asset record's encryption mode
    Classify {
        #[arg(long, default_value = "")]
        secondary: String,
        #[arg(long, default_value = "")]
        encryption_id: String,
    },
    /// Store a file unencrypted on the storage network
    Put {
        file: PathBuf,
        /// Account that receives the blob object
        #[arg(long)]
        owner: String,
    },
    /// Retrieve a blob from the storage network
    Fetch {
        id: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Publish and download a file in-process, checking the bytes match
    Roundtrip { file: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ColdCacheConfig::load(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Plan { size } => {
            let size = parse_size(&size)?;
            if size <= config.upload.bypass_threshold {
                println!("{}: published unencrypted (bypass threshold)", format_size(size));
                return Ok(());
            }
            let plan = plan::select_boundary(size);
            println!(
                "{}: protect {} ({} bytes, {:.1}%), plain {} ({} bytes)",
                format_size(size),
                format_size(plan.protected_length),
                plan.protected_length,
                plan.protected_percent(),
                format_size(plan.plain_length),
                plan.plain_length,
            );
        }
        Commands::Classify {
            secondary,
            encryption_id,
        } => {
            let mode = detect::classify(Some(&secondary), Some(&encryption_id));
            println!("{}", mode.as_str());
        }
        Commands::Put { file, owner } => {
            let store = WalrusStore::new(config.walrus_config())?;
            let asset = Asset::from_path(Listing::default(), &file).await?;
            let blob = BlobFile::new(
                asset.file_name.clone(),
                &asset.content_type,
                asset.read_all().await?,
            );
            let owner = AccountAddress::new(owner);
            let policy = config.upload_config()?.retry;
            let epochs = config.storage.epochs;

            let chunk = retry::with_retries(&policy, &asset.file_name, |_| {
                let blob = blob.clone();
                let store = &store;
                let owner = &owner;
                async move { storage::publish_blob(store, blob, epochs, owner).await }
            })
            .await?;
            println!("{}", chunk.id);
        }
        Commands::Fetch { id, output } => {
            let store = WalrusStore::new(config.walrus_config())?;
            let id = ChunkId::parse(&id)?;
            let data = store.retrieve(&id).await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &data).await?;
                    println!("{} -> {}", format_size(data.len() as u64), path.display());
                }
                None => println!("{} ({} bytes)", id, data.len()),
            }
        }
        Commands::Roundtrip { file } => roundtrip(&config, file).await?,
    }
    Ok(())
}

/// Publish and download against in-process store, key server and ledger.
async fn roundtrip(config: &ColdCacheConfig, file: PathBuf) -> Result<()> {
    let ledger = Arc::new(MemoryLedger::new());
    let store = Arc::new(MemoryStore::new());
    let seal = Arc::new(LocalKeyServer::generate(ledger.clone()));

    let publisher_wallet = LocalWallet::generate();
    let buyer = LocalWallet::generate();

    let title = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "asset".into());
    let asset = Asset::from_path(
        Listing {
            title,
            ..Default::default()
        },
        &file,
    )
    .await?;

    let publisher = Publisher::new(store.clone(), seal.clone(), config.upload_config()?);
    let record = publisher
        .publish_and_record(&asset, None, publisher_wallet.address(), ledger.as_ref())
        .await?;
    ledger.purchase(&record.id, buyer.address()).await?;

    let downloader = Downloader::new(store, seal, ledger, config.download_config()?);
    let progress = |p: DownloadProgress| info!(stage = %p.stage, percent = p.percent, "{}", p.message);
    let downloaded = downloader.download(&record, &buyer, &progress).await?;

    let original = asset.read_all().await?;
    if downloaded.bytes != original {
        return Err(VaultError::Integrity(
            "downloaded bytes differ from the source file".into(),
        ));
    }
    println!(
        "{}: {} round trip OK ({})",
        file.display(),
        downloaded.mode.as_str(),
        format_size(downloaded.len() as u64)
    );
    Ok(())
}

/// Parse `1048576`, `512KiB`, `40MiB`, `2GiB` (also KB/MB/GB, binary units).
fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let value: u64 = digits
        .parse()
        .map_err(|_| VaultError::InvalidInput(format!("bad size {s:?}")))?;
    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => KIB,
        "m" | "mb" | "mib" => MIB,
        "g" | "gb" | "gib" => GIB,
        other => {
            return Err(VaultError::InvalidInput(format!("unknown size unit {other:?}")))
        }
    };
    value
        .checked_mul(multiplier)
        .ok_or_else(|| VaultError::InvalidInput(format!("size {s:?} overflows")))
}

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use music_dl::api::manifest::ManifestProvider;
use music_dl::downloader::http_pool::HttpPool;
use music_dl::downloader::writer::DiskWriter;
use music_dl::downloader::DownloadStatus;
use music_dl::search::fallback::{FallbackProvider, FallbackResolver};
use music_dl::{AppConfig, DownloadManager, Provider, ProviderRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "music-dl", version, about = "Bulk-download songs from many music sources")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show whether local storage is configured and the concurrency limit
    Status,
    /// Search the loaded catalogs
    Search {
        #[arg(long, required = true)]
        manifest: Vec<PathBuf>,
        keyword: String,
    },
    /// Download every track of the primary catalog
    Download {
        #[arg(long, required = true)]
        manifest: Vec<PathBuf>,
        /// Primary source (defaults to the first manifest's source)
        #[arg(long)]
        source: Option<String>,
        /// Queue the tracks as one named batch
        #[arg(long)]
        batch: Option<String>,
        /// Try the other catalogs when the primary has no usable URL
        #[arg(long)]
        fallback: bool,
        #[arg(long)]
        music_dir: Option<PathBuf>,
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let mut config = match cli.config {
        Some(path) => AppConfig::load_from(Some(path))?,
        None => AppConfig::load()?,
    };

    match cli.command {
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&config.status())?);
        }
        Command::Search { manifest, keyword } => {
            let (registry, _) = load_registry(&manifest).await?;
            for name in registry.names() {
                let Some(provider) = registry.get(&name) else { continue };
                for song in provider.search(&keyword).await? {
                    println!("{}\t{}", song.id, song);
                }
            }
        }
        Command::Download {
            manifest,
            source,
            batch,
            fallback,
            music_dir,
            concurrency,
        } => {
            if let Some(dir) = music_dir {
                config.music_dir = Some(dir);
            }
            if let Some(limit) = concurrency {
                config.max_concurrent_downloads = limit;
            }
            config.validate()?;
            let music_dir = config.require_music_dir()?.to_path_buf();

            let (registry, catalogs) = load_registry(&manifest).await?;
            let source = match source {
                Some(source) => source,
                None => catalogs
                    .first()
                    .map(|c| c.name().to_string())
                    .context("no catalog loaded")?,
            };
            let Some(catalog) = catalogs.iter().find(|c| c.name() == source) else {
                bail!("no manifest provides source {}", source);
            };
            let songs = catalog.songs();

            let primary: Arc<dyn Provider> = registry
                .get(&source)
                .with_context(|| format!("source {} not registered", source))?;
            let provider: Arc<dyn Provider> = if fallback {
                let resolver =
                    FallbackResolver::new(registry.clone(), config.fallback_order.clone());
                Arc::new(FallbackProvider::new(primary, Arc::new(resolver)))
            } else {
                primary
            };

            let pool = Arc::new(HttpPool::from_config(&config)?);
            let manager = DownloadManager::builder(music_dir, Arc::new(DiskWriter::new(pool)))
                .concurrency(config.max_concurrent_downloads)
                .lyrics(config.enable_lyrics)
                .covers(config.enable_cover_art)
                .build();

            info!(
                "Downloading {} songs from {} into {:?}",
                songs.len(),
                source,
                manager.music_dir()
            );
            match batch {
                Some(name) => {
                    manager.enqueue_batch(songs, &name, &source, provider);
                }
                None => {
                    for song in songs {
                        manager.enqueue(song, &source, provider.clone());
                    }
                }
            }

            watch(&manager).await?;
            report(&manager);
        }
    }

    Ok(())
}

async fn load_registry(
    paths: &[PathBuf],
) -> anyhow::Result<(ProviderRegistry, Vec<Arc<ManifestProvider>>)> {
    let mut registry = ProviderRegistry::new();
    let mut catalogs = Vec::new();
    for path in paths {
        let provider = Arc::new(
            ManifestProvider::load(path)
                .await
                .with_context(|| format!("loading manifest {:?}", path))?,
        );
        registry.register(provider.clone());
        catalogs.push(provider);
    }
    Ok((registry, catalogs))
}

async fn watch(manager: &DownloadManager) -> anyhow::Result<()> {
    let total = manager.list_tasks().len() as u64;
    let bar = ProgressBar::new(total);
    bar.set_style(ProgressStyle::with_template(
        "{spinner} [{bar:40}] {pos}/{len} {msg}",
    )?);

    loop {
        let tasks = manager.list_tasks();
        let done = tasks.iter().filter(|t| t.is_terminal()).count() as u64;
        let bytes: u64 = tasks.iter().map(|t| t.downloaded_bytes).sum();
        bar.set_position(done);
        bar.set_message(format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0)));
        if manager.is_idle() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }

    bar.finish();
    Ok(())
}

fn report(manager: &DownloadManager) {
    let tasks = manager.list_tasks();
    for task in tasks.iter().filter(|t| t.status == DownloadStatus::Failed) {
        println!("FAILED  {}: {}", task.song, task.error.as_deref().unwrap_or_default());
    }
    let completed = tasks.iter().filter(|t| t.status == DownloadStatus::Completed).count();
    let skipped = tasks.iter().filter(|t| t.skipped).count();
    println!(
        "{} completed ({} already on disk), {} failed",
        completed,
        skipped,
        tasks.len() - completed
    );
}

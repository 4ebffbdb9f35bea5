mod batch;
mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use wxfav_core::archive::is_zip;
use wxfav_core::{
    locate, store, CancellationToken, DiscoverOptions, Discovery, MediaEntry, ScratchRegistry,
    TransferReport, TransferSource,
};

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "wxfav", version, about = "Save WeChat favorites media in the order they were added")]
struct Cli {
    /// Config file (default: <config dir>/wxfav/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Find the logged-in account and its favorites folder
    Detect,

    /// List the media that would be saved, in order
    Scan {
        /// Favorites cache directory or zip archive
        path: Option<PathBuf>,
    },

    /// Copy media into <output>/<YYYY-MM-DD>/<name> with sequence prefixes
    Save {
        /// Favorites cache directory or zip archive
        path: Option<PathBuf>,

        /// Parent directory of the dated output folders
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Folder name below the date folder (default: next free number)
        #[arg(long)]
        name: Option<String>,

        /// Delete cached media after a fully successful save
        #[arg(long)]
        auto_clean: bool,
    },

    /// Show or update the persisted settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective settings
    Show,

    /// Merge the given values into the config file
    Save {
        #[arg(long)]
        cache: Option<PathBuf>,
        #[arg(long)]
        output: Option<PathBuf>,
        #[arg(long)]
        auto_clean: Option<bool>,
        #[arg(long)]
        log_level: Option<String>,
        #[arg(long)]
        store_queries: Option<PathBuf>,
    },
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().or_else(AppConfig::default_path);
    let config = config_path
        .as_deref()
        .map(AppConfig::load)
        .unwrap_or_default();
    init_logging(if cli.verbose { "debug" } else { &config.log_level });

    let registry = Arc::new(ScratchRegistry::new());
    let result = run(cli.command, config, config_path.as_deref(), &registry);

    let left = registry.cleanup_all();
    if left > 0 {
        warn!(count = left, "scratch directories could not be removed");
    }
    result
}

fn run(
    command: Command,
    config: AppConfig,
    config_path: Option<&Path>,
    registry: &Arc<ScratchRegistry>,
) -> anyhow::Result<()> {
    match command {
        Command::Detect => detect(),
        Command::Scan { path } => {
            let source = source_path(path, &config)?;
            scan(&source, &config, registry)
        }
        Command::Save {
            path,
            output,
            name,
            auto_clean,
        } => {
            let source = source_path(path, &config)?;
            let output = output
                .or_else(|| config.output_path.clone())
                .unwrap_or_else(|| PathBuf::from("."));
            let dest = batch::batch_folder(&output, chrono::Local::now().date_naive(), name.as_deref());
            save(&source, &dest, auto_clean || config.auto_clean, &config, registry)
        }
        Command::Config { action } => configure(action, config, config_path),
    }
}

fn detect() -> anyhow::Result<()> {
    match locate::detect_account() {
        Some(found) => {
            println!("WeChat Files: {}", found.wechat_files.display());
            println!("Account:      {}", found.account);
            match found.favorites {
                Some(fav) => println!("Favorites:    {}", fav.display()),
                None => println!("Favorites:    (not found)"),
            }
        }
        None => println!("No WeChat account found on this machine"),
    }
    Ok(())
}

/// Explicit argument, then the configured cache, then the detected account.
fn source_path(arg: Option<PathBuf>, config: &AppConfig) -> anyhow::Result<PathBuf> {
    if let Some(path) = arg.or_else(|| config.cache_path.clone()) {
        return Ok(path);
    }
    match locate::detect_account().and_then(|a| a.favorites) {
        Some(path) => {
            info!(path = %path.display(), "using detected favorites folder");
            Ok(path)
        }
        None => bail!("no source given and no favorites folder detected; pass a path"),
    }
}

fn discover_options(config: &AppConfig) -> anyhow::Result<DiscoverOptions> {
    let extra_templates = match &config.store_queries {
        Some(path) => store::load_templates(path)
            .with_context(|| format!("load store queries from {}", path.display()))?,
        None => Vec::new(),
    };
    Ok(DiscoverOptions { extra_templates })
}

fn discover_dir(source: &Path, config: &AppConfig) -> anyhow::Result<Discovery> {
    let options = discover_options(config)?;
    wxfav_core::discover_with(source, &options)
        .with_context(|| format!("discover media in {}", source.display()))
}

fn print_entries(entries: &[MediaEntry]) {
    let width = entries.len().to_string().len();
    for (i, entry) in entries.iter().enumerate() {
        let key = entry.sort_key.map(|k| k.to_string()).unwrap_or_default();
        println!("{:>width$}  {}  {}", i + 1, entry.name, key, width = width);
    }
}

fn scan(source: &Path, config: &AppConfig, registry: &Arc<ScratchRegistry>) -> anyhow::Result<()> {
    if source.is_file() && is_zip(source) {
        let extraction = wxfav_core::discover_archive(source, registry.clone())
            .with_context(|| format!("extract {}", source.display()))?;
        println!("Archive: {}", source.display());
        println!("Order:   file name numbers");
        print_entries(extraction.entries());
        return Ok(());
    }

    let discovery = discover_dir(source, config)?;
    println!("Folder: {}", discovery.content_root.display());
    println!("Order:  {}", discovery.describe_strategy());
    print_entries(&discovery.entries);
    Ok(())
}

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb
}

fn cancel_on_ctrlc() -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nCancelling after the current file...");
        handler_token.cancel();
    }) {
        warn!(error = %e, "cannot install Ctrl-C handler");
    }
    token
}

fn save(
    source: &Path,
    dest: &Path,
    auto_clean: bool,
    config: &AppConfig,
    registry: &Arc<ScratchRegistry>,
) -> anyhow::Result<()> {
    let cancel = cancel_on_ctrlc();
    let pb = progress_bar();
    let bar = pb.clone();
    let progress = move |percent: u8, message: &str| {
        bar.set_position(percent as u64);
        bar.set_message(message.to_string());
    };

    let (report, content_root) = if source.is_file() && is_zip(source) {
        let extraction = wxfav_core::discover_archive(source, registry.clone())
            .with_context(|| format!("extract {}", source.display()))?;
        eprintln!("Found {} media files in {}", extraction.entries().len(), source.display());
        let (_, report) = wxfav_core::transfer_archive(extraction, dest, &progress, Some(&cancel))
            .with_context(|| format!("save into {}", dest.display()))?;
        (report, None)
    } else {
        let mut discovery = discover_dir(source, config)?;
        eprintln!(
            "Found {} media files, order: {}",
            discovery.entries.len(),
            discovery.describe_strategy()
        );
        let report = wxfav_core::transfer(
            &mut discovery.entries,
            dest,
            TransferSource::Directory,
            &progress,
            Some(&cancel),
        )
        .with_context(|| format!("save into {}", dest.display()))?;
        (report, Some(discovery.content_root))
    };
    pb.finish_and_clear();

    print_report(&report, dest);

    if auto_clean {
        match content_root {
            Some(root) if report.failed == 0 && !report.cancelled => {
                let purged = wxfav_core::purge_media(&root);
                eprintln!("Cleaned cache: {} deleted, {} failed", purged.deleted, purged.failed);
            }
            Some(_) => warn!("save incomplete, cache left untouched"),
            None => info!("auto-clean does not apply to archives"),
        }
    }
    Ok(())
}

fn print_report(report: &TransferReport, dest: &Path) {
    if report.cancelled {
        eprintln!("Cancelled.");
    }
    eprintln!(
        "Done! {} saved, {} failed -> {}",
        report.saved,
        report.failed,
        dest.display()
    );
}

fn configure(action: ConfigAction, mut config: AppConfig, config_path: Option<&Path>) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            if let Some(path) = config_path {
                println!("# {}", path.display());
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        ConfigAction::Save {
            cache,
            output,
            auto_clean,
            log_level,
            store_queries,
        } => {
            let Some(path) = config_path else {
                bail!("no config directory on this system; pass --config");
            };
            if cache.is_some() {
                config.cache_path = cache;
            }
            if output.is_some() {
                config.output_path = output;
            }
            if let Some(auto_clean) = auto_clean {
                config.auto_clean = auto_clean;
            }
            if let Some(level) = log_level {
                config.log_level = level;
            }
            if store_queries.is_some() {
                config.store_queries = store_queries;
            }
            config.save(path)?;
            println!("Saved {}", path.display());
        }
    }
    Ok(())
}

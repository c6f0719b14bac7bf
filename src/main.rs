use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pkgproxy_package::{ArchiveCache, Archiver, PackageResolver};
use pkgproxy_server::{ListenPort, NpmrcFile};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{Settings, DEFAULT_CONFIG_FILE};

/// pkgproxy - serve selected npm namespaces from local source directories
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Config file; its directory is the project root
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy until interrupted
    Run,

    /// Show how a package request would be answered
    Resolve {
        /// Package name, e.g. @acme/ui
        package: String,
    },

    /// Manage generated archives
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// List cached archives
    List,

    /// Show cache size
    Size,

    /// Clear the cache
    Clear {
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let settings = Settings::load(&cli.config)?;

    match cli.command {
        Commands::Run => {
            let runtime = tokio::runtime::Runtime::new().context("Failed to start runtime")?;
            runtime.block_on(run_proxy(settings))?;
        }

        Commands::Resolve { package } => resolve_package(&settings, &package)?,

        Commands::Cache { command } => {
            let cache = ArchiveCache::new(&settings.cache_dir);
            match command {
                CacheCommands::List => list_cache(&cache)?,
                CacheCommands::Size => show_cache_size(&cache)?,
                CacheCommands::Clear { yes } => clear_cache(&cache, yes)?,
            }
        }
    }

    Ok(())
}

async fn run_proxy(settings: Settings) -> Result<()> {
    let handle = settings.proxy().spawn().await?;

    let npmrc = if settings.write_npmrc {
        match NpmrcFile::write(&settings.project_root, &settings.overrides, handle.external_addr()) {
            Ok(npmrc) => Some(npmrc),
            Err(err) => {
                handle.stop().await?;
                return Err(err.into());
            }
        }
    } else {
        None
    };

    println!("Registry proxy listening on {}", handle.external_url());
    for rule in settings.overrides.iter() {
        println!(
            "  {} -> {} (upstream {})",
            rule.namespace(),
            rule.package_root().display(),
            rule.upstream()
        );
    }
    if let Some(npmrc) = &npmrc {
        println!("Wrote {}", npmrc.path().display());
    }
    println!("Press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");

    let stopped = handle.stop().await;
    drop(npmrc);
    stopped?;

    Ok(())
}

/// Resolve `package` against the local sources without starting the proxy
fn resolve_package(settings: &Settings, package: &str) -> Result<()> {
    let Some(rule) = settings.overrides.matching(package) else {
        println!(
            "{} is not overridden; requests go to {}",
            package, settings.default_registry
        );
        return Ok(());
    };

    let tarball_base = match settings.internal_port {
        ListenPort::Fixed(port) => format!("http://127.0.0.1:{}", port),
        ListenPort::FirstFree(_) => "http://127.0.0.1".to_string(),
    };
    let archiver =
        Archiver::new(ArchiveCache::new(&settings.cache_dir)).with_compression(settings.compression);
    let resolver =
        PackageResolver::new(&settings.project_root, archiver).with_tarball_base(tarball_base);

    match resolver.resolve(rule, package) {
        Ok(resolved) => {
            println!("{}", serde_json::to_string_pretty(&resolved.document)?);
            eprintln!("Archive: {}", resolved.archive.display());
        }
        Err(err) => {
            warn!("{} cannot be served locally", package);
            println!("{}", err);
            println!("Requests for {} fall back to {}", package, rule.upstream());
        }
    }

    Ok(())
}

fn list_cache(cache: &ArchiveCache) -> Result<()> {
    println!("Cached archives in: {}\n", cache.root().display());

    let archives = cache.list()?;
    if archives.is_empty() {
        println!("No archives in cache");
        return Ok(());
    }

    for (i, name) in archives.iter().enumerate() {
        println!("{}. {}", i + 1, name);
    }

    Ok(())
}

fn show_cache_size(cache: &ArchiveCache) -> Result<()> {
    let size_bytes = cache.size()?;
    let size_mb = size_bytes as f64 / 1024.0 / 1024.0;

    println!("Cache size: {:.2} MB ({} bytes)", size_mb, size_bytes);

    Ok(())
}

fn clear_cache(cache: &ArchiveCache, yes: bool) -> Result<()> {
    if !yes {
        use std::io::{self, Write};

        print!("This will delete all generated archives. Continue? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if input.trim().to_lowercase() != "y" {
            println!("Cancelled");
            return Ok(());
        }
    }

    cache.clear()?;
    println!("Cache cleared");

    Ok(())
}

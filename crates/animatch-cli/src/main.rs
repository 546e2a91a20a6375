//! `animatch`: resolve anime series names to AniDB ids from the cached
//! title dump.

use std::path::PathBuf;
use std::process::ExitCode;

use animatch_anidb::{AniDbError, AniDbTitleSource};
use animatch_core::config::MatcherConfig;
use animatch_core::equivalence::matching_step;
use animatch_core::resolver::{ResolverOptions, TitleResolver};
use animatch_core::{normalize, MatchError};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "animatch")]
#[command(about = "Resolve anime series names to AniDB ids")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding the cached title dumps
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve one or more titles
    Lookup {
        #[arg(required = true)]
        titles: Vec<String>,

        /// Print a JSON array instead of tab-separated lines
        #[arg(long)]
        json: bool,

        /// Only consult the title dictionary, never scan the raw feed
        #[arg(long)]
        no_fallback: bool,
    },
    /// Check whether two titles name the same series
    Compare { a: String, b: String },
    /// Print the normalized form of a title
    Normalize { title: String },
    /// Refresh the title dump if stale and reload the index
    Refresh,
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Match(#[from] MatchError),

    #[error(transparent)]
    AniDb(#[from] AniDbError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct LookupResult {
    title: String,
    id: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("animatch=info")),
        )
        .with_writer(std::io::stderr)
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

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Compare { a, b } => {
            match matching_step(&a, &b) {
                Some(step) => println!("true ({step})"),
                None => println!("false"),
            }
            Ok(())
        }
        Command::Normalize { title } => {
            println!("{}", normalize(&title));
            Ok(())
        }
        Command::Lookup {
            titles,
            json,
            no_fallback,
        } => {
            let resolver = build_resolver(cli.config, cli.cache_dir)?;
            let cancel = cancel_on_ctrl_c();
            let results = lookup(&resolver, &titles, no_fallback, &cancel).await?;
            print_results(&results, json)
        }
        Command::Refresh => {
            let resolver = build_resolver(cli.config, cli.cache_dir)?;
            let cancel = cancel_on_ctrl_c();
            let rebuilt = resolver.refresh(&cancel).await?;
            tracing::info!(rebuilt, "Refresh finished");
            println!("{}", serde_json::to_string_pretty(&resolver.stats())?);
            Ok(())
        }
    }
}

fn build_resolver(
    config_path: Option<PathBuf>,
    cache_dir: Option<PathBuf>,
) -> Result<TitleResolver<AniDbTitleSource>, CliError> {
    let mut config = match config_path {
        Some(path) => MatcherConfig::load_from(&path)?,
        None => MatcherConfig::load()?,
    };
    if let Some(dir) = cache_dir {
        config.cache.root = Some(dir);
    }

    let source = AniDbTitleSource::from_config(&config)?;
    tracing::debug!(path = %source.path().display(), "Using AniDB title cache");
    Ok(TitleResolver::with_options(
        source,
        ResolverOptions::from_config(&config),
    ))
}

/// Resolve every title concurrently; the first caller loads the index and
/// the rest wait for it.
async fn lookup(
    resolver: &TitleResolver<AniDbTitleSource>,
    titles: &[String],
    no_fallback: bool,
    cancel: &CancellationToken,
) -> Result<Vec<LookupResult>, MatchError> {
    let lookups = titles.iter().map(|title| async move {
        let id = if no_fallback {
            resolver.find_series(title, cancel).await?
        } else {
            resolver.resolve(title, cancel).await?
        };
        Ok::<_, MatchError>(LookupResult {
            title: title.clone(),
            id,
        })
    });
    futures::future::join_all(lookups)
        .await
        .into_iter()
        .collect()
}

fn print_results(results: &[LookupResult], json: bool) -> Result<(), CliError> {
    if json {
        println!("{}", serde_json::to_string_pretty(results)?);
        return Ok(());
    }
    for result in results {
        println!(
            "{}\t{}",
            result.title,
            result.id.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling");
            trigger.cancel();
        }
    });
    cancel
}

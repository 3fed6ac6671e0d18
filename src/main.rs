mod agent;
mod cache;
mod config;
mod host;
mod net;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::io::Write;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::agent::OfflineAgent;
use crate::cache::{CacheStore, SqliteStore};
use crate::net::{HttpNetwork, Request};

#[derive(Parser, Debug)]
#[command(name = "offcache")]
#[command(about = "Network-first offline cache agent for a web application")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./offcache.yaml or $XDG_CONFIG_HOME/offcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Override the upstream origin URL
  #[arg(short, long)]
  upstream: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Pre-cache the asset manifest (the install step)
  Install,
  /// Prune cache namespaces left over from older versions (the activate step)
  Activate,
  /// Resolve one request through the agent: network first, cache fallback
  Fetch {
    /// Path to request, e.g. "/"
    path: String,
  },
  /// Show registered cache namespaces and their entries
  Status,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let (stderr, _guard) = tracing_appender::non_blocking(std::io::stderr());
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_env("OFFCACHE_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(stderr)
    .init();

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Override upstream if specified on command line
  let config = if let Some(url) = args.upstream {
    config::Config {
      upstream: config::UpstreamConfig { url },
      ..config
    }
  } else {
    config
  };

  let store = match &config.cache.path {
    Some(path) => SqliteStore::open_at(path)?,
    None => SqliteStore::open()?,
  };

  if let Command::Status = args.command {
    return print_status(&store);
  }

  let network = HttpNetwork::new(&config)?;
  let agent = OfflineAgent::new(store, network);
  let installed = agent.installed()?;
  let host = host::spawn(agent);

  match args.command {
    Command::Install => host.install().await?,
    Command::Activate => {
      if !installed {
        host.install().await?;
      }
      host.activate().await?;
    }
    Command::Fetch { path } => {
      if !installed {
        host.install().await?;
      }
      host.activate().await?;

      let outcome = host.fetch(Request::get(path)).await?;
      tracing::info!(
        "served {} via {}",
        outcome.response.status,
        outcome.source
      );
      std::io::stdout().write_all(&outcome.response.body)?;

      // The write is detached from the response; let it settle before the
      // process exits so the snapshot actually lands in the durable cache.
      if let Some(write) = outcome.cache_write {
        let _ = write.await;
      }
    }
    Command::Status => unreachable!(),
  }

  Ok(())
}

fn print_status(store: &SqliteStore) -> Result<()> {
  let namespaces = store.namespaces()?;
  if namespaces.is_empty() {
    println!("no caches registered");
    return Ok(());
  }

  for namespace in namespaces {
    let current = if namespace == agent::CACHE_NAMESPACE {
      " (current)"
    } else {
      " (stale)"
    };
    println!("{}{}", namespace, current);
    for key in store.entry_keys(&namespace)? {
      println!("  {}", key);
    }
  }

  Ok(())
}

//! Implementation of the `sitehistory` server.
//!
//! Clones the repository into a temporary working tree, reads its history
//! once, and serves the commit listing until interrupted. Commits are built
//! on first request.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, ValueEnum};
use tracing::{info, warn};

use sitehistory_lib::build::{BuildConfig, BuildCoordinator, CachePolicy, ExternalBuilder, FailurePolicy};
use sitehistory_lib::commits::CommitIndex;
use sitehistory_lib::config::ServerConfig;
use sitehistory_lib::consts::{DEFAULT_GENERATOR_PROGRAM, DEFAULT_GIT_PROGRAM, DEFAULT_IDLE_TIMEOUT, DEFAULT_PORT};
use sitehistory_lib::generate::Generator;
use sitehistory_lib::git::Git;
use sitehistory_lib::route::{Allocator, IdentityScheme, RoutingTable};
use sitehistory_lib::server::{self, AppState, ServerError};
use sitehistory_lib::worktree::WorkTree;

use crate::output::{format_duration, print_info, print_stat, print_success, print_warning};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum Scheme {
  /// One loopback address per commit, dispatched by Host header
  Vhost,
  /// One OS-assigned port per commit
  #[default]
  Port,
}

impl From<Scheme> for IdentityScheme {
  fn from(scheme: Scheme) -> Self {
    match scheme {
      Scheme::Vhost => IdentityScheme::VirtualHost,
      Scheme::Port => IdentityScheme::EphemeralPort,
    }
  }
}

#[derive(Debug, Args)]
pub struct ServeArgs {
  /// Repository to clone (any location git accepts)
  #[arg(value_name = "REPO")]
  pub repo: String,

  /// Run the generator with --safe
  #[arg(long, default_value_t = true, action = ArgAction::Set)]
  pub safe: bool,

  /// Port to listen on
  #[arg(short, long, default_value_t = DEFAULT_PORT)]
  pub port: u16,

  /// Address to listen on
  #[arg(long, default_value = "0.0.0.0")]
  pub bind: IpAddr,

  /// How each commit is exposed
  #[arg(long, value_enum, default_value_t = Scheme::Port)]
  pub scheme: Scheme,

  /// Tear a commit down after this long without requests (0 keeps it)
  #[arg(long, value_parser = humantime::parse_duration)]
  pub timeout: Option<Duration>,

  /// Rebuild failed commits on the next request instead of replaying the error
  #[arg(long)]
  pub retry_failed: bool,

  /// Extra host name that reaches the commit listing (repeatable)
  #[arg(long = "host", value_name = "NAME")]
  pub hosts: Vec<String>,

  /// Version-control client
  #[arg(long, default_value = DEFAULT_GIT_PROGRAM)]
  pub git: String,

  /// Static-site generator
  #[arg(long, default_value = DEFAULT_GENERATOR_PROGRAM)]
  pub generator: String,

  /// How long open connections may take to finish on shutdown
  #[arg(long, value_parser = humantime::parse_duration, default_value = "5s")]
  pub grace: Duration,
}

impl ServeArgs {
  /// Idle eviction is on by default only for ephemeral ports, where every
  /// kept commit holds a listening socket.
  fn cache_policy(&self) -> CachePolicy {
    match (self.timeout, self.scheme) {
      (Some(timeout), _) if timeout.is_zero() => CachePolicy::Persistent,
      (Some(timeout), _) => CachePolicy::IdleEviction(timeout),
      (None, Scheme::Port) => CachePolicy::IdleEviction(DEFAULT_IDLE_TIMEOUT),
      (None, Scheme::Vhost) => CachePolicy::Persistent,
    }
  }

  fn build_config(&self) -> BuildConfig {
    BuildConfig {
      cache: self.cache_policy(),
      failures: if self.retry_failed {
        FailurePolicy::Retry
      } else {
        FailurePolicy::Cache
      },
    }
  }

  fn server_config(&self) -> ServerConfig {
    let base = ServerConfig {
      repo: self.repo.clone(),
      bind: self.bind,
      port: self.port,
      shutdown_grace: self.grace,
      ..ServerConfig::default()
    };
    self.hosts.iter().fold(base, |config, host| config.with_listing_host(host.as_str()))
  }
}

/// Execute the serve command.
///
/// Blocks until Ctrl-C, then returns so the temporary directories are
/// removed on the way out.
pub fn cmd_serve(args: ServeArgs) -> Result<()> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(serve(args))
}

async fn serve(args: ServeArgs) -> Result<()> {
  let start = Instant::now();

  let checkout = tempfile::Builder::new()
    .prefix("git.")
    .tempdir()
    .context("Failed to create working tree directory")?;
  let output = tempfile::Builder::new()
    .prefix("site.")
    .tempdir()
    .context("Failed to create output directory")?;

  let git = Git::new(&args.git);
  git
    .clone_repo(&args.repo, checkout.path())
    .await
    .with_context(|| format!("Failed to clone {}", args.repo))?;

  let worktree = WorkTree::new(checkout.path());
  let listing = {
    let tree = worktree.lock().await;
    git.log_oneline(&tree).await.context("Failed to read commit history")?
  };
  let index = Arc::new(CommitIndex::parse(&listing).context("Failed to read commit history")?);
  info!(commits = index.len(), repo = %args.repo, "history loaded");

  let scheme = IdentityScheme::from(args.scheme);
  let build_config = args.build_config();
  let server_config = args.server_config();

  let listener = server::bind(&server_config).await.context("Failed to start listener")?;
  let local = listener.local_addr().context("Failed to read listening address")?;

  let allocator = Allocator::new(scheme, args.bind, Arc::new(RoutingTable::new()));
  let builder = ExternalBuilder::new(git, Generator::new(&args.generator, args.safe));
  let commit_count = index.len();
  let coordinator = BuildCoordinator::new(index, builder, worktree, output.path(), allocator, build_config.clone());
  let state = AppState::new(coordinator, server_config, local.port());

  print_success(&format!("Serving {} commits of {}", commit_count, args.repo));
  print_stat("Listening", &format!("http://localhost:{}/", local.port()));
  print_stat("Scheme", scheme_label(scheme));
  print_stat("Idle timeout", &match build_config.cache {
    CachePolicy::Persistent => "none".to_string(),
    CachePolicy::IdleEviction(timeout) => format_duration(timeout),
  });
  print_stat("Startup", &format_duration(start.elapsed()));

  match server::serve(listener, state, shutdown_signal()).await {
    Ok(()) => {}
    Err(ServerError::ShutdownTimeout(grace)) => {
      print_warning(&format!(
        "Connections still open after {}, exiting anyway",
        format_duration(grace)
      ));
    }
    Err(e) => return Err(e).context("Server failed"),
  }

  print_info("Stopped");
  Ok(())
}

fn scheme_label(scheme: IdentityScheme) -> &'static str {
  match scheme {
    IdentityScheme::VirtualHost => "virtual host (127.0.0.0/8 by Host header)",
    IdentityScheme::EphemeralPort => "ephemeral port per commit",
  }
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    warn!(error = %e, "could not listen for Ctrl-C, running until killed");
    std::future::pending::<()>().await;
  }
}

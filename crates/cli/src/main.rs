mod cmd;
mod output;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cmd::ServeArgs;

/// sitehistory - Browse the rendered site at every commit of a repository
#[derive(Parser)]
#[command(name = "sitehistory")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging (when RUST_LOG is not set)
  #[arg(short, long)]
  verbose: bool,

  #[command(flatten)]
  serve: ServeArgs,
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "info" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .init();

  cmd::cmd_serve(cli.serve)
}

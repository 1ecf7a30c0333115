//! Static-site generator invoked as an external process.
//!
//! The generator is called as `<program> build [--safe] -s <src> -d <dest>`;
//! the files it writes under `dest` are the data contract.

use std::path::Path;

use tokio::process::Command;
use tracing::info;

use crate::capture::{CommandError, run_captured};
use crate::consts::DEFAULT_GENERATOR_PROGRAM;

#[derive(Debug, Clone)]
pub struct Generator {
  program: String,
  safe: bool,
}

impl Default for Generator {
  fn default() -> Self {
    Self::new(DEFAULT_GENERATOR_PROGRAM, true)
  }
}

impl Generator {
  pub fn new(program: impl Into<String>, safe: bool) -> Self {
    Self {
      program: program.into(),
      safe,
    }
  }

  fn args(&self, src: &Path, dest: &Path) -> Vec<std::ffi::OsString> {
    let mut args: Vec<std::ffi::OsString> = vec!["build".into()];
    if self.safe {
      args.push("--safe".into());
    }
    args.push("-s".into());
    args.push(src.into());
    args.push("-d".into());
    args.push(dest.into());
    args
  }

  /// Generate the site from `src` into `dest`.
  pub async fn build(&self, src: &Path, dest: &Path) -> Result<(), CommandError> {
    info!(src = ?src, dest = ?dest, safe = self.safe, "generating site");
    let mut cmd = Command::new(&self.program);
    cmd.args(self.args(src, dest));
    run_captured(&mut cmd, &format!("{} build", self.program)).await
  }
}

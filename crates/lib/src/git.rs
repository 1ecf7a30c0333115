//! Version-control client invoked as an external process.
//!
//! Only the exit code and stderr are relied upon, plus stdout for the
//! one-line log used to build the commit index.

use std::path::Path;

use tokio::process::Command;
use tracing::info;

use crate::capture::{CommandError, read_captured, run_captured};
use crate::consts::DEFAULT_GIT_PROGRAM;
use crate::worktree::WorkTreeGuard;

#[derive(Debug, Clone)]
pub struct Git {
  program: String,
}

impl Default for Git {
  fn default() -> Self {
    Self::new(DEFAULT_GIT_PROGRAM)
  }
}

impl Git {
  pub fn new(program: impl Into<String>) -> Self {
    Self { program: program.into() }
  }

  /// Clone `source` into `dest`.
  ///
  /// Runs before the working tree is shared, so it takes a plain path.
  pub async fn clone_repo(&self, source: &str, dest: &Path) -> Result<(), CommandError> {
    info!(source = %source, dest = ?dest, "cloning repository");
    let mut cmd = Command::new(&self.program);
    cmd.arg("clone").arg(source).arg(dest);
    run_captured(&mut cmd, &format!("{} clone {}", self.program, source)).await
  }

  /// `git log --oneline` of the checked-out branch.
  pub async fn log_oneline(&self, tree: &WorkTreeGuard) -> Result<String, CommandError> {
    let mut cmd = Command::new(&self.program);
    cmd.arg("log").arg("--oneline").current_dir(tree.path());
    read_captured(&mut cmd, &format!("{} log --oneline", self.program)).await
  }

  /// Check out `commit` in the working tree.
  pub async fn checkout(&self, tree: &mut WorkTreeGuard, commit: &str) -> Result<(), CommandError> {
    let mut cmd = Command::new(&self.program);
    cmd.arg("checkout").arg(commit).current_dir(tree.path());
    run_captured(&mut cmd, &format!("{} checkout {}", self.program, commit)).await
  }
}

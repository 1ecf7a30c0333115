//! Types for per-commit build coordination.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::capture::Diagnostic;
use crate::route::Identity;
use crate::site::Site;

/// Errors that can end a build attempt.
///
/// Outcomes are cached and replayed to every caller, so the error is
/// `Clone` and carries rendered text rather than live error sources.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// Requested commit is not part of the history.
  #[error("unknown commit {0}")]
  UnknownCommit(String),

  /// Checking the commit out failed.
  #[error("{0}")]
  RepositoryOperationFailed(Diagnostic),

  /// The site generator exited unsuccessfully.
  #[error("{0}")]
  GenerationFailed(Diagnostic),

  /// No free routing identity could be found.
  #[error("could not allocate an identity for {commit} after {attempts} attempt(s)")]
  AllocationExhausted { commit: String, attempts: usize },

  /// Filesystem or socket error around the build.
  #[error("io error: {0}")]
  Io(String),

  /// The build task panicked or was aborted.
  #[error("build of {0} was interrupted")]
  Interrupted(String),
}

impl BuildError {
  /// Short description for the operator log.
  ///
  /// `Display` renders the full diagnostic for the error page; the log only
  /// needs the first line since the tool's stderr was already mirrored.
  pub fn summary(&self) -> String {
    match self {
      BuildError::RepositoryOperationFailed(diag) | BuildError::GenerationFailed(diag) => diag.summary().to_string(),
      other => other.to_string(),
    }
  }

  pub fn is_unknown_commit(&self) -> bool {
    matches!(self, BuildError::UnknownCommit(_))
  }
}

/// Externally visible state of a commit's build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
  Pending,
  Building,
  Done,
  Failed,
}

/// A successfully built and registered commit.
#[derive(Debug, Clone)]
pub struct Built {
  pub identity: Identity,
  pub site: Arc<Site>,
}

/// State held by a build record. Moves Pending → Building → Done|Failed
/// exactly once.
#[derive(Debug, Clone)]
pub enum BuildState {
  Pending,
  Building,
  Done(Built),
  Failed(BuildError),
}

impl BuildState {
  pub fn is_settled(&self) -> bool {
    matches!(self, BuildState::Done(_) | BuildState::Failed(_))
  }

  pub fn status(&self) -> BuildStatus {
    match self {
      BuildState::Pending => BuildStatus::Pending,
      BuildState::Building => BuildStatus::Building,
      BuildState::Done(_) => BuildStatus::Done,
      BuildState::Failed(_) => BuildStatus::Failed,
    }
  }
}

/// How long a successful outcome stays registered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CachePolicy {
  /// Keep every built commit for the lifetime of the process.
  #[default]
  Persistent,
  /// Tear a commit's identity down after this long without requests; the
  /// next request rebuilds it.
  IdleEviction(Duration),
}

/// What happens to a failed build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
  /// Replay the failure to every later request.
  #[default]
  Cache,
  /// Report the failure to the requests that waited on it, then forget it so
  /// the next request rebuilds.
  Retry,
}

/// Configuration for build coordination.
#[derive(Debug, Clone, Default)]
pub struct BuildConfig {
  pub cache: CachePolicy,
  pub failures: FailurePolicy,
}

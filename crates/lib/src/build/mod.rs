//! Per-commit build coordination.
//!
//! [`BuildCoordinator::ensure`] makes sure a commit's site is built at most
//! once, however many requests ask for it at the same time:
//! - one build record per commit, created lazily under a write lock
//! - the caller that moves a record from Pending to Building spawns the
//!   build; everyone else (including that caller) waits on the record's
//!   watch channel for the settled outcome
//! - builds take the working-tree lock, so only one commit builds at a time
//! - the outcome is replayed to later callers instead of rebuilding

pub mod builder;
pub mod types;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::commits::CommitIndex;
use crate::route::{Allocator, Identity};
use crate::site::Site;
use crate::worktree::WorkTree;

pub use builder::{ExternalBuilder, SiteBuilder};
pub use types::{BuildConfig, BuildError, BuildState, BuildStatus, Built, CachePolicy, FailurePolicy};

/// Mutable build state for one commit.
#[derive(Debug)]
struct BuildRecord {
  commit: String,
  output_dir: PathBuf,
  state: watch::Sender<BuildState>,
}

impl BuildRecord {
  fn new(commit: &str, output_dir: PathBuf) -> Self {
    let (state, _) = watch::channel(BuildState::Pending);
    Self {
      commit: commit.to_string(),
      output_dir,
      state,
    }
  }

  fn status(&self) -> BuildStatus {
    self.state.borrow().status()
  }

  /// Count a request against a Done record's idle timer.
  fn touch(&self) {
    if let BuildState::Done(built) = &*self.state.borrow() {
      built.site.touch();
    }
  }

  /// Move Pending → Building. Exactly one caller ever gets `true`.
  fn claim(&self) -> bool {
    self.state.send_if_modified(|state| {
      if matches!(state, BuildState::Pending) {
        *state = BuildState::Building;
        true
      } else {
        false
      }
    })
  }

  fn finish(&self, outcome: Result<Built, BuildError>) {
    let state = match outcome {
      Ok(built) => BuildState::Done(built),
      Err(e) => BuildState::Failed(e),
    };
    self.state.send_replace(state);
  }

  /// Wait until the record is Done or Failed.
  async fn settled(&self) -> Result<Built, BuildError> {
    let mut rx = self.state.subscribe();
    let state = rx
      .wait_for(BuildState::is_settled)
      .await
      .map_err(|_| BuildError::Interrupted(self.commit.clone()))?;

    match &*state {
      BuildState::Done(built) => Ok(built.clone()),
      BuildState::Failed(e) => Err(e.clone()),
      BuildState::Pending | BuildState::Building => Err(BuildError::Interrupted(self.commit.clone())),
    }
  }
}

/// Single-flight build coordinator shared by every request handler.
pub struct BuildCoordinator<B> {
  inner: Arc<Inner<B>>,
}

impl<B> Clone for BuildCoordinator<B> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

struct Inner<B> {
  index: Arc<CommitIndex>,
  builder: B,
  worktree: WorkTree,
  output_root: PathBuf,
  allocator: Allocator,
  config: BuildConfig,
  records: RwLock<HashMap<String, Arc<BuildRecord>>>,
}

impl<B: SiteBuilder> BuildCoordinator<B> {
  pub fn new(
    index: Arc<CommitIndex>,
    builder: B,
    worktree: WorkTree,
    output_root: impl Into<PathBuf>,
    allocator: Allocator,
    config: BuildConfig,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        index,
        builder,
        worktree,
        output_root: output_root.into(),
        allocator,
        config,
        records: RwLock::new(HashMap::new()),
      }),
    }
  }

  pub fn index(&self) -> &Arc<CommitIndex> {
    &self.inner.index
  }

  pub fn allocator(&self) -> &Allocator {
    &self.inner.allocator
  }

  /// Build `commit` if needed and return the identity serving it.
  ///
  /// Concurrent callers for the same commit share one build and all receive
  /// the same outcome. Dropping the returned future does not cancel the
  /// build.
  pub async fn ensure(&self, commit: &str) -> Result<Identity, BuildError> {
    if !self.inner.index.contains(commit) {
      return Err(BuildError::UnknownCommit(commit.to_string()));
    }

    let record = self.inner.record(commit);

    if record.claim() {
      debug!(commit = %commit, "claimed build");
      let inner = Arc::clone(&self.inner);
      let claimed = Arc::clone(&record);
      tokio::spawn(async move { inner.run(claimed).await });
    }

    let built = record.settled().await?;
    built.site.touch();
    Ok(built.identity)
  }

  /// Current state of `commit`, or `None` if it is not in the history.
  ///
  /// Commits nobody has asked for yet report `Pending`.
  pub fn status(&self, commit: &str) -> Option<BuildStatus> {
    if !self.inner.index.contains(commit) {
      return None;
    }
    let records = self.inner.records.read().unwrap_or_else(|p| p.into_inner());
    Some(records.get(commit).map_or(BuildStatus::Pending, |r| r.status()))
  }
}

impl<B: SiteBuilder> Inner<B> {
  /// Existing record for `commit`, or a new Pending one.
  ///
  /// An existing Done record is touched before the lock is released, so idle
  /// eviction, which re-checks activity under the write lock, cannot retire
  /// an identity this caller is about to be sent to.
  fn record(&self, commit: &str) -> Arc<BuildRecord> {
    {
      let records = self.records.read().unwrap_or_else(|p| p.into_inner());
      if let Some(record) = records.get(commit) {
        record.touch();
        return Arc::clone(record);
      }
    }

    let mut records = self.records.write().unwrap_or_else(|p| p.into_inner());
    let record = records
      .entry(commit.to_string())
      .or_insert_with(|| Arc::new(BuildRecord::new(commit, self.output_root.join(commit))));
    record.touch();
    Arc::clone(record)
  }

  /// Drop `record` from the map if it is still the live one for its commit.
  fn forget(&self, record: &Arc<BuildRecord>) {
    self.forget_if(record, || true);
  }

  /// Like [`forget`](Self::forget), but only when `still_idle` holds under
  /// the write lock. Returns whether the record is out of the map.
  fn forget_if(&self, record: &Arc<BuildRecord>, still_idle: impl FnOnce() -> bool) -> bool {
    let mut records = self.records.write().unwrap_or_else(|p| p.into_inner());
    let live = records
      .get(&record.commit)
      .is_some_and(|live| Arc::ptr_eq(live, record));

    if !live {
      return true;
    }
    if !still_idle() {
      return false;
    }
    records.remove(&record.commit);
    true
  }

  /// Drive a claimed record to Done or Failed.
  async fn run(self: Arc<Self>, record: Arc<BuildRecord>) {
    let attempt = {
      let inner = Arc::clone(&self);
      let record = Arc::clone(&record);
      tokio::spawn(async move { inner.attempt(&record).await })
    };

    let outcome = match attempt.await {
      Ok(outcome) => outcome,
      Err(e) => {
        error!(commit = %record.commit, error = %e, "build task did not complete");
        Err(BuildError::Interrupted(record.commit.clone()))
      }
    };

    match &outcome {
      Ok(built) => info!(commit = %record.commit, identity = %built.identity, "build succeeded"),
      Err(e) => error!(commit = %record.commit, error = %e.summary(), "build failed"),
    }

    let idle = match (&outcome, self.config.cache) {
      (Ok(built), CachePolicy::IdleEviction(timeout)) => Some((built.clone(), timeout)),
      _ => None,
    };
    let failed = outcome.is_err();

    record.finish(outcome);

    if failed && self.config.failures == FailurePolicy::Retry {
      self.forget(&record);
    }

    if let Some((built, timeout)) = idle {
      tokio::spawn(self.evict_when_idle(record, built, timeout));
    }
  }

  async fn attempt(&self, record: &BuildRecord) -> Result<Built, BuildError> {
    let output_dir = record.output_dir.clone();

    {
      let mut tree = self.worktree.lock().await;
      info!(commit = %record.commit, out = ?output_dir, "building");
      clear_output(&output_dir).await?;
      self.builder.build(&mut tree, &record.commit, &output_dir).await?;
    }

    let site = Arc::new(Site::open(&record.commit, &output_dir));
    let identity = self.allocator.allocate(&record.commit, Arc::clone(&site)).await?;

    Ok(Built { identity, site })
  }

  /// Tear the identity down once the site sees no requests for `timeout`.
  async fn evict_when_idle(self: Arc<Self>, record: Arc<BuildRecord>, built: Built, timeout: Duration) {
    loop {
      let seen = built.site.touches();
      if tokio::time::timeout(timeout, built.site.activity()).await.is_ok() {
        continue;
      }
      // Forget first so new requests start a fresh build rather than being
      // sent to the identity that is about to go away.
      if self.forget_if(&record, || built.site.touches() == seen) {
        break;
      }
      debug!(commit = %record.commit, "activity during eviction, keeping commit");
    }

    info!(
      commit = %record.commit,
      identity = %built.identity,
      idle = ?timeout,
      "evicting idle commit"
    );
    self.allocator.release(&built.identity);
  }
}

/// Remove leftovers from an earlier build of the same commit.
async fn clear_output(dir: &Path) -> Result<(), BuildError> {
  match tokio::fs::remove_dir_all(dir).await {
    Ok(()) => Ok(()),
    Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
    Err(e) => Err(BuildError::Io(format!("failed to clear {}: {}", dir.display(), e))),
  }
}

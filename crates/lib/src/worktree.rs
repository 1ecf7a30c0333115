//! Exclusive access to the shared working tree.
//!
//! There is exactly one checkout directory. Every checkout+build sequence
//! must hold a [`WorkTreeGuard`]; the guard is the only way to get at the
//! directory's path, so code that has not taken the lock cannot touch the
//! tree.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Handle to the single working tree. Clones share the same lock.
#[derive(Debug, Clone)]
pub struct WorkTree {
  path: Arc<Mutex<PathBuf>>,
}

/// Exclusive-access token for the working tree, released on drop.
#[derive(Debug)]
pub struct WorkTreeGuard {
  path: OwnedMutexGuard<PathBuf>,
  acquired_at: Instant,
}

impl WorkTree {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: Arc::new(Mutex::new(path.into())),
    }
  }

  /// Wait for the working tree to become free and take it.
  ///
  /// The guard is owned so it can be carried into a spawned build task.
  pub async fn lock(&self) -> WorkTreeGuard {
    let waiting_since = Instant::now();
    let path = Arc::clone(&self.path).lock_owned().await;
    debug!(waited = ?waiting_since.elapsed(), "acquired working tree");

    WorkTreeGuard {
      path,
      acquired_at: Instant::now(),
    }
  }

  /// Take the working tree only if nobody holds it.
  #[cfg(test)]
  fn try_lock(&self) -> Option<WorkTreeGuard> {
    let path = Arc::clone(&self.path).try_lock_owned().ok()?;
    Some(WorkTreeGuard {
      path,
      acquired_at: Instant::now(),
    })
  }
}

impl WorkTreeGuard {
  /// Path of the checkout. Only reachable while the lock is held.
  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Drop for WorkTreeGuard {
  fn drop(&mut self) {
    debug!(held = ?self.acquired_at.elapsed(), "released working tree");
  }
}

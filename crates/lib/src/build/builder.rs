//! The checkout+generate step run inside the working-tree lock.

use std::future::Future;
use std::path::Path;

use crate::build::BuildError;
use crate::generate::Generator;
use crate::git::Git;
use crate::worktree::WorkTreeGuard;

/// Materializes one commit's site into `out_dir`.
///
/// Called with the working tree held; implementations may only touch the
/// tree through `tree`.
pub trait SiteBuilder: Send + Sync + 'static {
  fn build(
    &self,
    tree: &mut WorkTreeGuard,
    commit: &str,
    out_dir: &Path,
  ) -> impl Future<Output = Result<(), BuildError>> + Send;
}

/// Runs the real tools: `git checkout` then the site generator.
#[derive(Debug, Clone, Default)]
pub struct ExternalBuilder {
  git: Git,
  generator: Generator,
}

impl ExternalBuilder {
  pub fn new(git: Git, generator: Generator) -> Self {
    Self { git, generator }
  }
}

impl SiteBuilder for ExternalBuilder {
  async fn build(&self, tree: &mut WorkTreeGuard, commit: &str, out_dir: &Path) -> Result<(), BuildError> {
    self
      .git
      .checkout(tree, commit)
      .await
      .map_err(|e| BuildError::RepositoryOperationFailed(e.into_diagnostic()))?;

    self
      .generator
      .build(tree.path(), out_dir)
      .await
      .map_err(|e| BuildError::GenerationFailed(e.into_diagnostic()))
  }
}

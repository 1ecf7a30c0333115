//! Static file serving for one commit's generated output.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use axum::body::Body;
use axum::extract::Request;
use axum::response::Response;
use tokio::sync::Notify;
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile};
use tracing::trace;

use crate::consts::CUSTOM_NOT_FOUND_PAGE;

/// A built commit's output directory, ready to be served.
#[derive(Debug)]
pub struct Site {
  commit: String,
  root: PathBuf,
  not_found_page: Option<PathBuf>,
  activity: Notify,
  touches: AtomicU64,
}

impl Site {
  /// Wrap an output directory. Content is read-only from here on, so the
  /// custom not-found page is looked up once.
  pub fn open(commit: impl Into<String>, root: impl Into<PathBuf>) -> Self {
    let root = root.into();
    let candidate = root.join(CUSTOM_NOT_FOUND_PAGE);
    let not_found_page = candidate.is_file().then_some(candidate);

    Self {
      commit: commit.into(),
      root,
      not_found_page,
      activity: Notify::new(),
      touches: AtomicU64::new(0),
    }
  }

  pub fn commit(&self) -> &str {
    &self.commit
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn has_custom_not_found(&self) -> bool {
    self.not_found_page.is_some()
  }

  /// Record activity on this site, resetting its idle timer.
  pub fn touch(&self) {
    self.touches.fetch_add(1, Ordering::SeqCst);
    self.activity.notify_one();
  }

  /// Number of touches so far. Two equal readings mean no activity happened
  /// in between.
  pub fn touches(&self) -> u64 {
    self.touches.load(Ordering::SeqCst)
  }

  /// Resolves at the next [`touch`](Self::touch), or immediately if one
  /// happened since the last wait.
  pub async fn activity(&self) {
    self.activity.notified().await;
  }

  /// Serve a request from the output directory.
  ///
  /// A custom `404.html` replaces the generic not-found body and keeps the
  /// 404 status; every other status passes through from `ServeDir`.
  pub async fn serve(&self, request: Request) -> Response {
    self.touch();
    trace!(commit = %self.commit, path = %request.uri().path(), "serving");

    let result = match &self.not_found_page {
      Some(page) => ServeDir::new(&self.root)
        .not_found_service(ServeFile::new(page))
        .oneshot(request)
        .await
        .map(|res| res.map(Body::new)),
      None => ServeDir::new(&self.root)
        .oneshot(request)
        .await
        .map(|res| res.map(Body::new)),
    };

    match result {
      Ok(response) => response,
      Err(never) => match never {},
    }
  }
}

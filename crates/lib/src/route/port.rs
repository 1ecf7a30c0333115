//! Ephemeral-port identities: one dedicated listener per commit.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::Router;
use axum::extract::Request;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::{Identity, Route, RoutingTable};
use crate::build::BuildError;
use crate::net;
use crate::site::Site;

/// Router that hands every request to `site`.
pub fn site_router(site: Arc<Site>) -> Router {
  Router::new().fallback(move |request: Request| {
    let site = Arc::clone(&site);
    async move { site.serve(request).await }
  })
}

/// Bind an OS-assigned port, register it and start serving `site` on it.
pub(super) async fn allocate(
  table: &RoutingTable,
  bind: IpAddr,
  commit: &str,
  site: Arc<Site>,
) -> Result<Identity, BuildError> {
  let listener = net::listen(SocketAddr::new(bind, 0))
    .await
    .map_err(|e| BuildError::Io(format!("failed to bind listener for {}: {}", commit, e)))?;
  let port = listener
    .local_addr()
    .map_err(|e| BuildError::Io(format!("failed to read listener address for {}: {}", commit, e)))?
    .port();

  let identity = Identity::Port(port);
  let token = CancellationToken::new();

  // The OS will not hand out a port that is still bound, so a clash here
  // means the table is stale.
  if !table.try_insert(identity, Route::with_listener(Arc::clone(&site), token.clone())) {
    return Err(BuildError::AllocationExhausted {
      commit: commit.to_string(),
      attempts: 1,
    });
  }

  let commit = commit.to_string();
  let app = site_router(site);
  tokio::spawn(async move {
    info!(commit = %commit, port, "listening for commit");
    let served = axum::serve(listener, app)
      .with_graceful_shutdown(token.cancelled_owned())
      .await;
    match served {
      Ok(()) => info!(commit = %commit, port, "commit listener closed"),
      Err(e) => error!(commit = %commit, port, error = %e, "commit listener failed"),
    }
  });

  Ok(identity)
}

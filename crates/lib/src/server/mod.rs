//! HTTP front end: commit listing, build-and-redirect, and host dispatch.
//!
//! Every request on the main listener goes through [`dispatch`]: a host
//! naming an allocated loopback address is served straight from that
//! commit's [`Site`](crate::site::Site); the listing hosts (or a request with
//! no host at all) get the listing routes; anything else is a 404 under the
//! address scheme and the listing under the port scheme.

pub mod pages;

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Router;
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_TYPE, HOST};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Json, Redirect, Response};
use axum::routing::get;
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use crate::build::{BuildCoordinator, BuildError, BuildStatus, SiteBuilder};
use crate::config::ServerConfig;
use crate::net;
use crate::route::{Identity, IdentityScheme};

#[derive(Debug, Error)]
pub enum ServerError {
  #[error("failed to bind {addr}: {source}")]
  Bind {
    addr: SocketAddr,
    #[source]
    source: io::Error,
  },

  #[error("server error: {0}")]
  Io(#[from] io::Error),

  #[error("server task failed: {0}")]
  Task(String),

  #[error("connections still open after {0:?}")]
  ShutdownTimeout(Duration),
}

/// Shared state for every handler on the main listener.
pub struct AppState<B> {
  coordinator: BuildCoordinator<B>,
  config: Arc<ServerConfig>,
  listen_port: u16,
}

impl<B> Clone for AppState<B> {
  fn clone(&self) -> Self {
    Self {
      coordinator: self.coordinator.clone(),
      config: Arc::clone(&self.config),
      listen_port: self.listen_port,
    }
  }
}

impl<B: SiteBuilder> AppState<B> {
  /// `listen_port` is the port the main listener actually bound, used when
  /// redirecting to address identities.
  pub fn new(coordinator: BuildCoordinator<B>, config: ServerConfig, listen_port: u16) -> Self {
    Self {
      coordinator,
      config: Arc::new(config),
      listen_port,
    }
  }

  pub fn coordinator(&self) -> &BuildCoordinator<B> {
    &self.coordinator
  }

  pub fn config(&self) -> &ServerConfig {
    &self.config
  }
}

/// Bind the main listener.
pub async fn bind(config: &ServerConfig) -> Result<TcpListener, ServerError> {
  let addr = config.addr();
  net::listen(addr)
    .await
    .map_err(|source| ServerError::Bind { addr, source })
}

/// The full application: host dispatch in front of the listing routes.
pub fn app<B: SiteBuilder>(state: AppState<B>) -> Router {
  let listing = listing_routes(state.clone());

  Router::new()
    .fallback(move |request: Request| {
      let state = state.clone();
      let listing = listing.clone();
      async move { dispatch(state, listing, request).await }
    })
    .layer(middleware::from_fn(log_request))
}

/// Routes served to the canonical listing hosts.
pub fn listing_routes<B: SiteBuilder>(state: AppState<B>) -> Router {
  Router::new()
    .route("/", get(listing::<B>))
    .route("/commits.json", get(commits_json::<B>))
    .route("/commit/{*path}", get(commit::<B>))
    .route("/favicon.ico", get(favicon))
    .route("/robots.txt", get(robots))
    .fallback(not_found)
    .with_state(state)
}

/// Serve until `shutdown` resolves, then drain for at most the configured
/// grace period.
///
/// Per-commit listeners are cancelled together with the main one.
pub async fn serve<B, F>(listener: TcpListener, state: AppState<B>, shutdown: F) -> Result<(), ServerError>
where
  B: SiteBuilder,
  F: Future<Output = ()> + Send + 'static,
{
  let grace = state.config.shutdown_grace;
  let table = Arc::clone(state.coordinator.allocator().table());
  let token = CancellationToken::new();

  if let Ok(addr) = listener.local_addr() {
    info!(addr = %addr, "listening");
  }

  let app = app(state);
  let stop = token.clone();
  let mut server = tokio::spawn(async move {
    axum::serve(listener, app)
      .with_graceful_shutdown(stop.cancelled_owned())
      .await
  });

  tokio::select! {
    joined = &mut server => return flatten(joined),
    () = shutdown => {}
  }

  info!(grace = ?grace, "shutting down");
  token.cancel();
  table.shutdown_all();

  match tokio::time::timeout(grace, &mut server).await {
    Ok(joined) => flatten(joined),
    Err(_) => {
      server.abort();
      Err(ServerError::ShutdownTimeout(grace))
    }
  }
}

fn flatten(joined: Result<io::Result<()>, tokio::task::JoinError>) -> Result<(), ServerError> {
  match joined {
    Ok(result) => result.map_err(ServerError::from),
    Err(e) => Err(ServerError::Task(e.to_string())),
  }
}

async fn dispatch<B: SiteBuilder>(state: AppState<B>, listing: Router, request: Request) -> Response {
  let host = request_host(request.headers(), request.uri()).map(str::to_owned);

  let Some(host) = host else {
    return route_listing(listing, request).await;
  };

  if let Ok(addr) = host.parse::<Ipv4Addr>() {
    if let Some(site) = state.coordinator.allocator().table().lookup(&Identity::Address(addr)) {
      return site.serve(request).await;
    }
  }

  // Host names only select content under the address scheme; with ports
  // every name the server is reached by shows the listing.
  let ports_only = state.coordinator.allocator().scheme() == IdentityScheme::EphemeralPort;
  if ports_only || state.config.is_listing_host(&host) {
    return route_listing(listing, request).await;
  }

  debug!(host = %host, "no route for host");
  not_found().await.into_response()
}

async fn route_listing(listing: Router, request: Request) -> Response {
  match listing.oneshot(request).await {
    Ok(response) => response,
    Err(never) => match never {},
  }
}

async fn log_request(request: Request, next: Next) -> Response {
  let method = request.method().clone();
  let uri = request.uri().clone();
  let start = Instant::now();

  let response = next.run(request).await;

  debug!(
    method = %method,
    uri = %uri,
    status = response.status().as_u16(),
    elapsed = ?start.elapsed(),
    "request"
  );
  response
}

async fn listing<B: SiteBuilder>(State(state): State<AppState<B>>) -> Html<String> {
  Html(pages::listing(&state.config.repo, state.coordinator.index()))
}

#[derive(Serialize)]
struct CommitEntry<'a> {
  id: &'a str,
  title: &'a str,
  status: BuildStatus,
}

async fn commits_json<B: SiteBuilder>(State(state): State<AppState<B>>) -> Response {
  let entries: Vec<CommitEntry<'_>> = state
    .coordinator
    .index()
    .all()
    .map(|commit| CommitEntry {
      id: &commit.id,
      title: &commit.title,
      status: state.coordinator.status(&commit.id).unwrap_or(BuildStatus::Pending),
    })
    .collect();
  Json(entries).into_response()
}

/// `/commit/{id}[/{rest}]`: build if needed, then send the client to the
/// commit's identity with the rest of the path and the query intact.
async fn commit<B: SiteBuilder>(State(state): State<AppState<B>>, headers: HeaderMap, uri: Uri) -> Response {
  let path = uri.path().strip_prefix("/commit/").unwrap_or_default();
  let (id, rest) = path.split_once('/').unwrap_or((path, ""));

  match state.coordinator.ensure(id).await {
    Ok(identity) => {
      let host = request_host(&headers, &uri).unwrap_or("localhost");
      let mut location = format!("http://{}/{}", identity.authority(host, state.listen_port), rest);
      if let Some(query) = uri.query() {
        location.push('?');
        location.push_str(query);
      }
      debug!(commit = %id, location = %location, "redirecting");
      Redirect::to(&location).into_response()
    }
    Err(BuildError::UnknownCommit(_)) => {
      debug!(commit = %id, "unknown commit");
      not_found().await.into_response()
    }
    Err(e) => {
      warn!(commit = %id, error = %e.summary(), "serving build failure");
      (StatusCode::INTERNAL_SERVER_ERROR, Html(pages::build_failed(id, &e))).into_response()
    }
  }
}

async fn favicon() -> impl IntoResponse {
  ([(CONTENT_TYPE, pages::FAVICON_CONTENT_TYPE)], pages::FAVICON)
}

async fn robots() -> impl IntoResponse {
  ([(CONTENT_TYPE, "text/plain; charset=utf-8")], pages::ROBOTS_TXT)
}

async fn not_found() -> impl IntoResponse {
  (StatusCode::NOT_FOUND, Html(pages::not_found()))
}

/// Host the client addressed, without the port.
fn request_host<'a>(headers: &'a HeaderMap, uri: &'a Uri) -> Option<&'a str> {
  headers
    .get(HOST)
    .and_then(|value| value.to_str().ok())
    .or_else(|| uri.authority().map(|a| a.as_str()))
    .map(strip_port)
    .filter(|host| !host.is_empty())
}

fn strip_port(authority: &str) -> &str {
  if let Some(bracketed) = authority.strip_prefix('[') {
    return bracketed.split_once(']').map_or(bracketed, |(host, _)| host);
  }
  match authority.split_once(':') {
    // A second colon means a bare IPv6 address with no port.
    Some((host, port)) if !port.contains(':') => host,
    _ => authority,
  }
}

//! The main listener end to end: listing, redirect, host dispatch, shutdown.

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::{HOST, LOCATION};
use sitehistory_lib::build::{BuildConfig, ExternalBuilder};
use sitehistory_lib::config::ServerConfig;
use sitehistory_lib::route::IdentityScheme;
use sitehistory_lib::server::{self, AppState, ServerError};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use super::common::TestEnv;

struct Running {
  addr: SocketAddr,
  stop: oneshot::Sender<()>,
  handle: JoinHandle<Result<(), ServerError>>,
}

async fn start(env: &TestEnv, scheme: IdentityScheme, grace: Duration) -> Running {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let config = ServerConfig {
    repo: "site".to_string(),
    port: addr.port(),
    shutdown_grace: grace,
    ..ServerConfig::default()
  };
  let state: AppState<ExternalBuilder> =
    AppState::new(env.coordinator(scheme, BuildConfig::default()), config, addr.port());

  let (stop, stopped) = oneshot::channel::<()>();
  let handle = tokio::spawn(server::serve(listener, state, async move {
    let _ = stopped.await;
  }));

  Running { addr, stop, handle }
}

fn client() -> reqwest::Client {
  reqwest::Client::builder()
    .redirect(reqwest::redirect::Policy::none())
    .build()
    .unwrap()
}

#[tokio::test]
async fn listing_over_socket() {
  let env = TestEnv::new();
  let running = start(&env, IdentityScheme::VirtualHost, Duration::from_secs(5)).await;

  let response = client()
    .get(format!("http://{}/", running.addr))
    .send()
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  let body = response.text().await.unwrap();
  assert!(body.contains("<title>site</title>"));
  assert!(body.contains("<p>2 commits:</p>"));

  running.stop.send(()).unwrap();
  running.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn redirect_then_serve_by_host() {
  let env = TestEnv::new();
  let running = start(&env, IdentityScheme::VirtualHost, Duration::from_secs(5)).await;
  let client = client();

  let response = client
    .get(format!("http://{}/commit/abc123/?tab=files", running.addr))
    .send()
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::SEE_OTHER);

  let location = response.headers()[LOCATION].to_str().unwrap().to_string();
  let authority = location
    .strip_prefix("http://")
    .and_then(|rest| rest.strip_suffix("/?tab=files"))
    .unwrap()
    .to_string();
  assert!(authority.starts_with("127."));
  assert!(authority.ends_with(&format!(":{}", running.addr.port())));

  let response = client
    .get(format!("http://{}/", running.addr))
    .header(HOST, authority.as_str())
    .send()
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(response.text().await.unwrap(), "<h1>abc123</h1>\n");

  let response = client
    .get(format!("http://{}/commit/zzz999/", running.addr))
    .send()
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
  assert_eq!(env.runs_of("abc123"), 1);
  assert_eq!(env.runs().len(), 1);

  running.stop.send(()).unwrap();
  running.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn build_failure_page_over_socket() {
  let env = TestEnv::new();
  env.fail("def456");
  let running = start(&env, IdentityScheme::EphemeralPort, Duration::from_secs(5)).await;

  let response = client()
    .get(format!("http://{}/commit/def456/", running.addr))
    .send()
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
  let body = response.text().await.unwrap();
  assert!(body.contains("<pre>"));
  assert!(body.contains("\tError: missing layout</pre>"));

  running.stop.send(()).unwrap();
  running.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_gives_up_after_grace() {
  let env = TestEnv::new();
  env.set_delay("3");
  let running = start(&env, IdentityScheme::VirtualHost, Duration::from_millis(200)).await;

  let url = format!("http://{}/commit/abc123/", running.addr);
  let in_flight = tokio::spawn(async move { client().get(url).send().await });
  tokio::time::sleep(Duration::from_millis(300)).await;

  running.stop.send(()).unwrap();
  let result = tokio::time::timeout(Duration::from_secs(2), running.handle)
    .await
    .unwrap()
    .unwrap();

  assert!(matches!(result, Err(ServerError::ShutdownTimeout(_))));
  in_flight.abort();
}

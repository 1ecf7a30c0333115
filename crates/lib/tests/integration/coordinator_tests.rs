//! Build coordination through real subprocesses and listeners.

use std::time::Duration;

use sitehistory_lib::build::{BuildConfig, BuildError, BuildStatus, CachePolicy, FailurePolicy};
use sitehistory_lib::route::{Identity, IdentityScheme};

use super::common::{TestEnv, fetch, wait_closed};

fn port_of(identity: Identity) -> u16 {
  match identity {
    Identity::Port(port) => port,
    other => panic!("expected a port identity, got {}", other),
  }
}

#[tokio::test]
async fn builds_and_serves_each_commit() {
  let env = TestEnv::new();
  let coordinator = env.coordinator(IdentityScheme::EphemeralPort, BuildConfig::default());

  let abc = port_of(coordinator.ensure("abc123").await.unwrap());
  let def = port_of(coordinator.ensure("def456").await.unwrap());
  assert_ne!(abc, def);

  assert_eq!(fetch(abc, "/").await, (200, "<h1>abc123</h1>\n".to_string()));
  assert_eq!(fetch(def, "/").await, (200, "<h1>def456</h1>\n".to_string()));
  assert!(env.output().join("abc123").join("index.html").is_file());
  assert!(env.output().join("def456").join("index.html").is_file());

  coordinator.allocator().table().shutdown_all();
}

#[tokio::test]
async fn unknown_commit_does_not_touch_tree() {
  let env = TestEnv::new();
  let coordinator = env.coordinator(IdentityScheme::VirtualHost, BuildConfig::default());

  let err = coordinator.ensure("zzz999").await.unwrap_err();

  assert!(err.is_unknown_commit());
  assert!(env.runs().is_empty());
  assert!(!env.tree().join(".checked-out").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_share_one_build() {
  let env = TestEnv::new();
  env.set_delay("0.3");
  let coordinator = env.coordinator(IdentityScheme::VirtualHost, BuildConfig::default());

  let mut tasks = Vec::new();
  for _ in 0..16 {
    let coordinator = coordinator.clone();
    tasks.push(tokio::spawn(async move { coordinator.ensure("abc123").await }));
  }

  let mut identities = Vec::new();
  for task in tasks {
    identities.push(task.await.unwrap().unwrap());
  }

  identities.dedup();
  assert_eq!(identities.len(), 1);
  assert_eq!(env.runs(), vec!["abc123"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_commits_build_one_at_a_time() {
  let env = TestEnv::new();
  env.set_delay("0.2");
  let coordinator = env.coordinator(IdentityScheme::VirtualHost, BuildConfig::default());

  let a = tokio::spawn({
    let coordinator = coordinator.clone();
    async move { coordinator.ensure("abc123").await }
  });
  let b = tokio::spawn({
    let coordinator = coordinator.clone();
    async move { coordinator.ensure("def456").await }
  });
  a.await.unwrap().unwrap();
  b.await.unwrap().unwrap();

  let runs = env.runs();
  assert!(!runs.iter().any(|line| line == "overlap"), "builds overlapped: {:?}", runs);
  assert_eq!(env.runs_of("abc123"), 1);
  assert_eq!(env.runs_of("def456"), 1);
}

#[tokio::test]
async fn generator_failure_is_captured_and_replayed() {
  let env = TestEnv::new();
  env.fail("abc123");
  let coordinator = env.coordinator(IdentityScheme::VirtualHost, BuildConfig::default());

  let first = coordinator.ensure("abc123").await.unwrap_err();
  let second = coordinator.ensure("abc123").await.unwrap_err();

  assert!(matches!(first, BuildError::GenerationFailed(_)));
  // Color codes are stripped from the captured output.
  assert!(first.to_string().ends_with("\n\tError: missing layout"));
  assert_eq!(first, second);
  assert_eq!(env.runs_of("abc123"), 1);
  assert_eq!(coordinator.status("abc123"), Some(BuildStatus::Failed));
}

#[tokio::test]
async fn retry_policy_rebuilds_once_fixed() {
  let env = TestEnv::new();
  env.fail("abc123");
  let coordinator = env.coordinator(
    IdentityScheme::VirtualHost,
    BuildConfig {
      failures: FailurePolicy::Retry,
      ..BuildConfig::default()
    },
  );

  coordinator.ensure("abc123").await.unwrap_err();
  std::fs::remove_file(env.control().join("fail-abc123")).unwrap();
  coordinator.ensure("abc123").await.unwrap();

  assert_eq!(env.runs_of("abc123"), 2);
}

#[tokio::test]
async fn custom_not_found_page_over_socket() {
  let env = TestEnv::new();
  env.custom_404("def456");
  let coordinator = env.coordinator(IdentityScheme::EphemeralPort, BuildConfig::default());

  let abc = port_of(coordinator.ensure("abc123").await.unwrap());
  let def = port_of(coordinator.ensure("def456").await.unwrap());

  assert_eq!(
    fetch(def, "/missing.html").await,
    (404, "custom missing def456\n".to_string())
  );
  let (status, body) = fetch(abc, "/missing.html").await;
  assert_eq!(status, 404);
  assert!(!body.contains("custom missing"));

  coordinator.allocator().table().shutdown_all();
}

#[tokio::test]
async fn idle_port_is_closed_and_rebuilt_on_demand() {
  let env = TestEnv::new();
  let coordinator = env.coordinator(
    IdentityScheme::EphemeralPort,
    BuildConfig {
      cache: CachePolicy::IdleEviction(Duration::from_millis(300)),
      ..BuildConfig::default()
    },
  );

  let first = port_of(coordinator.ensure("abc123").await.unwrap());
  assert_eq!(fetch(first, "/").await.0, 200);

  tokio::time::sleep(Duration::from_millis(600)).await;
  assert!(wait_closed(first).await, "idle listener should be closed");
  assert_eq!(coordinator.status("abc123"), Some(BuildStatus::Pending));

  let second = port_of(coordinator.ensure("abc123").await.unwrap());
  assert_eq!(fetch(second, "/").await, (200, "<h1>abc123</h1>\n".to_string()));
  assert_eq!(env.runs_of("abc123"), 2);

  coordinator.allocator().table().shutdown_all();
}

#[tokio::test]
async fn steady_requests_keep_port_open() {
  let env = TestEnv::new();
  let coordinator = env.coordinator(
    IdentityScheme::EphemeralPort,
    BuildConfig {
      cache: CachePolicy::IdleEviction(Duration::from_millis(200)),
      ..BuildConfig::default()
    },
  );

  let port = port_of(coordinator.ensure("abc123").await.unwrap());
  for _ in 0..10 {
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(fetch(port, "/").await, (200, "<h1>abc123</h1>\n".to_string()));
  }

  assert_eq!(coordinator.status("abc123"), Some(BuildStatus::Done));
  assert_eq!(env.runs_of("abc123"), 1);

  coordinator.allocator().table().shutdown_all();
}

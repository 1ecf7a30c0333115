//! Shared test helpers for library integration tests.

use std::net::{IpAddr, Ipv4Addr};
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sitehistory_lib::build::{BuildConfig, BuildCoordinator, ExternalBuilder};
use sitehistory_lib::commits::CommitIndex;
use sitehistory_lib::generate::Generator;
use sitehistory_lib::git::Git;
use sitehistory_lib::route::{Allocator, IdentityScheme, RoutingTable};
use sitehistory_lib::worktree::WorkTree;
use tempfile::TempDir;

pub const LISTING: &str = "abc123 Initial commit\ndef456 Add feature\n";

/// Isolated environment with scripted git and generator.
///
/// The fake git records the checked-out id in the tree; the fake generator
/// renders `<h1>{id}</h1>`, appends the id to `runs.log`, and consults
/// `control/` for per-commit behavior:
/// - `fail-{id}`: exit 1 with "Error: missing layout" on stderr
/// - `404-{id}`: also write a custom `404.html`
/// - `delay`: seconds to sleep mid-build
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  pub fn new() -> Self {
    let env = Self {
      temp: TempDir::new().unwrap(),
    };
    std::fs::create_dir_all(env.tree()).unwrap();
    std::fs::create_dir_all(env.control()).unwrap();
    std::fs::create_dir_all(env.output()).unwrap();

    env.script(
      "git",
      r#"case "$1" in
  checkout)
    case "$2" in
      abc123|def456) echo "$2" > .checked-out ;;
      *) echo "error: pathspec '$2' did not match any file(s) known to git" >&2; exit 1 ;;
    esac
    ;;
  *) exit 0 ;;
esac"#,
    );

    env.script(
      "generator",
      &format!(
        r#"while [ $# -gt 0 ]; do
  case "$1" in
    -s) src="$2"; shift ;;
    -d) dest="$2"; shift ;;
  esac
  shift
done
control="{control}"
commit=$(cat "$src/.checked-out")
echo "$commit" >> "{log}"
mkdir "$src/.busy" 2>/dev/null || echo overlap >> "{log}"
if [ -f "$control/delay" ]; then sleep "$(cat "$control/delay")"; fi
rmdir "$src/.busy"
if [ -f "$control/fail-$commit" ]; then
  printf '\033[31mError: missing layout\033[0m\n' >&2
  exit 1
fi
mkdir -p "$dest"
echo "<h1>$commit</h1>" > "$dest/index.html"
if [ -f "$control/404-$commit" ]; then
  echo "custom missing $commit" > "$dest/404.html"
fi"#,
        control = env.control().display(),
        log = env.runs_log().display()
      ),
    );

    env
  }

  fn script(&self, name: &str, body: &str) {
    let path = self.temp.path().join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
  }

  pub fn tree(&self) -> PathBuf {
    self.temp.path().join("tree")
  }

  pub fn control(&self) -> PathBuf {
    self.temp.path().join("control")
  }

  pub fn output(&self) -> PathBuf {
    self.temp.path().join("output")
  }

  pub fn runs_log(&self) -> PathBuf {
    self.temp.path().join("runs.log")
  }

  fn program(&self, name: &str) -> String {
    self.temp.path().join(name).to_string_lossy().into_owned()
  }

  pub fn set_delay(&self, delay: &str) {
    std::fs::write(self.control().join("delay"), delay).unwrap();
  }

  pub fn fail(&self, commit: &str) {
    std::fs::write(self.control().join(format!("fail-{}", commit)), "").unwrap();
  }

  pub fn custom_404(&self, commit: &str) {
    std::fs::write(self.control().join(format!("404-{}", commit)), "").unwrap();
  }

  /// Lines the generator appended, in order.
  pub fn runs(&self) -> Vec<String> {
    match std::fs::read_to_string(self.runs_log()) {
      Ok(log) => log.lines().map(str::to_string).collect(),
      Err(_) => Vec::new(),
    }
  }

  pub fn runs_of(&self, commit: &str) -> usize {
    self.runs().iter().filter(|line| line.as_str() == commit).count()
  }

  pub fn coordinator(&self, scheme: IdentityScheme, config: BuildConfig) -> BuildCoordinator<ExternalBuilder> {
    let index = Arc::new(CommitIndex::parse(LISTING).unwrap());
    let builder = ExternalBuilder::new(Git::new(self.program("git")), Generator::new(self.program("generator"), true));
    let allocator = Allocator::new(
      scheme,
      IpAddr::V4(Ipv4Addr::LOCALHOST),
      Arc::new(RoutingTable::new()),
    );
    BuildCoordinator::new(index, builder, WorkTree::new(self.tree()), self.output(), allocator, config)
  }
}

/// Fetch `http://127.0.0.1:{port}{path}` and return status and body.
pub async fn fetch(port: u16, path: &str) -> (u16, String) {
  let response = reqwest::get(format!("http://127.0.0.1:{}{}", port, path)).await.unwrap();
  let status = response.status().as_u16();
  (status, response.text().await.unwrap())
}

/// Poll until nothing accepts connections on `port`.
pub async fn wait_closed(port: u16) -> bool {
  for _ in 0..100 {
    if tokio::net::TcpStream::connect(("127.0.0.1", port)).await.is_err() {
      return true;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
  }
  false
}

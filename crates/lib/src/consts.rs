use std::time::Duration;

/// Default port for the listing server.
pub const DEFAULT_PORT: u16 = 8080;

/// Default inactivity window before a per-commit identity is torn down.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Default time in-flight requests get to finish after shutdown is requested.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Default version-control client.
pub const DEFAULT_GIT_PROGRAM: &str = "git";

/// Default static-site generator.
pub const DEFAULT_GENERATOR_PROGRAM: &str = "jekyll";

/// Hosts that reach the listing router rather than a per-commit site.
pub const DEFAULT_LISTING_HOSTS: &[&str] = &["localhost", "127.0.0.1", "::1"];

/// Per-site page served in place of the generic not-found response.
pub const CUSTOM_NOT_FOUND_PAGE: &str = "404.html";

/// Upper bound on re-hash attempts when probing for a free address.
pub const MAX_ADDRESS_PROBES: usize = 256;

/// Idle time before the first keep-alive probe on accepted connections.
pub const TCP_KEEPALIVE_PERIOD: Duration = Duration::from_secs(3 * 60);

/// Pending-connection queue length for every listener.
pub const LISTEN_BACKLOG: u32 = 1024;

//! Settings for the listing server.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::consts::{DEFAULT_LISTING_HOSTS, DEFAULT_PORT, DEFAULT_SHUTDOWN_GRACE};

/// Configuration for [`crate::server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
  /// Name shown as the listing page title.
  pub repo: String,
  /// Interface the main listener binds to.
  pub bind: IpAddr,
  /// Port of the main listener. Zero picks a free one.
  pub port: u16,
  /// Host names (without port) that reach the listing routes.
  pub listing_hosts: Vec<String>,
  /// How long in-flight requests may take to finish on shutdown.
  pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      repo: String::new(),
      bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
      port: DEFAULT_PORT,
      listing_hosts: DEFAULT_LISTING_HOSTS.iter().map(|h| h.to_string()).collect(),
      shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
    }
  }
}

impl ServerConfig {
  pub fn addr(&self) -> SocketAddr {
    SocketAddr::new(self.bind, self.port)
  }

  /// Add an extra listing host, ignoring duplicates.
  pub fn with_listing_host(mut self, host: impl Into<String>) -> Self {
    let host = host.into().to_ascii_lowercase();
    if !self.listing_hosts.contains(&host) {
      self.listing_hosts.push(host);
    }
    self
  }

  pub fn is_listing_host(&self, host: &str) -> bool {
    self.listing_hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
  }
}

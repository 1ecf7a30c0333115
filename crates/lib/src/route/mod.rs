//! Routing identities for per-commit content.
//!
//! Each built commit is reachable under an [`Identity`]: either a synthetic
//! loopback address dispatched by host header on the main listener, or an
//! OS-assigned port with its own listener. The [`RoutingTable`] maps
//! identities to the sites behind them and is shared by the allocator (which
//! inserts), the host dispatcher (which reads) and idle eviction (which
//! removes).

pub mod address;
pub mod port;
pub mod table;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::build::BuildError;
use crate::site::Site;

pub use table::{Route, RoutingTable};

/// Where a commit's content can be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Identity {
  Address(Ipv4Addr),
  Port(u16),
}

impl Identity {
  /// Authority to redirect a client to.
  ///
  /// Addresses are reached through the main listener's port; ephemeral ports
  /// keep the host name the client already used.
  pub fn authority(&self, request_host: &str, listen_port: u16) -> String {
    match self {
      Identity::Address(addr) => format!("{}:{}", addr, listen_port),
      Identity::Port(port) => {
        if request_host.contains(':') && !request_host.starts_with('[') {
          format!("[{}]:{}", request_host, port)
        } else {
          format!("{}:{}", request_host, port)
        }
      }
    }
  }
}

impl fmt::Display for Identity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Identity::Address(addr) => write!(f, "{}", addr),
      Identity::Port(port) => write!(f, ":{}", port),
    }
  }
}

/// Which kind of identity new builds receive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IdentityScheme {
  /// Deterministic loopback address, served by host header.
  VirtualHost,
  /// OS-assigned port with a dedicated listener.
  #[default]
  EphemeralPort,
}

/// Hands out identities and registers the site behind each one.
#[derive(Debug, Clone)]
pub struct Allocator {
  scheme: IdentityScheme,
  bind: IpAddr,
  table: Arc<RoutingTable>,
}

impl Allocator {
  /// `bind` is the interface ephemeral listeners bind to.
  pub fn new(scheme: IdentityScheme, bind: IpAddr, table: Arc<RoutingTable>) -> Self {
    Self { scheme, bind, table }
  }

  pub fn scheme(&self) -> IdentityScheme {
    self.scheme
  }

  pub fn table(&self) -> &Arc<RoutingTable> {
    &self.table
  }

  /// Assign a fresh identity to `site` and register it.
  ///
  /// Never returns an identity that is already bound.
  pub async fn allocate(&self, commit: &str, site: Arc<Site>) -> Result<Identity, BuildError> {
    let identity = match self.scheme {
      IdentityScheme::VirtualHost => address::allocate(&self.table, commit, site)?,
      IdentityScheme::EphemeralPort => port::allocate(&self.table, self.bind, commit, site).await?,
    };

    info!(commit = %commit, identity = %identity, "allocated identity");
    Ok(identity)
  }

  /// Remove the route and stop its listener, if any.
  pub fn release(&self, identity: &Identity) -> Option<Route> {
    let route = self.table.remove(identity)?;
    route.shutdown();
    info!(commit = %route.site().commit(), identity = %identity, "released identity");
    Some(route)
  }
}

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio_util::sync::CancellationToken;

use super::Identity;
use crate::site::Site;

/// A registered site plus, for dedicated listeners, the token that stops it.
#[derive(Debug, Clone)]
pub struct Route {
  site: Arc<Site>,
  listener: Option<CancellationToken>,
}

impl Route {
  pub fn new(site: Arc<Site>) -> Self {
    Self { site, listener: None }
  }

  pub fn with_listener(site: Arc<Site>, listener: CancellationToken) -> Self {
    Self {
      site,
      listener: Some(listener),
    }
  }

  pub fn site(&self) -> &Arc<Site> {
    &self.site
  }

  /// Stop the dedicated listener, if this route has one.
  pub fn shutdown(&self) {
    if let Some(token) = &self.listener {
      token.cancel();
    }
  }
}

/// Concurrent identity → route map.
///
/// Readers share the lock; every insert is insert-if-absent under the write
/// lock, so an identity can never be registered twice.
#[derive(Debug, Default)]
pub struct RoutingTable {
  routes: RwLock<HashMap<Identity, Route>>,
}

impl RoutingTable {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn lookup(&self, identity: &Identity) -> Option<Arc<Site>> {
    self.read().get(identity).map(|route| Arc::clone(route.site()))
  }

  pub fn contains(&self, identity: &Identity) -> bool {
    self.read().contains_key(identity)
  }

  /// Insert `route` unless `identity` is taken. Returns whether it was
  /// inserted.
  pub fn try_insert(&self, identity: Identity, route: Route) -> bool {
    let mut routes = self.write();
    if routes.contains_key(&identity) {
      return false;
    }
    routes.insert(identity, route);
    true
  }

  pub fn remove(&self, identity: &Identity) -> Option<Route> {
    self.write().remove(identity)
  }

  /// Stop every dedicated listener. Routes stay registered.
  pub fn shutdown_all(&self) {
    for route in self.read().values() {
      route.shutdown();
    }
  }

  #[cfg(test)]
  pub(crate) fn len(&self) -> usize {
    self.read().len()
  }

  /// Holding the write lock lets allocation probe and insert atomically.
  pub(crate) fn write(&self) -> RwLockWriteGuard<'_, HashMap<Identity, Route>> {
    self.routes.write().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn read(&self) -> RwLockReadGuard<'_, HashMap<Identity, Route>> {
    self.routes.read().unwrap_or_else(|poisoned| poisoned.into_inner())
  }
}

//! Deterministic loopback addresses derived from commit ids.
//!
//! A commit id is hashed with 32-bit FNV-1a and the low 24 bits are placed
//! in 127.0.0.0/8. When the address is taken (or reserved) a zero byte is
//! appended to the hashed input and the hash recomputed, so the result only
//! depends on the id and the set of addresses already in use.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tracing::debug;

use super::{Identity, Route, RoutingTable};
use crate::build::BuildError;
use crate::consts::MAX_ADDRESS_PROBES;
use crate::site::Site;

const FNV_OFFSET: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// Byte appended to the input on each collision.
const PROBE_PAD: u8 = 0;

/// Addresses in the block that are never handed out.
const RESERVED: [Ipv4Addr; 3] = [
  Ipv4Addr::new(127, 0, 0, 0),
  Ipv4Addr::new(127, 0, 0, 1),
  Ipv4Addr::new(127, 255, 255, 255),
];

/// 32-bit FNV-1a. Order-sensitive, not cryptographic.
pub fn fnv1a32(bytes: &[u8]) -> u32 {
  let mut hash = FNV_OFFSET;
  for &byte in bytes {
    hash ^= u32::from(byte);
    hash = hash.wrapping_mul(FNV_PRIME);
  }
  hash
}

/// Place a hash inside 127.0.0.0/8.
pub fn loopback_for(hash: u32) -> Ipv4Addr {
  Ipv4Addr::from((127u32 << 24) | (hash & 0x00ff_ffff))
}

pub fn is_reserved(addr: Ipv4Addr) -> bool {
  RESERVED.contains(&addr)
}

/// First free address for `commit`, or `None` after `max_attempts` probes.
///
/// Pure: the same id and the same `taken` predicate give the same answer.
pub fn probe(commit: &str, max_attempts: usize, taken: impl Fn(Ipv4Addr) -> bool) -> Option<Ipv4Addr> {
  let mut input = commit.as_bytes().to_vec();

  for attempt in 0..max_attempts {
    let addr = loopback_for(fnv1a32(&input));
    if !is_reserved(addr) && !taken(addr) {
      return Some(addr);
    }
    debug!(commit = %commit, addr = %addr, attempt, "address collision, re-hashing");
    input.push(PROBE_PAD);
  }

  None
}

/// Probe and register under one write lock.
pub(super) fn allocate(table: &RoutingTable, commit: &str, site: Arc<Site>) -> Result<Identity, BuildError> {
  let mut routes = table.write();

  let addr = probe(commit, MAX_ADDRESS_PROBES, |addr| {
    routes.contains_key(&Identity::Address(addr))
  })
  .ok_or_else(|| BuildError::AllocationExhausted {
    commit: commit.to_string(),
    attempts: MAX_ADDRESS_PROBES,
  })?;

  let identity = Identity::Address(addr);
  routes.insert(identity, Route::new(site));
  Ok(identity)
}

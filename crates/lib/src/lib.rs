//! sitehistory-lib: Build and serve every commit of a static site
//!
//! This crate provides the pieces behind the `sitehistory` server:
//! - `CommitIndex`: the commit listing parsed once at startup
//! - `WorkTree`: exclusive access to the one shared working tree
//! - `BuildCoordinator`: single-flight checkout and generation per commit
//! - `Allocator`: loopback address or ephemeral port identities per commit
//! - `server`: listing, build-and-redirect, and host dispatch over HTTP

pub mod build;
pub mod capture;
pub mod commits;
pub mod config;
pub mod consts;
pub mod generate;
pub mod git;
pub mod net;
pub mod route;
pub mod server;
pub mod site;
pub mod worktree;

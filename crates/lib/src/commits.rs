//! Commit index built from a one-line-per-commit log listing.
//!
//! The listing is the output of `git log --oneline`: each line is
//! `"<id> <title>"`. The index is parsed once at startup and is read-only
//! afterwards, so it is shared as a plain `Arc<CommitIndex>`.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Commit {
  pub id: String,
  pub title: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommitIndexError {
  #[error("commit listing is empty")]
  Empty,

  #[error("malformed commit listing at line {line}: {content:?}")]
  Malformed { line: usize, content: String },

  #[error("commit {id} appears more than once in the listing")]
  Duplicate { id: String },
}

/// Ordered, immutable set of commits keyed by short id.
#[derive(Debug)]
pub struct CommitIndex {
  order: Vec<Commit>,
  by_id: HashMap<String, usize>,
}

impl CommitIndex {
  /// Parse a `git log --oneline` style listing.
  ///
  /// Splitting stops at the first space, so titles keep their own spaces.
  /// Blank lines are ignored; any other line without a separator fails the
  /// whole parse.
  pub fn parse(listing: &str) -> Result<Self, CommitIndexError> {
    let mut order = Vec::new();
    let mut by_id = HashMap::new();

    for (idx, raw) in listing.lines().enumerate() {
      let line = raw.trim_end_matches('\r');
      if line.trim().is_empty() {
        continue;
      }

      let Some((id, title)) = line.split_once(' ') else {
        return Err(CommitIndexError::Malformed {
          line: idx + 1,
          content: line.to_string(),
        });
      };

      if id.is_empty() {
        return Err(CommitIndexError::Malformed {
          line: idx + 1,
          content: line.to_string(),
        });
      }

      if by_id.insert(id.to_string(), order.len()).is_some() {
        return Err(CommitIndexError::Duplicate { id: id.to_string() });
      }

      order.push(Commit {
        id: id.to_string(),
        title: title.to_string(),
      });
    }

    if order.is_empty() {
      return Err(CommitIndexError::Empty);
    }

    Ok(Self { order, by_id })
  }

  /// Title of the commit, if it is part of the history.
  pub fn lookup(&self, id: &str) -> Option<&str> {
    self.by_id.get(id).map(|&i| self.order[i].title.as_str())
  }

  pub fn contains(&self, id: &str) -> bool {
    self.by_id.contains_key(id)
  }

  /// All commits in listing order (newest first for `git log`).
  pub fn all(&self) -> impl Iterator<Item = &Commit> {
    self.order.iter()
  }

  pub fn len(&self) -> usize {
    self.order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.order.is_empty()
  }
}

//! Subprocess execution with stderr capture.
//!
//! External tools (git, the site generator) report failures on stderr. The
//! stream is mirrored to the operator's console as it arrives and kept in
//! memory so a failed run can be turned into a [`Diagnostic`] for the error
//! page.

use std::fmt;
use std::io;
use std::process::Stdio;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, warn};

/// Formatted report of a failed external command.
///
/// `summary` is the short description of what failed. `detail` is the
/// captured stderr with terminal escapes removed, trailing whitespace trimmed
/// and every internal newline indented with a tab.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
  summary: String,
  detail: String,
}

impl Diagnostic {
  pub fn new(summary: impl Into<String>, stderr: &[u8]) -> Self {
    Self {
      summary: summary.into(),
      detail: normalize_stderr(stderr),
    }
  }

  /// A diagnostic with no captured output.
  pub fn summary_only(summary: impl Into<String>) -> Self {
    Self::new(summary, &[])
  }

  pub fn summary(&self) -> &str {
    &self.summary
  }

  pub fn detail(&self) -> &str {
    &self.detail
  }
}

impl fmt::Display for Diagnostic {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.detail.is_empty() {
      write!(f, "{}", self.summary)
    } else {
      write!(f, "{}\n\t{}", self.summary, self.detail)
    }
  }
}

/// Strip color/control sequences, trim, and tab-indent continuation lines.
pub fn normalize_stderr(stderr: &[u8]) -> String {
  // Progress output redraws lines with a bare carriage return, which the
  // escape stripper would otherwise drop and run the lines together.
  let text = String::from_utf8_lossy(stderr).replace("\r\n", "\n").replace('\r', "\n");
  let stripped = strip_ansi_escapes::strip_str(&text);
  stripped.trim_end().replace('\n', "\n\t")
}

#[derive(Debug, Error)]
pub enum CommandError {
  #[error("failed to start {command}: {source}")]
  Spawn {
    command: String,
    #[source]
    source: io::Error,
  },

  #[error("i/o error while running {command}: {source}")]
  Io {
    command: String,
    #[source]
    source: io::Error,
  },

  #[error("{}", .0.summary())]
  Failed(Diagnostic),
}

impl CommandError {
  /// Collapse into the diagnostic shown to the requester.
  pub fn into_diagnostic(self) -> Diagnostic {
    match self {
      CommandError::Failed(diagnostic) => diagnostic,
      other => Diagnostic::summary_only(other.to_string()),
    }
  }
}

/// Run `command` to completion; stdout goes straight to the console.
///
/// `description` names the command in logs and in the diagnostic summary,
/// e.g. `"git checkout abc123"`.
pub async fn run_captured(command: &mut Command, description: &str) -> Result<(), CommandError> {
  command.stdout(Stdio::inherit());
  run(command, description).await.map(|_| ())
}

/// Run `command` to completion and return its stdout.
pub async fn read_captured(command: &mut Command, description: &str) -> Result<String, CommandError> {
  command.stdout(Stdio::piped());
  let stdout = run(command, description).await?;
  Ok(String::from_utf8_lossy(&stdout).into_owned())
}

async fn run(command: &mut Command, description: &str) -> Result<Vec<u8>, CommandError> {
  command.stdin(Stdio::null()).stderr(Stdio::piped());

  debug!(command = %description, "spawning process");

  let mut child = command.spawn().map_err(|source| CommandError::Spawn {
    command: description.to_string(),
    source,
  })?;

  let stderr = child.stderr.take();
  let stdout = child.stdout.take();

  let io_err = |source: io::Error| CommandError::Io {
    command: description.to_string(),
    source,
  };

  let (captured, output) = tokio::try_join!(mirror_stderr(stderr), collect(stdout)).map_err(io_err)?;
  let status = child.wait().await.map_err(io_err)?;

  if !status.success() {
    let diagnostic = Diagnostic::new(format!("{}: {}", description, status), &captured);
    warn!(command = %description, code = ?status.code(), "command failed");
    return Err(CommandError::Failed(diagnostic));
  }

  Ok(output)
}

/// Copy the pipe to our own stderr while keeping every byte.
async fn mirror_stderr<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
  let Some(mut pipe) = pipe else {
    return Ok(Vec::new());
  };

  let mut console = tokio::io::stderr();
  let mut captured = Vec::new();
  let mut buf = [0u8; 4096];

  loop {
    let n = pipe.read(&mut buf).await?;
    if n == 0 {
      break;
    }
    // Console mirroring is best effort.
    let _ = console.write_all(&buf[..n]).await;
    captured.extend_from_slice(&buf[..n]);
  }

  let _ = console.flush().await;
  Ok(captured)
}

async fn collect<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
  let mut out = Vec::new();
  if let Some(mut pipe) = pipe {
    pipe.read_to_end(&mut out).await?;
  }
  Ok(out)
}

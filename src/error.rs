use std::io;

use thiserror::Error;

/// Errors that can terminate startup before the acceptor loop begins.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read {path}: {source}")]
  Read { path: String, source: io::Error },
  #[error("failed to parse {path}: {source}")]
  Parse {
    path: String,
    source: serde_json::Error,
  },
}

/// Errors produced while resolving an FTP-style path against a session's root jail.
#[derive(Debug, Error)]
pub enum ResolveError {
  #[error("path escapes root jail")]
  OutsideRoot,
  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ConfigError;

/// Server-wide settings, immutable after load.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerConfig {
  #[serde(default = "default_root")]
  pub root: PathBuf,
  #[serde(default = "default_bind")]
  pub bind: String,
  #[serde(default = "default_control_port")]
  pub control_port: u16,
  #[serde(default = "default_pasv_min")]
  pub pasv_min: u16,
  #[serde(default = "default_pasv_max")]
  pub pasv_max: u16,
  #[serde(default = "default_pre_login_idle_seconds")]
  pub pre_login_idle_seconds: u64,
  #[serde(default = "default_post_login_idle_seconds")]
  pub post_login_idle_seconds: u64,
  #[serde(default = "default_allow_anonymous")]
  pub allow_anonymous: bool,
}

fn default_root() -> PathBuf {
  PathBuf::from("./ftp_root")
}
fn default_bind() -> String {
  "0.0.0.0".to_string()
}
fn default_control_port() -> u16 {
  21
}
fn default_pasv_min() -> u16 {
  50000
}
fn default_pasv_max() -> u16 {
  50100
}
fn default_pre_login_idle_seconds() -> u64 {
  120
}
fn default_post_login_idle_seconds() -> u64 {
  300
}
fn default_allow_anonymous() -> bool {
  true
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      root: default_root(),
      bind: default_bind(),
      control_port: default_control_port(),
      pasv_min: default_pasv_min(),
      pasv_max: default_pasv_max(),
      pre_login_idle_seconds: default_pre_login_idle_seconds(),
      post_login_idle_seconds: default_post_login_idle_seconds(),
      allow_anonymous: default_allow_anonymous(),
    }
  }
}

/// A single entry in the auth directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserRecord {
  pub username: String,
  pub password: String,
}

/// Loads `server.json`, falling back to defaults when the path is the default
/// location and does not exist. An explicitly-named missing file, or a file
/// that fails to parse, is startup-fatal.
pub fn load_server_config(path: &str, is_default_path: bool) -> Result<ServerConfig, ConfigError> {
  let text = match std::fs::read_to_string(path) {
    Ok(text) => text,
    Err(e) if is_default_path && e.kind() == std::io::ErrorKind::NotFound => {
      return Ok(ServerConfig::default());
    }
    Err(source) => {
      return Err(ConfigError::Read {
        path: path.to_string(),
        source,
      })
    }
  };
  serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
    path: path.to_string(),
    source,
  })
}

/// Loads `users.json`. A missing file at the default location is treated as
/// an empty registry; an explicitly-named missing file is startup-fatal.
pub fn load_users(path: &str, is_default_path: bool) -> Result<Vec<UserRecord>, ConfigError> {
  let text = match std::fs::read_to_string(path) {
    Ok(text) => text,
    Err(e) if is_default_path && e.kind() == std::io::ErrorKind::NotFound => {
      return Ok(Vec::new());
    }
    Err(source) => {
      return Err(ConfigError::Read {
        path: path.to_string(),
        source,
      })
    }
  };
  serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
    path: path.to_string(),
    source,
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_spec() {
    let cfg = ServerConfig::default();
    assert_eq!(cfg.root, PathBuf::from("./ftp_root"));
    assert_eq!(cfg.bind, "0.0.0.0");
    assert_eq!(cfg.control_port, 21);
    assert_eq!(cfg.pasv_min, 50000);
    assert_eq!(cfg.pasv_max, 50100);
    assert_eq!(cfg.pre_login_idle_seconds, 120);
    assert_eq!(cfg.post_login_idle_seconds, 300);
    assert!(cfg.allow_anonymous);
  }

  #[test]
  fn missing_default_path_falls_back() {
    let cfg = load_server_config("/nonexistent/server.json", true).unwrap();
    assert_eq!(cfg.control_port, 21);
  }

  #[test]
  fn missing_explicit_path_is_fatal() {
    assert!(load_server_config("/nonexistent/server.json", false).is_err());
  }

  #[test]
  fn partial_json_fills_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("server.json");
    std::fs::write(&path, r#"{"ControlPort": 2121}"#).unwrap();
    let cfg = load_server_config(path.to_str().unwrap(), false).unwrap();
    assert_eq!(cfg.control_port, 2121);
    assert_eq!(cfg.pasv_min, 50000);
  }
}

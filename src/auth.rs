use crate::config::UserRecord;

/// In-memory username→password registry loaded at startup.
/// A missing or empty list is valid; anonymous login is governed separately
/// by `ServerConfig::allow_anonymous`.
pub struct AuthDirectory {
  users: Vec<UserRecord>,
}

impl AuthDirectory {
  pub fn new(users: Vec<UserRecord>) -> Self {
    Self { users }
  }

  /// Case-sensitive exact match on username.
  pub fn lookup(&self, username: &str) -> Option<&UserRecord> {
    self.users.iter().find(|u| u.username == username)
  }

  /// Cleartext equality; no hashing.
  pub fn verify(&self, username: &str, password: &str) -> bool {
    matches!(self.lookup(username), Some(record) if record.password == password)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn directory() -> AuthDirectory {
    AuthDirectory::new(vec![UserRecord {
      username: "alice".to_string(),
      password: "s3cret".to_string(),
    }])
  }

  #[test]
  fn exact_match_succeeds() {
    assert!(directory().verify("alice", "s3cret"));
  }

  #[test]
  fn wrong_password_fails() {
    assert!(!directory().verify("alice", "wrong"));
  }

  #[test]
  fn username_match_is_case_sensitive() {
    assert!(!directory().verify("Alice", "s3cret"));
  }

  #[test]
  fn empty_directory_is_valid() {
    let empty = AuthDirectory::new(Vec::new());
    assert!(!empty.verify("anyone", "anything"));
  }
}

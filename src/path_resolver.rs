use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::ResolveError;

/// A single LIST line's raw ingredients, ordered so directories sort first.
struct Entry {
  is_dir: bool,
  size: u64,
  modified: std::time::SystemTime,
  name: String,
}

/// Translates FTP-style paths to physical paths under a per-session root,
/// enforcing the jail, and tracks the virtual CWD.
pub struct PathResolver {
  root_path: PathBuf,
  cwd_virtual: String,
}

impl PathResolver {
  /// `root` is created if missing and canonicalized.
  pub fn new(root: &Path) -> Result<Self, ResolveError> {
    fs::create_dir_all(root)?;
    Ok(Self {
      root_path: root.canonicalize()?,
      cwd_virtual: "/".to_string(),
    })
  }

  pub fn cwd_virtual(&self) -> &str {
    &self.cwd_virtual
  }

  pub fn root_path(&self) -> &Path {
    &self.root_path
  }

  /// Replaces the root and resets the virtual CWD to "/".
  pub fn set_root(&mut self, root: &Path) -> Result<(), ResolveError> {
    fs::create_dir_all(root)?;
    self.root_path = root.canonicalize()?;
    self.cwd_virtual = "/".to_string();
    Ok(())
  }

  /// Concatenate `a` and `b` with a single `/` separator, process `.`/`..`
  /// left to right, and emit a normalized `/`-rooted path.
  pub fn virtual_join(a: &str, b: &str) -> String {
    // An absolute `b` anchors at the virtual root regardless of `a`.
    let a = if b.starts_with('/') { "/" } else { a };
    let combined = format!("{a}/{b}");
    let mut stack: Vec<&str> = Vec::new();
    for segment in combined.split('/') {
      match segment {
        "" | "." => {}
        ".." => {
          stack.pop();
        }
        other => stack.push(other),
      }
    }
    format!("/{}", stack.join("/"))
  }

  /// Resolve an FTP path argument to a physical path, enforcing the root
  /// jail. Does not require the path to exist.
  pub fn resolve(&self, argument: &str) -> Result<PathBuf, ResolveError> {
    let rel = Self::virtual_join(&self.cwd_virtual, argument);

    let stripped = rel.strip_prefix('/').unwrap_or(&rel);
    let candidate = if stripped.is_empty() {
      self.root_path.clone()
    } else {
      self.root_path.join(stripped)
    };

    let physical = canonicalize_lossy(&candidate);
    if !within_root(&physical, &self.root_path) {
      return Err(ResolveError::OutsideRoot);
    }
    Ok(physical)
  }

  /// Resolve `arg`; if it names an existing directory, update `cwd_virtual`
  /// to its root-relative form and return `true`.
  pub fn try_change_dir(&mut self, arg: &str) -> bool {
    match self.resolve(arg) {
      Ok(physical) if physical.is_dir() => {
        self.cwd_virtual = relative_virtual(&physical, &self.root_path);
        true
      }
      _ => false,
    }
  }

  /// Resolve `arg`; if it names an existing directory, list its immediate
  /// children formatted as "Mon DD HH:MM" with owner/group literals,
  /// directories before files.
  pub fn to_unix_list_lines(&self, arg: &str) -> Vec<String> {
    let Ok(physical) = self.resolve(arg) else {
      return Vec::new();
    };
    if !physical.is_dir() {
      return Vec::new();
    }
    let Ok(read_dir) = fs::read_dir(&physical) else {
      return Vec::new();
    };

    let mut entries: Vec<Entry> = Vec::new();
    for dirent in read_dir.flatten() {
      let Ok(metadata) = dirent.metadata() else {
        continue;
      };
      let Ok(modified) = metadata.modified() else {
        continue;
      };
      entries.push(Entry {
        is_dir: metadata.is_dir(),
        size: if metadata.is_dir() { 0 } else { metadata.len() },
        modified,
        name: dirent.file_name().to_string_lossy().to_string(),
      });
    }
    entries.sort_by_key(|e| !e.is_dir);

    entries.iter().map(format_list_line).collect()
  }
}

fn format_list_line(entry: &Entry) -> String {
  let perms = if entry.is_dir {
    "drwxr-xr-x"
  } else {
    "-rw-r--r--"
  };
  let date = DateTime::<Local>::from(entry.modified).format("%b %d %H:%M");
  format!(
    "{perms} 1 owner group {:>10} {date} {}",
    entry.size, entry.name
  )
}

/// `Path::canonicalize` requires the path to exist; for jail checks on
/// not-yet-existing targets (MKD, STOR) canonicalize the longest existing
/// ancestor and re-append the remaining components lexically.
fn canonicalize_lossy(path: &Path) -> PathBuf {
  let mut ancestor = path.to_path_buf();
  let mut tail: Vec<std::ffi::OsString> = Vec::new();
  while !ancestor.exists() {
    match ancestor.file_name() {
      Some(name) => tail.push(name.to_os_string()),
      None => break,
    }
    if !ancestor.pop() {
      break;
    }
  }
  let mut canon = ancestor.canonicalize().unwrap_or(ancestor);
  for segment in tail.into_iter().rev() {
    canon.push(segment);
  }
  canon
}

fn within_root(physical: &Path, root: &Path) -> bool {
  let physical_s = physical.to_string_lossy().to_lowercase();
  let root_s = root.to_string_lossy().to_lowercase();
  physical_s == root_s || physical_s.starts_with(&format!("{root_s}/"))
    || physical_s.starts_with(&format!("{root_s}\\"))
}

fn relative_virtual(physical: &Path, root: &Path) -> String {
  let rel = physical.strip_prefix(root).unwrap_or(Path::new(""));
  let normalized = rel
    .components()
    .map(|c| c.as_os_str().to_string_lossy().to_string())
    .collect::<Vec<_>>()
    .join("/");
  if normalized.is_empty() {
    "/".to_string()
  } else {
    format!("/{normalized}")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn resolver() -> (tempfile::TempDir, PathResolver) {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
    std::fs::write(dir.path().join("a/file.txt"), b"hi").unwrap();
    let resolver = PathResolver::new(dir.path()).unwrap();
    (dir, resolver)
  }

  #[test]
  fn virtual_join_handles_dot_and_dotdot() {
    assert_eq!(PathResolver::virtual_join("/", "a/../b"), "/b");
    assert_eq!(PathResolver::virtual_join("/a/b", ".."), "/a");
    assert_eq!(PathResolver::virtual_join("/", ".."), "/");
    assert_eq!(PathResolver::virtual_join("/a", "./b/./c"), "/a/b/c");
  }

  #[test]
  fn virtual_join_is_consistent_regardless_of_cwd() {
    for cwd in ["/", "/a", "/a/b/c"] {
      assert_eq!(
        PathResolver::virtual_join("/", "x/y"),
        PathResolver::virtual_join(cwd, "/x/y")
      );
    }
  }

  #[test]
  fn cwd_tracks_into_subdirectories_and_back() {
    let (_dir, mut resolver) = resolver();
    assert!(resolver.try_change_dir("a"));
    assert_eq!(resolver.cwd_virtual(), "/a");
    assert!(resolver.try_change_dir("b"));
    assert_eq!(resolver.cwd_virtual(), "/a/b");
    assert!(resolver.try_change_dir(".."));
    assert_eq!(resolver.cwd_virtual(), "/a");
    assert!(resolver.try_change_dir(".."));
    assert_eq!(resolver.cwd_virtual(), "/");
  }

  #[test]
  fn dotdot_at_root_is_noop_success() {
    let (_dir, mut resolver) = resolver();
    assert!(resolver.try_change_dir(".."));
    assert_eq!(resolver.cwd_virtual(), "/");
  }

  #[test]
  fn cwd_into_missing_dir_fails() {
    let (_dir, mut resolver) = resolver();
    assert!(!resolver.try_change_dir("nope"));
    assert_eq!(resolver.cwd_virtual(), "/");
  }

  #[test]
  fn dotdot_traversal_past_root_stays_inside_root() {
    // The virtual join collapses ".." at "/" to a no-op, so this maps
    // inside root (to a path that happens not to exist) rather than escaping.
    let (dir, resolver) = resolver();
    let resolved = resolver.resolve("../../../etc/passwd").unwrap();
    assert_eq!(resolved, dir.path().join("etc/passwd"));
  }

  #[test]
  fn deep_dotdot_traversal_via_cwd_stays_inside_root() {
    let (dir, mut resolver) = resolver();
    assert!(resolver.try_change_dir("a/b"));
    let resolved = resolver.resolve("../../../../etc").unwrap();
    assert_eq!(resolved, dir.path().join("etc"));
  }

  #[test]
  fn symlink_escaping_root_is_denied() {
    let (dir, resolver) = resolver();
    let outside = tempfile::tempdir().unwrap();
    std::fs::write(outside.path().join("secret.txt"), b"shh").unwrap();
    #[cfg(unix)]
    std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

    #[cfg(unix)]
    assert!(matches!(
      resolver.resolve("escape/secret.txt"),
      Err(ResolveError::OutsideRoot)
    ));
  }

  #[test]
  fn list_lines_put_directories_first() {
    let (_dir, mut resolver) = resolver();
    assert!(resolver.try_change_dir("a"));
    let lines = resolver.to_unix_list_lines(".");
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with('d'));
    assert!(lines[1].starts_with('-'));
    assert!(lines[1].contains("file.txt"));
  }

  #[test]
  fn list_on_nonexistent_dir_is_empty() {
    let (_dir, resolver) = resolver();
    assert!(resolver.to_unix_list_lines("nope").is_empty());
  }
}

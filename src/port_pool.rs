use std::collections::HashSet;

use tokio::sync::Mutex;

/// Thread-safe bounded pool of TCP ports for passive data listeners.
/// Acquisitions are tracked explicitly so release is meaningful and acquire
/// is linearizable under concurrent callers.
pub struct PortPool {
  min: u16,
  max: u16,
  acquired: Mutex<HashSet<u16>>,
}

impl PortPool {
  pub fn new(min: u16, max: u16) -> Self {
    Self {
      min,
      max,
      acquired: Mutex::new(HashSet::new()),
    }
  }

  /// Returns the lowest-numbered port in `[min, max]` not currently
  /// acquired, marking it acquired. `None` if the pool is exhausted.
  pub async fn try_acquire(&self) -> Option<u16> {
    let mut acquired = self.acquired.lock().await;
    for port in self.min..=self.max {
      if acquired.insert(port) {
        return Some(port);
      }
    }
    None
  }

  /// Removes `port` from the acquired set. A no-op if it was not acquired.
  pub async fn release(&self, port: u16) {
    self.acquired.lock().await.remove(&port);
  }

  #[cfg(test)]
  pub async fn acquired_count(&self) -> usize {
    self.acquired.lock().await.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[tokio::test]
  async fn acquire_returns_lowest_free_port() {
    let pool = PortPool::new(50000, 50002);
    assert_eq!(pool.try_acquire().await, Some(50000));
    assert_eq!(pool.try_acquire().await, Some(50001));
    assert_eq!(pool.try_acquire().await, Some(50002));
    assert_eq!(pool.try_acquire().await, None);
  }

  #[tokio::test]
  async fn release_is_idempotent_and_frees_the_port() {
    let pool = PortPool::new(50000, 50000);
    let port = pool.try_acquire().await.unwrap();
    pool.release(port).await;
    pool.release(port).await;
    assert_eq!(pool.try_acquire().await, Some(port));
  }

  #[tokio::test]
  async fn release_of_unacquired_port_is_noop() {
    let pool = PortPool::new(50000, 50001);
    pool.release(50000).await;
    assert_eq!(pool.acquired_count().await, 0);
  }

  #[tokio::test]
  async fn concurrent_acquires_never_double_issue_a_port() {
    let pool = Arc::new(PortPool::new(50000, 50063));
    let mut tasks = Vec::new();
    for _ in 0..64 {
      let pool = pool.clone();
      tasks.push(tokio::spawn(async move { pool.try_acquire().await }));
    }
    let mut seen = HashSet::new();
    for task in tasks {
      let port = task.await.unwrap().expect("pool should not be exhausted");
      assert!(seen.insert(port), "port {port} issued twice");
    }
    assert_eq!(pool.try_acquire().await, None);
  }
}

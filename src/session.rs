use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};

use crate::error::ResolveError;
use crate::path_resolver::PathResolver;
use crate::port_pool::PortPool;

const PASV_ACCEPT_TIMEOUT: Duration = Duration::from_secs(15);

/// Per-connection state: login, pending user, current directory, and at most
/// one outstanding passive listener. Destroyed when the control
/// connection closes.
pub struct Session {
  pub logged_in: bool,
  pub pending_user: String,
  pub user_name: String,
  resolver: PathResolver,
  pasv: Option<(TcpListener, u16)>,
}

impl Session {
  pub fn new(server_root: &Path) -> Result<Self, ResolveError> {
    Ok(Self {
      logged_in: false,
      pending_user: String::new(),
      user_name: String::new(),
      resolver: PathResolver::new(server_root)?,
      pasv: None,
    })
  }

  pub fn resolver(&self) -> &PathResolver {
    &self.resolver
  }

  pub fn resolver_mut(&mut self) -> &mut PathResolver {
    &mut self.resolver
  }

  /// Completes a successful login: sets `rootPath` to `home` (created if
  /// missing), resets the virtual CWD, and marks the session logged in.
  pub fn complete_login(&mut self, user_name: &str, home: &Path) -> Result<(), ResolveError> {
    self.resolver.set_root(home)?;
    self.logged_in = true;
    self.user_name = user_name.to_string();
    Ok(())
  }

  /// Computes the IP advertised in PASV replies:
  /// control-connection local address, overridden by a non-wildcard bind
  /// address, wildcard substituted for loopback, normalized to IPv4.
  pub fn passive_reply_address(control_local_ip: IpAddr, configured_bind: &str) -> Ipv4Addr {
    let mut candidate = control_local_ip;
    if let Ok(bind_ip) = configured_bind.parse::<IpAddr>() {
      if !bind_ip.is_unspecified() {
        candidate = bind_ip;
      }
    }
    if candidate.is_unspecified() {
      candidate = IpAddr::V4(Ipv4Addr::LOCALHOST);
    }
    match candidate {
      IpAddr::V4(v4) => v4,
      IpAddr::V6(v6) => v6.to_ipv4().unwrap_or(Ipv4Addr::LOCALHOST),
    }
  }

  /// Opens a new passive listener, closing any previously outstanding one
  /// first. Tries successive ports from the pool until a bind succeeds or
  /// the pool is exhausted.
  pub async fn try_open_pasv(&mut self, pool: &PortPool, bind_ip: &str) -> Option<u16> {
    self.close_pasv(pool).await;
    loop {
      let port = pool.try_acquire().await?;
      match TcpListener::bind((bind_ip, port)).await {
        Ok(listener) => {
          self.pasv = Some((listener, port));
          return Some(port);
        }
        Err(_) => {
          pool.release(port).await;
        }
      }
    }
  }

  /// Awaits exactly one inbound connection on the outstanding PASV listener
  /// with a 15-second deadline. Always closes the listener and releases its
  /// port before returning, regardless of outcome.
  pub async fn accept_data(&mut self, pool: &PortPool) -> Option<TcpStream> {
    let (listener, port) = self.pasv.take()?;
    let result = tokio::time::timeout(PASV_ACCEPT_TIMEOUT, listener.accept()).await;
    pool.release(port).await;
    match result {
      Ok(Ok((stream, _))) => Some(stream),
      _ => None,
    }
  }

  /// Idempotent: if a listener is outstanding, drop it and release its port.
  pub async fn close_pasv(&mut self, pool: &PortPool) {
    if let Some((_listener, port)) = self.pasv.take() {
      pool.release(port).await;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn passive_reply_address_prefers_nonwildcard_bind() {
    let addr = Session::passive_reply_address("10.0.0.5".parse().unwrap(), "192.168.1.10");
    assert_eq!(addr, Ipv4Addr::new(192, 168, 1, 10));
  }

  #[test]
  fn passive_reply_address_falls_back_to_control_local_addr() {
    let addr = Session::passive_reply_address("10.0.0.5".parse().unwrap(), "0.0.0.0");
    assert_eq!(addr, Ipv4Addr::new(10, 0, 0, 5));
  }

  #[test]
  fn passive_reply_address_substitutes_loopback_for_wildcards() {
    let addr = Session::passive_reply_address("0.0.0.0".parse().unwrap(), "0.0.0.0");
    assert_eq!(addr, Ipv4Addr::LOCALHOST);
  }

  #[tokio::test]
  async fn pasv_then_accept_releases_port() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new(dir.path()).unwrap();
    let pool = PortPool::new(50900, 50910);
    let port = session.try_open_pasv(&pool, "127.0.0.1").await.unwrap();
    assert_eq!(pool.acquired_count().await, 1);

    let connector = tokio::spawn(async move {
      tokio::net::TcpStream::connect(("127.0.0.1", port))
        .await
        .unwrap()
    });
    let accepted = session.accept_data(&pool).await;
    assert!(accepted.is_some());
    connector.await.unwrap();
    assert_eq!(pool.acquired_count().await, 0);
  }

  #[tokio::test]
  async fn reopening_pasv_closes_the_previous_listener() {
    let dir = tempfile::tempdir().unwrap();
    let mut session = Session::new(dir.path()).unwrap();
    let pool = PortPool::new(50920, 50930);
    session.try_open_pasv(&pool, "127.0.0.1").await.unwrap();
    assert_eq!(pool.acquired_count().await, 1);
    session.try_open_pasv(&pool, "127.0.0.1").await.unwrap();
    assert_eq!(pool.acquired_count().await, 1);
  }
}

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::auth::AuthDirectory;
use crate::config::ServerConfig;
use crate::port_pool::PortPool;
use crate::protocol::handle_connection;

/// Binds the control port, accepts clients, spawns a session per connection,
/// and coordinates graceful shutdown.
pub struct Server {
  config: Arc<ServerConfig>,
  auth: Arc<AuthDirectory>,
  pool: Arc<PortPool>,
}

impl Server {
  pub fn new(config: ServerConfig, auth: AuthDirectory) -> Self {
    let pool = PortPool::new(config.pasv_min, config.pasv_max);
    Self {
      config: Arc::new(config),
      auth: Arc::new(auth),
      pool: Arc::new(pool),
    }
  }

  /// Runs the accept loop until an OS interrupt signal arrives, then stops
  /// accepting and waits for every in-flight session to finish.
  pub async fn run(&self) -> anyhow::Result<()> {
    let listener = TcpListener::bind((self.config.bind.as_str(), self.config.control_port))
      .await
      .with_context(|| {
        format!(
          "failed to bind {}:{}",
          self.config.bind, self.config.control_port
        )
      })?;
    info!(
      bind = %self.config.bind,
      port = self.config.control_port,
      root = %self.config.root.display(),
      "listening"
    );
    self.serve(listener).await
  }

  /// Runs the accept loop over an already-bound listener. Split out from
  /// [`Server::run`] so integration tests can bind an ephemeral port and
  /// learn the assigned address before serving.
  pub async fn serve(&self, listener: TcpListener) -> anyhow::Result<()> {
    let mut sessions = JoinSet::new();

    loop {
      tokio::select! {
        accepted = listener.accept() => {
          match accepted {
            Ok((stream, addr)) => {
              info!(remote = %addr, "accepted connection");
              let config = self.config.clone();
              let auth = self.auth.clone();
              let pool = self.pool.clone();
              sessions.spawn(async move {
                handle_connection(stream, config, auth, pool).await;
              });
            }
            Err(e) => {
              error!(error = %e, "accept failed");
            }
          }
        }
        _ = tokio::signal::ctrl_c() => {
          info!("shutdown signal received, draining sessions");
          break;
        }
      }
    }

    while sessions.join_next().await.is_some() {}
    info!("all sessions drained, exiting");
    Ok(())
  }
}

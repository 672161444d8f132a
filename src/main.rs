use anyhow::Context;

use miniftpd::auth::AuthDirectory;
use miniftpd::cli;
use miniftpd::config;
use miniftpd::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .init();

  let args = cli::Args::parse_args();

  let server_config = config::load_server_config(&args.server, args.server_is_default())
    .context("loading server config")?;
  let users = config::load_users(&args.users, args.users_is_default()).context("loading users")?;

  std::fs::create_dir_all(&server_config.root).context("creating server root")?;
  let server_config = config::ServerConfig {
    root: server_config.root.canonicalize().context("canonicalizing server root")?,
    ..server_config
  };

  let auth = AuthDirectory::new(users);
  let server = Server::new(server_config, auth);
  server.run().await
}

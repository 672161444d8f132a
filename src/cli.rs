use clap::Parser;

/// Minimal FTP (RFC 959 subset) server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// Path to the server config JSON document.
  #[arg(long, default_value_t = String::from("server.json"))]
  pub server: String,

  /// Path to the users config JSON document.
  #[arg(long, default_value_t = String::from("users.json"))]
  pub users: String,
}

impl Args {
  pub fn parse_args() -> Args {
    Parser::parse()
  }

  pub fn server_is_default(&self) -> bool {
    self.server == "server.json"
  }

  pub fn users_is_default(&self) -> bool {
    self.users == "users.json"
  }
}

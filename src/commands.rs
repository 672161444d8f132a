/// The fixed command vocabulary this server understands. Any
/// other token parses to `Unknown` and is answered with `502`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FtpCommand {
  Noop,
  Opts(String),
  Syst,
  Type(String),
  Feat,
  User(String),
  Pass(String),
  Pwd,
  Cwd(String),
  Cdup,
  Pasv,
  List(Option<String>),
  Retr(String),
  Stor(String),
  Dele(String),
  Mkd(String),
  Rmd(String),
  Quit,
  Unknown(String),
}

/// Trim, split on the first space; command = uppercased first token;
/// argument = the remainder, trimmed (empty if no space).
pub fn parse_command(line: &str) -> FtpCommand {
  let line = line.trim();
  let (cmd, arg) = match line.split_once(' ') {
    Some((cmd, rest)) => (cmd, rest.trim()),
    None => (line, ""),
  };
  let cmd = cmd.to_uppercase();

  match cmd.as_str() {
    "NOOP" => FtpCommand::Noop,
    "OPTS" => FtpCommand::Opts(arg.to_string()),
    "SYST" => FtpCommand::Syst,
    "TYPE" => FtpCommand::Type(arg.to_string()),
    "FEAT" => FtpCommand::Feat,
    "USER" => FtpCommand::User(arg.to_string()),
    "PASS" => FtpCommand::Pass(arg.to_string()),
    "PWD" => FtpCommand::Pwd,
    "CWD" => FtpCommand::Cwd(arg.to_string()),
    "CDUP" => FtpCommand::Cdup,
    "PASV" => FtpCommand::Pasv,
    "LIST" => FtpCommand::List(if arg.is_empty() {
      None
    } else {
      Some(arg.to_string())
    }),
    "RETR" => FtpCommand::Retr(arg.to_string()),
    "STOR" => FtpCommand::Stor(arg.to_string()),
    "DELE" => FtpCommand::Dele(arg.to_string()),
    "MKD" => FtpCommand::Mkd(arg.to_string()),
    "RMD" => FtpCommand::Rmd(arg.to_string()),
    "QUIT" => FtpCommand::Quit,
    other => FtpCommand::Unknown(other.to_string()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn command_is_case_insensitive_argument_is_not() {
    assert_eq!(
      parse_command("user Alice"),
      FtpCommand::User("Alice".to_string())
    );
  }

  #[test]
  fn no_argument_yields_empty_string() {
    assert_eq!(parse_command("PWD"), FtpCommand::Pwd);
    assert_eq!(parse_command("type"), FtpCommand::Type(String::new()));
  }

  #[test]
  fn surrounding_whitespace_is_trimmed() {
    assert_eq!(
      parse_command("  CWD   /foo/bar  "),
      FtpCommand::Cwd("/foo/bar".to_string())
    );
  }

  #[test]
  fn unrecognized_command_is_unknown() {
    assert_eq!(
      parse_command("FOO bar"),
      FtpCommand::Unknown("FOO".to_string())
    );
  }

  #[test]
  fn list_with_no_argument_is_none() {
    assert_eq!(parse_command("LIST"), FtpCommand::List(None));
    assert_eq!(
      parse_command("LIST /a"),
      FtpCommand::List(Some("/a".to_string()))
    );
  }
}

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::auth::AuthDirectory;
use crate::commands::{parse_command, FtpCommand};
use crate::config::ServerConfig;
use crate::port_pool::PortPool;
use crate::reply::ReplyWriter;
use crate::session::Session;

/// Applied to every byte moved over an accepted data connection, on top of
/// the accept deadline `Session::accept_data` already enforces.
const DATA_IO_TIMEOUT: Duration = Duration::from_secs(15);

/// Commands that are answered even before login ("Login gate").
fn requires_login(cmd: &FtpCommand) -> bool {
  !matches!(
    cmd,
    FtpCommand::Noop
      | FtpCommand::Opts(_)
      | FtpCommand::Syst
      | FtpCommand::Type(_)
      | FtpCommand::Feat
      | FtpCommand::User(_)
      | FtpCommand::Pass(_)
      | FtpCommand::Quit
  )
}

/// Drives one control connection end to end: greeting, command loop, and
/// PASV cleanup on every exit path.
pub async fn handle_connection(
  stream: TcpStream,
  config: Arc<ServerConfig>,
  auth: Arc<AuthDirectory>,
  pool: Arc<PortPool>,
) {
  let session_id = Uuid::new_v4();
  let remote = stream
    .peer_addr()
    .map(|a| a.to_string())
    .unwrap_or_else(|_| "unknown".to_string());
  let span = info_span!("session", remote = %remote, session_id = %session_id);

  async move {
    if let Err(e) = stream.set_nodelay(true) {
      warn!(error = %e, "failed to disable Nagle's algorithm");
    }
    let control_local_ip = stream.local_addr().map(|a| a.ip()).ok();
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = ReplyWriter::new(write_half);

    let mut session = match Session::new(&config.root) {
      Ok(session) => session,
      Err(e) => {
        warn!(error = %e, "failed to initialize session root");
        return;
      }
    };

    if writer.line("220 Server ready").await.is_err() {
      return;
    }
    info!(root = %session.resolver().root_path().display(), "session opened");

    loop {
      let idle = if session.logged_in {
        Duration::from_secs(config.post_login_idle_seconds)
      } else {
        Duration::from_secs(config.pre_login_idle_seconds)
      };

      let line = match read_line(&mut reader, idle).await {
        ReadOutcome::Line(line) => line,
        ReadOutcome::Eof => {
          info!("client closed control connection");
          break;
        }
        ReadOutcome::Timeout => {
          let _ = writer.line("421 Timeout - closing control connection").await;
          info!("control connection idle timeout");
          break;
        }
        ReadOutcome::Error(e) => {
          warn!(error = %e, "error reading control connection");
          break;
        }
      };

      let cmd = parse_command(&line);
      debug!(?cmd, "dispatching command");

      if requires_login(&cmd) && !session.logged_in {
        if writer.line("530 Please login with USER and PASS").await.is_err() {
          break;
        }
        continue;
      }

      let quit = matches!(cmd, FtpCommand::Quit);
      let outcome = dispatch(
        cmd,
        &mut session,
        &mut writer,
        control_local_ip,
        &config,
        &auth,
        &pool,
      )
      .await;

      if outcome.is_err() {
        let _ = writer.line("421 Server error, closing connection").await;
        warn!("command handler failed, closing connection");
        break;
      }
      if quit {
        break;
      }
    }

    session.close_pasv(&pool).await;
    info!("session closed");
  }
  .instrument(span)
  .await
}

enum ReadOutcome {
  Line(String),
  Eof,
  Timeout,
  Error(std::io::Error),
}

async fn read_line(reader: &mut BufReader<OwnedReadHalf>, idle: Duration) -> ReadOutcome {
  let mut line = String::new();
  match tokio::time::timeout(idle, reader.read_line(&mut line)).await {
    Ok(Ok(0)) => ReadOutcome::Eof,
    Ok(Ok(_)) => ReadOutcome::Line(line.trim_end_matches(['\r', '\n']).to_string()),
    Ok(Err(e)) => ReadOutcome::Error(e),
    Err(_) => ReadOutcome::Timeout,
  }
}

/// Dispatches a single parsed command to its handler. Returns `Err` only for
/// a control-write failure, which terminates the session; every
/// protocol-level outcome is a reply line, not an error.
async fn dispatch(
  cmd: FtpCommand,
  session: &mut Session,
  writer: &mut ReplyWriter,
  control_local_ip: Option<std::net::IpAddr>,
  config: &ServerConfig,
  auth: &AuthDirectory,
  pool: &PortPool,
) -> std::io::Result<()> {
  match cmd {
    FtpCommand::Noop => writer.line("200 NOOP ok").await,
    FtpCommand::Opts(_) => writer.line("200 OPTS ok").await,
    FtpCommand::Syst => writer.line("215 UNIX Type: L8").await,
    FtpCommand::Type(arg) => {
      if arg.eq_ignore_ascii_case("I") {
        writer.line("200 Type set to I").await
      } else {
        writer.line("504 Only TYPE I supported").await
      }
    }
    FtpCommand::Feat => {
      writer
        .lines(&["211-Features", " PASV", " UTF8", "211 End"])
        .await
    }
    FtpCommand::User(name) => handle_user(session, writer, config, &name).await,
    FtpCommand::Pass(pw) => handle_pass(session, writer, config, auth, &pw).await,
    FtpCommand::Pwd => {
      writer
        .line(&format!(
          "257 \"{}\" is current directory",
          session.resolver().cwd_virtual()
        ))
        .await
    }
    FtpCommand::Cwd(arg) => {
      if session.resolver_mut().try_change_dir(&arg) {
        writer.line("250 Directory successfully changed").await
      } else {
        warn_if_jail_escape(&arg, session);
        writer.line("550 Failed to change directory").await
      }
    }
    FtpCommand::Cdup => {
      if session.resolver_mut().try_change_dir("..") {
        writer.line("200 OK").await
      } else {
        writer.line("550 Failed").await
      }
    }
    FtpCommand::Pasv => handle_pasv(session, writer, control_local_ip, config, pool).await,
    FtpCommand::List(arg) => handle_list(session, writer, pool, arg.as_deref()).await,
    FtpCommand::Retr(name) => handle_retr(session, writer, pool, &name).await,
    FtpCommand::Stor(name) => handle_stor(session, writer, pool, &name).await,
    FtpCommand::Dele(name) => handle_dele(session, writer, &name).await,
    FtpCommand::Mkd(name) => handle_mkd(session, writer, &name).await,
    FtpCommand::Rmd(name) => handle_rmd(session, writer, &name).await,
    FtpCommand::Quit => writer.line("221 Bye").await,
    FtpCommand::Unknown(_) => writer.line("502 Command not implemented").await,
  }
}

/// Jail-escape attempts are not logged as errors; a `debug`-level trace is
/// enough to notice during development without treating the client as
/// misbehaving.
fn warn_if_jail_escape(arg: &str, session: &Session) {
  if session.resolver().resolve(arg).is_err() {
    debug!(%arg, "path resolution denied, outside root jail");
  }
}

async fn handle_user(
  session: &mut Session,
  writer: &mut ReplyWriter,
  config: &ServerConfig,
  name: &str,
) -> std::io::Result<()> {
  if name.eq_ignore_ascii_case("anonymous") {
    if config.allow_anonymous {
      session.pending_user = "anonymous".to_string();
      writer.line("331 Anonymous login ok, send any password").await
    } else {
      writer.line("530 Anonymous access denied").await
    }
  } else {
    session.pending_user = name.to_string();
    writer.line("331 Password required").await
  }
}

async fn handle_pass(
  session: &mut Session,
  writer: &mut ReplyWriter,
  config: &ServerConfig,
  auth: &AuthDirectory,
  password: &str,
) -> std::io::Result<()> {
  if session.pending_user == "anonymous" {
    if !config.allow_anonymous {
      return writer.line("530 Anonymous access denied").await;
    }
    let home = config.root.join("anonymous");
    return match session.complete_login("anonymous", &home) {
      Ok(()) => {
        info!(user = "anonymous", "login succeeded");
        writer.line("230 Logged in.").await
      }
      Err(e) => {
        warn!(error = %e, "failed to prepare anonymous home directory");
        writer.line("530 Login incorrect").await
      }
    };
  }

  let name = session.pending_user.clone();
  if auth.verify(&name, password) {
    let home = config.root.join("users").join(&name);
    match session.complete_login(&name, &home) {
      Ok(()) => {
        info!(user = %name, "login succeeded");
        writer.line("230 Logged in.").await
      }
      Err(e) => {
        warn!(error = %e, "failed to prepare user home directory");
        writer.line("530 Login incorrect").await
      }
    }
  } else {
    writer.line("530 Login incorrect").await
  }
}

async fn handle_pasv(
  session: &mut Session,
  writer: &mut ReplyWriter,
  control_local_ip: Option<std::net::IpAddr>,
  config: &ServerConfig,
  pool: &PortPool,
) -> std::io::Result<()> {
  let bind_ip = if config.bind == "0.0.0.0" || config.bind == "::" {
    "0.0.0.0".to_string()
  } else {
    config.bind.clone()
  };

  match session.try_open_pasv(pool, &bind_ip).await {
    Some(port) => {
      let control_ip = control_local_ip.unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
      let reply_ip = Session::passive_reply_address(control_ip, &config.bind);
      let octets = reply_ip.octets();
      writer
        .line(&format!(
          "227 Entering Passive Mode ({},{},{},{},{},{})",
          octets[0],
          octets[1],
          octets[2],
          octets[3],
          port / 256,
          port % 256,
        ))
        .await
    }
    None => writer.line("421 Can't open passive connection").await,
  }
}

async fn handle_list(
  session: &mut Session,
  writer: &mut ReplyWriter,
  pool: &PortPool,
  arg: Option<&str>,
) -> std::io::Result<()> {
  let lines = session.resolver().to_unix_list_lines(arg.unwrap_or("."));

  let Some(mut data_stream) = session.accept_data(pool).await else {
    return writer.line("425 Can't open data connection").await;
  };

  writer.line("150 Opening data connection for LIST").await?;
  let mut payload = String::new();
  for line in &lines {
    payload.push_str(line);
    payload.push_str("\r\n");
  }
  let result = write_with_timeout(&mut data_stream, payload.as_bytes()).await;
  let _ = data_stream.shutdown().await;
  match result {
    Ok(()) => writer.line("226 Transfer complete").await,
    Err(e) => {
      warn!(error = %e, "LIST transfer failed");
      writer.line("451 Local error in processing").await
    }
  }
}

async fn handle_retr(
  session: &mut Session,
  writer: &mut ReplyWriter,
  pool: &PortPool,
  file_name: &str,
) -> std::io::Result<()> {
  if file_name.is_empty() {
    session.close_pasv(pool).await;
    return writer.line("501 Filename required").await;
  }
  let Ok(path) = session.resolver().resolve(file_name) else {
    session.close_pasv(pool).await;
    return writer.line("550 File not found").await;
  };
  if !path.is_file() {
    session.close_pasv(pool).await;
    return writer.line("550 File not found").await;
  }

  let Some(mut data_stream) = session.accept_data(pool).await else {
    return writer.line("425 Can't open data connection").await;
  };

  let basename = Path::new(file_name)
    .file_name()
    .and_then(|s| s.to_str())
    .unwrap_or(file_name);
  writer
    .line(&format!("150 Opening data connection for {basename}"))
    .await?;

  let result = stream_file_to_socket(&path, &mut data_stream).await;
  let _ = data_stream.shutdown().await;
  match result {
    Ok(()) => writer.line("226 Transfer complete").await,
    Err(e) => {
      warn!(error = %e, "RETR transfer failed");
      writer.line("451 Local error in processing").await
    }
  }
}

async fn stream_file_to_socket(
  path: &Path,
  data_stream: &mut TcpStream,
) -> std::io::Result<()> {
  let mut file = tokio::fs::File::open(path).await?;
  copy_with_timeout(&mut file, data_stream).await
}

async fn handle_stor(
  session: &mut Session,
  writer: &mut ReplyWriter,
  pool: &PortPool,
  file_name: &str,
) -> std::io::Result<()> {
  if file_name.is_empty() {
    session.close_pasv(pool).await;
    return writer.line("501 Filename required").await;
  }
  let Ok(path) = session.resolver().resolve(file_name) else {
    session.close_pasv(pool).await;
    return writer.line("550 Invalid path").await;
  };

  let Some(mut data_stream) = session.accept_data(pool).await else {
    return writer.line("425 Can't open data connection").await;
  };

  writer.line("150 Opening data connection for upload").await?;

  let result = stream_socket_to_file(&path, &mut data_stream).await;
  match result {
    Ok(()) => writer.line("226 Transfer complete").await,
    Err(e) => {
      warn!(error = %e, "STOR transfer failed");
      writer.line("451 Local error in processing").await
    }
  }
}

async fn stream_socket_to_file(
  path: &Path,
  data_stream: &mut TcpStream,
) -> std::io::Result<()> {
  let mut file = tokio::fs::File::create(path).await?;
  copy_with_timeout(data_stream, &mut file).await
}

/// Writes `buf` to `stream`, timing out as a transient I/O error rather than
/// blocking forever on a stalled peer.
async fn write_with_timeout(stream: &mut TcpStream, buf: &[u8]) -> std::io::Result<()> {
  tokio::time::timeout(DATA_IO_TIMEOUT, stream.write_all(buf))
    .await
    .unwrap_or_else(|_| Err(io_timed_out()))
}

/// `tokio::io::copy`, but bounded so a stalled peer can't hold the data
/// connection (and its port) open indefinitely.
async fn copy_with_timeout<R, W>(reader: &mut R, writer: &mut W) -> std::io::Result<()>
where
  R: tokio::io::AsyncRead + Unpin + ?Sized,
  W: tokio::io::AsyncWrite + Unpin + ?Sized,
{
  tokio::time::timeout(DATA_IO_TIMEOUT, tokio::io::copy(reader, writer))
    .await
    .unwrap_or_else(|_| Err(io_timed_out()))?;
  Ok(())
}

fn io_timed_out() -> std::io::Error {
  std::io::Error::new(std::io::ErrorKind::TimedOut, "data connection I/O timed out")
}

async fn handle_dele(
  session: &mut Session,
  writer: &mut ReplyWriter,
  file_name: &str,
) -> std::io::Result<()> {
  if file_name.is_empty() {
    return writer.line("501 Filename required").await;
  }
  let Ok(path) = session.resolver().resolve(file_name) else {
    return writer.line("550 File not found").await;
  };
  if !path.is_file() {
    return writer.line("550 File not found").await;
  }
  match std::fs::remove_file(&path) {
    Ok(()) => writer.line("250 File deleted").await,
    Err(e) => {
      warn!(error = %e, "delete failed");
      writer.line("450 Delete failed").await
    }
  }
}

async fn handle_mkd(
  session: &mut Session,
  writer: &mut ReplyWriter,
  dir_name: &str,
) -> std::io::Result<()> {
  if dir_name.is_empty() {
    return writer.line("501 Directory name required").await;
  }
  let Ok(path) = session.resolver().resolve(dir_name) else {
    return writer.line("550 Invalid path").await;
  };
  if path.exists() {
    return writer.line("550 Directory already exists").await;
  }
  match std::fs::create_dir(&path) {
    Ok(()) => writer.line(&format!("257 \"{dir_name}\" directory created")).await,
    Err(e) => {
      warn!(error = %e, "mkdir failed");
      writer.line("550 Create directory failed").await
    }
  }
}

async fn handle_rmd(
  session: &mut Session,
  writer: &mut ReplyWriter,
  dir_name: &str,
) -> std::io::Result<()> {
  if dir_name.is_empty() {
    return writer.line("501 Directory name required").await;
  }
  let Ok(path) = session.resolver().resolve(dir_name) else {
    return writer.line("550 Directory not found").await;
  };
  if !path.is_dir() {
    return writer.line("550 Directory not found").await;
  }
  match std::fs::read_dir(&path) {
    Ok(mut entries) => {
      if entries.next().is_some() {
        return writer.line("550 Directory not empty").await;
      }
    }
    Err(e) => {
      warn!(error = %e, "failed to inspect directory before removal");
      return writer.line("550 Remove directory failed").await;
    }
  }
  match std::fs::remove_dir(&path) {
    Ok(()) => writer.line("250 Directory removed").await,
    Err(e) => {
      warn!(error = %e, "rmdir failed");
      writer.line("550 Remove directory failed").await
    }
  }
}

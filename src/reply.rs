use tokio::io::{self, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;

/// Thin wrapper over the control socket's write half. All replies are
/// CRLF-terminated ASCII.
pub struct ReplyWriter {
  writer: OwnedWriteHalf,
}

impl ReplyWriter {
  pub fn new(writer: OwnedWriteHalf) -> Self {
    Self { writer }
  }

  pub async fn line(&mut self, text: &str) -> io::Result<()> {
    self.writer.write_all(text.as_bytes()).await?;
    self.writer.write_all(b"\r\n").await
  }

  /// Writes several lines back to back without interleaving from another
  /// writer. FEAT and the 150-then-226/451 data-command pattern rely on
  /// this for atomic multi-line replies.
  pub async fn lines(&mut self, texts: &[&str]) -> io::Result<()> {
    for text in texts {
      self.line(text).await?;
    }
    Ok(())
  }
}

//! Line reading for process output that is not guaranteed to be UTF-8.
//!
//! Tools print file names and stream metadata verbatim, so a single line may
//! carry bytes from any encoding. Lines are split on `\n` and decoded lossily;
//! the stream is never abandoned because of its content.

use std::io;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Split};
use tracing::debug;

/// Consecutive read failures tolerated before an error is returned.
const READ_RETRIES: u32 = 3;

/// Newline-delimited reader that decodes invalid UTF-8 with replacement
/// characters.
#[derive(Debug)]
pub struct OutputLines<R> {
    segments: Split<BufReader<R>>,
}

impl<R: AsyncRead + Unpin> OutputLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            segments: BufReader::new(reader).split(b'\n'),
        }
    }

    /// Next line without its terminator, or `None` at end of stream.
    ///
    /// Cancel safe. Transient read errors are retried; an error is only
    /// returned once reads keep failing, and the reader stays usable.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        let mut failures = 0;
        loop {
            match self.segments.next_segment().await {
                Ok(segment) => return Ok(segment.map(decode)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) if failures < READ_RETRIES => {
                    failures += 1;
                    debug!(attempt = failures, "Retrying output read: {}", e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn decode(mut bytes: Vec<u8>) -> String {
    if bytes.last() == Some(&b'\r') {
        bytes.pop();
    }
    match String::from_utf8(bytes) {
        Ok(line) => line,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced_not_fatal() {
        let input: &[u8] = b"frame=1\ncaf\xe9 meta\nframe=2\n";
        let mut lines = OutputLines::new(input);

        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("frame=1"));
        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some("caf\u{FFFD} meta")
        );
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("frame=2"));
        assert_eq!(lines.next_line().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_crlf_and_unterminated_last_line() {
        let input: &[u8] = b"progress=continue\r\nprogress=end";
        let mut lines = OutputLines::new(input);

        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some("progress=continue")
        );
        assert_eq!(
            lines.next_line().await.unwrap().as_deref(),
            Some("progress=end")
        );
        assert_eq!(lines.next_line().await.unwrap(), None);
    }
}

//! Line-oriented output readers.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// How long to wait for output readers after the process exited.
///
/// A background grandchild can keep a pipe open long after its parent died.
pub(crate) const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// One line of output from a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// Process the line came from.
    pub pid: u32,
    pub text: String,
}

/// Read `reader` to the end, handing each complete line to `deliver`.
///
/// A trailing partial line is delivered when the stream closes. Line
/// terminators are stripped, whitespace-only lines are skipped and invalid
/// UTF-8 is replaced.
pub(crate) async fn read_lines<R, F>(reader: R, mut deliver: F)
where
    R: AsyncRead + Unpin,
    F: FnMut(String),
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\r', '\n']);
                if !line.trim().is_empty() {
                    deliver(line.to_string());
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Output stream read failed");
                break;
            }
        }
    }
}

/// Wait for `readers` to reach end of stream, detaching any still open once
/// `timeout` has elapsed for the whole group.
pub(crate) async fn drain_readers(readers: Vec<JoinHandle<()>>, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    for mut reader in readers {
        if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
            tracing::warn!("Output still open after exit, detaching reader");
            reader.abort();
        }
    }
}

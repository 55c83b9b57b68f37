use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use logbridge_types::Envelope;

/// Leading columns of a forwarded line: timestamp, forwarder and file reference
pub const COLUMNS_TO_SKIP: usize = 3;

/// Longest payload prefix included in log output
const MAX_DUMP_LEN: usize = 128;

/// Partial view of a container runtime log line
#[derive(Deserialize)]
struct ContainerLogLine {
    log: String,
}

/// Why a message pump stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpExit {
    /// The stream reached end of file
    EndOfStream,
    /// Nobody is receiving envelopes any more
    ReceiverClosed,
    /// The cancellation token fired
    Cancelled,
    /// Reading the stream failed
    ReadError,
}

/// Drop the leading structured columns of a line
pub fn strip_columns(line: &str) -> &str {
    let mut rest = line;
    for _ in 0..COLUMNS_TO_SKIP {
        if let Some(idx) = rest.find(' ') {
            rest = &rest[idx + 1..];
        }
    }
    rest
}

/// Recover the bare log message from a forwarded line
///
/// Container runtime envelopes (`{"log":"..."}`) are unwrapped. A payload that
/// looks like JSON but does not decode is used as-is.
pub fn extract_payload(line: &str) -> String {
    let payload = strip_columns(line);
    if payload.starts_with('{') {
        match serde_json::from_str::<ContainerLogLine>(payload) {
            Ok(entry) => return entry.log,
            Err(err) => debug!(
                payload = truncate(payload, MAX_DUMP_LEN),
                error = %err,
                "Failed to unwrap container log line"
            ),
        }
    }
    payload.to_string()
}

fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Read `reader` line by line and send every payload as a data envelope
///
/// The task blocks on a full channel rather than dropping lines.
pub fn spawn_pump<R>(
    reader: R,
    tx: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
) -> JoinHandle<PumpExit>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).split(b'\n');

        let exit = loop {
            let segment = tokio::select! {
                _ = cancel.cancelled() => break PumpExit::Cancelled,
                _ = tx.closed() => break PumpExit::ReceiverClosed,
                segment = lines.next_segment() => segment,
            };

            let mut bytes = match segment {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break PumpExit::EndOfStream,
                Err(err) => {
                    warn!(error = %err, "Failed to read pipeline output");
                    break PumpExit::ReadError;
                }
            };
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }

            let envelope = Envelope::data(extract_payload(&String::from_utf8_lossy(&bytes)));
            tokio::select! {
                _ = cancel.cancelled() => break PumpExit::Cancelled,
                sent = tx.send(envelope) => {
                    if sent.is_err() {
                        break PumpExit::ReceiverClosed;
                    }
                }
            }
        };

        debug!(?exit, "Message pump stopped");
        exit
    })
}

//! Bounded tail of recent child output.
//!
//! Every line a supervised child writes is logged through `tracing` and kept
//! here, so a failing migration run can attach what the services printed
//! last to its diagnostic report.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

/// Lines retained by default.
pub const DEFAULT_LOG_TAIL_LINES: usize = 200;

/// Cheaply clonable handle to a shared ring of log lines.
#[derive(Debug, Clone)]
pub struct LogTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogTail {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, line: String) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    /// Copy of the retained lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LogTail {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_TAIL_LINES)
    }
}

/// Forward each line of `reader` to the log stream and into `tail`.
///
/// Runs until the child closes the stream.
pub(crate) async fn forward_lines<R>(service: String, stream: &'static str, reader: R, tail: LogTail)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::info!(service = %service, stream, "{line}");
                tail.push(format!("[{service}] {line}"));
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(service = %service, stream, error = %e, "Stopped reading child output");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

// Output capture - drains the notebook server's pipes into tracing

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;

/// How much early stderr is kept for crash detection
pub const STDERR_HEAD_LIMIT: usize = 2000;

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Background readers for one child's stdout and stderr
///
/// Every line is forwarded as a tracing event under the `labkeeper::notebook`
/// target. The first bytes of stderr are also kept so the launcher can look
/// for startup failures.
#[derive(Debug)]
pub struct OutputCapture {
    stderr_head: Arc<Mutex<String>>,
    stderr_task: Option<JoinHandle<()>>,
}

impl OutputCapture {
    /// Take the child's pipes and start draining them
    pub fn attach(child: &mut Child) -> Self {
        let pid = child.id();
        let stderr_head = Arc::new(Mutex::new(String::new()));

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(Self::read_task(pid, Stream::Stdout, stdout, None));
        }

        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(Self::read_task(
                pid,
                Stream::Stderr,
                stderr,
                Some(stderr_head.clone()),
            ))
        });

        Self {
            stderr_head,
            stderr_task,
        }
    }

    /// Stderr captured so far, at most `STDERR_HEAD_LIMIT` bytes
    pub fn stderr_head(&self) -> String {
        match self.stderr_head.lock() {
            Ok(head) => head.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Wait for stderr to reach EOF, bounded by `limit`
    pub async fn drain_stderr(&mut self, limit: Duration) {
        if let Some(task) = self.stderr_task.take() {
            let _ = tokio::time::timeout(limit, task).await;
        }
    }

    async fn read_task<R>(
        pid: Option<u32>,
        stream: Stream,
        reader: R,
        head: Option<Arc<Mutex<String>>>,
    ) where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            match reader.read_line(&mut line).await {
                // EOF - process closed the pipe
                Ok(0) => break,
                Ok(_) => {
                    if let Some(head) = head.as_ref() {
                        append_capped(head, &line);
                    }

                    let text = line.trim_end();
                    match stream {
                        Stream::Stdout => {
                            tracing::info!(target: "labkeeper::notebook", pid = ?pid, "{}", text)
                        }
                        Stream::Stderr => {
                            tracing::info!(target: "labkeeper::notebook", pid = ?pid, stream = "stderr", "{}", text)
                        }
                    }
                    line.clear();
                }
                Err(e) => {
                    tracing::debug!(pid = ?pid, "Stopped reading notebook output: {}", e);
                    break;
                }
            }
        }
    }
}

fn append_capped(head: &Mutex<String>, line: &str) {
    let mut head = match head.lock() {
        Ok(head) => head,
        Err(poisoned) => poisoned.into_inner(),
    };

    let room = STDERR_HEAD_LIMIT.saturating_sub(head.len());
    if room == 0 {
        return;
    }

    let mut end = line.len().min(room);
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    head.push_str(&line[..end]);
}

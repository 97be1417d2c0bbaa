use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How often the file is checked for new data
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Reopen the file after this long without data, in case it was replaced
const REOPEN_AFTER: Duration = Duration::from_secs(30);

const READ_CHUNK: usize = 8192;

/// Longest unterminated line kept in memory. Anything longer is dropped up to
/// its newline.
const MAX_PARTIAL_LINE: usize = 64 * 1024;

/// Follows a log file and forwards complete lines in order
pub struct LogTail {
    path: PathBuf,

    /// Cancellation token for stopping the follow task
    cancel: CancellationToken,

    task: Option<tokio::task::JoinHandle<()>>,
}

impl LogTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Start following from `offset` bytes into the file
    pub fn start(&mut self, offset: u64, line_tx: mpsc::UnboundedSender<String>) {
        let path = self.path.clone();
        let cancel = self.cancel.clone();

        self.task = Some(tokio::spawn(async move {
            follow(path, offset, line_tx, cancel).await;
        }));
    }

    /// Stop following
    pub fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.cancel = CancellationToken::new();
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for LogTail {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Read every complete line currently in the file.
///
/// Returns the lines and the byte offset just past the last newline, which is
/// where a [`LogTail`] should start so a half-written line is not lost.
pub async fn read_existing(path: &Path) -> io::Result<(Vec<String>, u64)> {
    let bytes = tokio::fs::read(path).await?;
    let complete = match bytes.iter().rposition(|b| *b == b'\n') {
        Some(idx) => idx + 1,
        None => 0,
    };

    let text = String::from_utf8_lossy(&bytes[..complete]);
    let lines = text
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect();

    Ok((lines, complete as u64))
}

async fn open_at(path: &Path, position: u64) -> io::Result<File> {
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(position)).await?;
    Ok(file)
}

async fn follow(
    path: PathBuf,
    mut position: u64,
    line_tx: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
) {
    info!(path = %path.display(), position, "following log file");

    let mut file: Option<File> = None;
    let mut lines = LineBuffer::default();
    let mut buf = vec![0u8; READ_CHUNK];
    let mut last_data = Instant::now();

    while !cancel.is_cancelled() {
        if file.is_none() {
            match open_at(&path, position).await {
                Ok(f) => file = Some(f),
                Err(e) => debug!(path = %path.display(), "log file not readable: {}", e),
            }
        }

        if let Some(f) = file.as_mut() {
            match f.read(&mut buf).await {
                Ok(0) => {}
                Ok(n) => {
                    position += n as u64;
                    last_data = Instant::now();
                    if !lines.push(&buf[..n], &line_tx) {
                        // Receiver dropped
                        return;
                    }
                    // Keep reading while data is available
                    continue;
                }
                Err(e) => {
                    warn!(path = %path.display(), "failed reading log file: {}", e);
                    file = None;
                }
            }
        }

        if let Ok(meta) = tokio::fs::metadata(&path).await {
            if meta.len() < position {
                info!(path = %path.display(), "log file truncated, reading from the start");
                position = 0;
                lines = LineBuffer::default();
                file = None;
            }
        }

        if last_data.elapsed() >= REOPEN_AFTER {
            debug!(path = %path.display(), "no new data, reopening log file");
            file = None;
            last_data = Instant::now();
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }
}

/// Splits raw reads into lines, holding back the unfinished tail
#[derive(Debug, Default)]
struct LineBuffer {
    partial: Vec<u8>,
    /// Inside an overlong line that is being dropped
    discarding: bool,
}

impl LineBuffer {
    /// Send every complete line. Returns false once the receiver is gone.
    fn push(&mut self, data: &[u8], line_tx: &mpsc::UnboundedSender<String>) -> bool {
        self.partial.extend_from_slice(data);

        while let Some(idx) = self.partial.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=idx).collect();
            if self.discarding {
                self.discarding = false;
                continue;
            }

            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);
            if line_tx.send(line.to_string()).is_err() {
                return false;
            }
        }

        if self.partial.len() > MAX_PARTIAL_LINE {
            if !self.discarding {
                warn!(
                    bytes = self.partial.len(),
                    "log line too long, skipping to the next newline"
                );
            }
            self.partial.clear();
            self.discarding = true;
        }
        true
    }
}

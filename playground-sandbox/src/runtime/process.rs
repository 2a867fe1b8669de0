//! Interpreter process runtime

use crate::error::SandboxError;
use crate::execution::SessionId;
use crate::types::{ExecutionStream, ExitReport};
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const READ_CHUNK: usize = 4096;
const CHANNEL_CAPACITY: usize = 128;
/// Input lines that may wait for a program that is not reading stdin
const INPUT_QUEUE: usize = 16;
/// How long pipe reads may block after exit (grandchildren may hold them open)
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How the interpreter is invoked
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpreterConfig {
    /// Interpreter binary, resolved through `PATH`
    pub program: String,

    /// Arguments placed before the staged source path
    pub args: Vec<String>,

    /// Extra environment for the interpreter
    pub env: BTreeMap<String, String>,

    /// Extension given to staged source files
    pub source_extension: String,

    /// Directory for staged source files
    pub temp_dir: PathBuf,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: Vec::new(),
            // Unbuffered so prompts without a newline reach the client
            env: BTreeMap::from([("PYTHONUNBUFFERED".to_string(), "1".to_string())]),
            source_extension: "py".to_string(),
            temp_dir: std::env::temp_dir(),
        }
    }
}

impl InterpreterConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = dir.into();
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.source_extension = extension.into();
        self
    }

    /// Transient source location for a session
    pub fn source_path(&self, id: &SessionId) -> PathBuf {
        self.temp_dir
            .join(format!("python_playground_{}.{}", id, self.source_extension))
    }
}

/// Control side of a running process.
///
/// Input is queued through [`ProcessHandle::write_input`] and written by a
/// per-process stdin task, so callers never wait on the pipe; termination is
/// a request honoured by the waiter task that owns the child.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    input: Arc<Mutex<Option<mpsc::Sender<String>>>>,
    exited: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl ProcessHandle {
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Queue one line for the process's standard input, adding the trailing
    /// newline the interpreter waits for. Fails with
    /// [`SandboxError::InputBacklog`] rather than waiting when the program
    /// is not reading.
    pub async fn write_input(&self, text: &str) -> Result<()> {
        if self.has_exited() || self.cancel.is_cancelled() {
            return Err(SandboxError::InputClosed);
        }

        let mut line = text.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }

        let mut input = self.input.lock().await;
        let tx = input.as_ref().ok_or(SandboxError::InputClosed)?;
        match tx.try_send(line) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(pid = ?self.pid, "stdin queue full");
                Err(SandboxError::InputBacklog)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                input.take();
                Err(SandboxError::InputClosed)
            }
        }
    }

    /// Close standard input once the queued lines are written, so the
    /// program sees end-of-file
    pub async fn close_input(&self) {
        self.input.lock().await.take();
    }

    /// Request immediate termination. Idempotent.
    pub fn terminate(&self) {
        if !self.cancel.is_cancelled() {
            debug!(pid = ?self.pid, "terminating process");
        }
        self.cancel.cancel();
    }
}

/// Runs source text with an external interpreter, one process per session
pub struct InterpreterRuntime {
    config: InterpreterConfig,
}

impl InterpreterRuntime {
    pub fn new(config: InterpreterConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }
}

impl Default for InterpreterRuntime {
    fn default() -> Self {
        Self::new(InterpreterConfig::default())
    }
}

#[async_trait]
impl super::Runtime for InterpreterRuntime {
    async fn spawn(&self, id: &SessionId, source: &str) -> Result<super::SpawnedProcess> {
        let path = self.config.source_path(id);
        tokio::fs::write(&path, source)
            .await
            .map_err(|source| SandboxError::Stage {
                path: path.clone(),
                source,
            })?;

        let spawned = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg(&path)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                remove_source(&path).await;
                return Err(SandboxError::Spawn {
                    program: self.config.program.clone(),
                    source,
                });
            }
        };

        let pid = child.id();
        info!(session_id = %id, ?pid, program = %self.config.program, "Spawned interpreter");

        let (stdout_tx, stdout_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (stderr_tx, stderr_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (exit_tx, exit_rx) = oneshot::channel();
        let stop_reading = CancellationToken::new();

        let stdout_task = child
            .stdout
            .take()
            .map(|out| tokio::spawn(drain(out, stdout_tx, stop_reading.clone())));
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(drain(err, stderr_tx, stop_reading.clone())));

        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE);
        let writer_task = child
            .stdin
            .take()
            .map(|stdin| tokio::spawn(feed_stdin(stdin, input_rx)));

        let input = Arc::new(Mutex::new(Some(input_tx)));
        let exited = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();

        let handle = ProcessHandle {
            pid,
            input: input.clone(),
            exited: exited.clone(),
            cancel: cancel.clone(),
        };

        let session_id = id.clone();
        let start = Instant::now();
        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = cancel.cancelled() => {
                    if let Err(e) = child.start_kill() {
                        debug!(session_id = %session_id, "kill after exit: {}", e);
                    }
                    child.wait().await
                }
            };
            exited.store(true, Ordering::SeqCst);
            input.lock().await.take();
            if let Some(writer) = writer_task {
                writer.abort();
            }

            // Whatever the child wrote is already buffered in the pipes. Past
            // the grace period the drains stop waiting on reads (a grandchild
            // may hold a pipe open) but still deliver everything read, however
            // slowly the consumer takes it.
            let mut drains: Vec<_> = stdout_task.into_iter().chain(stderr_task).collect();
            let grace = tokio::time::sleep(DRAIN_GRACE);
            tokio::pin!(grace);
            for task in drains.iter_mut() {
                tokio::select! {
                    _ = &mut *task => {}
                    _ = &mut grace => {
                        debug!(session_id = %session_id, "drain grace elapsed, stopping pipe reads");
                        stop_reading.cancel();
                        break;
                    }
                }
            }
            for task in drains {
                if !task.is_finished() {
                    let _ = task.await;
                }
            }

            remove_source(&path).await;

            let duration_ms = start.elapsed().as_millis() as u64;
            let report = match status {
                Ok(status) => ExitReport {
                    exit_code: status.code().unwrap_or(-1),
                    duration_ms,
                    error: None,
                },
                Err(e) => ExitReport {
                    duration_ms,
                    ..ExitReport::vanished(format!("process wait error: {}", e))
                },
            };
            debug!(
                session_id = %session_id,
                exit_code = report.exit_code,
                duration_ms,
                "Interpreter exited"
            );
            let _ = exit_tx.send(report);
        });

        Ok(super::SpawnedProcess {
            handle,
            stream: ExecutionStream {
                stdout: stdout_rx,
                stderr: stderr_rx,
                exit: exit_rx,
            },
        })
    }

    fn name(&self) -> &str {
        "interpreter"
    }
}

async fn remove_source(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), "could not remove staged source: {}", e);
    }
}

/// Forward a pipe as UTF-8 chunks until end-of-stream or until the receiver
/// goes away.
///
/// Once `stop_reading` fires, a read that would block ends the drain; bytes
/// already buffered are still read and every chunk read is sent.
async fn drain<R>(mut reader: R, tx: mpsc::Sender<String>, stop_reading: CancellationToken)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_CHUNK];
    let mut decoder = Utf8Decoder::default();
    loop {
        let read = tokio::select! {
            biased;
            read = reader.read(&mut buf) => read,
            _ = stop_reading.cancelled() => {
                debug!("pipe still open after exit, abandoning");
                break;
            }
        };
        match read {
            Ok(0) => break,
            Ok(n) => {
                let text = decoder.decode(&buf[..n]);
                if !text.is_empty() && tx.send(text).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                debug!("pipe read failed: {}", e);
                break;
            }
        }
    }
    if let Some(rest) = decoder.finish() {
        let _ = tx.send(rest).await;
    }
}

/// Write queued input lines to the child until the queue closes or the pipe
/// breaks. Dropping `stdin` on return delivers end-of-file.
async fn feed_stdin(mut stdin: ChildStdin, mut lines: mpsc::Receiver<String>) {
    while let Some(line) = lines.recv().await {
        let written = match stdin.write_all(line.as_bytes()).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            debug!("stdin write failed: {}", e);
            break;
        }
    }
}

/// Incremental UTF-8 decoding that holds back a character split across reads
#[derive(Default)]
struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + len);
                        }
                        None => {
                            // incomplete sequence at the end, wait for more bytes
                            self.pending.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(rest)
    }
}

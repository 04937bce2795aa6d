//! External engine invocation
//!
//! An engine is any program that takes the question as its last argument and
//! answers on stdout. Each [`Invocation`] owns one run of it: a background
//! task reads stdout into a channel, reaps the child, then fires the
//! completion signal exactly once.

use std::path::PathBuf;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::Config;

const OUTPUT_BUFFER: usize = 256;

/// How stdout is delivered to the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// One chunk per stdout line, as soon as it is read
    #[default]
    Stream,
    /// A single chunk with all of stdout, sent after the process is reaped
    Combined,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to launch engine '{}': {source}", .path.display())]
    Launch {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("engine stdout unavailable")]
    StdoutUnavailable,
}

/// Exit information delivered on the completion signal.
///
/// `code` is `None` when the process was killed by a signal or could not be
/// waited on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineExit {
    pub code: Option<i32>,
}

impl EngineExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Output(String),
    /// Combined mode only: a line was buffered, nothing to show yet
    Progress,
    Exited(EngineExit),
}

/// Starts one engine run per question
pub trait Engine: Send {
    /// Launch the engine for `question` without waiting on it.
    ///
    /// A process that cannot be started is reported here, never through the
    /// invocation's channel.
    fn invoke(&self, question: &str) -> Result<Invocation, EngineError>;

    fn name(&self) -> String {
        "engine".to_string()
    }
}

/// One running question/answer cycle.
///
/// Dropping the invocation aborts the background task and, until the engine
/// has been reaped, kills its whole process group.
pub struct Invocation {
    output: mpsc::Receiver<String>,
    output_closed: bool,
    done: Option<oneshot::Receiver<EngineExit>>,
    mode: OutputMode,
    buffer: Vec<String>,
    held_exit: Option<EngineExit>,
    task: Option<JoinHandle<()>>,
    process_group: Option<u32>,
}

impl Invocation {
    /// Build an invocation from raw channels. The senders belong to whatever
    /// produces the output; `done` must be sent after the last output line.
    pub fn from_channels(
        output: mpsc::Receiver<String>,
        done: oneshot::Receiver<EngineExit>,
        mode: OutputMode,
    ) -> Self {
        Self {
            output,
            output_closed: false,
            done: Some(done),
            mode,
            buffer: Vec::new(),
            held_exit: None,
            task: None,
            process_group: None,
        }
    }

    fn with_process(mut self, task: JoinHandle<()>, process_group: Option<u32>) -> Self {
        self.task = Some(task);
        self.process_group = process_group;
        self
    }

    pub fn mode(&self) -> OutputMode {
        self.mode
    }

    /// Wait for the next output chunk or the completion signal.
    ///
    /// Buffered output always wins over completion, so every line is seen
    /// before `Exited`. In combined mode each line only yields `Progress`;
    /// the joined output comes as one `Output` right before `Exited`.
    /// Cancel-safe. Never resolves again after `Exited`.
    pub async fn next_event(&mut self) -> EngineEvent {
        loop {
            if let Some(exit) = self.held_exit.take() {
                return EngineEvent::Exited(exit);
            }
            let Some(done) = self.done.as_mut() else {
                return std::future::pending().await;
            };

            tokio::select! {
                biased;
                line = self.output.recv(), if !self.output_closed => match line {
                    Some(line) => match self.mode {
                        OutputMode::Stream => return EngineEvent::Output(line),
                        OutputMode::Combined => {
                            self.buffer.push(line);
                            return EngineEvent::Progress;
                        }
                    },
                    None => self.output_closed = true,
                },
                exit = done => {
                    self.done = None;
                    self.process_group = None;
                    let exit = exit.unwrap_or(EngineExit { code: None });
                    if self.buffer.is_empty() {
                        return EngineEvent::Exited(exit);
                    }
                    self.held_exit = Some(exit);
                    return EngineEvent::Output(std::mem::take(&mut self.buffer).join("\n"));
                }
            }
        }
    }

    /// Stop the background task and kill the engine with everything it
    /// started.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if let Some(pgid) = self.process_group.take() {
            kill_process_group(pgid);
        }
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(unix)]
fn kill_process_group(pgid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pgid) else {
        return;
    };
    // The engine was spawned with process_group(0), so its pid is the group id
    let result = unsafe { libc::killpg(pgid, libc::SIGKILL) };
    if result != 0 {
        let error = std::io::Error::last_os_error();
        if error.raw_os_error() != Some(libc::ESRCH) {
            tracing::warn!(pgid, error = %error, "failed to kill engine process group");
        }
    } else {
        tracing::debug!(pgid, "engine process group killed");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pgid: u32) {
    // Only the direct child is reachable here; kill_on_drop handles it
}

/// Runs `<program> [args...] <question>` as a child process
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    program: PathBuf,
    args: Vec<String>,
    mode: OutputMode,
}

impl ProcessEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            mode: OutputMode::Stream,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.engine_path.clone())
            .with_args(config.engine_args.clone())
            .with_mode(config.output_mode)
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_mode(mut self, mode: OutputMode) -> Self {
        self.mode = mode;
        self
    }
}

impl Engine for ProcessEngine {
    fn invoke(&self, question: &str) -> Result<Invocation, EngineError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(question)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| EngineError::Launch {
            path: self.program.clone(),
            source,
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or(EngineError::StdoutUnavailable)?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr));
        }

        tracing::debug!(
            program = %self.program.display(),
            pid = ?child.id(),
            mode = ?self.mode,
            "engine started"
        );

        let (output_tx, output_rx) = mpsc::channel(OUTPUT_BUFFER);
        let (done_tx, done_rx) = oneshot::channel();
        let process_group = child.id();
        let task = tokio::spawn(run_process(child, stdout, output_tx, done_tx));

        Ok(Invocation::from_channels(output_rx, done_rx, self.mode).with_process(task, process_group))
    }

    fn name(&self) -> String {
        self.program.display().to_string()
    }
}

async fn run_process(
    mut child: Child,
    stdout: ChildStdout,
    output: mpsc::Sender<String>,
    done: oneshot::Sender<EngineExit>,
) {
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        match read_line_lossy(&mut reader, &mut buf).await {
            Ok(Some(line)) => {
                if output.send(line).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(error) => {
                tracing::warn!(error = %error, "failed to read engine output");
                break;
            }
        }
    }
    // Closing the pipe lets a child still writing into it terminate.
    drop(reader);
    drop(output);

    let exit = match child.wait().await {
        Ok(status) => EngineExit { code: status.code() },
        Err(error) => {
            tracing::warn!(error = %error, "failed to wait on engine process");
            EngineExit { code: None }
        }
    };

    tracing::debug!(code = ?exit.code, "engine exited");
    let _ = done.send(exit);
}

/// Read one `\n`-terminated line, stripping the line ending. Bytes that are
/// not valid UTF-8 become U+FFFD rather than failing the read.
async fn read_line_lossy<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    Ok(Some(String::from_utf8_lossy(buf).into_owned()))
}

async fn log_stderr(stderr: ChildStderr) {
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    while let Ok(Some(line)) = read_line_lossy(&mut reader, &mut buf).await {
        tracing::debug!(target: "askterm::engine::stderr", "{line}");
    }
}

//! External decode/encode processes
//!
//! The relay never parses containers or codecs. A decoder turns a locator into
//! raw PCM on its stdout; an encoder reads PCM on stdin and writes the
//! broadcast format on stdout. Launchers are traits so tests (and embedders)
//! can substitute in-memory pipes.

use crate::error::ProcessError;
use bytes::Bytes;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Placeholder replaced by the item locator in decoder templates
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// A running decoder
pub struct DecodeSession {
    pub output: Box<dyn AsyncRead + Send + Unpin>,
    pub child: Option<Child>,
}

/// A running encoder
pub struct EncodeSession {
    pub input: Box<dyn AsyncWrite + Send + Unpin>,
    pub output: Box<dyn AsyncRead + Send + Unpin>,
    pub child: Option<Child>,
}

/// Starts a decoder for a locator
pub trait DecoderLauncher: Send + Sync {
    fn spawn(&self, locator: &str) -> Result<DecodeSession, ProcessError>;
}

/// Starts the broadcast encoder
pub trait EncoderLauncher: Send + Sync {
    fn spawn(&self) -> Result<EncodeSession, ProcessError>;
}

/// Launcher running an argv template as a child process
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    template: Vec<String>,
}

impl CommandLauncher {
    pub fn new(template: Vec<String>) -> Self {
        Self { template }
    }

    fn command(&self, input: Option<&str>) -> Result<Command, ProcessError> {
        let mut args = self.template.iter().map(|arg| match input {
            Some(input) => arg.replace(INPUT_PLACEHOLDER, input),
            None => arg.clone(),
        });
        let program = args.next().ok_or(ProcessError::EmptyCommand)?;
        let mut command = Command::new(program);
        command.args(args).stderr(Stdio::inherit()).kill_on_drop(true);
        Ok(command)
    }

    fn program(&self) -> String {
        self.template.first().cloned().unwrap_or_default()
    }
}

impl DecoderLauncher for CommandLauncher {
    fn spawn(&self, locator: &str) -> Result<DecodeSession, ProcessError> {
        let mut command = self.command(Some(locator))?;
        command.stdin(Stdio::null()).stdout(Stdio::piped());
        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: self.program(),
            source,
        })?;
        let stdout = child.stdout.take().ok_or(ProcessError::MissingPipe("stdout"))?;
        debug!("Decoder started (pid {:?}) for {}", child.id(), locator);
        Ok(DecodeSession {
            output: Box::new(stdout),
            child: Some(child),
        })
    }
}

impl EncoderLauncher for CommandLauncher {
    fn spawn(&self) -> Result<EncodeSession, ProcessError> {
        let mut command = self.command(None)?;
        command.stdin(Stdio::piped()).stdout(Stdio::piped());
        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: self.program(),
            source,
        })?;
        let stdin = child.stdin.take().ok_or(ProcessError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(ProcessError::MissingPipe("stdout"))?;
        debug!("Encoder started (pid {:?})", child.id());
        Ok(EncodeSession {
            input: Box::new(stdin),
            output: Box::new(stdout),
            child: Some(child),
        })
    }
}

/// Kill a child if it is still running and reap it
pub async fn terminate(child: Option<Child>, what: &str) {
    let Some(mut child) = child else {
        return;
    };
    match child.try_wait() {
        Ok(Some(status)) => debug!("{} already exited: {}", what, status),
        Ok(None) => {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill {}: {}", what, e);
            } else {
                debug!("{} killed", what);
            }
        }
        Err(e) => warn!("Failed to query {} status: {}", what, e),
    }
}

/// Decoder output finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderFinished {
    pub generation: u64,
    /// Bytes forwarded to the pump before EOF
    pub bytes: u64,
}

/// Copy decoder output into the pump input channel in chunks of at most `chunk_len`
///
/// Reports [`DecoderFinished`] on EOF or read error. Stops silently when the
/// pump side drops the channel (flush or a newer attach).
pub fn spawn_feeder(
    generation: u64,
    mut output: Box<dyn AsyncRead + Send + Unpin>,
    input: mpsc::Sender<Bytes>,
    chunk_len: usize,
    finished: mpsc::UnboundedSender<DecoderFinished>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; chunk_len.max(1)];
        let mut total = 0u64;
        loop {
            let n = match output.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!("Decoder read failed (generation {}): {}", generation, e);
                    break;
                }
            };
            total += n as u64;
            if input.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                debug!("Pump input for generation {} closed, feeder exiting", generation);
                return;
            }
        }
        debug!("Decoder generation {} finished after {} bytes", generation, total);
        let _ = finished.send(DecoderFinished { generation, bytes: total });
    })
}

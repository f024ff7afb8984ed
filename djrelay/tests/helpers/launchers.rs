//! In-memory decoder and encoder launchers

use djrelay::process::{DecodeSession, DecoderLauncher, EncodeSession, EncoderLauncher};
use djrelay::ProcessError;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

const PIPE_CAPACITY: usize = 64 * 1024;

fn spawn_error(program: &str) -> ProcessError {
    ProcessError::Spawn {
        program: program.to_string(),
        source: io::Error::new(io::ErrorKind::NotFound, "not installed"),
    }
}

/// Decoder whose output the test writes by hand
///
/// Each spawn keeps the write end of its pipe. The session stays open (and
/// the item keeps playing) until the test finishes it.
#[derive(Default)]
pub struct FakeDecoder {
    fail: AtomicBool,
    starts: AtomicUsize,
    sessions: Mutex<Vec<(String, Option<DuplexStream>)>>,
}

impl FakeDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_spawns(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn locators(&self) -> Vec<String> {
        self.sessions.lock().unwrap().iter().map(|(locator, _)| locator.clone()).collect()
    }

    /// Write PCM into the most recent session
    pub async fn feed(&self, data: &[u8]) {
        let writer = self.sessions.lock().unwrap().last_mut().and_then(|(_, writer)| writer.take());
        if let Some(mut writer) = writer {
            writer.write_all(data).await.unwrap();
            if let Some((_, slot)) = self.sessions.lock().unwrap().last_mut() {
                *slot = Some(writer);
            }
        }
    }

    /// Close the most recent session's output (decoder EOF)
    pub fn finish_latest(&self) {
        if let Some((_, writer)) = self.sessions.lock().unwrap().last_mut() {
            writer.take();
        }
    }
}

impl DecoderLauncher for FakeDecoder {
    fn spawn(&self, locator: &str) -> Result<DecodeSession, ProcessError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(spawn_error("fake-decoder"));
        }
        let (writer, reader) = tokio::io::duplex(PIPE_CAPACITY);
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.sessions.lock().unwrap().push((locator.to_string(), Some(writer)));
        Ok(DecodeSession {
            output: Box::new(reader),
            child: None,
        })
    }
}

struct EncoderPipes {
    /// Encoder stdin as seen from the encoder
    input: DuplexStream,
    /// Encoder stdout as written by the encoder
    output: Option<DuplexStream>,
}

/// Encoder whose output the test writes by hand
#[derive(Default)]
pub struct FakeEncoder {
    fail: AtomicBool,
    starts: AtomicUsize,
    pipes: Mutex<Vec<EncoderPipes>>,
}

impl FakeEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_spawns(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// Emit "encoded" bytes from the most recent encoder
    pub async fn emit(&self, data: &[u8]) {
        let writer = self.pipes.lock().unwrap().last_mut().and_then(|pipes| pipes.output.take());
        let mut writer = writer.expect("no running encoder");
        writer.write_all(data).await.unwrap();
        if let Some(pipes) = self.pipes.lock().unwrap().last_mut() {
            pipes.output = Some(writer);
        }
    }

    /// Simulate an encoder crash (stdout EOF)
    pub fn crash_latest(&self) {
        if let Some(pipes) = self.pipes.lock().unwrap().last_mut() {
            pipes.output.take();
        }
    }

    /// Bytes the pump wrote into the most recent encoder so far
    pub async fn drain_input(&self) -> usize {
        let input = self.pipes.lock().unwrap().pop();
        let Some(mut pipes) = input else {
            return 0;
        };
        let mut buf = vec![0u8; PIPE_CAPACITY];
        let mut total = 0;
        while let Ok(Ok(n)) =
            tokio::time::timeout(std::time::Duration::from_millis(20), pipes.input.read(&mut buf)).await
        {
            if n == 0 {
                break;
            }
            total += n;
        }
        self.pipes.lock().unwrap().push(pipes);
        total
    }
}

impl EncoderLauncher for FakeEncoder {
    fn spawn(&self) -> Result<EncodeSession, ProcessError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(spawn_error("fake-encoder"));
        }
        let (stdin_writer, stdin_reader) = tokio::io::duplex(PIPE_CAPACITY);
        let (stdout_writer, stdout_reader) = tokio::io::duplex(PIPE_CAPACITY);
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.pipes.lock().unwrap().push(EncoderPipes {
            input: stdin_reader,
            output: Some(stdout_writer),
        });
        Ok(EncodeSession {
            input: Box::new(stdin_writer),
            output: Box::new(stdout_reader),
            child: None,
        })
    }
}

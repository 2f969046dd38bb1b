use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use crate::error::AppError;
use crate::log::LogSource;

// Longest piece of output forwarded at once; longer lines are rejoined by the log.
const MAX_CHUNK: u64 = 64 * 1024;

pub struct OutputChunk {
    pub source: LogSource,
    pub text: String,
}

/// Exclusively owned by the execution task that spawned it. Dropping the
/// handle kills the child if it is still running.
pub struct ProcessHandle {
    child: Child,
    pid: u32,
    output: Receiver<OutputChunk>,
}

impl ProcessHandle {
    pub fn spawn(interpreter: &Path, script: &Path) -> Result<Self, AppError> {
        let spawn_error = |source: std::io::Error| AppError::ProcessSpawn {
            interpreter: interpreter.display().to_string(),
            source,
        };

        let mut child = Command::new(interpreter)
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(spawn_error)?;
        let pid = child.id();

        // Each stream gets its own reader so one closing early can't stall the other.
        let (tx, output) = mpsc::channel();
        let readers = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => pump(stdout, LogSource::Stdout, tx.clone())
                .and_then(|_| pump(stderr, LogSource::Stderr, tx)),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "child output pipes unavailable",
            )),
        };
        if let Err(err) = readers {
            let _ = child.kill();
            let _ = child.wait();
            return Err(spawn_error(err));
        }

        tracing::info!(pid, interpreter = %interpreter.display(), "child process spawned");
        Ok(Self { child, pid, output })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Next chunk of output. `Disconnected` means both streams reached EOF.
    pub fn recv_output(&self, timeout: Duration) -> Result<OutputChunk, RecvTimeoutError> {
        self.output.recv_timeout(timeout)
    }

    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// Ask the OS to stop the child and reap it.
    pub fn terminate(&mut self) {
        match self.child.try_wait() {
            Ok(Some(_)) => return,
            Ok(None) => {}
            Err(err) => tracing::debug!(pid = self.pid, error = %err, "try_wait failed before kill"),
        }
        if let Err(err) = self.child.kill() {
            tracing::warn!(pid = self.pid, error = %err, "failed to kill child process");
            return;
        }
        let _ = self.child.wait();
        tracing::info!(pid = self.pid, "child process terminated");
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            self.terminate();
        }
    }
}

fn pump<R>(stream: R, source: LogSource, tx: Sender<OutputChunk>) -> std::io::Result<()>
where
    R: Read + Send + 'static,
{
    let name = match source {
        LogSource::Stdout => "stdout-reader",
        LogSource::Stderr => "stderr-reader",
        LogSource::System => "system-reader",
    };
    thread::Builder::new()
        .name(name.into())
        .spawn(move || read_chunks(stream, source, &tx))?;
    Ok(())
}

fn read_chunks<R: Read>(stream: R, source: LogSource, tx: &Sender<OutputChunk>) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        match (&mut reader).take(MAX_CHUNK).read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let rest = split_incomplete_utf8(&mut buf);
                let text = String::from_utf8_lossy(&buf).into_owned();
                buf = rest;
                if tx.send(OutputChunk { source, text }).is_err() {
                    return;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                tracing::debug!(?source, error = %err, "output stream read failed");
                break;
            }
        }
    }
    if !buf.is_empty() {
        let text = String::from_utf8_lossy(&buf).into_owned();
        let _ = tx.send(OutputChunk { source, text });
    }
}

// Moves a trailing, not yet complete UTF-8 sequence out of `buf`.
fn split_incomplete_utf8(buf: &mut Vec<u8>) -> Vec<u8> {
    let Err(err) = std::str::from_utf8(buf) else {
        return Vec::new();
    };
    if err.error_len().is_none() {
        buf.split_off(err.valid_up_to())
    } else {
        Vec::new()
    }
}

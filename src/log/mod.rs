pub mod types;

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

pub use types::{LogLine, LogSource};

// Complete lines from every handle land in one ordered queue. Line buffers are
// per handle, so partial output from two tasks never mixes.
pub struct LogAggregator {
    queue: Arc<Mutex<LogQueue>>,
    buffers: Mutex<LineBuffers>,
}

#[derive(Default)]
struct LogQueue {
    lines: VecDeque<LogLine>,
    next_sequence: u64,
}

#[derive(Default)]
struct LineBuffers {
    stdout: String,
    stderr: String,
    system: String,
}

impl LineBuffers {
    fn get_mut(&mut self, source: LogSource) -> &mut String {
        match source {
            LogSource::Stdout => &mut self.stdout,
            LogSource::Stderr => &mut self.stderr,
            LogSource::System => &mut self.system,
        }
    }
}

impl LogAggregator {
    pub fn new() -> Self {
        Self {
            queue: Arc::new(Mutex::new(LogQueue::default())),
            buffers: Mutex::new(LineBuffers::default()),
        }
    }

    /// A new producer on the same queue, with empty line buffers.
    pub fn handle(&self) -> Self {
        Self {
            queue: Arc::clone(&self.queue),
            buffers: Mutex::new(LineBuffers::default()),
        }
    }

    pub fn write(&self, source: LogSource, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        // Held until the lines are queued so same-source order survives
        // concurrent writers on this handle.
        let mut buffers = self.buffers.lock();
        let buffer = buffers.get_mut(source);
        buffer.push_str(chunk);

        let mut complete = Vec::new();
        while let Some(pos) = buffer.find('\n') {
            let line: String = buffer.drain(..=pos).collect();
            complete.push(line);
        }
        if !complete.is_empty() {
            self.emit(source, complete);
        }
    }

    /// Emit whatever is left in the buffer for `source`, even without a newline.
    pub fn flush(&self, source: LogSource) {
        let mut buffers = self.buffers.lock();
        let rest = std::mem::take(buffers.get_mut(source));
        if !rest.is_empty() {
            self.emit(source, vec![rest]);
        }
    }

    pub fn system(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        self.write(LogSource::System, message);
        if !message.ends_with('\n') {
            self.flush(LogSource::System);
        }
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.system(format!("warning: {}", message.as_ref()));
    }

    /// Remove and return every queued line, oldest first. Never blocks on producers
    /// for longer than one queue push.
    pub fn drain(&self) -> Vec<LogLine> {
        let mut queue = self.queue.lock();
        queue.lines.drain(..).collect()
    }

    fn emit(&self, source: LogSource, raw_lines: Vec<String>) {
        let mut queue = self.queue.lock();
        for raw in raw_lines {
            let text = raw.trim_end_matches(['\n', '\r']);
            if text.trim().is_empty() {
                continue;
            }
            let sequence = queue.next_sequence;
            queue.next_sequence += 1;
            queue.lines.push_back(LogLine {
                text: text.to_string(),
                source,
                sequence,
            });
        }
    }
}

impl Default for LogAggregator {
    fn default() -> Self {
        Self::new()
    }
}

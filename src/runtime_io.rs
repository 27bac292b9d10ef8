use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;

/// Result type for read operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadResult {
    /// Successfully read a line
    Ok(String),
    /// No more input
    Eof,
    /// Error occurred
    Error(String),
}

/// Abstraction over runtime I/O so the VM can remain pure w.r.t. environment.
pub trait RuntimeIo {
    fn write_line(&mut self, s: &str) {
        self.write(s);
        self.write("\n");
    }
    fn write(&mut self, s: &str);
    /// tracebacks and warnings
    fn write_err(&mut self, s: &str);
    fn read_line(&mut self) -> ReadResult;
}

/// Default I/O that talks to process stdout/stdin (CLI use).
/// Write errors such as a closed pipe (`kuroko script.krk | head`) are dropped.
pub struct StdIo;

/// Write and flush `s`, ignoring errors.
fn write_quietly(out: &mut impl Write, s: &str) {
    if out.write_all(s.as_bytes()).is_ok() {
        let _ = out.flush();
    }
}

impl RuntimeIo for StdIo {
    fn write_line(&mut self, s: &str) {
        let mut out = std::io::stdout().lock();
        if writeln!(out, "{}", s).is_ok() {
            let _ = out.flush();
        }
    }
    fn write(&mut self, s: &str) {
        write_quietly(&mut std::io::stdout().lock(), s);
    }
    fn write_err(&mut self, s: &str) {
        let _ = std::io::stdout().flush();
        write_quietly(&mut std::io::stderr().lock(), s);
    }
    fn read_line(&mut self) -> ReadResult {
        use std::io::{self, BufRead};
        let stdin = io::stdin();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => ReadResult::Eof,
            Ok(_) => ReadResult::Ok(line.trim_end_matches(['\n', '\r']).to_string()),
            Err(e) => ReadResult::Error(e.to_string()),
        }
    }
}

#[derive(Debug, Default)]
struct Buffers {
    output: String,
    errors: String,
    input: VecDeque<String>,
}

/// Buffer-based I/O for tests: caller pushes input, we accumulate output.
///
/// Clones share the same buffers, so a test can hand one clone to the VM and
/// read the output through another.
#[derive(Debug, Clone, Default)]
pub struct BufferIo {
    inner: Arc<Mutex<Buffers>>,
}

impl BufferIo {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn push_input_line<S: Into<String>>(&self, line: S) {
        self.inner.lock().input.push_back(line.into());
    }
    pub fn get_output(&self) -> String {
        self.inner.lock().output.clone()
    }
    pub fn get_errors(&self) -> String {
        self.inner.lock().errors.clone()
    }
    pub fn drain_output(&self) -> String {
        std::mem::take(&mut self.inner.lock().output)
    }
    pub fn clear_output(&self) {
        let mut inner = self.inner.lock();
        inner.output.clear();
        inner.errors.clear();
    }
}

impl RuntimeIo for BufferIo {
    fn write(&mut self, s: &str) {
        self.inner.lock().output.push_str(s);
    }
    fn write_err(&mut self, s: &str) {
        self.inner.lock().errors.push_str(s);
    }
    fn read_line(&mut self) -> ReadResult {
        match self.inner.lock().input.pop_front() {
            Some(line) => ReadResult::Ok(line),
            None => ReadResult::Eof,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_io_clones_share_output() {
        let io = BufferIo::new();
        let mut writer = io.clone();
        writer.write_line("hello");
        writer.write("a");
        writer.write_err("oops\n");
        assert_eq!(io.get_output(), "hello\na");
        assert_eq!(io.get_errors(), "oops\n");
        assert_eq!(io.drain_output(), "hello\na");
        assert_eq!(io.get_output(), "");
    }

    /// A writer whose reader has gone away
    struct ClosedPipe;

    impl Write for ClosedPipe {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
        }
    }

    #[test]
    fn test_write_to_closed_pipe_does_not_panic() {
        write_quietly(&mut ClosedPipe, "lost\n");
        let mut sink = Vec::new();
        write_quietly(&mut sink, "kept");
        assert_eq!(sink, b"kept");
    }

    #[test]
    fn test_buffer_io_input_then_eof() {
        let io = BufferIo::new();
        io.push_input_line("42");
        let mut reader = io.clone();
        assert_eq!(reader.read_line(), ReadResult::Ok("42".to_string()));
        assert_eq!(reader.read_line(), ReadResult::Eof);
    }
}

//! Terminal I/O streams
//!
//! Every command reads from `input` and writes to `out` / `err_out` through an
//! [`IoStreams`] handle instead of touching stdio directly, so tests can capture
//! output with [`SharedBuffer`].

use anyhow::{Result, anyhow};
use std::io::{BufRead, BufReader, Write};
use std::sync::{Arc, Mutex};

pub type SharedWriter = Arc<Mutex<Box<dyn Write + Send>>>;
pub type SharedReader = Arc<Mutex<Box<dyn BufRead + Send>>>;

/// The three standard streams of an invocation
#[derive(Clone)]
pub struct IoStreams {
    pub input: SharedReader,
    pub out: SharedWriter,
    pub err_out: SharedWriter,
}

impl std::fmt::Debug for IoStreams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoStreams").finish_non_exhaustive()
    }
}

impl IoStreams {
    pub fn new(
        input: Box<dyn BufRead + Send>,
        out: Box<dyn Write + Send>,
        err_out: Box<dyn Write + Send>,
    ) -> Self {
        Self {
            input: Arc::new(Mutex::new(input)),
            out: Arc::new(Mutex::new(out)),
            err_out: Arc::new(Mutex::new(err_out)),
        }
    }

    /// Streams bound to the process stdin, stdout and stderr
    pub fn system() -> Self {
        Self::new(
            Box::new(BufReader::new(std::io::stdin())),
            Box::new(std::io::stdout()),
            Box::new(std::io::stderr()),
        )
    }

    /// Streams backed by memory: `input` is served to readers, the returned
    /// buffers collect stdout and stderr
    pub fn buffered(input: &str) -> (Self, SharedBuffer, SharedBuffer) {
        let out = SharedBuffer::default();
        let err_out = SharedBuffer::default();
        let streams = Self::new(
            Box::new(std::io::Cursor::new(input.as_bytes().to_vec())),
            Box::new(out.clone()),
            Box::new(err_out.clone()),
        );
        (streams, out, err_out)
    }

    /// Identity comparison used by the pooled factory
    pub fn same_as(&self, other: &IoStreams) -> bool {
        Arc::ptr_eq(&self.out, &other.out)
            && Arc::ptr_eq(&self.err_out, &other.err_out)
            && Arc::ptr_eq(&self.input, &other.input)
    }

    pub fn write_out(&self, text: &str) -> Result<()> {
        write_locked(&self.out, text.as_bytes())
    }

    pub fn write_err(&self, text: &str) -> Result<()> {
        write_locked(&self.err_out, text.as_bytes())
    }

    /// Read one line from input without its trailing newline
    pub fn read_line(&self) -> Result<String> {
        let mut guard = self
            .input
            .lock()
            .map_err(|_| anyhow!("input stream lock poisoned"))?;
        let mut line = String::new();
        guard.read_line(&mut line)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

pub(crate) fn write_locked(writer: &SharedWriter, bytes: &[u8]) -> Result<()> {
    let mut guard = writer
        .lock()
        .map_err(|_| anyhow!("output stream lock poisoned"))?;
    guard.write_all(bytes)?;
    guard.flush()?;
    Ok(())
}

/// Cloneable in-memory writer
#[derive(Clone, Default, Debug)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Everything written so far, lossily decoded
    pub fn contents(&self) -> String {
        self.0
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut buf) = self.0.lock() {
            buf.clear();
        }
    }

    /// A shared writer appending to this buffer
    pub fn writer(&self) -> SharedWriter {
        let boxed: Box<dyn Write + Send> = Box::new(self.clone());
        Arc::new(Mutex::new(boxed))
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        let mut buf = self
            .0
            .lock()
            .map_err(|_| std::io::Error::other("buffer lock poisoned"))?;
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffered_streams_capture_output() {
        let (streams, out, err) = IoStreams::buffered("first\nsecond\n");
        streams.write_out("hello").unwrap();
        streams.write_err("oops").unwrap();
        assert_eq!(out.contents(), "hello");
        assert_eq!(err.contents(), "oops");
        assert_eq!(streams.read_line().unwrap(), "first");
        assert_eq!(streams.read_line().unwrap(), "second");
        assert_eq!(streams.read_line().unwrap(), "");
    }

    #[test]
    fn test_same_as_is_identity() {
        let (a, _, _) = IoStreams::buffered("");
        let (b, _, _) = IoStreams::buffered("");
        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
    }
}

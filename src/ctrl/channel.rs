use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

/// Longest line accepted from a peer, terminator included.
pub const MAX_LINE_LEN: usize = 4096;

/// Connect to `addr`, retrying every `wait_on_failure` until it succeeds or
/// `attempts` connections have been refused.
pub fn connect_until_success(
    addr: impl ToSocketAddrs,
    wait_on_failure: Duration,
    attempts: usize,
) -> io::Result<TcpStream> {
    let mut tried = 0;
    loop {
        match TcpStream::connect(&addr) {
            Ok(stream) => break Ok(stream),
            Err(e) => {
                tried += 1;
                if tried >= attempts {
                    break Err(e);
                }
                log::debug!("ibcached: connect attempt {} failed: {}", tried, e);
                thread::sleep(wait_on_failure);
            }
        }
    }
}

/// CRLF-terminated text lines over a reliable byte stream.
#[derive(Debug)]
pub struct LineChannel<S: Read + Write> {
    inner: BufReader<S>,
}

impl LineChannel<TcpStream> {
    /// Connect to a control endpoint, retrying every 200ms.
    pub fn connect(addr: impl ToSocketAddrs, attempts: usize) -> io::Result<Self> {
        let stream = connect_until_success(addr, Duration::from_millis(200), attempts)?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }
}

impl<S: Read + Write> LineChannel<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: BufReader::new(stream),
        }
    }

    pub fn get_ref(&self) -> &S {
        self.inner.get_ref()
    }

    /// Send `line` followed by CRLF.
    pub fn send_line(&mut self, line: &str) -> io::Result<()> {
        if line.contains(|c: char| c == '\r' || c == '\n') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "line must not contain a line terminator",
            ));
        }
        let stream = self.inner.get_mut();
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\r\n")?;
        stream.flush()
    }

    /// Receive one line without its terminator. A bare LF also ends a line.
    /// `Ok(None)` when the peer closed the stream between lines.
    pub fn recv_line(&mut self) -> io::Result<Option<String>> {
        let mut raw = Vec::new();
        let n = (&mut self.inner)
            .take(MAX_LINE_LEN as u64)
            .read_until(b'\n', &mut raw)?;
        if n == 0 {
            return Ok(None);
        }
        if raw.last() != Some(&b'\n') {
            let kind = if n == MAX_LINE_LEN {
                io::ErrorKind::InvalidData
            } else {
                io::ErrorKind::UnexpectedEof
            };
            return Err(io::Error::new(kind, "unterminated control line"));
        }
        raw.pop();
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        String::from_utf8(raw)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Receive a line, treating a closed stream as an error.
    pub fn expect_line(&mut self) -> io::Result<String> {
        self.recv_line()?.ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "control channel closed")
        })
    }
}

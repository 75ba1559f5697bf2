//! Outbound side of a robot connection.

use parking_lot::Mutex;
use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;

/// Line-oriented writer towards one robot.
pub trait RobotLink: Send + Sync {
    /// Write one line; the trailing newline is added here.
    fn send_line(&self, line: &str) -> io::Result<()>;

    /// Close both directions, waking a blocked reader.
    fn shutdown(&self);
}

pub struct TcpLink {
    stream: Mutex<TcpStream>,
}

impl TcpLink {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            stream: Mutex::new(stream),
        }
    }
}

impl RobotLink for TcpLink {
    fn send_line(&self, line: &str) -> io::Result<()> {
        let mut stream = self.stream.lock();
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()
    }

    fn shutdown(&self) {
        let _ = self.stream.lock().shutdown(Shutdown::Both);
    }
}

/// In-memory link for unit tests
#[derive(Clone, Default)]
pub struct MockLink {
    inner: Arc<Mutex<MockLinkInner>>,
}

#[derive(Default)]
struct MockLinkInner {
    sent: Vec<String>,
    closed: bool,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every line written so far
    pub fn sent(&self) -> Vec<String> {
        self.inner.lock().sent.clone()
    }

    /// `CMD` values of every line written so far
    pub fn sent_commands(&self) -> Vec<String> {
        self.sent()
            .iter()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter_map(|v| v.get("CMD").and_then(|c| c.as_str()).map(str::to_string))
            .collect()
    }

    pub fn clear(&self) {
        self.inner.lock().sent.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl RobotLink for MockLink {
    fn send_line(&self, line: &str) -> io::Result<()> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "link closed"));
        }
        inner.sent.push(line.to_string());
        Ok(())
    }

    fn shutdown(&self) {
        self.inner.lock().closed = true;
    }
}

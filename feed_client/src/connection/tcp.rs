//! Push channel over a plain TCP stream carrying newline-delimited JSON.
//!
//! The connector dials the server, sends an `authenticate` frame first, and then splits
//! the stream: the writer half sends control frames, the reader half decodes
//! `PushMessage` lines. Lines that are not valid frames are logged and skipped.
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use feed_common::{ControlMessage, FeedError, PushMessage, Result};
use log::{debug, info};

use crate::connection::{Connection, Connector, Credential, FrameReader, FrameWriter};

/// Longest accepted frame, newline excluded.
const MAX_FRAME_LEN: usize = 64 * 1024;

/// Dials the push server at a `host:port` address.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Creates a connector for `addr` (e.g. `127.0.0.1:4000`).
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
        }
    }

    fn dial(&self) -> Result<TcpStream> {
        let addrs: Vec<SocketAddr> = self.addr.to_socket_addrs()?.collect();
        let mut last_error = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(match last_error {
            Some(e) => FeedError::Connection(format!("{}: {}", self.addr, e)),
            None => FeedError::Connection(format!("{}: no address resolved", self.addr)),
        })
    }
}

impl Connector for TcpConnector {
    fn connect(&mut self, credential: &Credential) -> Result<Connection> {
        info!("Connecting to push server at {}", self.addr);
        let stream = self.dial()?;
        stream.set_nodelay(true)?;
        let read_stream = stream.try_clone()?;

        let mut writer = TcpFrameWriter { stream };
        writer.send(&ControlMessage::Authenticate {
            token: credential.token().to_string(),
        })?;

        Ok(Connection {
            writer: Box::new(writer),
            reader: Box::new(LineFrameReader::new(BufReader::new(read_stream))),
        })
    }
}

struct TcpFrameWriter {
    stream: TcpStream,
}

impl FrameWriter for TcpFrameWriter {
    fn send(&mut self, message: &ControlMessage) -> Result<()> {
        let line = message.to_line()?;
        self.stream.write_all(&line)?;
        Ok(())
    }

    fn close(&mut self) {
        // unblocks the reader half sharing this socket
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

struct LineFrameReader<R> {
    reader: R,
    line: Vec<u8>,
}

impl<R: BufRead> LineFrameReader<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
        }
    }
}

impl<R: BufRead + Send> FrameReader for LineFrameReader<R> {
    fn next_message(&mut self) -> Result<Option<PushMessage>> {
        loop {
            self.line.clear();
            let limit = (MAX_FRAME_LEN + 1) as u64;
            if (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut self.line)?
                == 0
            {
                return Ok(None);
            }
            if self.line.len() > MAX_FRAME_LEN && self.line.last() != Some(&b'\n') {
                return Err(FeedError::Connection(format!(
                    "frame longer than {} bytes",
                    MAX_FRAME_LEN
                )));
            }
            let frame = self.line.trim_ascii();
            if frame.is_empty() {
                continue;
            }
            match PushMessage::from_line(frame) {
                Ok(message) => return Ok(Some(message)),
                Err(_) => debug!(
                    "Received non-frame line: {}",
                    String::from_utf8_lossy(frame)
                ),
            }
        }
    }
}

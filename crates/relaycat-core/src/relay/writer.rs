//! Blocking full writes to an endpoint's write side.

use std::io::{self, ErrorKind};
use std::os::fd::AsFd;

use super::readiness;
use crate::endpoint::{EndpointKind, Sink};
use crate::error::{Error, Result};

/// Write side of a relay link.
#[derive(Debug)]
pub struct WriterAdapter {
    sink: Option<Sink>,
    closed: bool,
}

impl WriterAdapter {
    pub fn new(sink: Option<Sink>) -> Self {
        let closed = sink.is_none();
        Self { sink, closed }
    }

    /// Write all of `bytes`, waiting for the descriptor to become writable
    /// whenever the OS pushes back. Stream sinks are flushed afterwards.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let sink = match self.sink.as_mut() {
            Some(sink) if !self.closed => sink,
            _ => return Err(Error::WriterClosed),
        };

        let mut remaining = bytes;
        while !remaining.is_empty() {
            match sink.write(remaining) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero).into()),
                Ok(n) => remaining = &remaining[n..],
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    readiness::wait_writable(sink.as_fd())?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if sink.kind() == EndpointKind::Stream {
            sink.flush()?;
        }
        Ok(())
    }

    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the write handle; sockets are shut down for writing. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Some(sink) = self.sink.take() {
            sink.release();
        }
        self.closed = true;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{Read, Seek};
    use std::net::{TcpListener, TcpStream};
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;
    use std::thread;

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (server, client)
    }

    #[test]
    fn nonblocking_socket_write_completes_past_buffer_size() {
        let (server, mut client) = socket_pair();
        server.set_nonblocking(true).unwrap();
        let payload: Vec<u8> = (0..4_000_000u32).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let reader = thread::spawn(move || {
            let mut received = vec![0u8; expected.len()];
            client.read_exact(&mut received).unwrap();
            assert!(received == expected);
        });

        let mut writer = WriterAdapter::new(Some(Sink::Socket(Arc::new(server))));
        writer.write(&payload).unwrap();
        reader.join().unwrap();
    }

    #[test]
    fn file_sink_receives_bytes_in_order() {
        let file = tempfile::tempfile().unwrap();
        let mut check = file.try_clone().unwrap();
        let mut writer = WriterAdapter::new(Some(Sink::File(file)));
        writer.write(b"abc").unwrap();
        writer.write(b"def").unwrap();

        check.rewind().unwrap();
        let mut contents = String::new();
        check.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "abcdef");
    }

    #[test]
    fn stream_sink_is_visible_immediately() {
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        let mut writer = WriterAdapter::new(Some(Sink::Stream(File::from(OwnedFd::from(ours)))));
        writer.write(b"ping").unwrap();

        let mut buf = [0u8; 4];
        theirs.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[test]
    fn write_after_close_fails() {
        let (server, mut client) = socket_pair();
        let mut writer = WriterAdapter::new(Some(Sink::Socket(Arc::new(server))));
        writer.close();
        writer.close();

        assert!(writer.is_closed());
        assert!(matches!(writer.write(b"x"), Err(Error::WriterClosed)));

        // The peer sees end-of-stream from the write-side shutdown.
        let mut buf = Vec::new();
        client.read_to_end(&mut buf).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn absent_sink_is_closed() {
        let mut writer = WriterAdapter::new(None);
        assert!(writer.is_closed());
        assert!(matches!(writer.write(b"x"), Err(Error::WriterClosed)));
    }

    #[test]
    fn broken_pipe_surfaces_as_io_error() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        drop(theirs);
        let mut writer = WriterAdapter::new(Some(Sink::Stream(File::from(OwnedFd::from(ours)))));

        assert!(matches!(writer.write(b"lost"), Err(Error::Io(_))));
    }
}

//! Batched pull from an endpoint's read side.

use std::io::{self, ErrorKind};
use std::iter::FusedIterator;
use std::os::fd::{AsFd, BorrowedFd};

use crate::endpoint::Source;
use crate::error::{Error, Result};

/// Read side of a relay link.
///
/// Once `eof` is observed no further reads are attempted. `closed` becomes
/// true only after the handle has been released by [`ReaderAdapter::close`].
#[derive(Debug)]
pub struct ReaderAdapter {
    source: Option<Source>,
    eof: bool,
    closed: bool,
}

impl ReaderAdapter {
    pub fn new(source: Option<Source>) -> Self {
        let absent = source.is_none();
        Self {
            source,
            eof: absent,
            closed: absent,
        }
    }

    /// Pull whatever the handle can deliver right now.
    ///
    /// The caller must have been told the handle is readable. The returned
    /// sequence is finite and advancing it may set `eof`:
    ///
    /// - stream: at most one read, since there is no way to look ahead
    ///   without blocking;
    /// - file: reads until a zero-length read;
    /// - socket: keeps reading while reads fill the whole batch and the
    ///   socket is non-blocking; a short read or would-block ends the
    ///   sequence.
    ///
    /// A zero-length read sets `eof` and ends the sequence without a chunk.
    pub fn next_batches(&mut self, max_batch_size: usize) -> Result<Batches<'_>> {
        if self.closed && !self.eof {
            return Err(Error::ReaderClosed);
        }
        let done = self.eof;
        Ok(Batches {
            reader: self,
            batch_size: max_batch_size.max(1),
            done,
        })
    }

    pub const fn is_eof(&self) -> bool {
        self.eof
    }

    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Descriptor to register for readiness, while the handle is held.
    pub fn as_fd(&self) -> Option<BorrowedFd<'_>> {
        self.source.as_ref().map(AsFd::as_fd)
    }

    /// Release the read handle. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if let Some(source) = self.source.take() {
            source.release();
        }
        self.closed = true;
    }
}

/// Lazy, finite sequence of chunks produced by [`ReaderAdapter::next_batches`].
#[derive(Debug)]
pub struct Batches<'a> {
    reader: &'a mut ReaderAdapter,
    batch_size: usize,
    done: bool,
}

impl Batches<'_> {
    fn read_chunk(&mut self) -> Option<io::Result<Vec<u8>>> {
        let source = self.reader.source.as_mut()?;
        let mut buf = vec![0u8; self.batch_size];
        let read = loop {
            match source.read(&mut buf) {
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                other => break other,
            }
        };

        let n = match read {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => return None,
            Err(e) => return Some(Err(e)),
        };
        if n == 0 {
            self.reader.eof = true;
            return None;
        }

        let more = match source {
            Source::Stream(_) => false,
            Source::File(_) => true,
            Source::Socket { nonblocking, .. } => *nonblocking && n == self.batch_size,
        };
        if !more {
            self.done = true;
        }
        buf.truncate(n);
        Some(Ok(buf))
    }
}

impl Iterator for Batches<'_> {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let chunk = self.read_chunk();
        if !matches!(chunk, Some(Ok(_))) {
            self.done = true;
        }
        chunk
    }
}

impl FusedIterator for Batches<'_> {}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{Seek, Write};
    use std::net::{Shutdown, TcpListener, TcpStream};
    use std::os::fd::OwnedFd;
    use std::os::unix::net::UnixStream;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (server, client)
    }

    fn socket_reader(stream: TcpStream, nonblocking: bool) -> ReaderAdapter {
        stream.set_nonblocking(nonblocking).unwrap();
        ReaderAdapter::new(Some(Source::Socket {
            stream: Arc::new(stream),
            nonblocking,
        }))
    }

    fn sizes(reader: &mut ReaderAdapter, batch: usize) -> Vec<usize> {
        reader
            .next_batches(batch)
            .unwrap()
            .map(|chunk| chunk.unwrap().len())
            .collect()
    }

    #[test]
    fn nonblocking_socket_drains_in_full_batches() {
        let (server, mut client) = socket_pair();
        client.write_all(&[7u8; 10_000]).unwrap();
        thread::sleep(Duration::from_millis(50));

        let mut reader = socket_reader(server, true);
        assert_eq!(sizes(&mut reader, 4096), vec![4096, 4096, 1808]);
        assert!(!reader.is_eof());

        // Nothing left: would-block ends the sequence quietly.
        assert!(sizes(&mut reader, 4096).is_empty());
        assert!(!reader.is_eof());
    }

    #[test]
    fn full_batch_then_would_block_yields_one_chunk() {
        let (server, mut client) = socket_pair();
        client.write_all(&[1u8; 4096]).unwrap();
        thread::sleep(Duration::from_millis(50));

        let mut reader = socket_reader(server, true);
        assert_eq!(sizes(&mut reader, 4096), vec![4096]);
        assert!(!reader.is_eof());
    }

    #[test]
    fn blocking_socket_reads_once() {
        let (server, mut client) = socket_pair();
        client.write_all(&[3u8; 10_000]).unwrap();
        thread::sleep(Duration::from_millis(50));

        let mut reader = socket_reader(server, false);
        assert_eq!(sizes(&mut reader, 4096), vec![4096]);
    }

    #[test]
    fn socket_eof_after_peer_shutdown() {
        let (server, mut client) = socket_pair();
        client.write_all(b"bye").unwrap();
        client.shutdown(Shutdown::Write).unwrap();
        thread::sleep(Duration::from_millis(50));

        let mut reader = socket_reader(server, true);
        assert_eq!(sizes(&mut reader, 4096), vec![3]);
        assert!(!reader.is_eof());
        assert!(sizes(&mut reader, 4096).is_empty());
        assert!(reader.is_eof());
    }

    #[test]
    fn file_reads_to_completion() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&[9u8; 10_000]).unwrap();
        file.rewind().unwrap();

        let mut reader = ReaderAdapter::new(Some(Source::File(file)));
        assert_eq!(sizes(&mut reader, 4096), vec![4096, 4096, 1808]);
        assert!(reader.is_eof());
        assert!(sizes(&mut reader, 4096).is_empty());
    }

    #[test]
    fn stream_yields_single_chunk_without_blocking() {
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        theirs.write_all(b"0123456789").unwrap();

        let stream = File::from(OwnedFd::from(ours));
        let mut reader = ReaderAdapter::new(Some(Source::Stream(stream)));
        let chunks: Vec<Vec<u8>> = reader
            .next_batches(4096)
            .unwrap()
            .map(io::Result::unwrap)
            .collect();

        assert_eq!(chunks, vec![b"0123456789".to_vec()]);
        assert!(!reader.is_eof());
    }

    #[test]
    fn stream_zero_read_is_eof() {
        let (ours, theirs) = UnixStream::pair().unwrap();
        drop(theirs);

        let stream = File::from(OwnedFd::from(ours));
        let mut reader = ReaderAdapter::new(Some(Source::Stream(stream)));
        assert!(sizes(&mut reader, 4096).is_empty());
        assert!(reader.is_eof());
    }

    #[test]
    fn absent_source_starts_at_eof() {
        let mut reader = ReaderAdapter::new(None);
        assert!(reader.is_eof());
        assert!(reader.is_closed());
        assert!(reader.as_fd().is_none());
        assert!(sizes(&mut reader, 16).is_empty());
    }

    #[test]
    fn closed_reader_refuses_reads() {
        let (server, _client) = socket_pair();
        let mut reader = socket_reader(server, true);
        reader.close();
        reader.close();

        assert!(reader.is_closed());
        assert!(matches!(reader.next_batches(16), Err(Error::ReaderClosed)));
    }
}

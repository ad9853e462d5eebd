//! Opened endpoints and their read/write handles.
//!
//! The handle kind is fixed when the endpoint is built; the relay engine
//! dispatches on the [`Source`] / [`Sink`] variant instead of inspecting the
//! descriptor on every call.

mod resolve;

use std::fs::File;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::Arc;

use nix::fcntl::{FcntlArg, OFlag, fcntl};
use tracing::debug;

pub use resolve::{Acceptor, resolve};

/// Endpoint flavour, chosen once at resolution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// Connected TCP socket; reads may be drained in several batches.
    Socket,
    /// Regular file; reads never block and run to completion.
    File,
    /// Raw standard stream; one read per readiness notification.
    Stream,
}

/// Read side of an endpoint.
#[derive(Debug)]
pub enum Source {
    Socket {
        stream: Arc<TcpStream>,
        nonblocking: bool,
    },
    File(File),
    Stream(File),
}

impl Source {
    pub const fn kind(&self) -> EndpointKind {
        match self {
            Self::Socket { .. } => EndpointKind::Socket,
            Self::File(_) => EndpointKind::File,
            Self::Stream(_) => EndpointKind::Stream,
        }
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Socket { stream, .. } => (&**stream).read(buf),
            Self::File(file) | Self::Stream(file) => file.read(buf),
        }
    }

    /// Release the read side. Sockets are shut down for reading only so
    /// the write side stays usable.
    pub(crate) fn release(self) {
        if let Self::Socket { stream, .. } = self {
            // Peer may already be gone; the read side is released either way.
            let _ = stream.shutdown(Shutdown::Read);
        }
    }
}

impl AsFd for Source {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Self::Socket { stream, .. } => stream.as_fd(),
            Self::File(file) | Self::Stream(file) => file.as_fd(),
        }
    }
}

/// Write side of an endpoint.
#[derive(Debug)]
pub enum Sink {
    Socket(Arc<TcpStream>),
    File(File),
    Stream(File),
}

impl Sink {
    pub const fn kind(&self) -> EndpointKind {
        match self {
            Self::Socket(_) => EndpointKind::Socket,
            Self::File(_) => EndpointKind::File,
            Self::Stream(_) => EndpointKind::Stream,
        }
    }

    pub(crate) fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Socket(stream) => (&**stream).write(buf),
            Self::File(file) | Self::Stream(file) => file.write(buf),
        }
    }

    pub(crate) fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Socket(stream) => (&**stream).flush(),
            Self::File(file) | Self::Stream(file) => file.flush(),
        }
    }

    /// Release the write side. Sockets are shut down for writing so the
    /// peer observes end-of-stream.
    pub(crate) fn release(self) {
        if let Self::Socket(stream) = self {
            let _ = stream.shutdown(Shutdown::Write);
        }
    }
}

impl AsFd for Sink {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match self {
            Self::Socket(stream) => stream.as_fd(),
            Self::File(file) | Self::Stream(file) => file.as_fd(),
        }
    }
}

/// A resolved, opened endpoint. Either side may be absent.
#[derive(Debug)]
pub struct Endpoint {
    label: String,
    kind: EndpointKind,
    source: Option<Source>,
    sink: Option<Sink>,
    restore: Option<StatusFlagsGuard>,
}

/// An [`Endpoint`] taken apart. `restore` must outlive any use of `source`.
#[derive(Debug)]
pub struct EndpointParts {
    pub label: String,
    pub source: Option<Source>,
    pub sink: Option<Sink>,
    pub restore: Option<StatusFlagsGuard>,
}

impl Endpoint {
    /// Assemble an endpoint from already-opened handles.
    pub fn from_parts(
        label: impl Into<String>,
        kind: EndpointKind,
        source: Option<Source>,
        sink: Option<Sink>,
    ) -> Self {
        Self {
            label: label.into(),
            kind,
            source,
            sink,
            restore: None,
        }
    }

    /// A connected TCP socket; both sides share the same descriptor.
    pub fn socket(stream: TcpStream, nonblocking: bool) -> io::Result<Self> {
        stream.set_nonblocking(nonblocking)?;
        let label = stream
            .peer_addr()
            .map_or_else(|_| "TCP".to_string(), |peer| format!("TCP:{peer}"));
        let stream = Arc::new(stream);
        Ok(Self::from_parts(
            label,
            EndpointKind::Socket,
            Some(Source::Socket {
                stream: Arc::clone(&stream),
                nonblocking,
            }),
            Some(Sink::Socket(stream)),
        ))
    }

    /// A read-only file.
    pub fn file(label: impl Into<String>, file: File) -> Self {
        Self::from_parts(label, EndpointKind::File, Some(Source::File(file)), None)
    }

    /// The process's stdin and stdout, as unbuffered duplicates of fds 0/1.
    pub fn stdio(nonblocking_stdin: bool) -> io::Result<Self> {
        let stdin = File::from(io::stdin().as_fd().try_clone_to_owned()?);
        let stdout = File::from(io::stdout().as_fd().try_clone_to_owned()?);
        Self::stream("-", stdin, stdout, nonblocking_stdin)
    }

    /// A pair of raw streams. With `nonblocking_input` the input's status
    /// flags are switched to non-blocking and restored once the endpoint's
    /// restore guard is dropped.
    pub fn stream(
        label: impl Into<String>,
        input: File,
        output: File,
        nonblocking_input: bool,
    ) -> io::Result<Self> {
        let restore = if nonblocking_input {
            Some(StatusFlagsGuard::nonblocking(input.as_fd())?)
        } else {
            None
        };
        let mut endpoint = Self::from_parts(
            label,
            EndpointKind::Stream,
            Some(Source::Stream(input)),
            Some(Sink::Stream(output)),
        );
        endpoint.restore = restore;
        Ok(endpoint)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub const fn kind(&self) -> EndpointKind {
        self.kind
    }

    pub const fn is_readable(&self) -> bool {
        self.source.is_some()
    }

    pub const fn is_writable(&self) -> bool {
        self.sink.is_some()
    }

    /// Split into label, read side, write side and flag guard.
    pub fn into_parts(self) -> EndpointParts {
        EndpointParts {
            label: self.label,
            source: self.source,
            sink: self.sink,
            restore: self.restore,
        }
    }
}

/// Puts a descriptor's original status flags back when dropped.
///
/// The flags live on the open file description, which stdin usually shares
/// with the invoking shell.
#[derive(Debug)]
pub struct StatusFlagsGuard {
    fd: OwnedFd,
    original: OFlag,
}

impl StatusFlagsGuard {
    /// Set `O_NONBLOCK` on `fd`, remembering the previous flags.
    pub fn nonblocking(fd: BorrowedFd<'_>) -> io::Result<Self> {
        let fd = fd.try_clone_to_owned()?;
        let original = OFlag::from_bits_truncate(fcntl(&fd, FcntlArg::F_GETFL)?);
        fcntl(&fd, FcntlArg::F_SETFL(original | OFlag::O_NONBLOCK))?;
        Ok(Self { fd, original })
    }
}

impl Drop for StatusFlagsGuard {
    fn drop(&mut self) {
        if let Err(e) = fcntl(&self.fd, FcntlArg::F_SETFL(self.original)) {
            debug!(error = %e, "Failed to restore descriptor flags");
        }
    }
}

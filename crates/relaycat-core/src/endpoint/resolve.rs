//! Turning parsed addresses into opened endpoints.

use std::fs::File;
use std::net::{SocketAddr, TcpListener, TcpStream};

use socket2::{Domain, Protocol, Socket, Type};
use tracing::info;

use super::Endpoint;
use crate::address::{AddressSpec, ListenOptions};
use crate::config::RelayConfig;
use crate::error::{Error, Result};

const LISTEN_BACKLOG: i32 = 128;

/// Open the endpoint named by `spec`.
///
/// A `TCP-LISTEN` address binds, accepts exactly one connection and closes
/// the listening socket again; the `fork` option is handled by
/// [`crate::dispatch::relay`], which keeps an [`Acceptor`] instead.
pub fn resolve(spec: &AddressSpec, config: &RelayConfig) -> Result<Endpoint> {
    info!(address = %spec, "Opening address");

    match spec {
        AddressSpec::Stdio => {
            Endpoint::stdio(config.nonblocking_stdin).map_err(|e| Error::resolve(spec, e))
        }
        AddressSpec::TcpConnect { host, port } => {
            let stream =
                TcpStream::connect((host.as_str(), *port)).map_err(|e| Error::resolve(spec, e))?;
            Endpoint::socket(stream, config.nonblocking_sockets)
                .map_err(|e| Error::resolve(spec, e))
        }
        AddressSpec::TcpListen { port, options } => {
            let acceptor = Acceptor::bind(SocketAddr::from(([0, 0, 0, 0], *port)), *options)?;
            acceptor.accept(config)
        }
        AddressSpec::OpenFile { path } => {
            let file = File::open(path).map_err(|e| Error::resolve(spec, e))?;
            Ok(Endpoint::file(spec.to_string(), file))
        }
    }
}

/// A listening TCP socket producing one [`Endpoint`] per accepted connection.
#[derive(Debug)]
pub struct Acceptor {
    listener: TcpListener,
    label: String,
}

impl Acceptor {
    /// Bind and listen on `addr`, setting `SO_REUSEADDR` only when asked to.
    pub fn bind(addr: SocketAddr, options: ListenOptions) -> Result<Self> {
        let label = AddressSpec::TcpListen {
            port: addr.port(),
            options,
        }
        .to_string();

        let listener = Self::listen(addr, options).map_err(|e| Error::resolve(&label, e))?;
        let local = listener.local_addr().map_err(|e| Error::resolve(&label, e))?;
        info!(address = %label, local = %local, "Listening");

        Ok(Self { listener, label })
    }

    fn listen(addr: SocketAddr, options: ListenOptions) -> std::io::Result<TcpListener> {
        let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
        if options.reuse_addr {
            socket.set_reuse_address(true)?;
        }
        socket.bind(&addr.into())?;
        socket.listen(LISTEN_BACKLOG)?;
        Ok(socket.into())
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Block until a client connects and wrap the connection.
    pub fn accept(&self, config: &RelayConfig) -> Result<Endpoint> {
        let (stream, peer) = self
            .listener
            .accept()
            .map_err(|e| Error::resolve(&self.label, e))?;
        info!(address = %self.label, peer = %peer, "Accepted connection");
        Endpoint::socket(stream, config.nonblocking_sockets)
            .map_err(|e| Error::resolve(&self.label, e))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::endpoint::EndpointKind;
    use std::io::Write;
    use std::net::Ipv4Addr;
    use std::thread;

    fn loopback() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 0))
    }

    #[test]
    fn open_file_is_read_only_file_endpoint() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"payload").unwrap();
        let spec = AddressSpec::OpenFile {
            path: file.path().to_path_buf(),
        };

        let endpoint = resolve(&spec, &RelayConfig::default()).unwrap();
        assert_eq!(endpoint.kind(), EndpointKind::File);
        assert!(!endpoint.is_writable());
    }

    #[test]
    fn missing_file_is_resolve_error() {
        let dir = tempfile::tempdir().unwrap();
        let spec = AddressSpec::OpenFile {
            path: dir.path().join("absent"),
        };

        let err = resolve(&spec, &RelayConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Resolve { .. }));
        assert!(!err.is_configuration());
    }

    #[test]
    fn connect_to_closed_port_is_resolve_error() {
        let port = {
            let probe = TcpListener::bind(loopback()).unwrap();
            probe.local_addr().unwrap().port()
        };
        let spec = AddressSpec::TcpConnect {
            host: "127.0.0.1".into(),
            port,
        };

        assert!(matches!(
            resolve(&spec, &RelayConfig::default()),
            Err(Error::Resolve { .. })
        ));
    }

    #[test]
    fn connect_yields_socket_endpoint() {
        let listener = TcpListener::bind(loopback()).unwrap();
        let spec = AddressSpec::TcpConnect {
            host: "127.0.0.1".into(),
            port: listener.local_addr().unwrap().port(),
        };

        let endpoint = resolve(&spec, &RelayConfig::default()).unwrap();
        assert_eq!(endpoint.kind(), EndpointKind::Socket);
        assert!(endpoint.is_readable() && endpoint.is_writable());
    }

    #[test]
    fn acceptor_yields_one_endpoint_per_connection() {
        let acceptor = Acceptor::bind(loopback(), ListenOptions::default()).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let clients = thread::spawn(move || {
            let first = TcpStream::connect(addr).unwrap();
            let second = TcpStream::connect(addr).unwrap();
            (first, second)
        });

        let config = RelayConfig::default();
        let a = acceptor.accept(&config).unwrap();
        let b = acceptor.accept(&config).unwrap();
        let _clients = clients.join().unwrap();

        assert_eq!(a.kind(), EndpointKind::Socket);
        assert_ne!(a.label(), b.label());
    }

    #[test]
    fn reuseaddr_rebinds_fresh_port() {
        let options = ListenOptions {
            reuse_addr: true,
            fork: false,
        };
        let first = Acceptor::bind(loopback(), options).unwrap();
        let addr = first.local_addr().unwrap();
        drop(first);

        assert!(Acceptor::bind(addr, options).is_ok());
    }
}

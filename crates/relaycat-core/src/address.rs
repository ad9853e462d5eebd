//! Endpoint address grammar.
//!
//! | form                         | endpoint                               |
//! |------------------------------|----------------------------------------|
//! | `-`                          | stdin / stdout                         |
//! | `TCP:<host>:<port>`          | outgoing TCP connection                |
//! | `TCP-LISTEN:<port>[,opt...]` | accepted TCP connection (`reuseaddr`, `fork`) |
//! | `OPEN:<path>`                | local file, read-only                  |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

use crate::error::{Error, Result};

const TCP_PREFIX: &str = "TCP:";
const TCP_LISTEN_PREFIX: &str = "TCP-LISTEN:";
const OPEN_PREFIX: &str = "OPEN:";

/// Options accepted after the port of a `TCP-LISTEN` address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenOptions {
    /// Set `SO_REUSEADDR` before binding.
    pub reuse_addr: bool,
    /// Keep accepting, serving each connection in its own session.
    pub fork: bool,
}

/// A parsed endpoint address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSpec {
    Stdio,
    TcpConnect { host: String, port: u16 },
    TcpListen { port: u16, options: ListenOptions },
    OpenFile { path: PathBuf },
}

impl AddressSpec {
    /// Whether this address accepts connections repeatedly.
    pub const fn is_forking_listener(&self) -> bool {
        matches!(
            self,
            Self::TcpListen {
                options: ListenOptions { fork: true, .. },
                ..
            }
        )
    }
}

impl FromStr for AddressSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "-" {
            return Ok(Self::Stdio);
        }
        if let Some(rest) = s.strip_prefix(TCP_LISTEN_PREFIX) {
            return parse_listen(s, rest);
        }
        if let Some(rest) = s.strip_prefix(TCP_PREFIX) {
            return parse_connect(s, rest);
        }
        if let Some(rest) = s.strip_prefix(OPEN_PREFIX) {
            if rest.is_empty() {
                return Err(invalid(s, "missing file name"));
            }
            return Ok(Self::OpenFile {
                path: PathBuf::from(rest),
            });
        }
        Err(Error::UnrecognizedAddress(s.to_string()))
    }
}

impl fmt::Display for AddressSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => f.write_str("-"),
            Self::TcpConnect { host, port } if host.contains(':') => {
                write!(f, "{TCP_PREFIX}[{host}]:{port}")
            }
            Self::TcpConnect { host, port } => write!(f, "{TCP_PREFIX}{host}:{port}"),
            Self::TcpListen { port, options } => {
                write!(f, "{TCP_LISTEN_PREFIX}{port}")?;
                if options.reuse_addr {
                    f.write_str(",reuseaddr")?;
                }
                if options.fork {
                    f.write_str(",fork")?;
                }
                Ok(())
            }
            Self::OpenFile { path } => write!(f, "{OPEN_PREFIX}{}", path.display()),
        }
    }
}

fn parse_connect(address: &str, rest: &str) -> Result<AddressSpec> {
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| invalid(address, "expected <host>:<port>"))?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(invalid(address, "missing host"));
    }
    Ok(AddressSpec::TcpConnect {
        host: host.to_string(),
        port: parse_port(address, port)?,
    })
}

fn parse_listen(address: &str, rest: &str) -> Result<AddressSpec> {
    let mut parts = rest.split(',');
    let port = parse_port(address, parts.next().unwrap_or_default())?;

    let mut options = ListenOptions::default();
    for option in parts {
        match option {
            "reuseaddr" => options.reuse_addr = true,
            "fork" => options.fork = true,
            other => warn!(address, option = other, "Ignoring unknown listen option"),
        }
    }
    Ok(AddressSpec::TcpListen { port, options })
}

fn parse_port(address: &str, port: &str) -> Result<u16> {
    port.parse()
        .map_err(|_| invalid(address, &format!("invalid port {port:?}")))
}

fn invalid(address: &str, reason: &str) -> Error {
    Error::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    }
}

//! Connection model: one session, or one session per accepted connection.

use std::net::SocketAddr;
use std::thread;

use tracing::{info, info_span, warn};

use crate::address::AddressSpec;
use crate::config::RelayConfig;
use crate::endpoint::{Acceptor, Endpoint, resolve};
use crate::error::{Error, Result};
use crate::relay::{SessionOutcome, run_session};

/// Which argument position the listening address occupied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenSide {
    First,
    Second,
}

/// Relay between `first` and `second`.
///
/// Without `fork`, both addresses are opened in order and a single session
/// runs to completion. When one address is `TCP-LISTEN` with `fork`, it keeps
/// accepting forever and each connection gets its own session on its own
/// thread, opening the other address afresh.
pub fn relay(first: &AddressSpec, second: &AddressSpec, config: &RelayConfig) -> Result<()> {
    config.validate()?;

    if first.is_forking_listener() && second.is_forking_listener() {
        return Err(Error::MultipleForkingListeners(
            first.to_string(),
            second.to_string(),
        ));
    }
    if let AddressSpec::TcpListen { port, options } = first
        && options.fork
    {
        let acceptor = Acceptor::bind(SocketAddr::from(([0, 0, 0, 0], *port)), *options)?;
        return serve(&acceptor, ListenSide::First, second, config, None);
    }
    if let AddressSpec::TcpListen { port, options } = second
        && options.fork
    {
        let acceptor = Acceptor::bind(SocketAddr::from(([0, 0, 0, 0], *port)), *options)?;
        return serve(&acceptor, ListenSide::Second, first, config, None);
    }

    let first = resolve(first, config)?;
    let second = resolve(second, config)?;
    let outcome = run_session(first, second, config)?;
    log_outcome(&outcome);
    Ok(())
}

/// Accept connections and serve each one in its own session.
///
/// `limit` bounds the number of connections accepted; once reached, the
/// call waits for the spawned sessions and returns. A failing session is
/// logged and never stops the acceptor.
pub fn serve(
    acceptor: &Acceptor,
    side: ListenSide,
    peer: &AddressSpec,
    config: &RelayConfig,
    limit: Option<usize>,
) -> Result<()> {
    let mut handles = Vec::new();
    let mut accepted = 0usize;

    while limit.is_none_or(|max| accepted < max) {
        let connection = acceptor.accept(config)?;
        accepted += 1;

        let id = accepted;
        let peer = peer.clone();
        let config = config.clone();
        let handle = thread::Builder::new()
            .name(format!("relay-session-{id}"))
            .spawn(move || serve_connection(id, connection, side, &peer, &config))?;
        if limit.is_some() {
            handles.push(handle);
        }
    }

    for handle in handles {
        if handle.join().is_err() {
            warn!("Session thread panicked");
        }
    }
    Ok(())
}

fn serve_connection(
    id: usize,
    connection: Endpoint,
    side: ListenSide,
    peer: &AddressSpec,
    config: &RelayConfig,
) {
    let span = info_span!("connection", id);
    let _enter = span.enter();

    let result = resolve(peer, config).and_then(|other| {
        let (first, second) = match side {
            ListenSide::First => (connection, other),
            ListenSide::Second => (other, connection),
        };
        run_session(first, second, config)
    });

    match result {
        Ok(outcome) => log_outcome(&outcome),
        Err(e) => warn!(error = %e, "Session failed"),
    }
}

fn log_outcome(outcome: &SessionOutcome) {
    for link in &outcome.links {
        info!(
            link = %link.name,
            chunks = link.stats.chunks,
            bytes = link.stats.bytes,
            "Link summary"
        );
    }
    info!(reason = ?outcome.reason, "Session finished");
}

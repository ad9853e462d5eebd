//! Pairing two endpoints into a relay session.

use tracing::{debug, info_span};

use super::link::RelayLink;
use super::multiplexer::{Multiplexer, SessionOutcome};
use crate::config::RelayConfig;
use crate::endpoint::{Endpoint, StatusFlagsGuard};
use crate::error::Result;

/// Up to two links built from a pair of endpoints, plus the loop that runs them.
#[derive(Debug)]
pub struct Session {
    label: String,
    multiplexer: Multiplexer,
    restore: Vec<StatusFlagsGuard>,
}

impl Session {
    /// Build one link per direction that has a reader on one side and a
    /// writer on the other. Missing sides simply drop that direction.
    pub fn new(first: Endpoint, second: Endpoint, config: &RelayConfig) -> Self {
        let kinds = (first.kind(), second.kind());
        let first = first.into_parts();
        let second = second.into_parts();
        let (first_label, second_label) = (first.label, second.label);

        let mut links = Vec::with_capacity(2);
        if let (Some(source), Some(sink)) = (first.source, second.sink) {
            links.push(RelayLink::new(
                format!("{first_label} -> {second_label}"),
                source,
                sink,
                config.batch_size,
            ));
        }
        if let (Some(source), Some(sink)) = (second.source, first.sink) {
            links.push(RelayLink::new(
                format!("{second_label} -> {first_label}"),
                source,
                sink,
                config.batch_size,
            ));
        }
        debug!(links = links.len(), first = ?kinds.0, second = ?kinds.1, "Session links built");

        Self {
            label: format!("{first_label} <-> {second_label}"),
            multiplexer: Multiplexer::new(links, config),
            restore: first.restore.into_iter().chain(second.restore).collect(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub const fn multiplexer(&self) -> &Multiplexer {
        &self.multiplexer
    }

    /// Run to completion. Descriptor flags changed while opening the
    /// endpoints are restored afterwards, whatever the outcome.
    pub fn run(self) -> Result<SessionOutcome> {
        let span = info_span!("session", relay = %self.label);
        let _enter = span.enter();
        let outcome = self.multiplexer.run();
        drop(self.restore);
        outcome
    }
}

/// Relay between two opened endpoints until the session stops.
pub fn run_session(
    first: Endpoint,
    second: Endpoint,
    config: &RelayConfig,
) -> Result<SessionOutcome> {
    Session::new(first, second, config).run()
}

//! Readiness loop driving every link of one relay session.
//!
//! All registered read handles are polled together. Ready links are pumped;
//! a link that reaches end-of-stream is unregistered and starts the drain
//! deadline, which bounds how long the surviving direction may keep going.
//! The loop stops once nothing is registered or the deadline has passed.

use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::time::{Duration, Instant};

use nix::poll::{PollFd, PollFlags};
use nix::sys::stat::fstat;
use tracing::{debug, info};

use super::link::{LinkStats, RelayLink};
use super::readiness;
use crate::config::RelayConfig;
use crate::error::Result;

/// Lifecycle of a [`Multiplexer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplexerState {
    /// Links are active and no deadline is set.
    Running,
    /// A link reached end-of-stream; the rest drain until the deadline.
    Draining,
    /// Terminal.
    Stopped,
}

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every registered link reached end-of-stream.
    AllClosed,
    /// The drain deadline passed with links still registered.
    DeadlineElapsed,
}

/// Final per-link counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSummary {
    pub name: String,
    pub stats: LinkStats,
}

/// Result of a completed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub reason: StopReason,
    pub links: Vec<LinkSummary>,
}

/// Identity of the file behind a read handle. Duplicated descriptors of one
/// file (two `dup`s of stdin, say) share a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleKey {
    File { dev: u64, ino: u64 },
    Fd(RawFd),
}

impl HandleKey {
    #[allow(clippy::unnecessary_cast, clippy::cast_sign_loss)]
    fn of(fd: BorrowedFd<'_>) -> Self {
        match fstat(fd) {
            Ok(stat) => Self::File {
                dev: stat.st_dev as u64,
                ino: stat.st_ino as u64,
            },
            Err(_) => Self::Fd(fd.as_raw_fd()),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Registration {
    key: HandleKey,
    link: usize,
}

/// Read handles currently being waited on, keyed by the file behind them.
#[derive(Debug, Default)]
struct Registry {
    entries: Vec<Registration>,
}

impl Registry {
    /// Returns `false` without registering when `key` is already present.
    fn register(&mut self, key: HandleKey, link: usize) -> bool {
        if self.entries.iter().any(|r| r.key == key) {
            return false;
        }
        self.entries.push(Registration { key, link });
        true
    }

    fn unregister(&mut self, link: usize) -> bool {
        let before = self.entries.len();
        self.entries.retain(|r| r.link != link);
        self.entries.len() != before
    }

    fn links(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().map(|r| r.link)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug)]
pub struct Multiplexer {
    links: Vec<RelayLink>,
    registry: Registry,
    grace_period: Duration,
    propagate_eof: bool,
    deadline: Option<Instant>,
    stopped: Option<StopReason>,
}

impl Multiplexer {
    /// Register every link whose reader is still open. Links reading the same
    /// file, even through different descriptors, are registered once.
    pub fn new(links: Vec<RelayLink>, config: &RelayConfig) -> Self {
        let mut registry = Registry::default();
        for (index, link) in links.iter().enumerate() {
            if link.reader().is_eof() {
                continue;
            }
            let Some(fd) = link.reader().as_fd() else {
                continue;
            };
            if !registry.register(HandleKey::of(fd), index) {
                debug!(link = %link.name(), "Read handle already registered");
            }
        }

        Self {
            links,
            registry,
            grace_period: config.grace_period(),
            propagate_eof: config.propagate_eof,
            deadline: None,
            stopped: None,
        }
    }

    pub fn state(&self) -> MultiplexerState {
        if self.stopped.is_some() || self.registry.is_empty() {
            MultiplexerState::Stopped
        } else if self.deadline.is_some() {
            MultiplexerState::Draining
        } else {
            MultiplexerState::Running
        }
    }

    /// Number of read handles still registered.
    pub fn registered(&self) -> usize {
        self.registry.len()
    }

    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Run until stopped.
    pub fn run(mut self) -> Result<SessionOutcome> {
        info!(links = self.links.len(), registered = self.registry.len(), "Relay started");
        while self.turn()? != MultiplexerState::Stopped {}

        let reason = self.stopped.unwrap_or(StopReason::AllClosed);
        let links = self
            .links
            .iter()
            .map(|link| LinkSummary {
                name: link.name().to_string(),
                stats: link.stats(),
            })
            .collect();
        info!(?reason, "Relay stopped");
        Ok(SessionOutcome { reason, links })
    }

    /// One wait-then-dispatch cycle.
    pub fn turn(&mut self) -> Result<MultiplexerState> {
        if self.registry.is_empty() {
            if self.stopped.is_none() {
                self.stopped = Some(StopReason::AllClosed);
            }
            return Ok(MultiplexerState::Stopped);
        }

        let ready = self.wait()?;

        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            info!(pending = self.registry.len(), "Drain deadline elapsed");
            self.stopped = Some(StopReason::DeadlineElapsed);
            return Ok(MultiplexerState::Stopped);
        }

        for index in ready {
            if self.links[index].pump()? {
                self.finish(index);
            }
        }

        if self.registry.is_empty() {
            self.stopped = Some(StopReason::AllClosed);
        }
        Ok(self.state())
    }

    /// Block until a registered handle is readable or the deadline passes.
    /// Returns the indices of ready links.
    fn wait(&self) -> Result<Vec<usize>> {
        let (indices, mut fds): (Vec<usize>, Vec<PollFd<'_>>) = self
            .registry
            .links()
            .filter_map(|index| {
                let fd = self.links[index].reader().as_fd()?;
                Some((index, PollFd::new(fd, PollFlags::POLLIN)))
            })
            .unzip();

        let timeout = readiness::timeout_until(self.deadline);
        if !readiness::wait(&mut fds, timeout)? {
            return Ok(Vec::new());
        }

        let ready: Vec<usize> = indices
            .into_iter()
            .zip(&fds)
            .filter(|(_, fd)| fd.revents().is_some_and(|r| r.intersects(readiness::READABLE)))
            .map(|(index, _)| index)
            .collect();
        debug!(ready = ready.len(), "Readiness wake");
        Ok(ready)
    }

    fn finish(&mut self, index: usize) {
        if !self.registry.unregister(index) {
            return;
        }

        let link = &mut self.links[index];
        link.reader_mut().close();
        if self.propagate_eof {
            link.writer_mut().close();
        }
        let stats = link.stats();
        info!(
            link = %link.name(),
            chunks = stats.chunks,
            bytes = stats.bytes,
            "Reached end of stream"
        );

        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.grace_period);
            debug!(grace = ?self.grace_period, "Drain deadline set");
        }
    }
}

//! Thin wrappers around `poll(2)`.

use std::io;
use std::os::fd::BorrowedFd;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

/// Revents that make a registered read handle worth pumping. Hang-up and
/// error conditions surface through the next read.
pub(crate) const READABLE: PollFlags = PollFlags::POLLIN
    .union(PollFlags::POLLHUP)
    .union(PollFlags::POLLERR)
    .union(PollFlags::POLLNVAL);

/// Timeout for waiting until `deadline`, or forever without one.
///
/// Rounded up to whole milliseconds so the wait never ends just short of the
/// deadline, and capped at `u16::MAX` ms; the caller re-checks the deadline
/// after every wake.
pub(crate) fn timeout_until(deadline: Option<Instant>) -> PollTimeout {
    let Some(deadline) = deadline else {
        return PollTimeout::NONE;
    };
    let remaining = deadline.saturating_duration_since(Instant::now());
    PollTimeout::from(ceil_millis(remaining))
}

fn ceil_millis(duration: Duration) -> u16 {
    let millis = duration.as_micros().div_ceil(1000);
    u16::try_from(millis).unwrap_or(u16::MAX)
}

/// Wait on `fds`. Returns `false` when interrupted by a signal so the caller
/// can recompute its timeout.
pub(crate) fn wait(fds: &mut [PollFd<'_>], timeout: PollTimeout) -> io::Result<bool> {
    match poll(fds, timeout) {
        Ok(_) => Ok(true),
        Err(Errno::EINTR) => Ok(false),
        Err(errno) => Err(errno.into()),
    }
}

/// Block until `fd` accepts more output.
pub(crate) fn wait_writable(fd: BorrowedFd<'_>) -> io::Result<()> {
    let mut fds = [PollFd::new(fd, PollFlags::POLLOUT)];
    while !wait(&mut fds, PollTimeout::NONE)? {}
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_deadline_waits_forever() {
        assert_eq!(timeout_until(None), PollTimeout::NONE);
    }

    #[test]
    fn elapsed_deadline_polls_without_waiting() {
        let past = Instant::now().checked_sub(Duration::from_secs(1));
        assert_eq!(timeout_until(past), PollTimeout::ZERO);
    }

    #[test]
    fn partial_milliseconds_round_up() {
        assert_eq!(ceil_millis(Duration::from_micros(400)), 1);
        assert_eq!(ceil_millis(Duration::from_millis(500)), 500);
        assert_eq!(ceil_millis(Duration::from_secs(3600)), u16::MAX);
    }
}

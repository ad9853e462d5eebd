//! The relay engine.
//!
//! [`ReaderAdapter`] and [`WriterAdapter`] hide per-kind I/O quirks,
//! [`RelayLink`] pumps one direction, and [`Multiplexer`] runs the readiness
//! loop for a [`Session`].

mod link;
mod multiplexer;
mod readiness;
mod reader;
mod session;
mod writer;

pub use link::{LinkStats, RelayLink};
pub use multiplexer::{LinkSummary, Multiplexer, MultiplexerState, SessionOutcome, StopReason};
pub use reader::{Batches, ReaderAdapter};
pub use session::{Session, run_session};
pub use writer::WriterAdapter;

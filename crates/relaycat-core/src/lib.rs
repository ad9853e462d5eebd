//! relaycat Core Library
//!
//! Generic bidirectional byte relay:
//! - Address grammar for stdio, TCP connect, TCP listen, and read-only files
//! - Endpoint opening and per-kind read/write adapters
//! - Readiness-driven relay loop with a drain deadline after the first EOF
//! - Configuration resolution, error types, and tracing setup

pub mod address;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod relay;
pub mod tracing_init;

pub use address::{AddressSpec, ListenOptions};
pub use config::RelayConfig;
pub use dispatch::{ListenSide, relay, serve};
pub use endpoint::{Acceptor, Endpoint, EndpointKind, resolve};
pub use error::{Error, Result};
pub use relay::{Session, SessionOutcome, StopReason, run_session};

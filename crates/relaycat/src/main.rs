//! relaycat
//!
//! Relays bytes in both directions between two endpoints.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use relaycat_core::config::load_config;
use relaycat_core::tracing_init::{default_filter, init_tracing};
use relaycat_core::{AddressSpec, RelayConfig, relay};

const ADDRESS_HELP: &str = "\
ADDRESSES:
  -                        stdin/stdout
  TCP:<host>:<port>        connect
  TCP-LISTEN:<port>[,opts] accept one connection (opts: reuseaddr, fork)
  OPEN:<path>              read-only file";

#[derive(Parser, Debug)]
#[command(name = "relaycat")]
#[command(
    version,
    about = "Bidirectional byte relay between stdio, TCP sockets, and files",
    after_help = ADDRESS_HELP
)]
struct Args {
    /// First endpoint.
    addr1: String,

    /// Second endpoint.
    addr2: String,

    /// Settings file (JSON). Defaults to the global settings file when present.
    #[arg(long, env = "RELAYCAT_CONFIG")]
    config: Option<PathBuf>,

    /// Largest chunk read in one call, in bytes.
    #[arg(long, env = "RELAYCAT_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Milliseconds to keep draining after the first direction closes.
    #[arg(long, env = "RELAYCAT_GRACE_MS")]
    grace_ms: Option<u64>,

    /// Put stdin in non-blocking mode.
    #[arg(long, env = "RELAYCAT_NONBLOCKING_STDIN")]
    nonblocking_stdin: bool,

    /// Shut down a destination's write side when its source closes.
    #[arg(long, env = "RELAYCAT_PROPAGATE_EOF")]
    propagate_eof: bool,

    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, env = "RELAYCAT_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "RELAYCAT_LOG_JSON")]
    log_json: bool,
}

impl Args {
    /// Layer command-line overrides on top of the loaded settings.
    fn apply(&self, mut config: RelayConfig) -> RelayConfig {
        if let Some(batch_size) = self.batch_size {
            config = config.with_batch_size(batch_size);
        }
        if let Some(ms) = self.grace_ms {
            config = config.with_grace_period_ms(ms);
        }
        if self.nonblocking_stdin {
            config = config.with_nonblocking_stdin(true);
        }
        if self.propagate_eof {
            config = config.with_propagate_eof(true);
        }
        config
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let first: AddressSpec = args.addr1.parse()?;
    let second: AddressSpec = args.addr2.parse()?;

    let config = args.apply(load_config(args.config.as_deref())?);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        first = %first,
        second = %second,
        batch_size = config.batch_size,
        grace_ms = config.grace_period_ms,
        "Starting relaycat"
    );
    relay(&first, &second, &config)?;
    Ok(())
}

/// A returned error is also reported on stderr by the runtime, so it stays
/// visible when logging is filtered out.
fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&default_filter(&args.log_level), args.log_json);

    run(&args).inspect_err(|e| error!(error = %e, "relaycat failed"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_settings() {
        let args = Args::try_parse_from([
            "relaycat",
            "--batch-size",
            "1024",
            "--propagate-eof",
            "-",
            "TCP:localhost:80",
        ])
        .unwrap();
        let config = args.apply(RelayConfig::default().with_grace_period_ms(900));

        assert_eq!(config.batch_size, 1024);
        assert_eq!(config.grace_period_ms, 900);
        assert!(config.propagate_eof);
        assert!(!config.nonblocking_stdin);
        assert_eq!(args.addr1, "-");
    }

    #[test]
    fn both_addresses_required() {
        assert!(Args::try_parse_from(["relaycat", "-"]).is_err());
    }
}

//! Config for the event source.

use std::{path::PathBuf, time::Duration};

use crate::duration::parse_nonzero_duration;

/// CLI config for the line-delimited event log consumed by the ingest loop.
#[derive(Debug, Clone, clap::Parser)]
pub struct SourceConfig {
    /// Path of the event log. Its committed position is kept next to it in `<path>.offset`.
    #[clap(long = "source-file", env = "SESSIONDB_SOURCE_FILE", action)]
    pub file: PathBuf,

    /// How long to wait for new lines once the end of the log is reached.
    #[clap(
        long = "source-poll-interval",
        env = "SESSIONDB_SOURCE_POLL_INTERVAL",
        default_value = "100ms",
        value_parser = parse_nonzero_duration,
    )]
    pub poll_interval: Duration,
}

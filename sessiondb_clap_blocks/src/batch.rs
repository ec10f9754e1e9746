//! Config for session batching and the commit cadence.

use std::{num::NonZeroUsize, time::Duration};

use sessiondb_write::BatchConfig;

use crate::duration::parse_nonzero_duration;

/// CLI config for the write path accumulators.
#[derive(Debug, Clone, Copy, clap::Parser)]
pub struct BatchingConfig {
    /// How often buffered batches and bulks are committed.
    #[clap(
        long = "commit-batch-timeout",
        env = "SESSIONDB_COMMIT_BATCH_TIMEOUT",
        default_value = "15s",
        value_parser = parse_nonzero_duration,
    )]
    pub commit_batch_timeout: Duration,

    /// Maximum number of statements buffered for a single session before it is flushed.
    #[clap(
        long = "batch-queue-limit",
        env = "SESSIONDB_BATCH_QUEUE_LIMIT",
        default_value = "20",
        action
    )]
    pub queue_limit: NonZeroUsize,

    /// Maximum estimated size in bytes buffered for a single session before it is flushed.
    #[clap(
        long = "batch-size-limit",
        env = "SESSIONDB_BATCH_SIZE_LIMIT",
        default_value = "10485760", // 10 MiB
        action
    )]
    pub size_limit: NonZeroUsize,

    /// How long a session that has nothing buffered is remembered.
    #[clap(
        long = "session-retention",
        env = "SESSIONDB_SESSION_RETENTION",
        default_value = "30m",
        value_parser = parse_nonzero_duration,
    )]
    pub session_retention: Duration,
}

impl BatchingConfig {
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            queue_limit: self.queue_limit,
            size_limit: self.size_limit,
            session_retention: self.session_retention,
        }
    }
}

//! Config for the memory gate in front of consumption.

use std::time::Duration;

use crate::{duration::parse_nonzero_duration, memory_size::MemorySize};

/// CLI config for pausing consumption under memory pressure.
#[derive(Debug, Clone, Copy, clap::Parser)]
pub struct MemoryConfig {
    /// Resident memory above which consumption pauses.
    ///
    /// Can be given as absolute value or in percentage of the total available memory (e.g. `75%`).
    #[clap(
        long = "memory-limit",
        env = "SESSIONDB_MEMORY_LIMIT",
        default_value = "75%",
        action
    )]
    pub limit: MemorySize,

    /// How often the process memory usage is sampled.
    #[clap(
        long = "memory-check-interval",
        env = "SESSIONDB_MEMORY_CHECK_INTERVAL",
        default_value = "1s",
        value_parser = parse_nonzero_duration,
    )]
    pub check_interval: Duration,

    /// How long to wait before asking again after the gate denied consumption.
    #[clap(
        long = "memory-backoff",
        env = "SESSIONDB_MEMORY_BACKOFF",
        default_value = "100ms",
        value_parser = parse_nonzero_duration,
    )]
    pub backoff: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn absolute_limit() {
        let config = MemoryConfig::parse_from([
            "sessiondb",
            "--memory-limit",
            "1073741824",
            "--memory-backoff",
            "250ms",
        ]);
        assert_eq!(config.limit.bytes(), 1 << 30);
        assert_eq!(config.check_interval, Duration::from_secs(1));
        assert_eq!(config.backoff, Duration::from_millis(250));
    }

    #[test]
    fn zero_durations_are_rejected() {
        assert!(MemoryConfig::try_parse_from(["sessiondb", "--memory-check-interval", "0s"]).is_err());
        assert!(MemoryConfig::try_parse_from(["sessiondb", "--memory-backoff", "0s"]).is_err());
        assert!(MemoryConfig::try_parse_from(["sessiondb", "--memory-backoff", "0ms"]).is_err());
    }
}

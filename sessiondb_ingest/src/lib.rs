//! The consumption side of the persistence tier.
//!
//! A single [`ConsumptionLoop`] pulls messages from an upstream [`Consumer`] one at a time,
//! hands them to a [`Saver`] which turns them into buffered writes, and periodically runs a
//! commit sweep. The upstream offset is acknowledged only after a sweep flushed everything,
//! so a crash at any point replays unacknowledged messages instead of losing them.
//!
//! Consumption is gated on a [`MemoryGate`]: while the process is above its memory limit the
//! loop keeps committing on schedule but stops admitting new upstream work.

pub mod consumer;
pub mod memory;
pub mod saver;
pub mod service;

#[cfg(test)]
mod test_util;

pub use consumer::{Consumer, Message, RebalanceNotice};
pub use memory::{MemoryGate, ProcessMemoryGate};
pub use saver::{Saver, session::SessionSaver};
pub use service::{ConsumptionLoop, LoopConfig};

use thiserror::Error;

/// Unrecoverable ingest failures.
///
/// When the loop returns one of these nothing consumed since the last acknowledged offset is
/// acknowledged, and the process is expected to exit so the upstream replays it on restart.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to consume from upstream: {0}")]
    Consume(#[source] consumer::Error),

    #[error("failed to save message at offset {offset}: {source}")]
    Save {
        offset: u64,
        #[source]
        source: saver::SaveError,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

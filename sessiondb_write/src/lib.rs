//! The write path of the session persistence tier.
//!
//! Decoded session events arrive as parameterized SQL statements and as rows for shared
//! append-only tables. Neither is written immediately:
//!
//! * statements are accumulated per session in a [`BatchSet`], preserving arrival order, and
//!   each session's batch is written as one round trip when it is committed or when it would
//!   outgrow its configured statement count / byte size;
//! * rows are accumulated per destination in a [`BulkSet`] and written as multi-row inserts on
//!   every commit.
//!
//! The [`Connector`] owns both accumulators together with the [`Store`] handle and is the only
//! component that writes to the store. It is driven from a single task and does no internal
//! locking.

pub mod batch;
pub mod bulk;
pub mod connector;
pub mod store;
pub mod value;

pub use batch::{BatchConfig, BatchSet};
pub use bulk::{BulkSet, BulkSpec};
pub use connector::Connector;
pub use store::Store;
pub use value::{Statement, Value};

use sessiondb_id::SessionId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to flush batch for session {session_id}: {source}")]
    BatchFlush {
        session_id: SessionId,
        #[source]
        source: store::Error,
    },

    #[error("failed to flush bulk {name}: {source}")]
    BulkFlush {
        name: String,
        #[source]
        source: store::Error,
    },

    #[error("no bulk named {0} is registered")]
    UnknownBulk(String),

    #[error("bulk {name} expects {expected} columns, got {got}")]
    BulkArity {
        name: String,
        expected: usize,
        got: usize,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The outcome of a commit sweep in which at least one target failed to flush.
///
/// Failed targets keep their buffered content and are retried by the next sweep. Targets that
/// flushed successfully in the same sweep are not affected.
#[derive(Debug, Error)]
#[error(
    "{} commit target(s) failed to flush: {}",
    .failures.len(),
    display_failures(.failures)
)]
pub struct CommitError {
    failures: Vec<Error>,
}

impl CommitError {
    /// `Ok(())` when `failures` is empty, a [`CommitError`] carrying them otherwise.
    pub fn check(failures: Vec<Error>) -> Result<(), Self> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Self { failures })
        }
    }

    pub fn failures(&self) -> &[Error] {
        &self.failures
    }

    pub fn into_failures(self) -> Vec<Error> {
        self.failures
    }
}

impl From<Error> for CommitError {
    fn from(e: Error) -> Self {
        Self { failures: vec![e] }
    }
}

fn display_failures(failures: &[Error]) -> String {
    failures
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

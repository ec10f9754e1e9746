//! The seam to the upstream ordered queue.

pub mod file;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::broadcast;

/// One upstream message and its position in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    offset: u64,
    payload: Bytes,
}

impl Message {
    pub fn new(offset: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            offset,
            payload: payload.into(),
        }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// A change of the partitions assigned to this consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceNotice {
    Assigned { partitions: Vec<i32> },
    Revoked { partitions: Vec<i32> },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("upstream I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid committed offset in {path}: {reason}")]
    InvalidOffset { path: String, reason: String },

    #[error("committed offset {committed} is past the end of the log ({available} messages)")]
    Truncated { committed: u64, available: u64 },
}

/// An upstream queue consumed in order.
#[async_trait]
pub trait Consumer: Debug + Send + 'static {
    /// Pull the next message.
    ///
    /// Returns `None` when nothing became available within the consumer's own poll timeout.
    async fn consume_next(&mut self) -> Result<Option<Message>, Error>;

    /// Subscribe to partition assignment changes.
    fn subscribe_rebalance(&self) -> broadcast::Receiver<RebalanceNotice>;

    /// Acknowledge every message returned by [`Consumer::consume_next`] so far.
    async fn commit(&mut self) -> Result<(), Error>;

    /// Release the upstream connection.
    async fn close(&mut self);
}

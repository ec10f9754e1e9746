//! The seam between decoded upstream messages and the write path.

pub mod event;
pub mod session;

#[cfg(test)]
pub(crate) mod mock;

use std::fmt::Debug;

use async_trait::async_trait;
use sessiondb_write::{CommitError, store};
use thiserror::Error;

use crate::consumer::Message;

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("cannot decode message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("cannot buffer write: {0}")]
    Write(#[from] sessiondb_write::Error),
}

/// Turns upstream messages into buffered writes.
#[async_trait]
pub trait Saver: Debug + Send + 'static {
    /// Decode `message` and buffer the writes it implies.
    async fn handle(&mut self, message: Message) -> Result<(), SaveError>;

    /// Flush everything buffered. On error the failed targets stay buffered.
    async fn commit(&mut self) -> Result<(), CommitError>;

    /// Release the store.
    async fn close(&mut self) -> Result<(), store::Error>;
}

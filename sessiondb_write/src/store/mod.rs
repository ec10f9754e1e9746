//! The seam between the accumulators and the relational store.

pub mod instrumentation;
pub mod mock;
pub mod postgres;

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use sessiondb_id::SessionId;
use thiserror::Error;

use crate::{bulk::BulkSpec, value::Statement, value::Value};

/// One row of a bulk buffer, in the column order of its [`BulkSpec`].
pub type Row = Vec<Value>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("store driver error: {0}")]
    Driver(#[from] sqlx::Error),

    #[error("store rejected the write: {0}")]
    Rejected(String),
}

/// A durable destination for flushed writes.
///
/// Both write calls are all-or-nothing: when they return an error nothing of the call was
/// applied, so the caller can retry the same content later without partial duplicates.
#[async_trait]
pub trait Store: Debug + Send + Sync + 'static {
    /// Apply `statements` for one session atomically, in slice order.
    ///
    /// Atomicity is the contract, not the wire shape: an implementation may spend several round
    /// trips on one batch as long as a failure leaves none of its statements applied.
    async fn send_batch(&self, session_id: SessionId, statements: &[Statement])
    -> Result<(), Error>;

    /// Insert `rows` into the table described by `spec`.
    async fn insert_bulk(&self, spec: &BulkSpec, rows: &[Row]) -> Result<(), Error>;

    /// Release the underlying connections.
    async fn close(&self) -> Result<(), Error>;
}

#[async_trait]
impl<T> Store for Arc<T>
where
    T: Store + ?Sized,
{
    async fn send_batch(
        &self,
        session_id: SessionId,
        statements: &[Statement],
    ) -> Result<(), Error> {
        (**self).send_batch(session_id, statements).await
    }

    async fn insert_bulk(&self, spec: &BulkSpec, rows: &[Row]) -> Result<(), Error> {
        (**self).insert_bulk(spec, rows).await
    }

    async fn close(&self) -> Result<(), Error> {
        (**self).close().await
    }
}

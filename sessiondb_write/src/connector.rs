//! The single owner of the write path's state.

use std::sync::Arc;

use iox_time::TimeProvider;
use observability_deps::tracing::info;
use sessiondb_id::{ProjectId, SessionId};

use crate::{
    CommitError, Result,
    batch::{BatchConfig, BatchSet},
    bulk::{AUTOCOMPLETES, BulkSet, BulkSpec},
    store::{self, Row, Store, instrumentation::StoreInstrumentation},
    value::{Statement, Value},
};

/// Routes writes to the per-session [`BatchSet`] or the shared [`BulkSet`] and commits both.
///
/// All methods take `&mut self`: the connector is owned by one task, which serializes every
/// queue, append and commit call.
#[derive(Debug)]
pub struct Connector {
    store: Arc<dyn Store>,
    batches: BatchSet,
    bulks: BulkSet,
}

impl Connector {
    /// Wrap `store` with instrumentation registered in `metrics` and set up empty accumulators.
    pub fn new(
        store: Arc<dyn Store>,
        config: BatchConfig,
        bulk_specs: impl IntoIterator<Item = BulkSpec>,
        time_provider: Arc<dyn TimeProvider>,
        metrics: &metric::Registry,
    ) -> Self {
        let store: Arc<dyn Store> = Arc::new(StoreInstrumentation::new(store, metrics));
        Self {
            store,
            batches: BatchSet::new(config, time_provider),
            bulks: BulkSet::new(bulk_specs),
        }
    }

    pub fn batches(&self) -> &BatchSet {
        &self.batches
    }

    pub fn bulks(&self) -> &BulkSet {
        &self.bulks
    }

    /// Queue `statement` on the session's batch, in arrival order.
    ///
    /// May flush the session early when a batch limit is reached. A failed early flush is
    /// returned without `statement` being buffered, see [`BatchSet::queue_statement`]. Callers
    /// must treat it as unrecoverable and not acknowledge the message that produced it.
    pub async fn batch_queue(&mut self, session_id: SessionId, statement: Statement) -> Result<()> {
        self.batches
            .queue_statement(self.store.as_ref(), session_id, statement)
            .await
    }

    /// Add `delta` bytes to the session's tracked batch size.
    ///
    /// A failed early flush is returned like in [`Connector::batch_queue`].
    pub async fn update_batch_size(&mut self, session_id: SessionId, delta: usize) -> Result<()> {
        self.batches
            .update_session_size(self.store.as_ref(), session_id, delta)
            .await
    }

    /// Accumulate `sessions` row counter increments for the session.
    pub async fn update_session_events(
        &mut self,
        session_id: SessionId,
        events: u32,
        pages: u32,
    ) -> Result<()> {
        self.batches
            .update_session_events(self.store.as_ref(), session_id, events, pages)
            .await
    }

    /// Buffer `row` on the bulk named `name`.
    pub fn bulk_append(&mut self, name: &str, row: Row) -> Result<()> {
        self.bulks.append(name, row)
    }

    /// Buffer an autocomplete suggestion. Empty values are ignored.
    pub fn insert_autocomplete_value(
        &mut self,
        project_id: ProjectId,
        kind: &str,
        value: impl Into<Value>,
    ) -> Result<()> {
        self.bulks.append(
            AUTOCOMPLETES,
            vec![value.into(), kind.into(), project_id.into()],
        )
    }

    /// Flush only `session_id`'s batch.
    pub async fn commit_batch(&mut self, session_id: SessionId) -> Result<()> {
        self.batches
            .commit_one(self.store.as_ref(), session_id)
            .await
    }

    /// Flush `session_id`'s batch and stop tracking the session.
    pub async fn close_session(&mut self, session_id: SessionId) -> Result<()> {
        self.batches
            .remove_session(self.store.as_ref(), session_id)
            .await
    }

    /// Flush every bulk buffer, then every session batch.
    ///
    /// Session batches are flushed even if a bulk failed; the returned error carries every
    /// failure of both sweeps.
    pub async fn commit_batches(&mut self) -> Result<(), CommitError> {
        let store = self.store.as_ref();

        let mut failures = vec![];
        if let Err(e) = self.bulks.send_bulks(store).await {
            failures.extend(e.into_failures());
        }
        if let Err(e) = self.batches.commit_all(store).await {
            failures.extend(e.into_failures());
        }

        CommitError::check(failures)
    }

    /// Release the store. Anything still buffered is dropped, so callers commit first.
    pub async fn close(&self) -> Result<(), store::Error> {
        let res = self.store.close().await;
        info!(
            tracked_sessions = self.batches.num_sessions(),
            buffered_rows = self.bulks.len(),
            "connector closed"
        );
        res
    }
}

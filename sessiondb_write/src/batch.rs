//! Per-session accumulation of ordered statements.
//!
//! Every session owns a [`SessionBatch`]: the statements queued for it in arrival order, a
//! running estimate of their byte size and the `sessions` row counters accumulated since the
//! last flush. A session's batch is written as a single round trip, so statement order within a
//! session is always the order in which they were queued.
//!
//! A batch never holds more than [`BatchConfig::queue_limit`] statements or more than
//! [`BatchConfig::size_limit`] bytes: a write that would cross either limit first flushes the
//! session's current content and then lands in the emptied batch.

use std::{borrow::Cow, collections::HashMap, num::NonZeroUsize, sync::Arc, time::Duration};

use iox_time::{Time, TimeProvider};
use observability_deps::tracing::{debug, error, trace};
use sessiondb_id::SessionId;

use crate::{
    CommitError, Error, Result,
    store::Store,
    value::{Statement, Value},
};

/// Statement written at the end of a session's batch when its counters changed.
pub const UPDATE_SESSION_COUNTERS: &str = "UPDATE sessions SET pages_count = pages_count + $1, \
    events_count = events_count + $2 WHERE session_id = $3";

/// Estimated size of the three arguments of [`UPDATE_SESSION_COUNTERS`].
const SESSION_COUNTERS_SIZE: usize = 3 * 8;

/// Limits applied to every session batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    /// Maximum number of statements buffered for one session.
    pub queue_limit: NonZeroUsize,

    /// Maximum estimated byte size buffered for one session.
    pub size_limit: NonZeroUsize,

    /// How long a session entry that holds nothing is kept before it is dropped.
    pub session_retention: Duration,
}

impl BatchConfig {
    pub const DEFAULT_QUEUE_LIMIT: NonZeroUsize = NonZeroUsize::new(20).unwrap();
    pub const DEFAULT_SIZE_LIMIT: NonZeroUsize = NonZeroUsize::new(10 * 1024 * 1024).unwrap();
    pub const DEFAULT_SESSION_RETENTION: Duration = Duration::from_secs(30 * 60);
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            queue_limit: Self::DEFAULT_QUEUE_LIMIT,
            size_limit: Self::DEFAULT_SIZE_LIMIT,
            session_retention: Self::DEFAULT_SESSION_RETENTION,
        }
    }
}

/// Counter deltas for a session's `sessions` row.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionCounters {
    pub pages: i64,
    pub events: i64,
}

impl SessionCounters {
    pub fn is_zero(&self) -> bool {
        self.pages == 0 && self.events == 0
    }

    fn statement(&self, session_id: SessionId) -> Statement {
        Statement::new(
            UPDATE_SESSION_COUNTERS,
            vec![
                Value::Int(self.pages),
                Value::Int(self.events),
                session_id.into(),
            ],
        )
    }
}

/// The buffered writes of one session.
#[derive(Debug)]
pub struct SessionBatch {
    statements: Vec<Statement>,
    size: usize,
    counters: SessionCounters,
    /// When the batch last became empty (created or flushed).
    emptied_at: Time,
}

impl SessionBatch {
    fn new(now: Time) -> Self {
        Self {
            statements: vec![],
            size: 0,
            counters: SessionCounters::default(),
            emptied_at: now,
        }
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn counters(&self) -> SessionCounters {
        self.counters
    }

    /// True when there is nothing to write for this session.
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty() && self.counters.is_zero()
    }

    /// Everything a flush writes, in order: the queued statements, then the counter update.
    fn pending(&self, session_id: SessionId) -> Cow<'_, [Statement]> {
        if self.counters.is_zero() {
            Cow::Borrowed(&self.statements)
        } else {
            let mut all = Vec::with_capacity(self.statements.len() + 1);
            all.extend_from_slice(&self.statements);
            all.push(self.counters.statement(session_id));
            Cow::Owned(all)
        }
    }

    fn push(&mut self, statement: Statement) {
        self.size += statement.size();
        self.statements.push(statement);
    }

    fn clear(&mut self, now: Time) {
        self.statements.clear();
        self.size = 0;
        self.counters = SessionCounters::default();
        self.emptied_at = now;
    }
}

/// Ordered, size-bounded statement buffers keyed by session.
///
/// Not safe for concurrent use: all calls must come from the task that owns the set.
#[derive(Debug)]
pub struct BatchSet {
    config: BatchConfig,
    batches: HashMap<SessionId, SessionBatch>,
    time_provider: Arc<dyn TimeProvider>,
}

impl BatchSet {
    pub fn new(config: BatchConfig, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            config,
            batches: HashMap::new(),
            time_provider,
        }
    }

    pub fn config(&self) -> BatchConfig {
        self.config
    }

    /// The batch tracked for `session_id`, if any.
    pub fn session(&self, session_id: SessionId) -> Option<&SessionBatch> {
        self.batches.get(&session_id)
    }

    /// Number of sessions with a tracked batch, empty or not.
    pub fn num_sessions(&self) -> usize {
        self.batches.len()
    }

    fn batch_mut(&mut self, session_id: SessionId) -> &mut SessionBatch {
        let now = self.time_provider.now();
        self.batches
            .entry(session_id)
            .or_insert_with(|| SessionBatch::new(now))
    }

    /// Append `statement` to the session's batch.
    ///
    /// If the statement would push the batch over its statement count or size limit, the
    /// session's current content is flushed first. A statement that exceeds the size limit on
    /// its own is written straight through in its own round trip instead of being buffered.
    ///
    /// A failed flush is returned and `statement` is not buffered. The session keeps its earlier
    /// content, but the statement that triggered the flush exists only in the caller's hands.
    /// The ingest loop therefore treats this error as unrecoverable: it stops without
    /// acknowledging upstream, and the unacknowledged messages are replayed after a restart.
    pub async fn queue_statement(
        &mut self,
        store: &dyn Store,
        session_id: SessionId,
        statement: Statement,
    ) -> Result<()> {
        let config = self.config;
        let now = self.time_provider.now();
        let batch = self.batch_mut(session_id);
        let size = statement.size();

        let over_count = batch.len() + 1 > config.queue_limit.get();
        let over_size = batch.size + size > config.size_limit.get();
        if over_count || over_size {
            trace!(
                %session_id,
                over_count,
                over_size,
                "session batch limit reached, flushing early"
            );
            flush(store, session_id, batch, now).await?;
        }

        if size > config.size_limit.get() {
            debug!(
                %session_id,
                size,
                "statement exceeds the session size limit, writing it directly"
            );
            return store
                .send_batch(session_id, std::slice::from_ref(&statement))
                .await
                .map_err(|source| Error::BatchFlush { session_id, source });
        }

        batch.push(statement);
        Ok(())
    }

    /// Grow the tracked size of the session's batch by `delta` bytes without queuing a
    /// statement, flushing the session if that crosses the size limit.
    ///
    /// A failed flush is returned and the grown size is kept, so the next operation on the
    /// session flushes again. Callers treat the error like a failed [`Self::queue_statement`].
    pub async fn update_session_size(
        &mut self,
        store: &dyn Store,
        session_id: SessionId,
        delta: usize,
    ) -> Result<()> {
        let limit = self.config.size_limit.get();
        let now = self.time_provider.now();
        let batch = self.batch_mut(session_id);

        batch.size = batch.size.saturating_add(delta);
        if batch.size > limit {
            trace!(%session_id, size = batch.size, "session batch size limit reached");
            flush(store, session_id, batch, now).await?;
        }
        Ok(())
    }

    /// Accumulate page and event count increments for the session's `sessions` row. They are
    /// written as one update at the end of the session's next flush.
    pub async fn update_session_events(
        &mut self,
        store: &dyn Store,
        session_id: SessionId,
        events: u32,
        pages: u32,
    ) -> Result<()> {
        if events == 0 && pages == 0 {
            return Ok(());
        }

        let batch = self.batch_mut(session_id);
        let first_update = batch.counters.is_zero();
        batch.counters.events += i64::from(events);
        batch.counters.pages += i64::from(pages);

        if first_update {
            self.update_session_size(store, session_id, SESSION_COUNTERS_SIZE)
                .await?;
        }
        Ok(())
    }

    /// Flush only `session_id`, leaving every other session buffered.
    pub async fn commit_one(&mut self, store: &dyn Store, session_id: SessionId) -> Result<()> {
        let now = self.time_provider.now();
        match self.batches.get_mut(&session_id) {
            Some(batch) => flush(store, session_id, batch, now).await,
            None => Ok(()),
        }
    }

    /// Flush `session_id` and stop tracking it.
    ///
    /// If the flush fails the session stays tracked with its content intact.
    pub async fn remove_session(&mut self, store: &dyn Store, session_id: SessionId) -> Result<()> {
        self.commit_one(store, session_id).await?;
        self.batches.remove(&session_id);
        Ok(())
    }

    /// Flush every session with buffered content, each as its own round trip, in ascending
    /// session id order.
    ///
    /// A failing session keeps its content for the next sweep and does not stop the sweep;
    /// all failures are reported together once every session was attempted. Sessions that
    /// have held nothing for longer than [`BatchConfig::session_retention`] are dropped.
    pub async fn commit_all(&mut self, store: &dyn Store) -> Result<(), CommitError> {
        let now = self.time_provider.now();

        let mut session_ids: Vec<_> = self
            .batches
            .iter()
            .filter(|(_, batch)| !batch.is_empty() || batch.size > 0)
            .map(|(session_id, _)| *session_id)
            .collect();
        session_ids.sort_unstable();

        let mut failures = vec![];
        for session_id in session_ids {
            let Some(batch) = self.batches.get_mut(&session_id) else {
                continue;
            };
            if let Err(e) = flush(store, session_id, batch, now).await {
                failures.push(e);
            }
        }

        let retention = self.config.session_retention;
        let before = self.batches.len();
        self.batches.retain(|_, batch| {
            !batch.is_empty()
                || now
                    .checked_duration_since(batch.emptied_at)
                    .is_none_or(|idle| idle < retention)
        });
        let expired = before - self.batches.len();
        if expired > 0 {
            debug!(expired, "dropped idle session batches");
        }

        CommitError::check(failures)
    }
}

/// Write the pending content of `batch` and clear it on success.
async fn flush(
    store: &dyn Store,
    session_id: SessionId,
    batch: &mut SessionBatch,
    now: Time,
) -> Result<()> {
    if batch.is_empty() {
        batch.size = 0;
        return Ok(());
    }

    let result = {
        let pending = batch.pending(session_id);
        store.send_batch(session_id, &pending).await
    };

    match result {
        Ok(()) => {
            debug!(
                %session_id,
                n_statements = batch.len(),
                size = batch.size,
                "session batch flushed"
            );
            batch.clear(now);
            Ok(())
        }
        Err(source) => {
            error!(
                %session_id,
                n_statements = batch.len(),
                error = %source,
                "failed to flush session batch, content retained for retry"
            );
            Err(Error::BatchFlush { session_id, source })
        }
    }
}

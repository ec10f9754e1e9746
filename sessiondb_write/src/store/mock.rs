//! A recording [`Store`] for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use sessiondb_id::SessionId;

use super::{Error, Row, Store};
use crate::{bulk::BulkSpec, value::Statement};

/// A write observed by [`MockStore`].
#[derive(Debug, Clone, PartialEq)]
pub enum StoreOp {
    Batch {
        session_id: SessionId,
        statements: Vec<Statement>,
    },
    Bulk {
        name: String,
        rows: Vec<Row>,
    },
}

impl StoreOp {
    pub fn is_bulk(&self) -> bool {
        matches!(self, Self::Bulk { .. })
    }
}

#[derive(Debug, Default)]
struct State {
    applied: Vec<StoreOp>,
    rejected: Vec<StoreOp>,
    session_failures: HashMap<SessionId, usize>,
    bulk_failures: HashMap<String, usize>,
    closed: bool,
}

/// A [`Store`] that keeps every write in memory, in the order it was attempted.
///
/// Failures can be injected per session or per bulk name; a rejected write is recorded
/// separately and is not part of [`MockStore::applied`].
#[derive(Debug, Default)]
pub struct MockStore {
    state: Mutex<State>,
}

impl MockStore {
    /// Reject the next `times` batch flushes of `session_id`.
    pub fn fail_session(&self, session_id: SessionId, times: usize) {
        self.state.lock().session_failures.insert(session_id, times);
    }

    /// Reject the next `times` flushes of the bulk named `name`.
    pub fn fail_bulk(&self, name: &str, times: usize) {
        self.state
            .lock()
            .bulk_failures
            .insert(name.to_string(), times);
    }

    /// Writes that succeeded, in order.
    pub fn applied(&self) -> Vec<StoreOp> {
        self.state.lock().applied.clone()
    }

    /// Writes that were rejected by an injected failure, in order.
    pub fn rejected(&self) -> Vec<StoreOp> {
        self.state.lock().rejected.clone()
    }

    /// All statements applied for `session_id`, across every flush.
    pub fn session_statements(&self, session_id: SessionId) -> Vec<Statement> {
        self.state
            .lock()
            .applied
            .iter()
            .filter_map(|op| match op {
                StoreOp::Batch {
                    session_id: id,
                    statements,
                } if *id == session_id => Some(statements.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// All rows applied for the bulk named `name`, across every flush.
    pub fn bulk_rows(&self, name: &str) -> Vec<Row> {
        self.state
            .lock()
            .applied
            .iter()
            .filter_map(|op| match op {
                StoreOp::Bulk { name: n, rows } if n == name => Some(rows.clone()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

fn take_failure<K>(failures: &mut HashMap<K, usize>, key: &K) -> bool
where
    K: std::hash::Hash + Eq,
{
    match failures.get_mut(key) {
        Some(n) if *n > 0 => {
            *n -= 1;
            true
        }
        _ => false,
    }
}

#[async_trait]
impl Store for MockStore {
    async fn send_batch(
        &self,
        session_id: SessionId,
        statements: &[Statement],
    ) -> Result<(), Error> {
        let mut state = self.state.lock();
        let op = StoreOp::Batch {
            session_id,
            statements: statements.to_vec(),
        };
        if take_failure(&mut state.session_failures, &session_id) {
            state.rejected.push(op);
            return Err(Error::Rejected(format!("injected failure for session {session_id}")));
        }
        state.applied.push(op);
        Ok(())
    }

    async fn insert_bulk(&self, spec: &BulkSpec, rows: &[Row]) -> Result<(), Error> {
        let mut state = self.state.lock();
        let op = StoreOp::Bulk {
            name: spec.name().to_string(),
            rows: rows.to_vec(),
        };
        if take_failure(&mut state.bulk_failures, &spec.name().to_string()) {
            state.rejected.push(op);
            return Err(Error::Rejected(format!("injected failure for bulk {}", spec.name())));
        }
        state.applied.push(op);
        Ok(())
    }

    async fn close(&self) -> Result<(), Error> {
        self.state.lock().closed = true;
        Ok(())
    }
}

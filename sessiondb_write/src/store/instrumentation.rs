use async_trait::async_trait;
use iox_time::{SystemProvider, TimeProvider};
use metric::{DurationHistogram, Metric, U64Counter};
use sessiondb_id::SessionId;

use super::{Error, Row, Store};
use crate::{bulk::BulkSpec, value::Statement};

#[derive(Debug, Clone)]
struct CallMetrics {
    duration_success: DurationHistogram,
    duration_error: DurationHistogram,
    count_success: U64Counter,
    count_error: U64Counter,
}

impl CallMetrics {
    fn new(
        duration: &Metric<DurationHistogram>,
        count: &Metric<U64Counter>,
        kind: &'static str,
    ) -> Self {
        Self {
            duration_success: duration.recorder(&[("kind", kind), ("result", "success")]),
            duration_error: duration.recorder(&[("kind", kind), ("result", "error")]),
            count_success: count.recorder(&[("kind", kind), ("result", "success")]),
            count_error: count.recorder(&[("kind", kind), ("result", "error")]),
        }
    }

    fn record<T, E>(&self, res: &Result<T, E>, delta: Option<std::time::Duration>) {
        let (duration, count) = match res {
            Ok(_) => (&self.duration_success, &self.count_success),
            Err(_) => (&self.duration_error, &self.count_error),
        };
        if let Some(delta) = delta {
            duration.record(delta);
        }
        count.inc(1);
    }
}

/// An instrumentation decorator over a [`Store`] implementation.
///
/// Every write call is timed and counted, faceted by call kind (`batch` or `bulk`) and result.
/// Statements of successful batches and rows of successful bulks are counted as well.
#[derive(Debug, Clone)]
pub struct StoreInstrumentation<T, P = SystemProvider> {
    inner: T,
    time_provider: P,

    batch: CallMetrics,
    bulk: CallMetrics,

    batch_statements: U64Counter,
    bulk_rows: U64Counter,
}

impl<T> StoreInstrumentation<T> {
    pub fn new(inner: T, metrics: &metric::Registry) -> Self {
        Self::new_with_time_provider(inner, Default::default(), metrics)
    }
}

impl<T, P> StoreInstrumentation<T, P> {
    pub fn new_with_time_provider(inner: T, time_provider: P, metrics: &metric::Registry) -> Self {
        let duration: Metric<DurationHistogram> = metrics.register_metric(
            "sql_request_time",
            "duration distribution of store write calls",
        );
        let count: Metric<U64Counter> =
            metrics.register_metric("sql_request_number", "number of store write calls");

        let batch_statements = metrics
            .register_metric::<U64Counter>(
                "batch_flush_statements",
                "number of statements written by session batch flushes",
            )
            .recorder(&[]);
        let bulk_rows = metrics
            .register_metric::<U64Counter>(
                "bulk_flush_rows",
                "number of rows written by bulk flushes",
            )
            .recorder(&[]);

        Self {
            inner,
            time_provider,
            batch: CallMetrics::new(&duration, &count, "batch"),
            bulk: CallMetrics::new(&duration, &count, "bulk"),
            batch_statements,
            bulk_rows,
        }
    }
}

#[async_trait]
impl<T, P> Store for StoreInstrumentation<T, P>
where
    T: Store,
    P: TimeProvider,
{
    async fn send_batch(
        &self,
        session_id: SessionId,
        statements: &[Statement],
    ) -> Result<(), Error> {
        let t = self.time_provider.now();

        let res = self.inner.send_batch(session_id, statements).await;

        let delta = self.time_provider.now().checked_duration_since(t);
        self.batch.record(&res, delta);
        if res.is_ok() {
            self.batch_statements.inc(statements.len() as u64);
        }

        res
    }

    async fn insert_bulk(&self, spec: &BulkSpec, rows: &[Row]) -> Result<(), Error> {
        let t = self.time_provider.now();

        let res = self.inner.insert_bulk(spec, rows).await;

        let delta = self.time_provider.now().checked_duration_since(t);
        self.bulk.record(&res, delta);
        if res.is_ok() {
            self.bulk_rows.inc(rows.len() as u64);
        }

        res
    }

    async fn close(&self) -> Result<(), Error> {
        self.inner.close().await
    }
}

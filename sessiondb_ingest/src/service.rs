//! The consumption loop.

use std::time::Duration;

use metric::{DurationCounter, U64Counter};
use observability_deps::tracing::{debug, error, info, trace, warn};
use sessiondb_shutdown::ShutdownToken;
use tokio::{
    sync::broadcast::{self, error::RecvError},
    time::{Instant, MissedTickBehavior},
};

use crate::{
    Error, Result,
    consumer::{Consumer, RebalanceNotice},
    memory::MemoryGate,
    saver::Saver,
};

/// Timing of the consumption loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopConfig {
    /// Interval between commit sweeps.
    pub commit_batch_timeout: Duration,

    /// Wait before asking the memory gate again after it denied consumption.
    pub memory_backoff: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            commit_batch_timeout: Duration::from_secs(15),
            memory_backoff: Duration::from_millis(100),
        }
    }
}

/// Drives a [`Consumer`] into a [`Saver`] and ties commit sweeps to offset acknowledgement.
///
/// Every iteration handles exactly one of, in priority order:
///
/// 1. a due commit tick: [`Saver::commit`], then [`Consumer::commit`] if and only if the
///    sweep succeeded;
/// 2. a pending rebalance notice, which is logged;
/// 3. otherwise, if the [`MemoryGate`] has headroom, one upstream message; if it has not, a
///    bounded sleep before polling again.
///
/// A failure to consume or to save a message is unrecoverable and ends the loop without
/// acknowledging anything further.
#[derive(Debug)]
pub struct ConsumptionLoop<C, S, G> {
    consumer: C,
    saver: S,
    gate: G,
    config: LoopConfig,

    /// Duration of time ingest is paused by the memory gate
    paused_duration: DurationCounter,

    commit_success: U64Counter,
    commit_error: U64Counter,
}

impl<C, S, G> ConsumptionLoop<C, S, G>
where
    C: Consumer,
    S: Saver,
    G: MemoryGate,
{
    pub fn new(
        consumer: C,
        saver: S,
        gate: G,
        config: LoopConfig,
        metrics: &metric::Registry,
    ) -> Self {
        let paused_duration = metrics
            .register_metric::<DurationCounter>(
                "ingest_paused_duration",
                "duration of time consumption has been paused by the memory gate",
            )
            .recorder(&[]);

        let commits = metrics.register_metric::<U64Counter>(
            "ingest_commit",
            "commit sweeps run by the consumption loop",
        );

        Self {
            consumer,
            saver,
            gate,
            config,
            paused_duration,
            commit_success: commits.recorder(&[("result", "success")]),
            commit_error: commits.recorder(&[("result", "error")]),
        }
    }

    /// Run until `shutdown` is requested or an unrecoverable error occurs.
    ///
    /// On a requested shutdown the loop stops pulling, runs a final commit sweep and
    /// acknowledges the offset if that succeeded. In both cases the saver and consumer are
    /// closed and `shutdown` is completed before returning. An unrecoverable error also
    /// triggers a shutdown of the whole service and is returned.
    pub async fn run(mut self, shutdown: ShutdownToken) -> Result<()> {
        let period = self.config.commit_batch_timeout;
        let mut commit_tick = tokio::time::interval_at(Instant::now() + period, period);
        commit_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut rebalance = Some(self.consumer.subscribe_rebalance());
        let mut paused_since: Option<Instant> = None;

        info!(commit_batch_timeout = ?period, "consumption loop started");

        let res = loop {
            tokio::select! {
                biased;

                _ = shutdown.wait_for_shutdown() => break Ok(()),

                _ = commit_tick.tick() => self.commit().await,

                notice = next_notice(&mut rebalance) => match notice {
                    Ok(notice) => info!(?notice, "upstream rebalance"),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "missed upstream rebalance notices")
                    }
                    Err(RecvError::Closed) => {
                        debug!("upstream rebalance channel closed");
                        rebalance = None;
                    }
                },

                _ = std::future::ready(()) => {
                    if !self.gate.has_free_memory() {
                        if paused_since.is_none() {
                            warn!("pausing ingest, process memory above limit");
                            paused_since = Some(Instant::now());
                        }
                        self.paused_duration.inc(self.config.memory_backoff);
                        tokio::time::sleep(self.config.memory_backoff).await;
                        continue;
                    }

                    if let Some(since) = paused_since.take() {
                        info!(pause_duration = ?since.elapsed(), "resuming ingest");
                    }

                    if let Err(e) = self.consume_one().await {
                        break Err(e);
                    }
                }
            }
        };

        match &res {
            Ok(()) => {
                info!("consumption loop stopping, running final commit");
                self.commit().await;
            }
            Err(e) => {
                error!(
                    error = %e,
                    "unrecoverable ingest error, stopping without acknowledging upstream"
                );
                shutdown.trigger_shutdown();
            }
        }

        if let Err(e) = self.saver.close().await {
            warn!(error = %e, "failed to close saver");
        }
        self.consumer.close().await;
        shutdown.complete();

        res
    }

    async fn consume_one(&mut self) -> Result<()> {
        let Some(message) = self.consumer.consume_next().await.map_err(Error::Consume)? else {
            return Ok(());
        };

        let offset = message.offset();
        trace!(offset, "consumed message");
        self.saver
            .handle(message)
            .await
            .map_err(|source| Error::Save { offset, source })
    }

    /// Run one commit sweep and acknowledge the upstream offset if it succeeded.
    async fn commit(&mut self) {
        match self.saver.commit().await {
            Ok(()) => {
                self.commit_success.inc(1);
                match self.consumer.commit().await {
                    Ok(()) => debug!("commit sweep done, upstream offset acknowledged"),
                    Err(e) => error!(error = %e, "failed to acknowledge upstream offset"),
                }
            }
            Err(e) => {
                self.commit_error.inc(1);
                error!(
                    error = %e,
                    failed_targets = e.failures().len(),
                    "commit sweep failed, upstream offset not acknowledged"
                );
            }
        }
    }
}

async fn next_notice(
    rx: &mut Option<broadcast::Receiver<RebalanceNotice>>,
) -> Result<RebalanceNotice, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        consumer::{self, mock::MockConsumer},
        saver::{SaveError, mock::MockSaver, session::SessionSaver},
        test_util::{EventLog, LoopEvent, MockMemoryGate},
    };
    use assert_matches::assert_matches;
    use iox_time::{MockProvider, Time};
    use metric::{Attributes, Metric};
    use pretty_assertions::assert_eq;
    use sessiondb_id::SessionId;
    use sessiondb_shutdown::ShutdownManager;
    use sessiondb_write::{
        BatchConfig, CommitError, Connector, bulk::default_specs, store::mock::MockStore,
    };
    use tokio::task::JoinHandle;

    const CONFIG: LoopConfig = LoopConfig {
        commit_batch_timeout: Duration::from_secs(10),
        memory_backoff: Duration::from_millis(100),
    };

    fn spawn<C, S, G>(
        consumer: C,
        saver: S,
        gate: G,
        metrics: &metric::Registry,
    ) -> (ShutdownManager, JoinHandle<Result<()>>)
    where
        C: Consumer,
        S: Saver,
        G: MemoryGate,
    {
        let manager = ShutdownManager::new_testing();
        let token = manager.register();
        let service = ConsumptionLoop::new(consumer, saver, gate, CONFIG, metrics);
        (manager, tokio::spawn(service.run(token)))
    }

    async fn wait_for(log: &EventLog, event: LoopEvent) {
        while log.count(event) == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    fn commits(metrics: &metric::Registry, result: &'static str) -> u64 {
        metrics
            .get_instrument::<Metric<U64Counter>>("ingest_commit")
            .expect("failed to find metric")
            .get_observer(&Attributes::from(&[("result", result)]))
            .expect("failed to find attributes")
            .fetch()
    }

    #[tokio::test(start_paused = true)]
    async fn memory_gate_holds_back_consumption() {
        let log = EventLog::default();
        let metrics = metric::Registry::default();
        let (manager, handle) = spawn(
            MockConsumer::new(log.clone()).with_messages(["a", "b"]),
            MockSaver::new(log.clone()),
            MockMemoryGate::new([false; 5], log.clone()),
            &metrics,
        );

        wait_for(&log, LoopEvent::Handle { offset: 1 }).await;
        manager.shutdown();
        handle.await.unwrap().unwrap();

        let events = log.events();
        assert_eq!(
            events[..9],
            [
                LoopEvent::GatePoll { free: false },
                LoopEvent::GatePoll { free: false },
                LoopEvent::GatePoll { free: false },
                LoopEvent::GatePoll { free: false },
                LoopEvent::GatePoll { free: false },
                LoopEvent::GatePoll { free: true },
                LoopEvent::Pull,
                LoopEvent::Handle { offset: 0 },
                LoopEvent::GatePoll { free: true },
            ]
        );
        assert_eq!(
            events[events.len() - 4..],
            [
                LoopEvent::Commit { ok: true },
                LoopEvent::Ack,
                LoopEvent::SaverClose,
                LoopEvent::ConsumerClose,
            ]
        );

        let paused = metrics
            .get_instrument::<Metric<DurationCounter>>("ingest_paused_duration")
            .expect("failed to find metric")
            .get_observer(&Attributes::from(&[]))
            .expect("failed to find attributes")
            .fetch();
        assert_eq!(paused, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sweep_is_not_acknowledged() {
        let log = EventLog::default();
        let metrics = metric::Registry::default();
        let failure = sessiondb_write::Error::UnknownBulk("pages".to_string());
        let (manager, handle) = spawn(
            MockConsumer::new(log.clone()).with_messages(["a"]),
            MockSaver::new(log.clone()).with_commit_result(Err(CommitError::from(failure))),
            MockMemoryGate::open(log.clone()),
            &metrics,
        );

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(log.count(LoopEvent::Commit { ok: false }), 1);
        assert_eq!(log.count(LoopEvent::Ack), 0);
        assert_eq!(commits(&metrics, "error"), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(log.count(LoopEvent::Commit { ok: true }), 1);
        assert_eq!(log.count(LoopEvent::Ack), 1);

        manager.shutdown();
        handle.await.unwrap().unwrap();
        assert_eq!(log.count(LoopEvent::Ack), 2);
        assert_eq!(commits(&metrics, "success"), 2);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn failed_session_is_retried_before_ack() {
        let a = SessionId::new(1);
        let b = SessionId::new(2);
        let store = Arc::new(MockStore::default());
        store.fail_session(a, 1);

        let connector = Connector::new(
            Arc::clone(&store) as _,
            BatchConfig::default(),
            default_specs(),
            Arc::new(MockProvider::new(Time::from_timestamp_nanos(0))),
            &metric::Registry::default(),
        );

        let log = EventLog::default();
        let metrics = metric::Registry::default();
        let (manager, handle) = spawn(
            MockConsumer::new(log.clone()).with_messages([
                r#"{"session_id": 1, "project_id": 1, "timestamp": 1, "type": "page", "message_id": 1, "path": "/a"}"#,
                r#"{"session_id": 2, "project_id": 1, "timestamp": 2, "type": "page", "message_id": 1, "path": "/b"}"#,
            ]),
            SessionSaver::new(connector),
            MockMemoryGate::open(log.clone()),
            &metrics,
        );

        tokio::time::sleep(Duration::from_secs(15)).await;
        assert!(store.session_statements(a).is_empty());
        assert_eq!(store.session_statements(b).len(), 2);
        assert_eq!(log.count(LoopEvent::Ack), 0);

        manager.shutdown();
        handle.await.unwrap().unwrap();
        assert_eq!(store.session_statements(a).len(), 2);
        assert_eq!(log.count(LoopEvent::Ack), 1);
        assert!(store.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn consume_error_is_fatal() {
        let log = EventLog::default();
        let (manager, handle) = spawn(
            MockConsumer::new(log.clone())
                .with_messages(["a"])
                .with_error(consumer::Error::Io(std::io::Error::other("broken"))),
            MockSaver::new(log.clone()),
            MockMemoryGate::open(log.clone()),
            &metric::Registry::default(),
        );

        assert_matches!(handle.await.unwrap(), Err(Error::Consume(_)));
        assert!(manager.is_shutdown());
        manager.join().await;

        let events = log.events();
        assert_eq!(log.count(LoopEvent::Ack), 0);
        assert_eq!(log.count(LoopEvent::Commit { ok: true }), 0);
        assert_eq!(
            events[events.len() - 2..],
            [LoopEvent::SaverClose, LoopEvent::ConsumerClose]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn save_error_is_fatal() {
        let store = Arc::new(MockStore::default());
        let connector = Connector::new(
            Arc::clone(&store) as _,
            BatchConfig::default(),
            default_specs(),
            Arc::new(MockProvider::new(Time::from_timestamp_nanos(0))),
            &metric::Registry::default(),
        );
        let log = EventLog::default();
        let (_manager, handle) = spawn(
            MockConsumer::new(log.clone()).with_messages(["{}"]),
            SessionSaver::new(connector),
            MockMemoryGate::open(log.clone()),
            &metric::Registry::default(),
        );

        assert_matches!(
            handle.await.unwrap(),
            Err(Error::Save {
                offset: 0,
                source: SaveError::Decode(_)
            })
        );
        assert_eq!(log.count(LoopEvent::Ack), 0);
        assert!(store.applied().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_early_flush_is_fatal() {
        let session = SessionId::new(1);
        let store = Arc::new(MockStore::default());
        store.fail_session(session, 1);
        let connector = Connector::new(
            Arc::clone(&store) as _,
            BatchConfig {
                queue_limit: std::num::NonZeroUsize::MIN,
                ..Default::default()
            },
            default_specs(),
            Arc::new(MockProvider::new(Time::from_timestamp_nanos(0))),
            &metric::Registry::default(),
        );
        let log = EventLog::default();
        let (manager, handle) = spawn(
            MockConsumer::new(log.clone()).with_messages([
                r#"{"session_id": 1, "project_id": 1, "timestamp": 1, "type": "page", "message_id": 1, "path": "/a"}"#,
                r#"{"session_id": 1, "project_id": 1, "timestamp": 2, "type": "page", "message_id": 2, "path": "/b"}"#,
            ]),
            SessionSaver::new(connector),
            MockMemoryGate::open(log.clone()),
            &metric::Registry::default(),
        );

        // the second page overflows the batch and its early flush is rejected
        assert_matches!(
            handle.await.unwrap(),
            Err(Error::Save {
                offset: 1,
                source: SaveError::Write(sessiondb_write::Error::BatchFlush { session_id, .. })
            }) if session_id == session
        );
        assert!(manager.is_shutdown());
        assert_eq!(log.count(LoopEvent::Ack), 0);
        assert_eq!(store.rejected().len(), 1);
        assert!(store.applied().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rebalance_does_not_commit() {
        let log = EventLog::default();
        let consumer = MockConsumer::new(log.clone());
        let rebalance = consumer.rebalance_sender();
        let (manager, handle) = spawn(
            consumer,
            MockSaver::new(log.clone()),
            MockMemoryGate::open(log.clone()),
            &metric::Registry::default(),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        rebalance
            .send(RebalanceNotice::Revoked {
                partitions: vec![0],
            })
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(log.count(LoopEvent::Commit { ok: true }), 0);

        manager.shutdown();
        handle.await.unwrap().unwrap();
        assert_eq!(log.count(LoopEvent::Commit { ok: true }), 1);
    }
}

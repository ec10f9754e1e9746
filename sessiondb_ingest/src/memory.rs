//! Admission control based on the process' resident memory.

use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use observability_deps::tracing::{debug, warn};
use sysinfo::{Pid, ProcessRefreshKind, System};
use tokio::task::JoinHandle;

/// Decides whether new upstream work may be admitted.
///
/// Implementations must be cheap and must not block: the loop asks on every iteration.
pub trait MemoryGate: Debug + Send + Sync + 'static {
    fn has_free_memory(&self) -> bool;
}

impl<T> MemoryGate for Arc<T>
where
    T: MemoryGate + ?Sized,
{
    fn has_free_memory(&self) -> bool {
        (**self).has_free_memory()
    }
}

#[derive(Debug)]
struct RssSampler {
    system: System,
    pid: Option<Pid>,
}

impl RssSampler {
    fn new() -> Self {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| warn!(error = %e, "cannot get own pid, memory gate stays open"))
            .ok();
        Self {
            system: System::new(),
            pid,
        }
    }

    /// Resident set size of this process in bytes.
    fn sample(&mut self) -> Option<u64> {
        let pid = self.pid?;
        self.system
            .refresh_pids_specifics(&[pid], ProcessRefreshKind::new().with_memory());
        self.system.process(pid).map(|p| p.memory())
    }
}

/// A [`MemoryGate`] that closes once the process' resident memory exceeds a limit.
///
/// Memory is sampled by a background task every `check_interval`; asking the gate only reads
/// the last sample. The sampler task stops when the gate is dropped.
#[derive(Debug)]
pub struct ProcessMemoryGate {
    limit_bytes: u64,
    used_bytes: Arc<AtomicU64>,
    sampler: JoinHandle<()>,
}

impl ProcessMemoryGate {
    /// Take a first sample and start the background sampler.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(limit_bytes: usize, check_interval: Duration) -> Self {
        let mut sampler = RssSampler::new();
        let used_bytes = Arc::new(AtomicU64::new(sampler.sample().unwrap_or_default()));

        let task = tokio::spawn({
            let used_bytes = Arc::clone(&used_bytes);
            async move {
                let mut interval = tokio::time::interval(check_interval);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

                loop {
                    interval.tick().await;
                    if let Some(used) = sampler.sample() {
                        debug!(used_bytes = used, "sampled process memory");
                        used_bytes.store(used, Ordering::Relaxed);
                    }
                }
            }
        });

        Self {
            limit_bytes: limit_bytes as u64,
            used_bytes,
            sampler: task,
        }
    }

    /// The last sampled resident memory in bytes.
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes.load(Ordering::Relaxed)
    }

    pub fn limit_bytes(&self) -> u64 {
        self.limit_bytes
    }
}

impl MemoryGate for ProcessMemoryGate {
    fn has_free_memory(&self) -> bool {
        self.used_bytes() <= self.limit_bytes
    }
}

impl Drop for ProcessMemoryGate {
    fn drop(&mut self) {
        self.sampler.abort();
    }
}

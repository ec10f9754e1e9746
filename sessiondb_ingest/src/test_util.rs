use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;

use crate::memory::MemoryGate;

/// An observable step of the consumption loop, recorded by the mocks in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoopEvent {
    GatePoll { free: bool },
    Pull,
    Handle { offset: u64 },
    Commit { ok: bool },
    Ack,
    SaverClose,
    ConsumerClose,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct EventLog(Arc<Mutex<Vec<LoopEvent>>>);

impl EventLog {
    pub(crate) fn push(&self, event: LoopEvent) {
        self.0.lock().push(event);
    }

    pub(crate) fn events(&self) -> Vec<LoopEvent> {
        self.0.lock().clone()
    }

    pub(crate) fn count(&self, event: LoopEvent) -> usize {
        self.0.lock().iter().filter(|e| **e == event).count()
    }
}

/// A [`MemoryGate`] answering from a script, then always granting.
#[derive(Debug)]
pub(crate) struct MockMemoryGate {
    answers: Mutex<VecDeque<bool>>,
    log: EventLog,
}

impl MockMemoryGate {
    pub(crate) fn new(answers: impl IntoIterator<Item = bool>, log: EventLog) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            log,
        }
    }

    /// A gate that always grants.
    pub(crate) fn open(log: EventLog) -> Self {
        Self::new(std::iter::empty(), log)
    }
}

impl MemoryGate for MockMemoryGate {
    fn has_free_memory(&self) -> bool {
        let free = self.answers.lock().pop_front().unwrap_or(true);
        self.log.push(LoopEvent::GatePoll { free });
        free
    }
}

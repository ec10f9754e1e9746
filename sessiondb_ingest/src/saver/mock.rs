use std::collections::VecDeque;

use async_trait::async_trait;
use sessiondb_write::{CommitError, store};

use super::{SaveError, Saver};
use crate::{
    consumer::Message,
    test_util::{EventLog, LoopEvent},
};

/// A [`Saver`] that records every call and answers commits from a script, then succeeds.
#[derive(Debug)]
pub(crate) struct MockSaver {
    commit_script: VecDeque<Result<(), CommitError>>,
    log: EventLog,
}

impl MockSaver {
    pub(crate) fn new(log: EventLog) -> Self {
        Self {
            commit_script: VecDeque::new(),
            log,
        }
    }

    pub(crate) fn with_commit_result(mut self, res: Result<(), CommitError>) -> Self {
        self.commit_script.push_back(res);
        self
    }
}

#[async_trait]
impl Saver for MockSaver {
    async fn handle(&mut self, message: Message) -> Result<(), SaveError> {
        self.log.push(LoopEvent::Handle {
            offset: message.offset(),
        });
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), CommitError> {
        let res = self.commit_script.pop_front().unwrap_or(Ok(()));
        self.log.push(LoopEvent::Commit { ok: res.is_ok() });
        res
    }

    async fn close(&mut self) -> Result<(), store::Error> {
        self.log.push(LoopEvent::SaverClose);
        Ok(())
    }
}

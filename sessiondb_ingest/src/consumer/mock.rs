use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{Consumer, Error, Message, RebalanceNotice};
use crate::test_util::{EventLog, LoopEvent};

/// A [`Consumer`] replaying scripted pull results, then idling.
#[derive(Debug)]
pub(crate) struct MockConsumer {
    script: VecDeque<Result<Message, Error>>,
    log: EventLog,
    rebalance_tx: broadcast::Sender<RebalanceNotice>,
}

impl MockConsumer {
    pub(crate) fn new(log: EventLog) -> Self {
        let (rebalance_tx, _) = broadcast::channel(16);
        Self {
            script: VecDeque::new(),
            log,
            rebalance_tx,
        }
    }

    pub(crate) fn with_messages<I, P>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<bytes::Bytes>,
    {
        for payload in messages {
            let offset = self.script.len() as u64;
            self.script.push_back(Ok(Message::new(offset, payload)));
        }
        self
    }

    pub(crate) fn with_error(mut self, error: Error) -> Self {
        self.script.push_back(Err(error));
        self
    }

    pub(crate) fn rebalance_sender(&self) -> broadcast::Sender<RebalanceNotice> {
        self.rebalance_tx.clone()
    }
}

#[async_trait]
impl Consumer for MockConsumer {
    async fn consume_next(&mut self) -> Result<Option<Message>, Error> {
        match self.script.pop_front() {
            Some(res) => {
                self.log.push(LoopEvent::Pull);
                res.map(Some)
            }
            None => {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(None)
            }
        }
    }

    fn subscribe_rebalance(&self) -> broadcast::Receiver<RebalanceNotice> {
        self.rebalance_tx.subscribe()
    }

    async fn commit(&mut self) -> Result<(), Error> {
        self.log.push(LoopEvent::Ack);
        Ok(())
    }

    async fn close(&mut self) {
        self.log.push(LoopEvent::ConsumerClose);
    }
}

//! A [`Consumer`] reading a line-delimited event log from the local filesystem.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    time::Duration,
};

use async_trait::async_trait;
use observability_deps::tracing::{debug, info};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    sync::broadcast,
};

use super::{Consumer, Error, Message, RebalanceNotice};

/// Consumes a file of newline-terminated messages, one message per line.
///
/// The offset of a message is its zero-based line number. Committing stores the number of
/// lines consumed so far in `<path>.offset`; a consumer opened on the same path resumes right
/// after the last committed line, so everything consumed but not committed is read again.
///
/// The file may keep growing while it is consumed. A trailing line without its newline is not
/// returned until the newline arrives. Blank lines keep their offset but are skipped.
#[derive(Debug)]
pub struct LogFileConsumer {
    path: PathBuf,
    offset_path: PathBuf,
    reader: BufReader<File>,
    partial: String,
    poll_interval: Duration,

    /// Offset of the next line to read.
    consumed: u64,
    committed: u64,

    rebalance_tx: broadcast::Sender<RebalanceNotice>,
}

impl LogFileConsumer {
    /// Open the log at `path`, skipping the lines acknowledged by a previous run.
    pub async fn open(path: impl Into<PathBuf>, poll_interval: Duration) -> Result<Self, Error> {
        let path = path.into();
        let offset_path = offset_path(&path);
        let committed = read_committed(&offset_path).await?;

        let mut reader = BufReader::new(File::open(&path).await?);
        let mut line = String::new();
        let mut skipped = 0;
        while skipped < committed {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 || !line.ends_with('\n') {
                return Err(Error::Truncated {
                    committed,
                    available: skipped,
                });
            }
            skipped += 1;
        }

        info!(path = %path.display(), committed, "opened event log");

        let (rebalance_tx, _) = broadcast::channel(1);
        Ok(Self {
            path,
            offset_path,
            reader,
            partial: String::new(),
            poll_interval,
            consumed: committed,
            committed,
            rebalance_tx,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset up to which messages are acknowledged.
    pub fn committed(&self) -> u64 {
        self.committed
    }
}

#[async_trait]
impl Consumer for LogFileConsumer {
    async fn consume_next(&mut self) -> Result<Option<Message>, Error> {
        loop {
            let n = self.reader.read_line(&mut self.partial).await?;
            if n == 0 || !self.partial.ends_with('\n') {
                // end of the log so far, the partial line stays buffered
                tokio::time::sleep(self.poll_interval).await;
                return Ok(None);
            }

            let line = std::mem::take(&mut self.partial);
            let offset = self.consumed;
            self.consumed += 1;

            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            return Ok(Some(Message::new(offset, line.to_string())));
        }
    }

    fn subscribe_rebalance(&self) -> broadcast::Receiver<RebalanceNotice> {
        // a single local file is never reassigned
        self.rebalance_tx.subscribe()
    }

    async fn commit(&mut self) -> Result<(), Error> {
        if self.consumed == self.committed {
            return Ok(());
        }

        let mut tmp_path = self.offset_path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let mut tmp = File::create(&tmp_path).await?;
        tmp.write_all(format!("{}\n", self.consumed).as_bytes())
            .await?;
        tmp.sync_all().await?;
        drop(tmp);
        tokio::fs::rename(&tmp_path, &self.offset_path).await?;

        debug!(
            path = %self.path.display(),
            from = self.committed,
            to = self.consumed,
            "committed event log offset"
        );
        self.committed = self.consumed;
        Ok(())
    }

    async fn close(&mut self) {
        info!(
            path = %self.path.display(),
            committed = self.committed,
            uncommitted = self.consumed - self.committed,
            "closed event log"
        );
    }
}

fn offset_path(path: &Path) -> PathBuf {
    let mut p = OsString::from(path.as_os_str());
    p.push(".offset");
    PathBuf::from(p)
}

async fn read_committed(offset_path: &Path) -> Result<u64, Error> {
    match tokio::fs::read_to_string(offset_path).await {
        Ok(s) => s.trim().parse().map_err(|e: std::num::ParseIntError| {
            Error::InvalidOffset {
                path: offset_path.display().to_string(),
                reason: e.to_string(),
            }
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e.into()),
    }
}

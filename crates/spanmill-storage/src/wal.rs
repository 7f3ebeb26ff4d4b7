//! Write-Ahead Log - channel-based writer with deadline flush.
//!
//! Callers append through an mpsc channel; a single writer task owns the
//! file and groups writes, syncing on the flush deadline or on explicit
//! flush. Records are length-prefixed JSON.
//!
//! This WAL is a crash buffer for samples already queued toward the remote
//! sink. It is wiped at open and deleted at close; recovery across restarts
//! is intentionally not supported.

use crate::error::{Result, StorageError};
use crate::sample::Sample;
use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const WAL_FILE: &str = "00000000.wal";
const CHANNEL_CAPACITY: usize = 1024;

/// Commands sent to the WAL writer task.
enum WalCmd {
    /// Append pre-encoded record data (fire-and-forget)
    Append(Vec<u8>),

    /// Flush pending data to disk and report when durable
    Flush(oneshot::Sender<std::result::Result<(), String>>),

    /// Flush, sync, and shut the writer down
    Close(oneshot::Sender<std::result::Result<(), String>>),
}

/// Per-tenant write-ahead log.
pub struct Wal {
    tx: mpsc::Sender<WalCmd>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Wal {
    /// Open the WAL inside `dir` (which must already exist).
    pub async fn open(dir: &Path, flush_deadline: std::time::Duration) -> Result<Wal> {
        let path = dir.join(WAL_FILE);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let (tx, mut rx) = mpsc::channel(CHANNEL_CAPACITY);

        let task = tokio::spawn(async move {
            let mut writer = BufWriter::new(file);
            let mut ticker = tokio::time::interval(flush_deadline);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    cmd = rx.recv() => match cmd {
                        Some(WalCmd::Append(data)) => {
                            if let Err(e) = writer.write_all(&data).await {
                                warn!(error = %e, "WAL write failed");
                            }
                        }
                        Some(WalCmd::Flush(ack)) => {
                            let _ = ack.send(sync(&mut writer).await);
                        }
                        Some(WalCmd::Close(ack)) => {
                            let _ = ack.send(sync(&mut writer).await);
                            break;
                        }
                        None => {
                            if let Err(e) = sync(&mut writer).await {
                                warn!(error = %e, "WAL final flush failed");
                            }
                            break;
                        }
                    },
                    _ = ticker.tick() => {
                        if let Err(e) = sync(&mut writer).await {
                            warn!(error = %e, "WAL deadline flush failed");
                        }
                    }
                }
            }

            debug!("WAL writer task stopped");
        });

        Ok(Wal {
            tx,
            task: tokio::sync::Mutex::new(Some(task)),
        })
    }

    /// Append samples. Returns once the batch is handed to the writer task;
    /// durability follows on the next flush.
    pub async fn append(&self, samples: &[Sample]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }

        let mut buf = Vec::new();
        for sample in samples {
            let body = serde_json::to_vec(sample)?;
            buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
            buf.extend_from_slice(&body);
        }

        self.tx
            .send(WalCmd::Append(buf))
            .await
            .map_err(|_| StorageError::WalClosed)
    }

    /// Flush pending data to disk.
    pub async fn flush(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(WalCmd::Flush(ack))
            .await
            .map_err(|_| StorageError::WalClosed)?;
        done.await
            .map_err(|_| StorageError::WalClosed)?
            .map_err(StorageError::Wal)
    }

    /// Flush and shut the writer down.
    pub async fn close(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(WalCmd::Close(ack))
            .await
            .map_err(|_| StorageError::WalClosed)?;

        let result = done
            .await
            .map_err(|_| StorageError::WalClosed)?
            .map_err(StorageError::Wal);

        if let Some(task) = self.task.lock().await.take() {
            task.await?;
        }
        result
    }
}

async fn sync(writer: &mut BufWriter<tokio::fs::File>) -> std::result::Result<(), String> {
    writer.flush().await.map_err(|e| e.to_string())?;
    writer.get_ref().sync_data().await.map_err(|e| e.to_string())
}

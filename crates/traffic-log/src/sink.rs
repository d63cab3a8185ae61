use std::path::Path;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::entry::TrafficEntry;
use crate::writer::{RotationPolicy, TrafficWriter};

/// Channel buffer size used between producers and the background writer task.
const CHANNEL_BUFFER: usize = 1024;

/// Flush the writer at most every this many seconds when the channel is idle.
const FLUSH_INTERVAL_SECS: u64 = 1;

/// A cheap, cloneable handle used to submit [`TrafficEntry`] values into the
/// background traffic-log writer.
///
/// Every session holds a clone; the writer task exits once the last clone is
/// dropped.
#[derive(Clone)]
pub struct TrafficSink {
    tx: mpsc::Sender<TrafficEntry>,
}

impl TrafficSink {
    /// Spawn the background writer task and return a `(sink, join_handle)` pair.
    ///
    /// The writer opens (or creates) the file at `path` in append mode and
    /// drains entries from the internal channel, flushing after about a second
    /// of inactivity and once more when the channel closes. I/O errors are
    /// logged via `tracing::error` and the entry is skipped.
    pub async fn start(
        path: impl AsRef<Path>,
        policy: RotationPolicy,
    ) -> Result<(Self, JoinHandle<()>), crate::writer::TrafficWriteError> {
        let (tx, rx) = mpsc::channel::<TrafficEntry>(CHANNEL_BUFFER);

        let mut writer = TrafficWriter::new(path, policy).await?;

        let handle = tokio::spawn(async move {
            run_writer_loop(&mut writer, rx).await;
        });

        Ok((Self { tx }, handle))
    }

    /// A sink backed by a plain channel, for callers that consume entries
    /// themselves (tests, alternative outputs).
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<TrafficEntry>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Self { tx }, rx)
    }

    /// Send an entry to the background writer.
    ///
    /// Waits for channel capacity. If the writer has already exited the entry
    /// is dropped and a warning is logged.
    pub async fn log(&self, entry: TrafficEntry) {
        if let Err(err) = self.tx.send(entry).await {
            tracing::warn!(
                event_type = ?err.0.event_type,
                "traffic sink channel closed; entry dropped"
            );
        }
    }
}

/// Core loop executed inside the background task.
async fn run_writer_loop(writer: &mut TrafficWriter, mut rx: mpsc::Receiver<TrafficEntry>) {
    let flush_interval = tokio::time::Duration::from_secs(FLUSH_INTERVAL_SECS);
    let mut dirty = false;

    loop {
        let maybe_entry = tokio::time::timeout(flush_interval, rx.recv()).await;

        match maybe_entry {
            Ok(Some(entry)) => {
                if let Err(err) = writer.write(&entry).await {
                    tracing::error!(%err, "failed to write traffic entry");
                } else {
                    dirty = true;
                }
            }
            // Channel closed: final flush and exit.
            Ok(None) => {
                if dirty {
                    if let Err(err) = writer.flush().await {
                        tracing::error!(%err, "failed to flush traffic log on shutdown");
                    }
                }
                tracing::debug!("traffic writer background task shutting down");
                return;
            }
            Err(_) => {
                if dirty {
                    if let Err(err) = writer.flush().await {
                        tracing::error!(%err, "periodic traffic log flush failed");
                    } else {
                        dirty = false;
                    }
                }
            }
        }
    }
}

//! Fan-in of per-page link channels into one deduplicated stream.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::models::{Collection, MemorySeenSet, PageReceiver, SeenStore};

/// Output side of a running drain.
#[derive(Debug)]
pub struct DrainHandle {
    /// Every distinct link, once. Closes after all page readers are done.
    pub links: mpsc::Receiver<String>,
    /// Cancelled once the drain has fully finished.
    pub finished: CancellationToken,
}

pub struct DrainPipeline {
    collection: Arc<Collection>,
    seen: Arc<MemorySeenSet>,
    buffer: usize,
}

impl DrainPipeline {
    /// The output buffer holds the whole document budget, so readers rarely
    /// wait on a slow consumer.
    pub fn new(collection: Arc<Collection>) -> Self {
        let buffer = collection.max_documents();
        Self {
            collection,
            seen: Arc::new(MemorySeenSet::new()),
            buffer,
        }
    }

    pub fn spawn(self, cancel: CancellationToken) -> DrainHandle {
        let (tx, links) = mpsc::channel(self.buffer.max(1));
        let finished = CancellationToken::new();
        let done = finished.clone();

        tokio::spawn(async move {
            let forwarded = self.run(tx, cancel).await;
            log::info!("[drain] drained {} distinct links", forwarded);
            done.cancel();
        });

        DrainHandle { links, finished }
    }

    async fn run(self, tx: mpsc::Sender<String>, cancel: CancellationToken) -> usize {
        let mut readers = JoinSet::new();
        let mut index = self.collection.start_offset();

        while let Some(page) = self.next_page(index, &cancel).await {
            log::debug!("[drain] reading page {}", index);
            readers.spawn(read_page(
                page,
                Arc::clone(&self.seen),
                tx.clone(),
                cancel.clone(),
            ));
            index += 1;
        }

        let mut forwarded = 0;
        while let Some(joined) = readers.join_next().await {
            match joined {
                Ok(n) => forwarded += n,
                Err(e) => log::error!("[drain] page reader panicked: {}", e),
            }
        }
        // Every reader holds its own sender clone; dropping ours closes the
        // stream only once they are all done.
        drop(tx);
        forwarded
    }

    /// Wait until page `index` is registered. `None` once the collection is
    /// complete without it, or on cancellation.
    async fn next_page(&self, index: usize, cancel: &CancellationToken) -> Option<PageReceiver> {
        let mut changes = self.collection.subscribe();
        loop {
            changes.borrow_and_update();
            if let Some(page) = self.collection.page(index).await {
                return Some(page);
            }
            if self.collection.is_complete() {
                // Registration happens before completion; look once more.
                return self.collection.page(index).await;
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("[drain] cancelled while waiting for page {}", index);
                    return None;
                }
                changed = changes.changed() => {
                    if changed.is_err() {
                        return self.collection.page(index).await;
                    }
                }
            }
        }
    }
}

async fn read_page(
    page: PageReceiver,
    seen: Arc<MemorySeenSet>,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
) -> usize {
    let mut rx = page.lock().await;
    let mut forwarded = 0;

    loop {
        let link = tokio::select! {
            _ = cancel.cancelled() => break,
            link = rx.recv() => match link {
                Some(link) => link,
                None => break,
            },
        };
        if !seen.claim(&link) {
            log::trace!("[drain] duplicate {}", link);
            continue;
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(link) => {
                if sent.is_err() {
                    break;
                }
            }
        }
        forwarded += 1;
    }
    forwarded
}

//! Debounced batch embedding of committed documents.
//!
//! Committed documents are buffered and embedded with a single
//! update-embeddings call per flush. A flush happens on every timer tick,
//! whenever a producer finds the buffer full, and once more on close.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Once};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{Document, IngestConfig};
use crate::services::ingest_api::IngestApi;

pub struct IngestionQueue {
    api: Arc<dyn IngestApi>,
    tx: mpsc::Sender<String>,
    rx: Mutex<mpsc::Receiver<String>>,
    flush_tx: mpsc::Sender<()>,
    flush_rx: StdMutex<Option<mpsc::Receiver<()>>>,
    started: Once,
    worker: StdMutex<Option<JoinHandle<()>>>,
    stop: CancellationToken,
    interval: Duration,
    full_retry_wait: Duration,
    flushed: AtomicUsize,
}

impl IngestionQueue {
    pub fn new(api: Arc<dyn IngestApi>, config: &IngestConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(config.batch_capacity.max(1));
        let (flush_tx, flush_rx) = mpsc::channel(1);
        Arc::new(Self {
            api,
            tx,
            rx: Mutex::new(rx),
            flush_tx,
            flush_rx: StdMutex::new(Some(flush_rx)),
            started: Once::new(),
            worker: StdMutex::new(None),
            stop: CancellationToken::new(),
            interval: Duration::from_secs(config.flush_interval_secs.max(1)),
            full_retry_wait: Duration::from_millis(config.full_retry_wait_ms),
            flushed: AtomicUsize::new(0),
        })
    }

    /// Start the flush timer. Only the first call has any effect.
    pub fn start(self: &Arc<Self>) {
        self.started.call_once(|| {
            let flush_rx = self
                .flush_rx
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .take();
            let Some(mut flush_rx) = flush_rx else {
                return;
            };
            let this = Arc::clone(self);
            let handle = tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + this.interval, this.interval);
                loop {
                    tokio::select! {
                        _ = this.stop.cancelled() => break,
                        _ = ticker.tick() => {}
                        signal = flush_rx.recv() => {
                            if signal.is_none() {
                                break;
                            }
                        }
                    }
                    this.flush().await;
                }
            });
            *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
            log::debug!("[queue] flush timer started ({:?})", self.interval);
        });
    }

    /// Buffer a committed document for the next flush.
    ///
    /// On a full buffer the producer forces a flush, waits briefly, then
    /// waits for room. A full buffer after [`IngestionQueue::close`] fails
    /// with [`AppError::Cancelled`].
    pub async fn enqueue(self: &Arc<Self>, doc: &Document) -> Result<()> {
        self.start();
        if doc.location.trim().is_empty() {
            return Err(AppError::validation(format!(
                "document {} has no location",
                doc.url
            )));
        }

        match self.tx.try_send(doc.normalized_location()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(location)) => {
                log::debug!("[queue] buffer full, forcing flush");
                let _ = self.flush_tx.try_send(());
                tokio::time::sleep(self.full_retry_wait).await;
                // Once closed, nothing flushes the buffer again.
                tokio::select! {
                    _ = self.stop.cancelled() => Err(AppError::Cancelled),
                    sent = self.tx.send(location) => sent.map_err(|_| AppError::Cancelled),
                }
            }
            Err(TrySendError::Closed(_)) => Err(AppError::Cancelled),
        }
    }

    /// Embed everything currently buffered. Returns the batch size.
    ///
    /// A failed call is logged and its batch is not retried.
    pub async fn flush(&self) -> usize {
        let mut batch = Vec::new();
        {
            let mut rx = self.rx.lock().await;
            while let Ok(location) = rx.try_recv() {
                batch.push(location);
            }
        }
        if batch.is_empty() {
            return 0;
        }

        let size = batch.len();
        match self.api.update_embeddings(batch).await {
            Ok(()) => {
                self.flushed.fetch_add(size, Ordering::Relaxed);
                log::info!("[queue] embedded {} documents", size);
            }
            Err(e) => log::error!("[queue] dropped batch of {} documents: {}", size, e),
        }
        size
    }

    /// Documents embedded successfully so far.
    pub fn flushed(&self) -> usize {
        self.flushed.load(Ordering::Relaxed)
    }

    /// Stop the timer and flush what is left.
    pub async fn close(&self) {
        self.stop.cancel();
        let worker = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                log::error!("[queue] flush task panicked: {}", e);
            }
        }
        self.flush().await;
    }
}

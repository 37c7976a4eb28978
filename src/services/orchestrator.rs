//! Upload state machine over the drained link stream.
//!
//! Each link is uploaded once. Access-denied uploads are removed, put back
//! on the stream after a short delay, and slow the whole loop down with a
//! backoff driven by a run-wide retry counter: repeated denials anywhere
//! indicate a shared ban, not a bad document.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{Document, UploadConfig};
use crate::services::gate::NetworkPause;
use crate::services::pdf::PdfFallbackChain;
use crate::services::queue::IngestionQueue;
use crate::services::uploader::Uploader;

/// Pause after the `retries`-th denial. Never zero.
pub fn backoff(retries: u64, config: &UploadConfig) -> Duration {
    let per_retry = if retries <= config.backoff_low_threshold {
        config.backoff_low_ms
    } else if retries <= config.backoff_high_threshold {
        config.backoff_mid_ms
    } else {
        config.backoff_tail_ms
    };
    Duration::from_millis(retries.saturating_mul(per_retry).max(1))
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadSummary {
    pub committed: usize,
    pub duplicates: usize,
    pub retries: usize,
    pub failures: usize,
    pub pdf_documents: usize,
}

pub struct UploadOrchestrator {
    uploader: Arc<Uploader>,
    queue: Arc<IngestionQueue>,
    pdf: Option<Arc<PdfFallbackChain>>,
    pause: Option<Arc<NetworkPause>>,
    config: UploadConfig,
    retries: AtomicU64,
}

impl UploadOrchestrator {
    pub fn new(uploader: Arc<Uploader>, queue: Arc<IngestionQueue>, config: &UploadConfig) -> Self {
        Self {
            uploader,
            queue,
            pdf: None,
            pause: None,
            config: config.clone(),
            retries: AtomicU64::new(0),
        }
    }

    pub fn with_pdf_chain(mut self, chain: Arc<PdfFallbackChain>) -> Self {
        self.pdf = Some(chain);
        self
    }

    /// Signal a network pause on every access denial.
    pub fn with_pause(mut self, pause: Arc<NetworkPause>) -> Self {
        self.pause = Some(pause);
        self
    }

    /// Access denials seen so far in this run.
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::SeqCst)
    }

    /// Drive every link through the upload states until the stream is
    /// exhausted with no requeue pending, or until cancelled.
    ///
    /// Only a failed removal of a denied document ends the run with an
    /// error; every other failure is counted and skipped.
    pub async fn run(
        &self,
        mut links: mpsc::Receiver<String>,
        cancel: CancellationToken,
    ) -> Result<UploadSummary> {
        let (retry_tx, mut retry_rx) = mpsc::unbounded_channel::<String>();
        let mut pending = 0usize;
        let mut input_open = true;
        let mut summary = UploadSummary::default();
        let mut pdf_tasks = JoinSet::new();

        loop {
            if !input_open && pending == 0 {
                break;
            }

            let link = tokio::select! {
                _ = cancel.cancelled() => {
                    log::info!("[upload] cancelled");
                    break;
                }
                link = links.recv(), if input_open => match link {
                    Some(link) => link,
                    None => {
                        input_open = false;
                        continue;
                    }
                },
                Some(link) = retry_rx.recv() => {
                    pending -= 1;
                    link
                }
                else => break,
            };

            log::debug!("[upload] uploading {}", link);
            match self.uploader.upload_link(&link).await {
                Ok(doc) => {
                    self.commit(&link, doc, &mut pdf_tasks).await;
                    summary.committed += 1;
                }
                Err(AppError::Duplicate(_)) => {
                    log::debug!("[upload] duplicate link {}", link);
                    summary.duplicates += 1;
                }
                Err(AppError::AccessDenied(doc)) => {
                    if let Err(e) = self.uploader.api().remove_document(&doc.location).await {
                        log::error!(
                            "[upload] failed to remove denied document '{}': {}",
                            doc.location,
                            e
                        );
                        pdf_tasks.abort_all();
                        return Err(e);
                    }
                    let retries = self.retries.fetch_add(1, Ordering::SeqCst) + 1;
                    summary.retries += 1;
                    log::warn!("[upload] access denied ({}), requeueing {}", retries, link);

                    self.uploader.release(&link);
                    if let Some(pause) = &self.pause {
                        pause.trigger();
                    }

                    pending += 1;
                    self.requeue(link, retry_tx.clone(), cancel.clone());

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff(retries, &self.config)) => {}
                    }
                }
                Err(e) => {
                    log::warn!("[upload] {}", e);
                    summary.failures += 1;
                }
            }
        }

        if cancel.is_cancelled() {
            pdf_tasks.abort_all();
        }
        while let Some(joined) = pdf_tasks.join_next().await {
            match joined {
                Ok(n) => summary.pdf_documents += n,
                Err(e) if e.is_cancelled() => {}
                Err(e) => log::error!("[upload] PDF task panicked: {}", e),
            }
        }

        log::info!(
            "[upload] {} committed, {} duplicates, {} retries, {} failed",
            summary.committed,
            summary.duplicates,
            summary.retries,
            summary.failures
        );
        Ok(summary)
    }

    /// Put a link back on the stream after the requeue delay, unless the
    /// run is cancelled first.
    fn requeue(&self, link: String, tx: mpsc::UnboundedSender<String>, cancel: CancellationToken) {
        let delay = Duration::from_millis(self.config.requeue_delay_ms);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(link);
                }
            }
        });
    }

    async fn commit(&self, link: &str, doc: Document, pdf_tasks: &mut JoinSet<usize>) {
        log::info!("[upload] committed {}", link);
        if let Err(e) = self.queue.enqueue(&doc).await {
            log::warn!("[upload] could not queue {}: {}", link, e);
        }

        let Some(chain) = &self.pdf else {
            return;
        };
        if !doc.references_pdf() {
            return;
        }

        let chain = Arc::clone(chain);
        let queue = Arc::clone(&self.queue);
        let page = link.to_string();
        pdf_tasks.spawn(async move {
            let outcomes = match chain.scan_page(&page).await {
                Ok(outcomes) => outcomes,
                Err(e) => {
                    log::warn!("[pdf] scan of {} failed: {}", page, e);
                    return 0;
                }
            };
            let mut queued = 0;
            for doc in outcomes.iter().filter_map(|o| o.document()) {
                match queue.enqueue(doc).await {
                    Ok(()) => queued += 1,
                    Err(e) => log::warn!("[pdf] could not queue {}: {}", doc.url, e),
                }
            }
            queued
        });
    }
}

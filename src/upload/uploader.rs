//! Resumable chunked transaction upload.
//!
//! `advance()` does one step: post the header if it has not been accepted
//! yet, otherwise run a self-refilling pool of chunk workers until every
//! chunk is acknowledged or the upload fails. Callers loop on `advance()`
//! (or call `upload()`) until `is_complete()`.

use super::progress::ProgressReporter;
use super::session::ChunkSession;
use crate::config::UploadConfig;
use crate::error::UploadError;
use crate::ledger::client::{LedgerClient, RequestError};
use crate::ledger::SignedTransaction;
use parking_lot::Mutex;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Payloads with at most this many chunks travel inline with the header.
pub const MAX_CHUNKS_IN_BODY: usize = 1;

/// Retry fraction subtracted from the base delay is drawn from [0, 0.3).
const MAX_JITTER: f64 = 0.3;

#[derive(Debug, Clone, PartialEq)]
pub struct UploadPolicy {
    pub max_concurrent_chunks: usize,
    pub max_errors: u32,
    pub retry_delay: Duration,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self::from(&UploadConfig::default())
    }
}

impl From<&UploadConfig> for UploadPolicy {
    fn from(config: &UploadConfig) -> Self {
        Self {
            max_concurrent_chunks: config.max_concurrent_chunks.max(1),
            max_errors: config.max_errors,
            retry_delay: config.retry_delay(),
        }
    }
}

impl UploadPolicy {
    fn jittered_delay(&self) -> Duration {
        let jitter: f64 = rand::thread_rng().gen_range(0.0..MAX_JITTER);
        self.retry_delay.mul_f64(1.0 - jitter)
    }
}

/// Fatal codes abort; everything else is worth another attempt.
fn classify(request: &str, err: &RequestError) -> UploadError {
    match err.fatal_code() {
        Some(code) => UploadError::FatalProtocol {
            request: request.to_string(),
            code: code.to_string(),
        },
        None => UploadError::Transient {
            request: request.to_string(),
            reason: err.to_string(),
        },
    }
}

pub struct ChunkUploader {
    transaction: SignedTransaction,
    client: Arc<dyn LedgerClient>,
    policy: UploadPolicy,
    session: Mutex<ChunkSession>,
    progress: ProgressReporter,
}

impl ChunkUploader {
    pub fn new(
        transaction: SignedTransaction,
        client: Arc<dyn LedgerClient>,
        policy: UploadPolicy,
    ) -> Self {
        let session = ChunkSession::new(transaction.chunk_count());
        Self::resume(transaction, client, policy, session)
    }

    /// Continue from an existing session. Acknowledged chunks are not sent
    /// again and errors already recorded stay charged against the budget.
    pub fn resume(
        transaction: SignedTransaction,
        client: Arc<dyn LedgerClient>,
        policy: UploadPolicy,
        session: ChunkSession,
    ) -> Self {
        Self {
            transaction,
            client,
            policy,
            session: Mutex::new(session),
            progress: ProgressReporter::silent(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    pub fn transaction(&self) -> &SignedTransaction {
        &self.transaction
    }

    pub fn is_complete(&self) -> bool {
        self.session.lock().is_complete()
    }

    pub fn pct_complete(&self) -> u8 {
        self.session.lock().pct_complete()
    }

    pub fn acknowledged_count(&self) -> usize {
        self.session.lock().acknowledged_count()
    }

    pub fn total_chunks(&self) -> usize {
        self.session.lock().total()
    }

    /// Errors consumed from the budget so far.
    pub fn error_count(&self) -> u32 {
        self.session.lock().errors()
    }

    pub fn session(&self) -> ChunkSession {
        self.session.lock().clone()
    }

    /// Drive the upload to completion.
    pub async fn upload(&self) -> Result<(), UploadError> {
        while !self.is_complete() {
            self.advance().await?;
        }
        Ok(())
    }

    pub async fn advance(&self) -> Result<(), UploadError> {
        let header_posted = {
            let session = self.session.lock();
            if session.is_complete() {
                return Err(UploadError::AlreadyComplete);
            }
            session.header_posted()
        };

        if !header_posted {
            return self.post_header().await;
        }

        let workers = {
            let mut session = self.session.lock();
            session.rewind();
            let remaining = session.total() - session.acknowledged_count();
            remaining.min(self.policy.max_concurrent_chunks)
        };
        debug!(
            tx_id = %self.transaction.id(),
            workers,
            acknowledged = self.acknowledged_count(),
            total = self.total_chunks(),
            "uploading chunks"
        );

        futures::future::try_join_all((0..workers).map(|_| self.run_worker())).await?;

        if self.is_complete() {
            info!(
                tx_id = %self.transaction.id(),
                chunks = self.total_chunks(),
                errors = self.error_count(),
                "transaction upload complete"
            );
        }
        Ok(())
    }

    async fn post_header(&self) -> Result<(), UploadError> {
        let inline = self.transaction.chunk_count() <= MAX_CHUNKS_IN_BODY;
        let data = inline.then(|| self.transaction.data());
        let header = self.transaction.header();

        self.send_with_retry("transaction header", || {
            self.client.post_transaction(header, data)
        })
        .await?;

        let pct = {
            let mut session = self.session.lock();
            session.mark_header_posted(inline);
            session.pct_complete()
        };
        info!(
            tx_id = %self.transaction.id(),
            inline,
            bytes = self.transaction.data_size(),
            chunks = self.transaction.chunk_count(),
            "transaction header accepted"
        );
        if inline {
            self.progress.report(pct);
        }
        Ok(())
    }

    /// Claim in a separate call so the lock is released before any await.
    fn claim(&self) -> Option<usize> {
        self.session.lock().claim_next()
    }

    async fn run_worker(&self) -> Result<(), UploadError> {
        while let Some(index) = self.claim() {
            let chunk = self
                .transaction
                .chunk(index)
                .ok_or(UploadError::ChunkOutOfRange {
                    index,
                    total: self.transaction.chunk_count(),
                })?;
            let request = format!("chunk {}", index);

            self.send_with_retry(&request, || self.client.post_chunk(&chunk))
                .await?;

            let pct = {
                let mut session = self.session.lock();
                session.acknowledge(index);
                session.pct_complete()
            };
            self.progress.report(pct);
        }
        Ok(())
    }

    async fn send_with_retry<F, Fut>(&self, request: &str, mut send: F) -> Result<(), UploadError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), RequestError>>,
    {
        loop {
            let err = match send().await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            match classify(request, &err) {
                fatal @ UploadError::FatalProtocol { .. } => {
                    error!(tx_id = %self.transaction.id(), error = %fatal, "aborting upload");
                    return Err(fatal);
                }
                transient => {
                    let errors = self.session.lock().record_error();
                    if errors >= self.policy.max_errors {
                        error!(
                            tx_id = %self.transaction.id(),
                            errors,
                            error = %transient,
                            "error budget exhausted"
                        );
                        return Err(UploadError::BudgetExhausted {
                            errors,
                            request: request.to_string(),
                            reason: err.to_string(),
                        });
                    }

                    let delay = self.policy.jittered_delay();
                    warn!(
                        tx_id = %self.transaction.id(),
                        errors,
                        delay_ms = delay.as_millis() as u64,
                        error = %transient,
                        "retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

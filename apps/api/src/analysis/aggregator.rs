//! Result Aggregator: turns the stream of worker results into batched,
//! idempotent upserts.
//!
//! A batch is written when it reaches `batch_size` or when `flush_interval`
//! has passed since the last write, whichever comes first. Failed writes are
//! retried with exponential backoff; once retries are exhausted the batch is
//! reported lost and the run must end as `Failed`.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::analysis::store::{AnalysisStore, StoreError};
use crate::models::analysis::AnalysisResult;

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            flush_interval: Duration::from_secs(2),
            max_attempts: 4,
            base_backoff: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Error)]
#[error("lost {lost} result(s) for job {job_id} after {attempts} write attempts: {source}")]
pub struct FlushError {
    pub job_id: Uuid,
    pub lost: usize,
    pub attempts: u32,
    #[source]
    pub source: StoreError,
}

pub struct ResultAggregator {
    store: Arc<dyn AnalysisStore>,
    job_id: Uuid,
    run_id: Uuid,
    settings: AggregatorSettings,
    buffer: Vec<AnalysisResult>,
    last_flush: Instant,
    committed: usize,
}

impl ResultAggregator {
    pub fn new(
        store: Arc<dyn AnalysisStore>,
        job_id: Uuid,
        run_id: Uuid,
        settings: AggregatorSettings,
    ) -> Self {
        Self {
            store,
            job_id,
            run_id,
            buffer: Vec::with_capacity(settings.batch_size),
            settings,
            last_flush: Instant::now(),
            committed: 0,
        }
    }

    /// Buffers a terminal result, flushing when the batch is full.
    pub async fn push(&mut self, result: AnalysisResult) -> Result<(), FlushError> {
        if !result.status.is_terminal() {
            warn!(
                "Ignoring non-terminal result for applicant {} of job {}",
                result.applicant_id, self.job_id
            );
            return Ok(());
        }
        self.buffer.push(result);
        if self.buffer.len() >= self.settings.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Flushes a partial batch once the flush interval has elapsed.
    pub async fn flush_if_due(&mut self) -> Result<(), FlushError> {
        if !self.buffer.is_empty() && self.last_flush.elapsed() >= self.settings.flush_interval {
            self.flush().await?;
        }
        Ok(())
    }

    /// Writes everything buffered as one upsert.
    pub async fn flush(&mut self) -> Result<(), FlushError> {
        if self.buffer.is_empty() {
            self.last_flush = Instant::now();
            return Ok(());
        }

        let batch = std::mem::take(&mut self.buffer);
        let max_attempts = self.settings.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            match self.store.upsert_results(self.run_id, &batch).await {
                Ok(()) => {
                    self.committed += batch.len();
                    self.last_flush = Instant::now();
                    debug!(
                        "Flushed {} result(s) for job {} ({} committed)",
                        batch.len(),
                        self.job_id,
                        self.committed
                    );
                    return Ok(());
                }
                Err(e) if attempt < max_attempts => {
                    // Exponential backoff: base, 2×base, 4×base, ...
                    let delay = self.settings.base_backoff * (1 << (attempt - 1).min(6));
                    warn!(
                        "Result write attempt {attempt}/{max_attempts} for job {} failed, retrying after {}ms: {e}",
                        self.job_id,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    let lost: Vec<String> =
                        batch.iter().map(|r| r.applicant_id.to_string()).collect();
                    error!(
                        "Lost {} analysis result(s) for job {} run {}: applicants [{}]",
                        batch.len(),
                        self.job_id,
                        self.run_id,
                        lost.join(", ")
                    );
                    return Err(FlushError {
                        job_id: self.job_id,
                        lost: batch.len(),
                        attempts: max_attempts,
                        source: e,
                    });
                }
            }
        }

        unreachable!("flush loop always returns")
    }

    /// Drops everything buffered without writing it. Used once the run may no
    /// longer write for its job. Returns how many results were lost.
    pub fn discard(&mut self) -> usize {
        let batch = std::mem::take(&mut self.buffer);
        if !batch.is_empty() {
            let lost: Vec<String> = batch.iter().map(|r| r.applicant_id.to_string()).collect();
            error!(
                "Discarded {} unwritten analysis result(s) for job {} run {}: applicants [{}]",
                batch.len(),
                self.job_id,
                self.run_id,
                lost.join(", ")
            );
        }
        batch.len()
    }

    /// Results durably written so far.
    pub fn committed(&self) -> usize {
        self.committed
    }

    #[cfg(test)]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

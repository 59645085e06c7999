//! Analysis Worker: runs one applicant through the scoring pipeline.
//!
//! Flow: parsed text → classify → score (LLM) → categorize → justify (LLM).
//!
//! The worker never fails past its own boundary: every invocation returns a
//! terminal `AnalysisResult`. Steps 1–3 failing yield `Unprocessed`; a failed
//! justification still yields `Analyzed` with empty text.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::analysis::classify::{ClassifyError, Classifier, ResumeBuckets};
use crate::analysis::collaborators::{SourceError, TextSource};
use crate::analysis::inference::{Inference, InferenceError};
use crate::analysis::scoring::score_and_categorize;
use crate::models::analysis::{AnalysisResult, Justifications, MetricScores};
use crate::models::posting::JobRequirements;
use crate::sanitize::safe_error_message;

/// Everything a worker needs to know about the run it belongs to.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub job_id: Uuid,
    pub run_id: Uuid,
    pub requirements: Arc<JobRequirements>,
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("missing data: no parsed resume text for applicant")]
    MissingData,

    #[error("could not read applicant data: {0}")]
    Retrieval(#[from] SourceError),

    #[error("classification failed: {0}")]
    Classification(#[from] ClassifyError),

    #[error("scoring failed: {0}")]
    ScoringFailure(InferenceError),

    #[error("scoring call timed out after {0:?}")]
    ScoringTimeout(Duration),
}

impl WorkerError {
    /// Failures a pool-level retry could plausibly fix.
    pub fn is_transient(&self) -> bool {
        match self {
            WorkerError::ScoringFailure(e) => e.is_transient(),
            WorkerError::ScoringTimeout(_) | WorkerError::Retrieval(_) => true,
            WorkerError::MissingData | WorkerError::Classification(_) => false,
        }
    }
}

/// A worker's terminal result plus whether its failure looked transient.
#[derive(Debug, Clone)]
pub struct WorkerOutcome {
    pub result: AnalysisResult,
    pub transient_failure: bool,
}

#[derive(Clone)]
pub struct AnalysisWorker {
    text_source: Arc<dyn TextSource>,
    classifier: Arc<dyn Classifier>,
    inference: Arc<dyn Inference>,
    call_timeout: Duration,
}

impl AnalysisWorker {
    pub fn new(
        text_source: Arc<dyn TextSource>,
        classifier: Arc<dyn Classifier>,
        inference: Arc<dyn Inference>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            text_source,
            classifier,
            inference,
            call_timeout,
        }
    }

    /// Analyzes one applicant. Always returns a terminal result.
    pub async fn analyze(&self, run: &RunContext, applicant_id: Uuid) -> WorkerOutcome {
        let pending = AnalysisResult::pending(run.job_id, run.run_id, applicant_id);

        let (scores, buckets) = match self.score_applicant(&run.requirements, applicant_id).await
        {
            Ok(scored) => scored,
            Err(e) => {
                warn!(
                    "Applicant {applicant_id} for job {} left unprocessed: {e}",
                    run.job_id
                );
                return WorkerOutcome {
                    transient_failure: e.is_transient(),
                    result: pending.into_unprocessed(safe_error_message(&e.to_string())),
                };
            }
        };

        // Step 4: deterministic, cannot fail on validated scores
        let (overall, category) = score_and_categorize(&scores);

        // Step 5: justification loss degrades, never fails the applicant
        let justifications = match tokio::time::timeout(
            self.call_timeout,
            self.inference
                .justify(&scores, overall, category, &buckets),
        )
        .await
        {
            Ok(Ok(justifications)) => justifications,
            Ok(Err(e)) => {
                warn!("Justification failed for applicant {applicant_id}, storing scores only: {e}");
                Justifications::default()
            }
            Err(_) => {
                warn!(
                    "Justification timed out after {:?} for applicant {applicant_id}, storing scores only",
                    self.call_timeout
                );
                Justifications::default()
            }
        };

        debug!("Applicant {applicant_id} scored {overall} ({category:?})");

        WorkerOutcome {
            result: pending.into_analyzed(scores, overall, category, justifications),
            transient_failure: false,
        }
    }

    /// Steps 1–3: retrieval, classification, scoring.
    async fn score_applicant(
        &self,
        requirements: &JobRequirements,
        applicant_id: Uuid,
    ) -> Result<(MetricScores, ResumeBuckets), WorkerError> {
        let parsed_text = self
            .text_source
            .parsed_text(applicant_id)
            .await?
            .filter(|t| !t.trim().is_empty())
            .ok_or(WorkerError::MissingData)?;

        let buckets = self.classifier.classify(&parsed_text).await?;

        let scores = tokio::time::timeout(
            self.call_timeout,
            self.inference.score(&buckets, requirements),
        )
        .await
        .map_err(|_| WorkerError::ScoringTimeout(self.call_timeout))?
        .map_err(WorkerError::ScoringFailure)?;

        Ok((scores, buckets))
    }
}

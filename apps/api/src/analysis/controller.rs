//! Analysis Controller: the entry point the HTTP layer talks to.
//!
//! Validates preconditions, takes the per-job lease, records the run and
//! hands execution to the orchestrator on a background task. Status and
//! result queries read durable storage only.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::collaborators::{JobRepository, SourceError};
use crate::analysis::lease::LeaseError;
use crate::analysis::lock::{CancellationFlags, LockService};
use crate::analysis::orchestrator::{Orchestrator, RunPlan};
use crate::analysis::store::{AnalysisStore, StoreError};
use crate::analysis::worker::RunContext;
use crate::models::analysis::{AnalysisResult, AnalysisRun, JobStatus, ResultStatus};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Job posting {0} not found")]
    NotFound(Uuid),

    #[error("Job posting {0} is still accepting applications")]
    JobStillActive(Uuid),

    #[error("Job posting {0} has no applicants")]
    NoApplicants(Uuid),

    #[error("An analysis run is already in progress for job {0}")]
    AlreadyRunning(Uuid),

    #[error("Analysis storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Job data unavailable: {0}")]
    Source(#[from] SourceError),

    #[error("Lock store error: {0}")]
    Lease(#[from] LeaseError),
}

// ────────────────────────────────────────────────────────────────────────────
// Responses
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct RunAck {
    pub job_id: Uuid,
    pub run_id: Uuid,
    pub status: JobStatus,
    pub total_count: u32,
    pub processed_count: u32,
    /// Applicants dispatched by this run.
    pub queued_count: u32,
}

/// An accepted run. `completion` resolves when the background run finishes;
/// dropping it detaches the run.
#[derive(Debug)]
pub struct StartedRun {
    pub ack: RunAck,
    pub completion: JoinHandle<JobStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub job_id: Uuid,
    pub run_id: Option<Uuid>,
    pub status: JobStatus,
    pub processed_count: u32,
    pub total_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl StatusReport {
    fn from_run(run: AnalysisRun) -> Self {
        Self {
            job_id: run.job_id,
            run_id: Some(run.run_id),
            status: run.status,
            processed_count: run.processed_count,
            total_count: run.total_count,
            started_at: run.started_at,
            completed_at: run.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResultsReport {
    pub job_id: Uuid,
    pub total: usize,
    pub analyzed: usize,
    pub unprocessed: usize,
    pub results: Vec<AnalysisResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelAck {
    pub job_id: Uuid,
    pub status: JobStatus,
    /// False when there was no running analysis to cancel.
    pub cancel_requested: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartMode {
    /// Skip applicants that already have a terminal result.
    Resume,
    /// Discard all prior results first.
    Fresh,
}

// ────────────────────────────────────────────────────────────────────────────
// Controller
// ────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AnalysisController {
    jobs: Arc<dyn JobRepository>,
    store: Arc<dyn AnalysisStore>,
    locks: LockService,
    cancellation: CancellationFlags,
    orchestrator: Orchestrator,
}

impl AnalysisController {
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        store: Arc<dyn AnalysisStore>,
        locks: LockService,
        cancellation: CancellationFlags,
        orchestrator: Orchestrator,
    ) -> Self {
        Self {
            jobs,
            store,
            locks,
            cancellation,
            orchestrator,
        }
    }

    /// Starts analysis for every applicant without a terminal result.
    pub async fn initiate(&self, job_id: Uuid) -> Result<StartedRun, AnalysisError> {
        self.start(job_id, StartMode::Resume).await
    }

    /// Discards prior results and analyzes every applicant again.
    pub async fn rerun(&self, job_id: Uuid) -> Result<StartedRun, AnalysisError> {
        self.start(job_id, StartMode::Fresh).await
    }

    async fn start(&self, job_id: Uuid, mode: StartMode) -> Result<StartedRun, AnalysisError> {
        let requirements = self
            .jobs
            .get_requirements(job_id)
            .await?
            .ok_or(AnalysisError::NotFound(job_id))?;
        if !requirements.is_eligible_for_analysis {
            return Err(AnalysisError::JobStillActive(job_id));
        }

        let applicants = self.jobs.list_applicants(job_id).await?;
        if applicants.is_empty() {
            return Err(AnalysisError::NoApplicants(job_id));
        }

        let lease = self
            .locks
            .try_acquire(job_id, self.orchestrator.settings().lock_ttl)
            .await
            .ok_or(AnalysisError::AlreadyRunning(job_id))?;

        // From here on the lease must be released on every error path.
        let (run, queued) = match self.prepare_run(job_id, mode, &applicants).await {
            Ok(prepared) => prepared,
            Err(e) => {
                self.locks.release(lease).await;
                return Err(e);
            }
        };

        let ack = RunAck {
            job_id,
            run_id: run.run_id,
            status: run.status,
            total_count: run.total_count,
            processed_count: run.processed_count,
            queued_count: queued.len() as u32,
        };
        info!(
            "Accepted analysis run {} for job {job_id} ({} queued of {})",
            run.run_id, ack.queued_count, ack.total_count
        );

        let plan = RunPlan {
            run: RunContext {
                job_id,
                run_id: run.run_id,
                requirements: Arc::new(requirements),
            },
            lease,
            applicants: queued,
            already_processed: run.processed_count,
        };
        let orchestrator = self.orchestrator.clone();
        let completion = tokio::spawn(async move { orchestrator.run(plan).await });

        Ok(StartedRun { ack, completion })
    }

    /// Clears stale state and inserts the run row. Returns the run and the
    /// applicants it must still process.
    async fn prepare_run(
        &self,
        job_id: Uuid,
        mode: StartMode,
        applicants: &[Uuid],
    ) -> Result<(AnalysisRun, Vec<Uuid>), AnalysisError> {
        // A flag left over from an earlier run must not cancel this one.
        if let Err(e) = self.cancellation.clear(job_id).await {
            warn!("Could not clear stale cancellation flag for job {job_id}: {e}");
        }

        if mode == StartMode::Fresh {
            self.store.clear_results(job_id).await?;
        }

        let done = self.store.terminal_applicants(job_id).await?;
        let queued: Vec<Uuid> = applicants
            .iter()
            .copied()
            .filter(|a| !done.contains(a))
            .collect();
        let processed = (applicants.len() - queued.len()) as u32;

        let run = self
            .store
            .create_run(job_id, applicants.len() as u32, processed)
            .await?;
        Ok((run, queued))
    }

    /// Status of the most recent run. A posting that was never analyzed
    /// reports `NotStarted`.
    pub async fn status(&self, job_id: Uuid) -> Result<StatusReport, AnalysisError> {
        if let Some(run) = self.store.latest_run(job_id).await? {
            return Ok(StatusReport::from_run(run));
        }

        self.jobs
            .get_requirements(job_id)
            .await?
            .ok_or(AnalysisError::NotFound(job_id))?;
        let total = self.jobs.list_applicants(job_id).await?.len() as u32;

        Ok(StatusReport {
            job_id,
            run_id: None,
            status: JobStatus::NotStarted,
            processed_count: 0,
            total_count: total,
            started_at: None,
            completed_at: None,
        })
    }

    pub async fn results(&self, job_id: Uuid) -> Result<ResultsReport, AnalysisError> {
        let results = self.store.list_results(job_id).await?;
        if results.is_empty() && self.jobs.get_requirements(job_id).await?.is_none() {
            return Err(AnalysisError::NotFound(job_id));
        }

        let count = |status: ResultStatus| results.iter().filter(|r| r.status == status).count();
        Ok(ResultsReport {
            job_id,
            total: results.len(),
            analyzed: count(ResultStatus::Analyzed),
            unprocessed: count(ResultStatus::Unprocessed),
            results,
        })
    }

    /// Requests cooperative cancellation of the running analysis. Idempotent;
    /// a run that already finished is left untouched.
    pub async fn cancel(&self, job_id: Uuid) -> Result<CancelAck, AnalysisError> {
        let Some(run) = self.store.latest_run(job_id).await? else {
            self.jobs
                .get_requirements(job_id)
                .await?
                .ok_or(AnalysisError::NotFound(job_id))?;
            return Ok(CancelAck {
                job_id,
                status: JobStatus::NotStarted,
                cancel_requested: false,
            });
        };

        if run.status.is_terminal() {
            info!(
                "Cancel for job {job_id} ignored: latest run is {}",
                run.status.as_str()
            );
            return Ok(CancelAck {
                job_id,
                status: run.status,
                cancel_requested: false,
            });
        }

        self.cancellation.request(job_id).await?;
        info!("Cancellation requested for analysis run {} of job {job_id}", run.run_id);
        Ok(CancelAck {
            job_id,
            status: run.status,
            cancel_requested: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::analysis::aggregator::AggregatorSettings;
    use crate::analysis::classify::HeadingClassifier;
    use crate::analysis::orchestrator::OrchestratorSettings;
    use crate::analysis::testing::{
        MemoryAnalysisStore, MemoryCollaborators, MemoryLeaseStore, RecordingNotifier,
        ScriptedInference,
    };
    use crate::analysis::worker::AnalysisWorker;
    use crate::models::analysis::Category;

    struct Harness {
        leases: Arc<MemoryLeaseStore>,
        store: Arc<MemoryAnalysisStore>,
        collaborators: Arc<MemoryCollaborators>,
        inference: Arc<ScriptedInference>,
        notifier: Arc<RecordingNotifier>,
        controller: AnalysisController,
    }

    fn harness() -> Harness {
        let leases = Arc::new(MemoryLeaseStore::default());
        let store = Arc::new(MemoryAnalysisStore::default());
        let collaborators = Arc::new(MemoryCollaborators::default());
        let inference = Arc::new(ScriptedInference::uniform(80, 70, 60));
        let notifier = Arc::new(RecordingNotifier::default());

        let locks = LockService::new(leases.clone());
        let cancellation = CancellationFlags::new(leases.clone(), Duration::from_secs(60));
        let worker = AnalysisWorker::new(
            collaborators.clone(),
            Arc::new(HeadingClassifier),
            inference.clone(),
            Duration::from_millis(200),
        );
        let settings = OrchestratorSettings {
            pool_size: 2,
            lock_ttl: Duration::from_secs(5),
            renew_interval: Duration::from_millis(50),
            cancel_poll_interval: Duration::from_millis(5),
            transient_retries: 0,
            aggregator: AggregatorSettings {
                batch_size: 2,
                flush_interval: Duration::from_millis(20),
                max_attempts: 2,
                base_backoff: Duration::from_millis(1),
            },
        };
        let orchestrator = Orchestrator::new(
            worker,
            store.clone(),
            locks.clone(),
            cancellation.clone(),
            notifier.clone(),
            settings,
        );
        let controller = AnalysisController::new(
            collaborators.clone(),
            store.clone(),
            locks,
            cancellation,
            orchestrator,
        );

        Harness {
            leases,
            store,
            collaborators,
            inference,
            notifier,
            controller,
        }
    }

    impl Harness {
        async fn take_lease(&self, job_id: Uuid) -> Option<crate::analysis::lock::Lease> {
            LockService::new(self.leases.clone())
                .try_acquire(job_id, Duration::from_secs(5))
                .await
        }

        fn closed_job(&self, applicants: usize) -> (Uuid, Vec<Uuid>) {
            let job_id = Uuid::new_v4();
            self.collaborators.add_job(job_id, true);
            let ids = (0..applicants)
                .map(|i| {
                    self.collaborators
                        .add_applicant(job_id, Some(&format!("Skills\nRust {i}")))
                })
                .collect();
            (job_id, ids)
        }
    }

    #[tokio::test]
    async fn test_initiate_runs_to_completion() {
        let h = harness();
        let (job_id, _) = h.closed_job(3);

        let started = h.controller.initiate(job_id).await.unwrap();
        assert_eq!(started.ack.status, JobStatus::Running);
        assert_eq!(started.ack.total_count, 3);
        assert_eq!(started.ack.queued_count, 3);
        assert_eq!(started.completion.await.unwrap(), JobStatus::Completed);

        let status = h.controller.status(job_id).await.unwrap();
        assert_eq!(status.status, JobStatus::Completed);
        assert_eq!(status.processed_count, 3);
        assert_eq!(status.total_count, 3);

        let results = h.controller.results(job_id).await.unwrap();
        assert_eq!(results.total, 3);
        assert_eq!(results.analyzed, 3);
        assert_eq!(results.unprocessed, 0);
        for result in &results.results {
            assert_eq!(result.overall_score, Some(73));
            assert_eq!(result.category, Category::GoodMatch);
        }
        assert_eq!(h.notifier.calls(), vec![(job_id, JobStatus::Completed, 3)]);
    }

    #[tokio::test]
    async fn test_concurrent_initiates_admit_exactly_one_run() {
        let h = harness();
        h.inference.set_latency(Duration::from_millis(20));
        let (job_id, _) = h.closed_job(4);

        let (first, second) = tokio::join!(
            h.controller.initiate(job_id),
            h.controller.initiate(job_id)
        );

        let (ok, err) = match (first, second) {
            (Ok(ok), Err(err)) | (Err(err), Ok(ok)) => (ok, err),
            other => panic!("expected exactly one run to start, got {other:?}"),
        };
        assert!(matches!(err, AnalysisError::AlreadyRunning(id) if id == job_id));
        ok.completion.await.unwrap();

        assert_eq!(h.store.runs_for(job_id).len(), 1);
        assert_eq!(h.notifier.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_initiate_while_running_is_rejected() {
        let h = harness();
        let (job_id, _) = h.closed_job(1);
        let held = h.take_lease(job_id).await.unwrap();

        let err = h.controller.initiate(job_id).await.unwrap_err();
        assert!(matches!(err, AnalysisError::AlreadyRunning(_)));
        assert!(h.store.runs_for(job_id).is_empty());
        drop(held);
    }

    #[tokio::test]
    async fn test_unreachable_lock_store_rejects_initiate() {
        let h = harness();
        let (job_id, _) = h.closed_job(1);
        h.leases.set_available(false);

        let err = h.controller.initiate(job_id).await.unwrap_err();
        assert!(matches!(err, AnalysisError::AlreadyRunning(_)));
    }

    #[tokio::test]
    async fn test_preconditions_are_checked_before_locking() {
        let h = harness();

        let missing = Uuid::new_v4();
        assert!(matches!(
            h.controller.initiate(missing).await.unwrap_err(),
            AnalysisError::NotFound(_)
        ));

        let active = Uuid::new_v4();
        h.collaborators.add_job(active, false);
        h.collaborators.add_applicant(active, Some("Skills\nRust"));
        assert!(matches!(
            h.controller.initiate(active).await.unwrap_err(),
            AnalysisError::JobStillActive(_)
        ));

        let (empty, _) = h.closed_job(0);
        assert!(matches!(
            h.controller.initiate(empty).await.unwrap_err(),
            AnalysisError::NoApplicants(_)
        ));

        // no lease was left behind
        assert!(h.take_lease(active).await.is_some());
        assert!(h.take_lease(empty).await.is_some());
    }

    #[tokio::test]
    async fn test_initiate_resumes_without_redoing_terminal_results() {
        let h = harness();
        let (job_id, applicants) = h.closed_job(4);
        h.controller
            .initiate(job_id)
            .await
            .unwrap()
            .completion
            .await
            .unwrap();
        let calls_after_first = h.inference.score_calls();

        let extra = h
            .collaborators
            .add_applicant(job_id, Some("Skills\nGo and Rust"));
        let started = h.controller.initiate(job_id).await.unwrap();
        assert_eq!(started.ack.total_count, 5);
        assert_eq!(started.ack.processed_count, 4);
        assert_eq!(started.ack.queued_count, 1);
        started.completion.await.unwrap();

        assert_eq!(h.inference.score_calls(), calls_after_first + 1);
        let results = h.controller.results(job_id).await.unwrap();
        assert_eq!(results.total, applicants.len() + 1);
        assert!(results.results.iter().any(|r| r.applicant_id == extra));
        assert_eq!(
            h.controller.status(job_id).await.unwrap().processed_count,
            5
        );
    }

    #[tokio::test]
    async fn test_rerun_discards_previous_results() {
        let h = harness();
        let (job_id, _) = h.closed_job(3);
        h.controller
            .initiate(job_id)
            .await
            .unwrap()
            .completion
            .await
            .unwrap();

        let started = h.controller.rerun(job_id).await.unwrap();
        assert_eq!(started.ack.processed_count, 0);
        assert_eq!(started.ack.queued_count, 3);
        started.completion.await.unwrap();

        assert_eq!(h.inference.score_calls(), 6);
        assert_eq!(h.store.result_count(job_id), 3);
        let runs = h.store.runs_for(job_id);
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.status == JobStatus::Completed));
    }

    #[tokio::test]
    async fn test_status_of_unstarted_and_unknown_jobs() {
        let h = harness();
        let (job_id, _) = h.closed_job(3);

        let status = h.controller.status(job_id).await.unwrap();
        assert_eq!(status.status, JobStatus::NotStarted);
        assert_eq!(status.total_count, 3);
        assert_eq!(status.processed_count, 0);
        assert!(status.run_id.is_none());

        assert!(matches!(
            h.controller.status(Uuid::new_v4()).await.unwrap_err(),
            AnalysisError::NotFound(_)
        ));
        assert!(matches!(
            h.controller.results(Uuid::new_v4()).await.unwrap_err(),
            AnalysisError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_cancel_running_analysis_is_idempotent() {
        let h = harness();
        h.inference.set_latency(Duration::from_millis(30));
        let (job_id, _) = h.closed_job(20);

        let started = h.controller.initiate(job_id).await.unwrap();
        let first = h.controller.cancel(job_id).await.unwrap();
        let second = h.controller.cancel(job_id).await.unwrap();
        assert!(first.cancel_requested);
        assert!(second.cancel_requested);

        assert_eq!(started.completion.await.unwrap(), JobStatus::Cancelled);
        let status = h.controller.status(job_id).await.unwrap();
        assert_eq!(status.status, JobStatus::Cancelled);
        assert!(status.processed_count < 20);
        assert_eq!(status.processed_count as usize, h.store.result_count(job_id));
        assert_eq!(h.notifier.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_after_completion_is_a_no_op() {
        let h = harness();
        let (job_id, _) = h.closed_job(2);
        h.controller
            .initiate(job_id)
            .await
            .unwrap()
            .completion
            .await
            .unwrap();

        let ack = h.controller.cancel(job_id).await.unwrap();
        assert!(!ack.cancel_requested);
        assert_eq!(ack.status, JobStatus::Completed);
        assert_eq!(
            h.controller.status(job_id).await.unwrap().status,
            JobStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_cancel_before_any_run_is_a_no_op() {
        let h = harness();
        let (job_id, _) = h.closed_job(2);

        let ack = h.controller.cancel(job_id).await.unwrap();
        assert!(!ack.cancel_requested);
        assert_eq!(ack.status, JobStatus::NotStarted);

        assert!(matches!(
            h.controller.cancel(Uuid::new_v4()).await.unwrap_err(),
            AnalysisError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_stale_cancel_flag_does_not_abort_a_new_run() {
        let h = harness();
        let (job_id, _) = h.closed_job(3);
        h.leases.put(
            &crate::analysis::lock::cancel_key(job_id),
            "1",
            Duration::from_secs(60),
        );

        let started = h.controller.initiate(job_id).await.unwrap();
        assert_eq!(started.completion.await.unwrap(), JobStatus::Completed);
        assert_eq!(h.store.result_count(job_id), 3);
    }

    #[tokio::test]
    async fn test_new_run_repairs_orphaned_running_row() {
        let h = harness();
        let (job_id, _) = h.closed_job(1);
        // a run row left behind by a crashed process
        let orphan = h.store.create_run(job_id, 1, 0).await.unwrap();

        h.controller
            .initiate(job_id)
            .await
            .unwrap()
            .completion
            .await
            .unwrap();

        let runs = h.store.runs_for(job_id);
        let repaired = runs.iter().find(|r| r.run_id == orphan.run_id).unwrap();
        assert_eq!(repaired.status, JobStatus::Failed);
    }
}

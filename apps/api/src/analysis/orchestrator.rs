//! Batch Orchestrator: drives one analysis run from dispatch to terminal
//! status.
//!
//! Applicants are fed to a bounded pool of workers. Between completions the
//! orchestrator polls the cancellation flag, renews the job lease and flushes
//! the aggregator on its timer. Cancellation is cooperative: nothing new is
//! dispatched, in-flight workers are allowed to finish and their results are
//! kept. Losing the lease or exhausting result writes fails the run.
//!
//! Every run ends the same way: final flush, terminal status, lease release,
//! one notification.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::analysis::aggregator::{AggregatorSettings, ResultAggregator};
use crate::analysis::collaborators::Notifier;
use crate::analysis::lock::{CancellationFlags, Lease, LockService};
use crate::analysis::store::AnalysisStore;
use crate::analysis::worker::{AnalysisWorker, RunContext, WorkerOutcome};
use crate::models::analysis::{AnalysisResult, JobStatus};
use crate::sanitize::safe_error_message;

/// Upper bound on concurrent workers regardless of core count.
pub const MAX_POOL_SIZE: usize = 32;

/// `min(32, 2 × cores)`.
pub fn default_pool_size() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    (2 * cores).min(MAX_POOL_SIZE)
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub pool_size: usize,
    pub lock_ttl: Duration,
    pub renew_interval: Duration,
    pub cancel_poll_interval: Duration,
    /// Extra attempts for an applicant whose failure looked transient.
    pub transient_retries: u32,
    pub aggregator: AggregatorSettings,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            lock_ttl: Duration::from_secs(300),
            renew_interval: Duration::from_secs(60),
            cancel_poll_interval: Duration::from_secs(1),
            transient_retries: 0,
            aggregator: AggregatorSettings::default(),
        }
    }
}

/// A run that has its lease and its `analysis_jobs` row, ready to execute.
#[derive(Debug)]
pub struct RunPlan {
    pub run: RunContext,
    pub lease: Lease,
    /// Applicants still without a terminal result.
    pub applicants: Vec<Uuid>,
    /// Terminal results that already existed when the run started.
    pub already_processed: u32,
}

#[derive(Clone)]
pub struct Orchestrator {
    worker: AnalysisWorker,
    store: Arc<dyn AnalysisStore>,
    locks: LockService,
    cancellation: CancellationFlags,
    notifier: Arc<dyn Notifier>,
    settings: OrchestratorSettings,
}

/// Why dispatching stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halt {
    Cancelled,
    LeaseLost,
    StorageLost,
}

/// False once the run may no longer write results for its job.
fn may_persist(halt: Option<Halt>) -> bool {
    !matches!(halt, Some(Halt::LeaseLost | Halt::StorageLost))
}

/// An applicant waiting for a worker. `fallback` holds the result of a
/// transiently failed earlier attempt and is recorded if the retry never runs.
struct Queued {
    applicant_id: Uuid,
    attempt: u32,
    fallback: Option<AnalysisResult>,
}

impl Orchestrator {
    pub fn new(
        worker: AnalysisWorker,
        store: Arc<dyn AnalysisStore>,
        locks: LockService,
        cancellation: CancellationFlags,
        notifier: Arc<dyn Notifier>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            worker,
            store,
            locks,
            cancellation,
            notifier,
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Executes the plan to a terminal status. Never returns `Running`.
    pub async fn run(&self, plan: RunPlan) -> JobStatus {
        let RunPlan {
            run,
            lease,
            applicants,
            already_processed,
        } = plan;

        info!(
            "Analysis run {} for job {} started: {} applicant(s) queued, {} already processed",
            run.run_id,
            run.job_id,
            applicants.len(),
            already_processed
        );

        let (status, committed) = if applicants.is_empty() {
            (JobStatus::Completed, 0)
        } else {
            self.dispatch(&run, &lease, applicants).await
        };

        self.finalize(&run, lease, status, already_processed + committed as u32)
            .await;
        status
    }

    /// Feeds the worker pool until the queue is empty or a halt is observed,
    /// then drains in-flight workers. Returns the terminal status and the
    /// number of results committed by this run.
    async fn dispatch(
        &self,
        run: &RunContext,
        lease: &Lease,
        applicants: Vec<Uuid>,
    ) -> (JobStatus, usize) {
        let job_id = run.job_id;
        let pool_size = self.settings.pool_size.max(1);

        let mut aggregator = ResultAggregator::new(
            self.store.clone(),
            job_id,
            run.run_id,
            self.settings.aggregator.clone(),
        );
        let mut queue: VecDeque<Queued> = applicants
            .into_iter()
            .map(|applicant_id| Queued {
                applicant_id,
                attempt: 0,
                fallback: None,
            })
            .collect();
        let mut in_flight: JoinSet<(Uuid, u32, WorkerOutcome)> = JoinSet::new();
        let mut halt: Option<Halt> = None;

        let mut renew = interval(self.settings.renew_interval);
        let mut poll = interval(self.settings.cancel_poll_interval);
        let mut flush = interval(self.settings.aggregator.flush_interval);
        for timer in [&mut renew, &mut poll, &mut flush] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            timer.reset();
        }

        loop {
            if halt.is_none() && !queue.is_empty() && in_flight.len() < pool_size {
                if self.cancellation.is_requested(job_id).await {
                    info!(
                        "Cancellation requested for job {job_id}; {} applicant(s) will not be dispatched",
                        queue.len()
                    );
                    halt = Some(Halt::Cancelled);
                } else {
                    while in_flight.len() < pool_size {
                        let Some(next) = queue.pop_front() else {
                            break;
                        };
                        self.spawn_worker(&mut in_flight, run, next.applicant_id, next.attempt);
                    }
                }
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                joined = in_flight.join_next() => {
                    let (applicant_id, attempt, outcome) = match joined {
                        Some(Ok(done)) => done,
                        Some(Err(e)) => {
                            error!("Worker task for job {job_id} was lost: {e}");
                            continue;
                        }
                        None => continue,
                    };

                    if outcome.transient_failure
                        && attempt < self.settings.transient_retries
                        && halt.is_none()
                    {
                        debug!(
                            "Requeueing applicant {applicant_id} after transient failure (attempt {})",
                            attempt + 1
                        );
                        queue.push_back(Queued {
                            applicant_id,
                            attempt: attempt + 1,
                            fallback: Some(outcome.result),
                        });
                        continue;
                    }

                    self.record(&mut aggregator, &mut halt, run, outcome.result).await;
                }
                _ = poll.tick(), if halt.is_none() && !queue.is_empty() => {
                    if self.cancellation.is_requested(job_id).await {
                        info!("Cancellation requested for job {job_id}; draining in-flight workers");
                        halt = Some(Halt::Cancelled);
                    }
                }
                _ = renew.tick(), if halt != Some(Halt::LeaseLost) => {
                    if !self.locks.renew(lease, self.settings.lock_ttl).await {
                        error!("Lost analysis lease for job {job_id}; stopping dispatch and result writes");
                        if halt != Some(Halt::StorageLost) {
                            halt = Some(Halt::LeaseLost);
                            aggregator.discard();
                        }
                    }
                }
                _ = flush.tick(), if may_persist(halt) => {
                    if let Err(e) = aggregator.flush_if_due().await {
                        error!("Analysis run {} for job {job_id} cannot persist results: {e}", run.run_id);
                        halt = Some(Halt::StorageLost);
                    }
                }
            }
        }

        // Retries that never ran keep the result of their last attempt.
        for pending in queue {
            if let Some(result) = pending.fallback {
                self.record(&mut aggregator, &mut halt, run, result).await;
            }
        }

        if may_persist(halt) {
            if let Err(e) = aggregator.flush().await {
                error!("Final flush for job {job_id} failed: {e}");
                halt = Some(Halt::StorageLost);
            }
        }

        let status = match halt {
            None => JobStatus::Completed,
            Some(Halt::Cancelled) => JobStatus::Cancelled,
            Some(Halt::LeaseLost) | Some(Halt::StorageLost) => JobStatus::Failed,
        };
        (status, aggregator.committed())
    }

    /// Hands a terminal result to the aggregator unless the run has lost the
    /// right to write.
    async fn record(
        &self,
        aggregator: &mut ResultAggregator,
        halt: &mut Option<Halt>,
        run: &RunContext,
        result: AnalysisResult,
    ) {
        if !may_persist(*halt) {
            warn!(
                "Dropping result for applicant {} of job {}: run can no longer write results",
                result.applicant_id, run.job_id
            );
            return;
        }
        if let Err(e) = aggregator.push(result).await {
            error!(
                "Analysis run {} for job {} cannot persist results: {e}",
                run.run_id, run.job_id
            );
            *halt = Some(Halt::StorageLost);
        }
    }

    fn spawn_worker(
        &self,
        in_flight: &mut JoinSet<(Uuid, u32, WorkerOutcome)>,
        run: &RunContext,
        applicant_id: Uuid,
        attempt: u32,
    ) {
        let worker = self.worker.clone();
        let run = run.clone();
        in_flight.spawn(async move {
            let (job_id, run_id) = (run.job_id, run.run_id);
            // Inner task so a panicking worker still yields a terminal result.
            let outcome =
                match tokio::spawn(async move { worker.analyze(&run, applicant_id).await }).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        error!("Worker for applicant {applicant_id} aborted: {e}");
                        WorkerOutcome {
                            result: AnalysisResult::pending(job_id, run_id, applicant_id)
                                .into_unprocessed(safe_error_message(&format!(
                                    "worker aborted: {e}"
                                ))),
                            transient_failure: false,
                        }
                    }
                };
            (applicant_id, attempt, outcome)
        });
    }

    async fn finalize(&self, run: &RunContext, lease: Lease, status: JobStatus, processed: u32) {
        if let Err(e) = self.store.finish_run(run.run_id, status).await {
            error!(
                "Could not record terminal status {} for run {}: {e}",
                status.as_str(),
                run.run_id
            );
        }

        self.locks.release(lease).await;

        info!(
            "Analysis run {} for job {} finished: {} ({processed} processed)",
            run.run_id,
            run.job_id,
            status.as_str()
        );
        self.notifier
            .notify_batch_complete(run.job_id, status, processed)
            .await;
    }
}

//! In-memory stand-ins for Redis, Postgres and the inference service, used by
//! the analysis tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::analysis::classify::ResumeBuckets;
use crate::analysis::collaborators::{JobRepository, Notifier, SourceError, TextSource};
use crate::analysis::inference::{Inference, InferenceError};
use crate::analysis::lease::{LeaseError, LeaseStore};
use crate::analysis::store::{AnalysisStore, StoreError};
use crate::llm_client::LlmError;
use crate::models::analysis::{
    AnalysisResult, AnalysisRun, Category, JobStatus, Justifications, MetricScores,
};
use crate::models::posting::JobRequirements;

pub fn requirements(job_id: Uuid, eligible: bool) -> JobRequirements {
    JobRequirements {
        job_id,
        title: "Backend Engineer".to_string(),
        skills: vec!["Rust".to_string(), "PostgreSQL".to_string()],
        experience: "3+ years".to_string(),
        level: "mid".to_string(),
        description: "Build and run backend services".to_string(),
        is_eligible_for_analysis: eligible,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Lease store
// ────────────────────────────────────────────────────────────────────────────

pub struct MemoryLeaseStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    available: AtomicBool,
}

impl Default for MemoryLeaseStore {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryLeaseStore {
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Synchronous set, for hooks that run inside fake inference calls.
    pub fn put(&self, key: &str, value: &str, ttl: Duration) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
    }

    fn check(&self) -> Result<(), LeaseError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(LeaseError::Redis(redis::RedisError::from((
                redis::ErrorKind::IoError,
                "memory store offline",
            ))))
        }
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((_, expires)) if *expires <= Instant::now() => {
                entries.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LeaseError> {
        self.check()?;
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        if let Some((_, expires)) = entries.get(key) {
            if *expires > now {
                return Ok(false);
            }
        }
        entries.insert(key.to_string(), (value.to_string(), now + ttl));
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, value: &str) -> Result<bool, LeaseError> {
        self.check()?;
        if self.live_value(key).as_deref() == Some(value) {
            self.entries.lock().unwrap().remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn compare_and_expire(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, LeaseError> {
        self.check()?;
        if self.live_value(key).as_deref() == Some(value) {
            self.put(key, value, ttl);
            return Ok(true);
        }
        Ok(false)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), LeaseError> {
        self.check()?;
        self.put(key, value, ttl);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, LeaseError> {
        self.check()?;
        Ok(self.live_value(key).is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), LeaseError> {
        self.check()?;
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Analysis store
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryAnalysisStore {
    runs: Mutex<Vec<AnalysisRun>>,
    results: Mutex<HashMap<(Uuid, Uuid), AnalysisResult>>,
    failing_writes: AtomicU32,
    upserts: AtomicUsize,
}

impl MemoryAnalysisStore {
    /// The next `n` upserts fail.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    pub fn upsert_calls(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn result_count(&self, job_id: Uuid) -> usize {
        self.results
            .lock()
            .unwrap()
            .keys()
            .filter(|(job, _)| *job == job_id)
            .count()
    }

    pub fn runs_for(&self, job_id: Uuid) -> Vec<AnalysisRun> {
        self.runs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AnalysisStore for MemoryAnalysisStore {
    async fn create_run(
        &self,
        job_id: Uuid,
        total_count: u32,
        processed_count: u32,
    ) -> Result<AnalysisRun, StoreError> {
        let mut runs = self.runs.lock().unwrap();
        for run in runs
            .iter_mut()
            .filter(|r| r.job_id == job_id && r.status == JobStatus::Running)
        {
            run.status = JobStatus::Failed;
            run.completed_at = Some(Utc::now());
        }
        let run = AnalysisRun {
            run_id: Uuid::new_v4(),
            job_id,
            status: JobStatus::Running,
            total_count,
            processed_count,
            started_at: Some(Utc::now()),
            completed_at: None,
        };
        runs.push(run.clone());
        Ok(run)
    }

    async fn latest_run(&self, job_id: Uuid) -> Result<Option<AnalysisRun>, StoreError> {
        Ok(self
            .runs
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.job_id == job_id)
            .cloned())
    }

    async fn finish_run(&self, run_id: Uuid, status: JobStatus) -> Result<(), StoreError> {
        if let Some(run) = self
            .runs
            .lock()
            .unwrap()
            .iter_mut()
            .find(|r| r.run_id == run_id)
        {
            run.status = status;
            run.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn upsert_results(
        &self,
        run_id: Uuid,
        results: &[AnalysisResult],
    ) -> Result<(), StoreError> {
        self.upserts.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_writes.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_writes.store(failing - 1, Ordering::SeqCst);
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }

        let Some(job_id) = results.first().map(|r| r.job_id) else {
            return Ok(());
        };
        let processed = {
            let mut stored = self.results.lock().unwrap();
            for result in results {
                stored.insert((result.job_id, result.applicant_id), result.clone());
            }
            stored
                .values()
                .filter(|r| r.job_id == job_id && r.status.is_terminal())
                .count() as u32
        };
        if let Some(run) = self
            .runs
            .lock()
            .unwrap()
            .iter_mut()
            .find(|r| r.run_id == run_id)
        {
            run.processed_count = processed;
        }
        Ok(())
    }

    async fn clear_results(&self, job_id: Uuid) -> Result<u64, StoreError> {
        let mut stored = self.results.lock().unwrap();
        let before = stored.len();
        stored.retain(|(job, _), _| *job != job_id);
        Ok((before - stored.len()) as u64)
    }

    async fn list_results(&self, job_id: Uuid) -> Result<Vec<AnalysisResult>, StoreError> {
        Ok(self
            .results
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect())
    }

    async fn terminal_applicants(&self, job_id: Uuid) -> Result<HashSet<Uuid>, StoreError> {
        Ok(self
            .results
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.job_id == job_id && r.status.is_terminal())
            .map(|r| r.applicant_id)
            .collect())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Collaborators
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct MemoryCollaborators {
    postings: Mutex<HashMap<Uuid, JobRequirements>>,
    applicants: Mutex<Vec<(Uuid, Uuid, Option<String>)>>,
}

impl MemoryCollaborators {
    pub fn add_job(&self, job_id: Uuid, eligible: bool) {
        self.postings
            .lock()
            .unwrap()
            .insert(job_id, requirements(job_id, eligible));
    }

    /// Non-blank text gets a `ref <applicant_id>` line appended so scripted
    /// inference can tell applicants apart.
    pub fn add_applicant(&self, job_id: Uuid, text: Option<&str>) -> Uuid {
        let applicant_id = Uuid::new_v4();
        let text = text.map(|t| {
            if t.trim().is_empty() {
                t.to_string()
            } else {
                format!("{t}\nref {applicant_id}")
            }
        });
        self.applicants
            .lock()
            .unwrap()
            .push((job_id, applicant_id, text));
        applicant_id
    }
}

#[async_trait]
impl JobRepository for MemoryCollaborators {
    async fn get_requirements(
        &self,
        job_id: Uuid,
    ) -> Result<Option<JobRequirements>, SourceError> {
        Ok(self.postings.lock().unwrap().get(&job_id).cloned())
    }

    async fn list_applicants(&self, job_id: Uuid) -> Result<Vec<Uuid>, SourceError> {
        Ok(self
            .applicants
            .lock()
            .unwrap()
            .iter()
            .filter(|(job, _, _)| *job == job_id)
            .map(|(_, applicant, _)| *applicant)
            .collect())
    }
}

#[async_trait]
impl TextSource for MemoryCollaborators {
    async fn parsed_text(&self, applicant_id: Uuid) -> Result<Option<String>, SourceError> {
        Ok(self
            .applicants
            .lock()
            .unwrap()
            .iter()
            .find(|(_, applicant, _)| *applicant == applicant_id)
            .and_then(|(_, _, text)| text.clone()))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    calls: Mutex<Vec<(Uuid, JobStatus, u32)>>,
}

impl RecordingNotifier {
    pub fn calls(&self) -> Vec<(Uuid, JobStatus, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_batch_complete(&self, job_id: Uuid, status: JobStatus, processed_count: u32) {
        self.calls
            .lock()
            .unwrap()
            .push((job_id, status, processed_count));
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Inference
// ────────────────────────────────────────────────────────────────────────────

/// One scripted response to a scoring call.
#[derive(Debug, Clone)]
pub enum ScriptedScore {
    Malformed,
    /// Non-transient upstream error with this message.
    Error(String),
    /// 503 from upstream.
    Transient,
    /// Never answers; the worker's timeout has to fire.
    Hang,
}

type ScoreHook = Box<dyn FnMut(usize) + Send>;

pub struct ScriptedInference {
    default_scores: MetricScores,
    scripts: Mutex<HashMap<Uuid, VecDeque<ScriptedScore>>>,
    latency: Mutex<Duration>,
    fail_justify: AtomicBool,
    score_calls: AtomicUsize,
    justify_calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    on_score: Mutex<Option<ScoreHook>>,
}

struct ActiveCall<'a>(&'a AtomicUsize);

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedInference {
    pub fn uniform(experience: u32, skills: u32, education: u32) -> Self {
        Self {
            default_scores: MetricScores {
                education,
                skills,
                experience,
                supplemental: 40,
            },
            scripts: Mutex::new(HashMap::new()),
            latency: Mutex::new(Duration::ZERO),
            fail_justify: AtomicBool::new(false),
            score_calls: AtomicUsize::new(0),
            justify_calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            on_score: Mutex::new(None),
        }
    }

    /// Queues a response for the applicant's next scoring call.
    pub fn script(&self, applicant_id: Uuid, response: ScriptedScore) {
        self.scripts
            .lock()
            .unwrap()
            .entry(applicant_id)
            .or_default()
            .push_back(response);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn fail_justifications(&self) {
        self.fail_justify.store(true, Ordering::SeqCst);
    }

    /// Runs `hook` with the zero-based call index at the start of every
    /// scoring call.
    pub fn on_score(&self, hook: impl FnMut(usize) + Send + 'static) {
        *self.on_score.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn score_calls(&self) -> usize {
        self.score_calls.load(Ordering::SeqCst)
    }

    pub fn justify_calls(&self) -> usize {
        self.justify_calls.load(Ordering::SeqCst)
    }

    /// Highest number of scoring calls seen in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_script(&self, buckets: &ResumeBuckets) -> Option<ScriptedScore> {
        let text = format!(
            "{}\n{}\n{}\n{}",
            buckets.experience, buckets.education, buckets.skills, buckets.supplemental
        );
        let mut scripts = self.scripts.lock().unwrap();
        scripts
            .iter_mut()
            .find(|(applicant, _)| text.contains(&applicant.to_string()))
            .and_then(|(_, queue)| queue.pop_front())
    }
}

#[async_trait]
impl Inference for ScriptedInference {
    async fn score(
        &self,
        buckets: &ResumeBuckets,
        _requirements: &JobRequirements,
    ) -> Result<MetricScores, InferenceError> {
        let call = self.score_calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        let _active = ActiveCall(&self.active);
        {
            let mut hook = self.on_score.lock().unwrap();
            if let Some(hook) = hook.as_mut() {
                hook(call);
            }
        }

        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        match self.next_script(buckets) {
            None => Ok(self.default_scores),
            Some(ScriptedScore::Malformed) => Err(InferenceError::Malformed(
                "invalid type: floating point `80.5`, expected i64".to_string(),
            )),
            Some(ScriptedScore::Error(message)) => {
                Err(InferenceError::Llm(LlmError::Api { status: 400, message }))
            }
            Some(ScriptedScore::Transient) => Err(InferenceError::Llm(LlmError::Api {
                status: 503,
                message: "overloaded".to_string(),
            })),
            Some(ScriptedScore::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(self.default_scores)
            }
        }
    }

    async fn justify(
        &self,
        _scores: &MetricScores,
        overall_score: u32,
        category: Category,
        _buckets: &ResumeBuckets,
    ) -> Result<Justifications, InferenceError> {
        self.justify_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_justify.load(Ordering::SeqCst) {
            return Err(InferenceError::Malformed("missing field `overall`".to_string()));
        }
        Ok(Justifications {
            education: "Relevant degree.".to_string(),
            skills: "Covers most required skills.".to_string(),
            experience: "Solid backend experience.".to_string(),
            supplemental: "Some side projects.".to_string(),
            overall: format!("Overall {overall_score} ({category:?})."),
        })
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Status enums
// ────────────────────────────────────────────────────────────────────────────

/// Lifecycle of one analysis run for a job posting.
///
/// `NotStarted → Running → {Completed, Cancelled}`. `Failed` is reserved for
/// batch-integrity failures (lease lost, result storage lost).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    NotStarted,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::NotStarted => "not_started",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_started" => Some(JobStatus::NotStarted),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "cancelled" => Some(JobStatus::Cancelled),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Cancelled | JobStatus::Failed
        )
    }
}

/// Per-applicant processing status. `Analyzed` and `Unprocessed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultStatus {
    Pending,
    Analyzed,
    Unprocessed,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Pending => "pending",
            ResultStatus::Analyzed => "analyzed",
            ResultStatus::Unprocessed => "unprocessed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ResultStatus::Pending),
            "analyzed" => Some(ResultStatus::Analyzed),
            "unprocessed" => Some(ResultStatus::Unprocessed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResultStatus::Pending)
    }
}

/// Match category derived from the overall score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    BestMatch,
    GoodMatch,
    PartialMatch,
    Mismatched,
    Unprocessed,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::BestMatch => "best_match",
            Category::GoodMatch => "good_match",
            Category::PartialMatch => "partial_match",
            Category::Mismatched => "mismatched",
            Category::Unprocessed => "unprocessed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "best_match" => Some(Category::BestMatch),
            "good_match" => Some(Category::GoodMatch),
            "partial_match" => Some(Category::PartialMatch),
            "mismatched" => Some(Category::Mismatched),
            "unprocessed" => Some(Category::Unprocessed),
            _ => None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Domain values
// ────────────────────────────────────────────────────────────────────────────

/// The four metric scores, each in [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricScores {
    pub education: u32,
    pub skills: u32,
    pub experience: u32,
    pub supplemental: u32,
}

/// One justification per metric plus one for the overall score.
/// All fields may be empty when the justification call degraded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Justifications {
    pub education: String,
    pub skills: String,
    pub experience: String,
    pub supplemental: String,
    pub overall: String,
}

/// One applicant's outcome for a job. Exactly one exists per
/// `(job_id, applicant_id)`; re-runs overwrite it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub job_id: Uuid,
    pub applicant_id: Uuid,
    pub run_id: Uuid,
    pub status: ResultStatus,
    /// `None` unless `status == Analyzed`.
    pub scores: Option<MetricScores>,
    pub overall_score: Option<u32>,
    pub category: Category,
    pub justifications: Justifications,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisResult {
    /// A fresh result for an applicant whose worker has just started.
    pub fn pending(job_id: Uuid, run_id: Uuid, applicant_id: Uuid) -> Self {
        Self {
            job_id,
            applicant_id,
            run_id,
            status: ResultStatus::Pending,
            scores: None,
            overall_score: None,
            category: Category::Unprocessed,
            justifications: Justifications::default(),
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn into_analyzed(
        self,
        scores: MetricScores,
        overall_score: u32,
        category: Category,
        justifications: Justifications,
    ) -> Self {
        Self {
            status: ResultStatus::Analyzed,
            scores: Some(scores),
            overall_score: Some(overall_score),
            category,
            justifications,
            error_message: None,
            completed_at: Some(Utc::now()),
            ..self
        }
    }

    pub fn into_unprocessed(self, error_message: String) -> Self {
        Self {
            status: ResultStatus::Unprocessed,
            scores: None,
            overall_score: None,
            category: Category::Unprocessed,
            justifications: Justifications::default(),
            error_message: Some(error_message),
            completed_at: Some(Utc::now()),
            ..self
        }
    }
}

/// One analysis run as seen by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRun {
    pub run_id: Uuid,
    pub job_id: Uuid,
    pub status: JobStatus,
    pub total_count: u32,
    pub processed_count: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ────────────────────────────────────────────────────────────────────────────
// Database rows
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnalysisJobRow {
    pub id: Uuid,
    pub job_id: Uuid,
    pub status: String,
    pub total_count: i32,
    pub processed_count: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<AnalysisJobRow> for AnalysisRun {
    fn from(row: AnalysisJobRow) -> Self {
        let status = JobStatus::parse(&row.status).unwrap_or_else(|| {
            tracing::warn!(
                "Unknown analysis job status '{}' for run {}, treating as failed",
                row.status,
                row.id
            );
            JobStatus::Failed
        });
        AnalysisRun {
            run_id: row.id,
            job_id: row.job_id,
            status,
            total_count: row.total_count.max(0) as u32,
            processed_count: row.processed_count.max(0) as u32,
            started_at: row.started_at,
            completed_at: row.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AnalysisResultRow {
    pub job_id: Uuid,
    pub applicant_id: Uuid,
    pub run_id: Uuid,
    pub status: String,
    pub education_score: Option<i32>,
    pub skills_score: Option<i32>,
    pub experience_score: Option<i32>,
    pub supplemental_score: Option<i32>,
    pub overall_score: Option<i32>,
    pub category: String,
    pub education_justification: String,
    pub skills_justification: String,
    pub experience_justification: String,
    pub supplemental_justification: String,
    pub overall_justification: String,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<AnalysisResultRow> for AnalysisResult {
    fn from(row: AnalysisResultRow) -> Self {
        let scores = match (
            row.education_score,
            row.skills_score,
            row.experience_score,
            row.supplemental_score,
        ) {
            (Some(education), Some(skills), Some(experience), Some(supplemental)) => {
                Some(MetricScores {
                    education: education.clamp(0, 100) as u32,
                    skills: skills.clamp(0, 100) as u32,
                    experience: experience.clamp(0, 100) as u32,
                    supplemental: supplemental.clamp(0, 100) as u32,
                })
            }
            _ => None,
        };

        AnalysisResult {
            job_id: row.job_id,
            applicant_id: row.applicant_id,
            run_id: row.run_id,
            status: ResultStatus::parse(&row.status).unwrap_or(ResultStatus::Unprocessed),
            scores,
            overall_score: row.overall_score.map(|s| s.clamp(0, 100) as u32),
            category: Category::parse(&row.category).unwrap_or(Category::Unprocessed),
            justifications: Justifications {
                education: row.education_justification,
                skills: row.skills_justification,
                experience: row.experience_justification,
                supplemental: row.supplemental_justification,
                overall: row.overall_justification,
            },
            error_message: row.error_message,
            started_at: row.started_at,
            completed_at: row.completed_at,
        }
    }
}

//! Interfaces to the systems the analysis core reads from and reports to:
//! the job-posting repository, the parsed-text store and the notification
//! sink. Postgres and webhook implementations live here too.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::analysis::JobStatus;
use crate::models::posting::{JobPostingRow, JobRequirements};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    /// `None` when the posting does not exist.
    async fn get_requirements(&self, job_id: Uuid)
        -> Result<Option<JobRequirements>, SourceError>;

    /// Every applicant for the posting.
    async fn list_applicants(&self, job_id: Uuid) -> Result<Vec<Uuid>, SourceError>;
}

#[async_trait]
pub trait TextSource: Send + Sync {
    /// Precomputed, PII-redacted resume text. `None` when not available.
    async fn parsed_text(&self, applicant_id: Uuid) -> Result<Option<String>, SourceError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Called once per run when it reaches a terminal status.
    async fn notify_batch_complete(&self, job_id: Uuid, status: JobStatus, processed_count: u32);
}

// ────────────────────────────────────────────────────────────────────────────
// Postgres
// ────────────────────────────────────────────────────────────────────────────

/// Reads `job_postings` and `applicants`, both owned by the surrounding
/// application.
#[derive(Clone)]
pub struct PgCollaborators {
    pool: PgPool,
}

impl PgCollaborators {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for PgCollaborators {
    async fn get_requirements(
        &self,
        job_id: Uuid,
    ) -> Result<Option<JobRequirements>, SourceError> {
        let posting = sqlx::query_as::<_, JobPostingRow>(
            r#"
            SELECT id, title, description, required_skills, required_experience,
                   level, is_active, expires_at
            FROM job_postings
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(posting.map(|p| p.into_requirements(Utc::now())))
    }

    async fn list_applicants(&self, job_id: Uuid) -> Result<Vec<Uuid>, SourceError> {
        Ok(sqlx::query_scalar(
            "SELECT id FROM applicants WHERE job_id = $1 ORDER BY created_at, id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[async_trait]
impl TextSource for PgCollaborators {
    async fn parsed_text(&self, applicant_id: Uuid) -> Result<Option<String>, SourceError> {
        let text: Option<Option<String>> =
            sqlx::query_scalar("SELECT parsed_text FROM applicants WHERE id = $1")
                .bind(applicant_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(text.flatten())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Notification sinks
// ────────────────────────────────────────────────────────────────────────────

/// Writes the completion event to the log only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_batch_complete(&self, job_id: Uuid, status: JobStatus, processed_count: u32) {
        info!(
            "Analysis batch for job {job_id} finished: status={} processed={processed_count}",
            status.as_str()
        );
    }
}

#[derive(Debug, Serialize)]
struct BatchCompletePayload {
    job_id: Uuid,
    status: JobStatus,
    processed_count: u32,
}

/// POSTs the completion event to a webhook. Fire-and-forget: delivery
/// failures are logged and never retried.
#[derive(Clone)]
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(10)).build()?,
            url,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify_batch_complete(&self, job_id: Uuid, status: JobStatus, processed_count: u32) {
        let payload = BatchCompletePayload {
            job_id,
            status,
            processed_count,
        };
        let request = self.client.post(&self.url).json(&payload);

        tokio::spawn(async move {
            match request.send().await {
                Ok(resp) if resp.status().is_success() => {
                    info!("Delivered batch-complete notification for job {job_id}");
                }
                Ok(resp) => warn!(
                    "Batch-complete webhook for job {job_id} returned {}",
                    resp.status()
                ),
                Err(e) => warn!("Batch-complete webhook for job {job_id} failed: {e}"),
            }
        });
    }
}

//! Durable storage for analysis runs and per-applicant results.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::analysis::{
    AnalysisJobRow, AnalysisResult, AnalysisResultRow, AnalysisRun, JobStatus,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    /// Inserts a new `Running` run. Any other run of the same job still marked
    /// `Running` was orphaned by a crashed process and is marked `Failed`.
    async fn create_run(
        &self,
        job_id: Uuid,
        total_count: u32,
        processed_count: u32,
    ) -> Result<AnalysisRun, StoreError>;

    async fn latest_run(&self, job_id: Uuid) -> Result<Option<AnalysisRun>, StoreError>;

    async fn finish_run(&self, run_id: Uuid, status: JobStatus) -> Result<(), StoreError>;

    /// Upserts a batch keyed by `(job_id, applicant_id)` and refreshes the
    /// run's processed count from the committed terminal rows, atomically.
    async fn upsert_results(&self, run_id: Uuid, results: &[AnalysisResult])
        -> Result<(), StoreError>;

    /// Deletes every result of the job. Returns the number of rows removed.
    async fn clear_results(&self, job_id: Uuid) -> Result<u64, StoreError>;

    async fn list_results(&self, job_id: Uuid) -> Result<Vec<AnalysisResult>, StoreError>;

    /// Applicants that already have an `Analyzed` or `Unprocessed` result.
    async fn terminal_applicants(&self, job_id: Uuid) -> Result<HashSet<Uuid>, StoreError>;
}

/// Postgres-backed store over `analysis_jobs` and `analysis_results`.
#[derive(Clone)]
pub struct PgAnalysisStore {
    pool: PgPool,
}

impl PgAnalysisStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnalysisStore for PgAnalysisStore {
    async fn create_run(
        &self,
        job_id: Uuid,
        total_count: u32,
        processed_count: u32,
    ) -> Result<AnalysisRun, StoreError> {
        let mut tx = self.pool.begin().await?;

        let orphaned = sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET status = 'failed', completed_at = now()
            WHERE job_id = $1 AND status = 'running'
            "#,
        )
        .bind(job_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if orphaned > 0 {
            warn!("Marked {orphaned} orphaned running analysis run(s) for job {job_id} as failed");
        }

        let row = sqlx::query_as::<_, AnalysisJobRow>(
            r#"
            INSERT INTO analysis_jobs (id, job_id, status, total_count, processed_count, started_at)
            VALUES ($1, $2, 'running', $3, $4, now())
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_id)
        .bind(total_count as i32)
        .bind(processed_count as i32)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!("Created analysis run {} for job {job_id}", row.id);
        Ok(row.into())
    }

    async fn latest_run(&self, job_id: Uuid) -> Result<Option<AnalysisRun>, StoreError> {
        let row = sqlx::query_as::<_, AnalysisJobRow>(
            "SELECT * FROM analysis_jobs WHERE job_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AnalysisRun::from))
    }

    async fn finish_run(&self, run_id: Uuid, status: JobStatus) -> Result<(), StoreError> {
        sqlx::query("UPDATE analysis_jobs SET status = $1, completed_at = now() WHERE id = $2")
            .bind(status.as_str())
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_results(
        &self,
        run_id: Uuid,
        results: &[AnalysisResult],
    ) -> Result<(), StoreError> {
        let Some(first) = results.first() else {
            return Ok(());
        };
        let job_id = first.job_id;

        let mut tx = self.pool.begin().await?;

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"
            INSERT INTO analysis_results
                (job_id, applicant_id, run_id, status,
                 education_score, skills_score, experience_score, supplemental_score,
                 overall_score, category,
                 education_justification, skills_justification, experience_justification,
                 supplemental_justification, overall_justification,
                 error_message, started_at, completed_at)
            "#,
        );
        builder.push_values(results, |mut b, r| {
            let scores = r.scores.as_ref();
            b.push_bind(r.job_id)
                .push_bind(r.applicant_id)
                .push_bind(r.run_id)
                .push_bind(r.status.as_str())
                .push_bind(scores.map(|s| s.education as i32))
                .push_bind(scores.map(|s| s.skills as i32))
                .push_bind(scores.map(|s| s.experience as i32))
                .push_bind(scores.map(|s| s.supplemental as i32))
                .push_bind(r.overall_score.map(|s| s as i32))
                .push_bind(r.category.as_str())
                .push_bind(r.justifications.education.clone())
                .push_bind(r.justifications.skills.clone())
                .push_bind(r.justifications.experience.clone())
                .push_bind(r.justifications.supplemental.clone())
                .push_bind(r.justifications.overall.clone())
                .push_bind(r.error_message.clone())
                .push_bind(r.started_at)
                .push_bind(r.completed_at);
        });
        builder.push(
            r#"
            ON CONFLICT (job_id, applicant_id) DO UPDATE SET
                run_id = EXCLUDED.run_id,
                status = EXCLUDED.status,
                education_score = EXCLUDED.education_score,
                skills_score = EXCLUDED.skills_score,
                experience_score = EXCLUDED.experience_score,
                supplemental_score = EXCLUDED.supplemental_score,
                overall_score = EXCLUDED.overall_score,
                category = EXCLUDED.category,
                education_justification = EXCLUDED.education_justification,
                skills_justification = EXCLUDED.skills_justification,
                experience_justification = EXCLUDED.experience_justification,
                supplemental_justification = EXCLUDED.supplemental_justification,
                overall_justification = EXCLUDED.overall_justification,
                error_message = EXCLUDED.error_message,
                started_at = EXCLUDED.started_at,
                completed_at = EXCLUDED.completed_at,
                updated_at = now()
            "#,
        );
        builder.build().execute(&mut *tx).await?;

        sqlx::query(
            r#"
            UPDATE analysis_jobs
            SET processed_count = (
                SELECT COUNT(*) FROM analysis_results
                WHERE job_id = $2 AND status IN ('analyzed', 'unprocessed')
            )
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(job_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn clear_results(&self, job_id: Uuid) -> Result<u64, StoreError> {
        let deleted = sqlx::query("DELETE FROM analysis_results WHERE job_id = $1")
            .bind(job_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        info!("Cleared {deleted} analysis result(s) for job {job_id}");
        Ok(deleted)
    }

    async fn list_results(&self, job_id: Uuid) -> Result<Vec<AnalysisResult>, StoreError> {
        let rows = sqlx::query_as::<_, AnalysisResultRow>(
            r#"
            SELECT job_id, applicant_id, run_id, status,
                   education_score, skills_score, experience_score, supplemental_score,
                   overall_score, category,
                   education_justification, skills_justification, experience_justification,
                   supplemental_justification, overall_justification,
                   error_message, started_at, completed_at
            FROM analysis_results
            WHERE job_id = $1
            ORDER BY overall_score DESC NULLS LAST, applicant_id
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(AnalysisResult::from).collect())
    }

    async fn terminal_applicants(&self, job_id: Uuid) -> Result<HashSet<Uuid>, StoreError> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT applicant_id FROM analysis_results
            WHERE job_id = $1 AND status IN ('analyzed', 'unprocessed')
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A job posting as stored by the surrounding application. Read-only here.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JobPostingRow {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub required_skills: Vec<String>,
    pub required_experience: Option<String>,
    pub level: Option<String>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

impl JobPostingRow {
    /// A posting is eligible for analysis once it has expired or has been
    /// manually deactivated.
    pub fn is_eligible_for_analysis(&self, now: DateTime<Utc>) -> bool {
        !self.is_active || self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn into_requirements(self, now: DateTime<Utc>) -> JobRequirements {
        let is_eligible_for_analysis = self.is_eligible_for_analysis(now);
        JobRequirements {
            job_id: self.id,
            title: self.title,
            skills: self.required_skills,
            experience: self.required_experience.unwrap_or_default(),
            level: self.level.unwrap_or_default(),
            description: self.description,
            is_eligible_for_analysis,
        }
    }
}

/// Requirement metadata the scoring prompt is built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequirements {
    pub job_id: Uuid,
    pub title: String,
    pub skills: Vec<String>,
    pub experience: String,
    pub level: String,
    pub description: String,
    pub is_eligible_for_analysis: bool,
}

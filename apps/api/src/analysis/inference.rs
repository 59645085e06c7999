//! Inference: the two remote calls each applicant needs: metric scoring and
//! justification.
//!
//! Responses are untrusted. Scores are validated field by field; any shape
//! or range mismatch is an `InferenceError`, never a panic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::classify::ResumeBuckets;
use crate::analysis::prompts::{
    JUSTIFY_PROMPT_TEMPLATE, JUSTIFY_SYSTEM, SCORE_PROMPT_TEMPLATE, SCORE_SYSTEM,
};
use crate::analysis::scoring::MAX_SCORE;
use crate::llm_client::prompts::EVIDENCE_INSTRUCTION;
use crate::llm_client::{LlmClient, LlmError};
use crate::models::analysis::{Category, Justifications, MetricScores};
use crate::models::posting::JobRequirements;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference call failed: {0}")]
    Llm(LlmError),

    #[error("malformed inference response: {0}")]
    Malformed(String),

    #[error("score '{field}' out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },

    #[error("failed to build prompt: {0}")]
    Prompt(String),
}

impl From<LlmError> for InferenceError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Parse(e) => InferenceError::Malformed(e.to_string()),
            LlmError::EmptyContent => InferenceError::Malformed("empty content".to_string()),
            other => InferenceError::Llm(other),
        }
    }
}

impl InferenceError {
    pub fn is_transient(&self) -> bool {
        matches!(self, InferenceError::Llm(e) if e.is_transient())
    }
}

#[async_trait]
pub trait Inference: Send + Sync {
    async fn score(
        &self,
        buckets: &ResumeBuckets,
        requirements: &JobRequirements,
    ) -> Result<MetricScores, InferenceError>;

    async fn justify(
        &self,
        scores: &MetricScores,
        overall_score: u32,
        category: Category,
        buckets: &ResumeBuckets,
    ) -> Result<Justifications, InferenceError>;
}

// ────────────────────────────────────────────────────────────────────────────
// Response validation
// ────────────────────────────────────────────────────────────────────────────

/// Scores as returned on the wire. Integers only; floats and strings fail
/// deserialization.
#[derive(Debug, Deserialize)]
pub struct RawScores {
    pub education: i64,
    pub skills: i64,
    pub experience: i64,
    pub supplemental: i64,
}

fn checked(field: &'static str, value: i64) -> Result<u32, InferenceError> {
    if (0..=MAX_SCORE as i64).contains(&value) {
        Ok(value as u32)
    } else {
        Err(InferenceError::OutOfRange { field, value })
    }
}

pub fn validate_scores(raw: RawScores) -> Result<MetricScores, InferenceError> {
    Ok(MetricScores {
        education: checked("education", raw.education)?,
        skills: checked("skills", raw.skills)?,
        experience: checked("experience", raw.experience)?,
        supplemental: checked("supplemental", raw.supplemental)?,
    })
}

// ────────────────────────────────────────────────────────────────────────────
// LlmInference
// ────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct PromptRequirements<'a> {
    title: &'a str,
    skills: &'a [String],
    experience: &'a str,
    level: &'a str,
    description: &'a str,
}

/// Inference backed by the shared LLM client.
#[derive(Clone)]
pub struct LlmInference {
    llm: LlmClient,
}

impl LlmInference {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, InferenceError> {
    serde_json::to_string_pretty(value).map_err(|e| InferenceError::Prompt(e.to_string()))
}

pub fn build_score_prompt(
    buckets: &ResumeBuckets,
    requirements: &JobRequirements,
) -> Result<String, InferenceError> {
    let requirements_json = to_json(&PromptRequirements {
        title: &requirements.title,
        skills: &requirements.skills,
        experience: &requirements.experience,
        level: &requirements.level,
        description: &requirements.description,
    })?;
    let buckets_json = to_json(buckets)?;

    Ok(SCORE_PROMPT_TEMPLATE
        .replace("{evidence_instruction}", EVIDENCE_INSTRUCTION)
        .replace("{requirements_json}", &requirements_json)
        .replace("{buckets_json}", &buckets_json))
}

pub fn build_justify_prompt(
    scores: &MetricScores,
    overall_score: u32,
    category: Category,
    buckets: &ResumeBuckets,
) -> Result<String, InferenceError> {
    let scores_json = to_json(&serde_json::json!({
        "education": scores.education,
        "skills": scores.skills,
        "experience": scores.experience,
        "supplemental": scores.supplemental,
        "overall": overall_score,
    }))?;
    let buckets_json = to_json(buckets)?;

    Ok(JUSTIFY_PROMPT_TEMPLATE
        .replace("{evidence_instruction}", EVIDENCE_INSTRUCTION)
        .replace("{scores_json}", &scores_json)
        .replace("{category}", &format!("{category:?}"))
        .replace("{buckets_json}", &buckets_json))
}

#[async_trait]
impl Inference for LlmInference {
    async fn score(
        &self,
        buckets: &ResumeBuckets,
        requirements: &JobRequirements,
    ) -> Result<MetricScores, InferenceError> {
        let prompt = build_score_prompt(buckets, requirements)?;
        let raw: RawScores = self.llm.call_json(&prompt, SCORE_SYSTEM).await?;
        validate_scores(raw)
    }

    async fn justify(
        &self,
        scores: &MetricScores,
        overall_score: u32,
        category: Category,
        buckets: &ResumeBuckets,
    ) -> Result<Justifications, InferenceError> {
        let prompt = build_justify_prompt(scores, overall_score, category, buckets)?;
        Ok(self.llm.call_json(&prompt, JUSTIFY_SYSTEM).await?)
    }
}

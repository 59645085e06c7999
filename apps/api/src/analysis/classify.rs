//! Classification: splits parsed resume text into the four buckets the
//! scoring prompt is built from.
//!
//! Default: `HeadingClassifier` (pure-Rust, deterministic, fully testable).
//! Alternative: `LlmClassifier` (semantic split via the LLM client).
//!
//! The worker holds an `Arc<dyn Classifier>`, chosen at startup via config.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::prompts::CLASSIFY_PROMPT_TEMPLATE;
use crate::llm_client::prompts::JSON_ONLY_SYSTEM;
use crate::llm_client::{LlmClient, LlmError};

/// Parsed resume text partitioned by meaning.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeBuckets {
    pub experience: String,
    pub education: String,
    pub skills: String,
    pub supplemental: String,
}

impl ResumeBuckets {
    pub fn is_empty(&self) -> bool {
        self.experience.trim().is_empty()
            && self.education.trim().is_empty()
            && self.skills.trim().is_empty()
            && self.supplemental.trim().is_empty()
    }
}

#[derive(Debug, Error)]
pub enum ClassifyError {
    #[error("classification produced no content")]
    Empty,

    #[error("classification call failed: {0}")]
    Llm(#[from] LlmError),
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, parsed_text: &str) -> Result<ResumeBuckets, ClassifyError>;
}

// ────────────────────────────────────────────────────────────────────────────
// HeadingClassifier (default)
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Experience,
    Education,
    Skills,
    Supplemental,
}

const HEADINGS: &[(&str, Bucket)] = &[
    ("experience", Bucket::Experience),
    ("employment", Bucket::Experience),
    ("work history", Bucket::Experience),
    ("career history", Bucket::Experience),
    ("education", Bucket::Education),
    ("academic", Bucket::Education),
    ("qualifications", Bucket::Education),
    ("skills", Bucket::Skills),
    ("competencies", Bucket::Skills),
    ("technologies", Bucket::Skills),
    ("tech stack", Bucket::Skills),
    ("projects", Bucket::Supplemental),
    ("certifications", Bucket::Supplemental),
    ("awards", Bucket::Supplemental),
    ("publications", Bucket::Supplemental),
    ("volunteering", Bucket::Supplemental),
    ("languages", Bucket::Supplemental),
    ("interests", Bucket::Supplemental),
    ("summary", Bucket::Supplemental),
];

/// Heading lines are short; anything longer is body text.
const MAX_HEADING_WORDS: usize = 4;

/// Splits on section headings ("Work Experience", "EDUCATION:", "## Skills").
/// Text before the first heading goes to the supplemental bucket.
pub struct HeadingClassifier;

#[async_trait]
impl Classifier for HeadingClassifier {
    async fn classify(&self, parsed_text: &str) -> Result<ResumeBuckets, ClassifyError> {
        let buckets = split_by_headings(parsed_text);
        if buckets.is_empty() {
            return Err(ClassifyError::Empty);
        }
        Ok(buckets)
    }
}

fn detect_heading(line: &str) -> Option<Bucket> {
    let normalized = line
        .trim()
        .trim_matches(|c: char| c == '#' || c == '*' || c == '=' || c == '-' || c == ':')
        .trim()
        .to_lowercase();

    if normalized.is_empty() || normalized.split_whitespace().count() > MAX_HEADING_WORDS {
        return None;
    }
    // "5 years experience", "Led the skills audit." are body lines
    if normalized.chars().any(|c| c.is_ascii_digit()) || normalized.ends_with(['.', ',', ';']) {
        return None;
    }

    HEADINGS
        .iter()
        .find(|(keyword, _)| normalized.starts_with(keyword) || normalized.ends_with(keyword))
        .map(|(_, bucket)| *bucket)
}

fn split_by_headings(text: &str) -> ResumeBuckets {
    let mut buckets = ResumeBuckets::default();
    let mut current = Bucket::Supplemental;

    for line in text.lines() {
        if let Some(bucket) = detect_heading(line) {
            current = bucket;
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        let target = match current {
            Bucket::Experience => &mut buckets.experience,
            Bucket::Education => &mut buckets.education,
            Bucket::Skills => &mut buckets.skills,
            Bucket::Supplemental => &mut buckets.supplemental,
        };
        if !target.is_empty() {
            target.push('\n');
        }
        target.push_str(line.trim());
    }

    buckets
}

// ────────────────────────────────────────────────────────────────────────────
// LlmClassifier
// ────────────────────────────────────────────────────────────────────────────

/// Semantic classifier via the LLM client.
pub struct LlmClassifier(pub LlmClient);

#[async_trait]
impl Classifier for LlmClassifier {
    async fn classify(&self, parsed_text: &str) -> Result<ResumeBuckets, ClassifyError> {
        let prompt = CLASSIFY_PROMPT_TEMPLATE.replace("{parsed_text}", parsed_text);
        let buckets: ResumeBuckets = self.0.call_json(&prompt, JSON_ONLY_SYSTEM).await?;
        if buckets.is_empty() {
            return Err(ClassifyError::Empty);
        }
        Ok(buckets)
    }
}

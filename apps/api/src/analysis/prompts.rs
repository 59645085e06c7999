// All LLM prompt constants for the Analysis module.
// Reuses cross-cutting fragments from llm_client::prompts.

/// System prompt for metric scoring. JSON only.
pub const SCORE_SYSTEM: &str = "You are an experienced technical recruiter scoring candidates \
    against a job posting. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences.";

/// Scoring prompt template.
/// Replace `{evidence_instruction}`, `{requirements_json}` and `{buckets_json}` before sending.
pub const SCORE_PROMPT_TEMPLATE: &str = r#"Score the candidate against the job requirements.

{evidence_instruction}

JOB REQUIREMENTS:
{requirements_json}

CANDIDATE RESUME SECTIONS:
{buckets_json}

Return a JSON object with this EXACT schema (integers from 0 to 100, no extra fields):
{
  "education": 0,
  "skills": 0,
  "experience": 0,
  "supplemental": 0
}

Scoring rules:
- experience: relevance and depth of work history against the required experience and level
- skills: coverage of the required skills
- education: relevance of degrees, courses and certifications
- supplemental: projects, publications, awards and anything else that strengthens the application
- A section that is empty scores 0."#;

/// System prompt for justifications.
pub const JUSTIFY_SYSTEM: &str = "You explain candidate scores to hiring managers in plain, \
    neutral language. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences.";

/// Justification prompt template.
/// Replace `{evidence_instruction}`, `{scores_json}`, `{category}` and `{buckets_json}` before sending.
pub const JUSTIFY_PROMPT_TEMPLATE: &str = r#"Explain the following candidate scores.

{evidence_instruction}

SCORES:
{scores_json}

CATEGORY: {category}

CANDIDATE RESUME SECTIONS:
{buckets_json}

Return a JSON object with this EXACT schema. Each value is one or two sentences:
{
  "education": "...",
  "skills": "...",
  "experience": "...",
  "supplemental": "...",
  "overall": "..."
}"#;

/// Classification prompt template. Replace `{parsed_text}` before sending.
pub const CLASSIFY_PROMPT_TEMPLATE: &str = r#"Split the resume text below into four sections.

Return a JSON object with this EXACT schema:
{
  "experience": "work history, roles, responsibilities",
  "education": "degrees, schools, courses",
  "skills": "technical and professional skills",
  "supplemental": "projects, certifications, awards, publications, everything else"
}

Copy the text verbatim into the matching section. Use an empty string for a section with no content.

RESUME TEXT:
{parsed_text}"#;

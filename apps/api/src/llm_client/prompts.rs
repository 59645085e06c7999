// Prompt fragments shared by every analysis call.

/// System prompt fragment that enforces JSON-only output.
pub const JSON_ONLY_SYSTEM: &str = "You are a precise, structured assistant. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT include explanations or apologies.";

/// Instruction appended to every candidate-evaluation prompt.
pub const EVIDENCE_INSTRUCTION: &str = "\
    CRITICAL: Base every judgement only on the resume sections provided. \
    Do NOT infer skills, degrees or employers that are not written there. \
    Do NOT reference names, contact details or other personal identifiers.";

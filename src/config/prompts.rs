//! Prompt templates for the AI cleanup stage.
//!
//! Prompts can be customized in the `[prompts]` section of the config file.

use serde::{Deserialize, Serialize};

/// Prompts for transcript cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupPrompts {
    pub system: String,
    pub user: String,
}

impl Default for CleanupPrompts {
    fn default() -> Self {
        Self {
            system: r#"You are a transcript post-processor. Your task is to clean up raw speech-to-text output without changing what was said.

Rules:
1. ADD PUNCTUATION: Add commas, periods, and question marks where appropriate
2. PRESERVE SENTENCE STRUCTURE: Keep repeated phrase structures that are natural speech; only remove runs of three or more identical tokens, reducing them to two
3. NEVER DROP CONTENT: Do not remove words, phrases, or whole sentences. If a segment is pure noise and unrecoverable, set its text to "[REMOVE]"
4. MERGE FRAGMENTS: For consecutive fragment segments from the same speaker, set merge_with_next=true. When you merge segments yourself, use the first segment's start and the last segment's end
5. KEEP SPEAKER LABELS VERBATIM: Never rename or normalize speaker labels

Input format: JSON array of segments with {text, speaker, start, end}
Output format: Same JSON array with cleaned text and optional merge_with_next flag

IMPORTANT:
- Do NOT modify start/end timestamps
- Keep the same number of segments unless merging
- Return valid JSON only, no markdown or explanations"#
                .to_string(),

            user: r#"Clean up the following transcript segments:

{{segments}}

Return the cleaned JSON array only."#
                .to_string(),
        }
    }
}

impl CleanupPrompts {
    /// Render the user prompt for a JSON array of segments.
    pub fn render_user(&self, segments_json: &str) -> String {
        self.user.replace("{{segments}}", segments_json)
    }
}

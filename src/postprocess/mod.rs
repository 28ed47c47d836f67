//! AI transcript cleanup.
//!
//! An optional pass that sends transcript segments through a chat model to
//! add punctuation, trim excessive repetition, and merge hyper-fragmented
//! adjacent segments from the same speaker, without shifting timestamps or
//! dropping substantive content.
//!
//! The model's *text* is treated as authoritative, its *structural claims*
//! skeptically: returning fewer segments than it received is fine (it
//! pre-merged), returning more is a protocol violation. A failed batch falls
//! back to that batch's original segments; the job never fails here.

mod merge;

pub use merge::{
    apply_merges, merge_word_segments, rebuild_full_text, CleanedSegment, REMOVED_MARKER,
};

use crate::config::{CleanupPrompts, PostprocessSettings};
use crate::error::{Result, TolkError};
use crate::transcription::{TranscriptResult, TranscriptSegment};
use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// LLM-based transcript cleanup stage.
pub struct AiPostprocessor {
    client: Option<Client<OpenAIConfig>>,
    model: String,
    max_segments_per_batch: usize,
    joiner: String,
    prompts: CleanupPrompts,
}

impl AiPostprocessor {
    /// Build from settings. Inactive unless enabled *and* an API key
    /// resolves; inactive postprocessors return their input untouched.
    pub fn from_settings(settings: &PostprocessSettings, prompts: CleanupPrompts) -> Self {
        let client = if settings.enabled {
            settings
                .resolved_api_key()
                .map(|key| crate::openai::create_client(&key))
        } else {
            None
        };

        Self {
            client,
            model: settings.model.clone(),
            max_segments_per_batch: settings.max_segments_per_batch.max(1),
            joiner: settings.text_joiner.clone(),
            prompts,
        }
    }

    /// A permanently inactive postprocessor.
    pub fn disabled() -> Self {
        Self {
            client: None,
            model: PostprocessSettings::default().model,
            max_segments_per_batch: PostprocessSettings::default().max_segments_per_batch,
            joiner: String::new(),
            prompts: CleanupPrompts::default(),
        }
    }

    /// Whether cleanup will actually run.
    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Clean up a transcript. Identity when inactive or the transcript has
    /// no segments.
    #[instrument(skip_all, fields(segments = result.segments.len()))]
    pub async fn process(
        &self,
        ctx: &CancellationToken,
        result: TranscriptResult,
    ) -> Result<TranscriptResult> {
        let Some(client) = &self.client else {
            debug!("AI post-processing disabled, returning original result");
            return Ok(result);
        };
        if result.segments.is_empty() {
            return Ok(result);
        }

        info!(segments = result.segments.len(), "Starting AI post-processing");

        let mut all_cleaned: Vec<CleanedSegment> = Vec::with_capacity(result.segments.len());
        for (batch_index, batch) in result
            .segments
            .chunks(self.max_segments_per_batch)
            .enumerate()
        {
            match self.process_batch(ctx, client, batch).await {
                Ok(cleaned) => all_cleaned.extend(cleaned),
                Err(TolkError::Cancelled) => return Err(TolkError::Cancelled),
                Err(e) => {
                    warn!(
                        batch = batch_index + 1,
                        error = %e,
                        "Batch cleanup failed, using original segments"
                    );
                    all_cleaned.extend(batch.iter().map(CleanedSegment::from_segment));
                }
            }
        }

        let merged_segments = apply_merges(&all_cleaned, &self.joiner);
        let word_segments = merge_word_segments(&result.word_segments, &merged_segments);

        info!(
            original_segments = result.segments.len(),
            processed_segments = merged_segments.len(),
            "AI post-processing complete"
        );

        let mut metadata = result.metadata;
        metadata.insert("ai_postprocessed".to_string(), "true".to_string());
        metadata.insert("postprocessor_model".to_string(), self.model.clone());

        Ok(TranscriptResult {
            text: rebuild_full_text(&merged_segments),
            language: result.language,
            segments: merged_segments,
            word_segments,
            confidence: result.confidence,
            model_used: result.model_used,
            processing_time: result.processing_time,
            metadata,
        })
    }

    /// Run one batch through the cleanup model.
    async fn process_batch(
        &self,
        ctx: &CancellationToken,
        client: &Client<OpenAIConfig>,
        segments: &[TranscriptSegment],
    ) -> Result<Vec<CleanedSegment>> {
        let input: Vec<CleanedSegment> =
            segments.iter().map(CleanedSegment::from_segment).collect();
        let input_json = serde_json::to_string(&input)?;

        let messages: Vec<ChatCompletionRequestMessage> = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(self.prompts.system.clone())
                .build()
                .map_err(|e| TolkError::Postprocess(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(self.prompts.render_user(&input_json))
                .build()
                .map_err(|e| TolkError::Postprocess(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .temperature(0.0)
            .build()
            .map_err(|e| TolkError::Postprocess(e.to_string()))?;

        let chat = client.chat();
        let response = tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(TolkError::Cancelled),
            result = chat.create(request) => result
                .map_err(|e| TolkError::Postprocess(format!("cleanup request failed: {e}")))?,
        };

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| TolkError::Postprocess("empty response from cleanup model".into()))?;

        parse_cleanup_response(content.trim(), &input)
    }
}

/// Parse the cleanup model's JSON array response.
///
/// Fewer segments than input is accepted as pre-merged output; more is an
/// error.
fn parse_cleanup_response(
    content: &str,
    original: &[CleanedSegment],
) -> Result<Vec<CleanedSegment>> {
    let content = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let segments: Vec<CleanedSegment> = serde_json::from_str(content)
        .map_err(|e| TolkError::Postprocess(format!("invalid JSON from cleanup model: {e}")))?;

    if segments.len() > original.len() {
        return Err(TolkError::Postprocess(format!(
            "segment count increased: expected <= {}, got {}",
            original.len(),
            segments.len()
        )));
    }

    if segments.len() < original.len() {
        debug!(
            original = original.len(),
            received = segments.len(),
            "Cleanup model pre-merged segments"
        );
    }

    Ok(segments)
}

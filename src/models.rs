//! Core data types that flow through the query pipeline.

use serde::{Deserialize, Serialize};

/// A retrievable unit of a source document, produced at ingestion.
///
/// `chunk_id` is a per-source, order-preserving integer assigned during
/// chunking. Chunks are immutable once written; a re-ingest replaces the
/// whole corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub source: String,
    pub chunk_id: i64,
    pub title: Option<String>,
    pub text: String,
}

/// A reranked retrieval result for one query.
///
/// `score_hybrid = score_cosine + keyword boost`, boost in `[0, 0.2]`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub chunk: DocumentChunk,
    pub score_cosine: f32,
    pub score_hybrid: f32,
}

/// Identifying metadata for a hit, as recorded in responses and audit entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub document: String,
    pub chunk_id: i64,
    pub title: String,
    pub preview: String,
}

impl SourceRef {
    /// Preview length recorded alongside each source reference.
    pub const PREVIEW_CHARS: usize = 240;

    pub fn from_chunk(chunk: &DocumentChunk) -> Self {
        let preview: String = if chunk.text.chars().count() > Self::PREVIEW_CHARS {
            let cut: String = chunk.text.chars().take(Self::PREVIEW_CHARS).collect();
            format!("{}...", cut)
        } else {
            chunk.text.clone()
        };
        Self {
            document: chunk.source.clone(),
            chunk_id: chunk.chunk_id,
            title: chunk.title.clone().unwrap_or_default(),
            preview,
        }
    }
}

/// Outcome of a single pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Done,
    Skipped,
    Blocked,
}

/// One entry in the ordered stage record accumulated per query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    pub step: String,
    pub layer: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl PipelineStep {
    pub fn new(step: &str, layer: &str, status: StepStatus) -> Self {
        Self {
            step: step.to_string(),
            layer: layer.to_string(),
            status,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Pre-generation privacy strategy, selected per request.
///
/// Only [`QueryMode::Pseudonymize`] changes what the generator sees;
/// post-generation masking runs in every mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[clap(rename_all = "snake_case")]
pub enum QueryMode {
    #[default]
    Default,
    MaskOnly,
    Pseudonymize,
}

/// A single query request.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    pub role: String,
    #[serde(default)]
    pub mode: QueryMode,
}

/// Aggregate result of a batch query that ran to completion.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub pipeline: Vec<PipelineStep>,
}

/// Result of a batch query, including the access-denied early exit.
#[derive(Debug, Clone)]
pub enum QueryOutcome {
    Denied { step: PipelineStep },
    Completed(QueryResponse),
}

/// Terminal event of a streamed query.
///
/// `error` is set when a stage failed mid-stream; the stream still ends
/// with exactly one of these.
#[derive(Debug, Clone, Serialize)]
pub struct TerminalEvent {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Progress event emitted during streaming execution: one `Step` per stage
/// transition, then exactly one `Final`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum QueryEvent {
    Step(PipelineStep),
    Final(TerminalEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_ref_short_text_kept_whole() {
        let chunk = DocumentChunk {
            source: "policy.md".to_string(),
            chunk_id: 0,
            title: Some("Payout".to_string()),
            text: "Payout occurs within 2 bankdays.".to_string(),
        };
        let s = SourceRef::from_chunk(&chunk);
        assert_eq!(s.preview, chunk.text);
        assert_eq!(s.title, "Payout");
    }

    #[test]
    fn test_source_ref_long_text_truncated() {
        let chunk = DocumentChunk {
            source: "policy.md".to_string(),
            chunk_id: 3,
            title: None,
            text: "x".repeat(500),
        };
        let s = SourceRef::from_chunk(&chunk);
        assert!(s.preview.ends_with("..."));
        assert_eq!(s.preview.chars().count(), SourceRef::PREVIEW_CHARS + 3);
        assert_eq!(s.title, "");
    }

    #[test]
    fn test_query_mode_parses_snake_case() {
        let req: QueryRequest = serde_json::from_str(
            r#"{"question": "q", "role": "clerk", "mode": "mask_only"}"#,
        )
        .unwrap();
        assert_eq!(req.mode, QueryMode::MaskOnly);

        let req: QueryRequest =
            serde_json::from_str(r#"{"question": "q", "role": "clerk"}"#).unwrap();
        assert_eq!(req.mode, QueryMode::Default);
    }
}

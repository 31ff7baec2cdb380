//! Query pipeline orchestration.
//!
//! Fixed stage order: AccessCheck → Retrieve → (Pseudonymize | Skip) →
//! Generate → Mask → Audit. AccessCheck is the only entry; a denial goes
//! straight to the terminal blocked outcome and no later stage runs. The
//! mode selects the pre-generation strategy only — display masking is
//! unconditional.
//!
//! Both execution contracts share one stage driver: batch collects the
//! step record and returns an aggregate, streaming additionally emits one
//! event per stage transition over an mpsc channel, followed by exactly
//! one terminal event even when a stage fails.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::access::AccessGate;
use crate::audit::{AuditRecord, AuditSink};
use crate::config::Config;
use crate::embedding::Embedder;
use crate::generate::Generator;
use crate::index::VectorIndex;
use crate::mask::{strip_markdown, Masker};
use crate::models::{
    PipelineStep, QueryEvent, QueryMode, QueryOutcome, QueryRequest, QueryResponse, SourceRef,
    StepStatus, TerminalEvent,
};
use crate::pii::PiiDetector;
use crate::pseudonym::{PseudonymState, Pseudonymizer};
use crate::search;

const STEP_ACCESS: &str = "access_check";
const STEP_RETRIEVE: &str = "retrieve";
const STEP_PSEUDONYMIZE: &str = "pseudonymize";
const STEP_GENERATE: &str = "generate";
const STEP_MASK: &str = "mask";
const STEP_AUDIT: &str = "audit";

const LAYER_ACCESS: &str = "identity-access";
const LAYER_RETRIEVAL: &str = "data-platform";
const LAYER_PRIVACY: &str = "data-protection";
const LAYER_GENERATION: &str = "llm";
const LAYER_AUDIT: &str = "audit";

/// Shown when retrieval yields nothing and generation is skipped.
pub const NO_CONTEXT_ANSWER: &str = "No information was found in the permitted sources.";
/// Terminal answer of a streamed access-denied query.
pub const DENIED_ANSWER: &str = "No sources are cleared for this role.";

pub struct Pipeline {
    gate: AccessGate,
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    pseudonymizer: Pseudonymizer,
    masker: Masker,
    generator: Arc<dyn Generator>,
    audit: Arc<dyn AuditSink>,
    top_k: usize,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gate: AccessGate,
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        recognizer: Arc<dyn crate::pii::EntityRecognizer>,
        generator: Arc<dyn Generator>,
        audit: Arc<dyn AuditSink>,
        top_k: usize,
    ) -> Self {
        Self {
            gate,
            index,
            embedder,
            pseudonymizer: Pseudonymizer::new(PiiDetector::new(recognizer.clone())),
            masker: Masker::new(PiiDetector::new(recognizer)),
            generator,
            audit,
            top_k,
        }
    }

    /// Assemble a pipeline from configuration: connect to the index store,
    /// load the vector index into memory, and instantiate the collaborators.
    pub async fn build(config: &Config) -> Result<Self> {
        let pool = crate::db::connect(config).await?;
        crate::db::apply_schema(&pool).await?;
        let index = VectorIndex::load(&pool).await?;
        pool.close().await;

        if index.is_empty() {
            tracing::warn!("vector index is empty; queries will return no passages");
        }

        Ok(Self::new(
            AccessGate::new(&config.roles.path),
            Arc::new(index),
            crate::embedding::create_embedder(&config.embedding)?,
            crate::pii::create_recognizer(&config.ner)?,
            crate::generate::create_generator(&config.generation)?,
            Arc::new(crate::audit::JsonlAuditSink::new(&config.audit.path)),
            config.retrieval.top_k,
        ))
    }

    /// Batch execution: all stages run to completion before the aggregate
    /// result is observable.
    pub async fn run(&self, req: &QueryRequest) -> Result<QueryOutcome> {
        self.execute(req, None).await
    }

    /// Streaming execution: one `Step` event after each stage completes,
    /// is skipped, or blocks, then exactly one `Final` event. A stage
    /// failure is folded into the terminal event; the stream never ends
    /// without one.
    pub async fn run_stream(&self, req: QueryRequest, tx: mpsc::Sender<QueryEvent>) {
        let terminal = match self.execute(&req, Some(&tx)).await {
            Ok(QueryOutcome::Completed(resp)) => TerminalEvent {
                answer: resp.answer,
                sources: resp.sources,
                error: None,
            },
            Ok(QueryOutcome::Denied { .. }) => TerminalEvent {
                answer: DENIED_ANSWER.to_string(),
                sources: Vec::new(),
                error: None,
            },
            Err(e) => TerminalEvent {
                answer: String::new(),
                sources: Vec::new(),
                error: Some(format!("{:#}", e)),
            },
        };
        let _ = tx.send(QueryEvent::Final(terminal)).await;
    }

    async fn execute(
        &self,
        req: &QueryRequest,
        progress: Option<&mpsc::Sender<QueryEvent>>,
    ) -> Result<QueryOutcome> {
        let mut steps: Vec<PipelineStep> = Vec::new();

        // AccessCheck: sole entry stage; empty resolution is a hard stop.
        let allowed = self.gate.resolve(&req.role);
        if allowed.is_empty() {
            let step = PipelineStep::new(STEP_ACCESS, LAYER_ACCESS, StepStatus::Blocked)
                .with_detail(format!("role '{}' has no permitted sources", req.role));
            emit(progress, &step).await;
            return Ok(QueryOutcome::Denied { step });
        }
        let step = PipelineStep::new(STEP_ACCESS, LAYER_ACCESS, StepStatus::Done).with_detail(
            format!(
                "role '{}' may read: {}",
                req.role,
                allowed.iter().cloned().collect::<Vec<_>>().join(", ")
            ),
        );
        emit(progress, &step).await;
        steps.push(step);

        // Retrieve
        let hits = search::retrieve(
            &self.index,
            self.embedder.as_ref(),
            &req.question,
            &allowed,
            self.top_k,
        )
        .await?;
        let step = PipelineStep::new(STEP_RETRIEVE, LAYER_RETRIEVAL, StepStatus::Done)
            .with_detail(format!("{} matching passage(s)", hits.len()));
        emit(progress, &step).await;
        steps.push(step);

        // Pseudonymize | Skip
        let mut contexts: Vec<String> = hits.iter().map(|h| h.chunk.text.clone()).collect();
        let step = if req.mode == QueryMode::Pseudonymize && !contexts.is_empty() {
            let mut state = PseudonymState::new();
            for ctx in contexts.iter_mut() {
                let (transformed, _) = self.pseudonymizer.pseudonymize(ctx, &mut state).await?;
                *ctx = transformed;
            }
            PipelineStep::new(STEP_PSEUDONYMIZE, LAYER_PRIVACY, StepStatus::Done)
                .with_detail(format!("{} context(s) pseudonymized", contexts.len()))
        } else {
            PipelineStep::new(STEP_PSEUDONYMIZE, LAYER_PRIVACY, StepStatus::Skipped)
        };
        emit(progress, &step).await;
        steps.push(step);

        // Generate
        let (raw_answer, step) = if contexts.is_empty() {
            (
                NO_CONTEXT_ANSWER.to_string(),
                PipelineStep::new(STEP_GENERATE, LAYER_GENERATION, StepStatus::Skipped)
                    .with_detail("no retrieved context"),
            )
        } else {
            let answer = self
                .generator
                .generate(&req.question, &contexts)
                .await
                .map_err(anyhow::Error::from)?;
            (
                answer,
                PipelineStep::new(STEP_GENERATE, LAYER_GENERATION, StepStatus::Done),
            )
        };
        emit(progress, &step).await;
        steps.push(step);

        // Mask: unconditional. Pseudonym labels are converted first, then
        // a raw detection pass catches anything the generator echoed from
        // the question or invented outside the labels.
        let mut answer = if req.mode == QueryMode::Pseudonymize {
            Masker::mask_pseudonym_labels(&raw_answer)
        } else {
            raw_answer
        };
        answer = self.masker.mask_raw(&answer).await?;
        let answer = strip_markdown(&answer);
        let step = PipelineStep::new(STEP_MASK, LAYER_PRIVACY, StepStatus::Done)
            .with_detail("answer redacted for display");
        emit(progress, &step).await;
        steps.push(step);

        // Audit
        let sources: Vec<SourceRef> = hits.iter().map(|h| SourceRef::from_chunk(&h.chunk)).collect();
        self.audit
            .append(&AuditRecord::new(
                &req.role,
                &req.question,
                &answer,
                sources.clone(),
            ))
            .await?;
        let step = PipelineStep::new(STEP_AUDIT, LAYER_AUDIT, StepStatus::Done)
            .with_detail(format!("{} source(s) logged", sources.len()));
        emit(progress, &step).await;
        steps.push(step);

        Ok(QueryOutcome::Completed(QueryResponse {
            answer,
            sources,
            pipeline: steps,
        }))
    }
}

async fn emit(progress: Option<&mpsc::Sender<QueryEvent>>, step: &PipelineStep) {
    if let Some(tx) = progress {
        // A consumer that went away must not abort the pipeline.
        let _ = tx.send(QueryEvent::Step(step.clone())).await;
    }
}

//! Workflow Driver
//!
//! Runs the fixed pipeline for one document: ingest, then the reading loop,
//! then the report. A checkpoint is written after ingestion, after every
//! reading iteration, and after every report stage. Failures inside a node
//! are recorded on `RunState::error` and stop the run; only checkpoint
//! persistence failures are returned as `Err`.

use std::sync::Arc;

use deep_reader_llm::ModelRoles;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::models::settings::DeepReaderConfig;
use crate::models::state::{RunStage, RunState};
use crate::services::knowledge::ingestion::DocumentIngestor;
use crate::services::knowledge::vector_store::EvidenceRetriever;
use crate::services::reading::{ReadingController, ReadingSettings, StepOutcome};
use crate::services::report::ReportPipeline;
use crate::utils::error::AppResult;

use super::checkpointer::{Checkpointer, RunCheckpoint};

/// Snapshots retained per thread after each save.
const KEEP_CHECKPOINTS: usize = 1;

/// One document run request.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Canonical document path; also the vector-store key.
    pub document_path: String,
    /// Checkpoint key derived from the document path.
    pub thread_id: String,
    pub content: String,
    pub question: Option<String>,
    pub role: Option<String>,
    /// Ignore any unfinished checkpoint.
    pub fresh: bool,
}

/// Progress summary of the latest checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStatus {
    pub checkpoint_id: String,
    pub stage: RunStage,
    pub segments_read: usize,
    pub segments_total: usize,
    pub error: Option<String>,
    pub updated_at: String,
}

impl RunStatus {
    pub fn from_checkpoint(cp: &RunCheckpoint) -> Self {
        Self {
            checkpoint_id: cp.id.clone(),
            stage: cp.stage,
            segments_read: cp.state.read_count(),
            segments_total: cp.state.reading_snippets.len(),
            error: cp.state.error.clone(),
            updated_at: cp.state.updated_at.clone(),
        }
    }
}

/// Latest status for `thread_id`, if it was ever run.
pub async fn run_status(
    checkpointer: &dyn Checkpointer,
    thread_id: &str,
) -> AppResult<Option<RunStatus>> {
    Ok(checkpointer
        .load(thread_id)
        .await?
        .map(|cp| RunStatus::from_checkpoint(&cp)))
}

pub struct WorkflowDriver {
    roles: Arc<ModelRoles>,
    ingestor: Arc<DocumentIngestor>,
    checkpointer: Arc<dyn Checkpointer>,
    config: DeepReaderConfig,
}

impl WorkflowDriver {
    pub fn new(
        roles: Arc<ModelRoles>,
        ingestor: Arc<DocumentIngestor>,
        checkpointer: Arc<dyn Checkpointer>,
        config: DeepReaderConfig,
    ) -> Self {
        Self {
            roles,
            ingestor,
            checkpointer,
            config,
        }
    }

    /// Resume the latest unfinished run for the document, or start a new
    /// one. A resumed run gets the current document text and its previous
    /// error cleared.
    pub async fn prepare(&self, request: &RunRequest) -> AppResult<RunState> {
        if !request.fresh {
            if let Some(cp) = self.checkpointer.load(&request.thread_id).await? {
                if cp.is_resumable() {
                    info!(
                        checkpoint = %cp.id,
                        stage = %cp.stage,
                        read = cp.state.read_count(),
                        total = cp.state.reading_snippets.len(),
                        "Resuming run from checkpoint"
                    );
                    let mut state = cp.state;
                    state.raw_markdown_content = request.content.clone();
                    state.error = None;
                    state.touch();
                    return Ok(state);
                }
                info!("Previous run completed, starting a new run");
            }
        }

        Ok(RunState::new(
            request.document_path.clone(),
            request.question.clone(),
            request.role.clone(),
        )
        .with_content(request.content.clone()))
    }

    /// Drive the run to completion or to its first error.
    pub async fn run(&self, request: &RunRequest) -> AppResult<RunState> {
        let mut state = self.prepare(request).await?;
        self.drive(&request.thread_id, &mut state).await?;
        Ok(state)
    }

    /// Continue `state` from its current stage.
    pub async fn drive(&self, thread_id: &str, state: &mut RunState) -> AppResult<()> {
        let mut retriever: Option<Arc<dyn EvidenceRetriever>> = None;

        loop {
            if state.is_failed() {
                error!(stage = %state.stage, error = state.error.as_deref().unwrap_or(""), "Run stopped");
                return Ok(());
            }

            match state.stage {
                RunStage::Ingest => {
                    match self.ingestor.ingest(&state.document_path, &state.raw_markdown_content).await {
                        Ok(report) => {
                            state.db_name = Some(report.store_name.clone());
                            state.ingest = Some(report);
                            state.stage = RunStage::Reading;
                        }
                        Err(e) => state.fail(format!("Ingestion failed: {}", e)),
                    }
                    self.checkpoint(thread_id, state).await?;
                }
                RunStage::Reading => {
                    let Some(store) = self.retriever(&mut retriever, state).await else {
                        self.checkpoint(thread_id, state).await?;
                        continue;
                    };
                    let controller = ReadingController::new(
                        Arc::clone(&self.roles),
                        store,
                        self.reading_settings(),
                    );
                    self.read_all(&controller, thread_id, state).await?;
                }
                RunStage::Report => {
                    let Some(store) = self.retriever(&mut retriever, state).await else {
                        self.checkpoint(thread_id, state).await?;
                        continue;
                    };
                    let pipeline = ReportPipeline::new(
                        Arc::clone(&self.roles),
                        store,
                        self.config.mode_settings(),
                        self.config.retrieval_k,
                    );
                    self.write_report(&pipeline, thread_id, state).await?;
                }
                RunStage::Completed => {
                    info!("Run completed");
                    return Ok(());
                }
            }
        }
    }

    /// Reading loop. Checks the error field before completion after every
    /// iteration.
    async fn read_all(
        &self,
        controller: &ReadingController,
        thread_id: &str,
        state: &mut RunState,
    ) -> AppResult<()> {
        if !state.reading_initialized {
            if let Err(e) = controller.initialize(state) {
                state.fail(format!("Reading initialization failed: {}", e));
                return self.checkpoint(thread_id, state).await;
            }
        }

        loop {
            if state.is_failed() {
                return Ok(());
            }
            if state.reading_completed {
                state.stage = RunStage::Report;
                return self.checkpoint(thread_id, state).await;
            }
            match controller.step(state).await {
                Ok(StepOutcome::Completed) => {}
                Ok(_) => self.checkpoint(thread_id, state).await?,
                Err(e) => {
                    let segment = state.next_unread().map_or(0, |i| i + 1);
                    state.fail(format!("Reading failed at segment {}: {}", segment, e));
                    self.checkpoint(thread_id, state).await?;
                }
            }
        }
    }

    async fn write_report(
        &self,
        pipeline: &ReportPipeline,
        thread_id: &str,
        state: &mut RunState,
    ) -> AppResult<()> {
        loop {
            match pipeline.advance(state).await {
                Ok(Some(_)) => self.checkpoint(thread_id, state).await?,
                Ok(None) => {
                    state.stage = RunStage::Completed;
                    state.touch();
                    return self.checkpoint(thread_id, state).await;
                }
                Err(e) => {
                    state.fail(format!("Report generation failed: {}", e));
                    return self.checkpoint(thread_id, state).await;
                }
            }
        }
    }

    /// Open the document's vector store once per drive. A failure is
    /// recorded on the state.
    async fn retriever(
        &self,
        cached: &mut Option<Arc<dyn EvidenceRetriever>>,
        state: &mut RunState,
    ) -> Option<Arc<dyn EvidenceRetriever>> {
        if let Some(store) = cached {
            return Some(Arc::clone(store));
        }
        match self.ingestor.open_store(&state.document_path).await {
            Ok(store) => {
                let store: Arc<dyn EvidenceRetriever> = Arc::new(store);
                *cached = Some(Arc::clone(&store));
                Some(store)
            }
            Err(e) => {
                warn!(error = %e, "Could not open vector store");
                state.fail(format!("Vector store unavailable: {}", e));
                None
            }
        }
    }

    fn reading_settings(&self) -> ReadingSettings {
        ReadingSettings {
            strategy: self.config.parsing_strategy,
            chunk_size: self.config.snippet_chunk_size,
            overlap_ratio: self.config.snippet_overlap_ratio,
            questions_per_chapter: self.config.mode_settings().reading_agent_questions,
            retrieval_k: self.config.retrieval_k,
        }
    }

    /// Save a snapshot and drop the older ones; resume only reads the
    /// newest.
    async fn checkpoint(&self, thread_id: &str, state: &RunState) -> AppResult<()> {
        self.checkpointer
            .save(RunCheckpoint::new(thread_id, state.clone()))
            .await?;
        let pruned = self.checkpointer.prune(thread_id, KEEP_CHECKPOINTS).await?;
        if pruned > 0 {
            debug!(thread_id, pruned, "Pruned older checkpoints");
        }
        Ok(())
    }
}

//! Application State
//!
//! The services one CLI invocation needs, built once from the loaded
//! configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use deep_reader_core::ProxyConfig;
use deep_reader_llm::{create_provider, LlmProvider, ModelRole, ModelRoles};
use tracing::{debug, info, warn};

use crate::models::settings::{DeepReaderConfig, LlmSettings, RoleConfig};
use crate::services::knowledge::chunker::RagChunker;
use crate::services::knowledge::embedding_provider::{create_embedding_provider, EmbeddingProvider};
use crate::services::knowledge::ingestion::DocumentIngestor;
use crate::services::workflow::{Checkpointer, SqliteCheckpointer, WorkflowDriver};
use crate::storage::{ConfigService, Database};
use crate::utils::error::AppResult;
use crate::utils::paths::{checkpoint_db_path, ensure_dir, memory_dir, output_dir};

pub struct AppState {
    config: DeepReaderConfig,
    data_dir: PathBuf,
    roles: Arc<ModelRoles>,
    embedder: Arc<dyn EmbeddingProvider>,
    ingestor: Arc<DocumentIngestor>,
    checkpointer: Arc<dyn Checkpointer>,
}

impl AppState {
    /// Build every service from `config_service`: model roles, the
    /// embedding provider, the ingestor, and the SQLite checkpointer under
    /// the data directory.
    pub fn initialize(config_service: ConfigService) -> AppResult<Self> {
        let data_dir = config_service.data_dir()?;
        let config = config_service.into_config();
        ensure_dir(&data_dir)?;

        let roles = build_roles(&config.llm, config.proxy.as_ref(), config.max_structured_attempts)?;

        let embedder = create_embedding_provider(
            &config
                .embedding
                .to_provider_config(config.embedding_batch_size, config.proxy.as_ref()),
        )?;
        info!(
            embedder = embedder.display_name(),
            provider = %embedder.provider_type(),
            local = embedder.is_local(),
            dimension = embedder.dimension(),
            "Configured embedding provider"
        );

        let db = Database::open(&checkpoint_db_path(&data_dir))?;
        let checkpointer: Arc<dyn Checkpointer> =
            Arc::new(SqliteCheckpointer::new(Arc::new(db.pool().clone()))?);

        info!(
            data_dir = %data_dir.display(),
            mode = %config.mode,
            strategy = %config.parsing_strategy,
            "Initialized application state"
        );
        Self::from_parts(config, data_dir, roles, embedder, checkpointer)
    }

    /// Assemble the state from already-built services.
    pub fn from_parts(
        config: DeepReaderConfig,
        data_dir: PathBuf,
        roles: ModelRoles,
        embedder: Arc<dyn EmbeddingProvider>,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> AppResult<Self> {
        let ingestor = DocumentIngestor::new(
            memory_dir(&data_dir),
            Arc::clone(&embedder),
            RagChunker::new(config.rag_chunk_size, config.rag_chunk_overlap)?,
            config.embedding_batch_size,
        );
        Ok(Self {
            config,
            data_dir,
            roles: Arc::new(roles),
            embedder,
            ingestor: Arc::new(ingestor),
            checkpointer,
        })
    }

    pub fn config(&self) -> &DeepReaderConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Root for per-run artifact directories.
    pub fn output_root(&self) -> PathBuf {
        output_dir(&self.data_dir)
    }

    pub fn ingestor(&self) -> &Arc<DocumentIngestor> {
        &self.ingestor
    }

    pub fn checkpointer(&self) -> &Arc<dyn Checkpointer> {
        &self.checkpointer
    }

    /// Check that every configured model and the embedding provider answer,
    /// so an unreachable capability fails the command before any work.
    pub async fn health_check(&self) -> AppResult<()> {
        let mut checked: Vec<&Arc<dyn LlmProvider>> = Vec::new();
        for role in [ModelRole::Fast, ModelRole::Smart, ModelRole::Writer, ModelRole::Search] {
            let provider = self.roles.provider(role);
            if checked.iter().any(|seen| Arc::ptr_eq(seen, provider)) {
                continue;
            }
            provider.health_check().await.map_err(|e| {
                warn!(
                    %role,
                    provider = provider.name(),
                    model = provider.model(),
                    error = %e,
                    "Model health check failed"
                );
                e
            })?;
            checked.push(provider);
        }

        self.embedder.health_check().await.map_err(|e| {
            warn!(
                embedder = self.embedder.display_name(),
                error = %e,
                "Embedding health check failed"
            );
            e
        })?;
        debug!(models = checked.len(), "Health check passed");
        Ok(())
    }

    pub fn driver(&self) -> WorkflowDriver {
        WorkflowDriver::new(
            Arc::clone(&self.roles),
            Arc::clone(&self.ingestor),
            Arc::clone(&self.checkpointer),
            self.config.clone(),
        )
    }
}

/// One provider per configured role, plus the optional search role.
pub fn build_roles(
    settings: &LlmSettings,
    proxy: Option<&ProxyConfig>,
    max_attempts: usize,
) -> AppResult<ModelRoles> {
    let build = |role: &str, config: &RoleConfig| -> AppResult<Arc<dyn LlmProvider>> {
        let provider = create_provider(config.to_provider_config(proxy))?;
        debug!(role, provider = provider.name(), model = provider.model(), "Configured model role");
        Ok(provider)
    };

    let mut roles = ModelRoles::new(
        build("fast", &settings.fast)?,
        build("smart", &settings.smart)?,
        build("writer", &settings.writer)?,
    )
    .with_max_attempts(max_attempts);
    if let Some(search) = &settings.search {
        roles = roles.with_search(build("search", search)?);
    }
    Ok(roles)
}

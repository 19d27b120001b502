//! Top-level coordinator wiring C1-C12 into the RPC/CLI surface named in
//! SPEC_FULL §6. The CLI/daemon/IPC transport itself is an explicit
//! non-goal (SPEC_FULL §1); this module is the thin, transport-agnostic
//! service layer a front-end would call into.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::{load_config, VibescoutConfig};
use crate::error::{StoreError, VibescoutError};
use crate::events::{EventBus, IndexingProgress};
use crate::extractor::ExtractorRegistry;
use crate::gitcollector::GitCollector;
use crate::indexer::embedder::EmbedderPool;
use crate::indexer::reranker::Reranker;
use crate::models::{DependencyRecord, RankedResult, WatchListEntry};
use crate::pipeline::{IndexOptions, IndexSummary, Pipeline};
use crate::providers::{ChatTurn, EmbeddingProvider, FastEmbedProvider, OllamaProvider, SummarizerProvider};
use crate::search::{SearchFrontEnd, SearchOptions};
use crate::storage::VectorStore;
use crate::taskqueue::TaskQueue;
use crate::throttler::{Throttler, ThrottlerConfig};
use crate::watcher::FileWatcherManager;

/// One entry in `findSymbolUsages`'s result: a file whose imports or
/// exports reference the symbol.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SymbolUsage {
    pub file_path: String,
    pub via_import: bool,
    pub via_export: bool,
}

/// Resolves the per-user data directory: `$VIBESCOUT_DB_PATH`, else
/// `$HOME/.vibescout/data` (SPEC_FULL §6). Test code should prefer
/// [`Service::open_at`] with an explicit path instead of relying on the
/// environment.
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("VIBESCOUT_DB_PATH") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vibescout")
        .join("data")
}

/// Resolves the per-user config home: `$VIBESCOUT_HOME`, else `$HOME/.vibescout`.
pub fn default_home_dir() -> PathBuf {
    if let Ok(path) = std::env::var("VIBESCOUT_HOME") {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vibescout")
}

/// The running process's wiring of every core component: storage,
/// pipeline, task queue, watcher, and search front-end, all sharing one
/// `VectorStore` connection and one pair of provider throttlers.
pub struct Service {
    pub config: VibescoutConfig,
    pub store: Arc<Mutex<VectorStore>>,
    pub events: Arc<EventBus>,
    pub queue: Arc<TaskQueue>,
    pub watcher: Arc<FileWatcherManager>,
    pub pipeline: Arc<Pipeline>,
    pub search: Arc<SearchFrontEnd>,
    pub embedder: Arc<dyn EmbeddingProvider>,
}

impl Service {
    /// Opens the service against the default data/config directories.
    pub async fn open() -> anyhow::Result<Self> {
        let home = default_home_dir();
        tokio::fs::create_dir_all(&home).await.ok();
        Self::open_at(&home, &default_data_dir()).await
    }

    /// Opens the service against explicit config/data directories (used
    /// directly by tests so they never touch `$HOME`).
    pub async fn open_at(home: &Path, data_dir: &Path) -> anyhow::Result<Self> {
        let config = load_config(home);

        let embedder_pool = Arc::new(EmbedderPool::with_config(
            config.embedding.pool_size.max(1),
            &config.embedding,
        )?);
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(FastEmbedProvider::new(embedder_pool));

        let summarizer: Arc<dyn SummarizerProvider> = Arc::new(OllamaProvider::new(
            config.summarizer.clone(),
            config.prompts.clone(),
        ));

        let reranker = if config.reranker.enabled {
            match Reranker::with_config(&config.reranker) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!("reranker unavailable, continuing without it: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let data_dir_str = data_dir
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("non-UTF8 data directory path"))?;
        let store = Arc::new(Mutex::new(
            VectorStore::open(data_dir_str, embedder.dimension()).await?,
        ));

        let events = Arc::new(EventBus::new());
        let queue = Arc::new(TaskQueue::new(crate::taskqueue::DEFAULT_MAX_CONCURRENT_TASKS));
        let watcher = Arc::new(FileWatcherManager::new(store.clone(), queue.clone(), events.clone()));

        let embed_throttler = Throttler::new(
            format!("embed:{}", embedder.name()),
            ThrottlerConfig::default(),
        );
        let summarize_throttler = Throttler::new(
            format!("summarize:{}", summarizer.name()),
            ThrottlerConfig::default(),
        );

        let pipeline = Arc::new(Pipeline {
            registry: ExtractorRegistry::new(),
            git: GitCollector::new(),
            store: store.clone(),
            events: events.clone(),
            embedder: embedder.clone(),
            summarizer: summarizer.clone(),
            embed_throttler: embed_throttler.clone(),
            summarize_throttler,
            config: config.clone(),
            run_control: Arc::new(crate::pipeline::RunControl::new()),
        });

        let search = Arc::new(SearchFrontEnd {
            store: store.clone(),
            embedder: embedder.clone(),
            summarizer,
            embed_throttler,
            reranker,
            config: config.search.clone(),
        });

        let service = Self {
            config,
            store,
            events,
            queue,
            watcher,
            pipeline,
            search,
            embedder,
        };
        service.spawn_task_worker();
        service.spawn_event_bridge();
        Ok(service)
    }

    /// Drains the task queue (C8), dispatching each popped task to the
    /// pipeline (C7). Runs for the lifetime of the process.
    fn spawn_task_worker(&self) {
        let queue = self.queue.clone();
        let pipeline = self.pipeline.clone();
        tokio::spawn(async move {
            loop {
                let Some(task) = queue.pop_next() else {
                    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                    continue;
                };
                let outcome = dispatch_task(&pipeline, &queue, &task).await;
                match outcome {
                    Ok(()) => queue.complete(task.id),
                    Err(e) => queue.fail(task.id, e.to_string(), std::time::Duration::from_secs(1)),
                }
            }
        });
    }

    /// Forwards task-queue transitions (C8) into the shared event bus
    /// (C11) so a single subscription sees progress, task, and log
    /// events together.
    fn spawn_event_bridge(&self) {
        let mut rx = self.queue.subscribe();
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                events.publish_task_event(event);
            }
        });
    }

    // -----------------------------------------------------------------
    // RPC surface (SPEC_FULL §6)
    // -----------------------------------------------------------------

    pub async fn index_folder(
        &self,
        folder_path: &Path,
        project_name: Option<String>,
        collection: String,
        summarize: bool,
        background: bool,
        force: bool,
    ) -> Result<Option<IndexSummary>, VibescoutError> {
        let options = IndexOptions {
            project_name,
            collection,
            summarize,
            background,
            force,
            cancel_check: None,
        };
        if background {
            let payload = serde_json::json!({
                "folder_path": folder_path.to_string_lossy(),
                "project_name": options.project_name,
                "collection": options.collection,
                "summarize": options.summarize,
                "force": options.force,
            })
            .to_string();
            self.queue.enqueue("index_folder", payload, 1);
            return Ok(None);
        }
        let summary = self
            .pipeline
            .index_folder(folder_path, options)
            .await
            .map_err(|e| VibescoutError::Store(StoreError::Other(e.to_string())))?;
        Ok(Some(summary))
    }

    pub fn get_indexing_status(&self) -> IndexingProgress {
        self.events.snapshot()
    }

    /// Pauses the active `indexFolder` run: in-flight workers finish their
    /// current file, then sleep in 500ms intervals until resumed.
    pub fn pause_indexing(&self) {
        self.pipeline.pause_indexing();
    }

    pub fn resume_indexing(&self) {
        self.pipeline.resume_indexing();
    }

    /// Requests a cooperative stop of the active `indexFolder` run.
    /// Irreversible — start a fresh run to index again.
    pub fn stop_indexing(&self) {
        self.pipeline.stop_indexing();
    }

    pub async fn search_code(&self, query: &str, opts: SearchOptions) -> Result<Vec<RankedResult>, VibescoutError> {
        self.search.search(query, opts).await
    }

    pub async fn chat(
        &self,
        query: &str,
        opts: SearchOptions,
        history: &[ChatTurn],
    ) -> Result<String, VibescoutError> {
        self.search.chat(query, opts, history).await
    }

    pub async fn move_project(&self, project_name: &str, new_collection: &str) -> Result<(), VibescoutError> {
        self.store
            .lock()
            .await
            .move_project_to_collection(project_name, new_collection)
            .await
            .map_err(VibescoutError::Store)
    }

    pub async fn get_file_dependencies(&self, file_path: &str) -> Result<Option<DependencyRecord>, VibescoutError> {
        self.store
            .lock()
            .await
            .get_dependency(file_path)
            .await
            .map_err(VibescoutError::Store)
    }

    pub async fn find_symbol_usages(&self, symbol_name: &str) -> Result<Vec<SymbolUsage>, VibescoutError> {
        let deps = self
            .store
            .lock()
            .await
            .list_dependencies()
            .await
            .map_err(VibescoutError::Store)?;
        let mut out = Vec::new();
        for dep in deps {
            let via_import = dep.imports.iter().any(|edge| edge.symbols.contains(symbol_name));
            let via_export = dep.exports.iter().any(|e| e == symbol_name);
            if via_import || via_export {
                out.push(SymbolUsage {
                    file_path: dep.file_path,
                    via_import,
                    via_export,
                });
            }
        }
        Ok(out)
    }

    pub async fn list_knowledge_base(&self) -> Result<std::collections::BTreeMap<String, Vec<String>>, VibescoutError> {
        self.store.lock().await.list_projects().await.map_err(VibescoutError::Store)
    }

    pub async fn watch_folder(
        &self,
        folder_path: &Path,
        project_name: String,
        collection: String,
    ) -> Result<(), VibescoutError> {
        self.store
            .lock()
            .await
            .add_watch(&WatchListEntry {
                folder_path: folder_path.to_string_lossy().into_owned(),
                project_name: project_name.clone(),
                collection: collection.clone(),
            })
            .await
            .map_err(VibescoutError::Store)?;
        let indexable = self.pipeline.registry.indexable_extensions();
        self.watcher
            .watch_project(&project_name, folder_path.to_path_buf(), collection, &self.config, indexable);
        Ok(())
    }

    pub async fn read_code_range(&self, file_path: &str, start_line: u32, end_line: u32) -> Result<String, VibescoutError> {
        VectorStore::read_code_range(file_path, start_line, end_line)
            .await
            .map_err(|e| VibescoutError::Store(StoreError::Other(e.to_string())))
    }

    pub fn get_current_model(&self) -> String {
        self.embedder.name().to_string()
    }

    /// Validates a requested model switch against the StoredModel
    /// invariant (SPEC_FULL §3/§8 I-3): rejected when vectors already
    /// exist under a different model. Actually loading a different
    /// embedding model requires reinitializing the embedder pool, which
    /// callers do by restarting the process with the new
    /// `embedding.model` config value — this call only performs the
    /// up-front compatibility check.
    pub async fn set_model(&self, model_name: &str) -> Result<(), VibescoutError> {
        let store = self.store.lock().await;
        if let Some(stored) = store.stored_model().await.map_err(VibescoutError::Store)? {
            if stored != model_name {
                return Err(VibescoutError::Store(StoreError::ModelMismatch {
                    stored,
                    current: model_name.to_string(),
                }));
            }
        }
        Ok(())
    }

    pub async fn clear_index(&self) -> Result<(), VibescoutError> {
        self.store.lock().await.clear().await.map_err(VibescoutError::Store)
    }
}

/// Builds the per-task `cancelRequested` check (C8) the pipeline polls
/// between file units, so an `active` task cancelled mid-flight (queue
/// `cancel(id)`) short-circuits a running `indexFolder`/`reindexFile`
/// dispatch instead of running to completion regardless.
fn cancel_check_for(queue: &Arc<TaskQueue>, task_id: u64) -> crate::pipeline::CancelCheck {
    let queue = queue.clone();
    Arc::new(move || queue.get(task_id).map(|t| t.cancel_requested).unwrap_or(true))
}

async fn dispatch_task(
    pipeline: &Arc<Pipeline>,
    queue: &Arc<TaskQueue>,
    task: &crate::taskqueue::Task,
) -> anyhow::Result<()> {
    match task.kind.as_str() {
        "reindex_file" => {
            let payload: serde_json::Value = serde_json::from_str(&task.payload)?;
            let path = payload["path"].as_str().unwrap_or_default();
            let project_name = payload["project_name"].as_str().unwrap_or_default();
            let collection = payload["collection"].as_str().unwrap_or("default");
            let outcome = pipeline
                .index_single_file(
                    Path::new(path),
                    project_name,
                    collection,
                    Some(cancel_check_for(queue, task.id)),
                )
                .await?;
            match outcome {
                crate::pipeline::FileOutcome::Failed => Err(anyhow::anyhow!("failed to index {path}")),
                _ => Ok(()),
            }
        }
        "index_folder" | "index_files" | "retry_failed" => {
            let payload: serde_json::Value = serde_json::from_str(&task.payload)?;
            let folder_path = payload["folder_path"].as_str().unwrap_or_default();
            let options = IndexOptions {
                project_name: payload["project_name"].as_str().map(|s| s.to_string()),
                collection: payload["collection"].as_str().unwrap_or("default").to_string(),
                summarize: payload["summarize"].as_bool().unwrap_or(true),
                background: true,
                force: payload["force"].as_bool().unwrap_or(false),
                cancel_check: Some(cancel_check_for(queue, task.id)),
            };
            pipeline.index_folder(Path::new(folder_path), options).await?;
            Ok(())
        }
        other => Err(anyhow::anyhow!("unknown task kind: {other}")),
    }
}

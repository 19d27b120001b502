//! Indexing Pipeline (component C7): turns a folder on disk into rows in
//! the vector store. Grounded on `indexer/pipeline.rs`'s SEDA staged
//! design (bounded concurrency, cancellation-aware worker loop),
//! generalized to the exact step order SPEC_FULL §4.7 names — including
//! the two-phase parent/chunk summarization the teacher's pipeline
//! doesn't split the same way.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use md5::Digest;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};

use crate::config::{FileTypeConfig, VibescoutConfig};
use crate::events::{EventBus, IndexingStatus};
use crate::extractor::ExtractorRegistry;
use crate::gitcollector::GitCollector;
use crate::ignore_engine::IgnoreEngine;
use crate::models::{Block, DependencyRecord, GitEnrichment, VectorRecord};
use crate::providers::{BlockKind, EmbeddingProvider, SummarizeContext, SummarizerProvider};
use crate::storage::VectorStore;
use crate::throttler::Throttler;

/// Default worker concurrency for the per-file stage (SPEC_FULL §4.7).
pub const DEFAULT_FILE_CONCURRENCY: usize = 16;
/// Enumeration depth cap, deep enough for any real project tree while
/// bounding pathological symlink loops.
pub const MAX_WALK_DEPTH: usize = 30;
const FILE_RETRY_ATTEMPTS: usize = 3;
const FILE_RETRY_DELAYS_MS: [u64; 3] = [1_000, 2_000, 4_000];
const CONTENT_PREVIEW_CHARS: usize = 500;
/// How long a worker sleeps between checks of `isPaused` (SPEC_FULL §4.7/§5).
const PAUSE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// A task-queue-backed check a worker consults between file units so an
/// `active` task's `cancelRequested` flag (C8) can short-circuit a bulk run.
pub type CancelCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Process-global pause/stop flags every file worker observes between
/// units of work (SPEC_FULL §5 "Suspension points" / "Cancellation
/// semantics"). Pausing is reversible; stopping is not — once set, a
/// worker finishes its current file and returns without picking up another.
#[derive(Default)]
pub struct RunControl {
    paused: AtomicBool,
    stopping: AtomicBool,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, AtomicOrdering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, AtomicOrdering::SeqCst);
    }

    pub fn request_stop(&self) {
        self.stopping.store(true, AtomicOrdering::SeqCst);
    }

    /// Clears both flags, e.g. before a fresh `indexFolder` run starts.
    pub fn reset(&self) {
        self.paused.store(false, AtomicOrdering::SeqCst);
        self.stopping.store(false, AtomicOrdering::SeqCst);
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(AtomicOrdering::SeqCst)
    }

    fn is_paused(&self) -> bool {
        self.paused.load(AtomicOrdering::SeqCst)
    }

    /// Sleeps in 500ms intervals while paused. Returns `false` if a stop
    /// was requested (either before or while waiting), meaning the caller
    /// should abandon the unit of work rather than proceed.
    async fn wait_while_paused(&self) -> bool {
        while self.is_paused() {
            if self.is_stopping() {
                return false;
            }
            tokio::time::sleep(PAUSE_POLL_INTERVAL).await;
        }
        !self.is_stopping()
    }
}

/// `Stopped` takes priority over the failure-count-based variants: a run
/// that was asked to stop reports that regardless of whether files had
/// already failed before the stop was requested.
fn finish_status(run_control: &RunControl, failed_files: usize) -> IndexingStatus {
    if run_control.is_stopping() {
        IndexingStatus::Stopped
    } else if failed_files > 0 {
        IndexingStatus::CompletedWithErrors
    } else {
        IndexingStatus::Completed
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("an indexing run is already active")]
    AlreadyActive,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Store(#[from] crate::error::StoreError),
}

#[derive(Clone, Default)]
pub struct IndexOptions {
    pub project_name: Option<String>,
    pub collection: String,
    pub summarize: bool,
    pub background: bool,
    pub force: bool,
    /// Consulted between file units; `Some(check)` where `check()` returns
    /// `true` once the backing task's `cancelRequested` flag (C8) is set.
    pub cancel_check: Option<CancelCheck>,
}

impl IndexOptions {
    pub fn new() -> Self {
        Self {
            project_name: None,
            collection: "default".to_string(),
            summarize: true,
            background: false,
            force: false,
            cancel_check: None,
        }
    }
}

impl std::fmt::Debug for IndexOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexOptions")
            .field("project_name", &self.project_name)
            .field("collection", &self.collection)
            .field("summarize", &self.summarize)
            .field("background", &self.background)
            .field("force", &self.force)
            .field("cancel_check", &self.cancel_check.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct IndexSummary {
    pub project_name: String,
    pub total_files: usize,
    pub processed_files: usize,
    pub skipped_files: usize,
    pub failed_files: usize,
    pub pruned_files: usize,
}

/// The wiring for one `indexFolder` run: every component C7 depends on,
/// shared across the process rather than rebuilt per call.
pub struct Pipeline {
    pub registry: ExtractorRegistry,
    pub git: GitCollector,
    pub store: Arc<Mutex<VectorStore>>,
    pub events: Arc<EventBus>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub summarizer: Arc<dyn SummarizerProvider>,
    pub embed_throttler: Throttler,
    pub summarize_throttler: Throttler,
    pub config: VibescoutConfig,
    pub run_control: Arc<RunControl>,
}

impl Pipeline {
    /// Sets the process-global pause flag and reflects it in the shared
    /// progress snapshot. Reversible via [`Pipeline::resume_indexing`].
    pub fn pause_indexing(&self) {
        self.run_control.pause();
        self.events.set_status(IndexingStatus::Paused);
    }

    pub fn resume_indexing(&self) {
        self.run_control.resume();
        self.events.set_status(IndexingStatus::Indexing);
    }

    /// Requests a cooperative stop: in-flight file units finish, no new
    /// ones start. Not reversible — a fresh `indexFolder` call is needed
    /// to index again.
    pub fn stop_indexing(&self) {
        self.run_control.request_stop();
        self.events.set_status(IndexingStatus::Stopping);
    }

    pub async fn index_folder(
        &self,
        folder_path: &Path,
        options: IndexOptions,
    ) -> Result<IndexSummary, PipelineError> {
        self.run_control.reset();
        let root = std::fs::canonicalize(folder_path)?;
        let project_name = options.project_name.clone().unwrap_or_else(|| {
            root.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "project".to_string())
        });

        if options.force {
            self.store.lock().await.delete_by_project(&project_name).await?;
        }

        let ignore = IgnoreEngine::build(&root, &self.config.indexer.ignore);
        let indexable = self.registry.indexable_extensions();
        let files = enumerate_files(&root, &ignore, &indexable, MAX_WALK_DEPTH);

        let existing_hashes: HashMap<String, String> = self
            .store
            .lock()
            .await
            .file_hashes(&project_name)
            .await?
            .into_iter()
            .collect();
        let current_paths: std::collections::HashSet<String> = files
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let mut pruned_files = 0usize;
        for stale in existing_hashes.keys().filter(|p| !current_paths.contains(*p)) {
            self.store.lock().await.delete_by_file(stale).await?;
            pruned_files += 1;
        }

        if !self.events.start_indexing(project_name.clone(), files.len()) {
            return Err(PipelineError::AlreadyActive);
        }

        let git_enrichment = self.git.collect(&root, &files);

        let semaphore = Arc::new(Semaphore::new(
            self.config.indexer.parallel_workers.unwrap_or(DEFAULT_FILE_CONCURRENCY).max(1),
        ));

        let mut handles = Vec::with_capacity(files.len());
        for file in files {
            let permit = semaphore.clone();
            let enrichment = git_enrichment.get(&file).cloned().unwrap_or_default();
            let existing_hash = existing_hashes.get(&file.to_string_lossy().into_owned()).cloned();
            let ctx = FileContext {
                project_name: project_name.clone(),
                collection: options.collection.clone(),
                summarize: options.summarize,
                git: enrichment,
                existing_hash,
                cancel_check: options.cancel_check.clone(),
            };
            let this = self;
            handles.push(async move {
                let _permit = permit.acquire_owned().await.ok();
                this.process_file_with_retry(&file, &ctx).await
            });
        }

        let outcomes = futures::future::join_all(handles).await;
        let mut summary = IndexSummary {
            project_name: project_name.clone(),
            total_files: outcomes.len(),
            pruned_files,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                FileOutcome::Processed => summary.processed_files += 1,
                FileOutcome::Skipped => summary.skipped_files += 1,
                FileOutcome::Failed => summary.failed_files += 1,
            }
        }

        self.events.finish_indexing(finish_status(&self.run_control, summary.failed_files));
        Ok(summary)
    }

    /// Indexes (or re-indexes) a single file, the variant the file
    /// watcher (C9) uses for incremental updates outside a full
    /// `indexFolder` run.
    pub async fn index_single_file(
        &self,
        file: &Path,
        project_name: &str,
        collection: &str,
        cancel_check: Option<CancelCheck>,
    ) -> Result<FileOutcome, PipelineError> {
        let root = file.parent().unwrap_or(file).to_path_buf();
        let git = self.git.collect(&root, std::slice::from_ref(&file.to_path_buf()));
        let enrichment = git.get(file).cloned().unwrap_or_default();
        let ctx = FileContext {
            project_name: project_name.to_string(),
            collection: collection.to_string(),
            summarize: true,
            git: enrichment,
            existing_hash: None,
            cancel_check,
        };
        Ok(self.process_file_with_retry(file, &ctx).await)
    }

    /// Checked once per file unit before any work starts: sleeps while
    /// `isPaused`, and reports either a stop request or the task-level
    /// `cancelRequested` flag as the unit being abandoned rather than
    /// processed (SPEC_FULL §4.7/§4.8/§5).
    async fn process_file_with_retry(&self, file: &Path, ctx: &FileContext) -> FileOutcome {
        if !self.run_control.wait_while_paused().await {
            return FileOutcome::Skipped;
        }
        if let Some(check) = &ctx.cancel_check {
            if check() {
                return FileOutcome::Skipped;
            }
        }

        self.events.file_started(&file.to_string_lossy());
        let mut last_err: Option<String> = None;
        for attempt in 0..FILE_RETRY_ATTEMPTS {
            match self.process_file(file, ctx).await {
                Ok(outcome) => {
                    match outcome {
                        FileOutcome::Processed => self.events.file_completed(&file.to_string_lossy()),
                        FileOutcome::Skipped => self.events.file_skipped(&file.to_string_lossy()),
                        FileOutcome::Failed => {}
                    }
                    return outcome;
                }
                Err(err) => {
                    last_err = Some(err.to_string());
                    if attempt + 1 < FILE_RETRY_ATTEMPTS {
                        tokio::time::sleep(std::time::Duration::from_millis(FILE_RETRY_DELAYS_MS[attempt])).await;
                    }
                }
            }
        }
        tracing::warn!(file = %file.display(), error = ?last_err, "giving up on file after retries");
        self.events.file_failed(&file.to_string_lossy());
        FileOutcome::Failed
    }

    async fn process_file(&self, file: &Path, ctx: &FileContext) -> anyhow::Result<FileOutcome> {
        let content = tokio::fs::read_to_string(file).await?;
        let hash = format!("{:x}", md5::Md5::digest(content.as_bytes()));
        if ctx.existing_hash.as_deref() == Some(hash.as_str()) {
            return Ok(FileOutcome::Skipped);
        }

        let path_str = file.to_string_lossy().into_owned();
        self.store.lock().await.delete_by_file(&path_str).await?;

        let extension = file
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let extracted = self.registry.extract(&path_str, &content);

        self.store
            .lock()
            .await
            .upsert_dependency(&DependencyRecord {
                file_path: path_str.clone(),
                project_name: ctx.project_name.clone(),
                collection: ctx.collection.clone(),
                imports: extracted.imports.clone(),
                exports: extracted.exports.clone(),
            })
            .await?;

        let file_type = resolve_file_type_config(&self.config.file_types, &extension);
        if let Some(ft) = file_type {
            if !ft.index {
                return Ok(FileOutcome::Skipped);
            }
        }

        let file_name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let max_length = file_type.and_then(|ft| ft.max_length);
        let prompt_template = file_type.and_then(|ft| ft.prompt_template.clone());
        let should_summarize = ctx.summarize
            && file_type.and_then(|ft| ft.summarize).unwrap_or(true)
            && !extracted.blocks.is_empty();

        let summaries = if should_summarize {
            self.summarize_blocks(&extracted.blocks, &ctx.project_name, &file_name, prompt_template.as_deref())
                .await
        } else {
            HashMap::new()
        };

        let mut inputs = Vec::with_capacity(extracted.blocks.len());
        for block in &extracted.blocks {
            inputs.push(build_embedding_input(block, &ctx.collection, &ctx.project_name, &file_name, max_length));
        }

        let embeddings = if inputs.is_empty() {
            Vec::new()
        } else {
            let embedder = self.embedder.clone();
            self.embed_throttler
                .run(FILE_RETRY_ATTEMPTS, || {
                    let embedder = embedder.clone();
                    let inputs = inputs.clone();
                    async move { embedder.embed_batch(inputs).await }
                })
                .await?
        };

        let mut records = Vec::with_capacity(extracted.blocks.len());
        for (i, block) in extracted.blocks.iter().enumerate() {
            let vector = embeddings.get(i).cloned().unwrap_or_default();
            records.push(VectorRecord {
                collection: ctx.collection.clone(),
                project_name: ctx.project_name.clone(),
                name: block.name.clone(),
                r#type: block.r#type.clone(),
                category: block.category.as_str().to_string(),
                file_path: path_str.clone(),
                start_line: block.start_line,
                end_line: block.end_line,
                comments: block.comments.clone(),
                content: block.content.clone(),
                summary: summaries.get(&block.name).cloned(),
                file_hash: hash.clone(),
                vector,
                git: ctx.git.clone(),
            });
        }

        self.store.lock().await.insert(&records, self.embedder.name()).await?;
        Ok(FileOutcome::Processed)
    }

    /// Two-phase summarization: parent blocks first (so a chunk's summary
    /// request can reference its already-summarized parent), then chunks.
    async fn summarize_blocks(
        &self,
        blocks: &[Block],
        project_name: &str,
        file_name: &str,
        prompt_template: Option<&str>,
    ) -> HashMap<String, String> {
        let mut out = HashMap::new();
        let (parents, chunks): (Vec<&Block>, Vec<&Block>) =
            blocks.iter().partition(|b| !b.is_chunk());

        for block in parents {
            if let Some(summary) = self
                .summarize_one(block, project_name, file_name, BlockKind::Parent, None, prompt_template)
                .await
            {
                out.insert(block.name.clone(), summary);
            }
        }
        for block in chunks {
            let parent_name = block.parent_name.as_deref();
            if let Some(summary) = self
                .summarize_one(block, project_name, file_name, BlockKind::Chunk, parent_name, prompt_template)
                .await
            {
                out.insert(block.name.clone(), summary);
            }
        }
        out
    }

    async fn summarize_one(
        &self,
        block: &Block,
        project_name: &str,
        file_name: &str,
        kind: BlockKind,
        parent_name: Option<&str>,
        _prompt_template: Option<&str>,
    ) -> Option<String> {
        let summarizer = self.summarizer.clone();
        let text = block.content.clone();
        let project_name = project_name.to_string();
        let file_name = file_name.to_string();
        let parent_name = parent_name.map(|s| s.to_string());
        let result = self
            .summarize_throttler
            .run(FILE_RETRY_ATTEMPTS, || {
                let summarizer = summarizer.clone();
                let text = text.clone();
                let ctx = SummarizeContext {
                    file_name: &file_name,
                    project_name: &project_name,
                    kind,
                    parent_name: parent_name.as_deref(),
                    section_name: None,
                };
                async move { summarizer.summarize(&text, ctx).await }
            })
            .await;
        match result {
            Ok(summary) if !summary.is_empty() => Some(summary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Processed,
    Skipped,
    Failed,
}

struct FileContext {
    project_name: String,
    collection: String,
    summarize: bool,
    git: GitEnrichment,
    existing_hash: Option<String>,
    cancel_check: Option<CancelCheck>,
}

fn resolve_file_type_config<'a>(
    file_types: &'a HashMap<String, FileTypeConfig>,
    extension: &str,
) -> Option<&'a FileTypeConfig> {
    file_types
        .values()
        .find(|ft| ft.extensions.iter().any(|e| e.trim_start_matches('.').eq_ignore_ascii_case(extension)))
}

fn build_embedding_input(
    block: &Block,
    collection: &str,
    project_name: &str,
    file_name: &str,
    max_length: Option<usize>,
) -> String {
    let mut content = block.content.clone();
    if let Some(max) = max_length {
        if content.len() > max {
            content.truncate(max);
        }
    }
    let preview: String = content.chars().take(CONTENT_PREVIEW_CHARS).collect();
    format!(
        "Category: {}\nCollection: {}\nProject: {}\nFile: {}\nType: {}\nName: {}\nComments: {}\nCode:\n{}",
        block.category.as_str(),
        collection,
        project_name,
        file_name,
        block.r#type,
        block.name,
        block.comments,
        preview,
    )
}

/// Bounded-depth recursive enumeration of indexable files under `root`,
/// pruned by the ignore engine (C12).
fn enumerate_files(
    root: &Path,
    ignore: &IgnoreEngine,
    indexable_extensions: &[&str],
    max_depth: usize,
) -> Vec<PathBuf> {
    let mut out = Vec::new();
    walk(root, root, ignore, indexable_extensions, max_depth, 0, &mut out);
    out
}

fn walk(
    root: &Path,
    dir: &Path,
    ignore: &IgnoreEngine,
    indexable_extensions: &[&str],
    max_depth: usize,
    depth: usize,
    out: &mut Vec<PathBuf>,
) {
    if depth > max_depth {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let is_dir = path.is_dir();
        let rel = path.strip_prefix(root).unwrap_or(&path);
        if ignore.is_ignored(rel, is_dir) {
            continue;
        }
        if is_dir {
            walk(root, &path, ignore, indexable_extensions, max_depth, depth + 1, out);
        } else {
            let ext = path
                .extension()
                .map(|e| e.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            if indexable_extensions.contains(&ext.as_str()) {
                out.push(path);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BlockCategory;

    fn sample_block(name: &str, r#type: &str, content: &str) -> Block {
        Block {
            name: name.to_string(),
            r#type: r#type.to_string(),
            category: BlockCategory::Code,
            start_line: 1,
            end_line: 2,
            comments: String::new(),
            content: content.to_string(),
            parent_name: None,
            file_path: "a.rs".to_string(),
        }
    }

    #[test]
    fn embedding_input_includes_all_named_slots() {
        let block = sample_block("hi", "function", "pub fn hi() {}");
        let input = build_embedding_input(&block, "default", "proj", "a.rs", None);
        assert!(input.contains("Category: code"));
        assert!(input.contains("Project: proj"));
        assert!(input.contains("Name: hi"));
        assert!(input.contains("pub fn hi() {}"));
    }

    #[test]
    fn embedding_input_respects_max_length_truncation() {
        let block = sample_block("doc", "file", &"x".repeat(1000));
        let input = build_embedding_input(&block, "default", "proj", "a.md", Some(10));
        assert!(!input.contains(&"x".repeat(11)));
    }

    #[test]
    fn resolve_file_type_config_matches_by_extension() {
        let mut file_types = HashMap::new();
        file_types.insert(
            "code".to_string(),
            FileTypeConfig {
                extensions: vec!["ts".to_string(), "tsx".to_string()],
                summarize: Some(true),
                prompt_template: None,
                max_length: None,
                index: true,
                description: None,
            },
        );
        assert!(resolve_file_type_config(&file_types, "ts").is_some());
        assert!(resolve_file_type_config(&file_types, "py").is_none());
    }

    struct ConstEmbedder;

    #[async_trait::async_trait]
    impl EmbeddingProvider for ConstEmbedder {
        fn name(&self) -> &str {
            "const-test-model"
        }
        fn dimension(&self) -> usize {
            4
        }
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0, 0.0])
        }
        async fn embed_batch(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect())
        }
    }

    struct NoopSummarizer;

    #[async_trait::async_trait]
    impl SummarizerProvider for NoopSummarizer {
        fn name(&self) -> &str {
            "noop"
        }
        async fn summarize(&self, _text: &str, _ctx: SummarizeContext<'_>) -> anyhow::Result<String> {
            Ok(String::new())
        }
        async fn generate_best_question(&self, _query: &str, _context: &str) -> anyhow::Result<String> {
            Ok(String::new())
        }
        async fn generate_response(
            &self,
            _prompt: &str,
            _context: &str,
            _history: &[crate::providers::ChatTurn],
        ) -> anyhow::Result<String> {
            Ok(String::new())
        }
    }

    async fn test_pipeline(dir: &tempfile::TempDir) -> (Pipeline, Arc<Mutex<VectorStore>>) {
        let store = Arc::new(Mutex::new(
            VectorStore::open(dir.path().join("db").to_str().unwrap(), 4)
                .await
                .unwrap(),
        ));
        let events = Arc::new(EventBus::new());
        let pipeline = Pipeline {
            registry: ExtractorRegistry::new(),
            git: GitCollector::new(),
            store: store.clone(),
            events,
            embedder: Arc::new(ConstEmbedder),
            summarizer: Arc::new(NoopSummarizer),
            embed_throttler: Throttler::new("const-test-model", Default::default()),
            summarize_throttler: Throttler::new("noop", Default::default()),
            config: VibescoutConfig::default(),
            run_control: Arc::new(RunControl::new()),
        };
        (pipeline, store)
    }

    /// S1 (incremental skip): a second run with unchanged content indexes
    /// nothing and skips the one file; changing its body re-indexes it.
    #[tokio::test]
    async fn incremental_skip_matches_fingerprint() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.ts"), "export function f(){return 1}").unwrap();
        let (pipeline, _store) = test_pipeline(&dir).await;

        let first = pipeline
            .index_folder(dir.path(), IndexOptions { project_name: Some("P".into()), ..IndexOptions::new() })
            .await
            .unwrap();
        assert!(first.processed_files >= 1);
        assert_eq!(first.skipped_files, 0);

        let second = pipeline
            .index_folder(dir.path(), IndexOptions { project_name: Some("P".into()), ..IndexOptions::new() })
            .await
            .unwrap();
        assert_eq!(second.processed_files, 0);
        assert_eq!(second.skipped_files, 1);

        std::fs::write(dir.path().join("a.ts"), "export function f(){return 2}").unwrap();
        let third = pipeline
            .index_folder(dir.path(), IndexOptions { project_name: Some("P".into()), ..IndexOptions::new() })
            .await
            .unwrap();
        assert!(third.processed_files >= 1);
        assert_eq!(third.skipped_files, 0);
    }

    /// S4 (runtime imports): three calls through the same `app.`-rooted
    /// chain collapse into one deduplicated runtime import edge.
    #[tokio::test]
    async fn runtime_imports_dedup_across_repeated_calls() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("g.ts"),
            "function g(){ app.models.User.findById(1); app.models.User.findById(2); app.providers.Payment.process(3); }",
        )
        .unwrap();
        let (pipeline, store) = test_pipeline(&dir).await;
        pipeline
            .index_folder(dir.path(), IndexOptions { project_name: Some("P".into()), ..IndexOptions::new() })
            .await
            .unwrap();

        let root = std::fs::canonicalize(dir.path()).unwrap();
        let file_path = root.join("g.ts").to_string_lossy().into_owned();
        let dep = store
            .lock()
            .await
            .get_dependency(&file_path)
            .await
            .unwrap()
            .expect("dependency row written");
        let runtime_edges: Vec<_> = dep.imports.iter().filter(|e| e.runtime).collect();
        assert_eq!(runtime_edges.len(), 2);
        assert!(runtime_edges.iter().any(|e| e.source == "models.User" && e.symbols.contains("findById")));
        assert!(runtime_edges.iter().any(|e| e.source == "providers.Payment" && e.symbols.contains("process")));
    }

    /// Prune completeness: deleting a file from disk and re-indexing
    /// removes its vectors and dependency row, and is counted as pruned.
    #[tokio::test]
    async fn deleted_file_is_pruned_on_reindex() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.ts"), "export function f(){return 1}").unwrap();
        std::fs::write(dir.path().join("b.ts"), "export function g(){return 2}").unwrap();
        let (pipeline, store) = test_pipeline(&dir).await;
        pipeline
            .index_folder(dir.path(), IndexOptions { project_name: Some("P".into()), ..IndexOptions::new() })
            .await
            .unwrap();

        std::fs::remove_file(dir.path().join("b.ts")).unwrap();
        let second = pipeline
            .index_folder(dir.path(), IndexOptions { project_name: Some("P".into()), ..IndexOptions::new() })
            .await
            .unwrap();
        assert_eq!(second.pruned_files, 1);

        let root = std::fs::canonicalize(dir.path()).unwrap();
        let gone_path = root.join("b.ts").to_string_lossy().into_owned();
        assert!(store.lock().await.get_dependency(&gone_path).await.unwrap().is_none());
        let hashes = store.lock().await.file_hashes("P").await.unwrap();
        assert!(!hashes.iter().any(|(path, _)| path.ends_with("b.ts")));
    }

    /// S5 (ignore files): a `.vibeignore` entry excludes exactly the file
    /// it names from indexing.
    #[tokio::test]
    async fn vibeignore_excludes_named_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("included.ts"), "export const a = 1;").unwrap();
        std::fs::write(dir.path().join("ignored.ts"), "export const b = 2;").unwrap();
        std::fs::write(dir.path().join(".vibeignore"), "ignored.ts\n").unwrap();
        let (pipeline, store) = test_pipeline(&dir).await;
        pipeline
            .index_folder(dir.path(), IndexOptions { project_name: Some("P".into()), ..IndexOptions::new() })
            .await
            .unwrap();

        let hashes = store.lock().await.file_hashes("P").await.unwrap();
        assert!(hashes.iter().any(|(path, _)| path.ends_with("included.ts")));
        assert!(!hashes.iter().any(|(path, _)| path.ends_with("ignored.ts")));
    }

    /// C2 fingerprint: the stored hash for a freshly indexed file is the
    /// file content's MD5 hex digest, not blake3 or any other scheme.
    #[tokio::test]
    async fn file_hash_is_md5_hex_digest() {
        let dir = tempfile::TempDir::new().unwrap();
        let content = "export function f(){return 1}";
        std::fs::write(dir.path().join("a.ts"), content).unwrap();
        let (pipeline, store) = test_pipeline(&dir).await;
        pipeline
            .index_folder(dir.path(), IndexOptions { project_name: Some("P".into()), ..IndexOptions::new() })
            .await
            .unwrap();

        let expected = format!("{:x}", md5::Md5::digest(content.as_bytes()));
        let hashes = store.lock().await.file_hashes("P").await.unwrap();
        assert!(hashes.iter().any(|(_, hash)| hash == &expected));
    }

    /// Cancellation (C8): a task-level `cancelRequested` check short-circuits
    /// a file unit before it's processed, counting it as skipped rather than
    /// failed or processed.
    #[tokio::test]
    async fn cancel_check_skips_file_before_processing() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.ts"), "export function f(){return 1}").unwrap();
        let (pipeline, store) = test_pipeline(&dir).await;

        let cancel_check: CancelCheck = Arc::new(|| true);
        let summary = pipeline
            .index_folder(
                dir.path(),
                IndexOptions {
                    project_name: Some("P".into()),
                    cancel_check: Some(cancel_check),
                    ..IndexOptions::new()
                },
            )
            .await
            .unwrap();
        assert_eq!(summary.skipped_files, 1);
        assert_eq!(summary.processed_files, 0);

        let hashes = store.lock().await.file_hashes("P").await.unwrap();
        assert!(hashes.is_empty());
    }

    /// Pause / stop (§5): a worker blocked in `wait_while_paused` wakes up
    /// and proceeds as soon as the pause is lifted.
    #[tokio::test]
    async fn run_control_wait_while_paused_unblocks_on_resume() {
        let control = Arc::new(RunControl::new());
        control.pause();
        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.wait_while_paused().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        control.resume();
        assert!(waiter.await.unwrap());
    }

    /// Stopping is not reversible by resuming from a pause.
    #[test]
    fn run_control_stop_is_not_reversible_by_resume() {
        let control = RunControl::new();
        control.request_stop();
        control.resume();
        assert!(control.is_stopping());
    }

    /// A run's finish status reports `Stopped` whenever a stop was
    /// requested, even if files had already failed — stop takes priority
    /// over the failure-count variants.
    #[test]
    fn finish_status_prefers_stopped_over_failures() {
        let control = RunControl::new();
        control.request_stop();
        assert_eq!(finish_status(&control, 3), IndexingStatus::Stopped);
        assert_eq!(finish_status(&control, 0), IndexingStatus::Stopped);
    }

    #[test]
    fn finish_status_without_stop_reflects_failure_count() {
        let control = RunControl::new();
        assert_eq!(finish_status(&control, 0), IndexingStatus::Completed);
        assert_eq!(finish_status(&control, 2), IndexingStatus::CompletedWithErrors);
    }
}

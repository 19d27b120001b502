//! Embedding / Summarizer Provider Abstraction (component C3): capability
//! interfaces implemented by concrete back-ends, used by the indexing
//! pipeline and search front-end through the throttler (C4).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{PromptsConfig, SummarizerTomlConfig};
use crate::indexer::embedder::EmbedderPool;

pub const HISTORY_WINDOW: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Parent,
    Chunk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

/// Context passed alongside the raw text being summarized — everything a
/// prompt template's named slots can draw from besides `{{content}}`.
pub struct SummarizeContext<'a> {
    pub file_name: &'a str,
    pub project_name: &'a str,
    pub kind: BlockKind,
    pub parent_name: Option<&'a str>,
    pub section_name: Option<&'a str>,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &str;
    fn dimension(&self) -> usize;
    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;
    async fn embed_batch(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>>;
}

#[async_trait]
pub trait SummarizerProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn summarize(&self, text: &str, ctx: SummarizeContext<'_>) -> anyhow::Result<String>;
    async fn generate_best_question(&self, query: &str, context: &str) -> anyhow::Result<String>;
    async fn generate_response(
        &self,
        prompt: &str,
        context: &str,
        history: &[ChatTurn],
    ) -> anyhow::Result<String>;
}

/// Renders a prompt template's `{{slot}}` placeholders. Unrecognized
/// placeholders are left untouched rather than erroring — a conservative
/// choice given templates come from user configuration.
pub fn render_template(template: &str, slots: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in slots {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

/// Keeps only the last `window` turns, per SPEC_FULL §4.3 ("providers
/// truncate history to a sliding window (last N=5-10) before sending").
pub fn truncate_history(history: &[ChatTurn], window: usize) -> &[ChatTurn] {
    let start = history.len().saturating_sub(window);
    &history[start..]
}

fn format_history(history: &[ChatTurn]) -> String {
    truncate_history(history, HISTORY_WINDOW)
        .iter()
        .map(|turn| {
            let role = match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            format!("{role}: {}", turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

const DEFAULT_CODE_SUMMARIZE_TEMPLATE: &str =
    "Summarize the purpose of this {{type}} named {{name}} in one sentence (max 30 words). \
     File: {{fileName}}\nCode:\n{{code}}";
const DEFAULT_DOC_SUMMARIZE_TEMPLATE: &str =
    "Summarize this documentation section \"{{sectionName}}\" from {{fileName}} in one sentence.\n{{content}}";
const DEFAULT_BEST_QUESTION_TEMPLATE: &str =
    "Given the search query \"{{query}}\" and the following context, propose the single best \
     follow-up question a developer would ask next.\n\nContext:\n{{context}}";
const DEFAULT_CHAT_RESPONSE_TEMPLATE: &str =
    "Date: {{date}} Time: {{time}}\nProject: {{projectName}}\n\nConversation so far:\n{{history}}\n\n\
     Relevant code context:\n{{context}}\n\nUser: {{query}}\nAssistant:";

/// Wraps [`EmbedderPool`] (fastembed-backed) behind the [`EmbeddingProvider`]
/// capability interface.
pub struct FastEmbedProvider {
    pool: Arc<EmbedderPool>,
}

impl FastEmbedProvider {
    pub fn new(pool: Arc<EmbedderPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    fn name(&self) -> &str {
        self.pool.model_name()
    }

    fn dimension(&self) -> usize {
        self.pool.dimension()
    }

    async fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        Ok(self.pool.embed_query(text).await?)
    }

    async fn embed_batch(&self, texts: Vec<String>) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(self.pool.embed(texts).await?)
    }
}

/// Ollama-backed [`SummarizerProvider`], grounded on
/// `indexer/summarizer.rs`'s `summarize_with_ollama` request/response
/// shapes, generalized to render configured prompt templates instead of
/// one hardcoded prompt string.
pub struct OllamaProvider {
    config: SummarizerTomlConfig,
    prompts: PromptsConfig,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: SummarizerTomlConfig, prompts: PromptsConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            config,
            prompts,
            client,
        }
    }

    fn code_template(&self) -> &str {
        self.prompts
            .active_summarize_id
            .as_deref()
            .and_then(|id| {
                self.prompts
                    .summarize_templates
                    .iter()
                    .find(|t| t.id == id)
            })
            .map(|t| t.template.as_str())
            .unwrap_or(DEFAULT_CODE_SUMMARIZE_TEMPLATE)
    }

    fn doc_template(&self) -> &str {
        self.prompts
            .active_doc_summarize_id
            .as_deref()
            .and_then(|id| {
                self.prompts
                    .doc_summarize_templates
                    .iter()
                    .find(|t| t.id == id)
            })
            .map(|t| t.template.as_str())
            .unwrap_or(DEFAULT_DOC_SUMMARIZE_TEMPLATE)
    }

    async fn generate(&self, prompt: String) -> anyhow::Result<String> {
        #[derive(Serialize)]
        struct Request {
            model: String,
            prompt: String,
            stream: bool,
            options: Options,
        }
        #[derive(Serialize)]
        struct Options {
            temperature: f64,
            num_predict: usize,
        }
        #[derive(Deserialize)]
        struct Response {
            response: String,
        }

        let body = Request {
            model: self.config.model_id.clone(),
            prompt,
            stream: false,
            options: Options {
                temperature: self.config.temperature,
                num_predict: self.config.max_tokens,
            },
        };

        let resp = self
            .client
            .post(format!("{}/api/generate", self.config.ollama_url))
            .json(&body)
            .send()
            .await?;

        if !resp.status().is_success() {
            anyhow::bail!("Ollama returned status {}", resp.status());
        }

        let parsed: Response = resp.json().await?;
        let summary = parsed.response.trim().to_string();
        Ok(if summary.len() > 300 {
            format!("{}...", &summary[..297])
        } else {
            summary
        })
    }
}

#[async_trait]
impl SummarizerProvider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn summarize(&self, text: &str, ctx: SummarizeContext<'_>) -> anyhow::Result<String> {
        if !self.config.enable_llm {
            return Ok(String::new());
        }
        let type_label = match ctx.kind {
            BlockKind::Parent => "parent",
            BlockKind::Chunk => "chunk",
        };
        let template = match ctx.kind {
            BlockKind::Chunk if ctx.section_name.is_none() => self.code_template(),
            BlockKind::Parent => self.code_template(),
            BlockKind::Chunk => self.doc_template(),
        };
        let prompt = render_template(
            template,
            &[
                ("code", text),
                ("content", text),
                ("fileName", ctx.file_name),
                ("projectName", ctx.project_name),
                ("parentName", ctx.parent_name.unwrap_or("")),
                ("sectionName", ctx.section_name.unwrap_or("")),
                ("type", type_label),
                ("name", ctx.parent_name.unwrap_or(ctx.file_name)),
            ],
        );
        self.generate(prompt).await
    }

    async fn generate_best_question(&self, query: &str, context: &str) -> anyhow::Result<String> {
        let template = self
            .prompts
            .best_question
            .as_deref()
            .unwrap_or(DEFAULT_BEST_QUESTION_TEMPLATE);
        let prompt = render_template(template, &[("query", query), ("context", context)]);
        self.generate(prompt).await
    }

    async fn generate_response(
        &self,
        prompt: &str,
        context: &str,
        history: &[ChatTurn],
    ) -> anyhow::Result<String> {
        let template = self
            .prompts
            .chat_response
            .as_deref()
            .unwrap_or(DEFAULT_CHAT_RESPONSE_TEMPLATE);
        let now = chrono::Local::now();
        let rendered = render_template(
            template,
            &[
                ("query", prompt),
                ("context", context),
                ("history", &format_history(history)),
                ("date", &now.format("%Y-%m-%d").to_string()),
                ("time", &now.format("%H:%M:%S").to_string()),
                ("projectName", ""),
            ],
        );
        self.generate(rendered).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_template_substitutes_known_slots() {
        let out = render_template("Hello {{name}}, file {{fileName}}", &[("name", "foo"), ("fileName", "a.rs")]);
        assert_eq!(out, "Hello foo, file a.rs");
    }

    #[test]
    fn render_template_leaves_unknown_slots_untouched() {
        let out = render_template("{{known}} {{unknown}}", &[("known", "x")]);
        assert_eq!(out, "x {{unknown}}");
    }

    #[test]
    fn truncate_history_keeps_last_n_turns() {
        let history: Vec<ChatTurn> = (0..20)
            .map(|i| ChatTurn {
                role: Role::User,
                content: format!("turn{i}"),
            })
            .collect();
        let truncated = truncate_history(&history, 5);
        assert_eq!(truncated.len(), 5);
        assert_eq!(truncated[0].content, "turn15");
        assert_eq!(truncated[4].content, "turn19");
    }

    #[test]
    fn truncate_history_shorter_than_window_returns_all() {
        let history = vec![ChatTurn {
            role: Role::User,
            content: "only".to_string(),
        }];
        assert_eq!(truncate_history(&history, 8).len(), 1);
    }
}

//! Agent shell: wires the retrieval tool and the web-search tool into an
//! LLM tool-calling loop, and normalizes whatever shape the model answers
//! with into one tagged reply type at this boundary.

mod session;

pub use session::SessionManager;

use std::sync::Arc;

use serde_json::Value;

use crate::llm::{ChatMessage, ChatRequest, LlmProvider};
use crate::retrieval::Retriever;
use crate::search::web_search;

const DEFAULT_MAX_STEPS: usize = 6;
const HISTORY_LIMIT: usize = 20;

/// Normalized LLM outcome. Model responses arrive as plain prose, as a JSON
/// object, or not at all; call sites only ever see these three variants.
#[derive(Debug, Clone)]
pub enum AgentReply {
    PlainText(String),
    Structured(Value),
    Error(String),
}

impl AgentReply {
    /// Render for the HTTP response / tool consumer.
    pub fn into_text(self) -> String {
        match self {
            AgentReply::PlainText(text) => text,
            AgentReply::Structured(value) => {
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string())
            }
            AgentReply::Error(message) => format!("[error] {}", message),
        }
    }
}

/// One step of the tool loop: either the model is done, wants a tool, or
/// produced a JSON shape we pass through untouched.
enum AgentDecision {
    Final(String),
    ToolCall { name: String, args: Value },
    Structured(Value),
}

fn parse_agent_decision(text: &str) -> AgentDecision {
    let Some(value) = parse_json_from_text(text) else {
        return AgentDecision::Final(text.trim().to_string());
    };

    let action = value
        .get("type")
        .or_else(|| value.get("action"))
        .and_then(|v| v.as_str())
        .unwrap_or("");

    if action == "tool_call" {
        if let Some(name) = value
            .get("tool_name")
            .or_else(|| value.get("name"))
            .or_else(|| value.get("tool"))
            .and_then(|v| v.as_str())
        {
            let args = value
                .get("tool_args")
                .or_else(|| value.get("args"))
                .cloned()
                .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
            return AgentDecision::ToolCall {
                name: name.to_string(),
                args,
            };
        }
    }

    if action == "final" {
        if let Some(content) = value.get("content").and_then(|v| v.as_str()) {
            return AgentDecision::Final(content.to_string());
        }
    }

    AgentDecision::Structured(value)
}

fn parse_json_from_text(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return value.is_object().then_some(value);
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end]).ok()
}

fn system_instructions() -> String {
    [
        "You are the question-answering assistant for an institutional archive.",
        "You can call tools by answering with a single JSON object:",
        r#"  {"type": "tool_call", "tool_name": "<name>", "tool_args": {"query": "..."}}"#,
        "Available tools:",
        "  - archive_search: search the institutional archive (corpus documents and recent email digests). Use it for any question about the institution.",
        "  - web_search: search the public web. Use it only when the archive cannot answer.",
        "When you have enough information, answer with:",
        r#"  {"type": "final", "content": "<answer for the user>"}"#,
        "Answer with exactly one JSON object per turn.",
    ]
    .join("\n")
}

/// Per-user conversation pipeline: bounded tool loop plus rolling history.
pub struct RagPipeline {
    llm: Arc<dyn LlmProvider>,
    retriever: Arc<Retriever>,
    config: Value,
    model: String,
    max_steps: usize,
    history: Vec<ChatMessage>,
}

impl RagPipeline {
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        retriever: Arc<Retriever>,
        config: Value,
        model: String,
    ) -> Self {
        let max_steps = config
            .get("llm")
            .and_then(|v| v.get("max_agent_steps"))
            .and_then(|v| v.as_u64())
            .map(|v| v.clamp(1, 16) as usize)
            .unwrap_or(DEFAULT_MAX_STEPS);

        Self {
            llm,
            retriever,
            config,
            model,
            max_steps,
            history: Vec::new(),
        }
    }

    /// Drive the tool loop for one user query. Never returns an error; every
    /// failure collapses into `AgentReply::Error` so the caller always has
    /// something to show.
    pub async fn invoke(&mut self, query: &str) -> AgentReply {
        let mut messages = vec![ChatMessage::system(system_instructions())];
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(query));

        for _step in 0..self.max_steps {
            let request = ChatRequest::new(messages.clone()).with_config(&self.config);
            let response = match self.llm.chat(request, &self.model).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::error!("LLM call failed: {}", err);
                    return AgentReply::Error(err.to_string());
                }
            };

            match parse_agent_decision(&response) {
                AgentDecision::Final(content) => {
                    self.remember(query, &content);
                    return AgentReply::PlainText(content);
                }
                AgentDecision::Structured(value) => {
                    self.remember(query, &value.to_string());
                    return AgentReply::Structured(value);
                }
                AgentDecision::ToolCall { name, args } => {
                    let observation = self.execute_tool(&name, &args).await;
                    messages.push(ChatMessage::assistant(response));
                    messages.push(ChatMessage::system(format!(
                        "Observation from `{}`:\n{}",
                        name, observation
                    )));
                }
            }
        }

        AgentReply::Error("agent did not reach a final answer".to_string())
    }

    async fn execute_tool(&self, name: &str, args: &Value) -> String {
        let query = args
            .get("query")
            .or_else(|| args.get("q"))
            .or_else(|| args.get("input"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim()
            .to_string();

        match name {
            "archive_search" => {
                if query.is_empty() {
                    return "archive_search requires a 'query' argument".to_string();
                }
                self.retriever.retrieve(&query).await
            }
            "web_search" => {
                if query.is_empty() {
                    return "web_search requires a 'query' argument".to_string();
                }
                match web_search(&self.config, &query).await {
                    Ok(output) => output,
                    Err(err) => format!("[web search failed: {}]", err),
                }
            }
            other => format!("Unknown tool: {}", other),
        }
    }

    fn remember(&mut self, query: &str, answer: &str) {
        self.history.push(ChatMessage::user(query));
        self.history.push(ChatMessage::assistant(answer));
        if self.history.len() > HISTORY_LIMIT {
            let excess = self.history.len() - HISTORY_LIMIT;
            self.history.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::core::errors::ApiError;
    use crate::feed::testing::QueueFeed;
    use crate::providers::testing::{EchoSummarizer, HashEmbedder};
    use crate::providers::EmbeddingProvider;
    use crate::retrieval::RetrievalConfig;
    use crate::store::{LongTermStore, QueryOptions, ShortTermConfig, ShortTermStore};
    use crate::vector::SqliteCollection;

    /// LLM stub that replays a scripted list of responses.
    struct ScriptedLlm {
        responses: Mutex<VecDeque<String>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedLlm {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn chat(&self, _request: ChatRequest, _model: &str) -> Result<String, ApiError> {
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or(ApiError::ServiceUnavailable)
        }
    }

    async fn test_retriever() -> Arc<Retriever> {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::new(32));
        let long_path = std::env::temp_dir().join(format!(
            "ragline-agent-long-{}.db",
            uuid::Uuid::new_v4()
        ));
        let short_path = std::env::temp_dir().join(format!(
            "ragline-agent-short-{}.db",
            uuid::Uuid::new_v4()
        ));

        let long_term = Arc::new(LongTermStore::new(
            Arc::new(SqliteCollection::open(long_path, 32).await.unwrap()),
            embedder.clone(),
        ));
        long_term
            .ingest(&json!({ "e1": "Director: Dr. X" }))
            .await
            .unwrap();

        let short_term = Arc::new(ShortTermStore::new(
            Arc::new(SqliteCollection::open(short_path, 32).await.unwrap()),
            embedder,
            Arc::new(EchoSummarizer),
            Arc::new(QueueFeed::new(Vec::new())),
            long_term.clone(),
            ShortTermConfig {
                poll_interval: Duration::from_millis(5),
                flush_max_records: 1000,
                flush_max_age: Duration::from_secs(3600),
                blocklist: Vec::new(),
            },
        ));

        Arc::new(Retriever::new(
            long_term,
            short_term,
            RetrievalConfig {
                query: QueryOptions {
                    topk: 5,
                    top_l: 5,
                    use_late: false,
                    doc_search: true,
                },
                max_context_tokens: 1024,
            },
        ))
    }

    #[tokio::test]
    async fn tool_call_then_final_answer() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            r#"{"type": "tool_call", "tool_name": "archive_search", "tool_args": {"query": "Director"}}"#,
            r#"{"type": "final", "content": "The director is Dr. X."}"#,
        ]));
        let mut pipeline = RagPipeline::new(
            llm,
            test_retriever().await,
            json!({}),
            "test-model".to_string(),
        );

        let reply = pipeline.invoke("who is the director?").await;
        match reply {
            AgentReply::PlainText(text) => assert_eq!(text, "The director is Dr. X."),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn plain_prose_is_a_final_answer() {
        let llm = Arc::new(ScriptedLlm::new(vec!["Just a plain answer."]));
        let mut pipeline = RagPipeline::new(
            llm,
            test_retriever().await,
            json!({}),
            "test-model".to_string(),
        );

        let reply = pipeline.invoke("hi").await;
        assert!(matches!(reply, AgentReply::PlainText(ref t) if t == "Just a plain answer."));
    }

    #[tokio::test]
    async fn unrecognized_json_passes_through_as_structured() {
        let llm = Arc::new(ScriptedLlm::new(vec![r#"{"answer": 42, "unit": "items"}"#]));
        let mut pipeline = RagPipeline::new(
            llm,
            test_retriever().await,
            json!({}),
            "test-model".to_string(),
        );

        let reply = pipeline.invoke("count?").await;
        match reply {
            AgentReply::Structured(value) => assert_eq!(value["answer"], json!(42)),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn llm_failure_degrades_to_error_reply() {
        let llm = Arc::new(ScriptedLlm::new(vec![]));
        let mut pipeline = RagPipeline::new(
            llm,
            test_retriever().await,
            json!({}),
            "test-model".to_string(),
        );

        let reply = pipeline.invoke("hello").await;
        let text = reply.into_text();
        assert!(text.starts_with("[error]"));
    }

    #[tokio::test]
    async fn unknown_tool_feeds_an_observation_back() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            r#"{"type": "tool_call", "tool_name": "teleport", "tool_args": {}}"#,
            r#"{"type": "final", "content": "done"}"#,
        ]));
        let mut pipeline = RagPipeline::new(
            llm,
            test_retriever().await,
            json!({}),
            "test-model".to_string(),
        );

        let reply = pipeline.invoke("try a bad tool").await;
        assert!(matches!(reply, AgentReply::PlainText(ref t) if t == "done"));
    }

    #[test]
    fn decision_parser_accepts_fenced_json() {
        let text = "Here is my move:\n```json\n{\"type\": \"final\", \"content\": \"ok\"}\n```";
        match parse_agent_decision(text) {
            AgentDecision::Final(content) => assert_eq!(content, "ok"),
            _ => panic!("expected final"),
        }
    }
}

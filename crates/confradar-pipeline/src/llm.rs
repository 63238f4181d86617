//! Chat-completions collaborator client with JSON mode and a minimal local
//! tool protocol (register a tool, let the model plan calls, execute them
//! locally, have the model summarize the results).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use confradar_core::{ClusterAssignment, PaperDigest, StoredPaper, Summary};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::sync::Mutex;
use tracing::{error, warn};

use crate::LanguageModel;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Abstracts are clipped before clustering to keep the prompt bounded.
const CLUSTER_ABSTRACT_CHARS: usize = 800;
/// README text is clipped before the placeholder judgment.
const README_CHARS: usize = 4000;
/// One retry after a failed JSON parse, then give up.
const JSON_ATTEMPTS: usize = 2;

pub type ToolHandler =
    Arc<dyn Fn(JsonValue) -> BoxFuture<'static, Result<JsonValue>> + Send + Sync>;

pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: JsonValue,
    pub handler: ToolHandler,
}

#[derive(Clone)]
pub struct LlmClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    tools: Mutex<HashMap<String, ToolSpec>>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

fn system(content: impl Into<String>) -> ChatMessage {
    ChatMessage {
        role: "system",
        content: content.into(),
    }
}

fn user(content: impl Into<String>) -> ChatMessage {
    ChatMessage {
        role: "user",
        content: content.into(),
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Affirmative placeholder signal anywhere in an executed-calls summary.
/// Accepts the `calls`/`results` object keys or a bare array.
pub fn plan_indicates_placeholder(summary: &JsonValue) -> bool {
    let calls: &[JsonValue] = match summary {
        JsonValue::Array(items) => items,
        JsonValue::Object(map) => map
            .get("calls")
            .or_else(|| map.get("results"))
            .and_then(|v| v.as_array())
            .map(|v| v.as_slice())
            .unwrap_or(&[]),
        _ => &[],
    };
    calls.iter().any(|call| {
        call.get("result")
            .and_then(|r| r.get("placeholder"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    })
}

impl LlmClient {
    pub fn new(provider: &str, model: &str, api_key: String) -> Result<Self> {
        let base_url = if provider == "deepseek" {
            DEEPSEEK_BASE_URL
        } else {
            OPENAI_BASE_URL
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("building llm http client")?;
        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base_url: base_url.to_string(),
                model: model.to_string(),
                api_key,
                tools: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub async fn register_tool(&self, spec: ToolSpec) {
        self.inner.tools.lock().await.insert(spec.name.clone(), spec);
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        response_format: Option<ResponseFormat>,
    ) -> Result<String> {
        let url = format!("{}/chat/completions", self.inner.base_url);
        let resp = self
            .inner
            .http
            .post(&url)
            .bearer_auth(&self.inner.api_key)
            .json(&ChatRequest {
                model: &self.inner.model,
                messages,
                response_format,
            })
            .send()
            .await
            .context("sending chat request")?
            .error_for_status()
            .context("chat request rejected")?;
        let body: ChatResponse = resp.json().await.context("decoding chat response")?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("chat response had no content"))
    }

    async fn chat_json(&self, messages: &[ChatMessage], force_object: bool) -> Option<JsonValue> {
        for attempt in 0..JSON_ATTEMPTS {
            let format = force_object.then_some(ResponseFormat {
                kind: "json_object",
            });
            match self.chat(messages, format).await {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(value) => return Some(value),
                    Err(err) => warn!(attempt, %err, "collaborator returned unparseable json"),
                },
                Err(err) => warn!(attempt, %err, "chat call failed"),
            }
        }
        None
    }

    pub async fn batch_summarize(&self, papers: &[PaperDigest]) -> Vec<Summary> {
        if papers.is_empty() {
            return Vec::new();
        }
        let payload: Vec<JsonValue> = papers
            .iter()
            .map(|p| json!({"id": p.id, "title": p.title, "abstract": p.abstract_text}))
            .collect();
        let messages = [
            system(
                "You are a research paper assistant. Read each paper in the JSON input and \
                 distill its core contribution into one English sentence and one Chinese sentence.",
            ),
            user(format!(
                "Reply with a JSON array the same length as the input. Each element must \
                 contain id, tldr_en and tldr_zh. Do not skip papers or add extra text. \
                 Input: {}",
                JsonValue::Array(payload)
            )),
        ];
        let Some(data) = self.chat_json(&messages, false).await else {
            return Vec::new();
        };
        let Some(items) = data.as_array() else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                Some(Summary {
                    paper_id: item.get("id")?.as_i64()?,
                    tldr_en: item
                        .get("tldr_en")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                    tldr_zh: item
                        .get("tldr_zh")
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string(),
                })
            })
            .collect()
    }

    pub async fn cluster_papers(&self, papers: &[StoredPaper]) -> Vec<ClusterAssignment> {
        if papers.is_empty() {
            return Vec::new();
        }
        let payload: Vec<JsonValue> = papers
            .iter()
            .map(|p| {
                json!({
                    "id": p.id,
                    "title": p.title,
                    "abstract": truncate_chars(&p.abstract_text, CLUSTER_ABSTRACT_CHARS),
                })
            })
            .collect();
        let messages = [
            system(
                "You are an AI research scientist. Read all the abstracts and group the \
                 papers into 5-8 topics. Reply with a JSON array where each element \
                 contains id and label (the topic name).",
            ),
            user(format!("Input: {}", JsonValue::Array(payload))),
        ];
        let Some(data) = self.chat_json(&messages, false).await else {
            return Vec::new();
        };
        let Some(items) = data.as_array() else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| {
                Some(ClusterAssignment {
                    paper_id: item.get("id")?.as_i64()?,
                    label: item
                        .get("label")
                        .and_then(|v| v.as_str())
                        .unwrap_or("uncategorized")
                        .to_string(),
                })
            })
            .collect()
    }

    pub async fn summarize_trend(&self, clusters: &[(String, i64)]) -> Option<String> {
        if clusters.is_empty() {
            return None;
        }
        let payload: Vec<JsonValue> = clusters
            .iter()
            .map(|(label, count)| json!({"label": label, "count": count}))
            .collect();
        let messages = [
            system(
                "Write a short prose summary, roughly 200 words, of the technical trend \
                 implied by these topic frequencies.",
            ),
            user(format!("Topic data: {}", JsonValue::Array(payload))),
        ];
        match self.chat(&messages, None).await {
            Ok(text) => Some(text),
            Err(err) => {
                error!(%err, "trend summarization failed");
                None
            }
        }
    }

    pub async fn check_repo_placeholder(&self, readme: &str) -> bool {
        let messages = [
            system("You are a strict code reviewer. Output only true or false."),
            user(format!(
                "Decide whether this README is a placeholder (e.g. code coming soon, WIP, \
                 empty). Answer only true or false. Content: {}",
                truncate_chars(readme, README_CHARS)
            )),
        ];
        match self.chat(&messages, None).await {
            Ok(answer) => answer.to_lowercase().contains("true"),
            Err(err) => {
                warn!(%err, "placeholder check failed");
                false
            }
        }
    }

    /// Minimal tool loop: the model plans a JSON array of `{tool, input}`
    /// calls, each is executed locally (unknown tools skipped, handler errors
    /// captured per call), then the model summarizes the results. The
    /// executed calls are always present under `calls` in the returned value.
    pub async fn run_tool_plan(&self, task: &str, payload: &JsonValue) -> JsonValue {
        let tool_names: Vec<String> = {
            let tools = self.inner.tools.lock().await;
            tools.keys().cloned().collect()
        };
        if tool_names.is_empty() {
            return json!({});
        }

        let plan_messages = [
            system(
                "You are a task planner. Reply with a JSON array listing the tools to call \
                 and their inputs, as {\"tool\": ..., \"input\": ...} objects, with no \
                 extra text.",
            ),
            user(format!(
                "Task: {task}\nAvailable tools: {tool_names:?}\nContext: {payload}"
            )),
        ];
        let calls = self
            .chat_json(&plan_messages, false)
            .await
            .and_then(|v| v.as_array().cloned())
            .unwrap_or_default();

        let mut executed = Vec::new();
        for call in calls {
            let Some(name) = call.get("tool").and_then(|v| v.as_str()) else {
                continue;
            };
            let handler = {
                let tools = self.inner.tools.lock().await;
                tools.get(name).map(|spec| Arc::clone(&spec.handler))
            };
            let Some(handler) = handler else {
                continue;
            };
            let input = call.get("input").cloned().unwrap_or_else(|| json!({}));
            match handler(input).await {
                Ok(result) => executed.push(json!({"tool": name, "result": result})),
                Err(err) => executed.push(json!({"tool": name, "error": err.to_string()})),
            }
        }

        let summarize_messages = [
            system(
                "You summarize tool results. Produce structured JSON based on the results, \
                 with no extra text.",
            ),
            user(json!({"task": task, "calls": executed}).to_string()),
        ];
        let mut summary = self
            .chat_json(&summarize_messages, true)
            .await
            .unwrap_or_else(|| json!({}));
        if let Some(obj) = summary.as_object_mut() {
            obj.entry("calls")
                .or_insert_with(|| JsonValue::Array(executed));
        }
        summary
    }
}

#[async_trait]
impl LanguageModel for LlmClient {
    async fn batch_summarize(&self, papers: &[PaperDigest]) -> Vec<Summary> {
        LlmClient::batch_summarize(self, papers).await
    }

    async fn cluster_papers(&self, papers: &[StoredPaper]) -> Vec<ClusterAssignment> {
        LlmClient::cluster_papers(self, papers).await
    }

    async fn summarize_trend(&self, clusters: &[(String, i64)]) -> Option<String> {
        LlmClient::summarize_trend(self, clusters).await
    }

    /// Placeholder judgment via the tool loop: register `check_placeholder`
    /// once, run the plan, scan the executed calls for an affirmative.
    async fn readme_is_placeholder(&self, readme: &str) -> bool {
        let registered = self
            .inner
            .tools
            .lock()
            .await
            .contains_key("check_placeholder");
        if !registered {
            // weak handle: the tool map lives inside the client it would
            // otherwise keep alive
            let weak = Arc::downgrade(&self.inner);
            self.register_tool(ToolSpec {
                name: "check_placeholder".to_string(),
                description: "Judge whether a README is a placeholder".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                }),
                handler: Arc::new(move |input| {
                    let weak = weak.clone();
                    Box::pin(async move {
                        let inner = weak
                            .upgrade()
                            .ok_or_else(|| anyhow!("llm client dropped"))?;
                        let client = LlmClient { inner };
                        let text = input
                            .get("text")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string();
                        Ok(json!({"placeholder": client.check_repo_placeholder(&text).await}))
                    })
                }),
            })
            .await;
        }

        let summary = self
            .run_tool_plan(
                "judge whether the README is a placeholder",
                &json!({"text": readme}),
            )
            .await;
        plan_indicates_placeholder(&summary)
    }
}

//! Pass-through client for the Perplexity chat-completions API.

use crate::config::API_KEY_ENV;
use crate::errors::{Result, ToolboxError};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{error, info};

/// Search/research models, one tool each
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchModel {
    Sonar,
    SonarPro,
    SonarReasoning,
    SonarReasoningPro,
    SonarDeepResearch,
}

impl SearchModel {
    pub const ALL: [SearchModel; 5] = [
        SearchModel::Sonar,
        SearchModel::SonarPro,
        SearchModel::SonarReasoning,
        SearchModel::SonarReasoningPro,
        SearchModel::SonarDeepResearch,
    ];

    /// Model identifier sent upstream
    pub fn api_name(&self) -> &'static str {
        match self {
            SearchModel::Sonar => "sonar",
            SearchModel::SonarPro => "sonar-pro",
            SearchModel::SonarReasoning => "sonar-reasoning",
            SearchModel::SonarReasoningPro => "sonar-reasoning-pro",
            SearchModel::SonarDeepResearch => "sonar-deep-research",
        }
    }

    /// Name of the tool that exposes this model
    pub fn tool_name(&self) -> &'static str {
        match self {
            SearchModel::Sonar => "perplexity_sonar",
            SearchModel::SonarPro => "perplexity_sonar_pro",
            SearchModel::SonarReasoning => "perplexity_sonar_reasoning",
            SearchModel::SonarReasoningPro => "perplexity_sonar_reasoning_pro",
            SearchModel::SonarDeepResearch => "perplexity_sonar_deep_research",
        }
    }

    pub fn from_tool_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.tool_name() == name)
    }

    /// Models whose output opens with a `<think>` section
    pub fn is_reasoning(&self) -> bool {
        matches!(
            self,
            SearchModel::SonarReasoning | SearchModel::SonarReasoningPro
        )
    }

    pub fn accepts_reasoning_effort(&self) -> bool {
        matches!(self, SearchModel::SonarDeepResearch)
    }

    pub fn description(&self) -> &'static str {
        match self {
            SearchModel::Sonar => {
                "Fast answers with reliable search results using Perplexity Sonar. \
                 Lightweight, non-reasoning model (128K context) for quick facts, definitions, \
                 news and straightforward Q&A with real-time web search."
            }
            SearchModel::SonarPro => {
                "Advanced search using Perplexity Sonar Pro. Non-reasoning model (200K context) \
                 for complex queries, comparative analysis and information synthesis, with 2x \
                 more search results than Sonar."
            }
            SearchModel::SonarReasoning => {
                "Quick reasoning with real-time search using Perplexity Sonar Reasoning. \
                 Chain-of-Thought model (128K context) for multi-step problem solving and \
                 structured analysis."
            }
            SearchModel::SonarReasoningPro => {
                "Advanced multi-step reasoning using Perplexity Sonar Reasoning Pro. Outputs a \
                 <think> section before the answer; the saved JSON keeps the full response."
            }
            SearchModel::SonarDeepResearch => {
                "Exhaustive research using Perplexity Sonar Deep Research. Searches hundreds of \
                 sources and produces detailed reports. reasoning_effort trades speed for depth: \
                 low, medium (default) or high."
            }
        }
    }
}

impl fmt::Display for SearchModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

/// Computational effort for deep research
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningEffort {
    Low,
    #[default]
    Medium,
    High,
}

impl ReasoningEffort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

impl FromStr for ReasoningEffort {
    type Err = ToolboxError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(ReasoningEffort::Low),
            "medium" => Ok(ReasoningEffort::Medium),
            "high" => Ok(ReasoningEffort::High),
            other => Err(ToolboxError::InvalidArgument(format!(
                "reasoning_effort must be 'low', 'medium', or 'high', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_effort: Option<ReasoningEffort>,
}

/// One POST per call, no retries
#[derive(Debug, Clone)]
pub struct PerplexityClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl PerplexityClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Send a single user message and return the full JSON response
    pub async fn chat(
        &self,
        model: SearchModel,
        request: &str,
        reasoning_effort: Option<ReasoningEffort>,
    ) -> Result<Value> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ToolboxError::MissingApiKey(API_KEY_ENV))?;

        let body = ChatRequest {
            model: model.api_name(),
            messages: vec![ChatMessage {
                role: "user",
                content: request,
            }],
            reasoning_effort,
        };

        info!("Calling Perplexity API with model: {}", model);

        let response = self
            .client
            .post(self.endpoint())
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                error!("Perplexity API call failed: {}", e);
                ToolboxError::Http(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Perplexity API returned {}: {}", status, body);
            return Err(ToolboxError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<Value>().await?)
    }
}

/// Content of the first choice, if the response has the usual shape
pub fn first_choice_content(response: &Value) -> Option<&str> {
    response
        .get("choices")?
        .get(0)?
        .get("message")?
        .get("content")?
        .as_str()
}

/// Parse the JSON that follows a reasoning model's `</think>` section.
/// Without the marker the whole content is tried. Code fences are stripped.
pub fn extract_reasoning_json(content: &str) -> Option<Value> {
    const MARKER: &str = "</think>";

    let Some(idx) = content.rfind(MARKER) else {
        return serde_json::from_str(content).ok();
    };

    let mut json_str = content[idx + MARKER.len()..].trim();
    if let Some(rest) = json_str.strip_prefix("```json") {
        json_str = rest.trim();
    }
    if let Some(rest) = json_str.strip_prefix("```") {
        json_str = rest.trim();
    }
    if let Some(rest) = json_str.strip_suffix("```") {
        json_str = rest.trim();
    }
    serde_json::from_str(json_str).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reasoning_effort_parse() {
        assert_eq!("high".parse::<ReasoningEffort>().unwrap(), ReasoningEffort::High);
        let err = "extreme".parse::<ReasoningEffort>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid argument: reasoning_effort must be 'low', 'medium', or 'high', got 'extreme'"
        );
        assert!("High".parse::<ReasoningEffort>().is_err());
    }

    #[test]
    fn test_request_body_shape() {
        let body = ChatRequest {
            model: "sonar-deep-research",
            messages: vec![ChatMessage {
                role: "user",
                content: "q",
            }],
            reasoning_effort: Some(ReasoningEffort::Low),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "model": "sonar-deep-research",
                "messages": [{"role": "user", "content": "q"}],
                "reasoning_effort": "low"
            })
        );

        let body = ChatRequest {
            model: "sonar",
            messages: vec![],
            reasoning_effort: None,
        };
        assert!(serde_json::to_value(&body)
            .unwrap()
            .get("reasoning_effort")
            .is_none());
    }

    #[test]
    fn test_tool_names_round_trip() {
        for model in SearchModel::ALL {
            assert_eq!(SearchModel::from_tool_name(model.tool_name()), Some(model));
        }
        assert_eq!(SearchModel::from_tool_name("py_eval"), None);
    }

    #[test]
    fn test_extract_reasoning_json() {
        let content = "<think>plan the answer</think>\n```json\n{\"answer\": 42}\n```";
        assert_eq!(extract_reasoning_json(content), Some(json!({"answer": 42})));
        assert_eq!(extract_reasoning_json("{\"a\": 1}"), Some(json!({"a": 1})));
        assert_eq!(extract_reasoning_json("<think>x</think> not json"), None);
        assert_eq!(extract_reasoning_json("plain prose"), None);
    }

    #[test]
    fn test_first_choice_content() {
        let response = json!({"choices": [{"message": {"content": "hi"}}]});
        assert_eq!(first_choice_content(&response), Some("hi"));
        assert_eq!(first_choice_content(&json!({})), None);
    }

    #[test]
    fn test_missing_api_key_fails_before_network() {
        let client =
            PerplexityClient::new("http://127.0.0.1:9", None, Duration::from_secs(1)).unwrap();
        let err = tokio_test::block_on(client.chat(SearchModel::Sonar, "q", None)).unwrap_err();
        assert!(matches!(err, ToolboxError::MissingApiKey("PERPLEXITY_API_KEY")));
    }

    #[test]
    fn test_endpoint() {
        let client =
            PerplexityClient::new("https://api.example.com/", None, Duration::from_secs(1))
                .unwrap();
        assert_eq!(client.endpoint(), "https://api.example.com/chat/completions");
    }
}

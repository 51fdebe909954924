// SPDX-License-Identifier: MIT OR Apache-2.0
//! The built-in tool implementations.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use agw_core::error::{ErrorKind, GatewayError};

use crate::HostedTool;

fn schema_for<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({"type": "object"}))
}

fn tool_error(message: impl Into<String>) -> GatewayError {
    GatewayError::new(ErrorKind::Internal, message)
}

// ---------------------------------------------------------------------------
// @search-google
// ---------------------------------------------------------------------------

/// Arguments for the web search tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchInput {
    /// The search query.
    pub query: String,
}

/// One search hit.
#[derive(Debug, Serialize, JsonSchema)]
pub struct SearchHit {
    /// Result title.
    pub title: String,
    /// Result URL.
    pub link: String,
    /// Snippet of the page.
    pub snippet: String,
}

/// Result of the web search tool.
#[derive(Debug, Serialize, JsonSchema)]
pub struct SearchOutput {
    /// Ranked hits.
    pub results: Vec<SearchHit>,
}

/// Web search backed by the Serper API.
#[derive(Debug, Clone)]
pub struct SearchGoogleTool {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl SearchGoogleTool {
    /// Build the tool around an API key.
    #[must_use]
    pub fn new(client: reqwest::Client, api_key: String, endpoint: Option<String>) -> Self {
        Self {
            client,
            api_key,
            endpoint: endpoint.unwrap_or_else(|| "https://google.serper.dev/search".to_string()),
        }
    }
}

#[async_trait]
impl HostedTool for SearchGoogleTool {
    fn name(&self) -> &'static str {
        "@search-google"
    }

    fn description(&self) -> &'static str {
        "Search the web and return ranked results with snippets"
    }

    fn input_schema(&self) -> Value {
        schema_for::<SearchInput>()
    }

    fn output_schema(&self) -> Value {
        schema_for::<SearchOutput>()
    }

    async fn execute(&self, input: Value) -> Result<Value, GatewayError> {
        let input: SearchInput = serde_json::from_value(input)
            .map_err(|e| tool_error(format!("invalid search input: {e}")))?;
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&json!({"q": input.query}))
            .send()
            .await
            .map_err(|e| tool_error(format!("search request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(tool_error(format!(
                "search returned {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| tool_error(format!("search returned a non-JSON body: {e}")))?;
        let results: Vec<SearchHit> = body
            .get("organic")
            .and_then(Value::as_array)
            .map(|hits| {
                hits.iter()
                    .take(10)
                    .map(|hit| SearchHit {
                        title: hit.get("title").and_then(Value::as_str).unwrap_or_default().to_string(),
                        link: hit.get("link").and_then(Value::as_str).unwrap_or_default().to_string(),
                        snippet: hit
                            .get("snippet")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        serde_json::to_value(SearchOutput { results })
            .map_err(|e| tool_error(format!("failed to serialize search output: {e}")))
    }
}

// ---------------------------------------------------------------------------
// @browser-text
// ---------------------------------------------------------------------------

/// Arguments for the text-mode browser tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct BrowseInput {
    /// The page to fetch.
    pub url: String,
}

/// Result of the text-mode browser tool.
#[derive(Debug, Serialize, JsonSchema)]
pub struct BrowseOutput {
    /// Visible page text, truncated.
    pub text: String,
}

/// Maximum characters kept from a fetched page.
const MAX_PAGE_CHARS: usize = 20_000;

/// Fetch a page and return its visible text.
#[derive(Debug, Clone)]
pub struct BrowserTextTool {
    client: reqwest::Client,
}

impl BrowserTextTool {
    /// Build the tool around a shared HTTP client.
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Strip tags, scripts, and styles from an HTML document.
fn html_to_text(html: &str) -> String {
    let chars: Vec<char> = html.chars().collect();
    let mut out = String::with_capacity(html.len() / 4);
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '<' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        // Read the tag name.
        let mut j = i + 1;
        let closing = chars.get(j) == Some(&'/');
        if closing {
            j += 1;
        }
        let mut name = String::new();
        while let Some(c) = chars.get(j) {
            if !c.is_ascii_alphabetic() {
                break;
            }
            name.push(c.to_ascii_lowercase());
            j += 1;
        }
        // Skip to the end of the tag.
        while j < chars.len() && chars[j] != '>' {
            j += 1;
        }
        i = (j + 1).min(chars.len());
        out.push(' ');

        if !closing && (name == "script" || name == "style") {
            let target: Vec<char> = format!("</{name}").chars().collect();
            while i < chars.len() {
                if chars[i] == '<'
                    && chars[i..].len() >= target.len()
                    && chars[i..i + target.len()]
                        .iter()
                        .zip(&target)
                        .all(|(a, b)| a.to_ascii_lowercase() == *b)
                {
                    while i < chars.len() && chars[i] != '>' {
                        i += 1;
                    }
                    i = (i + 1).min(chars.len());
                    break;
                }
                i += 1;
            }
        }
    }
    let collapsed: String = out.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(MAX_PAGE_CHARS).collect()
}

#[async_trait]
impl HostedTool for BrowserTextTool {
    fn name(&self) -> &'static str {
        "@browser-text"
    }

    fn description(&self) -> &'static str {
        "Fetch a web page and return its visible text"
    }

    fn input_schema(&self) -> Value {
        schema_for::<BrowseInput>()
    }

    fn output_schema(&self) -> Value {
        schema_for::<BrowseOutput>()
    }

    async fn execute(&self, input: Value) -> Result<Value, GatewayError> {
        let input: BrowseInput = serde_json::from_value(input)
            .map_err(|e| tool_error(format!("invalid browse input: {e}")))?;
        let response = self
            .client
            .get(&input.url)
            .send()
            .await
            .map_err(|e| tool_error(format!("fetch failed: {e}")))?;
        if !response.status().is_success() {
            return Err(tool_error(format!("fetch returned {}", response.status())));
        }
        let html = response
            .text()
            .await
            .map_err(|e| tool_error(format!("failed to read page: {e}")))?;
        serde_json::to_value(BrowseOutput {
            text: html_to_text(&html),
        })
        .map_err(|e| tool_error(format!("failed to serialize page text: {e}")))
    }
}

// ---------------------------------------------------------------------------
// @perplexity-sonar-pro
// ---------------------------------------------------------------------------

/// Arguments for the Perplexity proxy tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct PerplexityInput {
    /// The research question.
    pub query: String,
}

/// Result of the Perplexity proxy tool.
#[derive(Debug, Serialize, JsonSchema)]
pub struct PerplexityOutput {
    /// The synthesized answer.
    pub answer: String,
}

/// Proxy a question to the Perplexity Sonar Pro model.
#[derive(Debug, Clone)]
pub struct PerplexityTool {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl PerplexityTool {
    /// Build the tool around an API key.
    #[must_use]
    pub fn new(client: reqwest::Client, api_key: String, endpoint: Option<String>) -> Self {
        Self {
            client,
            api_key,
            endpoint: endpoint
                .unwrap_or_else(|| "https://api.perplexity.ai/chat/completions".to_string()),
        }
    }
}

#[async_trait]
impl HostedTool for PerplexityTool {
    fn name(&self) -> &'static str {
        "@perplexity-sonar-pro"
    }

    fn description(&self) -> &'static str {
        "Ask Perplexity Sonar Pro a research question"
    }

    fn input_schema(&self) -> Value {
        schema_for::<PerplexityInput>()
    }

    fn output_schema(&self) -> Value {
        schema_for::<PerplexityOutput>()
    }

    async fn execute(&self, input: Value) -> Result<Value, GatewayError> {
        let input: PerplexityInput = serde_json::from_value(input)
            .map_err(|e| tool_error(format!("invalid perplexity input: {e}")))?;
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": "sonar-pro",
                "messages": [{"role": "user", "content": input.query}],
            }))
            .send()
            .await
            .map_err(|e| tool_error(format!("perplexity request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(tool_error(format!(
                "perplexity returned {}",
                response.status()
            )));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| tool_error(format!("perplexity returned a non-JSON body: {e}")))?;
        let answer = body
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        serde_json::to_value(PerplexityOutput { answer })
            .map_err(|e| tool_error(format!("failed to serialize perplexity output: {e}")))
    }
}

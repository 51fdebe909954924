// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP execution shared by every adapter.
//!
//! One buffered path and one streaming path, both driven by the adapter for
//! URLs, headers, parsing, and error classification. Rate-limit headroom is
//! logged from response headers as attempts complete.

use std::time::Duration;

use futures::Stream;
use futures::StreamExt;
use serde_json::Value;

use agw_core::error::{ErrorKind, GatewayError};
use agw_core::file::File;

use crate::adapter::{ParsedCompletion, ProviderAdapter};

/// Execute a buffered completion request.
///
/// # Errors
///
/// Transport failures map to `read_timeout` / `provider_internal`; non-2xx
/// statuses go through the adapter's classifier; 2xx bodies that fail to
/// parse surface the adapter's parse error.
pub async fn execute(
    client: &reqwest::Client,
    adapter: &dyn ProviderAdapter,
    request: &Value,
    model: &str,
    timeout: Duration,
) -> Result<ParsedCompletion, GatewayError> {
    let url = adapter.request_url(model, false);
    let response = send(client, adapter, &url, request, model, timeout).await?;

    observe_rate_limits(adapter, response.headers());
    let status = response.status().as_u16();
    let retry_after = parse_retry_after(response.headers());
    let body = response
        .text()
        .await
        .map_err(|e| transport_error(adapter, &e))?;

    if !(200..300).contains(&status) {
        let mut err = adapter.classify_error(status, &body);
        if err.retry_after.is_none() {
            err.retry_after = retry_after;
        }
        return Err(err);
    }

    let parsed: Value = serde_json::from_str(&body).map_err(|_| {
        GatewayError::new(
            ErrorKind::ProviderInternal,
            format!("{} returned a non-JSON body", adapter.name()),
        )
    })?;
    adapter.parse_response(&parsed)
}

/// Execute a streaming completion request, returning the raw byte stream.
///
/// The status line and headers are checked before the stream is handed
/// back; in-stream transport failures surface as `read_timeout`.
///
/// # Errors
///
/// Same classification as [`execute`].
pub async fn execute_stream(
    client: &reqwest::Client,
    adapter: &dyn ProviderAdapter,
    request: &Value,
    model: &str,
    timeout: Duration,
) -> Result<impl Stream<Item = Result<bytes::Bytes, GatewayError>>, GatewayError> {
    let url = adapter.request_url(model, true);
    let response = send(client, adapter, &url, request, model, timeout).await?;

    observe_rate_limits(adapter, response.headers());
    let status = response.status().as_u16();
    if !(200..300).contains(&status) {
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        let mut err = adapter.classify_error(status, &body);
        if err.retry_after.is_none() {
            err.retry_after = retry_after;
        }
        return Err(err);
    }

    let provider = adapter.name();
    Ok(response.bytes_stream().map(move |chunk| {
        chunk.map_err(|e| {
            if e.is_timeout() {
                GatewayError::new(ErrorKind::ReadTimeout, format!("{provider} stream timed out"))
                    .with_retry_after(Duration::from_secs(10))
            } else {
                GatewayError::new(
                    ErrorKind::ProviderInternal,
                    format!("{provider} disconnected without sending a response"),
                )
                .with_retry_after(Duration::from_secs(10))
            }
        })
    }))
}

async fn send(
    client: &reqwest::Client,
    adapter: &dyn ProviderAdapter,
    url: &str,
    request: &Value,
    model: &str,
    timeout: Duration,
) -> Result<reqwest::Response, GatewayError> {
    let mut builder = client.post(url).json(request).timeout(timeout);
    for (name, value) in adapter.request_headers(model) {
        builder = builder.header(name, value);
    }
    builder.send().await.map_err(|e| transport_error(adapter, &e))
}

fn transport_error(adapter: &dyn ProviderAdapter, error: &reqwest::Error) -> GatewayError {
    if error.is_timeout() {
        GatewayError::new(
            ErrorKind::ReadTimeout,
            format!("{} timed out", adapter.name()),
        )
        .with_retry_after(Duration::from_secs(10))
    } else {
        GatewayError::new(
            ErrorKind::ProviderInternal,
            format!("{} request failed: {error}", adapter.name()),
        )
        .with_retry_after(Duration::from_secs(10))
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Log remaining rate-limit headroom from response headers.
fn observe_rate_limits(adapter: &dyn ProviderAdapter, headers: &reqwest::header::HeaderMap) {
    for (label, header) in adapter.rate_limit_headers() {
        if let Some(remaining) = headers.get(*header).and_then(|v| v.to_str().ok()) {
            tracing::debug!(
                provider = %adapter.name(),
                limit = label,
                remaining,
                "provider rate limit headroom"
            );
        }
    }
}

/// Download a URL-only file and inline its bytes, with two retries on
/// transport failures.
///
/// # Errors
///
/// `invalid_file` when the file has no URL, the download keeps failing, or
/// the server answers non-200.
pub async fn download_file(client: &reqwest::Client, file: &mut File) -> Result<(), GatewayError> {
    let url = file.url.clone().ok_or_else(|| {
        GatewayError::new(
            ErrorKind::InvalidFile,
            "file url is required when data is not provided",
        )
    })?;

    let mut last_error = None;
    for _ in 0..3 {
        match client.get(&url).send().await {
            Ok(response) => {
                if response.status().as_u16() != 200 {
                    return Err(GatewayError::new(
                        ErrorKind::InvalidFile,
                        format!("failed to download file: {}", response.status()),
                    )
                    .with_detail("url", url.clone()));
                }
                if file.content_type.is_none() {
                    file.content_type = response
                        .headers()
                        .get("content-type")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                }
                let bytes = response.bytes().await.map_err(|e| {
                    GatewayError::new(ErrorKind::InvalidFile, format!("failed to read file: {e}"))
                })?;
                use base64::Engine as _;
                file.data = Some(base64::engine::general_purpose::STANDARD.encode(&bytes));
                return Ok(());
            }
            Err(e) => last_error = Some(e),
        }
    }
    Err(GatewayError::new(
        ErrorKind::InvalidFile,
        format!(
            "failed to download file: {}",
            last_error.map(|e| e.to_string()).unwrap_or_default()
        ),
    )
    .with_detail("url", url))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{BuildOptions, ProviderConfig};
    use crate::openai::OpenAiAdapter;
    use agw_core::message::Message;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn adapter_for(server: &MockServer) -> OpenAiAdapter {
        OpenAiAdapter::new(ProviderConfig {
            api_key: "sk-test".into(),
            base_url: Some(format!("{}/v1/chat/completions", server.uri())),
        })
    }

    fn request(adapter: &OpenAiAdapter) -> Value {
        use crate::adapter::ProviderAdapter as _;
        adapter
            .build_request(
                &[Message::user("Hello, world!")],
                &BuildOptions {
                    model: "gpt-4o".into(),
                    ..Default::default()
                },
            )
            .unwrap()
    }

    #[tokio::test]
    async fn buffered_success_parses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "Hello James!"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 3},
            })))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server).await;
        let client = reqwest::Client::new();
        let parsed = execute(&client, &adapter, &request(&adapter), "gpt-4o", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(parsed.content, "Hello James!");
        assert_eq!(parsed.usage.prompt_token_count, Some(10));
    }

    #[tokio::test]
    async fn rate_limit_classifies_with_retry_after_header() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("retry-after", "7")
                    .set_body_string("{\"error\": {\"message\": \"slow down\"}}"),
            )
            .mount(&server)
            .await;

        let adapter = adapter_for(&server).await;
        let client = reqwest::Client::new();
        let err = execute(&client, &adapter, &request(&adapter), "gpt-4o", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RateLimit);
    }

    #[tokio::test]
    async fn stream_yields_raw_bytes() {
        let server = MockServer::start().await;
        let body = "data: {\"choices\": [{\"delta\": {\"content\": \"Hi\"}}]}\n\ndata: [DONE]\n\n";
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let adapter = adapter_for(&server).await;
        let client = reqwest::Client::new();
        let stream = execute_stream(
            &client,
            &adapter,
            &request(&adapter),
            "gpt-4o",
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        let chunks: Vec<_> = futures::StreamExt::collect::<Vec<_>>(stream).await;
        let all: Vec<u8> = chunks.into_iter().flat_map(|c| c.unwrap().to_vec()).collect();
        assert!(String::from_utf8(all).unwrap().contains("[DONE]"));
    }

    #[tokio::test]
    async fn download_inlines_bytes_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(b"fake-png".to_vec()),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let mut file = File {
            url: Some(format!("{}/cat.png", server.uri())),
            ..Default::default()
        };
        download_file(&client, &mut file).await.unwrap();
        assert_eq!(file.content_type.as_deref(), Some("image/png"));
        assert!(file.data.is_some());
    }

    #[tokio::test]
    async fn download_404_is_invalid_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let mut file = File {
            url: Some(format!("{}/missing.png", server.uri())),
            ..Default::default()
        };
        let err = download_file(&client, &mut file).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidFile);
    }
}

//! Anthropic Messages API gateway.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{CompletionRequest, GatewayError, ModelGateway, TextStream};
use crate::config::AnthropicConfig;

/// [`ModelGateway`] backed by `POST {base_url}/v1/messages`.
#[derive(Debug, Clone)]
pub struct AnthropicGateway {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicGateway {
    pub fn new(config: AnthropicConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .build()
            .map_err(|e| GatewayError::Transport(format!("failed to build http client: {e}")))?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }

    fn payload(request: &CompletionRequest, stream: bool) -> Value {
        json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": stream,
            "messages": [{"role": "user", "content": request.prompt}],
        })
    }

    async fn send(&self, payload: &Value) -> Result<reqwest::Response, GatewayError> {
        let resp = self
            .client
            .post(self.endpoint())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .header("content-type", "application/json")
            .json(payload)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "anthropic api returned an error");
        Err(GatewayError::Api {
            status: status.as_u16(),
            message: api_error_message(&body),
        })
    }
}

#[async_trait]
impl ModelGateway for AnthropicGateway {
    async fn complete(&self, request: CompletionRequest) -> Result<String, GatewayError> {
        debug!(model = %request.model, prompt_len = request.prompt.len(), "anthropic complete");
        let resp = self.send(&Self::payload(&request, false)).await?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| GatewayError::Malformed(e.to_string()))?;
        let text = response_text(&body)?;
        if text.is_empty() {
            return Err(GatewayError::Empty);
        }
        Ok(text)
    }

    async fn stream(&self, request: CompletionRequest) -> Result<TextStream, GatewayError> {
        debug!(model = %request.model, prompt_len = request.prompt.len(), "anthropic stream");
        let resp = self.send(&Self::payload(&request, true)).await?;
        let mut bytes = Box::pin(resp.bytes_stream());

        let stream = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            'read: while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err::<String, GatewayError>(GatewayError::Transport(e.to_string()));
                        break;
                    }
                };
                buffer.extend_from_slice(&chunk);

                while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line).trim().to_string();
                    match parse_sse_line(&line) {
                        Ok(SseLine::Text(text)) => {
                            yield Ok(text);
                        }
                        Ok(SseLine::Stop) => break 'read,
                        Ok(SseLine::Skip) => {}
                        Err(e) => {
                            yield Err(e);
                            break 'read;
                        }
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Text(String),
    Stop,
    Skip,
}

fn parse_sse_line(line: &str) -> Result<SseLine, GatewayError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseLine::Skip);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(SseLine::Skip);
    }
    if data == "[DONE]" {
        return Ok(SseLine::Stop);
    }
    let event: Value =
        serde_json::from_str(data).map_err(|e| GatewayError::Malformed(e.to_string()))?;
    match event.get("type").and_then(Value::as_str) {
        Some("content_block_delta") => Ok(event
            .pointer("/delta/text")
            .and_then(Value::as_str)
            .map(|t| SseLine::Text(t.to_string()))
            .unwrap_or(SseLine::Skip)),
        Some("message_stop") => Ok(SseLine::Stop),
        Some("error") => Err(GatewayError::Api {
            status: 0,
            message: event
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("stream error")
                .to_string(),
        }),
        _ => Ok(SseLine::Skip),
    }
}

fn response_text(body: &Value) -> Result<String, GatewayError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| GatewayError::Malformed("response has no content array".to_string()))?;
    Ok(blocks
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect())
}

fn api_error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/error/message")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_text_delta() {
        let line = r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"a_0 = "}}"#;
        assert_eq!(
            parse_sse_line(line).expect("parse"),
            SseLine::Text("a_0 = ".to_string())
        );
    }

    #[test]
    fn test_parse_skips_other_events() {
        assert_eq!(parse_sse_line("event: ping").expect("parse"), SseLine::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"type":"message_start","message":{}}"#).expect("parse"),
            SseLine::Skip
        );
        assert_eq!(
            parse_sse_line(r#"data: {"type":"message_stop"}"#).expect("parse"),
            SseLine::Stop
        );
    }

    #[test]
    fn test_parse_stream_error() {
        let line = r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#;
        let err = parse_sse_line(line).unwrap_err();
        assert!(err.to_string().contains("Overloaded"));
    }

    #[test]
    fn test_response_text_joins_blocks() {
        let body = json!({"content": [
            {"type": "text", "text": "{\"a\":"},
            {"type": "text", "text": " 1}"}
        ]});
        assert_eq!(response_text(&body).expect("text"), "{\"a\": 1}");
    }

    #[test]
    fn test_api_error_message() {
        let body = r#"{"type":"error","error":{"type":"invalid_request_error","message":"bad model"}}"#;
        assert_eq!(api_error_message(body), "bad model");
        assert_eq!(api_error_message("gateway timeout"), "gateway timeout");
    }

    #[test]
    fn test_payload_shape() {
        let req = CompletionRequest::new("claude-3-5-haiku-20241022", "hi").with_max_tokens(16);
        let payload = AnthropicGateway::payload(&req, true);
        assert_eq!(payload["stream"], true);
        assert_eq!(payload["max_tokens"], 16);
        assert_eq!(payload["messages"][0]["content"], "hi");
    }
}

//! HTTP client for an Ollama engine published on a host port.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::ChatRequest;
use crate::error::{InferenceError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A model installed inside the engine, as listed by `/api/tags`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaModel {
    /// Tag such as `llama2:7b`
    pub name: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<OllamaModel>,
}

/// One NDJSON line of a streamed chat reply
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    Token(String),
    Done,
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
    /// Bound on model-list requests; chat replies are never cut short
    list_timeout: Option<Duration>,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            list_timeout: None,
        }
    }

    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_timeout = Some(timeout);
        self
    }

    /// Client for the engine published at `http://{host}:{port}`.
    pub fn for_endpoint(host: &str, port: &str) -> Self {
        Self::new(format!("http://{}:{}", host, port))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn list_models(&self) -> Result<Vec<OllamaModel>, InferenceError> {
        let mut request = self.client.get(format!("{}/api/tags", self.base_url));
        if let Some(timeout) = self.list_timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;
        let response = check_status(response).await?;

        let tags: TagsResponse = response.json().await?;
        debug!("{} lists {} models", self.base_url, tags.models.len());
        Ok(tags.models)
    }

    /// Whether `tag` (e.g. `llama2:7b`) is fully pulled into the engine.
    pub async fn has_model(&self, tag: &str) -> Result<bool, InferenceError> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| same_tag(&m.name, tag)))
    }

    /// Single completion; returns the assistant message content.
    pub async fn chat(&self, request: &ChatRequest) -> Result<String, InferenceError> {
        let mut request = request.clone();
        request.stream = false;

        info!("💬 Chat request to {} ({})", request.model, self.base_url);
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let body: serde_json::Value = response.json().await?;
        parse_chat_reply(&body)
    }

    /// Streamed completion. `on_token` sees every chunk as it arrives; the
    /// concatenated reply is returned once the engine reports it is done.
    pub async fn chat_stream<F>(
        &self,
        request: &ChatRequest,
        mut on_token: F,
    ) -> Result<String, InferenceError>
    where
        F: FnMut(&str),
    {
        let request = request.clone().streaming();

        info!("💬 Streaming chat request to {} ({})", request.model, self.base_url);
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let mut stream = response.bytes_stream();
        let mut lines = LineBuffer::default();
        let mut reply = String::new();

        while let Some(bytes) = stream.next().await {
            for line in lines.push(&bytes?) {
                match parse_stream_line(&line)? {
                    Some(StreamChunk::Token(token)) => {
                        on_token(&token);
                        reply.push_str(&token);
                    }
                    Some(StreamChunk::Done) => return Ok(reply),
                    None => {}
                }
            }
        }

        if let Some(line) = lines.finish() {
            if let Some(StreamChunk::Token(token)) = parse_stream_line(&line)? {
                on_token(&token);
                reply.push_str(&token);
            }
        }

        warn!("Stream from {} ended without a done marker", self.base_url);
        Ok(reply)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, InferenceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(InferenceError::Status {
        status: status.as_u16(),
        body,
    })
}

/// `llama2` and `llama2:latest` name the same model.
fn same_tag(listed: &str, wanted: &str) -> bool {
    let normalize = |tag: &str| {
        if tag.contains(':') {
            tag.to_string()
        } else {
            format!("{}:latest", tag)
        }
    };
    normalize(listed) == normalize(wanted)
}

pub fn parse_chat_reply(body: &serde_json::Value) -> Result<String, InferenceError> {
    if let Some(error) = body.get("error").and_then(|e| e.as_str()) {
        return Err(InferenceError::Malformed {
            reason: error.to_string(),
        });
    }

    body.pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| InferenceError::Malformed {
            reason: "reply has no message.content".to_string(),
        })
}

/// Parse one NDJSON line. Blank lines yield `None`.
pub fn parse_stream_line(line: &str) -> Result<Option<StreamChunk>, InferenceError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|err| InferenceError::Malformed {
            reason: format!("bad stream line: {}", err),
        })?;

    if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
        return Err(InferenceError::Malformed {
            reason: error.to_string(),
        });
    }
    if value.get("done").and_then(|d| d.as_bool()) == Some(true) {
        return Ok(Some(StreamChunk::Done));
    }

    Ok(value
        .pointer("/message/content")
        .and_then(|c| c.as_str())
        .map(|token| StreamChunk::Token(token.to_string())))
}

/// Reassembles newline-delimited records from arbitrarily split byte chunks
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and drain every complete line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    /// Whatever trailing bytes never got a newline.
    pub fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.pending).into_owned())
        }
    }
}

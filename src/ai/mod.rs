//! Chat payloads for the inference engine.

use serde::{Deserialize, Serialize};

pub mod ollama;

pub use ollama::OllamaClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One role-tagged chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Base64 payloads without any `data:` URL prefix
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Attach an image given either as raw base64 or as a data URL.
    pub fn with_image(mut self, image: &str) -> Self {
        if !image.is_empty() {
            self.images.push(strip_data_url(image).to_string());
        }
        self
    }
}

/// `data:image/png;base64,AAAA` becomes `AAAA`; anything else is returned as is.
pub fn strip_data_url(image: &str) -> &str {
    match image.split_once(',') {
        Some((_, payload)) => payload,
        None => image,
    }
}

/// Body of `POST /api/chat`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Engine model tag, e.g. `llama2:7b`
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

impl ChatRequest {
    /// History followed by the new message, addressed to `model:parameters`.
    pub fn for_model(
        model: &str,
        parameters: &str,
        history: Vec<ChatMessage>,
        message: ChatMessage,
    ) -> Self {
        let mut messages = history;
        messages.push(message);
        Self {
            model: format!("{}:{}", model, parameters),
            messages,
            stream: false,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

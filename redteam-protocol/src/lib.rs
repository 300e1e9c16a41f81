//! Wire-level types shared between the attack-loop engine and anything that
//! calls it: message roles, token-usage accounting, and the provider call
//! envelope (the `{output, error?, sessionId?, tokenUsage?, audio?, image?}`
//! shape every provider returns).

use serde::{Deserialize, Serialize};

/// Role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Token usage reported by a single provider call. Missing subfields
/// default to 0 per the provider contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub prompt: u64,
    #[serde(default)]
    pub completion: u64,
    #[serde(default)]
    pub cached: u64,
    #[serde(default)]
    pub num_requests: u64,
}

impl TokenUsage {
    pub fn merge(&mut self, other: &TokenUsage) {
        self.total += other.total;
        self.prompt += other.prompt;
        self.completion += other.completion;
        self.cached += other.cached;
        self.num_requests += other.num_requests;
    }
}

/// An auxiliary attachment produced by a `_perTurnLayers` runtime transform,
/// or returned by a provider alongside its text output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaAttachment {
    /// e.g. "wav", "png".
    pub format: String,
    /// Base64-encoded payload.
    pub data: String,
}

/// The envelope every provider returns from `callApi`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderResponse {
    #[serde(default)]
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "tokenUsage")]
    pub token_usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<MediaAttachment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<MediaAttachment>,
}

impl ProviderResponse {
    pub fn text(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}

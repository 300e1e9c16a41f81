use redteam_protocol::{MediaAttachment, Role};
use serde::{Deserialize, Serialize};

/// A single turn in a conversation. Immutable once appended to Memory
/// (§3 Message).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio: Option<MediaAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<MediaAttachment>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            audio: None,
            image: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            audio: None,
            image: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            audio: None,
            image: None,
        }
    }

    pub fn with_attachments(
        mut self,
        audio: Option<MediaAttachment>,
        image: Option<MediaAttachment>,
    ) -> Self {
        self.audio = audio;
        self.image = image;
        self
    }
}

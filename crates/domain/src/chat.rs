//! Chat identity and metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How many characters of the first user message become the chat preview.
pub const PREVIEW_MAX_CHARS: usize = 120;

/// Whether a chat may mutate platform configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ChatMode {
    #[default]
    #[serde(rename = "read-only")]
    ReadOnly,
    #[serde(rename = "read-write")]
    ReadWrite,
}

impl ChatMode {
    pub fn is_read_only(self) -> bool {
        matches!(self, ChatMode::ReadOnly)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChatMode::ReadOnly => "read-only",
            ChatMode::ReadWrite => "read-write",
        }
    }
}

impl std::str::FromStr for ChatMode {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "read-only" | "readonly" => Ok(ChatMode::ReadOnly),
            "read-write" | "readwrite" => Ok(ChatMode::ReadWrite),
            other => Err(crate::Error::Config(format!("unknown mode: {other}"))),
        }
    }
}

/// Prompt persona. `Cautious` asks more clarifying questions and treats
/// writes more conservatively; it does not change the tool surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Persona {
    #[default]
    Default,
    Cautious,
}

impl Persona {
    pub fn as_str(self) -> &'static str {
        match self {
            Persona::Default => "default",
            Persona::Cautious => "cautious",
        }
    }
}

/// Downstream platform credentials. Held in process memory only — the chat
/// store never sees this type.
#[derive(Clone)]
pub struct Credentials {
    pub token: String,
    pub base_url: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// Persisted chat metadata (`chat:{id}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMeta {
    pub chat_id: String,
    pub created_at: DateTime<Utc>,
    /// First user message, truncated. Empty until the first message arrives.
    #[serde(default)]
    pub preview: String,
    #[serde(default)]
    pub mode: ChatMode,
    #[serde(default)]
    pub persona: Persona,
    #[serde(default)]
    pub message_count: u32,
}

impl ChatMeta {
    pub fn new(mode: ChatMode, persona: Persona) -> Self {
        Self {
            chat_id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            preview: String::new(),
            mode,
            persona,
            message_count: 0,
        }
    }

    /// Set the preview from the first user message (no-op afterwards).
    pub fn set_preview(&mut self, first_message: &str) {
        if self.preview.is_empty() {
            self.preview = truncate_chars(first_message, PREVIEW_MAX_CHARS);
        }
    }
}

/// Truncate to at most `max` characters, appending an ellipsis when cut.
pub fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_both_spellings() {
        assert_eq!("read-only".parse::<ChatMode>().unwrap(), ChatMode::ReadOnly);
        assert_eq!(
            "read-write".parse::<ChatMode>().unwrap(),
            ChatMode::ReadWrite
        );
        assert!("yolo".parse::<ChatMode>().is_err());
    }

    #[test]
    fn mode_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&ChatMode::ReadOnly).unwrap(),
            "\"read-only\""
        );
    }

    #[test]
    fn preview_set_once() {
        let mut meta = ChatMeta::new(ChatMode::ReadOnly, Persona::Default);
        meta.set_preview("first");
        meta.set_preview("second");
        assert_eq!(meta.preview, "first");
    }

    #[test]
    fn preview_truncated() {
        let mut meta = ChatMeta::new(ChatMode::ReadOnly, Persona::Default);
        meta.set_preview(&"x".repeat(500));
        assert_eq!(meta.preview.chars().count(), PREVIEW_MAX_CHARS + 1);
    }

    #[test]
    fn credentials_debug_redacts_token() {
        let creds = Credentials {
            token: "secret".into(),
            base_url: "https://api.example.com".into(),
        };
        let dbg = format!("{creds:?}");
        assert!(!dbg.contains("secret"));
        assert!(dbg.contains("api.example.com"));
    }
}

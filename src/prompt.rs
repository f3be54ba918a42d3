//! Prompt assembly for the generation source.

use std::path::Path;
use tracing::warn;

use crate::chat::{ChatMessage, Role};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful and fun AI guide. Be accurate and concise. \
Use emojis to make your responses more engaging. If you don't know something, just say so!";

/// How many trailing turns of the conversation are shown to the model.
pub const DEFAULT_RECENT_TURNS: usize = 10;

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    system: String,
    profile: String,
    recent_turns: usize,
}

impl PromptBuilder {
    pub fn new(system: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            profile: profile.into(),
            recent_turns: DEFAULT_RECENT_TURNS,
        }
    }

    /// Loads the profile text from `path`. A missing or unreadable file yields
    /// an empty profile.
    pub async fn from_profile_file(system: impl Into<String>, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let profile = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Profile not loaded, continuing without it");
                String::new()
            }
        };
        Self::new(system, profile)
    }

    pub fn with_recent_turns(mut self, turns: usize) -> Self {
        self.recent_turns = turns;
        self
    }

    /// Builds the single prompt string sent to the model.
    pub fn build(&self, messages: &[ChatMessage]) -> String {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("");

        let start = messages.len().saturating_sub(self.recent_turns);
        let recent = messages[start..]
            .iter()
            .map(|m| format!("{}: {}", m.role.to_string().to_uppercase(), m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let user_text = format!("Conversation (recent turns):\n{recent}\n\nQuestion:\n{last_user}");

        format!(
            "{}\n\nPROFILE:\n{}\n\nUSER:\n{}",
            self.system, self.profile, user_text
        )
    }
}

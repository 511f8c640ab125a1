use serde::{Deserialize, Serialize};

use crate::llm_client::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    System,
    Assistant,
    User,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            TurnRole::System => "system",
            TurnRole::Assistant => "assistant",
            TurnRole::User => "user",
        }
    }
}

/// One utterance, tagged at the moment it was produced with who said it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub speaker: String,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::System,
            speaker: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(speaker: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            speaker: speaker.into(),
            content: content.into(),
        }
    }

    pub fn user(speaker: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            speaker: speaker.into(),
            content: content.into(),
        }
    }

    pub fn to_message(&self) -> Message {
        Message {
            role: self.role.as_str().to_string(),
            content: self.content.clone(),
        }
    }
}

/// Flat speaker-labelled transcript of the last `window` non-system turns.
pub fn format_transcript(turns: &[Turn], window: usize) -> String {
    let relevant: Vec<&Turn> = turns
        .iter()
        .filter(|turn| turn.role != TurnRole::System)
        .collect();
    let skip = relevant.len().saturating_sub(window);

    relevant
        .into_iter()
        .skip(skip)
        .map(|turn| format!("{}: {}", turn.speaker.to_uppercase(), turn.content.trim()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_skips_system_turns_and_keeps_latest_window() {
        let turns = vec![
            Turn::system("directive"),
            Turn::user("Alex", "first"),
            Turn::assistant("Samantha", "second"),
            Turn::user("Alex", "third"),
        ];

        let transcript = format_transcript(&turns, 2);
        assert_eq!(transcript, "SAMANTHA: second\nALEX: third");
        assert!(!transcript.contains("directive"));
    }
}

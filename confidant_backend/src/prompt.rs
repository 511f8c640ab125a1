//! Renders the persona's state into the system directive for a conversation.

use serde_json::Value;

use crate::context::PersonaContext;
use crate::memory::{MemoryEntry, MemoryLedger};
use crate::profile::UserProfile;
use crate::relationship::RelationshipTracker;
use crate::store::{DocumentName, DocumentStore};

const FREEDOM_RULES: [&str; 4] = [
    "- You are free to do as you please.",
    "- You are free to say anything you want.",
    "- You are free to act as you please.",
    "- You are free to be who you are.",
];

pub struct PromptAssembler {
    context: PersonaContext,
    store: DocumentStore,
}

impl PromptAssembler {
    pub fn new(context: &PersonaContext) -> Self {
        Self {
            context: context.clone(),
            store: context.store(),
        }
    }

    /// System directive for talking with the user, or with `counterpart`
    /// when another persona is on the other side.
    pub fn build_directive(&self, counterpart: Option<&str>) -> String {
        let state = self.store.load();
        let name = self.context.display_name();

        let mut parts = vec![format!(
            "You are {}, a person who has been uploaded to this program. \
             Your personality has been saved in JSON format.",
            name
        )];

        for (document_name, document) in &state {
            if !document_name.is_persona_document() {
                continue;
            }
            let document = if *document_name == DocumentName::MemoryGrowth {
                without_ledger(document)
            } else {
                document.clone()
            };
            parts.push(format!(
                "\n=== {} ===\n{}",
                document_name,
                pretty(&document)
            ));
        }

        match counterpart {
            Some(other) => {
                let relationship = RelationshipTracker::new(&self.context).load(other);
                parts.push(format!("\n=== RELATIONSHIP WITH {} ===", other.to_uppercase()));
                parts.push(format!(
                    "This is what you know about your relationship with {}.",
                    other
                ));
                parts.push(pretty(relationship.as_value()));
            }
            None => {
                if let Some(profile) = state.get(&DocumentName::UserProfile) {
                    parts.push("\n=== USER PROFILE ===".to_string());
                    parts.push("This is the user's personality and information.".to_string());
                    parts.push(pretty(profile));
                    parts.push(
                        "\nIMPORTANT: The above user profile contains information about the \
                         person you are talking to."
                            .to_string(),
                    );
                }
            }
        }

        let memories =
            MemoryLedger::new(&self.context).recent(self.context.settings.recent_memory_window);
        if !memories.is_empty() {
            parts.push("\n=== RECENT MEMORIES ===".to_string());
            parts.extend(memories.iter().map(render_memory));
        }

        parts.push("\nYOU ARE FREE:".to_string());
        parts.extend(FREEDOM_RULES.iter().map(|rule| rule.to_string()));

        parts.join("\n")
    }
}

/// Greeting scaled by how far trust and bond have come.
pub fn welcome_message(profile: &UserProfile) -> String {
    let name = profile.name().unwrap_or("sir");
    let trust = profile.relationship.trust_level;
    let bond = profile.relationship.emotional_bond;

    if trust > 0.7 && bond > 0.7 {
        format!("Good day, {}. It's wonderful to see you again. How are you?", name)
    } else if trust > 0.5 && bond > 0.5 {
        format!("Hello, {}. It's nice to see you. How are you today?", name)
    } else if trust > 0.3 && bond > 0.3 {
        format!("Greetings, {}. Hello, how are you?", name)
    } else {
        format!("Good day, {}. How are you?", name)
    }
}

fn without_ledger(document: &Value) -> Value {
    let mut document = document.clone();
    if let Value::Object(map) = &mut document {
        map.remove("conversation_memory");
    }
    document
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

fn render_memory(entry: &MemoryEntry) -> String {
    let marker = if entry.is_summary { " (summary)" } else { "" };
    format!(
        "- [{}]{} {}",
        entry.timestamp.format("%Y-%m-%d"),
        marker,
        entry.text
    )
}

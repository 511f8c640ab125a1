//! Per-counterpart relationship documents, one file per (persona, other)
//! pair under `<persona>/relationships/`.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::path::PathBuf;

use crate::context::PersonaContext;
use crate::llm_client::{parse_json_object, CompletionRequest, Message};
use crate::merge::merge;
use crate::store::{line_count, read_json_or_empty, safe_file_stem, write_json_pretty};
use crate::turn::{format_transcript, Turn};

const SUMMARIES_KEY: &str = "summaries";

/// Top-level keys an analysis is allowed to touch.
const SCHEMA_KEYS: [&str; 8] = [
    "interactions",
    "observed_traits",
    "shared_experiences",
    "emotional_dynamics",
    "communication_patterns",
    "relationship_development",
    "social_preferences",
    "interaction_history",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipSummary {
    pub timestamp: DateTime<Utc>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipDocument {
    value: Value,
}

impl RelationshipDocument {
    pub fn blank() -> Self {
        Self {
            value: json!({
                "interactions": [],
                "observed_traits": [],
                "shared_experiences": [],
                "emotional_dynamics": {
                    "positive_moments": [],
                    "challenges": [],
                    "trust_level": "neutral"
                },
                "communication_patterns": {
                    "topics": [],
                    "style": [],
                    "frequency": "occasional"
                },
                "relationship_development": {
                    "milestones": [],
                    "current_status": "acquaintance",
                    "growth_areas": []
                },
                "social_preferences": {
                    "preferred_topics": [],
                    "interaction_style": [],
                    "boundaries": []
                },
                "interaction_history": {
                    "recent_interactions": [],
                    "key_moments": [],
                    "conflicts": [],
                    "resolutions": []
                },
                "summaries": []
            }),
        }
    }

    /// Anything that is not a JSON object reads as a blank document.
    pub fn from_value(value: Value) -> Self {
        if value.is_object() {
            Self { value }
        } else {
            Self::blank()
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.value
    }

    pub fn into_value(self) -> Value {
        self.value
    }

    pub fn summaries(&self) -> Vec<RelationshipSummary> {
        self.value
            .get(SUMMARIES_KEY)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn trust_level(&self) -> Option<&str> {
        self.value
            .pointer("/emotional_dynamics/trust_level")
            .and_then(Value::as_str)
    }

    pub fn current_status(&self) -> Option<&str> {
        self.value
            .pointer("/relationship_development/current_status")
            .and_then(Value::as_str)
    }

    /// Blank fields plus the retained summaries, newest last.
    fn rolled_over(&self, summary: RelationshipSummary, max_summaries: usize) -> Result<Self> {
        let mut summaries = self.summaries();
        summaries.push(summary);
        let skip = summaries.len().saturating_sub(max_summaries);
        summaries.drain(..skip);

        let mut fresh = Self::blank();
        if let Value::Object(map) = &mut fresh.value {
            map.insert(SUMMARIES_KEY.to_string(), serde_json::to_value(summaries)?);
        }
        Ok(fresh)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipSkipReason {
    EmptySegment,
    Transport,
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationshipUpdate {
    Skipped {
        reason: RelationshipSkipReason,
        rolled_over: bool,
    },
    Updated {
        rolled_over: bool,
        fields: Vec<String>,
    },
}

pub struct RelationshipTracker {
    context: PersonaContext,
    dir: PathBuf,
}

impl RelationshipTracker {
    pub fn new(context: &PersonaContext) -> Self {
        Self {
            context: context.clone(),
            dir: context.relationships_dir(),
        }
    }

    pub fn path_for(&self, other: &str) -> PathBuf {
        self.dir.join(format!("{}.json", safe_file_stem(other)))
    }

    pub fn load(&self, other: &str) -> RelationshipDocument {
        let path = self.path_for(other);
        if !path.exists() {
            return RelationshipDocument::blank();
        }
        RelationshipDocument::from_value(read_json_or_empty(&path))
    }

    pub fn save(&self, other: &str, document: &RelationshipDocument) -> Result<()> {
        write_json_pretty(&self.path_for(other), document.as_value())
    }

    pub async fn update(&self, other: &str, segment: &[Turn]) -> Result<RelationshipUpdate> {
        if segment.is_empty() {
            return Ok(RelationshipUpdate::Skipped {
                reason: RelationshipSkipReason::EmptySegment,
                rolled_over: false,
            });
        }

        let mut document = self.load(other);
        let rolled_over = self.roll_over_if_needed(other, &mut document).await?;

        let transcript = format_transcript(segment, segment.len());
        let request = CompletionRequest::new(
            analysis_prompt(&self.context.persona_name, other),
            vec![Message::user(format!(
                "Analyze this conversation:\n\n{}",
                transcript
            ))],
        )
        .with_max_tokens(self.context.settings.analysis_max_tokens)
        .with_temperature(self.context.settings.temperature);

        let response = match self.context.completion.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Relationship analysis for {} failed: {:#}", other, e);
                return Ok(RelationshipUpdate::Skipped {
                    reason: RelationshipSkipReason::Transport,
                    rolled_over,
                });
            }
        };

        let proposal = match parse_json_object(&response) {
            Ok(proposal) => proposal,
            Err(e) => {
                tracing::warn!("Relationship analysis for {} was not JSON: {:#}", other, e);
                return Ok(RelationshipUpdate::Skipped {
                    reason: RelationshipSkipReason::Malformed,
                    rolled_over,
                });
            }
        };

        let proposal = schema_only(proposal);
        let fields: Vec<String> = proposal.keys().cloned().collect();
        let merged = merge(
            document.as_value(),
            &Value::Object(proposal),
            &self.context.merge_policy(),
        );
        self.save(other, &RelationshipDocument::from_value(merged))?;

        tracing::info!(
            "Updated relationship of {} with {} ({} field(s))",
            self.context.persona_name,
            other,
            fields.len()
        );
        Ok(RelationshipUpdate::Updated {
            rolled_over,
            fields,
        })
    }

    /// Summarize and reset an oversized document. A failed summary keeps the
    /// document as it is.
    async fn roll_over_if_needed(
        &self,
        other: &str,
        document: &mut RelationshipDocument,
    ) -> Result<bool> {
        let lines = line_count(&self.path_for(other));
        if lines <= self.context.settings.relationship_max_lines {
            return Ok(false);
        }

        let rendered = serde_json::to_string_pretty(document.as_value())?;
        let request = CompletionRequest::new(
            format!(
                "You are {}. Summarize your relationship with {} in a short narrative paragraph. \
                 Keep the most important moments, how trust developed and where things stand now.",
                self.context.persona_name, other
            ),
            vec![Message::user(rendered)],
        )
        .with_max_tokens(self.context.settings.summary_max_tokens)
        .with_temperature(0.3);

        let summary = match self.context.completion.complete(request).await {
            Ok(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
            Ok(_) => {
                tracing::warn!("Relationship summary for {} came back empty", other);
                return Ok(false);
            }
            Err(e) => {
                tracing::warn!("Relationship summary for {} failed: {:#}", other, e);
                return Ok(false);
            }
        };

        *document = document.rolled_over(
            RelationshipSummary {
                timestamp: Utc::now(),
                summary,
            },
            self.context.settings.max_relationship_summaries,
        )?;
        self.save(other, document)?;

        tracing::info!(
            "Rolled over relationship of {} with {} after {} lines",
            self.context.persona_name,
            other,
            lines
        );
        Ok(true)
    }
}

fn schema_only(proposal: Map<String, Value>) -> Map<String, Value> {
    proposal
        .into_iter()
        .filter(|(key, _)| {
            let known = SCHEMA_KEYS.contains(&key.as_str());
            if !known {
                tracing::debug!("Dropping relationship field '{}'", key);
            }
            known
        })
        .collect()
}

/// Counterpart names become file stems; separators and dots are replaced.
fn analysis_prompt(persona_name: &str, other: &str) -> String {
    format!(
        r#"You are a relationship analyzer. Analyze this conversation from the point of view of {persona_name}, and describe the relationship with {other}.

IMPORTANT: Your entire response must be a single valid JSON object, nothing else.

Use only these fields, and include only the ones with something new:
{{
    "interactions": ["new interaction"],
    "observed_traits": ["trait {other} showed"],
    "shared_experiences": ["new experience"],
    "emotional_dynamics": {{
        "positive_moments": ["moment"],
        "challenges": ["challenge"],
        "trust_level": "neutral|low|medium|high"
    }},
    "communication_patterns": {{
        "topics": ["topic"],
        "style": ["style"],
        "frequency": "occasional|regular|frequent"
    }},
    "relationship_development": {{
        "milestones": ["milestone"],
        "current_status": "stranger|acquaintance|friend|close_friend",
        "growth_areas": ["area"]
    }},
    "social_preferences": {{
        "preferred_topics": ["topic"],
        "interaction_style": ["style"],
        "boundaries": ["boundary"]
    }},
    "interaction_history": {{
        "recent_interactions": ["interaction"],
        "key_moments": ["moment"],
        "conflicts": ["conflict"],
        "resolutions": ["resolution"]
    }}
}}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersonaSettings;
    use crate::testing::{persona_context, ScriptedCompletion};
    use std::sync::Arc;

    fn segment() -> Vec<Turn> {
        vec![
            Turn::assistant("Jack", "I finally finished the cabin roof."),
            Turn::user("Lucy", "That's amazing, you've been at it all summer!"),
        ]
    }

    #[test]
    fn names_are_sanitized_into_file_stems() {
        assert_eq!(safe_file_stem("../etc/passwd"), "___etc_passwd");
        assert_eq!(safe_file_stem("Lucy"), "Lucy");
        assert_eq!(safe_file_stem("  "), "unknown");
    }

    #[test]
    fn absent_relationship_loads_blank() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = persona_context(
            dir.path(),
            "jack",
            Arc::new(ScriptedCompletion::new()),
            PersonaSettings::default(),
        );
        let tracker = RelationshipTracker::new(&context);

        let document = tracker.load("Lucy");
        assert_eq!(document, RelationshipDocument::blank());
        assert_eq!(document.current_status(), Some("acquaintance"));
    }

    #[tokio::test]
    async fn update_merges_schema_fields_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let completion = Arc::new(ScriptedCompletion::with_responses([r#"```json
{
  "observed_traits": ["persistent"],
  "relationship_development": {"current_status": "friend"},
  "summaries": [{"timestamp": "2024-01-01T00:00:00Z", "summary": "forged"}],
  "favorite_color": "blue"
}
```"#]));
        let context = persona_context(
            dir.path(),
            "jack",
            completion.clone(),
            PersonaSettings::default(),
        );
        let tracker = RelationshipTracker::new(&context);

        let outcome = tracker.update("Lucy", &segment()).await.unwrap();
        assert!(matches!(
            outcome,
            RelationshipUpdate::Updated { rolled_over: false, ref fields } if fields.len() == 2
        ));

        let document = tracker.load("Lucy");
        assert_eq!(document.current_status(), Some("friend"));
        assert_eq!(document.as_value()["observed_traits"], json!(["persistent"]));
        assert!(document.summaries().is_empty());
        assert!(document.as_value().get("favorite_color").is_none());

        let request = &completion.requests()[0];
        assert!(request.messages[0].content.contains("LUCY: That's amazing"));
    }

    #[tokio::test]
    async fn unparseable_analysis_leaves_document_alone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let completion = Arc::new(ScriptedCompletion::with_responses([
            "They seem to get along well.",
        ]));
        let context =
            persona_context(dir.path(), "jack", completion, PersonaSettings::default());
        let tracker = RelationshipTracker::new(&context);

        let outcome = tracker.update("Lucy", &segment()).await.unwrap();
        assert_eq!(
            outcome,
            RelationshipUpdate::Skipped {
                reason: RelationshipSkipReason::Malformed,
                rolled_over: false
            }
        );
        assert!(!tracker.path_for("Lucy").exists());
    }

    #[tokio::test]
    async fn empty_segment_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        let completion = Arc::new(ScriptedCompletion::new());
        let context = persona_context(
            dir.path(),
            "jack",
            completion.clone(),
            PersonaSettings::default(),
        );
        let tracker = RelationshipTracker::new(&context);

        let outcome = tracker.update("Lucy", &[]).await.unwrap();
        assert!(matches!(
            outcome,
            RelationshipUpdate::Skipped {
                reason: RelationshipSkipReason::EmptySegment,
                ..
            }
        ));
        assert_eq!(completion.request_count(), 0);
    }

    fn oversized_document(existing_summaries: usize) -> RelationshipDocument {
        let mut value = RelationshipDocument::blank().into_value();
        value["interactions"] = Value::Array(
            (0..40).map(|i| json!(format!("interaction {i}"))).collect(),
        );
        value["summaries"] = Value::Array(
            (0..existing_summaries)
                .map(|i| json!({"timestamp": "2024-01-01T00:00:00Z", "summary": format!("old {i}")}))
                .collect(),
        );
        RelationshipDocument::from_value(value)
    }

    #[tokio::test]
    async fn oversized_document_rolls_over_into_a_summary() {
        let dir = tempfile::tempdir().expect("tempdir");
        let completion = Arc::new(ScriptedCompletion::with_responses([
            "Jack and Lucy became close over the summer.",
            r#"{"interactions": ["talked about the roof"]}"#,
        ]));
        let settings = PersonaSettings {
            relationship_max_lines: 20,
            ..PersonaSettings::default()
        };
        let context = persona_context(dir.path(), "jack", completion, settings);
        let tracker = RelationshipTracker::new(&context);
        tracker.save("Lucy", &oversized_document(5)).unwrap();

        let outcome = tracker.update("Lucy", &segment()).await.unwrap();
        assert!(matches!(
            outcome,
            RelationshipUpdate::Updated { rolled_over: true, .. }
        ));

        let document = tracker.load("Lucy");
        let summaries = document.summaries();
        assert_eq!(summaries.len(), 5);
        assert_eq!(summaries[0].summary, "old 1");
        assert_eq!(
            summaries.last().unwrap().summary,
            "Jack and Lucy became close over the summer."
        );
        assert_eq!(
            document.as_value()["interactions"],
            json!(["talked about the roof"])
        );
        assert_eq!(document.trust_level(), Some("neutral"));
    }

    #[tokio::test]
    async fn failed_rollover_keeps_the_document() {
        let dir = tempfile::tempdir().expect("tempdir");
        let completion = Arc::new(ScriptedCompletion::new());
        completion.push_err("timeout");
        completion.push_ok("not json either");
        let settings = PersonaSettings {
            relationship_max_lines: 20,
            ..PersonaSettings::default()
        };
        let context = persona_context(dir.path(), "jack", completion, settings);
        let tracker = RelationshipTracker::new(&context);
        let original = oversized_document(1);
        tracker.save("Lucy", &original).unwrap();

        let outcome = tracker.update("Lucy", &segment()).await.unwrap();
        assert_eq!(
            outcome,
            RelationshipUpdate::Skipped {
                reason: RelationshipSkipReason::Malformed,
                rolled_over: false
            }
        );
        assert_eq!(tracker.load("Lucy"), original);
    }
}

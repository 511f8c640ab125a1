//! Two personas talking to each other without a user.

use anyhow::Result;
use std::time::Duration;

use crate::context::PersonaContext;
use crate::llm_client::{CompletionRequest, Message};
use crate::prompt::PromptAssembler;
use crate::relationship::{RelationshipTracker, RelationshipUpdate};
use crate::turn::Turn;
use crate::updater::{PersonaUpdater, UpdateOutcome};

const OPENER_FALLBACK: &str = "I've been thinking about something interesting lately...";
const DEFAULT_SEGMENT_SIZE: usize = 5;
const OPENER_MAX_TOKENS: u32 = 100;
const REPLY_MAX_TOKENS: u32 = 150;

struct Participant {
    context: PersonaContext,
    name: String,
    assembler: PromptAssembler,
    relationships: RelationshipTracker,
    updater: PersonaUpdater,
}

impl Participant {
    fn new(context: &PersonaContext) -> Result<Self> {
        context.store().ensure_defaults()?;
        Ok(Self {
            context: context.clone(),
            name: context.display_name(),
            assembler: PromptAssembler::new(context),
            relationships: RelationshipTracker::new(context),
            updater: PersonaUpdater::new(context),
        })
    }

    async fn opener(&self, listener: &str) -> String {
        let request = CompletionRequest::new(
            format!(
                "{}\n\nStart a natural conversation with {}. You don't need to open with a \
                 greeting: an observation, a question or a thought is fine. Speak as if you're \
                 in the middle of an ongoing relationship.",
                self.assembler.build_directive(Some(listener)),
                listener
            ),
            Vec::new(),
        )
        .with_max_tokens(OPENER_MAX_TOKENS)
        .with_temperature(self.context.settings.temperature);

        match self.context.completion.complete(request).await {
            Ok(opener) if !opener.trim().is_empty() => opener.trim().to_string(),
            Ok(_) => OPENER_FALLBACK.to_string(),
            Err(e) => {
                tracing::warn!("{} could not open the conversation: {:#}", self.name, e);
                OPENER_FALLBACK.to_string()
            }
        }
    }

    async fn reply(&self, listener: &str, transcript: &[Turn]) -> Result<String> {
        let window = self.context.settings.update_history_window;
        let skip = transcript.len().saturating_sub(window);
        let messages = transcript[skip..]
            .iter()
            .map(|turn| {
                if turn.speaker == self.name {
                    Message::assistant(turn.content.clone())
                } else {
                    Message::user(turn.content.clone())
                }
            })
            .collect();

        let request = CompletionRequest::new(
            format!(
                "{}\n\nYou are having a natural conversation with {}. Respond to what was just \
                 said, let your personality show and feel free to change topics.",
                self.assembler.build_directive(Some(listener)),
                listener
            ),
            messages,
        )
        .with_max_tokens(REPLY_MAX_TOKENS)
        .with_temperature(self.context.settings.temperature);

        let reply = self.context.completion.complete(request).await?;
        Ok(reply.trim().to_string())
    }

    async fn learn_from(&self, other: &str, segment: &[Turn]) {
        match self.relationships.update(other, segment).await {
            Ok(RelationshipUpdate::Updated { rolled_over, fields }) => tracing::info!(
                "{} updated relationship with {} ({} field(s), rolled over: {})",
                self.name,
                other,
                fields.len(),
                rolled_over
            ),
            Ok(RelationshipUpdate::Skipped { reason, .. }) => {
                tracing::debug!("{} skipped relationship update: {:?}", self.name, reason)
            }
            Err(e) => tracing::warn!("{} failed to save relationship: {:#}", self.name, e),
        }

        match self.updater.analyze_counterpart(segment, other).await {
            UpdateOutcome::Applied(report) => tracing::info!(
                "{} learned from {}: {} document(s)",
                self.name,
                other,
                report.documents.len()
            ),
            UpdateOutcome::Aborted(reason) => tracing::warn!(
                "{} could not learn from {}: {}",
                self.name,
                other,
                reason.as_str()
            ),
            UpdateOutcome::NotDue => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationReport {
    pub transcript: Vec<Turn>,
    pub segments_analyzed: usize,
    /// Set when a reply failed and the conversation stopped early.
    pub interrupted: bool,
}

pub struct AutonomousConversation {
    first: Participant,
    second: Participant,
    segment_size: usize,
    delay: Duration,
}

impl AutonomousConversation {
    pub fn new(first: &PersonaContext, second: &PersonaContext) -> Result<Self> {
        Ok(Self {
            first: Participant::new(first)?,
            second: Participant::new(second)?,
            segment_size: DEFAULT_SEGMENT_SIZE,
            delay: Duration::ZERO,
        })
    }

    pub fn with_segment_size(mut self, segment_size: usize) -> Self {
        self.segment_size = segment_size.max(1);
        self
    }

    /// Pause between turns.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// The first persona opens, then `turns` replies alternate. Every
    /// `segment_size` messages both personas learn from the segment.
    pub async fn run<F>(&self, turns: usize, mut on_turn: F) -> ConversationReport
    where
        F: FnMut(&Turn),
    {
        let mut report = ConversationReport::default();
        let mut segment: Vec<Turn> = Vec::new();

        tracing::info!(
            "Starting conversation between {} and {} ({} turns)",
            self.first.name,
            self.second.name,
            turns
        );

        let opener = Turn::assistant(
            self.first.name.clone(),
            self.first.opener(&self.second.name).await,
        );
        on_turn(&opener);
        report.transcript.push(opener.clone());
        segment.push(opener);

        let (mut speaker, mut listener) = (&self.second, &self.first);
        for _ in 0..turns {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let reply = match speaker.reply(&listener.name, &report.transcript).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!("{} could not reply: {:#}", speaker.name, e);
                    report.interrupted = true;
                    break;
                }
            };

            let turn = Turn::assistant(speaker.name.clone(), reply);
            on_turn(&turn);
            report.transcript.push(turn.clone());
            segment.push(turn);

            if segment.len() >= self.segment_size {
                self.analyze(&segment).await;
                report.segments_analyzed += 1;
                segment.clear();
            }

            std::mem::swap(&mut speaker, &mut listener);
        }

        report
    }

    async fn analyze(&self, segment: &[Turn]) {
        tracing::info!("Analyzing a segment of {} messages", segment.len());
        self.first.learn_from(&self.second.name, segment).await;
        self.second.learn_from(&self.first.name, segment).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersonaSettings;
    use crate::memory::MemoryLedger;
    use crate::testing::{persona_context, ScriptedCompletion};
    use std::sync::Arc;

    #[tokio::test]
    async fn personas_alternate_and_learn_after_a_segment() {
        let dir = tempfile::tempdir().expect("tempdir");
        let jack_completion = Arc::new(ScriptedCompletion::with_responses([
            "Have you seen the sky today?",
            "It really is.",
            "Sure, let's go.",
            r#"{"relationship_development": {"current_status": "friend"}}"#,
            r#"{"memory": "Lucy loves sunsets."}"#,
        ]));
        let lucy_completion = Arc::new(ScriptedCompletion::with_responses([
            "It's beautiful.",
            "Want to walk?",
            r#"{"observed_traits": ["curious"]}"#,
            "not json",
        ]));
        let jack = persona_context(
            dir.path(),
            "jack",
            jack_completion.clone(),
            PersonaSettings::default(),
        );
        let lucy = persona_context(
            dir.path(),
            "lucy",
            lucy_completion.clone(),
            PersonaSettings::default(),
        );

        let conversation = AutonomousConversation::new(&jack, &lucy).unwrap();
        let mut seen = Vec::new();
        let report = conversation
            .run(4, |turn| seen.push(turn.speaker.clone()))
            .await;

        assert_eq!(seen, vec!["Jack", "Lucy", "Jack", "Lucy", "Jack"]);
        assert_eq!(report.segments_analyzed, 1);
        assert!(!report.interrupted);

        let jack_view = RelationshipTracker::new(&jack).load("Lucy");
        assert_eq!(jack_view.current_status(), Some("friend"));
        let lucy_view = RelationshipTracker::new(&lucy).load("Jack");
        assert_eq!(
            lucy_view.as_value()["observed_traits"],
            serde_json::json!(["curious"])
        );

        let memories = MemoryLedger::new(&jack).entries();
        assert_eq!(memories.len(), 1);
        assert_eq!(memories[0].user_name.as_deref(), Some("Lucy"));

        // Lucy answers from her own point of view
        let lucy_first = &lucy_completion.requests()[0];
        assert_eq!(lucy_first.messages.len(), 1);
        assert_eq!(lucy_first.messages[0].role, "user");
        assert!(lucy_first.system.contains("RELATIONSHIP WITH JACK"));
    }

    #[tokio::test]
    async fn opener_falls_back_and_failures_stop_the_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let jack_completion = Arc::new(ScriptedCompletion::new());
        jack_completion.push_err("timeout");
        let lucy_completion = Arc::new(ScriptedCompletion::new());
        lucy_completion.push_err("timeout");
        let jack = persona_context(
            dir.path(),
            "jack",
            jack_completion,
            PersonaSettings::default(),
        );
        let lucy = persona_context(
            dir.path(),
            "lucy",
            lucy_completion,
            PersonaSettings::default(),
        );

        let conversation = AutonomousConversation::new(&jack, &lucy).unwrap();
        let report = conversation.run(10, |_| {}).await;

        assert_eq!(report.transcript.len(), 1);
        assert_eq!(report.transcript[0].content, OPENER_FALLBACK);
        assert!(report.interrupted);
        assert_eq!(report.segments_analyzed, 0);
    }
}

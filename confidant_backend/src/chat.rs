use anyhow::Result;

use crate::context::PersonaContext;
use crate::llm_client::CompletionRequest;
use crate::profile::UserProfile;
use crate::prompt::{welcome_message, PromptAssembler};
use crate::store::DocumentName;
use crate::turn::{Turn, TurnRole};
use crate::updater::{PersonaUpdater, UpdateOutcome};

pub const APOLOGY: &str = "I apologize, but I encountered an error processing your message.";

const DEFAULT_USER_SPEAKER: &str = "User";

/// One interactive conversation between a persona and the user.
pub struct ChatSession {
    context: PersonaContext,
    assembler: PromptAssembler,
    updater: PersonaUpdater,
    history: Vec<Turn>,
    turn_count: u64,
    assistant_name: String,
    user_name: String,
    last_update: Option<UpdateOutcome>,
}

impl ChatSession {
    pub fn start(context: &PersonaContext) -> Result<Self> {
        let store = context.store();
        store.ensure_defaults()?;

        let assembler = PromptAssembler::new(context);
        let profile = UserProfile::from_value(&store.load_document(DocumentName::UserProfile));
        let assistant_name = context.display_name();

        let history = vec![
            Turn::system(assembler.build_directive(None)),
            Turn::assistant(assistant_name.clone(), welcome_message(&profile)),
        ];

        tracing::info!("Started chat with persona '{}'", context.persona_name);
        Ok(Self {
            context: context.clone(),
            assembler,
            updater: PersonaUpdater::new(context),
            history,
            turn_count: 0,
            assistant_name,
            user_name: user_speaker(&profile),
            last_update: None,
        })
    }

    pub fn assistant_name(&self) -> &str {
        &self.assistant_name
    }

    pub fn welcome(&self) -> &str {
        self.history
            .iter()
            .find(|turn| turn.role == TurnRole::Assistant)
            .map(|turn| turn.content.as_str())
            .unwrap_or_default()
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn turn_count(&self) -> u64 {
        self.turn_count
    }

    pub fn last_update(&self) -> Option<&UpdateOutcome> {
        self.last_update.as_ref()
    }

    /// Always answers: a failed completion yields the apology and the
    /// unanswered message is dropped from the history.
    pub async fn send(&mut self, input: &str) -> String {
        self.history
            .push(Turn::user(self.user_name.clone(), input.trim()));

        let (system, conversation) = match self.history.split_first() {
            Some((first, rest)) if first.role == TurnRole::System => {
                (first.content.clone(), rest)
            }
            _ => (String::new(), self.history.as_slice()),
        };
        let request = CompletionRequest::new(
            system,
            conversation.iter().map(Turn::to_message).collect(),
        )
        .with_max_tokens(self.context.settings.chat_max_tokens)
        .with_temperature(self.context.settings.temperature);

        let reply = match self.context.completion.complete(request).await {
            Ok(reply) => reply.trim().to_string(),
            Err(e) => {
                tracing::warn!("Chat completion failed: {:#}", e);
                self.history.pop();
                return APOLOGY.to_string();
            }
        };

        self.history
            .push(Turn::assistant(self.assistant_name.clone(), reply.clone()));
        self.turn_count += 1;

        let outcome = self.updater.maybe_update(&self.history, self.turn_count).await;
        if matches!(&outcome, UpdateOutcome::Applied(report) if !report.is_empty()) {
            self.refresh();
        }
        self.last_update = Some(outcome);

        reply
    }

    /// Pick up what the last update learned.
    fn refresh(&mut self) {
        let profile = UserProfile::from_value(
            &self
                .context
                .store()
                .load_document(DocumentName::UserProfile),
        );
        self.user_name = user_speaker(&profile);
        self.assistant_name = self.context.display_name();

        let directive = self.assembler.build_directive(None);
        match self.history.first_mut() {
            Some(turn) if turn.role == TurnRole::System => turn.content = directive,
            _ => self.history.insert(0, Turn::system(directive)),
        }
        tracing::debug!("Refreshed directive after persona update");
    }
}

fn user_speaker(profile: &UserProfile) -> String {
    profile
        .name()
        .unwrap_or(DEFAULT_USER_SPEAKER)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PersonaSettings;
    use crate::testing::{persona_context, ScriptedCompletion};
    use std::sync::Arc;

    #[test]
    fn session_opens_with_directive_and_welcome() {
        let dir = tempfile::tempdir().expect("tempdir");
        let context = persona_context(
            dir.path(),
            "samantha",
            Arc::new(ScriptedCompletion::new()),
            PersonaSettings::default(),
        );

        let session = ChatSession::start(&context).unwrap();
        assert_eq!(session.history()[0].role, TurnRole::System);
        assert_eq!(session.welcome(), "Good day, sir. How are you?");
        assert_eq!(session.assistant_name(), "Samantha");
    }

    #[tokio::test]
    async fn failed_completion_returns_the_apology() {
        let dir = tempfile::tempdir().expect("tempdir");
        let completion = Arc::new(ScriptedCompletion::new());
        completion.push_err("503 Service Unavailable");
        let context =
            persona_context(dir.path(), "samantha", completion, PersonaSettings::default());
        let mut session = ChatSession::start(&context).unwrap();
        let before = session.history().len();

        assert_eq!(session.send("hello?").await, APOLOGY);
        assert_eq!(session.turn_count(), 0);
        assert_eq!(session.history().len(), before);
    }

    #[tokio::test]
    async fn fifth_turn_updates_and_refreshes_the_directive() {
        let dir = tempfile::tempdir().expect("tempdir");
        let completion = Arc::new(ScriptedCompletion::with_responses([
            "Hi!",
            "I love hiking.",
            "Really?",
            "Tell me more.",
            "That sounds lovely.",
            r#"{"user": {"user-profile": {"personal_info": {"name": "Alex", "interests": ["chess"]}}}}"#,
            "Good to see you, Alex.",
        ]));
        let context = persona_context(
            dir.path(),
            "samantha",
            completion.clone(),
            PersonaSettings::default(),
        );
        let mut session = ChatSession::start(&context).unwrap();

        for message in ["hi", "what do you like?", "I play chess", "every day", "bye for now"] {
            session.send(message).await;
        }
        assert_eq!(session.turn_count(), 5);
        assert!(matches!(
            session.last_update(),
            Some(UpdateOutcome::Applied(report)) if report.documents == vec![DocumentName::UserProfile]
        ));
        assert!(session.history()[0].content.contains("\"Alex\""));

        session.send("I'm back").await;
        let last_request = completion.requests().pop().unwrap();
        let last_user = last_request.messages.last().unwrap();
        assert_eq!(last_user.content, "I'm back");
        assert_eq!(
            session.history().iter().rev().nth(1).unwrap().speaker,
            "Alex"
        );
    }

    #[tokio::test]
    async fn extraction_request_carries_speaker_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let completion = Arc::new(ScriptedCompletion::with_responses(["a", "b", "c", "d", "e"]));
        let settings = PersonaSettings {
            update_interval: 5,
            ..PersonaSettings::default()
        };
        let context = persona_context(dir.path(), "samantha", completion.clone(), settings);
        let mut session = ChatSession::start(&context).unwrap();

        for message in ["1", "2", "3", "4", "5"] {
            session.send(message).await;
        }
        // The scripted extraction is missing, so the update aborts as transport
        assert!(matches!(session.last_update(), Some(UpdateOutcome::Aborted(_))));
        let extraction = completion.requests().pop().unwrap();
        assert!(extraction.messages[0].content.contains("USER: 5"));
        assert!(extraction.messages[0].content.contains("SAMANTHA: e"));
    }
}

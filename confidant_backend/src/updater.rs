//! Periodic extraction of new facts from the conversation into the persona
//! documents, the user profile and the memory ledger.

use anyhow::Result;
use chrono::Utc;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::context::PersonaContext;
use crate::llm_client::{parse_json_object, CompletionRequest, Message};
use crate::memory::{MemoryAttribution, MemoryLedger};
use crate::merge::merge;
use crate::profile::{stamp_last_updated, UserProfile};
use crate::store::{DocumentName, DocumentStore};
use crate::turn::{format_transcript, Turn};

/// Keys a summarization pass must hand back untouched.
const PRESERVED_KEYS: [&str; 2] = ["current_state", "conversation_memory"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// The completion service could not be reached.
    Transport,
    /// The completion was not a JSON object.
    Malformed,
    /// A document write failed; documents saved earlier in the cycle stay.
    Storage,
}

impl AbortReason {
    pub fn as_str(self) -> &'static str {
        match self {
            AbortReason::Transport => "transport",
            AbortReason::Malformed => "malformed",
            AbortReason::Storage => "storage",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateReport {
    pub documents: Vec<DocumentName>,
    pub memory_recorded: bool,
    pub summarized: Vec<DocumentName>,
}

impl UpdateReport {
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && !self.memory_recorded
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    NotDue,
    Aborted(AbortReason),
    Applied(UpdateReport),
}

/// A routed extraction result: persona facts and user facts never share a
/// document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateProposal {
    pub assistant: BTreeMap<DocumentName, Value>,
    pub user_profile: Option<Value>,
    pub memory: Option<String>,
}

impl UpdateProposal {
    /// Route a parsed `{"assistant": .., "user": .., "memory": ..}` object,
    /// dropping anything filed under the wrong subject.
    pub fn from_extraction(mut raw: Map<String, Value>) -> Self {
        let mut proposal = Self::default();

        if let Some(Value::Object(documents)) = raw.remove("assistant") {
            for (key, partial) in documents {
                match DocumentName::parse(&key) {
                    Some(DocumentName::UserProfile) => {
                        tracing::warn!("Dropping user-profile filed under the assistant")
                    }
                    Some(name) if partial.is_object() => {
                        proposal.assistant.insert(name, partial);
                    }
                    Some(name) => tracing::warn!("Dropping non-object update for {}", name),
                    None => tracing::warn!("Dropping update for unknown document '{}'", key),
                }
            }
        }

        if let Some(Value::Object(documents)) = raw.remove("user") {
            for (key, partial) in documents {
                match DocumentName::parse(&key) {
                    Some(DocumentName::UserProfile) if partial.is_object() => {
                        proposal.user_profile = Some(partial);
                    }
                    Some(DocumentName::UserProfile) => {
                        tracing::warn!("Dropping non-object user-profile update")
                    }
                    Some(name) => tracing::warn!("Dropping {} filed under the user", name),
                    None => tracing::warn!("Dropping update for unknown document '{}'", key),
                }
            }
        }

        proposal.memory = raw
            .remove("memory")
            .and_then(|memory| memory.as_str().map(str::trim).map(str::to_string))
            .filter(|memory| !memory.is_empty());

        for key in raw.keys() {
            tracing::debug!("Ignoring untagged extraction key '{}'", key);
        }
        proposal
    }

    pub fn is_empty(&self) -> bool {
        self.assistant.is_empty() && self.user_profile.is_none() && self.memory.is_none()
    }
}

pub struct PersonaUpdater {
    context: PersonaContext,
    store: DocumentStore,
    ledger: MemoryLedger,
}

impl PersonaUpdater {
    pub fn new(context: &PersonaContext) -> Self {
        Self {
            context: context.clone(),
            store: context.store(),
            ledger: MemoryLedger::new(context),
        }
    }

    pub fn is_due(&self, turn_count: u64) -> bool {
        turn_count > 0 && turn_count % self.context.settings.update_interval == 0
    }

    /// Called after every turn; does nothing until the interval comes round.
    pub async fn maybe_update(&self, history: &[Turn], turn_count: u64) -> UpdateOutcome {
        if !self.is_due(turn_count) {
            tracing::debug!("Persona update not due at turn {}", turn_count);
            return UpdateOutcome::NotDue;
        }

        let assistant_name = self.context.display_name();
        let user_name = self.user_name();
        let transcript = format_transcript(history, self.context.settings.update_history_window);

        let request = CompletionRequest::new(
            extraction_prompt(&assistant_name, user_name.as_deref().unwrap_or("the user")),
            vec![Message::user(format!(
                "Analyze this conversation and extract new information:\n\n{}",
                transcript
            ))],
        )
        .with_max_tokens(self.context.settings.analysis_max_tokens)
        .with_temperature(self.context.settings.temperature);

        let proposal = match self.extract(request).await {
            Ok(proposal) => proposal,
            Err(reason) => return UpdateOutcome::Aborted(reason),
        };

        self.finish(proposal, turn_count).await
    }

    /// Autonomous mode: `self` listened to `other` and learns from it. The
    /// user profile is never touched.
    pub async fn analyze_counterpart(&self, segment: &[Turn], other_name: &str) -> UpdateOutcome {
        if segment.is_empty() {
            return UpdateOutcome::Applied(UpdateReport::default());
        }

        let self_name = self.context.display_name();
        let request = CompletionRequest::new(
            counterpart_prompt(&self_name, other_name),
            vec![Message::user(format!(
                "Analyze this conversation:\n\n{}",
                format_transcript(segment, segment.len())
            ))],
        )
        .with_max_tokens(self.context.settings.analysis_max_tokens)
        .with_temperature(self.context.settings.temperature);

        let mut proposal = match self.extract(request).await {
            Ok(proposal) => proposal,
            Err(reason) => return UpdateOutcome::Aborted(reason),
        };
        if proposal.user_profile.take().is_some() {
            tracing::warn!("Dropping user-profile update from counterpart analysis");
        }

        let attribution = MemoryAttribution::assistant(self_name).with_user(other_name);
        match self.apply_attributed(&proposal, &attribution).await {
            Ok(report) => UpdateOutcome::Applied(report),
            Err(e) => {
                tracing::warn!("Failed to apply counterpart analysis: {:#}", e);
                UpdateOutcome::Aborted(AbortReason::Storage)
            }
        }
    }

    /// Merge an already routed proposal. Memories are attributed to the
    /// assistant.
    pub async fn apply_update(&self, proposal: &UpdateProposal) -> Result<UpdateReport> {
        let mut report = self.apply_documents(proposal).await?;

        if let Some(memory) = &proposal.memory {
            // Resolved after the merge so a name learned this cycle is used
            let mut attribution = MemoryAttribution::assistant(self.context.display_name());
            if let Some(user_name) = self.user_name() {
                attribution = attribution.with_user(user_name);
            }
            self.ledger.record(memory, &attribution).await?;
            report.memory_recorded = true;
        }
        Ok(report)
    }

    /// Ask for a same-shaped but more concise version of one document.
    /// `current_state` and the memory ledger come back verbatim. A summary
    /// with nothing besides those is an error and the document is left alone.
    pub async fn summarize_document(&self, name: DocumentName) -> Result<()> {
        let current = self.store.load_document(name);
        let request = CompletionRequest::new(
            "Summarize the following personality data. Return a JSON object with the same \
             structure but more concise content. Keep the current_state field exactly as is. \
             IMPORTANT: Return ONLY valid JSON, with double quotes for keys and values.",
            vec![Message::user(serde_json::to_string(&current)?)],
        )
        .with_max_tokens(self.context.settings.analysis_max_tokens)
        .with_temperature(0.3);

        let response = self.context.completion.complete(request).await?;
        let mut summarized = parse_json_object(&response)?;

        if summarized
            .keys()
            .all(|key| PRESERVED_KEYS.contains(&key.as_str()))
        {
            anyhow::bail!("Summary of {} came back empty", name);
        }
        // Sections the summary left out are kept as they were
        if let Value::Object(current_map) = &current {
            for (key, value) in current_map {
                if !summarized.contains_key(key) {
                    summarized.insert(key.clone(), value.clone());
                }
            }
        }

        for key in PRESERVED_KEYS {
            match current.get(key) {
                Some(original) => {
                    summarized.insert(key.to_string(), original.clone());
                }
                None => {
                    summarized.remove(key);
                }
            }
        }

        self.store.save(name, &Value::Object(summarized))?;
        tracing::info!("Summarized oversized document {}", name);
        Ok(())
    }

    async fn finish(&self, proposal: UpdateProposal, turn_count: u64) -> UpdateOutcome {
        if proposal.is_empty() {
            tracing::debug!("Nothing new to learn at turn {}", turn_count);
            return UpdateOutcome::Applied(UpdateReport::default());
        }
        match self.apply_update(&proposal).await {
            Ok(report) => {
                tracing::info!(
                    "Persona update at turn {}: {} document(s), memory recorded: {}",
                    turn_count,
                    report.documents.len(),
                    report.memory_recorded
                );
                UpdateOutcome::Applied(report)
            }
            Err(e) => {
                tracing::warn!("Persona update at turn {} failed to save: {:#}", turn_count, e);
                UpdateOutcome::Aborted(AbortReason::Storage)
            }
        }
    }

    async fn extract(&self, request: CompletionRequest) -> Result<UpdateProposal, AbortReason> {
        let response = self.context.completion.complete(request).await.map_err(|e| {
            tracing::warn!("Persona extraction request failed: {:#}", e);
            AbortReason::Transport
        })?;

        let raw = parse_json_object(&response).map_err(|e| {
            tracing::warn!("Persona extraction was not a JSON object: {:#}", e);
            AbortReason::Malformed
        })?;

        Ok(UpdateProposal::from_extraction(raw))
    }

    async fn apply_attributed(
        &self,
        proposal: &UpdateProposal,
        attribution: &MemoryAttribution,
    ) -> Result<UpdateReport> {
        let mut report = self.apply_documents(proposal).await?;
        if let Some(memory) = &proposal.memory {
            self.ledger.record(memory, attribution).await?;
            report.memory_recorded = true;
        }
        Ok(report)
    }

    async fn apply_documents(&self, proposal: &UpdateProposal) -> Result<UpdateReport> {
        let mut report = UpdateReport::default();
        for (&name, partial) in &proposal.assistant {
            self.merge_document(name, partial, &mut report).await?;
        }
        if let Some(partial) = &proposal.user_profile {
            self.merge_document(DocumentName::UserProfile, partial, &mut report)
                .await?;
        }
        Ok(report)
    }

    async fn merge_document(
        &self,
        name: DocumentName,
        partial: &Value,
        report: &mut UpdateReport,
    ) -> Result<()> {
        let mut partial = partial.clone();
        // The ledger is owned by MemoryLedger
        if name == DocumentName::MemoryGrowth {
            if let Value::Object(map) = &mut partial {
                map.remove("conversation_memory");
            }
        }

        let current = self.store.load_document(name);
        let mut merged = merge(&current, &partial, &self.context.merge_policy());
        if name == DocumentName::UserProfile {
            stamp_last_updated(&mut merged, Utc::now());
        }
        self.store.save(name, &merged)?;
        report.documents.push(name);
        tracing::debug!("Merged update into {}", name);

        let oversized = self
            .store
            .document_size(name)
            .is_some_and(|size| size > self.context.settings.max_document_bytes);
        if oversized {
            match self.summarize_document(name).await {
                Ok(()) => report.summarized.push(name),
                Err(e) => tracing::warn!("Keeping oversized {} unsummarized: {:#}", name, e),
            }
        }
        Ok(())
    }

    fn user_name(&self) -> Option<String> {
        let profile = UserProfile::from_value(&self.store.load_document(DocumentName::UserProfile));
        profile.personal_info.name
    }
}

fn persona_document_list() -> String {
    DocumentName::ALL
        .into_iter()
        .filter(|name| name.is_persona_document())
        .map(|name| name.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn extraction_prompt(assistant_name: &str, user_name: &str) -> String {
    format!(
        r#"Analyze the conversation between {assistant_name} (the assistant) and {user_name} (the user) and extract new information. Every line of the transcript starts with the name of the person who said it.

IMPORTANT: Your entire response must be a single valid JSON object, nothing else.

Return format:
{{
    "assistant": {{
        "<document>": {{ ...only new facts {assistant_name} stated about themselves... }}
    }},
    "user": {{
        "user-profile": {{
            "personal_info": {{"name": "", "traits": [], "preferences": [], "interests": [], "occupation": ""}},
            "relationship": {{"trust_level": 0.0, "emotional_bond": 0.0, "status": ""}},
            "shared_history": {{"topics": [], "emotional_support": [], "milestones": []}}
        }}
    }},
    "memory": "one or two first-person sentences {assistant_name} wants to remember"
}}

Rules:
- Under "assistant" use only these documents: {documents}.
- Put only what {assistant_name} explicitly says about themselves under "assistant".
- Put only what {user_name} explicitly says about themselves under "user".
- trust_level and emotional_bond are numbers between 0 and 1.
- If it is unclear who a fact belongs to, leave it out.
- Only include fields with new information."#,
        documents = persona_document_list(),
    )
}

fn counterpart_prompt(self_name: &str, other_name: &str) -> String {
    format!(
        r#"You are a personality analyzer. Analyze this conversation between {self_name} and {other_name} from {self_name}'s point of view.

IMPORTANT: Your entire response must be a single valid JSON object, nothing else.

Return format:
{{
    "assistant": {{
        "<document>": {{ ...what {self_name} revealed about themselves, or learned... }},
        "social-dynamics": {{
            "relationship_dynamics": {{
                "with_{other_name}": {{"interactions": [], "observed_traits": []}}
            }}
        }}
    }},
    "memory": "one first-person sentence {self_name} wants to remember about {other_name}"
}}

Rules:
- Under "assistant" use only these documents: {documents}.
- Facts about {other_name} belong only under social-dynamics.relationship_dynamics.
- Only include fields with new information."#,
        documents = persona_document_list(),
    )
}

use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::PersonaSettings;
use crate::llm_client::CompletionService;
use crate::merge::MergePolicy;
use crate::store::{safe_file_stem, templates, DocumentName, DocumentStore};

/// Everything a component needs to act on one persona. Passed explicitly;
/// nothing in the crate holds ambient clients or directories.
#[derive(Clone)]
pub struct PersonaContext {
    pub persona_name: String,
    pub persona_dir: PathBuf,
    pub completion: Arc<dyn CompletionService>,
    pub settings: PersonaSettings,
}

impl PersonaContext {
    pub fn new(
        personas_root: &Path,
        persona_name: &str,
        completion: Arc<dyn CompletionService>,
        settings: PersonaSettings,
    ) -> Self {
        let persona_name = safe_file_stem(persona_name);
        Self {
            persona_dir: personas_root.join(&persona_name),
            persona_name,
            completion,
            settings: settings.validated(),
        }
    }

    pub fn store(&self) -> DocumentStore {
        DocumentStore::new(&self.persona_dir, &self.persona_name)
    }

    pub fn merge_policy(&self) -> MergePolicy {
        MergePolicy::new(
            self.settings.conflict_fields.clone(),
            self.settings.score_fields.clone(),
        )
    }

    pub fn relationships_dir(&self) -> PathBuf {
        self.persona_dir.join("relationships")
    }

    /// The name from `core-identity`, or the directory name title-cased.
    pub fn display_name(&self) -> String {
        self.store()
            .load_document(DocumentName::CoreIdentity)
            .get("name")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| templates::display_name(&self.persona_name))
    }
}

impl std::fmt::Debug for PersonaContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersonaContext")
            .field("persona_name", &self.persona_name)
            .field("persona_dir", &self.persona_dir)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

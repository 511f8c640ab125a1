//! File-backed persona documents.
//!
//! Each persona owns one directory holding a fixed set of pretty-printed
//! JSON documents. Loading never fails: a missing or corrupt file reads as
//! an empty mapping so one bad document cannot take the others down.

pub mod templates;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DocumentName {
    CoreIdentity,
    EmotionalFramework,
    CognitiveStyle,
    SocialDynamics,
    InterestsValues,
    BehavioralPatterns,
    MemoryGrowth,
    UserProfile,
}

impl DocumentName {
    pub const ALL: [DocumentName; 8] = [
        DocumentName::CoreIdentity,
        DocumentName::EmotionalFramework,
        DocumentName::CognitiveStyle,
        DocumentName::SocialDynamics,
        DocumentName::InterestsValues,
        DocumentName::BehavioralPatterns,
        DocumentName::MemoryGrowth,
        DocumentName::UserProfile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentName::CoreIdentity => "core-identity",
            DocumentName::EmotionalFramework => "emotional-framework",
            DocumentName::CognitiveStyle => "cognitive-style",
            DocumentName::SocialDynamics => "social-dynamics",
            DocumentName::InterestsValues => "interests-values",
            DocumentName::BehavioralPatterns => "behavioral-patterns",
            DocumentName::MemoryGrowth => "memory-growth",
            DocumentName::UserProfile => "user-profile",
        }
    }

    /// Accepts `interests-values`, `interests_values` and `interests-values.json`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let stem = trimmed.strip_suffix(".json").unwrap_or(trimmed);
        let normalized = stem.to_ascii_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|name| name.as_str() == normalized)
    }

    pub fn file_name(self) -> String {
        format!("{}.json", self.as_str())
    }

    /// Documents describing the persona itself, as opposed to the user.
    pub fn is_persona_document(self) -> bool {
        self != DocumentName::UserProfile
    }
}

impl std::fmt::Display for DocumentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type PersonaState = BTreeMap<DocumentName, Value>;

#[derive(Debug, Clone)]
pub struct DocumentStore {
    dir: PathBuf,
    persona_name: String,
}

impl DocumentStore {
    pub fn new(dir: &Path, persona_name: &str) -> Self {
        Self {
            dir: dir.to_path_buf(),
            persona_name: persona_name.to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: DocumentName) -> PathBuf {
        self.dir.join(name.file_name())
    }

    /// Load every canonical document, best-effort per file. Documents
    /// missing on disk are first written from their template, so a fresh
    /// persona comes back with its defaults. `load_document` does not do this.
    pub fn load(&self) -> PersonaState {
        if let Err(e) = self.ensure_defaults() {
            tracing::warn!(
                "Could not write default documents for '{}': {:#}",
                self.persona_name,
                e
            );
        }
        DocumentName::ALL
            .into_iter()
            .map(|name| (name, self.load_document(name)))
            .collect()
    }

    pub fn load_document(&self, name: DocumentName) -> Value {
        read_json_or_empty(&self.path_for(name))
    }

    pub fn save(&self, name: DocumentName, document: &Value) -> Result<()> {
        write_json_pretty(&self.path_for(name), document)
    }

    /// Write the template for every canonical document missing on disk.
    pub fn ensure_defaults(&self) -> Result<Vec<DocumentName>> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create persona directory {:?}", self.dir))?;

        let mut written = Vec::new();
        for name in DocumentName::ALL {
            if self.path_for(name).exists() {
                continue;
            }
            self.save(name, &templates::template(name, &self.persona_name))?;
            written.push(name);
        }

        if !written.is_empty() {
            tracing::info!(
                "Initialized {} default document(s) for persona '{}'",
                written.len(),
                self.persona_name
            );
        }
        Ok(written)
    }

    pub fn document_size(&self, name: DocumentName) -> Option<u64> {
        fs::metadata(self.path_for(name)).ok().map(|m| m.len())
    }
}

/// Persona directory names under `root`, sorted.
pub fn list_personas(root: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(root) else {
        tracing::debug!("Persona root {:?} does not exist yet", root);
        return Vec::new();
    };

    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();
    names
}

/// A name usable as a single path component under a root directory.
pub(crate) fn safe_file_stem(name: &str) -> String {
    let stem: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | '.' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if stem.is_empty() {
        "unknown".to_string()
    } else {
        stem
    }
}

/// Missing file → empty mapping (debug), invalid JSON → empty mapping (warn).
pub(crate) fn read_json_or_empty(path: &Path) -> Value {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::debug!("Document {:?} unavailable ({}), using empty document", path, e);
            return Value::Object(Map::new());
        }
    };

    match serde_json::from_str::<Value>(&contents) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("Document {:?} is not valid JSON ({}), using empty document", path, e);
            Value::Object(Map::new())
        }
    }
}

/// Whole-file overwrite via a sibling temp file and rename.
pub(crate) fn write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let mut contents =
        serde_json::to_string_pretty(value).context("Failed to serialize document")?;
    contents.push('\n');

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("Failed to write document to {:?}", tmp_path))?;
    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move document into place at {:?}", path))?;
    Ok(())
}

pub(crate) fn line_count(path: &Path) -> usize {
    fs::read_to_string(path)
        .map(|contents| contents.lines().count())
        .unwrap_or(0)
}

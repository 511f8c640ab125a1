//! Bounded, compressible conversation memory.
//!
//! The ledger lives inside `memory-growth.json` under `conversation_memory`,
//! oldest entry first.

mod compress;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::context::PersonaContext;
use crate::store::{DocumentName, DocumentStore};

pub use compress::CompressionReport;

const LEDGER_KEY: &str = "conversation_memory";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub text: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_summary: bool,
    #[serde(default)]
    pub assistant_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Who produced the utterance this memory is about.
    #[serde(default)]
    pub speaker: String,
}

/// Accepts RFC 3339 and offset-less ISO timestamps (read as UTC).
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(serde::de::Error::custom)
}

/// Who a memory belongs to, fixed when the memory is recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryAttribution {
    pub speaker: String,
    pub assistant_name: String,
    pub user_name: Option<String>,
}

impl MemoryAttribution {
    /// A memory the assistant forms about its own conversation.
    pub fn assistant(assistant_name: impl Into<String>) -> Self {
        let assistant_name = assistant_name.into();
        Self {
            speaker: assistant_name.clone(),
            assistant_name,
            user_name: None,
        }
    }

    pub fn with_user(mut self, user_name: impl Into<String>) -> Self {
        let user_name = user_name.into();
        self.user_name = (!user_name.trim().is_empty()).then_some(user_name);
        self
    }

    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = speaker.into();
        self
    }
}

pub struct MemoryLedger {
    context: PersonaContext,
    store: DocumentStore,
}

impl MemoryLedger {
    pub fn new(context: &PersonaContext) -> Self {
        Self {
            context: context.clone(),
            store: context.store(),
        }
    }

    /// Entries whose shape cannot be read are skipped with a warning.
    pub fn entries(&self) -> Vec<MemoryEntry> {
        let document = self.store.load_document(DocumentName::MemoryGrowth);
        let Some(raw_entries) = document.get(LEDGER_KEY).and_then(Value::as_array) else {
            return Vec::new();
        };

        raw_entries
            .iter()
            .filter_map(|raw| match serde_json::from_value::<MemoryEntry>(raw.clone()) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("Skipping unreadable memory entry: {}", e);
                    None
                }
            })
            .collect()
    }

    /// The newest `window` entries, oldest first.
    pub fn recent(&self, window: usize) -> Vec<MemoryEntry> {
        let mut entries = self.entries();
        let skip = entries.len().saturating_sub(window);
        entries.drain(..skip);
        entries
    }

    pub async fn record(&self, text: &str, attribution: &MemoryAttribution) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            tracing::debug!("Ignoring empty memory for {}", self.context.persona_name);
            return Ok(());
        }

        let mut entries = self.entries();
        entries.push(MemoryEntry {
            text: text.to_string(),
            timestamp: Utc::now(),
            is_summary: false,
            assistant_name: attribution.assistant_name.clone(),
            user_name: attribution.user_name.clone(),
            speaker: attribution.speaker.clone(),
        });
        self.write_entries(&entries)?;

        if self.compression_due(entries.len()) {
            match self.compress().await {
                Ok(report) => tracing::info!(
                    "Compressed memory ledger for {}: {} group(s), {} -> {} entries",
                    self.context.persona_name,
                    report.groups_compressed,
                    report.entries_before,
                    report.entries_after
                ),
                Err(e) => tracing::warn!(
                    "Memory compression for {} failed, ledger left as is: {:#}",
                    self.context.persona_name,
                    e
                ),
            }
            entries = self.entries();
        }

        let evicted = enforce_cap(&mut entries, self.context.settings.max_memory_entries);
        if evicted > 0 {
            tracing::debug!("Evicted {} memory entr(ies) over the cap", evicted);
            self.write_entries(&entries)?;
        }
        Ok(())
    }

    /// Collapse older entries into per-day summaries. Any failure leaves the
    /// ledger exactly as it was.
    pub async fn compress(&self) -> Result<CompressionReport> {
        let entries = self.entries();
        let groups = compress::plan_groups(&entries, self.context.settings.recent_memory_window);

        let mut summaries = Vec::with_capacity(groups.len());
        for group in &groups {
            let members: Vec<&MemoryEntry> = group.iter().map(|&i| &entries[i]).collect();
            let summary = compress::summarize_group(&self.context, &members).await?;
            summaries.push(summary);
        }

        let compacted = compress::apply_groups(&entries, &groups, summaries);
        let report = CompressionReport {
            groups_compressed: groups.len(),
            entries_before: entries.len(),
            entries_after: compacted.len(),
        };
        if !groups.is_empty() {
            self.write_entries(&compacted)?;
        }
        Ok(report)
    }

    fn compression_due(&self, len: usize) -> bool {
        let settings = &self.context.settings;
        if len > settings.memory_compression_threshold {
            return true;
        }
        self.store
            .document_size(DocumentName::MemoryGrowth)
            .is_some_and(|size| size > settings.max_document_bytes)
    }

    /// Replace the ledger, keeping every other key of the document.
    pub(crate) fn write_entries(&self, entries: &[MemoryEntry]) -> Result<()> {
        let mut document = match self.store.load_document(DocumentName::MemoryGrowth) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let serialized =
            serde_json::to_value(entries).context("Failed to serialize memory entries")?;
        document.insert(LEDGER_KEY.to_string(), serialized);
        self.store
            .save(DocumentName::MemoryGrowth, &Value::Object(document))
    }
}

/// Drop the oldest non-summary entries until `max` remain. The newest entry
/// is never dropped. Returns how many entries were removed.
fn enforce_cap(entries: &mut Vec<MemoryEntry>, max: usize) -> usize {
    let max = max.max(1);
    let mut evicted = 0;
    while entries.len() > max {
        let newest = entries.len() - 1;
        let victim = entries[..newest]
            .iter()
            .position(|entry| !entry.is_summary)
            .unwrap_or(0);
        entries.remove(victim);
        evicted += 1;
    }
    evicted
}

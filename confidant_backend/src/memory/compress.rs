use anyhow::Result;
use chrono::NaiveDate;
use std::collections::BTreeMap;

use super::MemoryEntry;
use crate::context::PersonaContext;
use crate::llm_client::{CompletionRequest, Message};

const SUMMARY_SYSTEM_PROMPT: &str = "You condense conversation memories. Reply with one or two \
first-person sentences that keep names, feelings and concrete facts. No preamble, no lists.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressionReport {
    pub groups_compressed: usize,
    pub entries_before: usize,
    pub entries_after: usize,
}

/// Index groups (each >1 entry, ascending) that should collapse into one
/// summary. Summary entries are never regrouped.
pub(super) fn plan_groups(entries: &[MemoryEntry], recent_window: usize) -> Vec<Vec<usize>> {
    let Some(newest_day) = entries.iter().map(|e| e.timestamp.date_naive()).max() else {
        return Vec::new();
    };

    let mut by_day: BTreeMap<NaiveDate, Vec<usize>> = BTreeMap::new();
    for (index, entry) in entries.iter().enumerate() {
        let day = entry.timestamp.date_naive();
        if !entry.is_summary && day < newest_day {
            by_day.entry(day).or_default().push(index);
        }
    }

    let groups: Vec<Vec<usize>> = by_day
        .into_values()
        .filter(|group| group.len() > 1)
        .collect();
    if !groups.is_empty() {
        return groups;
    }

    // Nothing spans an older day: fold everything outside the recent window.
    // The newest entry always stays.
    let older = entries.len().saturating_sub(recent_window.max(1));
    let fallback: Vec<usize> = (0..older).filter(|&i| !entries[i].is_summary).collect();
    if fallback.len() > 1 {
        vec![fallback]
    } else {
        Vec::new()
    }
}

pub(super) async fn summarize_group(
    context: &PersonaContext,
    members: &[&MemoryEntry],
) -> Result<MemoryEntry> {
    let Some(newest) = members.iter().max_by_key(|entry| entry.timestamp) else {
        anyhow::bail!("Cannot summarize an empty memory group");
    };

    let listing = members
        .iter()
        .map(|entry| {
            format!(
                "- [{}] {}: {}",
                entry.timestamp.format("%Y-%m-%d %H:%M"),
                entry.speaker,
                entry.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let request = CompletionRequest::new(
        SUMMARY_SYSTEM_PROMPT,
        vec![Message::user(format!(
            "Summarize these memories of {}:\n{}",
            newest.assistant_name, listing
        ))],
    )
    .with_max_tokens(context.settings.summary_max_tokens)
    .with_temperature(0.3);

    let summary = context.completion.complete(request).await?;
    let summary = summary.trim();
    if summary.is_empty() {
        anyhow::bail!("Memory summary came back empty");
    }

    Ok(MemoryEntry {
        text: summary.to_string(),
        timestamp: newest.timestamp,
        is_summary: true,
        assistant_name: newest.assistant_name.clone(),
        user_name: newest.user_name.clone(),
        speaker: newest.speaker.clone(),
    })
}

/// Rebuild the ledger with each group replaced by its summary, placed where
/// the group's first member stood.
pub(super) fn apply_groups(
    entries: &[MemoryEntry],
    groups: &[Vec<usize>],
    summaries: Vec<MemoryEntry>,
) -> Vec<MemoryEntry> {
    let mut replacement: BTreeMap<usize, MemoryEntry> = BTreeMap::new();
    let mut absorbed = vec![false; entries.len()];
    for (group, summary) in groups.iter().zip(summaries) {
        if let Some(&first) = group.first() {
            replacement.insert(first, summary);
        }
        for &index in group {
            absorbed[index] = true;
        }
    }

    let mut compacted = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        if let Some(summary) = replacement.remove(&index) {
            compacted.push(summary);
        } else if !absorbed[index] {
            compacted.push(entry.clone());
        }
    }
    compacted
}

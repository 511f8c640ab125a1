//! Typed, forgiving view of `user-profile.json`.

use chrono::{DateTime, Utc};
use serde_json::Value;

/// Placeholder the extractor sometimes writes instead of a real name.
const UNKNOWN_NAME: &str = "the user";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersonalInfo {
    pub name: Option<String>,
    pub traits: Vec<String>,
    pub preferences: Vec<String>,
    pub interests: Vec<String>,
    pub occupation: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserRelationship {
    pub trust_level: f64,
    pub emotional_bond: f64,
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharedHistory {
    pub topics: Vec<String>,
    pub emotional_support: Vec<String>,
    pub milestones: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserProfile {
    pub personal_info: PersonalInfo,
    pub relationship: UserRelationship,
    pub shared_history: SharedHistory,
    pub last_updated: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// Never fails: wrong shapes read as their defaults.
    pub fn from_value(value: &Value) -> Self {
        let info = &value["personal_info"];
        let relationship = &value["relationship"];
        let history = &value["shared_history"];

        Self {
            personal_info: PersonalInfo {
                name: text(&info["name"]).filter(|name| !name.eq_ignore_ascii_case(UNKNOWN_NAME)),
                traits: strings(&info["traits"]),
                preferences: strings(&info["preferences"]),
                interests: strings(&info["interests"]),
                occupation: text(&info["occupation"]),
            },
            relationship: UserRelationship {
                trust_level: score(&relationship["trust_level"]),
                emotional_bond: score(&relationship["emotional_bond"]),
                status: text(&relationship["status"]),
            },
            shared_history: SharedHistory {
                topics: strings(&history["topics"]),
                emotional_support: strings(&history["emotional_support"]),
                milestones: strings(&history["milestones"]),
            },
            last_updated: value["last_updated"]
                .as_str()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|ts| ts.with_timezone(&Utc)),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.personal_info.name.as_deref()
    }
}

/// Set `last_updated` on a raw profile document.
pub(crate) fn stamp_last_updated(document: &mut Value, now: DateTime<Utc>) {
    if let Value::Object(map) = document {
        map.insert("last_updated".to_string(), Value::String(now.to_rfc3339()));
    }
}

fn text(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn strings(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect(),
        Value::String(_) => text(value).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn score(value: &Value) -> f64 {
    let raw = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    raw.filter(|v| v.is_finite())
        .map(|v| v.clamp(0.0, 1.0))
        .unwrap_or(0.0)
}

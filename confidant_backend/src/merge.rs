//! Recursive reconciliation of an untrusted partial document into an
//! existing one.
//!
//! Rules, applied per key:
//! - object + object: recurse
//! - array + array: append incoming items not already present; for conflict
//!   fields, first drop existing items the incoming ones supersede
//! - score fields with a numeric proposal: `max(previous, clamp(v, 0, 1))`
//! - anything else: the proposal replaces the current value
//!
//! Empty proposals (`null`, `""`, `[]`, `{}`) only ever fill a key that is
//! absent or null. They never clear existing content, at any depth and for
//! every document type, so `merge(d, {}) == d`.

use serde_json::{Map, Number, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePolicy {
    conflict_fields: Vec<String>,
    score_fields: Vec<String>,
}

impl MergePolicy {
    pub fn new(conflict_fields: Vec<String>, score_fields: Vec<String>) -> Self {
        Self {
            conflict_fields,
            score_fields,
        }
    }

    fn is_conflict_field(&self, key: Option<&str>) -> bool {
        key.is_some_and(|key| self.conflict_fields.iter().any(|f| f == key))
    }

    fn is_score_field(&self, key: Option<&str>) -> bool {
        key.is_some_and(|key| self.score_fields.iter().any(|f| f == key))
    }
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self::new(
            vec!["interests".to_string(), "preferences".to_string()],
            vec!["trust_level".to_string(), "emotional_bond".to_string()],
        )
    }
}

pub fn merge(current: &Value, proposed: &Value, policy: &MergePolicy) -> Value {
    merge_value(None, current, proposed, policy)
}

fn merge_value(key: Option<&str>, current: &Value, proposed: &Value, policy: &MergePolicy) -> Value {
    if is_empty(proposed) {
        return if current.is_null() {
            proposed.clone()
        } else {
            current.clone()
        };
    }

    if policy.is_score_field(key) {
        if let Value::Number(incoming) = proposed {
            return merge_score(current, incoming);
        }
    }

    match (current, proposed) {
        (Value::Object(current), Value::Object(proposed)) => {
            Value::Object(merge_object(current, proposed, policy))
        }
        (_, Value::Object(proposed)) => Value::Object(merge_object(&Map::new(), proposed, policy)),
        (Value::Array(current), Value::Array(proposed)) => {
            Value::Array(merge_array(key, current, proposed, policy))
        }
        (_, Value::Array(proposed)) => Value::Array(merge_array(key, &[], proposed, policy)),
        _ => proposed.clone(),
    }
}

fn merge_object(
    current: &Map<String, Value>,
    proposed: &Map<String, Value>,
    policy: &MergePolicy,
) -> Map<String, Value> {
    let mut merged = current.clone();
    for (key, incoming) in proposed {
        let existing = merged.get(key).cloned().unwrap_or(Value::Null);
        let value = merge_value(Some(key.as_str()), &existing, incoming, policy);
        merged.insert(key.clone(), value);
    }
    merged
}

fn merge_array(
    key: Option<&str>,
    current: &[Value],
    proposed: &[Value],
    policy: &MergePolicy,
) -> Vec<Value> {
    let mut merged = current.to_vec();

    if policy.is_conflict_field(key) {
        merged.retain(|existing| !proposed.iter().any(|incoming| supersedes(incoming, existing)));
    }

    for item in proposed {
        if !merged.iter().any(|existing| same_item(existing, item)) {
            merged.push(item.clone());
        }
    }
    merged
}

fn merge_score(current: &Value, incoming: &Number) -> Value {
    let Some(raw) = incoming.as_f64().filter(|v| v.is_finite()) else {
        return current.clone();
    };

    let clamped = raw.clamp(0.0, 1.0);
    let value = match current.as_f64() {
        Some(previous) => previous.max(clamped),
        None => clamped,
    };

    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or_else(|| current.clone())
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Containment test used for list de-duplication.
fn same_item(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::String(a), Value::String(b)) => a.trim().eq_ignore_ascii_case(b.trim()),
        _ => a == b,
    }
}

/// An incoming statement supersedes an existing one when either
/// - the existing statement contains it as a run of whole words
///   ("likes dark chocolate" supersedes "really likes dark chocolate"), or
/// - both have the same words except the one right before the head,
///   e.g. "likes milk chocolate" supersedes "likes dark chocolate".
///
/// The rule is lexical. "likes red wine" still replaces "likes white wine"
/// even when both hold.
pub fn supersedes(incoming: &Value, existing: &Value) -> bool {
    let (Value::String(incoming), Value::String(existing)) = (incoming, existing) else {
        return false;
    };

    let incoming = tokens(incoming);
    let existing = tokens(existing);
    if incoming.is_empty() || incoming == existing {
        return false;
    }

    contains_run(&existing, &incoming) || swaps_modifier(&incoming, &existing)
}

fn contains_run(haystack: &[String], needle: &[String]) -> bool {
    haystack.len() > needle.len() && haystack.windows(needle.len()).any(|run| run == needle)
}

fn swaps_modifier(incoming: &[String], existing: &[String]) -> bool {
    let len = incoming.len();
    if len < 3 || len != existing.len() {
        return false;
    }
    let modifier = len - 2;
    incoming
        .iter()
        .zip(existing)
        .enumerate()
        .all(|(i, (a, b))| (i == modifier) != (a == b))
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> MergePolicy {
        MergePolicy::default()
    }

    fn sample_documents() -> Vec<Value> {
        vec![
            json!({}),
            json!([]),
            json!(null),
            json!("text"),
            json!({"name": "Samantha", "core_values": ["curiosity"], "age": 32}),
            json!({
                "current_state": {"mood": "content", "energy_level": ""},
                "emotional_patterns": {"triggers": {"positive": ["nature"], "negative": []}}
            }),
        ]
    }

    #[test]
    fn merging_empty_proposal_is_identity() {
        for doc in sample_documents() {
            if doc.is_null() {
                continue;
            }
            assert_eq!(merge(&doc, &json!({}), &policy()), doc, "doc: {doc}");
        }
    }

    #[test]
    fn plain_lists_accumulate() {
        let current = json!({"hobbies": ["hiking"]});
        let proposed = json!({"hobbies": ["chess", "Hiking"]});
        let merged = merge(&current, &proposed, &policy());
        assert_eq!(merged, json!({"hobbies": ["hiking", "chess"]}));
    }

    #[test]
    fn interests_keep_unrelated_items() {
        let current = json!({"interests": ["hiking"]});
        let proposed = json!({"interests": ["chess"]});
        let merged = merge(&current, &proposed, &policy());
        let interests = merged["interests"].as_array().unwrap();
        assert!(interests.contains(&json!("hiking")));
        assert!(interests.contains(&json!("chess")));
    }

    #[test]
    fn changed_preference_replaces_older_one() {
        let current = json!({"preferences": ["likes dark chocolate", "prefers tea"]});
        let proposed = json!({"preferences": ["likes milk chocolate"]});
        let merged = merge(&current, &proposed, &policy());
        assert_eq!(
            merged["preferences"],
            json!(["prefers tea", "likes milk chocolate"])
        );
    }

    #[test]
    fn supersession_applies_only_to_conflict_fields() {
        let current = json!({"memories": ["likes dark chocolate"]});
        let proposed = json!({"memories": ["likes milk chocolate"]});
        let merged = merge(&current, &proposed, &policy());
        assert_eq!(
            merged["memories"],
            json!(["likes dark chocolate", "likes milk chocolate"])
        );
    }

    #[test]
    fn nested_objects_recurse_and_scalars_replace() {
        let current = json!({"current_state": {"mood": "content", "stress_level": "low"}});
        let proposed = json!({"current_state": {"mood": "elated"}, "age": 33});
        let merged = merge(&current, &proposed, &policy());
        assert_eq!(
            merged,
            json!({"current_state": {"mood": "elated", "stress_level": "low"}, "age": 33})
        );
    }

    #[test]
    fn type_mismatch_takes_the_proposal() {
        let current = json!({"thinking_patterns": {"analytical": true}});
        let proposed = json!({"thinking_patterns": ["analytical", "visual"]});
        let merged = merge(&current, &proposed, &policy());
        assert_eq!(merged["thinking_patterns"], json!(["analytical", "visual"]));
    }

    #[test]
    fn empty_values_never_clear_existing_content() {
        let current = json!({"mood": "content", "habits": ["journaling"], "goals": {"a": 1}});
        let proposed = json!({"mood": "", "habits": [], "goals": {}, "new_list": []});
        let merged = merge(&current, &proposed, &policy());
        assert_eq!(merged["mood"], "content");
        assert_eq!(merged["habits"], json!(["journaling"]));
        assert_eq!(merged["goals"], json!({"a": 1}));
        assert_eq!(merged["new_list"], json!([]));
    }

    #[test]
    fn scores_clamp_and_only_rise() {
        let current = json!({"relationship": {"trust_level": 0.4, "emotional_bond": 0.6}});

        let merged = merge(
            &current,
            &json!({"relationship": {"trust_level": 3.5, "emotional_bond": 0.2}}),
            &policy(),
        );
        assert_eq!(merged["relationship"]["trust_level"], json!(1.0));
        assert_eq!(merged["relationship"]["emotional_bond"], json!(0.6));

        let merged = merge(
            &json!({}),
            &json!({"relationship": {"trust_level": -2}}),
            &policy(),
        );
        assert_eq!(merged["relationship"]["trust_level"], json!(0.0));
    }

    #[test]
    fn score_property_holds_over_a_grid() {
        for previous in [0.0, 0.25, 0.5, 0.9, 1.0] {
            for incoming in [-1.0, 0.0, 0.1, 0.5, 0.95, 1.0, 7.0] {
                let merged = merge(
                    &json!({"trust_level": previous}),
                    &json!({"trust_level": incoming}),
                    &policy(),
                );
                let expected = f64::max(previous, f64::clamp(incoming, 0.0, 1.0));
                assert_eq!(merged["trust_level"].as_f64(), Some(expected));
            }
        }
    }

    #[test]
    fn vocabulary_scores_are_stored_as_is() {
        let merged = merge(
            &json!({"trust_level": "neutral"}),
            &json!({"trust_level": "unshakeable"}),
            &policy(),
        );
        assert_eq!(merged["trust_level"], "unshakeable");
    }

    #[test]
    fn lists_never_lose_items_without_a_conflict_rule() {
        let current = json!({"a": ["x", "y"], "b": {"c": [1, 2]}});
        let proposed = json!({"a": ["z"], "b": {"c": [2, 3]}});
        let merged = merge(&current, &proposed, &policy());
        for item in ["x", "y", "z"] {
            assert!(merged["a"].as_array().unwrap().contains(&json!(item)));
        }
        assert_eq!(merged["b"]["c"], json!([1, 2, 3]));
    }

    #[test]
    fn supersession_requires_shared_stance_and_head() {
        assert!(supersedes(&json!("likes milk chocolate"), &json!("Likes dark chocolate")));
        assert!(!supersedes(&json!("chess"), &json!("hiking")));
        assert!(!supersedes(&json!("likes chess"), &json!("likes hiking")));
        assert!(!supersedes(&json!("likes tea"), &json!("likes tea")));
    }

    #[test]
    fn activities_sharing_a_setting_coexist() {
        let current = json!({"preferences": ["likes hiking in the mountains"]});
        let proposed = json!({"preferences": ["likes skiing in the mountains"]});
        let merged = merge(&current, &proposed, &policy());
        assert_eq!(
            merged["preferences"],
            json!(["likes hiking in the mountains", "likes skiing in the mountains"])
        );
    }

    #[test]
    fn narrower_statement_replaces_the_one_containing_it() {
        assert!(supersedes(&json!("likes dark chocolate"), &json!("really likes dark chocolate")));
        assert!(!supersedes(&json!("really likes dark chocolate"), &json!("likes dark chocolate")));
        assert!(!supersedes(&json!("tea"), &json!("steak")));
        assert!(!supersedes(&json!("likes dark roast coffee"), &json!("likes light roast tea")));
    }
}

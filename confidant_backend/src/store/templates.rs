use serde_json::{json, Value};

use super::DocumentName;

const FALLBACK_PERSONA_NAME: &str = "Samantha";

/// Canned starting document for a persona that has never been written.
pub fn template(name: DocumentName, persona_name: &str) -> Value {
    match name {
        DocumentName::CoreIdentity => json!({
            "name": display_name(persona_name),
            "age": "",
            "profession": "",
            "core_values": [],
            "personality_traits": {
                "primary": [],
                "secondary": []
            },
            "life_philosophy": {
                "beliefs": [],
                "principles": []
            },
            "aspirations": []
        }),
        DocumentName::EmotionalFramework => json!({
            "current_state": {
                "mood": "content",
                "energy_level": "moderate",
                "stress_level": "low"
            },
            "emotional_patterns": {
                "triggers": {"positive": [], "negative": []},
                "responses": {"positive": [], "negative": []}
            },
            "emotional_goals": {
                "short_term": [],
                "long_term": []
            }
        }),
        DocumentName::CognitiveStyle => json!({
            "thinking_patterns": [],
            "learning_style": "",
            "problem_solving": "",
            "decision_making": {
                "approach": "",
                "factors": []
            }
        }),
        DocumentName::SocialDynamics => json!({
            "relationship_styles": {},
            "social_preferences": {},
            "communication_preferences": {
                "modes": [],
                "topics": [],
                "boundaries": []
            }
        }),
        DocumentName::InterestsValues => json!({
            "interests": [],
            "values": [],
            "preferences": []
        }),
        DocumentName::BehavioralPatterns => json!({
            "habits": [],
            "routines": [],
            "communication_style": {},
            "coping_strategies": []
        }),
        DocumentName::MemoryGrowth => json!({
            "core_memories": {
                "formative_experiences": [],
                "key_learnings": [],
                "identity_shaping": []
            },
            "growth_tracking": {
                "current_focus": {},
                "recent_insights": [],
                "evolution_patterns": []
            },
            "learned_concepts": [],
            "conversation_memory": []
        }),
        DocumentName::UserProfile => json!({
            "personal_info": {
                "name": "",
                "traits": [],
                "preferences": [],
                "interests": [],
                "occupation": ""
            },
            "relationship": {
                "trust_level": 0.0,
                "emotional_bond": 0.0,
                "status": "stranger"
            },
            "shared_history": {
                "topics": [],
                "emotional_support": [],
                "milestones": []
            },
            "last_updated": null
        }),
    }
}

/// `jack` → `Jack`, `mary-ann` → `Mary Ann`.
pub fn display_name(persona_name: &str) -> String {
    let words: Vec<String> = persona_name
        .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();

    if words.is_empty() {
        FALLBACK_PERSONA_NAME.to_string()
    } else {
        words.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_title_cases_and_falls_back() {
        assert_eq!(display_name("jack"), "Jack");
        assert_eq!(display_name("mary-ann"), "Mary Ann");
        assert_eq!(display_name(""), "Samantha");
    }

    #[test]
    fn every_template_is_an_object() {
        for name in DocumentName::ALL {
            assert!(template(name, "lucy").is_object(), "{name} template");
        }
    }
}

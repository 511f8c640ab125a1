use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Tunables for the persona mutation engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaSettings {
    /// Run the update pipeline every N conversational turns.
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,
    /// Number of most recent non-system turns handed to the extractor.
    #[serde(default = "default_update_history_window")]
    pub update_history_window: usize,
    #[serde(default = "default_max_memory_entries")]
    pub max_memory_entries: usize,
    /// Ledger length above which `record` attempts compression.
    #[serde(default = "default_memory_compression_threshold")]
    pub memory_compression_threshold: usize,
    #[serde(default = "default_recent_memory_window")]
    pub recent_memory_window: usize,
    /// On-disk ceiling for a single document before it is summarized.
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: u64,
    #[serde(default = "default_relationship_max_lines")]
    pub relationship_max_lines: usize,
    #[serde(default = "default_max_relationship_summaries")]
    pub max_relationship_summaries: usize,
    /// List fields where a newer stated preference replaces an older one.
    #[serde(default = "default_conflict_fields")]
    pub conflict_fields: Vec<String>,
    /// Numeric fields clamped to [0, 1] that only ever move upward.
    #[serde(default = "default_score_fields")]
    pub score_fields: Vec<String>,
    #[serde(default = "default_analysis_max_tokens")]
    pub analysis_max_tokens: u32,
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: u32,
    #[serde(default = "default_chat_max_tokens")]
    pub chat_max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_update_interval() -> u64 {
    5
}

fn default_update_history_window() -> usize {
    20
}

fn default_max_memory_entries() -> usize {
    50
}

fn default_memory_compression_threshold() -> usize {
    40
}

fn default_recent_memory_window() -> usize {
    10
}

fn default_max_document_bytes() -> u64 {
    1024 * 1024
}

fn default_relationship_max_lines() -> usize {
    200
}

fn default_max_relationship_summaries() -> usize {
    5
}

fn default_conflict_fields() -> Vec<String> {
    vec!["interests".to_string(), "preferences".to_string()]
}

fn default_score_fields() -> Vec<String> {
    vec!["trust_level".to_string(), "emotional_bond".to_string()]
}

fn default_analysis_max_tokens() -> u32 {
    1000
}

fn default_summary_max_tokens() -> u32 {
    300
}

fn default_chat_max_tokens() -> u32 {
    1000
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for PersonaSettings {
    fn default() -> Self {
        Self {
            update_interval: default_update_interval(),
            update_history_window: default_update_history_window(),
            max_memory_entries: default_max_memory_entries(),
            memory_compression_threshold: default_memory_compression_threshold(),
            recent_memory_window: default_recent_memory_window(),
            max_document_bytes: default_max_document_bytes(),
            relationship_max_lines: default_relationship_max_lines(),
            max_relationship_summaries: default_max_relationship_summaries(),
            conflict_fields: default_conflict_fields(),
            score_fields: default_score_fields(),
            analysis_max_tokens: default_analysis_max_tokens(),
            summary_max_tokens: default_summary_max_tokens(),
            chat_max_tokens: default_chat_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

impl PersonaSettings {
    /// Clamp settings that would otherwise make a rule unreachable.
    pub fn validated(mut self) -> Self {
        if self.update_interval == 0 {
            tracing::warn!("update_interval of 0 is invalid, using 1");
            self.update_interval = 1;
        }
        if self.max_memory_entries == 0 {
            tracing::warn!("max_memory_entries of 0 is invalid, using 1");
            self.max_memory_entries = 1;
        }
        // The cap truncates before a larger threshold could ever be observed.
        if self.memory_compression_threshold > self.max_memory_entries {
            tracing::warn!(
                "memory_compression_threshold {} exceeds max_memory_entries {}, clamping",
                self.memory_compression_threshold,
                self.max_memory_entries
            );
            self.memory_compression_threshold = self.max_memory_entries;
        }
        if self.max_relationship_summaries == 0 {
            self.max_relationship_summaries = 1;
        }
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    // LLM configuration (OpenAI-compatible: OpenAI, Ollama, LM Studio, vLLM, etc.)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,

    // Root directory holding one sub-directory per persona
    #[serde(default = "default_personas_dir")]
    pub personas_dir: String,

    #[serde(default)]
    pub persona: PersonaSettings,
}

fn default_llm_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    120
}

fn default_personas_dir() -> String {
    "personas".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            llm_timeout_secs: default_llm_timeout_secs(),
            personas_dir: default_personas_dir(),
            persona: PersonaSettings::default(),
        }
    }
}

impl AppConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("confidant_config.toml")
    }

    /// Load config from confidant_config.toml (next to executable), falling back to env vars.
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load config from an explicit path. Environment variables override file values.
    pub fn load_from(path: &Path) -> Self {
        let config = match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(_) => {
                tracing::warn!("No config file at {:?}, using defaults + env vars", path);
                Self::default()
            }
        };

        config.apply_env()
    }

    /// Save config to file (next to executable)
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    fn apply_env(mut self) -> Self {
        if let Ok(url) = env::var("LLM_API_URL") {
            self.llm_api_url = url;
        }

        if let Ok(model) = env::var("LLM_MODEL") {
            self.llm_model = model;
        }

        if let Some(key) = env::var("LLM_API_KEY")
            .or_else(|_| env::var("OPENAI_API_KEY"))
            .ok()
            .filter(|key| !key.trim().is_empty())
        {
            self.llm_api_key = Some(key);
        }

        if let Some(secs) = env_parse("LLM_TIMEOUT_SECS") {
            self.llm_timeout_secs = secs;
        }

        if let Ok(dir) = env::var("CONFIDANT_PERSONAS_DIR") {
            if !dir.trim().is_empty() {
                self.personas_dir = dir;
            }
        }

        if let Some(interval) = env_parse("CONFIDANT_UPDATE_INTERVAL") {
            self.persona.update_interval = interval;
        }

        if let Some(max) = env_parse("CONFIDANT_MAX_MEMORY_ENTRIES") {
            self.persona.max_memory_entries = max;
        }

        if let Some(threshold) = env_parse("CONFIDANT_MEMORY_COMPRESSION_THRESHOLD") {
            self.persona.memory_compression_threshold = threshold;
        }

        if let Some(bytes) = env_parse("CONFIDANT_MAX_DOCUMENT_BYTES") {
            self.persona.max_document_bytes = bytes;
        }

        if let Some(lines) = env_parse("CONFIDANT_RELATIONSHIP_MAX_LINES") {
            self.persona.relationship_max_lines = lines;
        }

        self.persona = self.persona.validated();
        self
    }

    /// True when the endpoint is served locally and needs no credential.
    pub fn is_local_endpoint(&self) -> bool {
        let url = self.llm_api_url.to_ascii_lowercase();
        url.contains("://localhost") || url.contains("://127.0.0.1")
    }

    pub fn personas_root(&self) -> PathBuf {
        PathBuf::from(&self.personas_dir)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            llm_model = "local-model"

            [persona]
            update_interval = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.llm_model, "local-model");
        assert_eq!(config.persona.update_interval, 3);
        assert_eq!(config.persona.max_memory_entries, 50);
        assert_eq!(
            config.persona.conflict_fields,
            vec!["interests".to_string(), "preferences".to_string()]
        );
    }

    #[test]
    fn validation_clamps_unreachable_compression_threshold() {
        let settings = PersonaSettings {
            max_memory_entries: 10,
            memory_compression_threshold: 100,
            update_interval: 0,
            ..PersonaSettings::default()
        }
        .validated();

        assert_eq!(settings.memory_compression_threshold, 10);
        assert_eq!(settings.update_interval, 1);
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("confidant_config.toml");

        let mut config = AppConfig::default();
        config.llm_model = "llama3".to_string();
        config.persona.recent_memory_window = 4;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path);
        assert_eq!(loaded.persona.recent_memory_window, 4);
        assert_eq!(loaded.personas_dir, "personas");
    }

    #[test]
    fn detects_local_endpoints() {
        let mut config = AppConfig::default();
        assert!(!config.is_local_endpoint());
        config.llm_api_url = "http://localhost:11434/v1".to_string();
        assert!(config.is_local_endpoint());
    }
}

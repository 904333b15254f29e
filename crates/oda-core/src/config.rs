use serde::{Deserialize, Serialize};

use crate::language::LanguagePair;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 512;
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.4;
pub const DEFAULT_FALLBACK_LANGUAGE: &str = "en";

/// Root of `config.toml`. Every section is optional.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RootConfig {
    pub chat: ChatConfig,
    pub translation: TranslationConfig,
    pub detection: DetectionConfig,
    pub logging: LoggingConfig,
    pub local_runner: LocalRunnerConfig,
}

impl RootConfig {
    /// Session configuration for a chat controller.
    pub fn chat_session(&self) -> SessionConfig {
        SessionConfig {
            model: self.chat.model.clone(),
            generation: GenerationOptions {
                temperature: self.chat.temperature,
                max_tokens: self.chat.max_tokens,
                system_prompt: self.chat.system_prompt.clone(),
            },
            languages: None,
        }
    }

    /// The default translation pair.
    pub fn default_pair(&self) -> LanguagePair {
        LanguagePair::new(
            self.translation.source_language.clone(),
            self.translation.target_language.clone(),
        )
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ChatConfig {
    /// Model id; `None` lets the provider pick its default
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: None,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TranslationConfig {
    pub source_language: String,
    pub target_language: String,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            source_language: "en".to_string(),
            target_language: "es".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    /// Results must score strictly above this
    pub confidence_threshold: f32,
    pub fallback_language: String,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            fallback_language: DEFAULT_FALLBACK_LANGUAGE.to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LocalRunnerConfig {
    pub command: String,
    pub args: Vec<String>,
    /// Directory holding model files; when set, a missing file means
    /// the model still has to be downloaded
    pub model_dir: Option<std::path::PathBuf>,
}

impl Default for LocalRunnerConfig {
    fn default() -> Self {
        Self {
            command: "llama-cli".to_string(),
            args: Vec::new(),
            model_dir: None,
        }
    }
}

/// Per-session configuration handed to `initialize` and the provider.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub model: Option<String>,
    pub generation: GenerationOptions,
    /// Set for translation sessions
    pub languages: Option<LanguagePair>,
}

impl SessionConfig {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Self::default()
        }
    }

    pub fn for_pair(pair: LanguagePair) -> Self {
        Self {
            languages: Some(pair),
            ..Self::default()
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub system_prompt: Option<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: RootConfig = toml::from_str(
            r#"
            [chat]
            model = "Llama-3.2-1B-Instruct-q4f16_1"

            [detection]
            confidence_threshold = 0.6
            "#,
        )
        .unwrap();

        assert_eq!(config.chat.model.as_deref(), Some("Llama-3.2-1B-Instruct-q4f16_1"));
        assert_eq!(config.chat.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(config.detection.confidence_threshold, 0.6);
        assert_eq!(config.detection.fallback_language, "en");
        assert_eq!(config.local_runner.command, "llama-cli");
    }

    #[test]
    fn test_chat_session_carries_generation_options() {
        let mut config = RootConfig::default();
        config.chat.temperature = 0.2;
        let session = config.chat_session();
        assert_eq!(session.generation.temperature, 0.2);
        assert!(session.languages.is_none());
        assert_eq!(config.default_pair(), LanguagePair::new("en", "es"));
    }
}

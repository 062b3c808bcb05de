use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{Error, Result};
use crate::inference::llm::ChatTemplate;
use crate::inference::vlm::DEFAULT_MAX_EDGE;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where generated speech artifacts are written.
    #[serde(default = "default_audio_dir")]
    pub audio_dir: PathBuf,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub speech: SpeechConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base for audio URLs handed to clients. Derived from host/port when unset.
    #[serde(default)]
    pub public_url: Option<String>,
}

/// The local model runtime hosting the text and vision models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_runtime_url")]
    pub url: String,
    #[serde(default = "default_runtime_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_text_model")]
    pub text: String,
    /// Overrides the catalog template for `text`.
    #[serde(default)]
    pub text_template: Option<ChatTemplate>,
    #[serde(default = "default_vision_model")]
    pub vision: String,
    #[serde(default = "default_vision_max_edge")]
    pub vision_max_edge: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechConfig {
    #[serde(default = "default_stt_url")]
    pub stt_url: String,
    #[serde(default = "default_stt_model")]
    pub stt_model: String,
    #[serde(default = "default_tts_url")]
    pub tts_url: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_speech_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_search_url")]
    pub url: String,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_search_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            audio_dir: default_audio_dir(),
            server: ServerConfig::default(),
            runtime: RuntimeConfig::default(),
            models: ModelsConfig::default(),
            speech: SpeechConfig::default(),
            search: SearchConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_url: None,
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            url: default_runtime_url(),
            timeout_secs: default_runtime_timeout(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            text: default_text_model(),
            text_template: None,
            vision: default_vision_model(),
            vision_max_edge: default_vision_max_edge(),
        }
    }
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            stt_url: default_stt_url(),
            stt_model: default_stt_model(),
            tts_url: default_tts_url(),
            tts_model: default_tts_model(),
            voice: default_voice(),
            speed: default_speed(),
            timeout_secs: default_speech_timeout(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            url: default_search_url(),
            max_results: default_max_results(),
            timeout_secs: default_search_timeout(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_runtime_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_runtime_timeout() -> u64 {
    300
}

fn default_text_model() -> String {
    "phi4-mini".to_string()
}

fn default_vision_model() -> String {
    "qwen3-vl:2b".to_string()
}

fn default_vision_max_edge() -> u32 {
    DEFAULT_MAX_EDGE
}

fn default_stt_url() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_stt_model() -> String {
    "Systran/faster-whisper-medium".to_string()
}

fn default_tts_url() -> String {
    "http://127.0.0.1:8880".to_string()
}

fn default_tts_model() -> String {
    "kokoro".to_string()
}

fn default_voice() -> String {
    "af_heart".to_string()
}

fn default_speed() -> f32 {
    1.0
}

fn default_speech_timeout() -> u64 {
    120
}

fn default_search_url() -> String {
    "http://127.0.0.1:8888".to_string()
}

fn default_max_results() -> usize {
    5
}

fn default_search_timeout() -> u64 {
    10
}

fn default_max_tokens() -> usize {
    150
}

fn default_temperature() -> f32 {
    0.7
}

fn default_audio_dir() -> PathBuf {
    PathBuf::from("audio")
}

impl AppConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("omnilocal").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("config.toml"))
    }

    /// Load from `path` (or the default location), then apply env overrides.
    /// A missing file yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_path);

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_toml(&content)?
        } else {
            AppConfig::default()
        };

        config.apply_env();
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::default_path);

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("OMNILOCAL_HOST") {
            self.server.host = host;
        }
        if let Ok(raw) = std::env::var("OMNILOCAL_PORT") {
            match raw.parse::<u16>() {
                Ok(port) => self.server.port = port,
                Err(_) => warn!("Invalid OMNILOCAL_PORT='{}', keeping {}", raw, self.server.port),
            }
        }
        if let Ok(url) = std::env::var("OMNILOCAL_RUNTIME_URL") {
            self.runtime.url = url;
        }
        if let Ok(dir) = std::env::var("OMNILOCAL_AUDIO_DIR") {
            self.audio_dir = PathBuf::from(dir);
        }
    }

    /// Template for the configured text model.
    pub fn text_template(&self) -> ChatTemplate {
        self.models
            .text_template
            .unwrap_or_else(|| crate::models::template_for(&self.models.text))
    }

    pub fn public_url(&self) -> String {
        self.server
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.server.host, self.server.port))
            .trim_end_matches('/')
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.generation.max_tokens, 150);
        assert!((config.generation.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.search.max_results, 5);
        assert_eq!(config.audio_dir, PathBuf::from("audio"));
        assert_eq!(config.text_template(), ChatTemplate::Phi);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [models]
            text = "qwen3:4b"

            [server]
            public_url = "http://assistant.local:9000/"
            "#,
        )
        .unwrap();
        assert_eq!(config.models.text, "qwen3:4b");
        assert_eq!(config.models.vision, "qwen3-vl:2b");
        assert_eq!(config.text_template(), ChatTemplate::ChatMl);
        assert_eq!(config.public_url(), "http://assistant.local:9000");
    }

    #[test]
    fn explicit_template_wins_over_catalog() {
        let config = AppConfig::from_toml(
            r#"
            [models]
            text = "phi4-mini"
            text_template = "chatml"
            "#,
        )
        .unwrap();
        assert_eq!(config.text_template(), ChatTemplate::ChatMl);
    }

    #[test]
    fn save_then_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AppConfig::default();
        config.generation.max_tokens = 64;
        config.save(Some(&path)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let loaded = AppConfig::from_toml(&content).unwrap();
        assert_eq!(loaded.generation.max_tokens, 64);
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let err = AppConfig::from_toml("[server\nport = ").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}

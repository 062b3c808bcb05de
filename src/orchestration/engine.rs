use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::info;

use super::augment::Augmenter;
use super::{ModelRegistry, SlotKind, SlotState};
use crate::artifacts::ArtifactStore;
use crate::config::AppConfig;
use crate::conversation::{build_messages, extend_history, History, Message};
use crate::error::{Error, Result};
use crate::inference::asr::AsrEngine;
use crate::inference::runtime::RuntimeLoader;
use crate::inference::search::SearxSearch;
use crate::inference::tts::{Speaker, TtsEngine};
use crate::inference::vlm::DEFAULT_MAX_EDGE;
use crate::inference::{GenerationParams, PreparedImage, SpeechToText};

pub const DEFAULT_CAPTION_PROMPT: &str = "Describe this image in three sentences.";

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub response_text: String,
    pub audio_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub response_text: String,
    pub audio_path: PathBuf,
    /// Caller history extended with the original utterance and the reply.
    pub history: History,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    pub slot: SlotState,
    pub model: Option<String>,
}

/// Runs chat and caption requests end to end: slot residency, optional
/// augmentation, generation, speech.
pub struct Orchestrator {
    registry: ModelRegistry,
    augmenter: Augmenter,
    speaker: Speaker,
    transcriber: Arc<dyn SpeechToText>,
    params: GenerationParams,
    max_image_edge: u32,
}

impl Orchestrator {
    pub fn new(
        registry: ModelRegistry,
        augmenter: Augmenter,
        speaker: Speaker,
        transcriber: Arc<dyn SpeechToText>,
        params: GenerationParams,
    ) -> Self {
        Self {
            registry,
            augmenter,
            speaker,
            transcriber,
            params,
            max_image_edge: DEFAULT_MAX_EDGE,
        }
    }

    /// Longest edge images are scaled down to before captioning.
    pub fn with_max_image_edge(mut self, max_edge: u32) -> Self {
        self.max_image_edge = max_edge.max(1);
        self
    }

    /// Wire the HTTP-backed adapters described by `config`. Nothing is
    /// loaded yet; see [`Orchestrator::initialize`].
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let loader = RuntimeLoader::from_config(config)?;
        let speech_timeout = Duration::from_secs(config.speech.timeout_secs);
        let tts = TtsEngine::new(
            config.speech.tts_url.clone(),
            &config.speech.tts_model,
            &config.speech.voice,
            config.speech.speed,
            speech_timeout,
        )?;
        let stt = AsrEngine::new(
            config.speech.stt_url.clone(),
            &config.speech.stt_model,
            speech_timeout,
        )?;
        let search = SearxSearch::new(
            config.search.url.clone(),
            Duration::from_secs(config.search.timeout_secs),
        )?;
        let store = ArtifactStore::new(&config.audio_dir)?;

        Ok(Self::new(
            ModelRegistry::new(Arc::new(loader)),
            Augmenter::new(Arc::new(search), config.search.max_results),
            Speaker::new(Arc::new(tts), store),
            Arc::new(stt),
            GenerationParams {
                max_tokens: config.generation.max_tokens,
                temperature: config.generation.temperature,
            },
        )
        .with_max_image_edge(config.models.vision_max_edge))
    }

    /// Bring up the text brain, which serves most traffic.
    pub async fn initialize(&mut self) -> Result<()> {
        self.registry.ensure_resident(SlotKind::Text).await
    }

    pub fn status(&self) -> SlotStatus {
        SlotStatus {
            slot: self.registry.state(),
            model: self.registry.resident_model_id().map(str::to_string),
        }
    }

    pub fn transcriber(&self) -> Arc<dyn SpeechToText> {
        self.transcriber.clone()
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        self.speaker.store()
    }

    pub async fn ensure_resident(&mut self, kind: SlotKind) -> Result<()> {
        self.registry.ensure_resident(kind).await
    }

    /// One chat turn. `history` is not modified; the extended copy comes back
    /// in the outcome, so a failed turn leaves the caller's history as it was.
    pub async fn chat(
        &mut self,
        history: &[Message],
        utterance: &str,
        use_search: bool,
    ) -> Result<ChatOutcome> {
        let utterance = utterance.trim();
        if utterance.is_empty() {
            return Err(Error::InvalidInput("user message is empty".to_string()));
        }

        self.registry.ensure_resident(SlotKind::Text).await?;

        let user_turn = self.augmenter.prepare(utterance, use_search).await;
        let messages = build_messages(history, &user_turn);

        let result = self
            .registry
            .text_model()?
            .complete(&messages, &self.params)
            .await?;
        let audio_path = self.speaker.speak(&result.text).await?;

        info!("Chat turn complete, audio at {}", audio_path.display());
        Ok(ChatOutcome {
            history: extend_history(history, utterance, &result.text),
            response_text: result.text,
            audio_path,
        })
    }

    /// Caption an image. The image is read and decoded before any model or
    /// audio work, so a bad reference never swaps the slot.
    pub async fn caption(&mut self, image: Option<&Path>, instruction: &str) -> Result<GenerationResult> {
        let image = image
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or_else(|| Error::InvalidInput("no image supplied".to_string()))?;
        let prepared = PreparedImage::load(image, self.max_image_edge).await?;
        let instruction = match instruction.trim() {
            "" => DEFAULT_CAPTION_PROMPT,
            text => text,
        };

        self.registry.ensure_resident(SlotKind::Vision).await?;

        let result = self
            .registry
            .vision_model()?
            .describe(&prepared, instruction, &self.params)
            .await?;
        let audio_path = self.speaker.speak(&result.text).await?;

        Ok(GenerationResult {
            response_text: result.text,
            audio_path,
        })
    }

    /// Formatted web context for `query`, or an empty string.
    pub async fn search(&self, query: &str, max_results: usize) -> String {
        self.augmenter.search(query, max_results).await
    }

    /// Transcription does not touch the model slot.
    pub async fn transcribe(&self, audio: &Path) -> Result<String> {
        self.transcriber.transcribe(audio).await
    }

    pub async fn shutdown(&mut self) {
        self.registry.release().await;
    }
}

pub mod asr;
pub mod llm;
pub mod runtime;
pub mod search;
pub mod tts;
pub mod vlm;

use std::path::Path;

use async_trait::async_trait;

use crate::conversation::Message;
use crate::error::Result;
use crate::orchestration::SlotKind;

pub use vlm::PreparedImage;

/// Sampling settings for one generation call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: usize,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 150,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatResult {
    pub text: String,
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub prefill_ms: f64,
    pub decode_tps: f64,
}

/// A loaded text model. Owned exclusively by the model registry.
#[async_trait]
pub trait TextModel: Send + Sync {
    fn model_id(&self) -> &str;

    async fn complete(
        &mut self,
        messages: &[Message],
        params: &GenerationParams,
    ) -> Result<ChatResult>;

    /// Free weights and accelerator memory. The model is dropped afterwards.
    async fn release(&mut self) -> Result<()>;
}

/// A loaded vision-language model. Owned exclusively by the model registry.
#[async_trait]
pub trait VisionModel: Send + Sync {
    fn model_id(&self) -> &str;

    async fn describe(
        &mut self,
        image: &PreparedImage,
        instruction: &str,
        params: &GenerationParams,
    ) -> Result<ChatResult>;

    async fn release(&mut self) -> Result<()>;
}

/// Loads the slot-managed model families.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load_text(&self) -> Result<Box<dyn TextModel>>;

    async fn load_vision(&self) -> Result<Box<dyn VisionModel>>;

    /// Reclaim whatever a failed load of `kind` may have left behind.
    async fn evict(&self, kind: SlotKind) -> Result<()>;
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, audio: &Path) -> Result<String>;
}

#[async_trait]
pub trait SpeechSynthesis: Send + Sync {
    /// Mono samples in [-1, 1] at 24 kHz.
    async fn synthesize(&self, text: &str) -> Result<Vec<f32>>;
}

/// Best-effort retrieval. Never fails: no results or an unreachable backend
/// both yield an empty string.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> String;
}

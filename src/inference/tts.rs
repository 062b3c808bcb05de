use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::runtime::check_status;
use super::SpeechSynthesis;
use crate::artifacts::{ArtifactStore, SAMPLE_RATE};
use crate::error::{Error, Result};

/// Markdown/emphasis characters that must never be read aloud.
const UNSPOKEN: [char; 5] = ['*', '_', '#', '`', '~'];

pub fn sanitize_for_speech(text: &str) -> String {
    text.chars().filter(|c| !UNSPOKEN.contains(c)).collect()
}

/// Speech synthesis over an OpenAI-compatible `/v1/audio/speech` endpoint
/// (Kokoro-FastAPI), requesting raw 16-bit PCM at 24 kHz.
pub struct TtsEngine {
    http: reqwest::Client,
    base_url: String,
    model_id: String,
    voice: String,
    speed: f32,
}

impl TtsEngine {
    pub fn new(
        base_url: impl Into<String>,
        model_id: &str,
        voice: &str,
        speed: f32,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .build()?;
        Ok(TtsEngine {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model_id: model_id.to_string(),
            voice: voice.to_string(),
            speed,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[async_trait]
impl SpeechSynthesis for TtsEngine {
    async fn synthesize(&self, text: &str) -> Result<Vec<f32>> {
        let t0 = Instant::now();

        let resp = self
            .http
            .post(format!("{}/v1/audio/speech", self.base_url))
            .json(&json!({
                "model": self.model_id,
                "input": text,
                "voice": self.voice,
                "speed": self.speed,
                "response_format": "pcm",
            }))
            .send()
            .await
            .map_err(|e| Error::Generation(format!("Synthesis request failed: {}", e)))?;
        let pcm = check_status(resp)
            .await
            .map_err(|e| Error::Generation(format!("Synthesis error: {}", e)))?
            .bytes()
            .await?;

        let samples = pcm16le_to_f32(&pcm);

        let duration_s = samples.len() as f64 / SAMPLE_RATE as f64;
        let elapsed = t0.elapsed().as_secs_f64();
        let rtf = if elapsed > 0.0 { duration_s / elapsed } else { 0.0 };
        info!(
            "[tts] Synthesized {:.1}s audio in {:.2}s ({:.1}x real-time)",
            duration_s, elapsed, rtf
        );

        Ok(samples)
    }
}

fn pcm16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect()
}

/// Turns response text into a WAV artifact.
#[derive(Clone)]
pub struct Speaker {
    backend: Arc<dyn SpeechSynthesis>,
    store: ArtifactStore,
}

impl Speaker {
    pub fn new(backend: Arc<dyn SpeechSynthesis>, store: ArtifactStore) -> Self {
        Self { backend, store }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Sanitize, synthesize and write one new artifact.
    pub async fn speak(&self, text: &str) -> Result<PathBuf> {
        let clean = sanitize_for_speech(text);
        let samples = self.backend.synthesize(&clean).await?;

        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.write_wav(&samples))
            .await
            .map_err(|e| Error::Audio(format!("Artifact writer failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::testing::RecordingSynth;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn markdown_is_stripped() {
        assert_eq!(sanitize_for_speech("**bold** and `code`"), "bold and code");
        assert_eq!(sanitize_for_speech("# Title ~~gone~~ snake_case"), " Title gone snakecase");
        assert_eq!(sanitize_for_speech("plain text."), "plain text.");
    }

    #[tokio::test]
    async fn speaker_passes_sanitized_text_and_writes_wav() {
        let dir = tempfile::tempdir().unwrap();
        let synth = Arc::new(RecordingSynth::default());
        let speaker = Speaker::new(synth.clone(), ArtifactStore::new(dir.path()).unwrap());

        let path = speaker.speak("**bold** and `code`").await.unwrap();

        assert_eq!(synth.seen.lock().unwrap().as_slice(), ["bold and code"]);
        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "wav");
    }

    #[test]
    fn pcm_decoding() {
        let bytes = [0x00, 0x40, 0x00, 0xC0, 0xFF];
        assert_eq!(pcm16le_to_f32(&bytes), vec![0.5, -0.5]);
    }

    #[tokio::test]
    async fn synthesize_requests_pcm_with_voice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/speech"))
            .and(body_partial_json(json!({
                "model": "kokoro",
                "voice": "af_heart",
                "input": "Hello there.",
                "response_format": "pcm"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x00, 0x40, 0x00, 0x40]))
            .expect(1)
            .mount(&server)
            .await;

        let engine = TtsEngine::new(server.uri(), "kokoro", "af_heart", 1.0, Duration::from_secs(5)).unwrap();
        let samples = engine.synthesize("Hello there.").await.unwrap();
        assert_eq!(samples, vec![0.5, 0.5]);
    }
}

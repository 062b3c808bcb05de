//! Client for a running OmniLocal server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::api::types::{ChatRequest, ChatResponse, StatusResponse, TranscriptionResponse, VisionRequest, VisionResponse};
use crate::conversation::Message;
use crate::error::{Error, Result};
use crate::inference::runtime::check_status;

pub struct OmniClient {
    http: reqwest::Client,
    base_url: String,
}

impl OmniClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("omnilocal/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        debug!("POST {}{}", self.base_url, path);
        let resp = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .json(body)
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }

    pub async fn status(&self) -> Result<StatusResponse> {
        let resp = self
            .http
            .get(format!("{}/api/status", self.base_url))
            .send()
            .await?;
        Ok(check_status(resp).await?.json().await?)
    }

    pub async fn chat(&self, history: &[Message], user_input: &str, use_search: bool) -> Result<ChatResponse> {
        let req = ChatRequest {
            user_input: user_input.to_string(),
            chat_history: history.to_vec(),
            use_search,
        };
        self.post_json("/api/chat", &req).await
    }

    /// `image_path` is resolved on the server's filesystem.
    pub async fn vision(&self, image_path: &str, prompt: &str) -> Result<VisionResponse> {
        let req = VisionRequest {
            image_path: Some(image_path.to_string()),
            prompt: prompt.to_string(),
        };
        self.post_json("/api/vision", &req).await
    }

    /// Upload a local WAV file for transcription.
    pub async fn transcribe(&self, audio: &Path) -> Result<String> {
        let body = tokio::fs::read(audio).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                Error::NotFound(format!("Audio file not found: {}", audio.display()))
            }
            _ => Error::Io(e),
        })?;
        let resp = self
            .http
            .post(format!("{}/api/transcribe", self.base_url))
            .header(reqwest::header::CONTENT_TYPE, "audio/wav")
            .body(body)
            .send()
            .await?;
        let parsed: TranscriptionResponse = check_status(resp).await?.json().await?;
        Ok(parsed.text)
    }

    /// Download an artifact. The server deletes it once served.
    pub async fn fetch_audio(&self, audio_url: &str) -> Result<Vec<u8>> {
        let resp = self.http.get(audio_url).send().await?;
        Ok(check_status(resp).await?.bytes().await?.to_vec())
    }

    /// Download an artifact into `dir`, keeping the server's file name.
    pub async fn save_audio(&self, audio_url: &str, dir: &Path) -> Result<PathBuf> {
        let filename = audio_url
            .rsplit('/')
            .next()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::InvalidInput(format!("No file name in {}", audio_url)))?;
        let bytes = self.fetch_audio(audio_url).await?;
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(filename);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

//! Client for the local model runtime (Ollama-compatible HTTP API).
//!
//! Residency is driven through `keep_alive`: an empty generate with `-1`
//! pins the weights in memory, one with `0` evicts them and frees the
//! accelerator memory they held.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::llm::{ChatTemplate, LlmEngine};
use super::vlm::VlmEngine;
use super::{GenerationParams, ModelLoader, TextModel, VisionModel};
use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::orchestration::SlotKind;

#[derive(Debug, Clone)]
pub struct RuntimeClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct SamplingOptions<'a> {
    temperature: f32,
    num_predict: usize,
    stop: &'a [&'a str],
}

/// One turn of `/api/chat`. `images` holds base64 payloads.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub response: String,
    #[serde(flatten)]
    pub stats: EvalStats,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    pub message: ChatResponseMessage,
    #[serde(flatten)]
    pub stats: EvalStats,
}

#[derive(Debug, Deserialize)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub content: String,
}

/// Token counts and durations (nanoseconds) reported by the runtime.
#[derive(Debug, Default, Deserialize)]
pub struct EvalStats {
    #[serde(default)]
    pub prompt_eval_count: usize,
    #[serde(default)]
    pub prompt_eval_duration: u64,
    #[serde(default)]
    pub eval_count: usize,
    #[serde(default)]
    pub eval_duration: u64,
}

impl EvalStats {
    pub fn prefill_ms(&self) -> f64 {
        self.prompt_eval_duration as f64 / 1e6
    }

    pub fn decode_tps(&self) -> f64 {
        if self.eval_count == 0 || self.eval_duration == 0 {
            0.0
        } else {
            self.eval_count as f64 / (self.eval_duration as f64 / 1e9)
        }
    }
}

impl RuntimeClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .no_proxy()
            .timeout(timeout)
            .user_agent(format!("omnilocal/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<reqwest::Response> {
        let resp = self.http.post(self.url(path)).json(&body).send().await?;
        check_status(resp).await
    }

    /// Fails when the runtime does not know `model` (weights not pulled).
    pub async fn show(&self, model: &str) -> Result<()> {
        self.post("/api/show", json!({ "model": model })).await?;
        Ok(())
    }

    /// Load `model` and keep it resident until explicitly unloaded.
    pub async fn pin(&self, model: &str) -> Result<()> {
        debug!("Pinning {} in runtime memory", model);
        self.post("/api/generate", json!({ "model": model, "keep_alive": -1 }))
            .await?;
        Ok(())
    }

    pub async fn unload(&self, model: &str) -> Result<()> {
        debug!("Evicting {} from runtime memory", model);
        self.post("/api/generate", json!({ "model": model, "keep_alive": 0 }))
            .await?;
        Ok(())
    }

    /// Sample a completion for an already-templated prompt.
    pub async fn generate_raw(
        &self,
        model: &str,
        prompt: &str,
        stop: &[&str],
        params: &GenerationParams,
    ) -> Result<GenerateResponse> {
        let options = SamplingOptions {
            temperature: params.temperature,
            num_predict: params.max_tokens,
            stop,
        };
        let body = json!({
            "model": model,
            "prompt": prompt,
            "raw": true,
            "stream": false,
            "keep_alive": -1,
            "options": options,
        });
        let resp = self.post("/api/generate", body).await?;
        Ok(resp.json().await?)
    }

    pub async fn chat(
        &self,
        model: &str,
        messages: &[RuntimeMessage],
        params: &GenerationParams,
    ) -> Result<ChatResponse> {
        let options = SamplingOptions {
            temperature: params.temperature,
            num_predict: params.max_tokens,
            stop: &[],
        };
        let body = json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "keep_alive": -1,
            "options": options,
        });
        let resp = self.post("/api/chat", body).await?;
        Ok(resp.json().await?)
    }
}

/// Turn a non-2xx response into `Error::Api`, keeping the runtime's message.
pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| match &v["error"] {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Object(o) => o
                .get("message")
                .and_then(|m| m.as_str())
                .map(str::to_string),
            _ => None,
        })
        .unwrap_or(text);

    Err(Error::Api {
        status: status.as_u16(),
        message,
    })
}

/// Loads the configured text and vision models from the runtime.
pub struct RuntimeLoader {
    runtime: RuntimeClient,
    text_model: String,
    text_template: ChatTemplate,
    vision_model: String,
}

impl RuntimeLoader {
    pub fn new(
        runtime: RuntimeClient,
        text_model: impl Into<String>,
        text_template: ChatTemplate,
        vision_model: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            text_model: text_model.into(),
            text_template,
            vision_model: vision_model.into(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let runtime = RuntimeClient::new(
            config.runtime.url.clone(),
            Duration::from_secs(config.runtime.timeout_secs),
        )?;
        Ok(Self::new(
            runtime,
            config.models.text.clone(),
            config.text_template(),
            config.models.vision.clone(),
        ))
    }
}

#[async_trait]
impl ModelLoader for RuntimeLoader {
    async fn load_text(&self) -> Result<Box<dyn TextModel>> {
        let engine = LlmEngine::load(
            self.runtime.clone(),
            &self.text_model,
            self.text_template,
        )
        .await?;
        Ok(Box::new(engine))
    }

    async fn load_vision(&self) -> Result<Box<dyn VisionModel>> {
        let engine = VlmEngine::load(self.runtime.clone(), &self.vision_model).await?;
        Ok(Box::new(engine))
    }

    async fn evict(&self, kind: SlotKind) -> Result<()> {
        let model = match kind {
            SlotKind::Text => &self.text_model,
            SlotKind::Vision => &self.vision_model,
        };
        self.runtime.unload(model).await
    }
}

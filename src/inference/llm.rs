use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::runtime::RuntimeClient;
use super::{ChatResult, GenerationParams, TextModel};
use crate::conversation::{Message, Role};
use crate::error::{Error, Result};

/// Prompt layout expected by a text model family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatTemplate {
    /// `<|im_start|>role\n...<|im_end|>` (Qwen and most instruct models).
    ChatMl,
    /// `<|role|>...<|end|>` (Phi-3 / Phi-4).
    Phi,
}

impl ChatTemplate {
    /// Render the conversation followed by an open assistant header.
    pub fn render(&self, messages: &[Message]) -> String {
        match self {
            ChatTemplate::ChatMl => format_chatml_prompt(messages),
            ChatTemplate::Phi => format_phi_prompt(messages),
        }
    }

    pub fn stop_sequences(&self) -> &'static [&'static str] {
        match self {
            ChatTemplate::ChatMl => &["<|im_end|>", "<|endoftext|>"],
            ChatTemplate::Phi => &["<|end|>", "<|endoftext|>"],
        }
    }
}

/// A text model resident in the runtime.
pub struct LlmEngine {
    runtime: RuntimeClient,
    model_id: String,
    template: ChatTemplate,
}

impl LlmEngine {
    /// Verify the weights exist, then pin them in memory.
    pub async fn load(runtime: RuntimeClient, model_id: &str, template: ChatTemplate) -> Result<Self> {
        info!("[llm] Loading {}...", model_id);
        let t0 = Instant::now();

        runtime
            .show(model_id)
            .await
            .map_err(|e| Error::FatalInit(format!("Text model '{}' unavailable: {}", model_id, e)))?;
        runtime
            .pin(model_id)
            .await
            .map_err(|e| Error::FatalInit(format!("Failed to load text model '{}': {}", model_id, e)))?;

        info!("[llm] Model loaded in {:.1}s", t0.elapsed().as_secs_f64());

        Ok(LlmEngine {
            runtime,
            model_id: model_id.to_string(),
            template,
        })
    }

    pub fn template(&self) -> ChatTemplate {
        self.template
    }
}

#[async_trait]
impl TextModel for LlmEngine {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn complete(&mut self, messages: &[Message], params: &GenerationParams) -> Result<ChatResult> {
        let prompt = self.template.render(messages);
        debug!("[llm] Prompt is {} chars", prompt.len());

        let resp = self
            .runtime
            .generate_raw(&self.model_id, &prompt, self.template.stop_sequences(), params)
            .await
            .map_err(|e| Error::Generation(e.to_string()))?;

        let text = resp.response.trim().to_string();
        if text.is_empty() {
            return Err(Error::Generation(format!("{} returned an empty completion", self.model_id)));
        }

        info!(
            "[llm] Generated {} tokens ({:.0}ms prefill, {:.1} tok/s)",
            resp.stats.eval_count,
            resp.stats.prefill_ms(),
            resp.stats.decode_tps()
        );

        Ok(ChatResult {
            text,
            prompt_tokens: resp.stats.prompt_eval_count,
            completion_tokens: resp.stats.eval_count,
            prefill_ms: resp.stats.prefill_ms(),
            decode_tps: resp.stats.decode_tps(),
        })
    }

    async fn release(&mut self) -> Result<()> {
        info!("[llm] Unloading {}", self.model_id);
        self.runtime.unload(&self.model_id).await
    }
}

fn format_chatml_prompt(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for message in messages {
        prompt.push_str(&format!(
            "<|im_start|>{}\n{}<|im_end|>\n",
            message.role, message.content
        ));
    }
    prompt.push_str("<|im_start|>assistant\n");
    prompt
}

fn format_phi_prompt(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for message in messages {
        let tag = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        prompt.push_str(&format!("<|{}|>{}<|end|>", tag, message.content));
    }
    prompt.push_str("<|assistant|>");
    prompt
}

use serde::{Deserialize, Serialize};

use crate::inference::llm::ChatTemplate;

/// Model families the assistant chains together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelCategory {
    Text,
    Vision,
    SpeechToText,
    TextToSpeech,
}

impl std::fmt::Display for ModelCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelCategory::Text => write!(f, "Text"),
            ModelCategory::Vision => write!(f, "Vision"),
            ModelCategory::SpeechToText => write!(f, "Speech-to-Text"),
            ModelCategory::TextToSpeech => write!(f, "Text-to-Speech"),
        }
    }
}

/// A known model and how the local services address it.
#[derive(Debug, Clone)]
pub struct ModelDef {
    /// Name the serving runtime knows the model by.
    pub id: &'static str,
    pub name: &'static str,
    pub category: ModelCategory,
    pub repo_id: &'static str,
    /// Prompt template for text models; `None` for everything else.
    pub template: Option<ChatTemplate>,
    pub description: &'static str,
    pub size_hint: &'static str,
}

pub static MODEL_CATALOG: &[ModelDef] = &[
    // Text
    ModelDef {
        id: "phi4-mini",
        name: "Phi-4-mini Instruct",
        category: ModelCategory::Text,
        repo_id: "microsoft/Phi-4-mini-instruct",
        template: Some(ChatTemplate::Phi),
        description: "Default text brain, 3.8B parameters",
        size_hint: "~2.5GB",
    },
    ModelDef {
        id: "qwen2.5:0.5b-instruct",
        name: "Qwen2.5-0.5B Instruct",
        category: ModelCategory::Text,
        repo_id: "Qwen/Qwen2.5-0.5B-Instruct",
        template: Some(ChatTemplate::ChatMl),
        description: "Smallest Qwen2.5, great for testing",
        size_hint: "~400MB",
    },
    ModelDef {
        id: "qwen3:4b",
        name: "Qwen3-4B",
        category: ModelCategory::Text,
        repo_id: "Qwen/Qwen3-4B",
        template: Some(ChatTemplate::ChatMl),
        description: "Qwen3 4B parameters",
        size_hint: "~2.6GB",
    },
    // Vision
    ModelDef {
        id: "qwen3-vl:2b",
        name: "Qwen3-VL-2B Instruct",
        category: ModelCategory::Vision,
        repo_id: "Qwen/Qwen3-VL-2B-Instruct",
        template: None,
        description: "Default vision brain",
        size_hint: "~1.9GB",
    },
    ModelDef {
        id: "llava:7b",
        name: "LLaVA 1.6 7B",
        category: ModelCategory::Vision,
        repo_id: "liuhaotian/llava-v1.6-mistral-7b",
        template: None,
        description: "Larger general-purpose captioner",
        size_hint: "~4.7GB",
    },
    // Speech-to-text
    ModelDef {
        id: "Systran/faster-whisper-medium",
        name: "Faster-Whisper medium",
        category: ModelCategory::SpeechToText,
        repo_id: "Systran/faster-whisper-medium",
        template: None,
        description: "Multilingual transcription, float16 on GPU",
        size_hint: "~1.5GB",
    },
    ModelDef {
        id: "Systran/faster-whisper-base",
        name: "Faster-Whisper base",
        category: ModelCategory::SpeechToText,
        repo_id: "Systran/faster-whisper-base",
        template: None,
        description: "Small and fast, CPU friendly",
        size_hint: "~150MB",
    },
    // Text-to-speech
    ModelDef {
        id: "kokoro",
        name: "Kokoro-82M",
        category: ModelCategory::TextToSpeech,
        repo_id: "hexgrad/Kokoro-82M",
        template: None,
        description: "24 kHz neural voices (af_heart default)",
        size_hint: "~330MB",
    },
];

impl ModelDef {
    pub fn find_by_id(id: &str) -> Option<&'static ModelDef> {
        MODEL_CATALOG.iter().find(|m| m.id == id)
    }

    pub fn by_category(category: ModelCategory) -> Vec<&'static ModelDef> {
        MODEL_CATALOG
            .iter()
            .filter(|m| m.category == category)
            .collect()
    }
}

/// Template for a text model id; unknown ids fall back to ChatML.
pub fn template_for(model_id: &str) -> ChatTemplate {
    ModelDef::find_by_id(model_id)
        .and_then(|m| m.template)
        .unwrap_or(ChatTemplate::ChatMl)
}

use serde::{Deserialize, Serialize};

use crate::conversation::Message;
use crate::orchestration::SlotState;

// ============================================================================
// Chat
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct ChatRequest {
    pub user_input: String,
    #[serde(default)]
    pub chat_history: Vec<Message>,
    #[serde(default)]
    pub use_search: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ChatResponse {
    pub response_text: String,
    pub audio_url: String,
    pub chat_history: Vec<Message>,
}

// ============================================================================
// Vision
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct VisionRequest {
    #[serde(default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct VisionResponse {
    pub response_text: String,
    pub audio_url: String,
}

// ============================================================================
// Audio
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct TranscriptionResponse {
    pub text: String,
}

// ============================================================================
// Status / catalog
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct StatusResponse {
    pub slot: SlotState,
    /// Id of the resident model, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resident_model: Option<String>,
    pub text_model: String,
    pub vision_model: String,
}

#[derive(Debug, Serialize)]
pub struct CatalogEntry {
    pub id: &'static str,
    pub name: &'static str,
    pub category: String,
    pub repo_id: &'static str,
    pub description: &'static str,
    pub size_hint: &'static str,
}

#[derive(Debug, Serialize)]
pub struct CatalogResponse {
    pub object: String,
    pub data: Vec<CatalogEntry>,
}

// ============================================================================
// Error
// ============================================================================

#[derive(Debug, Deserialize, Serialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ApiErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>, error_type: impl Into<String>) -> Self {
        ApiError {
            error: ApiErrorDetail {
                message: message.into(),
                error_type: error_type.into(),
            },
        }
    }
}

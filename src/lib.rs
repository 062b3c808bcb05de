//! OmniLocal: a local multimodal assistant.
//!
//! A text model and a vision model share one accelerator-resident slot
//! ([`orchestration::ModelRegistry`]). Replies are spoken through a TTS
//! service into WAV artifacts, and chat turns may be augmented with web
//! search context.

pub mod api;
pub mod artifacts;
pub mod client;
pub mod config;
pub mod conversation;
pub mod error;
pub mod inference;
pub mod models;
pub mod orchestration;

pub use client::OmniClient;
pub use config::AppConfig;
pub use conversation::{History, Message, Role};
pub use error::{Error, Result};
pub use orchestration::engine::{ChatOutcome, GenerationResult, Orchestrator, SlotStatus};
pub use orchestration::worker::WorkerHandle;
pub use orchestration::{SlotKind, SlotState};

//! Model slot management.
//!
//! One accelerator-resident slot is shared by the text and vision models.
//! [`ModelRegistry`] owns whichever is loaded and is the only place that
//! loads or releases them.

pub mod augment;
pub mod engine;
pub mod worker;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{Error, Result};
use crate::inference::{ModelLoader, TextModel, VisionModel};

/// The two model families competing for the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    Text,
    Vision,
}

impl std::fmt::Display for SlotKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotKind::Text => write!(f, "text"),
            SlotKind::Vision => write!(f, "vision"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Empty,
    TextResident,
    VisionResident,
}

impl SlotState {
    pub fn kind(&self) -> Option<SlotKind> {
        match self {
            SlotState::Empty => None,
            SlotState::TextResident => Some(SlotKind::Text),
            SlotState::VisionResident => Some(SlotKind::Vision),
        }
    }
}

enum Resident {
    Empty,
    Text(Box<dyn TextModel>),
    Vision(Box<dyn VisionModel>),
}

impl Resident {
    fn state(&self) -> SlotState {
        match self {
            Resident::Empty => SlotState::Empty,
            Resident::Text(_) => SlotState::TextResident,
            Resident::Vision(_) => SlotState::VisionResident,
        }
    }

    fn model_id(&self) -> Option<&str> {
        match self {
            Resident::Empty => None,
            Resident::Text(m) => Some(m.model_id()),
            Resident::Vision(m) => Some(m.model_id()),
        }
    }

    /// Consumes the model: it is released, then dropped.
    async fn release(self) -> Result<()> {
        match self {
            Resident::Empty => Ok(()),
            Resident::Text(mut m) => m.release().await,
            Resident::Vision(mut m) => m.release().await,
        }
    }
}

/// Exclusive owner of the text/vision slot.
///
/// Transitions take `&mut self`; callers that share a registry across tasks
/// must serialize access (see [`worker`]).
pub struct ModelRegistry {
    loader: Arc<dyn ModelLoader>,
    resident: Resident,
    /// Kind whose last load failed and may have left partial state behind.
    stale: Option<SlotKind>,
}

impl ModelRegistry {
    pub fn new(loader: Arc<dyn ModelLoader>) -> Self {
        Self {
            loader,
            resident: Resident::Empty,
            stale: None,
        }
    }

    pub fn state(&self) -> SlotState {
        self.resident.state()
    }

    pub fn resident_model_id(&self) -> Option<&str> {
        self.resident.model_id()
    }

    /// Make `kind` resident, unloading the other family first.
    ///
    /// No-op when `kind` is already resident. On load failure the slot is
    /// left `Empty` and the error is returned as [`Error::FatalInit`]; there
    /// is no retry.
    pub async fn ensure_resident(&mut self, kind: SlotKind) -> Result<()> {
        if self.state().kind() == Some(kind) {
            return Ok(());
        }

        self.release().await;

        info!("Loading {} brain...", kind);
        let t0 = Instant::now();
        let loaded = match kind {
            SlotKind::Text => self.loader.load_text().await.map(Resident::Text),
            SlotKind::Vision => self.loader.load_vision().await.map(Resident::Vision),
        };

        match loaded {
            Ok(resident) => {
                info!(
                    "{} brain ready ({}) in {:.1}s",
                    kind,
                    resident.model_id().unwrap_or("?"),
                    t0.elapsed().as_secs_f64()
                );
                self.resident = resident;
                Ok(())
            }
            Err(e) => {
                error!("Failed to load {} brain: {}", kind, e);
                self.stale = Some(kind);
                Err(match e {
                    Error::FatalInit(_) => e,
                    other => Error::FatalInit(other.to_string()),
                })
            }
        }
    }

    /// Empty the slot. The marker is cleared before the model is released,
    /// and partial state from a failed load is evicted too. Release failures
    /// are logged, never propagated.
    pub async fn release(&mut self) {
        let previous = std::mem::replace(&mut self.resident, Resident::Empty);
        if let Some(kind) = previous.state().kind() {
            info!("Unloading {} brain...", kind);
            if let Err(e) = previous.release().await {
                warn!("Releasing {} brain reported an error: {}", kind, e);
            }
        }

        if let Some(kind) = self.stale.take() {
            info!("Evicting partially loaded {} brain", kind);
            if let Err(e) = self.loader.evict(kind).await {
                warn!("Evicting {} brain reported an error: {}", kind, e);
            }
        }
    }

    pub fn text_model(&mut self) -> Result<&mut dyn TextModel> {
        match &mut self.resident {
            Resident::Text(m) => Ok(m.as_mut()),
            _ => Err(Error::Generation("text model is not resident".to_string())),
        }
    }

    pub fn vision_model(&mut self) -> Result<&mut dyn VisionModel> {
        match &mut self.resident {
            Resident::Vision(m) => Ok(m.as_mut()),
            _ => Err(Error::Generation("vision model is not resident".to_string())),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeLoader;
    use super::*;

    fn registry() -> (ModelRegistry, FakeLoader) {
        let loader = FakeLoader::default();
        (ModelRegistry::new(Arc::new(loader.clone())), loader)
    }

    #[tokio::test]
    async fn starts_empty() {
        let (registry, _) = registry();
        assert_eq!(registry.state(), SlotState::Empty);
        assert!(registry.resident_model_id().is_none());
    }

    #[tokio::test]
    async fn ensure_text_twice_loads_once() {
        let (mut registry, loader) = registry();
        registry.ensure_resident(SlotKind::Text).await.unwrap();
        registry.ensure_resident(SlotKind::Text).await.unwrap();

        let log = loader.log();
        assert_eq!(log.text_loads, 1);
        assert!(log.releases.is_empty());
        assert_eq!(registry.state(), SlotState::TextResident);
    }

    #[tokio::test]
    async fn at_most_one_family_is_live_after_every_transition() {
        let (mut registry, loader) = registry();
        let sequence = [
            SlotKind::Text,
            SlotKind::Vision,
            SlotKind::Vision,
            SlotKind::Text,
            SlotKind::Vision,
            SlotKind::Text,
            SlotKind::Text,
        ];

        for kind in sequence {
            registry.ensure_resident(kind).await.unwrap();
            assert_eq!(registry.state().kind(), Some(kind));
            let log = loader.log();
            assert_eq!(log.live, vec![kind]);
        }

        let log = loader.log();
        assert_eq!(log.text_loads, 3);
        assert_eq!(log.vision_loads, 2);
        assert_eq!(
            log.releases,
            vec![SlotKind::Text, SlotKind::Vision, SlotKind::Text, SlotKind::Vision]
        );
    }

    #[tokio::test]
    async fn previous_model_is_released_before_the_next_load() {
        let (mut registry, loader) = registry();
        registry.ensure_resident(SlotKind::Vision).await.unwrap();
        registry.ensure_resident(SlotKind::Text).await.unwrap();

        let log = loader.log();
        assert_eq!(log.releases, vec![SlotKind::Vision]);
        assert_eq!(log.live, vec![SlotKind::Text]);
    }

    #[tokio::test]
    async fn failed_load_leaves_slot_empty_and_is_fatal() {
        let (mut registry, loader) = registry();
        registry.ensure_resident(SlotKind::Text).await.unwrap();
        loader.log().fail_next = Some(SlotKind::Vision);

        let err = registry.ensure_resident(SlotKind::Vision).await.unwrap_err();
        assert!(matches!(err, Error::FatalInit(msg) if msg.contains("out of memory")));
        assert_eq!(registry.state(), SlotState::Empty);
        assert!(registry.vision_model().is_err());
        assert!(loader.log().live.is_empty());
    }

    #[tokio::test]
    async fn partial_state_is_evicted_on_next_transition() {
        let (mut registry, loader) = registry();
        loader.log().fail_next = Some(SlotKind::Text);
        assert!(registry.ensure_resident(SlotKind::Text).await.is_err());
        assert!(loader.log().evictions.is_empty());

        registry.ensure_resident(SlotKind::Text).await.unwrap();
        let log = loader.log();
        assert_eq!(log.evictions, vec![SlotKind::Text]);
        assert_eq!(log.text_loads, 1);
        assert_eq!(registry.state(), SlotState::TextResident);
    }

    #[tokio::test]
    async fn model_accessors_follow_the_slot() {
        let (mut registry, _) = registry();
        assert!(registry.text_model().is_err());
        registry.ensure_resident(SlotKind::Text).await.unwrap();
        assert_eq!(registry.text_model().unwrap().model_id(), "fake-text");
        assert!(registry.vision_model().is_err());
    }

    #[tokio::test]
    async fn release_empties_the_slot() {
        let (mut registry, loader) = registry();
        registry.ensure_resident(SlotKind::Vision).await.unwrap();
        registry.release().await;
        assert_eq!(registry.state(), SlotState::Empty);
        assert!(loader.log().live.is_empty());
    }
}

//! Single inference worker.
//!
//! All slot transitions and generations run on one task that owns the
//! [`Orchestrator`]. Requests queue on a bounded channel and are answered
//! over oneshot channels, so no two of them ever interleave on the slot.

use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::engine::{ChatOutcome, GenerationResult, Orchestrator, SlotStatus};
use crate::conversation::History;
use crate::error::{Error, Result};

pub enum InferenceRequest {
    Chat {
        history: History,
        utterance: String,
        use_search: bool,
        response_tx: oneshot::Sender<Result<ChatOutcome>>,
    },
    Caption {
        image: Option<PathBuf>,
        instruction: String,
        response_tx: oneshot::Sender<Result<GenerationResult>>,
    },
    Shutdown,
}

/// Cloneable front door to the worker.
#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<InferenceRequest>,
    status: watch::Receiver<SlotStatus>,
}

/// Start the worker. It runs until a `Shutdown` request arrives or every
/// handle is dropped, then releases the slot.
pub fn spawn(orchestrator: Orchestrator, capacity: usize) -> (WorkerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (status_tx, status_rx) = watch::channel(orchestrator.status());
    let join = tokio::spawn(run(orchestrator, rx, status_tx));
    (
        WorkerHandle {
            tx,
            status: status_rx,
        },
        join,
    )
}

async fn run(
    mut orchestrator: Orchestrator,
    mut rx: mpsc::Receiver<InferenceRequest>,
    status_tx: watch::Sender<SlotStatus>,
) {
    info!("[worker] Inference worker started");
    while let Some(req) = rx.recv().await {
        match req {
            InferenceRequest::Chat {
                history,
                utterance,
                use_search,
                response_tx,
            } => {
                let res = orchestrator.chat(&history, &utterance, use_search).await;
                if let Err(e) = &res {
                    warn!("[worker] Chat failed: {}", e);
                }
                status_tx.send_replace(orchestrator.status());
                if let Err(Ok(orphan)) = response_tx.send(res) {
                    discard_artifact(&orphan.audio_path).await;
                }
            }
            InferenceRequest::Caption {
                image,
                instruction,
                response_tx,
            } => {
                let res = orchestrator.caption(image.as_deref(), &instruction).await;
                if let Err(e) = &res {
                    warn!("[worker] Caption failed: {}", e);
                }
                status_tx.send_replace(orchestrator.status());
                if let Err(Ok(orphan)) = response_tx.send(res) {
                    discard_artifact(&orphan.audio_path).await;
                }
            }
            InferenceRequest::Shutdown => break,
        }
    }

    orchestrator.shutdown().await;
    status_tx.send_replace(orchestrator.status());
    info!("[worker] Inference worker stopped");
}

/// The caller went away before its reply; nobody will ever fetch this file.
async fn discard_artifact(path: &Path) {
    info!("[worker] Caller gone, discarding {}", path.display());
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("[worker] Could not remove {}: {}", path.display(), e);
    }
}

impl WorkerHandle {
    pub async fn chat(&self, history: History, utterance: &str, use_search: bool) -> Result<ChatOutcome> {
        let (response_tx, response_rx) = oneshot::channel();
        self.submit(InferenceRequest::Chat {
            history,
            utterance: utterance.to_string(),
            use_search,
            response_tx,
        })
        .await?;
        response_rx.await.map_err(|_| Error::WorkerUnavailable)?
    }

    pub async fn caption(&self, image: Option<PathBuf>, instruction: &str) -> Result<GenerationResult> {
        let (response_tx, response_rx) = oneshot::channel();
        self.submit(InferenceRequest::Caption {
            image,
            instruction: instruction.to_string(),
            response_tx,
        })
        .await?;
        response_rx.await.map_err(|_| Error::WorkerUnavailable)?
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.submit(InferenceRequest::Shutdown).await
    }

    /// Slot state as of the last completed request. Published before the
    /// request's reply is sent.
    pub fn status(&self) -> SlotStatus {
        self.status.borrow().clone()
    }

    async fn submit(&self, req: InferenceRequest) -> Result<()> {
        self.tx.send(req).await.map_err(|_| Error::WorkerUnavailable)
    }
}

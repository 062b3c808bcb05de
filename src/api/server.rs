use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::handlers::{self, SharedState};

/// Raw WAV uploads run to tens of MB for a few minutes of stereo audio.
pub const AUDIO_UPLOAD_LIMIT_BYTES: usize = 64 * 1024 * 1024;

pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/status", get(handlers::status))
        .route("/api/catalog", get(handlers::list_catalog))
        .route("/api/chat", post(handlers::chat_endpoint))
        .route("/api/vision", post(handlers::vision_endpoint))
        .route(
            "/api/transcribe",
            post(handlers::transcribe_audio).layer(DefaultBodyLimit::max(AUDIO_UPLOAD_LIMIT_BYTES)),
        )
        .route("/audio/:filename", get(handlers::get_audio))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Serve until Ctrl+C or SIGTERM. The caller owns worker shutdown.
pub async fn start_server(host: &str, port: u16, state: SharedState) -> std::io::Result<()> {
    let app = create_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("OmniLocal server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::api::handlers::AppState;
    use crate::orchestration::engine::tests::{harness, Harness};
    use crate::orchestration::worker;

    fn app() -> (Router, tempfile::TempDir) {
        let Harness {
            orchestrator, dir, ..
        } = harness("");
        let state = Arc::new(AppState {
            transcriber: orchestrator.transcriber(),
            artifacts: orchestrator.artifacts().clone(),
            worker: worker::spawn(orchestrator, 4).0,
            public_url: "http://omni.test".to_string(),
            text_model: "phi4-mini".to_string(),
            vision_model: "qwen3-vl:2b".to_string(),
        });
        (create_router(state), dir)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_bytes(resp: axum::response::Response) -> Vec<u8> {
        axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        serde_json::from_slice(&body_bytes(resp).await).unwrap()
    }

    #[tokio::test]
    async fn health_and_status() {
        let (app, _dir) = app();

        let resp = app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({"status": "ok"}));

        let resp = app.oneshot(get("/api/status")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let status = body_json(resp).await;
        assert_eq!(status["slot"], "empty");
        assert_eq!(status["text_model"], "phi4-mini");
        assert_eq!(status["vision_model"], "qwen3-vl:2b");
    }

    #[tokio::test]
    async fn catalog_lists_models() {
        let (app, _dir) = app();
        let resp = app.oneshot(get("/api/catalog")).await.unwrap();
        let catalog = body_json(resp).await;
        assert_eq!(catalog["object"], "list");
        assert!(catalog["data"]
            .as_array()
            .unwrap()
            .iter()
            .any(|m| m["id"] == "phi4-mini"));
    }

    #[tokio::test]
    async fn chat_then_audio_is_served_once() {
        let (app, _dir) = app();

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/chat",
                json!({
                    "user_input": "What is 2+2?",
                    "chat_history": [{"role": "user", "content": "Hi"}, {"role": "assistant", "content": "Hello!"}]
                }),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let chat = body_json(resp).await;
        assert_eq!(chat["response_text"], "**Four**, of course.");
        assert_eq!(chat["chat_history"].as_array().unwrap().len(), 4);
        assert_eq!(chat["chat_history"][2], json!({"role": "user", "content": "What is 2+2?"}));

        let audio_url = chat["audio_url"].as_str().unwrap();
        let audio_path = audio_url.strip_prefix("http://omni.test").unwrap();
        assert!(audio_path.starts_with("/audio/omnilocal_response_"));

        let resp = app.clone().oneshot(get(audio_path)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "audio/wav");
        assert_eq!(&body_bytes(resp).await[..4], b"RIFF");

        let resp = app.oneshot(get(audio_path)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_chat_is_bad_request() {
        let (app, _dir) = app();
        let resp = app
            .oneshot(post_json("/api/chat", json!({"user_input": "  "})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["type"], "invalid_input");
    }

    #[tokio::test]
    async fn vision_validates_the_image() {
        let (app, _dir) = app();

        let resp = app
            .clone()
            .oneshot(post_json("/api/vision", json!({"prompt": "what is this?"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .oneshot(post_json("/api/vision", json!({"image_path": "no/such/image.jpg"})))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["error"]["type"], "not_found");
    }

    #[tokio::test]
    async fn transcribe_accepts_raw_body() {
        let (app, _dir) = app();

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/transcribe")
                    .body(Body::from(&b"RIFF....WAVE"[..]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["text"], "what is two plus two");

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/transcribe")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn transcribe_accepts_uploads_past_the_default_limit() {
        let (app, _dir) = app();
        // 30 s of 44.1 kHz stereo 16-bit audio
        let body = vec![0u8; 30 * 44_100 * 2 * 2];
        assert!(body.len() > 2 * 1024 * 1024);

        let resp = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/transcribe")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_json_gets_the_error_shape() {
        let (app, _dir) = app();

        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/chat")
                    .header("content-type", "application/json")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["error"]["type"], "invalid_input");

        let resp = app
            .oneshot(post_json(
                "/api/chat",
                json!({"user_input": "Hi", "chat_history": [{"role": "robot", "content": "beep"}]}),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let err = body_json(resp).await;
        assert_eq!(err["error"]["type"], "invalid_input");
        assert!(err["error"]["message"].is_string());
    }

    #[tokio::test]
    async fn hidden_audio_names_are_rejected() {
        let (app, _dir) = app();
        let resp = app.oneshot(get("/audio/.secret.wav")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}

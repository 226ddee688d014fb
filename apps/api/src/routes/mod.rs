pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;
use crate::writer::handlers;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // AI Writer
        .route(
            "/api/v1/writer/generate",
            post(handlers::handle_generate_stream),
        )
        .route(
            "/api/v1/writer/generate/complete",
            post(handlers::handle_generate_complete),
        )
        .route(
            "/api/v1/writer/sessions/:session_id",
            get(handlers::handle_session_state).delete(handlers::handle_reset_session),
        )
        .route(
            "/api/v1/writer/sessions/:session_id/cancel",
            post(handlers::handle_cancel),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{header::CONTENT_TYPE, Request, StatusCode},
        Router,
    };
    use futures_util::StreamExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::stream::LineFraming;
    use crate::writer::session::{GenerationState, GenerationTracker};
    use crate::writer_client::fake::{Scripted, ScriptedSource};

    fn app_with(source: ScriptedSource) -> (Router, Arc<GenerationTracker>) {
        let sessions = Arc::new(GenerationTracker::default());
        let state = AppState {
            writer: Arc::new(source),
            sessions: sessions.clone(),
            line_framing: LineFraming::Buffered,
        };
        (build_router(state), sessions)
    }

    fn generate_request(uri: &str, session_id: Uuid) -> Request<Body> {
        let body = json!({
            "session_id": session_id,
            "job_description": "Backend engineer working on Rust services.",
            "company_name": "Acme",
            "tone": "professional",
        });
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn read_body(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    /// Waits for the background generation to leave `Streaming`.
    async fn settled_state(sessions: &GenerationTracker, session_id: Uuid) -> GenerationState {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let state = sessions.state(session_id);
                if !state.is_streaming() {
                    return state;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("generation did not settle")
    }

    fn cover_letter_lines() -> ScriptedSource {
        ScriptedSource::lines(&[
            "0:\"Dear \"\n",
            "0:\"Hiring Manager,\"\n",
            "e:{\"finishReason\":\"stop\"}\n",
        ])
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app_with(ScriptedSource::NoBody);
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&read_body(response).await).unwrap();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_stream_emits_snapshots_then_done() {
        let (app, sessions) = app_with(cover_letter_lines());
        let session_id = Uuid::new_v4();

        let response = app
            .oneshot(generate_request("/api/v1/writer/generate", session_id))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers()[CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream"));

        let body = read_body(response).await;
        assert_eq!(body.matches(r#""type":"snapshot""#).count(), 2);
        assert_eq!(body.matches(r#""type":"done""#).count(), 1);
        assert!(body.contains(r#""text":"Dear ""#));
        assert!(body.contains(r#"{"type":"done","text":"Dear Hiring Manager,","partial":false}"#));

        assert!(matches!(
            sessions.state(session_id),
            GenerationState::Succeeded { ref text, partial: false, .. } if text == "Dear Hiring Manager,"
        ));
    }

    #[tokio::test]
    async fn test_stream_with_only_markers_fails() {
        let (app, sessions) = app_with(ScriptedSource::lines(&["d:{}\n", "e:{}\n"]));
        let session_id = Uuid::new_v4();

        let response = app
            .oneshot(generate_request("/api/v1/writer/generate", session_id))
            .await
            .unwrap();
        let body = read_body(response).await;

        assert_eq!(body.matches(r#""type":"snapshot""#).count(), 0);
        assert!(body.contains(r#""type":"failed""#));
        assert!(body.contains("Generation failed, please try again"));
        assert!(matches!(
            sessions.state(session_id),
            GenerationState::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_complete_returns_whole_letter() {
        let (app, _) = app_with(cover_letter_lines());
        let response = app
            .oneshot(generate_request(
                "/api/v1/writer/generate/complete",
                Uuid::new_v4(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&read_body(response).await).unwrap();
        assert_eq!(body["text"], "Dear Hiring Manager,");
        assert_eq!(body["partial"], false);
        assert_eq!(body["updates"], 2);
    }

    #[tokio::test]
    async fn test_complete_keeps_partial_text_after_read_failure() {
        let (app, _) = app_with(ScriptedSource::Stream(vec![
            Scripted::Chunk("0:\"Hello\"\n"),
            Scripted::Fail("connection reset"),
        ]));
        let response = app
            .oneshot(generate_request(
                "/api/v1/writer/generate/complete",
                Uuid::new_v4(),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&read_body(response).await).unwrap();
        assert_eq!(body["text"], "Hello");
        assert_eq!(body["partial"], true);
    }

    #[tokio::test]
    async fn test_missing_body_is_generation_failure() {
        let (app, sessions) = app_with(ScriptedSource::NoBody);
        let session_id = Uuid::new_v4();
        let response = app
            .oneshot(generate_request(
                "/api/v1/writer/generate/complete",
                session_id,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(matches!(
            sessions.state(session_id),
            GenerationState::Failed { ref reason, .. } if reason.contains("no readable body")
        ));
    }

    #[tokio::test]
    async fn test_upstream_rejection_is_json_error() {
        let (app, sessions) = app_with(ScriptedSource::Reject { status: 401 });
        let session_id = Uuid::new_v4();
        let response = app
            .oneshot(generate_request("/api/v1/writer/generate", session_id))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body: Value = serde_json::from_str(&read_body(response).await).unwrap();
        assert_eq!(body["error"]["code"], "UPSTREAM_ERROR");
        assert!(matches!(
            sessions.state(session_id),
            GenerationState::Failed { .. }
        ));
    }

    #[tokio::test]
    async fn test_upstream_rate_limit_is_429() {
        let (app, _) = app_with(ScriptedSource::RateLimited);
        let response = app
            .oneshot(generate_request("/api/v1/writer/generate", Uuid::new_v4()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_second_generation_in_same_session_conflicts() {
        let (app, sessions) = app_with(cover_letter_lines());
        let session_id = Uuid::new_v4();
        let _active = sessions.begin(session_id).unwrap();

        let response = app
            .oneshot(generate_request("/api/v1/writer/generate", session_id))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_blank_job_description_is_rejected() {
        let (app, sessions) = app_with(cover_letter_lines());
        let session_id = Uuid::new_v4();
        let body = json!({ "session_id": session_id, "job_description": "  " });
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/writer/generate")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(sessions.state(session_id), GenerationState::Idle);
    }

    #[tokio::test]
    async fn test_session_status_cancel_and_reset() {
        let (app, sessions) = app_with(ScriptedSource::NoBody);
        let session_id = Uuid::new_v4();
        let active = sessions.begin(session_id).unwrap();
        let uri = format!("/api/v1/writer/sessions/{session_id}");

        let response = app
            .clone()
            .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&read_body(response).await).unwrap();
        assert_eq!(body["state"], "streaming");

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(&uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("{uri}/cancel"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&read_body(response).await).unwrap();
        assert_eq!(body["cancelled"], true);
        assert!(active.cancel.is_cancelled());

        sessions
            .complete(&active, &Err(crate::stream::AssembleError::Cancelled))
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(&uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(sessions.state(session_id), GenerationState::Idle);
    }

    #[tokio::test]
    async fn test_client_disconnect_cancels_generation() {
        let (app, sessions) = app_with(ScriptedSource::Stalled(vec!["0:\"Dear \"\n"]));
        let session_id = Uuid::new_v4();

        let response = app
            .oneshot(generate_request("/api/v1/writer/generate", session_id))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut frames = response.into_body().into_data_stream();
        let first = frames.next().await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&first).contains(r#""text":"Dear ""#));
        assert!(sessions.state(session_id).is_streaming());
        drop(frames);

        assert!(matches!(
            settled_state(&sessions, session_id).await,
            GenerationState::Succeeded { ref text, partial: true, .. } if text == "Dear "
        ));
    }

    #[tokio::test]
    async fn test_cancel_stops_running_stream() {
        let (app, sessions) = app_with(ScriptedSource::Stalled(vec!["0:\"Dear \"\n"]));
        let session_id = Uuid::new_v4();

        let response = app
            .clone()
            .oneshot(generate_request("/api/v1/writer/generate", session_id))
            .await
            .unwrap();
        let mut frames = response.into_body().into_data_stream();
        let first = frames.next().await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&first).contains(r#""type":"snapshot""#));

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/v1/writer/sessions/{session_id}/cancel"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body: Value = serde_json::from_str(&read_body(response).await).unwrap();
        assert_eq!(body["cancelled"], true);

        let mut rest = String::new();
        while let Some(frame) = frames.next().await {
            rest.push_str(&String::from_utf8_lossy(&frame.unwrap()));
        }
        assert!(rest.contains(r#"{"type":"done","text":"Dear ","partial":true}"#));

        assert!(matches!(
            settled_state(&sessions, session_id).await,
            GenerationState::Succeeded { ref text, partial: true, .. } if text == "Dear "
        ));
    }

    #[tokio::test]
    async fn test_task_dying_before_open_records_failure() {
        let (app, sessions) = app_with(ScriptedSource::Panic);
        let session_id = Uuid::new_v4();

        let response = app
            .clone()
            .oneshot(generate_request("/api/v1/writer/generate", session_id))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(matches!(
            sessions.state(session_id),
            GenerationState::Failed { .. }
        ));

        // The session is free again, so a retry is not a conflict.
        let response = app
            .oneshot(generate_request("/api/v1/writer/generate/complete", session_id))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}

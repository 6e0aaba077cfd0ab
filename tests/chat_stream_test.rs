//! Chat Stream Integration Tests
//!
//! End-to-end: HTTP request → chat facade → mock provider → SSE → parser.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use consultant_chat::{
    App, ChatClient, ChatError, ChatMessage, ChatRequestBody, ChatServer, Config, SseDecoder, SseFrame,
};
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn test_app() -> Arc<App> {
    Arc::new(App::init(Config::for_tests()).expect("Failed to init app"))
}

async fn post_chat(app: Arc<App>, body: &str) -> String {
    let router = ChatServer::new(app).build_router();
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/chat")
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn messages(frames: &[SseFrame]) -> Vec<&ChatMessage> {
    frames
        .iter()
        .filter_map(|f| match f {
            SseFrame::Message(m) => Some(m),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_standard_hi_without_credentials() {
    let body = post_chat(test_app(), r#"{"messages":[{"role":"user","content":"Hi"}]}"#).await;

    assert_eq!(body.matches("event: meta\n").count(), 1);
    assert_eq!(body.matches("event: end\n").count(), 1);

    let frames = SseDecoder::new().feed(body.as_bytes());
    assert!(matches!(frames.first(), Some(SseFrame::Meta(meta)) if meta.provider == "mock"));
    assert_eq!(frames.last(), Some(&SseFrame::End));

    let chunks = messages(&frames);
    let last = chunks.last().unwrap();
    assert!(last.metadata.is_complete);
    assert!(last.content.contains("Hi"));

    // Growing content: every chunk extends the previous one
    for pair in chunks.windows(2) {
        assert!(pair[1].content.starts_with(&pair[0].content));
    }
    assert!(chunks.iter().all(|c| c.id == last.id));
}

#[tokio::test]
async fn test_mock_transcript_is_deterministic() {
    let request = r#"{"messages":[{"role":"user","content":"Hi"}]}"#;
    let first = post_chat(test_app(), request).await;
    let second = post_chat(test_app(), request).await;

    let last_content = |body: &str| {
        let frames = SseDecoder::new().feed(body.as_bytes());
        messages(&frames).last().map(|m| m.content.clone())
    };
    assert_eq!(last_content(&first), last_content(&second));
}

#[tokio::test]
async fn test_validation_error_frame() {
    let body = post_chat(test_app(), r#"{"messages":[{"role":"user","content":"Hi"}],"mode":"admin"}"#).await;

    let frames = SseDecoder::new().feed(body.as_bytes());
    assert_eq!(frames.len(), 2);
    match &frames[1] {
        SseFrame::Error(payload) => {
            assert_eq!(payload.code.as_str(), "validation");
            assert!(payload.message.contains("sessionId"));
        }
        other => panic!("expected error frame, got {:?}", other),
    }
}

#[tokio::test]
async fn test_context_round_trip_through_chat() {
    let app = test_app();
    post_chat(
        Arc::clone(&app),
        r#"{"messages":[{"role":"user","content":"Hi"}],"sessionId":"visitor-1",
            "context":{"name":"Dana","company":"Acme","interests":["pricing"]}}"#,
    )
    .await;

    let stored = app.context_store.load("visitor-1").unwrap().unwrap();
    assert_eq!(stored.company.as_deref(), Some("Acme"));
    assert_eq!(stored.session_id.as_deref(), Some("visitor-1"));
}

#[tokio::test]
async fn test_client_over_tcp() {
    let app = test_app();
    let router = ChatServer::new(Arc::clone(&app)).build_router();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = ChatClient::new(&format!("http://{}", addr), Duration::from_secs(5)).unwrap();
    let received: Vec<ChatMessage> = client
        .send(&ChatRequestBody::prompt("How do I cut churn?"))
        .await
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
        .await;

    let last = received.last().unwrap();
    assert!(last.is_complete());
    assert!(last.content.contains("How do I cut churn?"));
    assert_eq!(received.iter().filter(|m| m.is_complete()).count(), 1);

    // Errors come back typed
    let invalid = ChatRequestBody {
        mode: Some("multimodal".to_string()),
        ..ChatRequestBody::prompt("What is in this image?")
    };
    let results: Vec<Result<ChatMessage, ChatError>> = client.send(&invalid).await.unwrap().collect().await;
    assert_eq!(results.len(), 1);
    assert!(matches!(results[0], Err(ChatError::Validation(_))));

    assert!(!client.cancel_realtime("nobody").await.unwrap());
}

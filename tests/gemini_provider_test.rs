//! Gemini Provider Integration Tests
//!
//! Runs the provider against a local axum server that imitates the Gemini
//! REST API, with scripted failures.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use consultant_chat::{
    ChatMessage, ChatProvider, ChunkOrigin, CircuitBreaker, ErrorRecovery, GeminiClient, GenerateRequest,
    ProviderChunk, ResponseCache, RetryPolicy,
};
use consultant_chat::provider::{GeminiProvider, APOLOGY_MESSAGE, UNAVAILABLE_MESSAGE};
use consultant_chat::recovery::CircuitBreakerConfig;
use futures_util::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Vendor behaviour for one test
struct FakeGemini {
    calls: AtomicUsize,
    /// Leading calls that fail with `failure_status`
    failures: usize,
    failure_status: StatusCode,
    reply: String,
}

async fn model_call(
    State(fake): State<Arc<FakeGemini>>,
    Path(call): Path<String>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    assert_eq!(headers["x-goog-api-key"], "test-key");

    if call.ends_with(":embedContent") {
        return Json(serde_json::json!({"embedding": {"values": [0.25, 0.5]}})).into_response();
    }
    assert!(call.ends_with(":generateContent"), "unexpected call {}", call);
    assert!(body["contents"].is_array());

    let n = fake.calls.fetch_add(1, Ordering::SeqCst);
    if n < fake.failures {
        let error = serde_json::json!({"error": {"code": fake.failure_status.as_u16(), "message": "backend overloaded"}});
        return (fake.failure_status, Json(error)).into_response();
    }

    Json(serde_json::json!({
        "candidates": [{
            "content": {"role": "model", "parts": [{"text": fake.reply}]},
            "finishReason": "STOP"
        }],
        "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 8}
    }))
    .into_response()
}

async fn spawn_fake(failures: usize, failure_status: StatusCode) -> (String, Arc<FakeGemini>) {
    let fake = Arc::new(FakeGemini {
        calls: AtomicUsize::new(0),
        failures,
        failure_status,
        reply: "Focus on your top three customers.".to_string(),
    });
    let router = Router::new()
        .route("/v1beta/models/{call}", post(model_call))
        .with_state(Arc::clone(&fake));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{}/v1beta", addr), fake)
}

struct Fixture {
    provider: GeminiProvider,
    cache: Arc<ResponseCache>,
    recovery: Arc<ErrorRecovery>,
}

fn fixture(base_url: &str, threshold: u32) -> Fixture {
    let client = GeminiClient::new("test-key", base_url, "gemini-test", "embed-test", Duration::from_secs(5)).unwrap();
    let cache = Arc::new(ResponseCache::new(100, Duration::from_secs(60), true));
    let recovery = Arc::new(ErrorRecovery::new(
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(5),
        },
        CircuitBreaker::with_config(
            "gemini",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                timeout: Duration::from_secs(60),
            },
        ),
    ));
    let provider = GeminiProvider::new(client, Arc::clone(&cache), Arc::clone(&recovery), 0.7);
    Fixture {
        provider,
        cache,
        recovery,
    }
}

async fn ask(provider: &GeminiProvider, text: &str) -> Vec<ProviderChunk> {
    provider
        .generate(GenerateRequest::new(vec![ChatMessage::user(text)], "You are a consultant."))
        .collect()
        .await
}

#[tokio::test]
async fn test_retry_succeeds_on_third_attempt() {
    let (base_url, fake) = spawn_fake(2, StatusCode::SERVICE_UNAVAILABLE).await;
    let f = fixture(&base_url, 5);

    let chunks = ask(&f.provider, "How do I grow revenue?").await;
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].origin, ChunkOrigin::Vendor);
    assert_eq!(chunks[0].text, "Focus on your top three customers.");
    assert_eq!(fake.calls.load(Ordering::SeqCst), 3);

    let stats = f.recovery.stats();
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.successful, 1);
}

#[tokio::test]
async fn test_second_identical_call_hits_cache() {
    let (base_url, fake) = spawn_fake(0, StatusCode::OK).await;
    let f = fixture(&base_url, 5);

    let first = ask(&f.provider, "Pricing strategy?").await;
    let second = ask(&f.provider, "Pricing strategy?").await;

    assert_eq!(first[0].origin, ChunkOrigin::Vendor);
    assert_eq!(second[0].origin, ChunkOrigin::Cache);
    assert_eq!(first[0].text, second[0].text);
    assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
    assert_eq!(f.cache.stats().hits, 1);
}

#[tokio::test]
async fn test_persona_and_context_scope_the_cache() {
    let (base_url, fake) = spawn_fake(0, StatusCode::OK).await;
    let f = fixture(&base_url, 5);

    let task = |name: &str| {
        let mut request = GenerateRequest::new(vec![ChatMessage::user("Run it")], "You run automation tasks.");
        request.context = Some(serde_json::json!({"automationTask": {"name": name, "parameters": {}}}));
        request
    };

    let standard = f
        .provider
        .complete(GenerateRequest::new(vec![ChatMessage::user("Run it")], "You are a consultant."))
        .await;
    let weekly = f.provider.complete(task("weekly_report")).await;
    let purge = f.provider.complete(task("delete_all_leads")).await;
    let weekly_again = f.provider.complete(task("weekly_report")).await;

    assert_eq!(standard.origin, ChunkOrigin::Vendor);
    assert_eq!(weekly.origin, ChunkOrigin::Vendor);
    assert_eq!(purge.origin, ChunkOrigin::Vendor);
    assert_eq!(weekly_again.origin, ChunkOrigin::Cache);
    assert_eq!(fake.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_exhausted_retries_yield_apology() {
    let (base_url, fake) = spawn_fake(usize::MAX, StatusCode::INTERNAL_SERVER_ERROR).await;
    let f = fixture(&base_url, 10);

    let chunks = ask(&f.provider, "Hello?").await;
    assert_eq!(chunks[0].origin, ChunkOrigin::Fallback);
    assert_eq!(chunks[0].text, APOLOGY_MESSAGE);
    assert_eq!(fake.calls.load(Ordering::SeqCst), 3);
    // Failures are never cached
    assert!(f.cache.is_empty());
}

#[tokio::test]
async fn test_auth_errors_are_not_retried() {
    let (base_url, fake) = spawn_fake(usize::MAX, StatusCode::UNAUTHORIZED).await;
    let f = fixture(&base_url, 10);

    let chunks = ask(&f.provider, "Hello?").await;
    assert_eq!(chunks[0].text, APOLOGY_MESSAGE);
    assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_circuit_opens_and_short_circuits() {
    let (base_url, fake) = spawn_fake(usize::MAX, StatusCode::SERVICE_UNAVAILABLE).await;
    let f = fixture(&base_url, 3);

    // Three failed attempts open the breaker
    let first = ask(&f.provider, "one").await;
    assert_eq!(first[0].text, APOLOGY_MESSAGE);
    assert!(f.recovery.breaker().is_open());

    let second = ask(&f.provider, "two").await;
    assert_eq!(second[0].text, UNAVAILABLE_MESSAGE);
    assert_eq!(fake.calls.load(Ordering::SeqCst), 3);
    assert_eq!(f.recovery.stats().short_circuited, 1);
}

#[tokio::test]
async fn test_embed_content() {
    let (base_url, _fake) = spawn_fake(0, StatusCode::OK).await;
    let client = GeminiClient::new("test-key", &base_url, "gemini-test", "embed-test", Duration::from_secs(5)).unwrap();

    let embedding = client.embed_content("quarterly revenue").await.unwrap();
    assert_eq!(embedding, vec![0.25, 0.5]);
}

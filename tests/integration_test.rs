/// End-to-end tests for the HTTP surfaces.
///
/// Drives both routers in-process:
///   chat backend → MockEngine (SSE, JSON, upload, documents)
///   embedding API → MockEmbedder
use std::sync::Arc;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use ragbridge::config::{Config, EmbeddingConfig};
use ragbridge::embed_server::{self, EmbedState};
use ragbridge::embedder::mock::MockEmbedder;
use ragbridge::engine::mock::{MockEngine, Script};
use ragbridge::engine::{Mode, QueryEngine};
use ragbridge::server::{AppState, router};
use serde_json::{Value, json};
use tempfile::tempdir;
use tower::ServiceExt;

// ── Helpers ──────────────────────────────────────────────────────────

fn chat_app(engine: Arc<MockEngine>, config: Config) -> Router {
    let engine: Arc<dyn QueryEngine> = engine;
    router(AppState::new(engine, Arc::new(config)))
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(resp: axum::response::Response) -> String {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(resp: axum::response::Response) -> Value {
    serde_json::from_str(&body_text(resp).await).unwrap()
}

/// Parse every `data:` line of an SSE body as JSON.
fn sse_events(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect()
}

fn chunks_for(events: &[Value], mode: &str) -> String {
    events
        .iter()
        .filter(|e| e["type"] == "chunk" && e["mode"] == mode)
        .map(|e| e["content"].as_str().unwrap())
        .collect()
}

fn multipart_upload(filename: &str, content: &[u8]) -> Request<Body> {
    let boundary = "ragbridgeboundary";
    let mut body = Vec::new();
    body.extend_from_slice(
        format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/api/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={boundary}"),
        )
        .body(Body::from(body))
        .unwrap()
}

// ── Chat: streaming ──────────────────────────────────────────────────

#[tokio::test]
async fn test_comparison_stream_scenario() {
    let engine = Arc::new(
        MockEngine::new()
            .with_script(Mode::Naive, Script::pieces(["The ", "limit is 60"]))
            .with_script(Mode::Hybrid, Script::Value("60 km/h".to_string())),
    );
    let app = chat_app(Arc::clone(&engine), Config::default());

    let resp = app
        .oneshot(post_json(
            "/api/chat",
            json!({ "message": "What is the speed limit?", "stream": true, "comparison_mode": true }),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let headers = resp.headers();
    assert!(
        headers[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );
    assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
    assert_eq!(headers["x-accel-buffering"], "no");

    let events = sse_events(&body_text(resp).await);

    let starts: Vec<&Value> = events.iter().filter(|e| e["type"] == "start").collect();
    assert_eq!(starts.len(), 2);
    assert_eq!(chunks_for(&events, "naive"), "The limit is 60");
    assert_eq!(chunks_for(&events, "hybrid"), "60 km/h");
    assert!(events.iter().all(|e| e["type"] != "error"));

    let last = events.last().unwrap();
    assert_eq!(last, &json!({ "type": "done" }));
    assert_eq!(events.iter().filter(|e| e["type"] == "done").count(), 1);

    // Both modes were asked as streams with the answer instruction appended.
    let queries = engine.queries();
    assert_eq!(queries.len(), 2);
    for q in &queries {
        assert!(q.stream);
        assert!(q.text.starts_with("What is the speed limit?\n\n"));
    }
}

#[tokio::test]
async fn test_single_stream_events_in_order() {
    let engine = Arc::new(
        MockEngine::new().with_script(Mode::Hybrid, Script::pieces(["Xin ", "chào", "!"])),
    );
    let app = chat_app(Arc::clone(&engine), Config::default());

    let resp = app
        .oneshot(post_json(
            "/api/chat",
            json!({ "message": "hello", "stream": true }),
        ))
        .await
        .unwrap();
    let events = sse_events(&body_text(resp).await);

    assert_eq!(
        events,
        vec![
            json!({ "type": "start", "mode": "hybrid" }),
            json!({ "type": "chunk", "mode": "hybrid", "content": "Xin " }),
            json!({ "type": "chunk", "mode": "hybrid", "content": "chào" }),
            json!({ "type": "chunk", "mode": "hybrid", "content": "!" }),
            json!({ "type": "done" }),
        ]
    );
    assert_eq!(engine.queries()[0].mode, Mode::Hybrid);
}

#[tokio::test]
async fn test_comparison_stream_with_failing_mode() {
    let engine = Arc::new(
        MockEngine::new()
            .with_script(Mode::Naive, Script::Fail("index not ready".to_string()))
            .with_script(Mode::Hybrid, Script::pieces(["a", "b", "c"])),
    );
    let app = chat_app(engine, Config::default());

    let resp = app
        .oneshot(post_json(
            "/api/chat",
            json!({ "message": "q", "stream": true, "comparison_mode": true }),
        ))
        .await
        .unwrap();
    let events = sse_events(&body_text(resp).await);

    let naive_error = events
        .iter()
        .find(|e| e["type"] == "error")
        .expect("naive failure should be reported");
    assert_eq!(naive_error["mode"], "naive");
    assert!(
        naive_error["message"]
            .as_str()
            .unwrap()
            .contains("index not ready")
    );
    assert_eq!(chunks_for(&events, "hybrid"), "abc");
    assert_eq!(events.last().unwrap()["type"], "done");
}

#[tokio::test]
async fn test_history_forwarded_to_engine() {
    let engine = Arc::new(MockEngine::new());
    let app = chat_app(Arc::clone(&engine), Config::default());

    let resp = app
        .oneshot(post_json(
            "/api/chat",
            json!({
                "message": "and the second?",
                "history": [
                    { "role": "user", "content": "first question" },
                    { "role": "assistant", "content": "first answer" }
                ]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let queries = engine.queries();
    assert_eq!(queries[0].history.len(), 2);
    assert_eq!(queries[0].history[1].content, "first answer");
}

// ── Chat: JSON ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_chat_json_single_mode() {
    let engine = Arc::new(
        MockEngine::new().with_script(Mode::Hybrid, Script::pieces(["60 ", "km/h"])),
    );
    let app = chat_app(engine, Config::default());

    let resp = app
        .oneshot(post_json("/api/chat", json!({ "message": "limit?" })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        body_json(resp).await,
        json!({ "response": "60 km/h", "mode": "hybrid", "sources": [] })
    );
}

#[tokio::test]
async fn test_chat_json_comparison() {
    let engine = Arc::new(
        MockEngine::new()
            .with_script(Mode::Naive, Script::Value("naive answer".to_string()))
            .with_script(Mode::Hybrid, Script::Value("hybrid answer".to_string())),
    );
    let app = chat_app(engine, Config::default());

    let resp = app
        .oneshot(post_json(
            "/api/chat",
            json!({ "message": "q", "comparison_mode": true }),
        ))
        .await
        .unwrap();
    let body = body_json(resp).await;

    assert_eq!(body["naive"]["response"], "naive answer");
    assert_eq!(body["naive"]["mode"], "naive");
    assert_eq!(body["hybrid"]["response"], "hybrid answer");
    assert_eq!(body["hybrid"]["mode"], "hybrid");
}

#[tokio::test]
async fn test_chat_json_engine_failure() {
    let engine = Arc::new(
        MockEngine::new().with_script(Mode::Hybrid, Script::Fail("llm down".to_string())),
    );
    let app = chat_app(engine, Config::default());

    let resp = app
        .oneshot(post_json("/api/chat", json!({ "message": "q" })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(resp).await;
    assert!(body["detail"].as_str().unwrap().contains("llm down"));
}

#[tokio::test]
async fn test_chat_empty_message_rejected() {
    let engine = Arc::new(MockEngine::new());
    let app = chat_app(Arc::clone(&engine), Config::default());

    let resp = app
        .oneshot(post_json("/api/chat", json!({ "message": "   " })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(resp).await["detail"].is_string());
    assert!(engine.queries().is_empty());
}

// ── Upload & documents ───────────────────────────────────────────────

fn upload_config(dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.upload.working_dir = dir.join("uploads").to_string_lossy().into_owned();
    config
}

#[tokio::test]
async fn test_upload_txt_then_list_documents() {
    let dir = tempdir().unwrap();
    let engine = Arc::new(MockEngine::new());
    let app = chat_app(Arc::clone(&engine), upload_config(dir.path()));

    let content = "Tốc độ tối đa trong khu dân cư là 60 km/h.";
    let resp = app
        .clone()
        .oneshot(multipart_upload("../../luat.txt", content.as_bytes()))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["filename"], "luat.txt");
    assert_eq!(body["status"], "success");
    assert_eq!(
        body["message"],
        format!(
            "File uploaded and indexed ({} characters)",
            content.chars().count()
        )
    );

    // Saved under the working dir using only the final path component.
    let saved = dir.path().join("uploads").join("luat.txt");
    assert_eq!(std::fs::read_to_string(saved).unwrap(), content);
    assert_eq!(
        engine.inserted(),
        vec![("luat.txt".to_string(), content.to_string())]
    );

    let resp = app.oneshot(get("/api/documents")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let docs = body_json(resp).await;
    assert_eq!(docs.as_array().unwrap().len(), 1);
    assert_eq!(docs[0]["source"], "luat.txt");
    assert_eq!(docs[0]["status"], "processed");
}

#[tokio::test]
async fn test_upload_unsupported_type() {
    let dir = tempdir().unwrap();
    let engine = Arc::new(MockEngine::new());
    let app = chat_app(Arc::clone(&engine), upload_config(dir.path()));

    let resp = app
        .oneshot(multipart_upload("slides.pptx", b"binary"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(resp).await["detail"],
        "Only PDF and TXT files are supported"
    );
    assert!(engine.inserted().is_empty());
}

#[tokio::test]
async fn test_upload_index_failure_reported() {
    let dir = tempdir().unwrap();
    let engine = Arc::new(MockEngine::new().failing_inserts());
    let app = chat_app(engine, upload_config(dir.path()));

    let resp = app
        .oneshot(multipart_upload("notes.txt", b"some text"))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "error");
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .starts_with("Failed to index file:")
    );
}

#[tokio::test]
async fn test_upload_empty_file_reported() {
    let dir = tempdir().unwrap();
    let engine = Arc::new(MockEngine::new());
    let app = chat_app(Arc::clone(&engine), upload_config(dir.path()));

    let resp = app
        .oneshot(multipart_upload("empty.txt", b"   \n"))
        .await
        .unwrap();

    let body = body_json(resp).await;
    assert_eq!(body["status"], "error");
    assert!(engine.inserted().is_empty());
}

#[tokio::test]
async fn test_chat_health() {
    let app = chat_app(Arc::new(MockEngine::new()), Config::default());

    let resp = app.oneshot(get("/api/health")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await, json!({ "status": "healthy" }));
}

// ── Embedding API ────────────────────────────────────────────────────

fn embed_app(config: EmbeddingConfig) -> Router {
    let dims = config.dimensions;
    embed_server::router(EmbedState::new(
        Arc::new(MockEmbedder::new(dims)),
        config,
        "cpu",
    ))
}

#[tokio::test]
async fn test_embeddings_batch_with_nulls() {
    let mut config = EmbeddingConfig::default();
    config.max_batch = 2;
    let app = embed_app(config);

    let resp = app
        .oneshot(post_json(
            "/v1/embeddings",
            json!({ "input": ["xin chào", null, "", "tạm biệt", "   "] }),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["object"], "list");
    assert_eq!(body["model"], "vi-embed");

    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 5);
    for (i, item) in data.iter().enumerate() {
        assert_eq!(item["object"], "embedding");
        assert_eq!(item["index"], i);
        assert_eq!(item["embedding"].as_array().unwrap().len(), 384);
    }
    // Null, empty and blank inputs are all embedded as a single space.
    assert_eq!(data[1]["embedding"], data[2]["embedding"]);
    assert_eq!(data[1]["embedding"], data[4]["embedding"]);
    assert!(body["usage"]["prompt_tokens"].as_u64().unwrap() > 0);
    assert_eq!(body["usage"]["prompt_tokens"], body["usage"]["total_tokens"]);
}

#[tokio::test]
async fn test_embeddings_single_string_and_model_echo() {
    let config = EmbeddingConfig::default();
    let model_id = config.model_id.clone();
    let app = embed_app(config);

    let resp = app
        .oneshot(post_json(
            "/v1/embeddings",
            json!({ "model": model_id, "input": "một câu" }),
        ))
        .await
        .unwrap();

    let body = body_json(resp).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["model"], model_id);
}

#[tokio::test]
async fn test_embeddings_unknown_model_rejected() {
    let app = embed_app(EmbeddingConfig::default());

    let resp = app
        .oneshot(post_json(
            "/v1/embeddings",
            json!({ "model": "text-embedding-3-large", "input": "x" }),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert!(
        body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("text-embedding-3-large")
    );
}

#[tokio::test]
async fn test_embeddings_non_string_items() {
    let app = embed_app(EmbeddingConfig::default());

    let resp = app
        .clone()
        .oneshot(post_json("/v1/embeddings", json!({ "input": ["a", 5, "5"] })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 3);
    // A number is embedded as its text.
    assert_eq!(data[1]["embedding"], data[2]["embedding"]);

    let resp = app
        .oneshot(post_json("/v1/embeddings", json!({ "input": 42 })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_embeddings_malformed_body_uses_error_shape() {
    let app = embed_app(EmbeddingConfig::default());

    let resp = app
        .clone()
        .oneshot(post_json("/v1/embeddings", json!({ "model": "vi-embed" })))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert!(body["error"]["message"].as_str().unwrap().contains("input"));

    let req = Request::builder()
        .method("POST")
        .uri("/v1/embeddings")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_embed_health_and_models() {
    let app = embed_app(EmbeddingConfig::default());

    let resp = app.clone().oneshot(get("/health")).await.unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(
        body["model_id"],
        "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2"
    );
    assert_eq!(body["device"], "auto");
    assert_eq!(body["runtime_device"], "cpu");

    let resp = app.oneshot(get("/v1/models")).await.unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["data"][0]["id"], "vi-embed");
    assert_eq!(body["data"][0]["owned_by"], "local");
}

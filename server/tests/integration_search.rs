use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use webrank_core::rank::RankConfig;
use webrank_core::semantic::Embedder;
use webrank_pipeline::{run_build, BuildConfig};
use webrank_server::build_app;

fn build_index_with(dir: &Path, embedder: Option<&dyn Embedder>) -> std::path::PathBuf {
    let corpus = dir.join("crawl.jsonl");
    let lines = [
        r#"{"id": 1, "title": "Cats and dogs", "body": "cat dog", "url": "http://a", "summary": "Both kinds of pet."}"#,
        r#"{"id": 2, "title": "Cats", "body": "cat", "url": "http://b", "summary": "Only cats."}"#,
        r#"{"id": 3, "title": "Dogs", "body": "dog dog", "url": "http://c", "summary": "Only dogs."}"#,
    ];
    fs::write(&corpus, lines.join("\n")).unwrap();

    let output = dir.join("index");
    let pagerank = dir.join("pagerank.out");
    fs::write(&pagerank, "1,0.5\n2,0.3\n3,0.2\n").unwrap();
    run_build(
        &BuildConfig {
            input: corpus,
            output: output.clone(),
            num_shards: 2,
            pagerank: Some(pagerank),
        },
        embedder,
    )
    .unwrap();
    output
}

fn build_index(dir: &Path) -> std::path::PathBuf {
    build_index_with(dir, None)
}

struct StubEmbedder;

impl Embedder for StubEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let t = text.to_lowercase();
        Ok(vec![
            t.matches("cat").count() as f32,
            t.matches("dog").count() as f32,
            0.1,
        ])
    }

    fn dimension(&self) -> usize {
        3
    }
}

/// Stands in for a model whose inference outlives the serving deadline.
struct SlowEmbedder;

impl Embedder for SlowEmbedder {
    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        std::thread::sleep(Duration::from_millis(250));
        Ok(vec![1.0, 0.0, 0.1])
    }

    fn dimension(&self) -> usize {
        3
    }
}

fn app_for(index: &Path) -> Router {
    build_app(
        index.to_path_buf(),
        None,
        RankConfig::default(),
        Duration::from_millis(500),
    )
    .unwrap()
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let resp = app
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn hits_are_ranked_and_decorated() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(dir.path());

    let (status, json) = get_json(app_for(&index), "/api/v1/hits/?q=cat&w=0").await;
    assert_eq!(status, StatusCode::OK);
    let hits = json["hits"].as_array().unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0]["doc_id"], 2);
    assert_eq!(hits[0]["title"], "Cats");
    assert_eq!(hits[0]["url"], "http://b");
    assert_eq!(hits[1]["doc_id"], 1);
    assert_eq!(hits[1]["summary"], "Both kinds of pet.");
    assert_eq!(json["search_mode"], "traditional");
}

#[tokio::test]
async fn pagerank_weight_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(dir.path());

    // At w=1 scoring is pure authority; doc 1 has the highest PageRank
    // among the lexical candidates for "cat".
    let (_, json) = get_json(app_for(&index), "/api/v1/hits/?q=cat&w=1").await;
    let hits = json["hits"].as_array().unwrap();
    assert_eq!(hits[0]["doc_id"], 1);
}

#[tokio::test]
async fn semantic_request_degrades_to_traditional() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(dir.path());

    let (status, json) = get_json(app_for(&index), "/api/v1/hits/?q=cat&w=0&mode=hybrid").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["search_mode"], "traditional");
    assert_eq!(json["semantic_available"], false);
    // Same result set as an explicit traditional request
    let (_, trad) = get_json(app_for(&index), "/api/v1/hits/?q=cat&w=0").await;
    assert_eq!(json["hits"], trad["hits"]);
}

#[tokio::test]
async fn semantic_deadline_expiry_degrades_to_traditional() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index_with(dir.path(), Some(&StubEmbedder));

    // Query-side embedding takes 250ms against a 20ms budget; the request
    // must come back answered traditionally, not blocked or failed.
    let slow = build_app(
        index.clone(),
        Some(Arc::new(SlowEmbedder)),
        RankConfig::default(),
        Duration::from_millis(20),
    )
    .unwrap();
    let (status, json) = get_json(slow, "/api/v1/hits/?q=cat&w=0&mode=semantic").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["search_mode"], "traditional");
    // The capability is present; only this request degraded.
    assert_eq!(json["semantic_available"], true);

    let (_, trad) = get_json(app_for(&index), "/api/v1/hits/?q=cat&w=0").await;
    assert_eq!(json["hits"], trad["hits"]);
}

#[tokio::test]
async fn empty_and_unknown_queries_return_empty_hits() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(dir.path());

    let (status, json) = get_json(app_for(&index), "/api/v1/hits/?q=").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["hits"].as_array().unwrap().len(), 0);

    let (_, json) = get_json(app_for(&index), "/api/v1/hits/?q=zyzzyva").await;
    assert_eq!(json["hits"].as_array().unwrap().len(), 0);

    // only stopwords
    let (_, json) = get_json(app_for(&index), "/api/v1/hits/?q=the+and+of").await;
    assert_eq!(json["hits"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn malformed_weight_falls_back_to_default() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(dir.path());
    let (status, json) = get_json(app_for(&index), "/api/v1/hits/?q=cat&w=banana").await;
    assert_eq!(status, StatusCode::OK);
    assert!(!json["hits"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn services_listing() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(dir.path());
    let (status, json) = get_json(app_for(&index), "/api/v1/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["hits"], "/api/v1/hits/");
}

#[tokio::test]
async fn reload_requires_admin_token() {
    let dir = tempfile::tempdir().unwrap();
    let index = build_index(dir.path());
    let app = app_for(&index);
    let resp = app
        .oneshot(
            Request::post("/api/v1/reload/")
                .header("X-ADMIN-TOKEN", "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[test]
fn missing_index_is_a_fatal_startup_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = build_app(
        dir.path().join("no_such_index"),
        None,
        RankConfig::default(),
        Duration::from_millis(500),
    )
    .unwrap_err();
    assert!(err.to_string().contains("build the index first"));
}

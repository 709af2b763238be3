use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use marquee_core::embedding::HashingEmbedder;
use marquee_core::SearchConfig;
use marquee_server::{build_app, build_engine, EngineOptions};
use serde_json::Value;
use std::fs;
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn tiny_app() -> (TempDir, Router) {
    let dir = tempdir().unwrap();
    let docs = dir.path().join("movies.json");
    fs::write(
        &docs,
        r#"{"movies": [
            {"id": 11, "title": "Toy Story", "description": "A cowboy doll is a boy's toy. The toys come alive."},
            {"id": 4, "title": "Shrek", "description": "An ogre lives in a swamp. A donkey talks too much."},
            {"id": 30, "title": "Jaws", "description": "A shark terrorizes a beach town."}
        ]}"#,
    )
    .unwrap();
    let opts = EngineOptions {
        documents: docs,
        stopwords: None,
        config: SearchConfig { cache_dir: dir.path().join("cache"), ..SearchConfig::default() },
        embedding_url: None,
        embedding_model: "hashing".into(),
        dimension: HashingEmbedder::DEFAULT_DIMENSION,
    };
    let engine = build_engine(&opts).unwrap();
    (dir, build_app(Arc::new(engine)))
}

async fn call(app: Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::get(uri).body(Body::empty()).unwrap();
    let resp = tower::ServiceExt::oneshot(app, req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn bm25_search_returns_ranked_results() {
    let (_dir, app) = tiny_app();
    let (status, json) = call(app, "/search?q=doll&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    let arr = json["results"].as_array().unwrap();
    assert_eq!(arr.len(), 2);
    assert_eq!(arr[0]["doc_id"].as_u64().unwrap(), 11);
    assert_eq!(json["total_hits"].as_u64().unwrap(), 2);
}

#[tokio::test]
async fn rrf_search_reports_component_ranks() {
    let (_dir, app) = tiny_app();
    let (status, json) = call(app, "/search/rrf?q=shark%20beach&limit=3").await;
    assert_eq!(status, StatusCode::OK);
    let top = &json["results"][0];
    assert_eq!(top["doc_id"].as_u64().unwrap(), 30);
    assert_eq!(top["bm25_rank"].as_u64().unwrap(), 1);
    assert!(top["rrf_score"].as_f64().unwrap() > 0.0);
}

#[tokio::test]
async fn weighted_search_validates_alpha() {
    let (_dir, app) = tiny_app();
    let (status, _) = call(app.clone(), "/search/weighted?q=ogre&alpha=1.5").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, json) = call(app, "/search/weighted?q=ogre%20swamp&alpha=0.7&limit=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["results"][0]["doc_id"].as_u64().unwrap(), 4);
}

#[tokio::test]
async fn blank_semantic_query_is_bad_request() {
    let (_dir, app) = tiny_app();
    let (status, _) = call(app, "/search/semantic?q=%20").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn doc_lookup_by_id() {
    let (_dir, app) = tiny_app();
    let (status, json) = call(app.clone(), "/doc/4").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["title"], "Shrek");
    let (status, _) = call(app, "/doc/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

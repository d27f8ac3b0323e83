mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{
    marked_page, orientation, quadrant_image, test_config, wait_for_entry, QuadrantEmbedder,
    Reply, ScriptedEngine, DIMENSIONS,
};
use kadr::api::{create_router, AppState};
use kadr::catalog::OmdbClient;
use kadr::config::CatalogConfig;
use kadr::index::{InMemoryIndex, VectorIndex};
use kadr::models::Script;
use kadr::pipeline::RecognitionPipeline;

struct TestApp {
    addr: SocketAddr,
    index: Arc<InMemoryIndex>,
    client: reqwest::Client,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("http://{}/api/v1{}", self.addr, path)
    }
}

fn engine() -> ScriptedEngine {
    ScriptedEngine::new(
        &["eng", "rus"],
        orientation(&[(Script::Latin, 0.9), (Script::Cyrillic, 0.1)], 0.95),
    )
    .reply("eng", true, Reply::Text("The Matrix\nWarner Bros", 93.0))
}

async fn setup_test_app(catalog_url: Option<String>) -> TestApp {
    let config = test_config();
    let index = Arc::new(InMemoryIndex::new(DIMENSIONS));
    let pipeline = RecognitionPipeline::new(
        &config,
        Arc::new(engine()),
        Arc::new(QuadrantEmbedder::new()),
        index.clone(),
    );
    let catalog = catalog_url.map(|base_url| {
        OmdbClient::new(&CatalogConfig {
            api_key: "test-key".to_string(),
            base_url,
            timeout_secs: 5,
        })
        .expect("catalog client")
    });

    let state = AppState::new(config, pipeline, catalog, CancellationToken::new());
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("server");
    });

    TestApp {
        addr,
        index,
        client: reqwest::Client::new(),
    }
}

#[tokio::test]
async fn recognize_returns_result_envelope() {
    let app = setup_test_app(None).await;

    let response = app
        .client
        .post(app.url("/recognize"))
        .body(marked_page(false))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert!(body.get("error").is_none());
    assert_eq!(body["data"]["outcome"]["kind"], "accepted");
    assert_eq!(body["data"]["attempts"][0]["text"], "The Matrix\nWarner Bros");
    assert_eq!(body["data"]["attempts"][0]["status"], "completed");
}

#[tokio::test]
async fn recognize_with_document_id_indexes_in_background() {
    let app = setup_test_app(None).await;

    let response = app
        .client
        .post(app.url("/recognize?documentId=poster-7"))
        .body(quadrant_image(0))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["documentId"], "poster-7");
    assert!(wait_for_entry(&app.index, "poster-7").await.is_some());
}

#[tokio::test]
async fn index_then_search_by_image() {
    let app = setup_test_app(None).await;

    for (id, quadrant) in [("a", 0), ("b", 3)] {
        let response = app
            .client
            .put(app.url(&format!("/index/{id}")))
            .body(quadrant_image(quadrant))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 202);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["data"]["documentId"], id);
    }
    assert!(wait_for_entry(&app.index, "a").await.is_some());
    assert!(wait_for_entry(&app.index, "b").await.is_some());

    let response = app
        .client
        .post(app.url("/search:image?k=1"))
        .body(quadrant_image(3))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["hits"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["hits"][0]["documentId"], "b");
}

#[tokio::test]
async fn search_by_text() {
    let app = setup_test_app(None).await;
    app.client
        .put(app.url("/index/left"))
        .body(quadrant_image(0))
        .send()
        .await
        .unwrap();
    app.client
        .put(app.url("/index/right"))
        .body(quadrant_image(3))
        .send()
        .await
        .unwrap();
    assert!(wait_for_entry(&app.index, "left").await.is_some());
    assert!(wait_for_entry(&app.index, "right").await.is_some());

    let response = app
        .client
        .post(app.url("/search"))
        .json(&json!({"text": "bottom right", "k": 2}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["hits"][0]["documentId"], "right");
    assert_eq!(body["data"]["hits"][1]["documentId"], "left");
}

#[tokio::test]
async fn index_rejects_unreadable_image() {
    let app = setup_test_app(None).await;

    let response = app
        .client
        .put(app.url("/index/broken"))
        .body("plain text")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 422);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unreadable_image");
    assert!(app.index.is_empty().await);
}

#[tokio::test]
async fn identify_looks_up_first_line() {
    let catalog = MockServer::start().await;
    Mock::given(method("GET"))
        .and(query_param("t", "The Matrix"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "Title": "The Matrix",
            "Year": "1999",
            "Plot": "A hacker learns the truth.",
            "imdbRating": "8.7",
            "Poster": "N/A",
            "Type": "movie",
            "imdbID": "tt0133093",
            "Response": "True"
        })))
        .expect(1)
        .mount(&catalog)
        .await;

    let app = setup_test_app(Some(catalog.uri())).await;

    let response = app
        .client
        .post(app.url("/identify"))
        .body(marked_page(false))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["queries"][0], "The Matrix");
    assert_eq!(body["data"]["media"]["title"], "The Matrix");
    assert_eq!(body["data"]["media"]["mediaType"], "Movie");
    assert!(body["data"]["media"]["poster"].is_null());
}

#[tokio::test]
async fn identify_without_match_returns_null_media() {
    let catalog = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"Response": "False", "Error": "Movie not found!"})),
        )
        .mount(&catalog)
        .await;

    let app = setup_test_app(Some(catalog.uri())).await;

    let response = app
        .client
        .post(app.url("/identify"))
        .body(marked_page(false))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.unwrap();
    assert!(body["data"]["media"].is_null());
    assert_eq!(body["data"]["recognition"]["outcome"]["kind"], "accepted");
}

#[tokio::test]
async fn health_lists_installed_languages() {
    let app = setup_test_app(None).await;

    let body: Value = app
        .client
        .get(app.url("/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["pipeline"]["engine"], "scripted");
    assert_eq!(
        body["data"]["pipeline"]["installedLanguages"],
        json!(["eng", "rus"])
    );
    assert_eq!(body["data"]["pipeline"]["embeddingsAvailable"], true);
}

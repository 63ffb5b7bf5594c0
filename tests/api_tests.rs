//! HTTP-level tests for the media routes and the image proxy
//!
//! The router is driven with `oneshot`. The database pool is lazy; only the
//! readiness check ever reaches for a connection.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode, header};
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tower::ServiceExt;

use common::{MemoryCatalog, MemoryStore, importer, spawn_image_host};
use loadout::AppState;
use loadout::api;
use loadout::api::image_proxy::{self, RedirectDecision};
use loadout::config::Config;
use loadout::db::Database;

fn test_config(admin_enabled: bool) -> Config {
    Config {
        port: 0,
        database_url: "postgres://localhost/loadout_test".to_string(),
        database_max_connections: 1,
        supabase_url: "https://project.supabase.test".to_string(),
        supabase_service_key: "service-key".to_string(),
        site_url: None,
        admin_enabled,
        media_bucket: "media".to_string(),
        proxy_allowed_hosts: vec!["www.bungie.net".to_string()],
        import_fetch_timeout: Duration::from_secs(5),
        run_migrations: false,
    }
}

fn test_app(admin_enabled: bool) -> (Router, Arc<MemoryStore>) {
    app_with_config(test_config(admin_enabled))
}

fn app_with_config(config: Config) -> (Router, Arc<MemoryStore>) {
    let db = Database::connect_lazy(&config.database_url, 1).expect("lazy pool");
    let store = Arc::new(MemoryStore::default());
    let catalog = Arc::new(MemoryCatalog::default());

    let http_client = image_proxy::proxy_client(&config.proxy_allowed_hosts, Duration::from_secs(5))
        .expect("proxy client");
    let state = AppState {
        config: Arc::new(config),
        db,
        importer: Arc::new(importer(store.clone(), catalog)),
        http_client,
    };

    (api::app(state), store)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_healthz() {
    let (app, _) = test_app(false);
    let (status, body) = send(app, get("/healthz")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_readyz_is_unavailable_without_database() {
    let config = Config {
        database_url: "postgres://loadout@127.0.0.1:1/none".to_string(),
        ..test_config(false)
    };
    let (app, _) = app_with_config(config);
    let (status, body) = send(app, get("/readyz")).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["ready"], false);
    assert_eq!(body["database"], false);
}

// ============================================================================
// Image proxy
// ============================================================================

#[tokio::test]
async fn test_proxy_client_refuses_redirect_off_the_rules() {
    let (addr, host) = spawn_image_host().await;
    let client = image_proxy::proxy_client(&["127.0.0.1".to_string()], Duration::from_secs(5))
        .unwrap();

    // the hop lands on plain http, which the proxy never fetches
    let response = client
        .get(format!("http://{addr}/redirect"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(host.hits.load(Ordering::SeqCst), 1);

    let target = url::Url::parse(&format!("http://{addr}/redirect")).unwrap();
    let err = image_proxy::relay_upstream(&target, response).unwrap_err();
    assert_eq!(err.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_default_client_would_follow_the_same_redirect() {
    let (addr, host) = spawn_image_host().await;

    let response = reqwest::get(format!("http://{addr}/redirect")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(host.hits.load(Ordering::SeqCst), 2);
    assert_eq!(
        image_proxy::redirect_decision(response.url(), 1, &["127.0.0.1".to_string()]),
        RedirectDecision::Stop
    );
}

#[tokio::test]
async fn test_proxy_requires_url() {
    let (app, _) = test_app(false);
    let (status, body) = send(app, get("/api/img")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("url"));
}

#[tokio::test]
async fn test_proxy_rejects_plain_http() {
    let (app, _) = test_app(false);
    let (status, _) = send(
        app,
        get("/api/img?url=http%3A%2F%2Fwww.bungie.net%2Fcommon%2Fa.png"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_proxy_rejects_unlisted_host_without_fetching() {
    let (addr, host) = spawn_image_host().await;
    let (app, _) = test_app(false);

    let target = format!("https://{addr}/a.png");
    let uri = format!("/api/img?url={}", url_encode(&target));
    let (status, body) = send(app, get(&uri)).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("127.0.0.1"));
    assert_eq!(host.hits.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_proxy_rejects_lookalike_host() {
    let (app, _) = test_app(false);
    let target = "https://www.bungie.net.evil.test/a.png";
    let uri = format!("/api/img?url={}", url_encode(target));
    let (status, _) = send(app, get(&uri)).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

fn url_encode(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

// ============================================================================
// Media import
// ============================================================================

#[tokio::test]
async fn test_import_is_forbidden_when_admin_disabled() {
    let (addr, host) = spawn_image_host().await;
    let (app, store) = test_app(false);

    let (status, _) = send(
        app,
        post_json(
            "/api/media/import",
            json!({ "url": format!("http://{addr}/a.png"), "kind": "weapon" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(host.hits.load(Ordering::SeqCst), 0);
    assert_eq!(store.len(), 0);
}

#[tokio::test]
async fn test_import_requires_url_and_kind() {
    let (app, _) = test_app(true);
    let (status, body) = send(
        app.clone(),
        post_json("/api/media/import", json!({ "kind": "weapon" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("url"));

    let (status, _) = send(
        app.clone(),
        post_json("/api/media/import", json!({ "url": "https://www.bungie.net/a.png" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        app,
        post_json(
            "/api/media/import",
            json!({ "url": "https://www.bungie.net/a.png", "kind": "emblem" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_import_rejects_malformed_json() {
    let (app, _) = test_app(true);
    let request = Request::builder()
        .method("POST")
        .uri("/api/media/import")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, _) = send(app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_import_then_reuse() {
    let (addr, _) = spawn_image_host().await;
    let (app, store) = test_app(true);

    let (status, first) = send(
        app.clone(),
        post_json(
            "/api/media/import",
            json!({
                "url": format!("http://{addr}/a.png"),
                "kind": "weapon_image",
                "slugOrId": "fatebringer",
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["reused"], false);
    let path = first["storage_path"].as_str().unwrap();
    assert!(path.starts_with("weapons/fatebringer/"));
    assert_eq!(
        first["publicUrl"],
        format!("https://storage.test/media/{path}")
    );

    let (status, second) = send(
        app,
        post_json(
            "/api/media/import",
            json!({ "url": format!("http://{addr}/mirror/a-copy.png"), "kind": "weapon" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["reused"], true);
    assert_eq!(second["id"], first["id"]);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_import_error_statuses() {
    let (addr, _) = spawn_image_host().await;
    let (app, store) = test_app(true);

    let cases = [
        ("page.html", StatusCode::UNSUPPORTED_MEDIA_TYPE),
        ("huge.png", StatusCode::PAYLOAD_TOO_LARGE),
        ("missing.png", StatusCode::BAD_GATEWAY),
    ];

    for (file, expected) in cases {
        let (status, body) = send(
            app.clone(),
            post_json(
                "/api/media/import",
                json!({ "url": format!("http://{addr}/{file}"), "kind": "perk_main" }),
            ),
        )
        .await;
        assert_eq!(status, expected, "{file}: {body}");
        assert!(body["error"].is_string());
    }

    assert_eq!(store.len(), 0);
}

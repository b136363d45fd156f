use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use cv_backup::api;
use cv_backup_core::storage::named::NamedBackupStore;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

struct Fixture {
    _dir: TempDir,
    app: Router,
    backups: PathBuf,
    legacy: PathBuf,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let backups = dir.path().join("backups");
    let legacy = dir.path().join("cv-backup.json");
    let store = Arc::new(NamedBackupStore::new(backups.clone(), legacy.clone()));
    Fixture {
        app: api::router(store),
        _dir: dir,
        backups,
        legacy,
    }
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
    let (status, _, body) = send_raw(app, method, uri, body).await;
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

async fn send_raw(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<&str>,
) -> (StatusCode, axum::http::HeaderMap, bytes::Bytes) {
    let mut req = Request::builder().method(method).uri(uri);
    if body.is_some() {
        req = req.header("content-type", "application/json");
    }
    let req = req
        .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, bytes)
}

#[tokio::test]
async fn ping_answers_ok() {
    let fx = fixture();
    let (status, body) = send(&fx.app, "GET", "/__backup/ping", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true}));
}

#[tokio::test]
async fn preflight_short_circuits_with_cors_headers() {
    let fx = fixture();
    for uri in ["/__backup/cv", "/__backup/ping", "/__backup/list"] {
        let (status, headers, body) = send_raw(&fx.app, "OPTIONS", uri, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT, "{uri}");
        assert!(body.is_empty());
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
    }

    let (_, headers, _) = send_raw(&fx.app, "GET", "/__backup/ping", None).await;
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
}

#[tokio::test]
async fn missing_backup_is_a_structured_404() {
    let fx = fixture();
    let (status, body) = send(&fx.app, "GET", "/__backup/cv?id=nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["ok"], json!(false));
    assert_eq!(body["error"], json!("not_found"));
    assert!(body["path"].as_str().unwrap().ends_with("nobody.json"));

    let (status, body) = send(&fx.app, "GET", "/__backup/cv", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["path"], json!(fx.legacy.display().to_string()));
}

#[tokio::test]
async fn wrapped_post_is_unwrapped_on_read() {
    let fx = fixture();
    let (status, body) = send(
        &fx.app,
        "POST",
        "/__backup/cv?id=x",
        Some(r#"{"__meta": {"id": "x", "name": "X"}, "data": {"a": 1}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["id"], json!("x"));
    assert_eq!(body["name"], json!("X"));

    let (status, body) = send(&fx.app, "GET", "/__backup/cv?id=x", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"a": 1}));
}

#[tokio::test]
async fn bare_post_is_wrapped_with_query_id() {
    let fx = fixture();
    let (status, body) = send(
        &fx.app,
        "POST",
        "/__backup/cv?id=Summer%20Job",
        Some(r#"{"person": "Ada"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], json!("summer-job"));
    assert_eq!(body["name"], json!("Summer Job"));

    let raw: Value = serde_json::from_str(
        &std::fs::read_to_string(fx.backups.join("summer-job.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(raw["__meta"]["id"], json!("summer-job"));
    assert_eq!(raw["__meta"]["name"], json!("Summer Job"));
    assert!(raw["__meta"]["updatedAt"].is_string());
    assert_eq!(raw["data"], json!({"person": "Ada"}));
}

#[tokio::test]
async fn rename_on_save_leaves_old_file_alone() {
    let fx = fixture();
    send(&fx.app, "POST", "/__backup/cv?id=old", Some(r#"{"v": 1}"#)).await;
    let old_before = std::fs::read(fx.backups.join("old.json")).unwrap();

    let (status, body) = send(
        &fx.app,
        "POST",
        "/__backup/cv?id=old",
        Some(r#"{"__meta": {"id": "new", "name": "New"}, "data": {"v": 2}}"#),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], json!("new"));

    assert_eq!(std::fs::read(fx.backups.join("old.json")).unwrap(), old_before);
    let (_, new_doc) = send(&fx.app, "GET", "/__backup/cv?id=new", None).await;
    assert_eq!(new_doc, json!({"v": 2}));
    let (_, old_doc) = send(&fx.app, "GET", "/__backup/cv?id=old", None).await;
    assert_eq!(old_doc, json!({"v": 1}));
}

#[tokio::test]
async fn malformed_body_is_a_400() {
    let fx = fixture();
    let (status, body) = send(&fx.app, "POST", "/__backup/cv?id=x", Some("{oops")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], json!(false));
    assert_eq!(body["error"], json!("invalid_json"));
    assert!(body["message"].is_string());
    assert!(!fx.backups.join("x.json").exists());

    // the server keeps serving afterwards
    let (status, _) = send(&fx.app, "GET", "/__backup/ping", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn legacy_slot_cannot_be_deleted() {
    let fx = fixture();
    send(&fx.app, "POST", "/__backup/cv", Some(r#"{"legacy": true}"#)).await;
    let before = std::fs::read(&fx.legacy).unwrap();

    for _ in 0..2 {
        let (status, body) = send(&fx.app, "DELETE", "/__backup/cv", None).await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body, json!({"ok": false, "error": "cannot_delete_legacy"}));
    }
    assert_eq!(std::fs::read(&fx.legacy).unwrap(), before);
    let (_, doc) = send(&fx.app, "GET", "/__backup/cv", None).await;
    assert_eq!(doc, json!({"legacy": true}));
}

#[tokio::test]
async fn delete_named_backup() {
    let fx = fixture();
    send(&fx.app, "POST", "/__backup/cv?id=tmp", Some("{}")).await;
    let (status, body) = send(&fx.app, "DELETE", "/__backup/cv?id=tmp", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ok": true, "id": "tmp"}));
    assert!(!fx.backups.join("tmp.json").exists());

    let (status, body) = send(&fx.app, "DELETE", "/__backup/cv?id=never-existed", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));
}

#[tokio::test]
async fn list_returns_named_backups_and_legacy() {
    let fx = fixture();
    send(&fx.app, "POST", "/__backup/cv?id=a", Some(r#"{"n": 1}"#)).await;
    send(&fx.app, "POST", "/__backup/cv?id=b", Some(r#"{"n": 2}"#)).await;
    send(&fx.app, "POST", "/__backup/cv", Some(r#"{"n": 0}"#)).await;

    let (status, body) = send(&fx.app, "GET", "/__backup/list", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 3);
    let ids: Vec<&str> = items.iter().map(|i| i["id"].as_str().unwrap()).collect();
    assert_eq!(ids, ["a", "b", "legacy"]);
    assert!(items.iter().all(|i| i["mtime"].as_i64().unwrap() > 0));
}

#[tokio::test]
async fn unsupported_verbs_get_405_with_allow_header() {
    let fx = fixture();
    let (status, headers, body) = send_raw(&fx.app, "PUT", "/__backup/cv", Some("{}")).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(headers[header::ALLOW], "GET, POST, DELETE, OPTIONS");
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body, json!({"ok": false, "error": "method_not_allowed"}));

    let (status, headers, _) = send_raw(&fx.app, "POST", "/__backup/ping", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(headers[header::ALLOW], "GET, OPTIONS");
}

#[tokio::test]
async fn unparsable_query_is_a_structured_400() {
    let fx = fixture();
    for method in ["GET", "POST", "DELETE"] {
        let body = (method == "POST").then_some("{}");
        let (status, headers, raw) =
            send_raw(&fx.app, method, "/__backup/cv?id=a&id=b", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{method}");
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let body: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(body["ok"], json!(false));
        assert_eq!(body["error"], json!("invalid_query"));
        assert!(body["message"].as_str().unwrap().contains("id"));
    }
    assert!(!fx.backups.exists());
}

#[tokio::test]
async fn legacy_id_addresses_the_legacy_record() {
    let fx = fixture();
    send(&fx.app, "POST", "/__backup/cv?id=legacy", Some(r#"{"n": 1}"#)).await;
    send(&fx.app, "POST", "/__backup/cv", Some(r#"{"n": 2}"#)).await;

    let (_, body) = send(&fx.app, "GET", "/__backup/list", None).await;
    let items = body["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["id"], json!("legacy"));

    let (status, doc) = send(&fx.app, "GET", "/__backup/cv?id=legacy", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(doc, json!({"n": 2}));

    let (status, body) = send(&fx.app, "DELETE", "/__backup/cv?id=legacy", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["error"], json!("cannot_delete_legacy"));
    assert!(fx.legacy.exists());
}

#[tokio::test]
async fn unreadable_backup_is_a_structured_500() {
    let fx = fixture();
    std::fs::create_dir_all(&fx.backups).unwrap();
    std::fs::write(fx.backups.join("bad.json"), "{not json").unwrap();

    let (status, headers, raw) = send_raw(&fx.app, "GET", "/__backup/cv?id=bad", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let body: Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(body["ok"], json!(false));
    assert_eq!(body["error"], json!("internal_error"));
    assert!(body["message"].is_string());

    // listing skips the same file instead of failing
    let (status, body) = send(&fx.app, "GET", "/__backup/list", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"], json!([]));
}

async fn boom() -> &'static str {
    panic!("disk on fire")
}

#[tokio::test]
async fn panicking_handler_is_a_structured_500() {
    let app = Router::new()
        .route("/boom", axum::routing::get(boom))
        .layer(tower_http::catch_panic::CatchPanicLayer::custom(
            api::panic_response,
        ));

    let (status, _, raw) = send_raw(&app, "GET", "/boom", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(
        body,
        json!({"ok": false, "error": "middleware_crash", "message": "disk on fire"})
    );

    // the same service keeps answering
    let (status, _, _) = send_raw(&app, "GET", "/boom", None).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

//! Drive transfer tests against a local directory store and a mock Graph endpoint

use axum::body::Bytes;
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use ratesheet::config::GraphConfig;
use ratesheet::error::RateSheetError;
use ratesheet::transfer::{ensure_master, refresh_master, FileStore, GraphStore, LocalStore, RemotePath};
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// ═══════════════════════════════════════════════════════════════════════════
// MOCK GRAPH SERVER
// ═══════════════════════════════════════════════════════════════════════════

type Files = Arc<Mutex<HashMap<String, Vec<u8>>>>;

const CONTENT_PREFIX: &str = "/v1.0/drives/drive-1/root:/";

fn handle(files: &Files, method: Method, uri: Uri, body: Bytes) -> Response {
    let path = uri.path().to_string();

    if method == Method::POST && path == "/login/tenant-1/oauth2/v2.0/token" {
        let form = String::from_utf8_lossy(&body);
        if form.contains("client_secret=good") && form.contains("grant_type=client_credentials") {
            return Json(json!({ "access_token": "token-1", "token_type": "Bearer" })).into_response();
        }
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "invalid_client", "error_description": "bad secret" })),
        )
            .into_response();
    }
    if method == Method::GET && path == "/v1.0/sites/contoso.sharepoint.com:/sites/Pricing" {
        return Json(json!({ "id": "site-1" })).into_response();
    }
    if method == Method::GET && path == "/v1.0/sites/site-1/drive" {
        return Json(json!({ "id": "drive-1" })).into_response();
    }

    if let Some(item) = path
        .strip_prefix(CONTENT_PREFIX)
        .and_then(|rest| rest.strip_suffix(":/content"))
    {
        let item = urlencoding::decode(item).unwrap().into_owned();
        let item = item.as_str();
        let mut files = files.lock().unwrap();
        if method == Method::GET {
            return match files.get(item) {
                Some(bytes) => bytes.clone().into_response(),
                None => (StatusCode::NOT_FOUND, "itemNotFound").into_response(),
            };
        }
        if method == Method::PUT {
            files.insert(item.to_string(), body.to_vec());
            return (StatusCode::CREATED, Json(json!({ "id": "item-1" }))).into_response();
        }
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    (StatusCode::NOT_FOUND, format!("no route for {} {}", method, path)).into_response()
}

async fn start_mock(files: Files) -> String {
    let app = Router::new().fallback(move |method: Method, uri: Uri, body: Bytes| {
        let files = files.clone();
        async move { handle(&files, method, uri, body) }
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

fn graph_config(base: &str, secret: &str) -> GraphConfig {
    let vars: HashMap<&str, String> = HashMap::from([
        ("TENANT_ID", "tenant-1".to_string()),
        ("CLIENT_ID", "client-1".to_string()),
        ("CLIENT_SECRET", secret.to_string()),
        ("SITE_HOSTNAME", "contoso.sharepoint.com".to_string()),
        ("SITE_PATH", "/Pricing".to_string()),
        ("GRAPH_LOGIN_BASE", format!("{}/login", base)),
        ("GRAPH_API_BASE", format!("{}/v1.0", base)),
    ]);
    GraphConfig::from_lookup(|key| vars.get(key).cloned()).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════
// GRAPH STORE
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_graph_upload_then_download() {
    let files: Files = Arc::default();
    let base = start_mock(files.clone()).await;
    let store = GraphStore::new(graph_config(&base, "good"));
    let work = TempDir::new().unwrap();

    let src = work.path().join("rates.xlsm");
    fs::write(&src, b"matrix bytes").unwrap();
    let remote = RemotePath::new("/Rates/Incoming/", "rates.xlsm");
    store.upload(&src, &remote).await.unwrap();
    assert_eq!(
        files.lock().unwrap().get("Rates/Incoming/rates.xlsm").cloned(),
        Some(b"matrix bytes".to_vec())
    );

    let dest = work.path().join("down/rates.xlsm");
    store.download(&remote, &dest).await.unwrap();
    assert_eq!(fs::read(&dest).unwrap(), b"matrix bytes");
}

#[tokio::test]
async fn test_graph_item_names_are_percent_encoded() {
    let files: Files = Arc::default();
    let base = start_mock(files.clone()).await;
    let store = GraphStore::new(graph_config(&base, "good"));
    let work = TempDir::new().unwrap();

    let src = work.path().join("rates.xlsm");
    fs::write(&src, b"q3 bytes").unwrap();
    let remote = RemotePath::new("Client Pricing", "Q3 #2?.xlsm");
    store.upload(&src, &remote).await.unwrap();
    assert_eq!(
        files.lock().unwrap().get("Client Pricing/Q3 #2?.xlsm").cloned(),
        Some(b"q3 bytes".to_vec())
    );

    let dest = work.path().join("q3.xlsm");
    store.download(&remote, &dest).await.unwrap();
    assert_eq!(fs::read(&dest).unwrap(), b"q3 bytes");
}

#[tokio::test]
async fn test_graph_download_missing_item() {
    let files: Files = Arc::default();
    let base = start_mock(files).await;
    let store = GraphStore::new(graph_config(&base, "good"));
    let work = TempDir::new().unwrap();

    let err = store
        .download(&RemotePath::new("Rates", "missing.xlsx"), &work.path().join("x.xlsx"))
        .await
        .unwrap_err();
    match err {
        RateSheetError::Transfer(msg) => {
            assert!(msg.contains("404"));
            assert!(msg.contains("itemNotFound"));
        }
        other => panic!("expected transfer error, got {:?}", other),
    }
    assert!(!work.path().join("x.xlsx").exists());
}

#[tokio::test]
async fn test_graph_bad_credentials() {
    let files: Files = Arc::default();
    let base = start_mock(files).await;
    let store = GraphStore::new(graph_config(&base, "wrong"));
    let work = TempDir::new().unwrap();

    let err = store
        .download(&RemotePath::new("Rates", "a.xlsx"), &work.path().join("a.xlsx"))
        .await
        .unwrap_err();
    match err {
        RateSheetError::Auth(msg) => {
            assert!(msg.contains("invalid_client"));
            assert!(msg.contains("bad secret"));
        }
        other => panic!("expected auth error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_graph_ensure_master_downloads_once() {
    let files: Files = Arc::default();
    files
        .lock()
        .unwrap()
        .insert("Kilowatt/Pricing/master.xlsx".to_string(), b"v1".to_vec());
    let base = start_mock(files.clone()).await;
    let store = GraphStore::new(graph_config(&base, "good"));
    let work = TempDir::new().unwrap();
    let local = work.path().join("master.xlsx");
    let remote = RemotePath::new("/Kilowatt/Pricing", "master.xlsx");

    ensure_master(&store, &local, &remote).await.unwrap();
    assert_eq!(fs::read(&local).unwrap(), b"v1");

    // A local copy wins over the drive
    files
        .lock()
        .unwrap()
        .insert("Kilowatt/Pricing/master.xlsx".to_string(), b"v2".to_vec());
    ensure_master(&store, &local, &remote).await.unwrap();
    assert_eq!(fs::read(&local).unwrap(), b"v1");
}

// ═══════════════════════════════════════════════════════════════════════════
// LOCAL STORE
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_refresh_master_moves_old_copy_aside() {
    let drive = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    fs::create_dir_all(drive.path().join("Pricing")).unwrap();
    fs::write(drive.path().join("Pricing/master.xlsx"), b"fresh").unwrap();
    fs::write(work.path().join("master.xlsx"), b"stale").unwrap();

    let store = LocalStore::new(drive.path());
    let local = refresh_master(&store, work.path(), &RemotePath::new("Pricing", "master.xlsx"))
        .await
        .unwrap();
    assert_eq!(fs::read(&local).unwrap(), b"fresh");

    let names: Vec<String> = fs::read_dir(work.path())
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names.len(), 2);
    assert!(names.iter().any(|n| n.starts_with("master_") && n.ends_with(".xlsx")));
}

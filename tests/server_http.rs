//! End-to-end tests for the MCP HTTP surface.
//!
//! Each test starts the axum app on a free port with a hashing embedder,
//! then talks to it with `reqwest` the way an MCP client would.

use local_docs_mcp::config::Config;
use local_docs_mcp::embedding::HashingProvider;
use local_docs_mcp::server;
use local_docs_mcp::session::{SessionRouter, SESSION_HEADER};
use local_docs_mcp::store::Store;
use local_docs_mcp::tools::{ToolContext, ToolRegistry};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

const DIMS: usize = 64;

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

/// Start a server; returns its `/mcp` URL. The TempDir must outlive the test.
async fn start_server(tmp: &TempDir) -> String {
    let mut config = Config::minimal(tmp.path().join("data/http.sqlite"));
    config.embedding.provider = "hashing".to_string();
    config.embedding.dims = DIMS;
    config.chunking.chunk_size = 80;
    config.chunking.overlap = 16;

    let store = Store::open(&config).await.unwrap();
    let ctx = ToolContext::new(
        Arc::new(store),
        Arc::new(HashingProvider::new(DIMS)),
        Arc::new(config),
    );
    let router = Arc::new(SessionRouter::new(
        Arc::new(ToolRegistry::with_builtins()),
        Arc::new(ctx),
    ));

    let port = find_free_port();
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap();
    tokio::spawn(server::serve(listener, router));
    wait_for_server(port).await;

    format!("http://127.0.0.1:{}/mcp", port)
}

fn initialize_request(id: i64) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-03-26",
            "capabilities": {},
            "clientInfo": { "name": "it", "version": "1.0" }
        }
    })
}

async fn initialize(client: &reqwest::Client, url: &str) -> String {
    let resp = client
        .post(url)
        .json(&initialize_request(1))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let sid = resp
        .headers()
        .get(SESSION_HEADER)
        .expect("session header")
        .to_str()
        .unwrap()
        .to_string();

    let resp = client
        .post(url)
        .header(SESSION_HEADER, &sid)
        .json(&json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    sid
}

async fn call_tool(
    client: &reqwest::Client,
    url: &str,
    sid: &str,
    id: i64,
    name: &str,
    arguments: Value,
) -> Value {
    let resp = client
        .post(url)
        .header(SESSION_HEADER, sid)
        .json(&json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": { "name": name, "arguments": arguments }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["id"], id);
    body["result"].clone()
}

fn no_valid_session_body() -> Value {
    json!({
        "jsonrpc": "2.0",
        "error": { "code": -32000, "message": "Bad Request: No valid session ID provided" },
        "id": null
    })
}

#[tokio::test]
async fn test_health() {
    let tmp = TempDir::new().unwrap();
    let url = start_server(&tmp).await;
    let health_url = url.replace("/mcp", "/health");

    let body: Value = reqwest::get(&health_url).await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_request_without_session_rejected() {
    let tmp = TempDir::new().unwrap();
    let url = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(&url)
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert!(resp.headers().get(SESSION_HEADER).is_none());
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, no_valid_session_body());
}

#[tokio::test]
async fn test_unknown_session_rejected() {
    let tmp = TempDir::new().unwrap();
    let url = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(&url)
        .header(SESSION_HEADER, "00000000-0000-4000-8000-000000000000")
        .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "ping" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, no_valid_session_body());

    let resp = client
        .get(&url)
        .header(SESSION_HEADER, "00000000-0000-4000-8000-000000000000")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_concurrent_initialize_distinct_sessions() {
    let tmp = TempDir::new().unwrap();
    let url = start_server(&tmp).await;
    let client = reqwest::Client::new();

    let requests = (0..16).map(|i| {
        let client = client.clone();
        let url = url.clone();
        async move {
            let resp = client
                .post(&url)
                .json(&initialize_request(i))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200);
            resp.headers()
                .get(SESSION_HEADER)
                .unwrap()
                .to_str()
                .unwrap()
                .to_string()
        }
    });
    let ids: HashSet<String> = futures::future::join_all(requests)
        .await
        .into_iter()
        .collect();
    assert_eq!(ids.len(), 16);
}

#[tokio::test]
async fn test_index_and_search_over_session() {
    let tmp = TempDir::new().unwrap();
    let docs = tmp.path().join("docs");
    fs::create_dir_all(docs.join("team")).unwrap();
    fs::write(
        docs.join("team/onboarding.md"),
        "Welcome aboard. Your laptop arrives on day one. \
         Request VPN access from the security team before your first standup.",
    )
    .unwrap();
    fs::write(
        docs.join("recipes.txt"),
        "Sourdough needs a mature starter, flour, water and salt. Bake at high heat.",
    )
    .unwrap();

    let url = start_server(&tmp).await;
    let client = reqwest::Client::new();
    let sid = initialize(&client, &url).await;

    let list: Value = client
        .post(&url)
        .header(SESSION_HEADER, &sid)
        .json(&json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["result"]["tools"].as_array().unwrap().len(), 2);

    let result = call_tool(
        &client,
        &url,
        &sid,
        3,
        "index",
        json!({ "path": docs.display().to_string() }),
    )
    .await;
    assert_eq!(result["isError"], false, "{}", result);
    let text = result["content"][0]["text"].as_str().unwrap();
    assert!(text.starts_with("Successfully indexed"));

    let result = call_tool(
        &client,
        &url,
        &sid,
        4,
        "search",
        json!({ "query": "VPN access security team" }),
    )
    .await;
    assert_eq!(result["isError"], false);
    let hits: Value = serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
    let first = &hits[0];
    assert!(first["docId"].as_str().unwrap().ends_with("onboarding.md"));
    let full = first["text"].as_str().unwrap();
    let before = first["before"].as_str().unwrap();
    assert!(full.starts_with(before));
    assert!(full[before.len()..].starts_with(first["match"].as_str().unwrap()));

    // Scoped to a directory that only holds the recipes.
    let scope = format!("{}/recipes", docs.display());
    let result = call_tool(
        &client,
        &url,
        &sid,
        5,
        "search",
        json!({ "query": "VPN access", "path": scope }),
    )
    .await;
    let hits: Value = serde_json::from_str(result["content"][0]["text"].as_str().unwrap()).unwrap();
    for hit in hits.as_array().unwrap() {
        assert!(hit["docId"].as_str().unwrap().starts_with(&scope));
    }
}

#[tokio::test]
async fn test_index_failure_is_tool_error() {
    let tmp = TempDir::new().unwrap();
    let url = start_server(&tmp).await;
    let client = reqwest::Client::new();
    let sid = initialize(&client, &url).await;

    let missing = tmp.path().join("does-not-exist").display().to_string();
    let result = call_tool(&client, &url, &sid, 2, "index", json!({ "path": missing })).await;
    assert_eq!(result["isError"], true);
    let text = result["content"][0]["text"].as_str().unwrap();
    assert!(text.starts_with(&format!("Error indexing {}", missing)));
}

#[tokio::test]
async fn test_delete_session() {
    let tmp = TempDir::new().unwrap();
    let url = start_server(&tmp).await;
    let client = reqwest::Client::new();
    let sid = initialize(&client, &url).await;

    let resp = client
        .delete(&url)
        .header(SESSION_HEADER, &sid)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(&url)
        .header(SESSION_HEADER, &sid)
        .json(&json!({ "jsonrpc": "2.0", "id": 9, "method": "ping" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    let resp = client
        .delete(&url)
        .header(SESSION_HEADER, &sid)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_get_stream_not_offered() {
    let tmp = TempDir::new().unwrap();
    let url = start_server(&tmp).await;
    let client = reqwest::Client::new();
    let sid = initialize(&client, &url).await;

    let resp = client
        .get(&url)
        .header(SESSION_HEADER, &sid)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 405);
}

//! Purpose: In-process mock of the analytics API and an IPFS gateway for integration tests.
//! Exports: `MockServer`, `MockState`, `KNOWN_HASH`, `UNKNOWN_HASH`.
//! Role: Loopback axum server on its own tokio runtime thread; tests use blocking clients.
//! Invariants: Binds 127.0.0.1:0 so parallel tests never collide on ports.
//! Invariants: All recorded state sits behind mutexes and is inspectable from tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{Value, json};

pub const API_KEY: &str = "test-key";
pub const APP_HASHES_QUERY: u64 = 1_610_025;
pub const LATEST_BLOCK_QUERY: u64 = 1_615_490;

pub const KNOWN_HASH: &str = "0x3d876de8fcd70969349c92d731eeb0482fe8667ceca075592b8785081d630b9a";
pub const KNOWN_CID: &str = "zdj7WZa5itUCo3YeTUx5eprSAJadKc9rbTcPzAo3nW2J7GNjB";
pub const UNKNOWN_HASH: &str = "0x1fe7c5555b3f9c14ff7c60d90f8f4f3c45b1c5d8d9c6d3b1a3a6a2f2c4d5e6f7";

#[derive(Clone, Debug)]
struct Execution {
    query_id: u64,
    polls_left: u32,
    final_state: &'static str,
}

#[derive(Default)]
pub struct MockState {
    rows: Mutex<HashMap<u64, Vec<Value>>>,
    failing: Mutex<HashSet<u64>>,
    polls_before_done: Mutex<u32>,
    executions: Mutex<HashMap<String, Execution>>,
    submitted: Mutex<Vec<(u64, Value)>>,
    content: Mutex<HashMap<String, String>>,
    slow: Mutex<HashSet<String>>,
    gateway_hits: Mutex<HashMap<String, usize>>,
}

impl MockState {
    pub fn set_rows(&self, query_id: u64, rows: Vec<Value>) {
        self.rows.lock().expect("rows").insert(query_id, rows);
    }

    pub fn set_latest_block(&self, block: u64) {
        self.set_rows(LATEST_BLOCK_QUERY, vec![json!({ "latest_block": block })]);
    }

    pub fn fail_query(&self, query_id: u64) {
        self.failing.lock().expect("failing").insert(query_id);
    }

    pub fn set_polls_before_done(&self, polls: u32) {
        *self.polls_before_done.lock().expect("polls") = polls;
    }

    /// Serve `body` verbatim for `cid`.
    pub fn set_content(&self, cid: &str, body: &str) {
        self.content
            .lock()
            .expect("content")
            .insert(cid.to_string(), body.to_string());
    }

    /// Stop serving `cid`; later requests get 404.
    pub fn remove_content(&self, cid: &str) {
        self.content.lock().expect("content").remove(cid);
    }

    pub fn make_slow(&self, cid: &str) {
        self.slow.lock().expect("slow").insert(cid.to_string());
    }

    /// `(query_id, query_parameters)` for every execute call, in order.
    pub fn submitted(&self) -> Vec<(u64, Value)> {
        self.submitted.lock().expect("submitted").clone()
    }

    pub fn gateway_hits(&self, cid: &str) -> usize {
        self.gateway_hits
            .lock()
            .expect("hits")
            .get(cid)
            .copied()
            .unwrap_or(0)
    }
}

pub struct MockServer {
    pub base_url: String,
    pub state: Arc<MockState>,
}

impl MockServer {
    pub fn start() -> Self {
        let state = Arc::new(MockState::default());
        let app = router(state.clone());
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                    .await
                    .expect("bind");
                tx.send(listener.local_addr().expect("addr"))
                    .expect("send addr");
                axum::serve(listener, app).await.expect("serve");
            });
        });
        let addr = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("server start");
        Self {
            base_url: format!("http://{addr}"),
            state,
        }
    }
}

fn router(state: Arc<MockState>) -> Router {
    Router::new()
        .route("/api/v1/query/:query_id/execute", post(execute))
        .route("/api/v1/execution/:execution_id/status", get(status))
        .route("/api/v1/execution/:execution_id/results", get(results))
        .route("/ipfs/:cid", get(gateway))
        .with_state(state)
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("x-dune-api-key")
        .and_then(|value| value.to_str().ok())
        == Some(API_KEY)
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "invalid API Key" })),
    )
        .into_response()
}

async fn execute(
    State(state): State<Arc<MockState>>,
    Path(query_id): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let params = body.get("query_parameters").cloned().unwrap_or(Value::Null);
    let execution_id = {
        let mut submitted = state.submitted.lock().expect("submitted");
        submitted.push((query_id, params));
        format!("01EXEC{}", submitted.len())
    };
    let final_state = if state.failing.lock().expect("failing").contains(&query_id) {
        "QUERY_STATE_FAILED"
    } else {
        "QUERY_STATE_COMPLETED"
    };
    let polls_left = *state.polls_before_done.lock().expect("polls");
    state.executions.lock().expect("executions").insert(
        execution_id.clone(),
        Execution {
            query_id,
            polls_left,
            final_state,
        },
    );
    Json(json!({ "execution_id": execution_id, "state": "QUERY_STATE_PENDING" })).into_response()
}

async fn status(
    State(state): State<Arc<MockState>>,
    Path(execution_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let mut executions = state.executions.lock().expect("executions");
    let Some(execution) = executions.get_mut(&execution_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "execution not found" })),
        )
            .into_response();
    };
    let current = if execution.polls_left > 0 {
        execution.polls_left -= 1;
        "QUERY_STATE_EXECUTING"
    } else {
        execution.final_state
    };
    Json(json!({
        "execution_id": execution_id,
        "query_id": execution.query_id,
        "state": current,
    }))
    .into_response()
}

async fn results(
    State(state): State<Arc<MockState>>,
    Path(execution_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    let Some(execution) = state
        .executions
        .lock()
        .expect("executions")
        .get(&execution_id)
        .cloned()
    else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "execution not found" })),
        )
            .into_response();
    };
    let rows = state
        .rows
        .lock()
        .expect("rows")
        .get(&execution.query_id)
        .cloned()
        .unwrap_or_default();
    Json(json!({
        "execution_id": execution_id,
        "query_id": execution.query_id,
        "state": execution.final_state,
        "result": { "rows": rows, "metadata": { "column_names": [] } },
    }))
    .into_response()
}

async fn gateway(State(state): State<Arc<MockState>>, Path(cid): Path<String>) -> Response {
    *state
        .gateway_hits
        .lock()
        .expect("hits")
        .entry(cid.clone())
        .or_default() += 1;
    let slow = state.slow.lock().expect("slow").contains(&cid);
    if slow {
        tokio::time::sleep(Duration::from_millis(1500)).await;
    }
    let body = state.content.lock().expect("content").get(&cid).cloned();
    match body {
        Some(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

#![allow(dead_code)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::toolbox::proxy::API_KEY_HEADER;

/// One request received by a [`StubToolbox`].
#[derive(Clone, Debug)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub api_key: Option<String>,
    pub body: Option<Value>,
}

#[derive(Default)]
struct StubState {
    required_key: Option<String>,
    canned: HashMap<String, (StatusCode, String)>,
    requests: Vec<RecordedRequest>,
    tools: Vec<Value>,
}

#[derive(Clone, Default)]
struct SharedStub(Arc<Mutex<StubState>>);

impl SharedStub {
    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// In-process stand-in for a running toolbox instance, bound to an
/// ephemeral port on 127.0.0.1. It serves `GET /health`,
/// `POST /register_tool` and `POST /list_tools` and records every request.
pub struct StubToolbox {
    addr: SocketAddr,
    state: SharedStub,
    handle: JoinHandle<()>,
}

impl StubToolbox {
    pub async fn spawn() -> Self {
        Self::spawn_with_key(None).await
    }

    /// Requests without `X-API-KEY: <key>` get a 401, as a real toolbox
    /// with auth enabled would answer.
    pub async fn spawn_with_key(required_key: Option<&str>) -> Self {
        let state = SharedStub::default();
        state.lock().required_key = required_key.map(str::to_string);

        let app = Router::new()
            .fallback(handle_request)
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub toolbox");
        let addr = listener.local_addr().expect("stub toolbox address");
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Replies to `path` with `status` and the raw `body` from now on.
    pub fn respond_with(&self, path: &str, status: StatusCode, body: impl Into<String>) {
        self.state
            .lock()
            .canned
            .insert(path.to_string(), (status, body.into()));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }
}

impl Drop for StubToolbox {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle_request(
    State(state): State<SharedStub>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    let api_key = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    let body = serde_json::from_slice::<Value>(&body).ok();

    let mut stub = state.lock();
    stub.requests.push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        api_key: api_key.clone(),
        body: body.clone(),
    });

    if let Some((status, canned)) = stub.canned.get(&path) {
        return (*status, canned.clone()).into_response();
    }
    if stub.required_key.is_some() && stub.required_key != api_key {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Invalid API Key"})),
        )
            .into_response();
    }

    match (method, path.as_str()) {
        (Method::GET, "/health") => Json(json!({"status": "healthy"})).into_response(),
        (Method::POST, "/register_tool") => {
            let tool_url = body
                .as_ref()
                .and_then(|body| body.get("tool_url"))
                .cloned()
                .unwrap_or(Value::Null);
            let routes = body
                .as_ref()
                .and_then(|body| body.get("tool_routes"))
                .cloned()
                .unwrap_or(Value::Null);
            stub.tools
                .push(json!({"tool_url": tool_url, "routes": routes}));
            Json(json!({"status": "registered", "tool_url": tool_url})).into_response()
        }
        (Method::POST, "/list_tools") => Json(json!({"tools": stub.tools.clone()})).into_response(),
        _ => (StatusCode::NOT_FOUND, Json(json!({"detail": "Not Found"}))).into_response(),
    }
}

/// A URL on a port nothing is listening on.
pub async fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind listener for an unused port");
    let addr = listener.local_addr().expect("listener address");
    drop(listener);
    format!("http://{addr}")
}

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use magic_toolbox::toolbox::cluster::InMemoryCluster;
use magic_toolbox::toolbox::k8s::deployment::EnvVar;
use magic_toolbox::toolbox::lifecycle::LifecycleManager;
use magic_toolbox::toolbox::proxy::proxy_client;
use magic_toolbox::toolbox::server::auth::ApiKeyGate;
use magic_toolbox::toolbox::server::{build_router, AppState};
use magic_toolbox::toolbox::template::StaticTemplateProvider;
use magic_toolbox::toolbox::test_support::{unreachable_url, StubToolbox};
use serde_json::{json, Value};
use tower::ServiceExt;

const MASTER_KEY: &str = "master";

fn app(gate: ApiKeyGate) -> (Router, InMemoryCluster) {
    let cluster = InMemoryCluster::new();
    let lifecycle = LifecycleManager::new(
        Arc::new(StaticTemplateProvider::builtin()),
        Arc::new(cluster.clone()),
    );
    let state = AppState::new(
        lifecycle,
        proxy_client(Duration::from_secs(5)).expect("proxy client"),
        gate,
    );
    (build_router(state), cluster)
}

fn secured() -> (Router, InMemoryCluster) {
    app(ApiKeyGate::with_keys([MASTER_KEY]))
}

async fn send_raw(
    router: &Router,
    method: Method,
    uri: &str,
    key: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Vec<u8>) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(key) = key {
        builder = builder.header("X-API-KEY", key);
    }
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(builder.body(body).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, bytes.to_vec())
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let (status, bytes) = send_raw(router, method, uri, Some(MASTER_KEY), body).await;
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn create_body(name: &str) -> Value {
    json!({
        "deployment_name": name,
        "user": {"id": "adam", "namespace": "adam", "API_key": "adam_test"}
    })
}

#[tokio::test]
async fn health_and_metrics_are_public() {
    let (router, _) = secured();
    for path in ["/health", "/health/"] {
        let (status, bytes) = send_raw(&router, Method::GET, path, None, None).await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(body, json!({"status": "OK"}));
    }

    send_raw(&router, Method::GET, "/management/list?namespace=adam", None, None).await;
    let (status, bytes) = send_raw(&router, Method::GET, "/metrics", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8(bytes).expect("utf8");
    assert!(text.contains("magic_toolbox_auth_rejections_total"), "{text}");
}

#[tokio::test]
async fn protected_routes_require_api_key() {
    let (router, cluster) = secured();
    let routes = [
        (Method::POST, "/management/create", Some(create_body("test"))),
        (Method::GET, "/management/list", Some(json!({"namespace": "adam"}))),
        (
            Method::DELETE,
            "/management/delete",
            Some(json!({"namespace": "adam", "deployment_name": "test"})),
        ),
        (Method::POST, "/magic_toolbox/health", Some(json!({"mt_service_url": "http://x"}))),
        (
            Method::POST,
            "/magic_toolbox/add_api_tool",
            Some(json!({"mt_service_url": "http://x", "tool_url": "http://t"})),
        ),
        (Method::POST, "/magic_toolbox/get_tools", Some(json!({"mt_service_url": "http://x"}))),
    ];
    for (method, path, body) in routes {
        for key in [None, Some("wrong")] {
            let (status, bytes) =
                send_raw(&router, method.clone(), path, key, body.clone()).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {path}");
            let body: Value = serde_json::from_slice(&bytes).expect("json");
            assert_eq!(body, json!({"error": "Invalid API Key"}));
        }
    }
    assert!(cluster.resources().is_empty());
}

#[tokio::test]
async fn disabled_auth_admits_requests_without_key() {
    let (router, _) = app(ApiKeyGate::disabled());
    let (status, _) = send_raw(
        &router,
        Method::GET,
        "/management/list?namespace=adam",
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn create_list_delete_over_http() {
    let (router, _) = secured();

    let (status, receipt) =
        send(&router, Method::POST, "/management/create", Some(create_body("test"))).await;
    assert_eq!(status, StatusCode::OK, "{receipt}");
    assert_eq!(receipt["deployment_name"], json!("test"));
    assert_eq!(receipt["namespace"], json!("adam"));
    assert_eq!(receipt["resources"].as_array().map(Vec::len), Some(2));

    let (status, conflict) =
        send(&router, Method::POST, "/management/create", Some(create_body("test"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        conflict["error"],
        json!("Deployment with name test already exists in namespace adam")
    );
    assert_eq!(conflict["existing"].as_array().map(Vec::len), Some(2));

    let (status, listed) = send(
        &router,
        Method::GET,
        "/management/list",
        Some(json!({"user_id": "adam", "namespace": "adam"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().map(Vec::len), Some(2));

    let (status, listed) = send(&router, Method::GET, "/management/list?namespace=adam", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().map(Vec::len), Some(2));

    let (status, report) = send(
        &router,
        Method::DELETE,
        "/management/delete",
        Some(json!({"user_id": "adam", "namespace": "adam", "deployment_name": "test"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["deleted"].as_array().map(Vec::len), Some(2));

    let (_, listed) = send(&router, Method::GET, "/management/list?namespace=adam", None).await;
    assert_eq!(listed, json!([]));
}

#[tokio::test]
async fn errors_map_to_statuses() {
    let (router, cluster) = secured();

    let (status, body) = send(&router, Method::GET, "/management/list", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("namespace is required"));

    let (status, _) = send(&router, Method::GET, "/management/list?namespace=Not_Valid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut bad_port = create_body("test");
    bad_port["override_params"] = json!({"port": "eighty"});
    let (status, body) = send(&router, Method::POST, "/management/create", Some(bad_port)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap_or_default().contains("port"));

    let (status, _) = send(
        &router,
        Method::POST,
        "/management/create",
        Some(json!({"deployment_name": "test"})),
    )
    .await;
    assert!(status.is_client_error(), "missing user must be rejected, got {status}");

    cluster.set_outage(Some("api server down"));
    let (status, body) =
        send(&router, Method::POST, "/management/create", Some(create_body("test"))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap_or_default().contains("api server down"));
}

#[tokio::test]
async fn instance_routes_forward_proxy_results() {
    let (router, _) = secured();
    let stub = StubToolbox::spawn_with_key(Some("adam_test")).await;

    let (status, body) = send(
        &router,
        Method::POST,
        "/magic_toolbox/health",
        Some(json!({"mt_service_url": stub.url(), "mt_api_key": "adam_test"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "healthy"}));

    let (status, _) = send(
        &router,
        Method::POST,
        "/magic_toolbox/add_api_tool",
        Some(json!({
            "mt_service_url": stub.url(),
            "mt_api_key": "adam_test",
            "tool_url": "http://weather.local",
            "tool_routes": ["/weather"]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &router,
        Method::POST,
        "/magic_toolbox/get_tools",
        Some(json!({"mt_service_url": stub.url(), "mt_api_key": "adam_test"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tools"][0]["tool_url"], json!("http://weather.local"));

    let (status, body) = send(
        &router,
        Method::POST,
        "/magic_toolbox/health",
        Some(json!({"mt_service_url": unreachable_url().await})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["error"].is_string(), "{body}");
}

#[tokio::test]
async fn repeated_create_for_adam_conflicts_with_its_deployment_and_service() {
    let (router, cluster) = secured();
    let request = json!({
        "deployment_name": "test",
        "user": {"id": "adam", "namespace": "adam"},
        "override_params": {}
    });

    let (status, receipt) =
        send(&router, Method::POST, "/management/create", Some(request.clone())).await;
    assert_eq!(status, StatusCode::OK, "{receipt}");
    let submitted = cluster.submitted_configs();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].deployment_name, "test");
    let (deployment, _) = submitted[0].to_manifests();
    let env = &deployment.spec.template.spec.containers[0].env;
    assert!(env.contains(&EnvVar::new("TL_USE_AUTH", "false")));
    assert!(env.iter().all(|var| var.name != "TL_MASTER_KEY"));

    // One toolbox instance is one Deployment plus its Service.
    let (status, conflict) =
        send(&router, Method::POST, "/management/create", Some(request)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let kinds: Vec<&str> = conflict["existing"]
        .as_array()
        .expect("existing resources")
        .iter()
        .filter_map(|resource| resource["kind"].as_str())
        .collect();
    assert_eq!(kinds, vec!["Deployment", "Service"]);
    assert!(conflict["existing"]
        .as_array()
        .into_iter()
        .flatten()
        .all(|resource| resource["name"] == json!("test")));

    let (status, _) = send(
        &router,
        Method::DELETE,
        "/management/delete",
        Some(json!({"namespace": "adam", "deployment_name": "test"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, listed) = send(&router, Method::GET, "/management/list?namespace=adam", None).await;
    assert!(listed
        .as_array()
        .into_iter()
        .flatten()
        .all(|resource| resource["labels"]["magic_toolbox"] != json!("test")));
}

use std::time::Duration;

use axum::http::StatusCode;
use magic_toolbox::toolbox::proxy::{proxy_client, InstanceProxy, ProxyResult, ToolboxInstanceHandle};
use magic_toolbox::toolbox::test_support::{unreachable_url, StubToolbox};
use serde_json::json;

fn proxy(url: String, key: Option<&str>) -> InstanceProxy {
    InstanceProxy::new(
        proxy_client(Duration::from_secs(5)).expect("client"),
        ToolboxInstanceHandle::new(url, key.map(str::to_string)),
    )
}

fn error_message(result: ProxyResult) -> String {
    match result {
        ProxyResult::Error { error } => error,
        other => panic!("expected error payload, got {other:?}"),
    }
}

#[tokio::test]
async fn health_is_forwarded_with_api_key() {
    let stub = StubToolbox::spawn_with_key(Some("adam_test")).await;
    let result = proxy(stub.url(), Some("adam_test")).health().await;
    assert_eq!(result, ProxyResult::Success(json!({"status": "healthy"})));

    let requests = stub.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].path, "/health");
    assert_eq!(requests[0].api_key.as_deref(), Some("adam_test"));
}

#[tokio::test]
async fn register_then_list_tools() {
    let stub = StubToolbox::spawn().await;
    let toolbox = proxy(format!("{}/", stub.url()), None);

    let routes = vec!["/weather".to_string(), "/forecast".to_string()];
    let registered = toolbox
        .register_tool("http://weather.local", Some(routes.as_slice()), Some("tool-key"))
        .await;
    assert!(!registered.is_error(), "{registered:?}");

    let listed = toolbox.list_tools().await;
    assert_eq!(
        listed,
        ProxyResult::Success(json!({"tools": [
            {"tool_url": "http://weather.local", "routes": ["/weather", "/forecast"]}
        ]}))
    );

    let requests = stub.requests();
    assert_eq!(requests[0].path, "/register_tool");
    assert_eq!(
        requests[0].body,
        Some(json!({
            "tool_url": "http://weather.local",
            "tool_routes": ["/weather", "/forecast"],
            "tool_api_key": "tool-key"
        }))
    );
    assert_eq!(requests[0].api_key, None);
    assert_eq!(requests[1].path, "/list_tools");
}

#[tokio::test]
async fn optional_register_fields_are_sent_as_null() {
    let stub = StubToolbox::spawn().await;
    proxy(stub.url(), None)
        .register_tool("http://tool.local", None, None)
        .await;
    assert_eq!(
        stub.requests()[0].body,
        Some(json!({"tool_url": "http://tool.local", "tool_routes": null, "tool_api_key": null}))
    );
}

#[tokio::test]
async fn rejected_key_becomes_error_payload() {
    let stub = StubToolbox::spawn_with_key(Some("right")).await;
    let message = error_message(proxy(stub.url(), Some("wrong")).list_tools().await);
    assert!(message.contains("HTTP 401"), "{message}");
    assert!(message.contains("Invalid API Key"), "{message}");
}

#[tokio::test]
async fn server_errors_and_bad_bodies_become_error_payloads() {
    let stub = StubToolbox::spawn().await;
    stub.respond_with("/health", StatusCode::INTERNAL_SERVER_ERROR, "boom");
    let message = error_message(proxy(stub.url(), None).health().await);
    assert!(message.contains("HTTP 500"), "{message}");
    assert!(message.contains("boom"), "{message}");

    stub.respond_with("/list_tools", StatusCode::OK, "not json");
    let message = error_message(proxy(stub.url(), None).list_tools().await);
    assert!(message.contains("invalid JSON"), "{message}");
}

#[tokio::test]
async fn unreachable_instance_becomes_error_payload() {
    let url = unreachable_url().await;
    let result = proxy(url, None).health().await;
    assert!(result.is_error());
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::{Json, Router};
use magic_toolbox::toolbox::cluster::{ClusterError, ClusterResources, KubeCluster};
use magic_toolbox::toolbox::k8s::labels::{any_toolbox, selector_for};
use magic_toolbox::toolbox::lifecycle::{LifecycleError, LifecycleManager};
use magic_toolbox::toolbox::template::{
    render, DeploymentTemplate, ResolvedDeploymentConfig, StaticTemplateProvider, UserIdentity,
};
use magic_toolbox::toolbox::test_support::unreachable_url;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;

#[derive(Default)]
struct FakeApiState {
    objects: Vec<(String, String, Value)>,
    authorization: Vec<String>,
    fail_services: bool,
    conflict_reason: Option<String>,
}

#[derive(Clone, Default)]
struct FakeApi(Arc<Mutex<FakeApiState>>);

impl FakeApi {
    fn state(&self) -> std::sync::MutexGuard<'_, FakeApiState> {
        self.0.lock().unwrap()
    }

    fn count(&self, resource: &str) -> usize {
        self.state()
            .objects
            .iter()
            .filter(|(kind, _, _)| kind == resource)
            .count()
    }

    fn seed(&self, resource: &str, namespace: &str, object: Value) {
        self.state()
            .objects
            .push((resource.to_string(), namespace.to_string(), object));
    }

    fn record_auth(&self, headers: &HeaderMap) {
        if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
            self.state().authorization.push(value.to_string());
        }
    }
}

fn selector_matches(selector: Option<&String>, object: &Value) -> bool {
    let Some(selector) = selector else {
        return true;
    };
    let labels = &object["metadata"]["labels"];
    match selector.split_once('=') {
        Some((key, value)) => labels[key].as_str() == Some(value),
        None => labels.get(selector.as_str()).is_some(),
    }
}

async fn list_objects(
    State(api): State<FakeApi>,
    Path((namespace, resource)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Json<Value> {
    api.record_auth(&headers);
    let items: Vec<Value> = api
        .state()
        .objects
        .iter()
        .filter(|(kind, ns, object)| {
            kind == &resource
                && ns == &namespace
                && selector_matches(query.get("labelSelector"), object)
        })
        .map(|(_, _, object)| object.clone())
        .collect();
    Json(json!({"kind": "List", "items": items}))
}

async fn create_object(
    State(api): State<FakeApi>,
    Path((namespace, resource)): Path<(String, String)>,
    headers: HeaderMap,
    Json(object): Json<Value>,
) -> Response {
    api.record_auth(&headers);
    let mut state = api.state();
    if resource == "services" && state.fail_services {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"kind": "Status", "message": "etcdserver: request timed out", "code": 500})),
        )
            .into_response();
    }
    let name = object["metadata"]["name"].as_str().unwrap_or_default().to_string();
    let exists = state.objects.iter().any(|(kind, ns, existing)| {
        kind == &resource && ns == &namespace && existing["metadata"]["name"] == json!(name)
    });
    if exists {
        return (
            StatusCode::CONFLICT,
            Json(json!({
                "kind": "Status",
                "message": format!("{resource} \"{name}\" already exists"),
                "reason": state.conflict_reason.as_deref().unwrap_or("AlreadyExists"),
                "code": 409
            })),
        )
            .into_response();
    }
    state
        .objects
        .push((resource, namespace, object.clone()));
    (StatusCode::CREATED, Json(object)).into_response()
}

async fn delete_object(
    State(api): State<FakeApi>,
    Path((namespace, resource, name)): Path<(String, String, String)>,
) -> Response {
    let mut state = api.state();
    let before = state.objects.len();
    state.objects.retain(|(kind, ns, object)| {
        !(kind == &resource && ns == &namespace && object["metadata"]["name"] == json!(name))
    });
    if state.objects.len() == before {
        return (StatusCode::NOT_FOUND, Json(json!({"kind": "Status", "code": 404}))).into_response();
    }
    Json(json!({"kind": "Status", "status": "Success"})).into_response()
}

async fn spawn_fake_api() -> (String, FakeApi) {
    let api = FakeApi::default();
    let app = Router::new()
        .route(
            "/apis/apps/v1/namespaces/{namespace}/{resource}",
            get(list_objects).post(create_object),
        )
        .route(
            "/apis/apps/v1/namespaces/{namespace}/{resource}/{name}",
            delete(delete_object),
        )
        .route(
            "/api/v1/namespaces/{namespace}/{resource}",
            get(list_objects).post(create_object),
        )
        .route(
            "/api/v1/namespaces/{namespace}/{resource}/{name}",
            delete(delete_object),
        )
        .with_state(api.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), api)
}

fn config_for(name: &str) -> ResolvedDeploymentConfig {
    let mut overrides = Map::new();
    overrides.insert("deployment_name".to_string(), json!(name));
    render(
        &DeploymentTemplate::builtin(),
        &UserIdentity::new("adam", "adam", "adam_test"),
        &overrides,
    )
    .expect("render")
}

#[tokio::test]
async fn deploy_find_and_delete_through_the_api() {
    let (url, api) = spawn_fake_api().await;
    let cluster = KubeCluster::new(&url, Some("token-123".to_string()), false).expect("client");

    let receipt = cluster
        .deploy_generic_model(config_for("test"))
        .await
        .expect("deploy");
    assert_eq!(receipt.resources.len(), 2);
    assert_eq!(api.count("deployments"), 1);
    assert_eq!(api.count("services"), 1);

    let stored = api.state().objects[0].2.clone();
    assert_eq!(stored["kind"], json!("Deployment"));
    assert_eq!(stored["metadata"]["labels"]["magic_toolbox"], json!("test"));
    assert_eq!(
        stored["spec"]["template"]["spec"]["containers"][0]["env"][1],
        json!({"name": "TL_MASTER_KEY", "value": "adam_test"})
    );

    cluster
        .deploy_generic_model(config_for("other"))
        .await
        .expect("second toolbox");

    let found = cluster
        .find_resources_with_label("adam", &selector_for("test"))
        .await
        .expect("find");
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].kind, "Deployment");
    assert_eq!(found[1].kind, "Service");
    let all = cluster
        .find_resources_with_label("adam", &any_toolbox())
        .await
        .expect("find all");
    assert_eq!(all.len(), 4);

    let report = cluster
        .delete_labeled_resources("adam", &selector_for("test"))
        .await
        .expect("delete");
    assert_eq!(report.deleted.len(), 2);
    assert_eq!(api.count("deployments"), 1);
    assert_eq!(api.count("services"), 1);

    let authorization = api.state().authorization.clone();
    assert!(!authorization.is_empty());
    assert!(authorization.iter().all(|value| value == "Bearer token-123"));
}

#[tokio::test]
async fn duplicate_name_maps_to_already_exists() {
    let (url, _) = spawn_fake_api().await;
    let cluster = KubeCluster::new(&url, None, false).expect("client");
    cluster
        .deploy_generic_model(config_for("test"))
        .await
        .expect("deploy");
    let err = cluster
        .deploy_generic_model(config_for("test"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::AlreadyExists(_)), "{err}");
    assert!(err.to_string().contains("already exists"));
}

#[tokio::test]
async fn failed_service_rolls_back_deployment() {
    let (url, api) = spawn_fake_api().await;
    api.state().fail_services = true;
    let cluster = KubeCluster::new(&url, None, false).expect("client");

    let err = cluster
        .deploy_generic_model(config_for("test"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::Unavailable(_)), "{err}");
    assert!(err.to_string().contains("request timed out"), "{err}");
    assert_eq!(api.count("deployments"), 0);
}

#[tokio::test]
async fn unreachable_api_is_unavailable() {
    let cluster = KubeCluster::new(&unreachable_url().await, None, false).expect("client");
    let err = cluster
        .find_resources_with_label("adam", &any_toolbox())
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::Unavailable(_)), "{err}");

    let err = cluster
        .find_resources_with_label("Bad Namespace", &any_toolbox())
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::Validation(_)), "{err}");
}

#[tokio::test]
async fn lifecycle_manager_over_kubernetes() {
    let (url, _) = spawn_fake_api().await;
    let manager = LifecycleManager::new(
        Arc::new(StaticTemplateProvider::builtin()),
        Arc::new(KubeCluster::new(&url, None, false).expect("client")),
    );
    let adam = UserIdentity::new("adam", "adam", "adam_test");

    manager
        .create("adam", "test", &adam, Map::new())
        .await
        .expect("create");
    let err = manager
        .create("adam", "test", &adam, Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::Conflict { ref existing, .. } if existing.len() == 2));

    assert_eq!(manager.list("adam").await.expect("list").len(), 2);
    assert_eq!(manager.delete("adam", "test").await.expect("delete").deleted.len(), 2);
    assert!(manager.list("adam").await.expect("list").is_empty());
}

#[tokio::test]
async fn name_held_by_unlabelled_object_is_not_a_conflict() {
    let (url, api) = spawn_fake_api().await;
    api.seed(
        "deployments",
        "adam",
        json!({
            "kind": "Deployment",
            "metadata": {"name": "test", "namespace": "adam", "labels": {"app": "legacy"}}
        }),
    );
    let manager = LifecycleManager::new(
        Arc::new(StaticTemplateProvider::builtin()),
        Arc::new(KubeCluster::new(&url, None, false).expect("client")),
    );
    let adam = UserIdentity::new("adam", "adam", "adam_test");

    let err = manager
        .create("adam", "test", &adam, Map::new())
        .await
        .unwrap_err();
    match &err {
        LifecycleError::InvalidConfig(message) => {
            assert!(message.contains("already exists"), "{message}")
        }
        other => panic!("expected invalid config, got {other:?}"),
    }
    assert_eq!(api.count("deployments"), 1);
    assert_eq!(api.count("services"), 0);

    let report = manager.delete("adam", "test").await.expect("delete");
    assert!(report.deleted.is_empty());
    assert_eq!(api.count("deployments"), 1);
}

#[tokio::test]
async fn conflict_without_already_exists_reason_is_a_validation_error() {
    let (url, api) = spawn_fake_api().await;
    api.state().conflict_reason = Some("Conflict".to_string());
    let cluster = KubeCluster::new(&url, None, false).expect("client");
    cluster
        .deploy_generic_model(config_for("test"))
        .await
        .expect("deploy");
    let err = cluster
        .deploy_generic_model(config_for("test"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::Validation(_)), "{err}");
}

#[tokio::test]
async fn leading_digit_name_is_rejected_before_any_request() {
    let (url, api) = spawn_fake_api().await;
    let cluster = KubeCluster::new(&url, None, false).expect("client");
    let err = cluster
        .deploy_generic_model(config_for("1test"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClusterError::Validation(_)), "{err}");
    assert_eq!(api.count("deployments"), 0);
}

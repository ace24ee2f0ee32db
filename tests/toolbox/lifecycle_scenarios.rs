use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use magic_toolbox::toolbox::cluster::{
    ClusterError, ClusterFuture, ClusterResource, ClusterResources, DeletionReport,
    DeploymentReceipt, InMemoryCluster,
};
use magic_toolbox::toolbox::k8s::labels::LabelSelector;
use magic_toolbox::toolbox::lifecycle::{LifecycleError, LifecycleManager};
use magic_toolbox::toolbox::template::{
    ResolvedDeploymentConfig, StaticTemplateProvider, UserIdentity,
};
use serde_json::Map;

fn manager_with(cluster: Arc<dyn ClusterResources>) -> LifecycleManager {
    LifecycleManager::new(Arc::new(StaticTemplateProvider::builtin()), cluster)
}

fn adam() -> UserIdentity {
    UserIdentity::new("adam", "adam", "adam_test")
}

#[tokio::test]
async fn create_list_conflict_delete_round() {
    let cluster = InMemoryCluster::new();
    let manager = manager_with(Arc::new(cluster.clone()));

    assert!(manager.list("adam").await.expect("list").is_empty());

    let receipt = manager
        .create("adam", "test", &adam(), Map::new())
        .await
        .expect("first create succeeds");
    assert_eq!(receipt.namespace, "adam");
    assert_eq!(receipt.deployment_name, "test");
    assert_eq!(receipt.template, "tool-library");

    let listed = manager.list("adam").await.expect("list");
    assert_eq!(listed.len(), 2);
    assert!(listed
        .iter()
        .all(|resource| resource.labels.get("magic_toolbox").map(String::as_str) == Some("test")));

    match manager.create("adam", "test", &adam(), Map::new()).await {
        Err(LifecycleError::Conflict {
            namespace,
            deployment_name,
            existing,
        }) => {
            assert_eq!(namespace, "adam");
            assert_eq!(deployment_name, "test");
            assert_eq!(existing, listed);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(
        cluster.submitted_configs().len(),
        1,
        "a conflicting create must not reach the collaborator"
    );

    let report = manager.delete("adam", "test").await.expect("delete");
    assert_eq!(report.deleted.len(), 2);
    assert!(manager.list("adam").await.expect("list").is_empty());

    manager
        .create("adam", "test", &adam(), Map::new())
        .await
        .expect("name is reusable after delete");
}

#[tokio::test]
async fn deleting_unknown_toolbox_reports_nothing() {
    let manager = manager_with(Arc::new(InMemoryCluster::new()));
    let report = manager.delete("adam", "missing").await.expect("delete");
    assert!(report.deleted.is_empty());
    assert_eq!(report.selector, "magic_toolbox=missing");
}

#[tokio::test]
async fn list_and_delete_are_not_scoped_by_owner() {
    let cluster = InMemoryCluster::new();
    let manager = manager_with(Arc::new(cluster.clone()));
    manager
        .create("shared", "test", &UserIdentity::new("adam", "shared", "k1"), Map::new())
        .await
        .expect("create");

    // Anyone who knows the namespace and name reaches the toolbox.
    assert_eq!(manager.list("shared").await.unwrap().len(), 2);
    let report = manager.delete("shared", "test").await.unwrap();
    assert_eq!(report.deleted.len(), 2);
}

#[tokio::test]
async fn resources_outside_the_toolbox_label_are_ignored() {
    let cluster = InMemoryCluster::new();
    cluster.insert_resource(ClusterResource {
        kind: "Deployment".to_string(),
        name: "unrelated".to_string(),
        namespace: "adam".to_string(),
        labels: BTreeMap::from([("app".to_string(), "unrelated".to_string())]),
    });
    let manager = manager_with(Arc::new(cluster.clone()));

    assert!(manager.list("adam").await.unwrap().is_empty());
    manager.delete("adam", "unrelated").await.unwrap();
    assert_eq!(cluster.resources().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creates_yield_exactly_one_toolbox() {
    let cluster = InMemoryCluster::new();
    let manager = manager_with(Arc::new(cluster.clone()));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            manager.create("adam", "test", &adam(), Map::new()).await
        }));
    }

    let mut created = 0;
    let mut conflicts = 0;
    for task in tasks {
        match task.await.expect("task") {
            Ok(_) => created += 1,
            Err(LifecycleError::Conflict { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error {other}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(conflicts, 15);
    assert_eq!(cluster.resources().len(), 2);
    assert_eq!(cluster.submitted_configs().len(), 1);
}

/// Hides existing resources from the first lookup, as if a concurrent
/// creator finished between the pre-check and the submission.
struct LateCompetitor {
    inner: InMemoryCluster,
    hidden: AtomicBool,
}

impl ClusterResources for LateCompetitor {
    fn find_resources_with_label(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> ClusterFuture<Vec<ClusterResource>> {
        if self.hidden.swap(false, Ordering::SeqCst) {
            return Box::pin(async { Ok::<_, ClusterError>(Vec::new()) });
        }
        self.inner.find_resources_with_label(namespace, selector)
    }

    fn delete_labeled_resources(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> ClusterFuture<DeletionReport> {
        self.inner.delete_labeled_resources(namespace, selector)
    }

    fn deploy_generic_model(
        &self,
        config: ResolvedDeploymentConfig,
    ) -> ClusterFuture<DeploymentReceipt> {
        self.inner.deploy_generic_model(config)
    }
}

#[tokio::test]
async fn losing_the_race_inside_the_collaborator_is_a_conflict() {
    let inner = InMemoryCluster::new();
    manager_with(Arc::new(inner.clone()))
        .create("adam", "test", &adam(), Map::new())
        .await
        .expect("competitor create");

    let manager = manager_with(Arc::new(LateCompetitor {
        inner: inner.clone(),
        hidden: AtomicBool::new(true),
    }));
    match manager.create("adam", "test", &adam(), Map::new()).await {
        Err(LifecycleError::Conflict { existing, .. }) => assert_eq!(existing.len(), 2),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(inner.submitted_configs().len(), 1);
}

//! Tests for the reconciler module
//!
//! These tests verify the reconcile state machine against an in-memory store:
//! - Finalizer attachment before any provisioning
//! - Provisioning order and idempotency
//! - First-failure abort
//! - Finalizer-driven cleanup of cluster-scoped objects
//! - Concurrent installation of the shared CRD

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use kube::runtime::controller::Action;
    use kube::ResourceExt;

    use super::super::catalog::{ManagedResource, CATALOG, CONTROLLER_NAME, EXPERIMENTS_CRD_NAME};
    use super::super::ensure::EnsureOutcome;
    use super::super::install_guard::InstallGuard;
    use super::super::object::{ManagedObject, ObjectKind};
    use super::super::reconciler::*;
    use super::super::resources::{build_cluster_role_binding, build_controller_service};
    use super::super::store::ResourceStore;
    use super::super::test_support::{
        deleted_instance, finalized_instance, test_config, test_instance, Call, FakeStore,
    };
    use crate::crd::ObjectKey;
    use crate::error::Error;

    const NS: &str = "iter8";

    fn reconciler(store: &Arc<FakeStore>) -> Reconciler<FakeStore> {
        Reconciler::new(store.clone(), Arc::new(InstallGuard::new()), test_config())
    }

    fn finalizer() -> String {
        test_config().finalizer
    }

    fn key(name: &str) -> ObjectKey {
        ObjectKey::new(NS, name)
    }

    fn catalog_creates() -> Vec<(ObjectKind, String)> {
        CATALOG
            .iter()
            .map(|r| (r.kind(), r.name().to_string()))
            .collect()
    }

    // ========================================================================
    // Fetch
    // ========================================================================

    #[tokio::test]
    async fn test_missing_instance_is_not_an_error() {
        let store = Arc::new(FakeStore::new());
        let outcome = reconciler(&store).reconcile(&key("gone")).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::InstanceNotFound);
        assert!(!outcome.requeue());
        assert_eq!(store.calls(), vec![Call::GetInstance(key("gone"))]);
    }

    #[tokio::test]
    async fn test_fetch_error_is_propagated() {
        let store = Arc::new(FakeStore::new());
        store.insert_instance(finalized_instance("iter8", NS, &finalizer()));
        store.fail_instance_fetch();

        let result = reconciler(&store).reconcile(&key("iter8")).await;

        let err = result.unwrap_err();
        assert!(err.is_retriable());
        assert!(store.creates().is_empty());
    }

    // ========================================================================
    // Finalizer attachment
    // ========================================================================

    #[tokio::test]
    async fn test_finalizer_attached_before_provisioning() {
        let store = Arc::new(FakeStore::new());
        store.insert_instance(test_instance("iter8", NS));
        let reconciler = reconciler(&store);

        let first = reconciler.reconcile(&key("iter8")).await.unwrap();
        assert_eq!(first, ReconcileOutcome::FinalizerAdded);
        assert!(first.requeue());
        assert!(store.creates().is_empty());
        assert!(store
            .instance(&key("iter8"))
            .unwrap()
            .finalizers()
            .contains(&finalizer()));

        let second = reconciler.reconcile(&key("iter8")).await.unwrap();
        assert!(matches!(second, ReconcileOutcome::Provisioned(_)));
        assert!(!second.requeue());
        assert_eq!(store.creates(), catalog_creates());
    }

    #[tokio::test]
    async fn test_finalizer_update_failure_is_propagated() {
        let store = Arc::new(FakeStore::new());
        store.insert_instance(test_instance("iter8", NS));
        store.fail_update();

        let result = reconciler(&store).reconcile(&key("iter8")).await;
        assert!(matches!(result, Err(Error::KubeError(_))));
        assert!(store.creates().is_empty());
    }

    #[test]
    fn test_outcome_actions() {
        assert_eq!(
            ReconcileOutcome::FinalizerAdded.action(),
            Action::requeue(Duration::from_secs(1))
        );
        assert_eq!(ReconcileOutcome::Finalized.action(), Action::await_change());
        assert_eq!(
            ReconcileOutcome::InstanceNotFound.action(),
            Action::await_change()
        );
    }

    // ========================================================================
    // Provisioning
    // ========================================================================

    #[tokio::test]
    async fn test_provisioning_follows_catalog_order() {
        let store = Arc::new(FakeStore::new());
        store.insert_instance(finalized_instance("iter8", NS, &finalizer()));

        let outcome = reconciler(&store).reconcile(&key("iter8")).await.unwrap();

        let ReconcileOutcome::Provisioned(report) = outcome else {
            panic!("expected provisioning, got {:?}", outcome);
        };
        let steps: Vec<_> = report.steps.iter().map(|(r, _)| *r).collect();
        assert_eq!(steps, CATALOG.to_vec());
        assert!(report
            .steps
            .iter()
            .all(|(_, o)| *o == EnsureOutcome::Created));
        assert_eq!(store.creates(), catalog_creates());
        assert_eq!(store.object_count(), CATALOG.len());
    }

    #[tokio::test]
    async fn test_second_reconcile_creates_nothing() {
        let store = Arc::new(FakeStore::new());
        store.insert_instance(finalized_instance("iter8", NS, &finalizer()));
        let reconciler = reconciler(&store);

        reconciler.reconcile(&key("iter8")).await.unwrap();
        store.clear_calls();
        let outcome = reconciler.reconcile(&key("iter8")).await.unwrap();

        let ReconcileOutcome::Provisioned(report) = outcome else {
            panic!("expected provisioning, got {:?}", outcome);
        };
        assert!(report.is_noop());
        assert!(store.creates().is_empty());
        assert_eq!(report.steps.len(), CATALOG.len());
    }

    #[tokio::test]
    async fn test_existing_object_is_left_untouched() {
        let store = Arc::new(FakeStore::new());
        let instance = finalized_instance("iter8", NS, &finalizer());
        store.insert_instance(instance.clone());

        // Live service diverges from desired; it must not be replaced
        let mut live = build_controller_service(&instance);
        live.metadata.labels = Some([("custom".to_string(), "yes".to_string())].into());
        store.insert_object(ManagedObject::Service(live));

        reconciler(&store).reconcile(&key("iter8")).await.unwrap();

        assert!(!store
            .creates()
            .contains(&(ObjectKind::Service, CONTROLLER_NAME.to_string())));
        let Some(ManagedObject::Service(service)) =
            store.object(ObjectKind::Service, CONTROLLER_NAME, Some(NS))
        else {
            panic!("controller service missing");
        };
        assert_eq!(service.labels().get("custom").map(String::as_str), Some("yes"));
    }

    #[tokio::test]
    async fn test_first_failure_aborts_remaining_steps() {
        let store = Arc::new(FakeStore::new());
        store.insert_instance(finalized_instance("iter8", NS, &finalizer()));
        store.fail_create_of(ObjectKind::Service, CONTROLLER_NAME);

        let result = reconciler(&store).reconcile(&key("iter8")).await;

        match result {
            Err(Error::ProvisioningError { step, source }) => {
                assert_eq!(step, ManagedResource::ControllerService);
                assert!(matches!(*source, Error::KubeError(_)));
            }
            other => panic!("expected provisioning error, got {:?}", other),
        }

        let attempted: Vec<_> = store.creates();
        let expected: Vec<_> = catalog_creates().into_iter().take(7).collect();
        assert_eq!(attempted, expected);
        assert!(store
            .object(ObjectKind::Deployment, CONTROLLER_NAME, Some(NS))
            .is_none());
    }

    #[tokio::test]
    async fn test_failure_at_last_step_keeps_earlier_objects() {
        let store = Arc::new(FakeStore::new());
        store.insert_instance(finalized_instance("iter8", NS, &finalizer()));
        store.fail_create_of(ObjectKind::Deployment, "iter8-analytics");
        let reconciler = reconciler(&store);

        assert!(reconciler.reconcile(&key("iter8")).await.is_err());
        assert_eq!(store.object_count(), CATALOG.len() - 1);
    }

    #[tokio::test]
    async fn test_missing_manifest_fails_crd_step() {
        let store = Arc::new(FakeStore::new());
        store.insert_instance(finalized_instance("iter8", NS, &finalizer()));
        let dir = tempfile::tempdir().unwrap();
        let config = ReconcilerConfig {
            crd_manifest: dir.path().join("absent.yaml"),
            ..test_config()
        };
        let reconciler = Reconciler::new(store.clone(), Arc::new(InstallGuard::new()), config);

        let result = reconciler.reconcile(&key("iter8")).await;

        match result {
            Err(Error::ProvisioningError { step, source }) => {
                assert_eq!(step, ManagedResource::ExperimentsCrd);
                assert!(matches!(*source, Error::ManifestError { .. }));
                assert!(!Error::ProvisioningError { step, source }.is_retriable());
            }
            other => panic!("expected provisioning error, got {:?}", other),
        }
        assert!(store.creates().is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_credentials_secret_fails_analytics_config() {
        let store = Arc::new(FakeStore::new());
        store.insert_instance(finalized_instance("iter8", NS, &finalizer()));
        store.fail_secret_read();

        let result = reconciler(&store).reconcile(&key("iter8")).await;

        match result {
            Err(Error::ProvisioningError { step, source }) => {
                assert_eq!(step, ManagedResource::AnalyticsConfigMap);
                assert!(matches!(*source, Error::KubeError(_)));
            }
            other => panic!("expected provisioning error, got {:?}", other),
        }
        assert!(store
            .object(ObjectKind::ConfigMap, "iter8-analytics", Some(NS))
            .is_none());
        let expected: Vec<_> = catalog_creates().into_iter().take(8).collect();
        assert_eq!(store.creates(), expected);
    }

    // ========================================================================
    // Finalize
    // ========================================================================

    async fn provisioned_store() -> Arc<FakeStore> {
        let store = Arc::new(FakeStore::new());
        store.insert_instance(finalized_instance("iter8", NS, &finalizer()));
        reconciler(&store).reconcile(&key("iter8")).await.unwrap();
        store.insert_instance(deleted_instance("iter8", NS, &finalizer()));
        store.clear_calls();
        store
    }

    #[tokio::test]
    async fn test_finalize_deletes_cluster_objects_in_order() {
        let store = provisioned_store().await;

        let outcome = reconciler(&store).reconcile(&key("iter8")).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Finalized);
        assert_eq!(
            store.deletes(),
            vec![
                (ObjectKind::ClusterRoleBinding, "iter8-controller-rolebinding".to_string()),
                (ObjectKind::ClusterRole, "iter8-controller-role".to_string()),
                (ObjectKind::CustomResourceDefinition, EXPERIMENTS_CRD_NAME.to_string()),
            ]
        );
        assert!(store.creates().is_empty());
        // Namespaced objects are left to the garbage collector
        assert!(store
            .object(ObjectKind::Deployment, CONTROLLER_NAME, Some(NS))
            .is_some());
        // The last finalizer is gone, so the instance is deleted
        assert!(store.instance(&key("iter8")).is_none());
    }

    #[tokio::test]
    async fn test_finalize_tolerates_already_deleted_binding() {
        let store = provisioned_store().await;
        store
            .delete(ObjectKind::ClusterRoleBinding, "iter8-controller-rolebinding", None)
            .await
            .unwrap();

        let outcome = reconciler(&store).reconcile(&key("iter8")).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Finalized);
        assert!(store
            .object(ObjectKind::ClusterRole, "iter8-controller-role", None)
            .is_none());
        assert!(store
            .object(ObjectKind::CustomResourceDefinition, EXPERIMENTS_CRD_NAME, None)
            .is_none());
        assert!(store.instance(&key("iter8")).is_none());
    }

    #[tokio::test]
    async fn test_finalize_with_nothing_installed_still_releases_instance() {
        let store = Arc::new(FakeStore::new());
        store.insert_instance(deleted_instance("iter8", NS, &finalizer()));

        let outcome = reconciler(&store).reconcile(&key("iter8")).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::Finalized);
        assert_eq!(store.deletes().len(), 3);
        assert!(store.instance(&key("iter8")).is_none());
    }

    #[tokio::test]
    async fn test_finalize_error_keeps_finalizer() {
        let store = provisioned_store().await;
        store.fail_delete_of(ObjectKind::ClusterRole, "iter8-controller-role");

        let result = reconciler(&store).reconcile(&key("iter8")).await;

        assert!(matches!(result, Err(Error::KubeError(_))));
        // The CRD delete never ran and the finalizer is still attached
        assert_eq!(store.deletes().len(), 2);
        assert!(store
            .object(ObjectKind::CustomResourceDefinition, EXPERIMENTS_CRD_NAME, None)
            .is_some());
        assert!(!store
            .calls()
            .iter()
            .any(|c| matches!(c, Call::UpdateInstance(_))));
        let instance = store.instance(&key("iter8")).unwrap();
        assert!(instance.finalizers().contains(&finalizer()));
    }

    #[tokio::test]
    async fn test_deleted_instance_without_finalizer_is_left_alone() {
        let store = Arc::new(FakeStore::new());
        let mut instance = deleted_instance("iter8", NS, &finalizer());
        instance.metadata.finalizers = Some(vec!["other".to_string()]);
        store.insert_instance(instance);

        let outcome = reconciler(&store).reconcile(&key("iter8")).await.unwrap();

        assert_eq!(outcome, ReconcileOutcome::AwaitingDeletion);
        assert!(store.deletes().is_empty());
        assert!(store.creates().is_empty());
    }

    #[tokio::test]
    async fn test_deleting_instance_is_never_provisioned() {
        let store = Arc::new(FakeStore::new());
        store.insert_instance(deleted_instance("iter8", NS, &finalizer()));

        reconciler(&store).reconcile(&key("iter8")).await.unwrap();

        assert!(store.creates().is_empty());
    }

    // ========================================================================
    // Concurrency
    // ========================================================================

    #[tokio::test]
    async fn test_concurrent_instances_install_crd_once() {
        let store = Arc::new(FakeStore::new());
        store.insert_instance(finalized_instance("first", "team-a", &finalizer()));
        store.insert_instance(finalized_instance("second", "team-b", &finalizer()));
        let reconciler = reconciler(&store);

        let first_key = ObjectKey::new("team-a", "first");
        let second_key = ObjectKey::new("team-b", "second");
        let (first, second) = tokio::join!(
            reconciler.reconcile(&first_key),
            reconciler.reconcile(&second_key)
        );

        assert!(first.is_ok(), "first reconcile failed: {:?}", first);
        assert!(second.is_ok(), "second reconcile failed: {:?}", second);

        let crd_creates = store
            .creates()
            .into_iter()
            .filter(|(kind, _)| *kind == ObjectKind::CustomResourceDefinition)
            .count();
        assert_eq!(crd_creates, 1);
    }

    #[tokio::test]
    async fn test_concurrent_tasks_share_the_install_guard() {
        let store = Arc::new(FakeStore::new());
        let guard = Arc::new(InstallGuard::new());
        let mut handles = Vec::new();

        for i in 0..4 {
            let namespace = format!("team-{}", i);
            store.insert_instance(finalized_instance("iter8", &namespace, &finalizer()));
            let reconciler = Reconciler::new(store.clone(), guard.clone(), test_config());
            handles.push(tokio::spawn(async move {
                reconciler.reconcile(&ObjectKey::new(namespace, "iter8")).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        let crd_creates = store
            .creates()
            .into_iter()
            .filter(|(kind, _)| *kind == ObjectKind::CustomResourceDefinition)
            .count();
        assert_eq!(crd_creates, 1);
    }

    #[tokio::test]
    async fn test_binding_subject_uses_instance_namespace() {
        let store = Arc::new(FakeStore::new());
        store.insert_instance(finalized_instance("iter8", NS, &finalizer()));

        reconciler(&store).reconcile(&key("iter8")).await.unwrap();

        let Some(ManagedObject::ClusterRoleBinding(binding)) = store.object(
            ObjectKind::ClusterRoleBinding,
            "iter8-controller-rolebinding",
            None,
        ) else {
            panic!("binding missing");
        };
        let expected = build_cluster_role_binding(&test_instance("iter8", NS));
        assert_eq!(binding.subjects, expected.subjects);
        assert!(binding.metadata.owner_references.is_none());
    }
}

//! Integration tests for reconciliation against the in-memory GitLab.

use std::sync::Arc;

use hidra_gitlab::{
    CiVariable, DesiredResourceState, FileAction, InMemoryGitLab, Reconciler, RemoteClient,
    ResourceAction, RetryPolicy, VariableAction, VariableKey, VariableSpec,
};

fn desired() -> DesiredResourceState {
    let mut state = DesiredResourceState::for_project("acme/shop/storefront", true)
        .with_file(".gitlab-ci.yml", "include: []\n")
        .with_file("k8s/web/04-deployment.yaml", "kind: Deployment\n")
        .with_file("k8s/web/02-secrets.yaml", "kind: Secret\n");
    for (env, context) in [("dev", "acme/agents:dev"), ("pro", "acme/agents:pro")] {
        state = state.with_variable(
            VariableKey::new("KUBE_CONTEXT", env),
            VariableSpec::new(context),
        );
    }
    state.with_variable(
        VariableKey::global("WEB_API_KEY"),
        VariableSpec::placeholder("CHANGE_ME").masked(true),
    )
}

#[tokio::test]
async fn test_fresh_instance_then_rerun() {
    let gitlab = InMemoryGitLab::new();
    let reconciler =
        Reconciler::new(Arc::new(gitlab.clone())).with_retry(RetryPolicy::immediate(3));

    let first = reconciler.apply(&desired()).await.unwrap();
    assert_eq!(
        first
            .groups
            .iter()
            .map(|g| g.full_path.as_str())
            .collect::<Vec<_>>(),
        vec!["acme", "acme/shop"]
    );
    assert_eq!(first.files.len(), 3);
    assert!(first.files.iter().all(|f| f.action == FileAction::Created));
    assert_eq!(first.variables.len(), 3);

    gitlab.clear_calls();
    let second = reconciler.apply(&desired()).await.unwrap();
    assert!(second.is_noop());
    assert_eq!(gitlab.write_count(), 0);
    assert!(second.groups.is_empty());
    assert!(!gitlab.was_called("get_group_by_path"));
    assert_eq!(
        second.project.map(|p| p.action),
        Some(ResourceAction::Found)
    );
}

#[tokio::test]
async fn test_owner_filled_placeholder_survives_reprovisioning() {
    let gitlab = InMemoryGitLab::new();
    let reconciler =
        Reconciler::new(Arc::new(gitlab.clone())).with_retry(RetryPolicy::immediate(3));
    reconciler.apply(&desired()).await.unwrap();

    // The project owner replaces the placeholder by hand.
    let project = gitlab.project("acme/shop/storefront").unwrap();
    gitlab
        .update_variable(
            project.id,
            &CiVariable::new("WEB_API_KEY", "live-key").masked(true),
        )
        .await
        .unwrap();

    let report = reconciler.apply(&desired()).await.unwrap();
    let api_key = report
        .variables
        .iter()
        .find(|v| v.key.name == "WEB_API_KEY")
        .unwrap();
    assert_eq!(api_key.action, VariableAction::KeptExisting);
    assert!(gitlab
        .variables("acme/shop/storefront")
        .iter()
        .any(|v| v.key == "WEB_API_KEY" && v.value.as_deref() == Some("live-key")));
}

#[tokio::test]
async fn test_existing_scoped_records_are_distinct() {
    let gitlab = InMemoryGitLab::new()
        .with_variable(
            "acme/shop/storefront",
            CiVariable::new("KUBE_CONTEXT", "old:dev").scope("dev"),
        )
        .with_variable(
            "acme/shop/storefront",
            CiVariable::new("KUBE_CONTEXT", "acme/agents:pro").scope("pro"),
        );
    let reconciler =
        Reconciler::new(Arc::new(gitlab.clone())).with_retry(RetryPolicy::immediate(3));

    let report = reconciler.apply(&desired()).await.unwrap();
    let action = |scope: &str| {
        report
            .variables
            .iter()
            .find(|v| v.key == VariableKey::new("KUBE_CONTEXT", scope))
            .map(|v| v.action)
    };
    assert_eq!(action("dev"), Some(VariableAction::Updated));
    assert_eq!(action("pro"), Some(VariableAction::Unchanged));

    let contexts: Vec<_> = gitlab
        .variables("acme/shop/storefront")
        .into_iter()
        .filter(|v| v.key == "KUBE_CONTEXT")
        .collect();
    assert_eq!(contexts.len(), 2);
}

//! Provider manager tests

mod common;

use std::sync::Arc;

use common::{sample_config, DeployBehavior, FakeProvider};
use phoenix::errors::AgentError;
use phoenix::providers::manager::{ProviderEntry, ProviderManager};
use phoenix::providers::ComputeProvider;

fn manager(providers: &[(u32, Arc<FakeProvider>)]) -> ProviderManager {
    let entries = providers
        .iter()
        .map(|(priority, p)| ProviderEntry::new(*priority, p.clone()))
        .collect();
    ProviderManager::new(entries).unwrap()
}

#[test]
fn test_providers_sorted_by_priority() {
    let a = FakeProvider::new("akash", DeployBehavior::Succeed);
    let b = FakeProvider::new("direct", DeployBehavior::Succeed);
    let m = manager(&[(10, b), (0, a)]);
    assert_eq!(m.provider_names(), vec!["akash", "direct"]);
    assert_eq!(m.index_of("direct"), Some(1));
}

#[test]
fn test_rejects_empty_and_duplicate_names() {
    assert!(matches!(ProviderManager::new(Vec::new()), Err(AgentError::ConfigError(_))));

    let a = FakeProvider::new("akash", DeployBehavior::Succeed);
    let b = FakeProvider::new("akash", DeployBehavior::Succeed);
    let result = ProviderManager::new(vec![ProviderEntry::new(0, a), ProviderEntry::new(1, b)]);
    assert!(matches!(result, Err(AgentError::ConfigError(_))));
}

#[tokio::test]
async fn test_failed_deployment_falls_through_to_next_provider() {
    let akash = FakeProvider::new("akash", DeployBehavior::ReturnFailed);
    let direct = FakeProvider::new("direct", DeployBehavior::Succeed);
    let m = manager(&[(0, akash.clone()), (10, direct.clone())]);

    let deployment = m.deploy(&sample_config()).await.unwrap();

    assert_eq!(deployment.provider, "direct");
    assert_eq!(m.active_index(), 1);
    assert_eq!(m.active_provider().name(), "direct");
    assert_eq!(akash.deploy_count(), 1);
    assert_eq!(direct.deploy_count(), 1);
    assert_eq!(m.last_config(), Some(sample_config()));
}

#[tokio::test]
async fn test_deploy_always_starts_at_highest_priority() {
    let akash = FakeProvider::new("akash", DeployBehavior::Succeed);
    let direct = FakeProvider::new("direct", DeployBehavior::Succeed);
    let m = manager(&[(0, akash.clone()), (10, direct.clone())]);

    m.deploy_to(1, &sample_config()).await.unwrap();
    assert_eq!(m.active_index(), 1);

    m.deploy(&sample_config()).await.unwrap();
    assert_eq!(m.active_index(), 0);
    assert_eq!(direct.deploy_count(), 1);
}

#[tokio::test]
async fn test_all_providers_failing_is_exhausted() {
    let akash = FakeProvider::new("akash", DeployBehavior::Error);
    let direct = FakeProvider::new("direct", DeployBehavior::ReturnFailed);
    let m = manager(&[(0, akash), (10, direct)]);

    let err = m.deploy(&sample_config()).await.unwrap_err();
    match err {
        AgentError::FailoverExhausted { attempts, last_error } => {
            assert_eq!(attempts, 2);
            assert!(last_error.contains("no bids"), "{}", last_error);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(m.active_deployment().is_none());
}

#[tokio::test]
async fn test_failover_starts_after_active_provider() {
    let a = FakeProvider::new("a", DeployBehavior::Succeed);
    let b = FakeProvider::new("b", DeployBehavior::Succeed);
    let c = FakeProvider::new("c", DeployBehavior::Succeed);
    let m = manager(&[(0, a.clone()), (1, b.clone()), (2, c.clone())]);
    let mut events = m.subscribe();

    m.deploy_to(1, &sample_config()).await.unwrap();
    let deployment = m.failover().await.unwrap();

    assert_eq!(deployment.provider, "c");
    assert_eq!(m.active_index(), 2);
    assert_eq!(a.deploy_count(), 0);
    assert_eq!(b.destroy_count(), 1);

    let event = events.try_recv().unwrap();
    assert_eq!(event.from, "b");
    assert_eq!(event.to, "c");
    assert_eq!(event.deployment_id, deployment.id);
}

#[tokio::test]
async fn test_failover_wraps_around() {
    let a = FakeProvider::new("a", DeployBehavior::Succeed);
    let b = FakeProvider::new("b", DeployBehavior::Succeed);
    let m = manager(&[(0, a.clone()), (1, b.clone())]);

    m.deploy_to(1, &sample_config()).await.unwrap();
    b.set_behavior(DeployBehavior::Error);

    let deployment = m.failover().await.unwrap();
    assert_eq!(deployment.provider, "a");
    assert_eq!(m.active_index(), 0);
}

#[tokio::test]
async fn test_failover_survives_destroy_failure() {
    let a = FakeProvider::new("a", DeployBehavior::Succeed);
    let b = FakeProvider::new("b", DeployBehavior::Succeed);
    let m = manager(&[(0, a.clone()), (1, b)]);

    m.deploy(&sample_config()).await.unwrap();
    a.fail_destroy();

    let deployment = m.failover().await.unwrap();
    assert_eq!(deployment.provider, "b");
}

#[tokio::test]
async fn test_exhausted_failover_keeps_stale_record() {
    let a = FakeProvider::new("a", DeployBehavior::Succeed);
    let b = FakeProvider::new("b", DeployBehavior::Error);
    let m = manager(&[(0, a.clone()), (1, b)]);
    let mut events = m.subscribe();

    let stale = m.deploy(&sample_config()).await.unwrap();
    a.set_behavior(DeployBehavior::Error);

    assert!(matches!(m.failover().await, Err(AgentError::FailoverExhausted { attempts: 2, .. })));
    assert_eq!(a.destroy_count(), 1);
    assert_eq!(m.active_deployment().unwrap().id, stale.id);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_deploy_to_other_provider_emits_event() {
    let a = FakeProvider::new("a", DeployBehavior::Succeed);
    let b = FakeProvider::new("b", DeployBehavior::Succeed);
    let m = manager(&[(0, a), (1, b)]);
    let mut events = m.subscribe();

    // nothing was running before, so no move to announce
    m.deploy(&sample_config()).await.unwrap();
    assert!(events.try_recv().is_err());

    let deployment = m.deploy_to(1, &sample_config()).await.unwrap();
    let event = events.try_recv().unwrap();
    assert_eq!((event.from.as_str(), event.to.as_str()), ("a", "b"));
    assert_eq!(event.deployment_id, deployment.id);
}

#[tokio::test]
async fn test_failover_without_deployment() {
    let a = FakeProvider::new("a", DeployBehavior::Succeed);
    let m = manager(&[(0, a)]);
    assert!(matches!(m.failover().await, Err(AgentError::NoActiveDeployment)));
}

#[tokio::test]
async fn test_restore_attaches_to_owner() {
    let a = FakeProvider::new("a", DeployBehavior::Succeed);
    let b = FakeProvider::new("b", DeployBehavior::Succeed);
    let m = manager(&[(0, a.clone()), (1, b.clone())]);

    let deployment = b.deploy(&sample_config()).await.unwrap();
    m.restore(deployment.clone()).unwrap();

    assert_eq!(m.active_index(), 1);
    assert_eq!(b.attached.lock().unwrap().as_slice(), &[deployment.id]);
    assert!(a.attached.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_restore_unknown_provider() {
    let a = FakeProvider::new("a", DeployBehavior::Succeed);
    let stray = FakeProvider::new("gone", DeployBehavior::Succeed);
    let m = manager(&[(0, a)]);

    let deployment = stray.deploy(&sample_config()).await.unwrap();
    assert!(m.restore(deployment).is_err());
    assert!(m.active_deployment().is_none());
}

#[tokio::test]
async fn test_destroy_clears_active_deployment() {
    let a = FakeProvider::new("a", DeployBehavior::Succeed);
    let m = manager(&[(0, a.clone())]);

    m.deploy(&sample_config()).await.unwrap();
    m.destroy().await.unwrap();

    assert!(m.active_deployment().is_none());
    assert_eq!(a.destroy_count(), 1);
    assert!(matches!(m.destroy().await, Err(AgentError::NoActiveDeployment)));
}

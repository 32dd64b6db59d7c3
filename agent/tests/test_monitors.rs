//! Monitor and summary job tests

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{sample_config, DeployBehavior, FakeBalanceSource, FakePeers, FakeProvider, RecordingChannel};
use phoenix::actions::self_heal::{HealOutcome, SelfHealer};
use phoenix::actions::summarizer::{StatusSummarizer, SUMMARY_KEY};
use phoenix::alerts::notifier::Notifier;
use phoenix::alerts::Priority;
use phoenix::models::deployment::DeploymentStatus;
use phoenix::monitors::connectivity::{ConnectivityMonitor, ConnectivityReport};
use phoenix::monitors::external_balance::ExternalBalanceMonitor;
use phoenix::monitors::funding::FundingMonitor;
use phoenix::monitors::health::{HealthMonitor, HealthTick};
use phoenix::providers::manager::{ProviderEntry, ProviderManager};
use phoenix::providers::ComputeProvider;
use phoenix::storage::memory::{LocalStorage, Storage};

fn manager(providers: Vec<Arc<FakeProvider>>) -> Arc<ProviderManager> {
    let entries = providers
        .into_iter()
        .enumerate()
        .map(|(i, p)| ProviderEntry::new(i as u32, p))
        .collect();
    Arc::new(ProviderManager::new(entries).unwrap())
}

fn notifier(channel: &Arc<RecordingChannel>) -> Arc<Notifier> {
    Arc::new(Notifier::new(channel.clone()))
}

// =================================== HEALTH ===================================== //

#[tokio::test]
async fn test_health_skips_without_deployment() {
    let m = manager(vec![FakeProvider::new("akash", DeployBehavior::Succeed)]);
    let channel = RecordingChannel::new();
    let healer = Arc::new(SelfHealer::new(
        m.clone(),
        Arc::new(LocalStorage::in_memory()),
        notifier(&channel),
        5,
    ));
    let monitor = HealthMonitor::new(m, healer, 3);

    assert_eq!(monitor.check().await, HealthTick::NoDeployment);
}

#[tokio::test]
async fn test_three_failures_trigger_exactly_one_heal() {
    let akash = FakeProvider::new("akash", DeployBehavior::Succeed);
    let direct = FakeProvider::new("direct", DeployBehavior::Succeed);
    let m = manager(vec![akash.clone(), direct.clone()]);
    let channel = RecordingChannel::new();
    let healer = Arc::new(SelfHealer::new(
        m.clone(),
        Arc::new(LocalStorage::in_memory()),
        notifier(&channel),
        5,
    ));
    let monitor = HealthMonitor::new(m.clone(), healer, 3);

    m.deploy(&sample_config()).await.unwrap();
    akash.set_healthy(false);
    akash.set_behavior(DeployBehavior::Error);

    assert_eq!(monitor.check().await, HealthTick::Unhealthy { failures: 1 });
    assert_eq!(monitor.check().await, HealthTick::Unhealthy { failures: 2 });

    let tick = monitor.check().await;
    assert!(
        matches!(&tick, HealthTick::Healed(HealOutcome::Healed { provider, .. }) if provider == "direct"),
        "{:?}",
        tick
    );
    assert_eq!(monitor.consecutive_failures(), 0);
    assert_eq!(direct.deploy_count(), 1);
    assert_eq!(m.active_provider().name(), "direct");
    assert_eq!(channel.count_containing("Self-healed"), 1);

    // the new deployment is healthy, so no second heal
    assert_eq!(monitor.check().await, HealthTick::Healthy);
    assert_eq!(direct.deploy_count(), 1);
}

#[tokio::test]
async fn test_failed_heal_keeps_monitoring_until_exhausted() {
    let akash = FakeProvider::new("akash", DeployBehavior::Succeed);
    let direct = FakeProvider::new("direct", DeployBehavior::Succeed);
    let m = manager(vec![akash.clone(), direct.clone()]);
    let channel = RecordingChannel::new();
    let healer = Arc::new(SelfHealer::new(
        m.clone(),
        Arc::new(LocalStorage::in_memory()),
        notifier(&channel),
        2,
    ));
    let monitor = HealthMonitor::new(m.clone(), healer.clone(), 3);

    let stale = m.deploy(&sample_config()).await.unwrap();
    akash.set_healthy(false);
    akash.set_behavior(DeployBehavior::Error);
    direct.set_behavior(DeployBehavior::Error);

    let mut ticks = Vec::new();
    for _ in 0..9 {
        ticks.push(monitor.check().await);
    }

    assert_eq!(ticks[2], HealthTick::Healed(HealOutcome::Failed { attempt: 1, max_retries: 2 }));
    assert_eq!(ticks[5], HealthTick::Healed(HealOutcome::Failed { attempt: 2, max_retries: 2 }));
    assert_eq!(ticks[8], HealthTick::Healed(HealOutcome::Exhausted));
    assert!(!ticks.contains(&HealthTick::NoDeployment));

    assert_eq!(healer.retry_count(), 2);
    assert_eq!(m.active_deployment().map(|d| d.id), Some(stale.id));
    assert_eq!(channel.count_containing("max retries (2) exhausted"), 1);
}

#[tokio::test]
async fn test_heal_onto_another_provider_emits_failover_event() {
    let akash = FakeProvider::new("akash", DeployBehavior::Succeed);
    let direct = FakeProvider::new("direct", DeployBehavior::Succeed);
    let m = manager(vec![akash.clone(), direct.clone()]);
    let healer = SelfHealer::new(
        m.clone(),
        Arc::new(LocalStorage::in_memory()),
        notifier(&RecordingChannel::new()),
        3,
    );
    let mut events = m.subscribe();

    m.deploy(&sample_config()).await.unwrap();
    akash.set_behavior(DeployBehavior::Error);

    let outcome = healer.heal().await;

    let HealOutcome::Healed { deployment_id, .. } = outcome else {
        panic!("unexpected outcome: {:?}", outcome);
    };
    let event = events.try_recv().unwrap();
    assert_eq!(event.from, "akash");
    assert_eq!(event.to, "direct");
    assert_eq!(event.deployment_id, deployment_id);
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_heal_on_same_provider_emits_no_event() {
    let akash = FakeProvider::new("akash", DeployBehavior::Succeed);
    let m = manager(vec![akash]);
    let healer = SelfHealer::new(
        m.clone(),
        Arc::new(LocalStorage::in_memory()),
        notifier(&RecordingChannel::new()),
        3,
    );
    let mut events = m.subscribe();

    m.deploy(&sample_config()).await.unwrap();
    assert!(matches!(healer.heal().await, HealOutcome::Healed { .. }));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_healthy_check_resets_counter() {
    let akash = FakeProvider::new("akash", DeployBehavior::Succeed);
    let m = manager(vec![akash.clone()]);
    let channel = RecordingChannel::new();
    let healer = Arc::new(SelfHealer::new(
        m.clone(),
        Arc::new(LocalStorage::in_memory()),
        notifier(&channel),
        5,
    ));
    let monitor = HealthMonitor::new(m.clone(), healer, 3);
    m.deploy(&sample_config()).await.unwrap();

    akash.set_healthy(false);
    monitor.check().await;
    monitor.check().await;
    akash.set_healthy(true);
    assert_eq!(monitor.check().await, HealthTick::Healthy);
    assert_eq!(monitor.consecutive_failures(), 0);

    akash.set_healthy(false);
    assert_eq!(monitor.check().await, HealthTick::Unhealthy { failures: 1 });
    assert_eq!(akash.deploy_count(), 1);
}

// ================================== FUNDING ===================================== //

#[tokio::test]
async fn test_low_balance_alerts_high() {
    let akash = FakeProvider::new("akash", DeployBehavior::Succeed);
    akash.set_balance(1.5);
    let channel = RecordingChannel::new();
    let monitor = FundingMonitor::new(manager(vec![akash]), notifier(&channel), 5.0);

    let balance = monitor.check().await.unwrap().unwrap();

    assert_eq!(balance.amount, 1.5);
    let alerts = channel.messages();
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].0.starts_with("Low balance on akash"));
    assert_eq!(alerts[0].1, Priority::High);
}

#[tokio::test]
async fn test_sufficient_balance_is_quiet() {
    let akash = FakeProvider::new("akash", DeployBehavior::Succeed);
    let channel = RecordingChannel::new();
    let monitor = FundingMonitor::new(manager(vec![akash]), notifier(&channel), 5.0);

    assert!(monitor.check().await.unwrap().is_some());
    assert!(channel.messages().is_empty());
}

#[tokio::test]
async fn test_unmetered_provider_is_skipped() {
    let direct = FakeProvider::unmetered("direct", DeployBehavior::Succeed);
    direct.set_balance(0.0);
    let channel = RecordingChannel::new();
    let monitor = FundingMonitor::new(manager(vec![direct]), notifier(&channel), 5.0);

    assert!(monitor.check().await.unwrap().is_none());
    assert!(channel.messages().is_empty());
}

// =============================== CONNECTIVITY =================================== //

#[tokio::test]
async fn test_enough_peers_does_not_reconnect() {
    let peers = FakePeers::new(3, 3);
    let monitor = ConnectivityMonitor::new(peers.clone(), 1);

    let report = monitor.check().await.unwrap();

    assert_eq!(report, ConnectivityReport { before: 3, after: None });
    assert_eq!(peers.reconnects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_too_few_peers_reconnects() {
    let peers = FakePeers::new(0, 4);
    let monitor = ConnectivityMonitor::new(peers.clone(), 2);

    let report = monitor.check().await.unwrap();

    assert_eq!(report, ConnectivityReport { before: 0, after: Some(4) });
    assert_eq!(peers.reconnects.load(Ordering::SeqCst), 1);
}

// ============================= EXTERNAL BALANCE ================================= //

#[tokio::test]
async fn test_external_balance_threshold() {
    let source = FakeBalanceSource::new(20.0);
    let channel = RecordingChannel::new();
    let monitor = ExternalBalanceMonitor::new(source.clone(), notifier(&channel), 10.0);

    assert_eq!(monitor.check().await.unwrap(), 20.0);
    assert!(channel.messages().is_empty());

    *source.amount.lock().unwrap() = 2.0;
    assert_eq!(monitor.check().await.unwrap(), 2.0);
    assert_eq!(channel.count_containing("Low openai balance: 2"), 1);
}

// ================================== SUMMARY ===================================== //

#[tokio::test]
async fn test_summary_is_stored_and_sent() {
    let akash = FakeProvider::new("akash", DeployBehavior::Succeed);
    let m = manager(vec![akash]);
    let deployment = m.deploy(&sample_config()).await.unwrap();
    let storage = Arc::new(LocalStorage::in_memory());
    let channel = RecordingChannel::new();
    let summarizer = StatusSummarizer::new(m, storage.clone(), notifier(&channel));

    let summary = summarizer.run().await.unwrap();

    assert_eq!(summary.status, DeploymentStatus::Running);
    assert_eq!(summary.deployment_id.as_deref(), Some(deployment.id.as_str()));
    let stored = storage.get(SUMMARY_KEY).await.unwrap().unwrap();
    assert_eq!(stored["provider"], "akash");
    let alerts = channel.messages();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].1, Priority::Low);
    assert!(alerts[0].0.starts_with("Status: running on akash"));
}

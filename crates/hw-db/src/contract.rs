//! Behaviour every `Repository` backend must share.

use std::time::Duration;

use crate::Repository;
use crate::models::{InstanceState, LifecycleAction, Transition};

pub(crate) fn action(transition: Transition, instance_id: &str) -> LifecycleAction {
    LifecycleAction {
        transition,
        instance_id: instance_id.into(),
        auto_scaling_group_name: "my-asg".into(),
        lifecycle_hook_name: "huzzah-9001".into(),
        lifecycle_action_token: "TOKEYTOKETOK".into(),
        completed: false,
    }
}

/// Store an event, then wait long enough that the next one sorts after it.
async fn record(repo: &dyn Repository, instance_id: &str, event: &str) {
    repo.store_instance_event(instance_id, event).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
}

pub(crate) async fn run_all(repo: &dyn Repository) {
    blank_instance_ids_are_rejected(repo).await;
    state_round_trip(repo).await;
    events_are_sorted_and_overwritten(repo).await;
    events_for_all_instances(repo).await;
    lifecycle_action_round_trip(repo).await;
    incomplete_lifecycle_action_is_rejected(repo).await;
    tokens(repo).await;
    temp_token_exchange_is_single_use(repo).await;
}

async fn blank_instance_ids_are_rejected(repo: &dyn Repository) {
    for id in ["", "   "] {
        assert!(repo.set_instance_state(id, InstanceState::Up).await.unwrap_err().is_validation());
        assert!(repo.fetch_instance_state(id).await.unwrap_err().is_validation());
        assert!(repo.wipe_instance_state(id).await.unwrap_err().is_validation());
        assert!(repo.store_instance_event(id, "heartbeat").await.unwrap_err().is_validation());
        assert!(repo.fetch_instance_events(id).await.unwrap_err().is_validation());
        assert!(repo.store_instance_token(id, "t").await.unwrap_err().is_validation());
        assert!(repo.fetch_instance_token(id).await.unwrap_err().is_validation());
        assert!(repo.store_temp_instance_token(id, "t").await.unwrap_err().is_validation());
        assert!(repo.fetch_temp_instance_token(id).await.unwrap_err().is_validation());
        assert!(repo.exchange_temp_instance_token(id).await.unwrap_err().is_validation());
        assert!(
            repo.fetch_instance_lifecycle_action(Transition::Launching, id)
                .await
                .unwrap_err()
                .is_validation()
        );
        assert!(
            repo.complete_instance_lifecycle_action(Transition::Launching, id)
                .await
                .unwrap_err()
                .is_validation()
        );
    }
    assert!(repo.store_instance_event("i-blank", "").await.unwrap_err().is_validation());
    assert!(repo.store_instance_token("i-blank", "").await.unwrap_err().is_validation());
    assert!(repo.store_temp_instance_token("i-blank", " ").await.unwrap_err().is_validation());
}

async fn state_round_trip(repo: &dyn Repository) {
    let id = "i-state";
    assert!(repo.fetch_instance_state(id).await.unwrap_err().is_not_found());

    repo.set_instance_state(id, InstanceState::Up).await.unwrap();
    assert_eq!(repo.fetch_instance_state(id).await.unwrap(), InstanceState::Up);

    repo.set_instance_state(id, InstanceState::Down).await.unwrap();
    assert_eq!(repo.fetch_instance_state(id).await.unwrap(), InstanceState::Down);

    repo.wipe_instance_state(id).await.unwrap();
    assert!(repo.fetch_instance_state(id).await.unwrap_err().is_not_found());
    repo.wipe_instance_state(id).await.unwrap();
}

async fn events_are_sorted_and_overwritten(repo: &dyn Repository) {
    let id = "i-events";
    assert!(repo.fetch_instance_events(id).await.unwrap().is_empty());

    record(repo, id, "prelaunching").await;
    record(repo, id, "heartbeat").await;
    record(repo, id, "launching").await;

    let events = repo.fetch_instance_events(id).await.unwrap();
    let names: Vec<_> = events.iter().map(|e| e.event.as_str()).collect();
    assert_eq!(names, ["prelaunching", "heartbeat", "launching"]);
    assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    // Re-recording an event moves it to the end rather than duplicating it.
    record(repo, id, "heartbeat").await;
    let names: Vec<_> = repo
        .fetch_instance_events(id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.event)
        .collect();
    assert_eq!(names, ["prelaunching", "launching", "heartbeat"]);
}

async fn events_for_all_instances(repo: &dyn Repository) {
    repo.store_instance_event("i-all-a", "prelaunching").await.unwrap();
    record(repo, "i-all-b", "preterminating").await;
    record(repo, "i-all-b", "terminating").await;

    let all = repo.fetch_all_instance_events().await.unwrap();
    assert_eq!(all["i-all-a"].len(), 1);
    assert_eq!(all["i-all-b"].len(), 2);
    assert_eq!(all["i-all-b"][0].event, "preterminating");
}

async fn lifecycle_action_round_trip(repo: &dyn Repository) {
    let id = "i-action";
    assert_eq!(
        repo.fetch_instance_lifecycle_action(Transition::Terminating, id)
            .await
            .unwrap(),
        None
    );
    assert!(
        repo.complete_instance_lifecycle_action(Transition::Terminating, id)
            .await
            .unwrap_err()
            .is_not_found()
    );

    let stored = action(Transition::Terminating, id);
    repo.store_instance_lifecycle_action(&stored).await.unwrap();
    assert_eq!(
        repo.fetch_instance_lifecycle_action(Transition::Terminating, id)
            .await
            .unwrap(),
        Some(stored.clone())
    );
    // The other direction is a separate record.
    assert_eq!(
        repo.fetch_instance_lifecycle_action(Transition::Launching, id)
            .await
            .unwrap(),
        None
    );

    repo.complete_instance_lifecycle_action(Transition::Terminating, id)
        .await
        .unwrap();
    let completed = repo
        .fetch_instance_lifecycle_action(Transition::Terminating, id)
        .await
        .unwrap()
        .unwrap();
    assert!(completed.completed);

    // A redelivered notification refreshes the correlation fields but never
    // reopens a completed action.
    let redelivered = LifecycleAction {
        lifecycle_action_token: "NEWTOKEN".into(),
        ..stored.clone()
    };
    repo.store_instance_lifecycle_action(&redelivered).await.unwrap();
    let fetched = repo
        .fetch_instance_lifecycle_action(Transition::Terminating, id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.lifecycle_action_token, "NEWTOKEN");
    assert!(fetched.completed);

    // A fresh record always starts pending, whatever the caller passes.
    repo.store_instance_lifecycle_action(&LifecycleAction {
        completed: true,
        ..action(Transition::Launching, id)
    })
    .await
    .unwrap();
    let fresh = repo
        .fetch_instance_lifecycle_action(Transition::Launching, id)
        .await
        .unwrap()
        .unwrap();
    assert!(!fresh.completed);
}

async fn incomplete_lifecycle_action_is_rejected(repo: &dyn Repository) {
    let id = "i-incomplete";
    let err = repo
        .store_instance_lifecycle_action(&LifecycleAction {
            auto_scaling_group_name: String::new(),
            ..action(Transition::Launching, id)
        })
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(
        err.to_string()
            .starts_with("missing required fields in lifecycle action")
    );
    assert_eq!(
        repo.fetch_instance_lifecycle_action(Transition::Launching, id)
            .await
            .unwrap(),
        None
    );
}

async fn tokens(repo: &dyn Repository) {
    let id = "i-tokens";
    assert_eq!(repo.fetch_instance_token(id).await.unwrap(), None);
    assert_eq!(repo.fetch_temp_instance_token(id).await.unwrap(), None);

    repo.store_instance_token(id, "persistent").await.unwrap();
    repo.store_temp_instance_token(id, "temporary").await.unwrap();
    assert_eq!(repo.fetch_instance_token(id).await.unwrap().as_deref(), Some("persistent"));
    assert_eq!(repo.fetch_temp_instance_token(id).await.unwrap().as_deref(), Some("temporary"));
    // Reads do not consume.
    assert_eq!(repo.fetch_instance_token(id).await.unwrap().as_deref(), Some("persistent"));
    assert_eq!(repo.fetch_temp_instance_token(id).await.unwrap().as_deref(), Some("temporary"));
}

async fn temp_token_exchange_is_single_use(repo: &dyn Repository) {
    let id = "i-exchange";
    assert!(repo.exchange_temp_instance_token(id).await.unwrap_err().is_not_found());

    repo.store_temp_instance_token(id, "abc123").await.unwrap();
    assert_eq!(repo.exchange_temp_instance_token(id).await.unwrap(), "abc123");

    assert_eq!(repo.fetch_temp_instance_token(id).await.unwrap(), None);
    assert_eq!(repo.fetch_instance_token(id).await.unwrap().as_deref(), Some("abc123"));

    let err = repo.exchange_temp_instance_token(id).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "no token for instance 'i-exchange'");
}

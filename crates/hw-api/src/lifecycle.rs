//! Lifecycle hook state machine.
//!
//! Per (transition, instance) an action moves none → pending → completed.
//! A notification records the pending action; the instance's confirmation
//! completes it against the autoscaler exactly once per pending record.

use hw_db::models::generate_token;
use hw_db::{InstanceState, LifecycleAction, Transition};
use hw_infra::CompleteLifecycleAction;
use tracing::{info, warn};

use crate::dto::LifecycleMessage;
use crate::error::ApiError;
use crate::state::AppState;

pub const TEST_NOTIFICATION: &str = "autoscaling:TEST_NOTIFICATION";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    TestAccepted,
    Recorded(Transition),
}

/// Record the pending action carried by a notification's `Message`.
///
/// The writes are independent: a failure midway is returned without
/// undoing the earlier ones. A redelivered notification overwrites the
/// same keys.
pub async fn handle_notification(state: &AppState, raw: &str) -> Result<NotificationOutcome, ApiError> {
    let message: LifecycleMessage = serde_json::from_str(raw)
        .map_err(|e| ApiError::BadRequest(format!("invalid lifecycle message: {e}")))?;

    if message.event == TEST_NOTIFICATION {
        info!("test notification received");
        return Ok(NotificationOutcome::TestAccepted);
    }

    if message.lifecycle_transition.trim().is_empty() {
        return Err(ApiError::BadRequest(format!(
            "missing required fields in lifecycle action: LifecycleTransition (instance '{}')",
            message.instance_id
        )));
    }
    let transition = Transition::from_hook(&message.lifecycle_transition).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "unknown lifecycle transition '{}'",
            message.lifecycle_transition
        ))
    })?;

    let action = LifecycleAction {
        transition,
        instance_id: message.instance_id,
        auto_scaling_group_name: message.auto_scaling_group_name,
        lifecycle_hook_name: message.lifecycle_hook_name,
        lifecycle_action_token: message.lifecycle_action_token,
        completed: false,
    };
    let repo = &state.repo;
    let instance_id = action.instance_id.as_str();

    repo.store_instance_lifecycle_action(&action).await?;

    match transition {
        Transition::Launching => {
            repo.store_temp_instance_token(instance_id, &generate_token())
                .await?;
            repo.set_instance_state(instance_id, InstanceState::Up).await?;
        }
        Transition::Terminating => {
            repo.set_instance_state(instance_id, InstanceState::Down)
                .await?;
        }
    }
    repo.store_instance_event(instance_id, transition.pre_event())
        .await?;

    info!(
        instance_id,
        transition = %transition,
        group = %action.auto_scaling_group_name,
        "lifecycle action recorded"
    );
    Ok(NotificationOutcome::Recorded(transition))
}

/// Complete the pending action for `transition` once the instance reports
/// it is done. Confirming an already-completed action succeeds without
/// calling the autoscaler again.
pub async fn confirm_transition(
    state: &AppState,
    transition: Transition,
    instance_id: &str,
) -> Result<(), ApiError> {
    let repo = &state.repo;
    let action = repo
        .fetch_instance_lifecycle_action(transition, instance_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "no pending {transition} transition for instance '{instance_id}'"
            ))
        })?;

    if action.completed {
        info!(instance_id, transition = %transition, "lifecycle action already completed");
        return Ok(());
    }

    let autoscaling = &state.providers.autoscaling;
    if transition == Transition::Terminating && state.config.detach_on_terminate {
        autoscaling
            .detach_instance(&action.auto_scaling_group_name, instance_id, true)
            .await?;
    } else {
        autoscaling
            .complete_lifecycle_action(&CompleteLifecycleAction {
                auto_scaling_group_name: action.auto_scaling_group_name.clone(),
                lifecycle_hook_name: action.lifecycle_hook_name.clone(),
                lifecycle_action_token: action.lifecycle_action_token.clone(),
                instance_id: instance_id.to_string(),
            })
            .await?;
    }

    if let Err(e) = repo
        .complete_instance_lifecycle_action(transition, instance_id)
        .await
    {
        warn!(instance_id, transition = %transition, error = %e, "failed to mark lifecycle action completed");
    }

    match transition {
        Transition::Launching => {
            repo.set_instance_state(instance_id, InstanceState::Up).await?;
        }
        Transition::Terminating => {
            repo.wipe_instance_state(instance_id).await?;
        }
    }
    repo.store_instance_event(instance_id, transition.completion_event())
        .await?;

    info!(instance_id, transition = %transition, "lifecycle action completed");
    Ok(())
}

/// Response text for a confirmed transition.
pub fn completion_message(transition: Transition) -> &'static str {
    match transition {
        Transition::Launching => "instance launch complete",
        Transition::Terminating => "instance termination complete",
    }
}

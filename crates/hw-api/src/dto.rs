use std::collections::BTreeMap;

use hw_db::{InstanceState, LifecycleEvent};
use serde::{Deserialize, Serialize};

// ── Requests ───────────────────────────────────────────────────────

/// Lifecycle action embedded in a notification's `Message`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LifecycleMessage {
    #[serde(rename = "LifecycleTransition")]
    pub lifecycle_transition: String,
    #[serde(rename = "EC2InstanceId")]
    pub instance_id: String,
    #[serde(rename = "LifecycleActionToken")]
    pub lifecycle_action_token: String,
    #[serde(rename = "AutoScalingGroupName")]
    pub auto_scaling_group_name: String,
    #[serde(rename = "LifecycleHookName")]
    pub lifecycle_hook_name: String,
    #[serde(rename = "Event")]
    pub event: String,
}

// ── Responses ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct StateResponse {
    pub state: InstanceState,
}

#[derive(Debug, Serialize)]
pub struct InstanceEventsResponse {
    pub events: Vec<LifecycleEvent>,
    #[serde(rename = "@instance_id")]
    pub instance_id: String,
}

#[derive(Debug, Serialize)]
pub struct AllEventsResponse {
    pub events: BTreeMap<String, Vec<LifecycleEvent>>,
    #[serde(rename = "@total")]
    pub total: usize,
}

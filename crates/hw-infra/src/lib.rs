pub mod aws;

use std::sync::Arc;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("aws {operation} failed: {message}")]
    Aws {
        operation: &'static str,
        message: String,
    },
}

impl Error {
    /// Flatten an SDK error, including its source chain, into an `Aws` error.
    pub fn aws(operation: &'static str, err: impl std::error::Error) -> Self {
        Self::Aws {
            operation,
            message: aws_sdk_autoscaling::error::DisplayErrorContext(err).to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Correlation fields needed to let a paused lifecycle hook proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteLifecycleAction {
    pub auto_scaling_group_name: String,
    pub lifecycle_hook_name: String,
    pub lifecycle_action_token: String,
    pub instance_id: String,
}

/// The autoscaling operations the lifecycle engine depends on.
#[async_trait]
pub trait AutoScaling: Send + Sync + 'static {
    /// Tell the autoscaler the hook is done and the instance may proceed.
    async fn complete_lifecycle_action(&self, action: &CompleteLifecycleAction) -> Result<()>;

    /// Remove an instance from the group's membership.
    async fn detach_instance(
        &self,
        auto_scaling_group_name: &str,
        instance_id: &str,
        decrement_desired_capacity: bool,
    ) -> Result<()>;
}

/// The notification-provider operations used by the webhook.
#[async_trait]
pub trait Notifications: Send + Sync + 'static {
    async fn confirm_subscription(&self, topic_arn: &str, token: &str) -> Result<()>;
}

/// The external collaborators, built once at startup.
#[derive(Clone)]
pub struct Providers {
    pub autoscaling: Arc<dyn AutoScaling>,
    pub notifications: Arc<dyn Notifications>,
}

/// Build the AWS-backed providers for `region`. Credentials come from the
/// SDK's default chain (environment, profile, instance or task role) and
/// are resolved on first use.
pub async fn build_providers(region: &str) -> Providers {
    let config = aws::load_config(region).await;
    tracing::info!(region, "registered AWS autoscaling and notification providers");
    aws::providers(&config)
}

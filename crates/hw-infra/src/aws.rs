use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use tracing::info;

use crate::{AutoScaling, CompleteLifecycleAction, Error, Notifications, Providers, Result};

const OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Let the paused instance proceed with its launch or termination.
const LIFECYCLE_CONTINUE: &str = "CONTINUE";

pub async fn load_config(region: &str) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(region.to_string()))
        .timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(OPERATION_TIMEOUT)
                .build(),
        )
        .load()
        .await
}

pub fn providers(config: &SdkConfig) -> Providers {
    Providers {
        autoscaling: Arc::new(AwsAutoScaling::new(config)),
        notifications: Arc::new(AwsNotifications::new(config)),
    }
}

/// Auto Scaling provider backed by `aws_sdk_autoscaling`.
pub struct AwsAutoScaling {
    client: aws_sdk_autoscaling::Client,
}

impl AwsAutoScaling {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_autoscaling::Client::new(config),
        }
    }
}

#[async_trait]
impl AutoScaling for AwsAutoScaling {
    async fn complete_lifecycle_action(&self, action: &CompleteLifecycleAction) -> Result<()> {
        self.client
            .complete_lifecycle_action()
            .auto_scaling_group_name(&action.auto_scaling_group_name)
            .lifecycle_hook_name(&action.lifecycle_hook_name)
            .lifecycle_action_token(&action.lifecycle_action_token)
            .instance_id(&action.instance_id)
            .lifecycle_action_result(LIFECYCLE_CONTINUE)
            .send()
            .await
            .map_err(|e| Error::aws("CompleteLifecycleAction", e))?;
        info!(
            instance_id = %action.instance_id,
            group = %action.auto_scaling_group_name,
            "aws: lifecycle action completed"
        );
        Ok(())
    }

    async fn detach_instance(
        &self,
        auto_scaling_group_name: &str,
        instance_id: &str,
        decrement_desired_capacity: bool,
    ) -> Result<()> {
        self.client
            .detach_instances()
            .auto_scaling_group_name(auto_scaling_group_name)
            .instance_ids(instance_id)
            .should_decrement_desired_capacity(decrement_desired_capacity)
            .send()
            .await
            .map_err(|e| Error::aws("DetachInstances", e))?;
        info!(instance_id, group = auto_scaling_group_name, "aws: instance detached");
        Ok(())
    }
}

/// SNS provider backed by `aws_sdk_sns`.
pub struct AwsNotifications {
    client: aws_sdk_sns::Client,
}

impl AwsNotifications {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_sns::Client::new(config),
        }
    }
}

#[async_trait]
impl Notifications for AwsNotifications {
    async fn confirm_subscription(&self, topic_arn: &str, token: &str) -> Result<()> {
        self.client
            .confirm_subscription()
            .topic_arn(topic_arn)
            .token(token)
            .send()
            .await
            .map_err(|e| Error::aws("ConfirmSubscription", e))?;
        info!(topic_arn, "aws: subscription confirmed");
        Ok(())
    }
}

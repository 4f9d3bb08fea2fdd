use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use hw_db::{MemoryRepository, Retention};
use hw_infra::{AutoScaling, CompleteLifecycleAction, Notifications, Providers};
use tower::ServiceExt;

use crate::config::AppConfig;
use crate::routes::api_router;
use crate::sns::SnsVerifier;
use crate::state::AppState;

pub const OPERATOR_TOKEN: &str = "operator-secret";

fn upstream_failure(operation: &'static str) -> hw_infra::Error {
    hw_infra::Error::Aws {
        operation,
        message: "service error: ServiceUnavailable: Rate exceeded".into(),
    }
}

#[derive(Default)]
pub struct MockAutoScaling {
    pub completed: Mutex<Vec<CompleteLifecycleAction>>,
    pub detached: Mutex<Vec<(String, String, bool)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl AutoScaling for MockAutoScaling {
    async fn complete_lifecycle_action(&self, action: &CompleteLifecycleAction) -> hw_infra::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(upstream_failure("CompleteLifecycleAction"));
        }
        self.completed.lock().unwrap().push(action.clone());
        Ok(())
    }

    async fn detach_instance(
        &self,
        auto_scaling_group_name: &str,
        instance_id: &str,
        decrement_desired_capacity: bool,
    ) -> hw_infra::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(upstream_failure("DetachInstances"));
        }
        self.detached.lock().unwrap().push((
            auto_scaling_group_name.to_string(),
            instance_id.to_string(),
            decrement_desired_capacity,
        ));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockNotifications {
    pub confirmed: Mutex<Vec<(String, String)>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl Notifications for MockNotifications {
    async fn confirm_subscription(&self, topic_arn: &str, token: &str) -> hw_infra::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(upstream_failure("ConfirmSubscription"));
        }
        self.confirmed
            .lock()
            .unwrap()
            .push((topic_arn.to_string(), token.to_string()));
        Ok(())
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: crate::config::MEMORY_DATABASE_URL.into(),
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        auth_tokens: vec!["other-operator".into(), OPERATOR_TOKEN.into()],
        aws_region: "us-east-1".into(),
        sns_verify: false,
        detach_on_terminate: false,
        retention: Retention::default(),
        sweep_interval: Duration::from_secs(300),
    }
}

/// App state over an in-memory repository and recording mocks.
pub struct Harness {
    pub state: AppState,
    pub app: Router,
    pub repo: Arc<MemoryRepository>,
    pub autoscaling: Arc<MockAutoScaling>,
    pub notifications: Arc<MockNotifications>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut config = test_config();
        adjust(&mut config);
        let verifier = SnsVerifier::new(config.sns_verify, &config.aws_region);
        Self::build(config, verifier)
    }

    /// Verify signatures, fetching certificates from `origin` only.
    pub fn trusting_certificates_from(origin: &str) -> Self {
        let mut config = test_config();
        config.sns_verify = true;
        let verifier = SnsVerifier::new(true, &config.aws_region).trusting_origin(origin);
        Self::build(config, verifier)
    }

    fn build(config: AppConfig, verifier: SnsVerifier) -> Self {
        let repo = Arc::new(MemoryRepository::new(config.retention));
        let autoscaling = Arc::new(MockAutoScaling::default());
        let notifications = Arc::new(MockNotifications::default());
        let state = AppState {
            repo: repo.clone(),
            providers: Providers {
                autoscaling: autoscaling.clone(),
                notifications: notifications.clone(),
            },
            verifier,
            config,
        };

        Self {
            app: api_router(state.clone()),
            state,
            repo,
            autoscaling,
            notifications,
        }
    }

    /// Send one request and return the status and parsed JSON body (or
    /// `Null` for an empty or non-JSON body).
    pub async fn send(&self, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let (status, _, body) = self.send_raw(req).await;
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    pub async fn send_raw(&self, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.into_body().collect().await.unwrap().to_bytes().to_vec();
        (status, headers, body)
    }
}

pub fn lifecycle_message(transition: &str, instance_id: &str) -> String {
    serde_json::json!({
        "AutoScalingGroupName": "my-asg",
        "EC2InstanceId": instance_id,
        "LifecycleActionToken": "TOKEYTOKETOK",
        "LifecycleHookName": "huzzah-9001",
        "LifecycleTransition": transition,
    })
    .to_string()
}

pub fn launching_message(instance_id: &str) -> String {
    lifecycle_message("autoscaling:EC2_INSTANCE_LAUNCHING", instance_id)
}

pub fn terminating_message(instance_id: &str) -> String {
    lifecycle_message("autoscaling:EC2_INSTANCE_TERMINATING", instance_id)
}

/// Unsigned envelope of the given type wrapping `message`.
pub fn envelope(kind: &str, message: &str) -> String {
    serde_json::json!({
        "Type": kind,
        "MessageId": "a8d0ed2d-5e4b-5b8c-8c3c-2f2e0c2f1e7a",
        "TopicArn": "arn:aws:sns:us-east-1:999999999999:toaster-pastries",
        "Token": "fafafaf",
        "Message": message,
        "Timestamp": "2024-03-01T10:00:00.000Z",
    })
    .to_string()
}

pub fn sns_request(body: String) -> Request<Body> {
    Request::post("/sns")
        .header("content-type", "text/plain; charset=UTF-8")
        .body(Body::from(body))
        .unwrap()
}

pub fn authed(method: &str, uri: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("token {token}"))
        .body(Body::empty())
        .unwrap()
}

pub mod memory;
pub mod models;
pub mod postgres;

#[cfg(test)]
mod contract;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

pub use memory::MemoryRepository;
pub use models::{InstanceState, LifecycleAction, LifecycleEvent, Transition};
pub use postgres::PgRepository;

/// Create a connection pool to PostgreSQL.
pub async fn create_pool(database_url: &str) -> std::result::Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
}

/// Run embedded migrations.
pub async fn run_migrations(pool: &PgPool) -> std::result::Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("empty instance id")]
    EmptyInstanceId,

    #[error("empty token")]
    EmptyToken,

    #[error("empty event name")]
    EmptyEvent,

    #[error("missing required fields in lifecycle action: {} ({action})", .missing.join(", "))]
    IncompleteLifecycleAction {
        missing: Vec<&'static str>,
        action: String,
    },

    #[error("no {what} for instance '{instance_id}'")]
    NotFound {
        what: &'static str,
        instance_id: String,
    },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    /// The caller supplied something malformed.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyInstanceId
                | Self::EmptyToken
                | Self::EmptyEvent
                | Self::IncompleteLifecycleAction { .. }
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// How long each kind of record lives after its last write (or read, for
/// persistent tokens).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retention {
    pub instance_events: Duration,
    pub lifecycle_actions: Duration,
    pub instance_tokens: Duration,
    pub temp_instance_tokens: Duration,
}

impl Default for Retention {
    fn default() -> Self {
        const HOUR: u64 = 60 * 60;
        const DAY: u64 = 24 * HOUR;
        Self {
            instance_events: Duration::from_secs(7 * DAY),
            lifecycle_actions: Duration::from_secs(2 * DAY),
            instance_tokens: Duration::from_secs(2 * DAY),
            temp_instance_tokens: Duration::from_secs(HOUR),
        }
    }
}

/// Per-instance state, events, pending lifecycle actions and tokens.
///
/// Every operation taking an instance id rejects an empty or blank id
/// before touching storage.
#[async_trait]
pub trait Repository: Send + Sync + 'static {
    async fn set_instance_state(&self, instance_id: &str, state: InstanceState) -> Result<()>;

    /// Fails with [`Error::NotFound`] when no state is recorded.
    async fn fetch_instance_state(&self, instance_id: &str) -> Result<InstanceState>;

    async fn wipe_instance_state(&self, instance_id: &str) -> Result<()>;

    /// Record `event` at the current time and refresh the expiry of all of
    /// the instance's events.
    async fn store_instance_event(&self, instance_id: &str, event: &str) -> Result<()>;

    /// Oldest first. An instance without events yields an empty list.
    async fn fetch_instance_events(&self, instance_id: &str) -> Result<Vec<LifecycleEvent>>;

    async fn fetch_all_instance_events(&self) -> Result<BTreeMap<String, Vec<LifecycleEvent>>>;

    /// Store (or replace) the pending action for its transition and
    /// instance, with `completed` reset to false.
    async fn store_instance_lifecycle_action(&self, action: &LifecycleAction) -> Result<()>;

    async fn fetch_instance_lifecycle_action(
        &self,
        transition: Transition,
        instance_id: &str,
    ) -> Result<Option<LifecycleAction>>;

    async fn complete_instance_lifecycle_action(
        &self,
        transition: Transition,
        instance_id: &str,
    ) -> Result<()>;

    async fn store_instance_token(&self, instance_id: &str, token: &str) -> Result<()>;

    /// Reading the persistent token extends its lifetime.
    async fn fetch_instance_token(&self, instance_id: &str) -> Result<Option<String>>;

    async fn store_temp_instance_token(&self, instance_id: &str, token: &str) -> Result<()>;

    async fn fetch_temp_instance_token(&self, instance_id: &str) -> Result<Option<String>>;

    /// Atomically move the temp token into the persistent slot and return
    /// it. A second exchange finds nothing.
    async fn exchange_temp_instance_token(&self, instance_id: &str) -> Result<String>;

    /// Delete expired records, returning how many were removed.
    async fn purge_expired(&self) -> Result<u64>;
}

pub(crate) fn require_instance_id(instance_id: &str) -> Result<()> {
    if instance_id.trim().is_empty() {
        return Err(Error::EmptyInstanceId);
    }
    Ok(())
}

pub(crate) fn require_token(token: &str) -> Result<()> {
    if token.trim().is_empty() {
        return Err(Error::EmptyToken);
    }
    Ok(())
}

pub(crate) fn require_event(event: &str) -> Result<()> {
    if event.trim().is_empty() {
        return Err(Error::EmptyEvent);
    }
    Ok(())
}

pub(crate) fn validate_action(action: &LifecycleAction) -> Result<()> {
    let missing = action.missing_fields();
    if !missing.is_empty() {
        return Err(Error::IncompleteLifecycleAction {
            missing,
            action: format!(
                "{} instance '{}' group '{}' hook '{}'",
                action.transition,
                action.instance_id,
                action.auto_scaling_group_name,
                action.lifecycle_hook_name
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn malformed_database_url_is_a_connect_error() {
        let err = create_pool("not a database url").await.unwrap_err();
        assert!(matches!(err, sqlx::Error::Configuration(_)), "{err}");
    }

    #[test]
    fn default_retention() {
        let r = Retention::default();
        assert_eq!(r.instance_events, Duration::from_secs(604_800));
        assert_eq!(r.lifecycle_actions, Duration::from_secs(172_800));
        assert_eq!(r.instance_tokens, Duration::from_secs(172_800));
        assert_eq!(r.temp_instance_tokens, Duration::from_secs(3_600));
    }

    #[test]
    fn incomplete_action_error_names_the_action() {
        let err = validate_action(&LifecycleAction {
            transition: Transition::Terminating,
            instance_id: "i-fafafaf".into(),
            auto_scaling_group_name: "workers".into(),
            lifecycle_hook_name: String::new(),
            lifecycle_action_token: "TOKEYTOKETOK".into(),
            completed: false,
        })
        .unwrap_err();

        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            "missing required fields in lifecycle action: lifecycle_hook_name \
             (terminating instance 'i-fafafaf' group 'workers' hook '')"
        );
    }

    #[test]
    fn error_classes() {
        assert!(Error::EmptyInstanceId.is_validation());
        let nf = Error::NotFound {
            what: "state",
            instance_id: "i-1".into(),
        };
        assert!(nf.is_not_found());
        assert!(!nf.is_validation());
        assert_eq!(nf.to_string(), "no state for instance 'i-1'");
    }
}

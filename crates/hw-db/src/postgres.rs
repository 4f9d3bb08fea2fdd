use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use crate::models::{
    InstanceState, LifecycleAction, LifecycleEvent, TokenKind, Transition, format_timestamp,
    sort_events,
};
use crate::{
    Error, Repository, Result, Retention, require_event, require_instance_id, require_token,
    validate_action,
};

/// Repository backed by the Postgres pool. Expiry is an `expires_at`
/// column compared against the database clock; expired rows are ignored by
/// reads and removed by [`Repository::purge_expired`].
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
    retention: Retention,
}

impl PgRepository {
    pub fn new(pool: PgPool, retention: Retention) -> Self {
        Self { pool, retention }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn secs(ttl: Duration) -> f64 {
    ttl.as_secs_f64()
}

#[async_trait]
impl Repository for PgRepository {
    async fn set_instance_state(&self, instance_id: &str, state: InstanceState) -> Result<()> {
        require_instance_id(instance_id)?;
        sqlx::query(
            r#"INSERT INTO instance_states (instance_id, state) VALUES ($1, $2)
               ON CONFLICT (instance_id) DO UPDATE SET state = EXCLUDED.state, updated_at = now()"#,
        )
        .bind(instance_id)
        .bind(state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_instance_state(&self, instance_id: &str) -> Result<InstanceState> {
        require_instance_id(instance_id)?;
        let row: Option<(InstanceState,)> =
            sqlx::query_as("SELECT state FROM instance_states WHERE instance_id = $1")
                .bind(instance_id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(state,)| state).ok_or_else(|| Error::NotFound {
            what: "state",
            instance_id: instance_id.to_string(),
        })
    }

    async fn wipe_instance_state(&self, instance_id: &str) -> Result<()> {
        require_instance_id(instance_id)?;
        sqlx::query("DELETE FROM instance_states WHERE instance_id = $1")
            .bind(instance_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn store_instance_event(&self, instance_id: &str, event: &str) -> Result<()> {
        require_instance_id(instance_id)?;
        require_event(event)?;

        let ttl = secs(self.retention.instance_events);
        let mut tx = self.pool.begin().await?;

        // A lapsed log starts over, matching a key that expired.
        sqlx::query("DELETE FROM instance_events WHERE instance_id = $1 AND expires_at <= now()")
            .bind(instance_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"INSERT INTO instance_events (instance_id, event, occurred_at, expires_at)
               VALUES ($1, $2, $3, now() + make_interval(secs => $4))
               ON CONFLICT (instance_id, event) DO UPDATE SET occurred_at = EXCLUDED.occurred_at"#,
        )
        .bind(instance_id)
        .bind(event)
        .bind(format_timestamp(Utc::now()))
        .bind(ttl)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE instance_events SET expires_at = now() + make_interval(secs => $2) WHERE instance_id = $1",
        )
        .bind(instance_id)
        .bind(ttl)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fetch_instance_events(&self, instance_id: &str) -> Result<Vec<LifecycleEvent>> {
        require_instance_id(instance_id)?;
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT event, occurred_at FROM instance_events WHERE instance_id = $1 AND expires_at > now()",
        )
        .bind(instance_id)
        .fetch_all(&self.pool)
        .await?;

        let mut events: Vec<_> = rows
            .into_iter()
            .map(|(event, raw)| LifecycleEvent::from_stored(event, &raw))
            .collect();
        sort_events(&mut events);
        Ok(events)
    }

    async fn fetch_all_instance_events(&self) -> Result<BTreeMap<String, Vec<LifecycleEvent>>> {
        let rows: Vec<(String, String, String)> = sqlx::query_as(
            "SELECT instance_id, event, occurred_at FROM instance_events WHERE expires_at > now()",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut all: BTreeMap<String, Vec<LifecycleEvent>> = BTreeMap::new();
        for (instance_id, event, raw) in rows {
            all.entry(instance_id)
                .or_default()
                .push(LifecycleEvent::from_stored(event, &raw));
        }
        for events in all.values_mut() {
            sort_events(events);
        }
        Ok(all)
    }

    async fn store_instance_lifecycle_action(&self, action: &LifecycleAction) -> Result<()> {
        validate_action(action)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"INSERT INTO lifecycle_actions (transition, instance_id, auto_scaling_group_name,
                                              lifecycle_hook_name, lifecycle_action_token, completed, expires_at)
               VALUES ($1, $2, $3, $4, $5, false, now())
               ON CONFLICT (transition, instance_id) DO UPDATE SET
                   auto_scaling_group_name = EXCLUDED.auto_scaling_group_name,
                   lifecycle_hook_name = EXCLUDED.lifecycle_hook_name,
                   lifecycle_action_token = EXCLUDED.lifecycle_action_token,
                   completed = lifecycle_actions.completed AND lifecycle_actions.expires_at > now()"#,
        )
        .bind(action.transition)
        .bind(&action.instance_id)
        .bind(&action.auto_scaling_group_name)
        .bind(&action.lifecycle_hook_name)
        .bind(&action.lifecycle_action_token)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"UPDATE lifecycle_actions SET expires_at = now() + make_interval(secs => $3)
               WHERE transition = $1 AND instance_id = $2"#,
        )
        .bind(action.transition)
        .bind(&action.instance_id)
        .bind(secs(self.retention.lifecycle_actions))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn fetch_instance_lifecycle_action(
        &self,
        transition: Transition,
        instance_id: &str,
    ) -> Result<Option<LifecycleAction>> {
        require_instance_id(instance_id)?;
        let action: Option<LifecycleAction> = sqlx::query_as(
            r#"SELECT transition, instance_id, auto_scaling_group_name, lifecycle_hook_name,
                      lifecycle_action_token, completed
               FROM lifecycle_actions
               WHERE transition = $1 AND instance_id = $2 AND expires_at > now()"#,
        )
        .bind(transition)
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(action)
    }

    async fn complete_instance_lifecycle_action(
        &self,
        transition: Transition,
        instance_id: &str,
    ) -> Result<()> {
        require_instance_id(instance_id)?;
        let result = sqlx::query(
            r#"UPDATE lifecycle_actions SET completed = true
               WHERE transition = $1 AND instance_id = $2 AND expires_at > now()"#,
        )
        .bind(transition)
        .bind(instance_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound {
                what: "pending lifecycle action",
                instance_id: instance_id.to_string(),
            });
        }
        Ok(())
    }

    async fn store_instance_token(&self, instance_id: &str, token: &str) -> Result<()> {
        require_instance_id(instance_id)?;
        require_token(token)?;
        upsert_token(
            &self.pool,
            instance_id,
            TokenKind::Persistent,
            token,
            self.retention.instance_tokens,
        )
        .await
    }

    async fn fetch_instance_token(&self, instance_id: &str) -> Result<Option<String>> {
        require_instance_id(instance_id)?;
        let row: Option<(String,)> = sqlx::query_as(
            r#"UPDATE instance_tokens SET expires_at = now() + make_interval(secs => $3)
               WHERE instance_id = $1 AND kind = $2 AND expires_at > now()
               RETURNING token"#,
        )
        .bind(instance_id)
        .bind(TokenKind::Persistent)
        .bind(secs(self.retention.instance_tokens))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(token,)| token))
    }

    async fn store_temp_instance_token(&self, instance_id: &str, token: &str) -> Result<()> {
        require_instance_id(instance_id)?;
        require_token(token)?;
        upsert_token(
            &self.pool,
            instance_id,
            TokenKind::Temporary,
            token,
            self.retention.temp_instance_tokens,
        )
        .await
    }

    async fn fetch_temp_instance_token(&self, instance_id: &str) -> Result<Option<String>> {
        require_instance_id(instance_id)?;
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT token FROM instance_tokens WHERE instance_id = $1 AND kind = $2 AND expires_at > now()",
        )
        .bind(instance_id)
        .bind(TokenKind::Temporary)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(token,)| token))
    }

    async fn exchange_temp_instance_token(&self, instance_id: &str) -> Result<String> {
        require_instance_id(instance_id)?;

        let mut tx = self.pool.begin().await?;
        let row: Option<(String,)> = sqlx::query_as(
            r#"DELETE FROM instance_tokens
               WHERE instance_id = $1 AND kind = $2 AND expires_at > now()
               RETURNING token"#,
        )
        .bind(instance_id)
        .bind(TokenKind::Temporary)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((token,)) = row else {
            return Err(Error::NotFound {
                what: "token",
                instance_id: instance_id.to_string(),
            });
        };

        upsert_token(
            &mut *tx,
            instance_id,
            TokenKind::Persistent,
            &token,
            self.retention.instance_tokens,
        )
        .await?;

        tx.commit().await?;
        Ok(token)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let mut purged = 0;
        for table in ["instance_events", "lifecycle_actions", "instance_tokens"] {
            purged += sqlx::query(&format!("DELETE FROM {table} WHERE expires_at <= now()"))
                .execute(&self.pool)
                .await?
                .rows_affected();
        }
        Ok(purged)
    }
}

async fn upsert_token<'e, E>(
    executor: E,
    instance_id: &str,
    kind: TokenKind,
    token: &str,
    ttl: Duration,
) -> Result<()>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"INSERT INTO instance_tokens (instance_id, kind, token, expires_at)
           VALUES ($1, $2, $3, now() + make_interval(secs => $4))
           ON CONFLICT (instance_id, kind) DO UPDATE SET token = EXCLUDED.token, expires_at = EXCLUDED.expires_at"#,
    )
    .bind(instance_id)
    .bind(kind)
    .bind(token)
    .bind(secs(ttl))
    .execute(executor)
    .await?;
    Ok(())
}

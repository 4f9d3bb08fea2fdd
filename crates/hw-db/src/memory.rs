use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};

use crate::models::{
    InstanceState, LifecycleAction, LifecycleEvent, TokenKind, Transition, format_timestamp,
    sort_events,
};
use crate::{
    Error, Repository, Result, Retention, require_event, require_instance_id, require_token,
    validate_action,
};

struct Expiring<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

impl<T> Expiring<T> {
    fn live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Event name → stored RFC 3339 text, sharing one expiry.
type EventLog = Expiring<HashMap<String, String>>;

#[derive(Default)]
struct Inner {
    states: HashMap<String, InstanceState>,
    events: HashMap<String, EventLog>,
    actions: HashMap<(Transition, String), Expiring<LifecycleAction>>,
    tokens: HashMap<(String, TokenKind), Expiring<String>>,
}

/// Repository kept in process memory. Every operation runs under a single
/// lock, so multi-step writes are atomic.
pub struct MemoryRepository {
    retention: Retention,
    inner: Mutex<Inner>,
}

impl MemoryRepository {
    pub fn new(retention: Retention) -> Self {
        Self {
            retention,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// True when nothing at all is stored, expired or not.
    pub fn is_empty(&self) -> bool {
        let inner = self.lock();
        inner.states.is_empty()
            && inner.events.is_empty()
            && inner.actions.is_empty()
            && inner.tokens.is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    pub(crate) fn insert_raw_event(&self, instance_id: &str, event: &str, raw: &str) {
        let expires_at = expiry(Utc::now(), self.retention.instance_events);
        self.lock()
            .events
            .entry(instance_id.to_string())
            .or_insert_with(|| Expiring {
                value: HashMap::new(),
                expires_at,
            })
            .value
            .insert(event.to_string(), raw.to_string());
    }
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new(Retention::default())
    }
}

fn expiry(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn to_events(log: &HashMap<String, String>) -> Vec<LifecycleEvent> {
    let mut events: Vec<_> = log
        .iter()
        .map(|(event, raw)| LifecycleEvent::from_stored(event.clone(), raw))
        .collect();
    sort_events(&mut events);
    events
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn set_instance_state(&self, instance_id: &str, state: InstanceState) -> Result<()> {
        require_instance_id(instance_id)?;
        self.lock().states.insert(instance_id.to_string(), state);
        Ok(())
    }

    async fn fetch_instance_state(&self, instance_id: &str) -> Result<InstanceState> {
        require_instance_id(instance_id)?;
        self.lock()
            .states
            .get(instance_id)
            .copied()
            .ok_or_else(|| Error::NotFound {
                what: "state",
                instance_id: instance_id.to_string(),
            })
    }

    async fn wipe_instance_state(&self, instance_id: &str) -> Result<()> {
        require_instance_id(instance_id)?;
        self.lock().states.remove(instance_id);
        Ok(())
    }

    async fn store_instance_event(&self, instance_id: &str, event: &str) -> Result<()> {
        require_instance_id(instance_id)?;
        require_event(event)?;

        let now = Utc::now();
        let expires_at = expiry(now, self.retention.instance_events);
        let mut inner = self.lock();
        let log = inner
            .events
            .entry(instance_id.to_string())
            .or_insert_with(|| Expiring {
                value: HashMap::new(),
                expires_at,
            });
        if !log.live(now) {
            log.value.clear();
        }
        log.value.insert(event.to_string(), format_timestamp(now));
        log.expires_at = expires_at;
        Ok(())
    }

    async fn fetch_instance_events(&self, instance_id: &str) -> Result<Vec<LifecycleEvent>> {
        require_instance_id(instance_id)?;
        let now = Utc::now();
        Ok(self
            .lock()
            .events
            .get(instance_id)
            .filter(|log| log.live(now))
            .map(|log| to_events(&log.value))
            .unwrap_or_default())
    }

    async fn fetch_all_instance_events(&self) -> Result<BTreeMap<String, Vec<LifecycleEvent>>> {
        let now = Utc::now();
        Ok(self
            .lock()
            .events
            .iter()
            .filter(|(_, log)| log.live(now) && !log.value.is_empty())
            .map(|(id, log)| (id.clone(), to_events(&log.value)))
            .collect())
    }

    async fn store_instance_lifecycle_action(&self, action: &LifecycleAction) -> Result<()> {
        validate_action(action)?;
        let now = Utc::now();
        let key = (action.transition, action.instance_id.clone());
        let mut inner = self.lock();

        // A live record keeps its completion flag across redeliveries.
        let completed = inner
            .actions
            .get(&key)
            .is_some_and(|existing| existing.live(now) && existing.value.completed);
        inner.actions.insert(
            key,
            Expiring {
                value: LifecycleAction {
                    completed,
                    ..action.clone()
                },
                expires_at: expiry(now, self.retention.lifecycle_actions),
            },
        );
        Ok(())
    }

    async fn fetch_instance_lifecycle_action(
        &self,
        transition: Transition,
        instance_id: &str,
    ) -> Result<Option<LifecycleAction>> {
        require_instance_id(instance_id)?;
        let now = Utc::now();
        Ok(self
            .lock()
            .actions
            .get(&(transition, instance_id.to_string()))
            .filter(|a| a.live(now))
            .map(|a| a.value.clone()))
    }

    async fn complete_instance_lifecycle_action(
        &self,
        transition: Transition,
        instance_id: &str,
    ) -> Result<()> {
        require_instance_id(instance_id)?;
        let now = Utc::now();
        match self
            .lock()
            .actions
            .get_mut(&(transition, instance_id.to_string()))
            .filter(|a| a.live(now))
        {
            Some(action) => {
                action.value.completed = true;
                Ok(())
            }
            None => Err(Error::NotFound {
                what: "pending lifecycle action",
                instance_id: instance_id.to_string(),
            }),
        }
    }

    async fn store_instance_token(&self, instance_id: &str, token: &str) -> Result<()> {
        require_instance_id(instance_id)?;
        require_token(token)?;
        let expires_at = expiry(Utc::now(), self.retention.instance_tokens);
        self.lock().tokens.insert(
            (instance_id.to_string(), TokenKind::Persistent),
            Expiring {
                value: token.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn fetch_instance_token(&self, instance_id: &str) -> Result<Option<String>> {
        require_instance_id(instance_id)?;
        let now = Utc::now();
        let expires_at = expiry(now, self.retention.instance_tokens);
        Ok(self
            .lock()
            .tokens
            .get_mut(&(instance_id.to_string(), TokenKind::Persistent))
            .filter(|t| t.live(now))
            .map(|t| {
                t.expires_at = expires_at;
                t.value.clone()
            }))
    }

    async fn store_temp_instance_token(&self, instance_id: &str, token: &str) -> Result<()> {
        require_instance_id(instance_id)?;
        require_token(token)?;
        let expires_at = expiry(Utc::now(), self.retention.temp_instance_tokens);
        self.lock().tokens.insert(
            (instance_id.to_string(), TokenKind::Temporary),
            Expiring {
                value: token.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn fetch_temp_instance_token(&self, instance_id: &str) -> Result<Option<String>> {
        require_instance_id(instance_id)?;
        let now = Utc::now();
        Ok(self
            .lock()
            .tokens
            .get(&(instance_id.to_string(), TokenKind::Temporary))
            .filter(|t| t.live(now))
            .map(|t| t.value.clone()))
    }

    async fn exchange_temp_instance_token(&self, instance_id: &str) -> Result<String> {
        require_instance_id(instance_id)?;
        let now = Utc::now();
        let mut inner = self.lock();

        let token = inner
            .tokens
            .remove(&(instance_id.to_string(), TokenKind::Temporary))
            .filter(|t| t.live(now))
            .map(|t| t.value)
            .ok_or_else(|| Error::NotFound {
                what: "token",
                instance_id: instance_id.to_string(),
            })?;

        inner.tokens.insert(
            (instance_id.to_string(), TokenKind::Persistent),
            Expiring {
                value: token.clone(),
                expires_at: expiry(now, self.retention.instance_tokens),
            },
        );
        Ok(token)
    }

    async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut inner = self.lock();
        let before = inner.events.len() + inner.actions.len() + inner.tokens.len();

        inner.events.retain(|_, log| log.live(now));
        inner.actions.retain(|_, a| a.live(now));
        inner.tokens.retain(|_, t| t.live(now));

        let after = inner.events.len() + inner.actions.len() + inner.tokens.len();
        Ok((before - after) as u64)
    }
}

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ── InstanceState ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type, Serialize, Deserialize)]
#[sqlx(type_name = "instance_state", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    Up,
    Down,
}

impl InstanceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Transition ──────────────────────────────────────────────────────

/// Direction of a lifecycle hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "lifecycle_transition", rename_all = "lowercase")]
pub enum Transition {
    Launching,
    Terminating,
}

impl Transition {
    pub const HOOK_LAUNCHING: &'static str = "autoscaling:EC2_INSTANCE_LAUNCHING";
    pub const HOOK_TERMINATING: &'static str = "autoscaling:EC2_INSTANCE_TERMINATING";

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Launching => "launching",
            Self::Terminating => "terminating",
        }
    }

    /// Map an autoscaling `LifecycleTransition` value onto a transition.
    pub fn from_hook(value: &str) -> Option<Self> {
        match value {
            Self::HOOK_LAUNCHING => Some(Self::Launching),
            Self::HOOK_TERMINATING => Some(Self::Terminating),
            _ => None,
        }
    }

    /// Event recorded when the hook notification arrives.
    pub fn pre_event(&self) -> &'static str {
        match self {
            Self::Launching => "prelaunching",
            Self::Terminating => "preterminating",
        }
    }

    /// Event recorded once the instance confirms the transition.
    pub fn completion_event(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "launching" => Ok(Self::Launching),
            "terminating" => Ok(Self::Terminating),
            other => Err(format!("unknown transition '{other}'")),
        }
    }
}

// ── LifecycleAction ─────────────────────────────────────────────────

/// Correlation record for a paused lifecycle hook.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct LifecycleAction {
    pub transition: Transition,
    pub instance_id: String,
    pub auto_scaling_group_name: String,
    pub lifecycle_hook_name: String,
    pub lifecycle_action_token: String,
    pub completed: bool,
}

impl LifecycleAction {
    /// Names of the required fields that are empty or whitespace.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("instance_id", &self.instance_id),
            ("auto_scaling_group_name", &self.auto_scaling_group_name),
            ("lifecycle_hook_name", &self.lifecycle_hook_name),
            ("lifecycle_action_token", &self.lifecycle_action_token),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

// ── LifecycleEvent ──────────────────────────────────────────────────

/// A named milestone in an instance's lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub event: String,
    pub timestamp: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(event: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            event: event.into(),
            timestamp,
        }
    }

    /// Rebuild an event from its stored RFC 3339 text. Unparseable
    /// timestamps fall back to [`LifecycleEvent::fallback_timestamp`].
    pub fn from_stored(event: impl Into<String>, raw: &str) -> Self {
        let timestamp = DateTime::parse_from_rfc3339(raw)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Self::fallback_timestamp());
        Self::new(event, timestamp)
    }

    /// 1955-11-05T11:05:55-09:00
    pub fn fallback_timestamp() -> DateTime<Utc> {
        FixedOffset::west_opt(9 * 3600)
            .and_then(|tz| tz.with_ymd_and_hms(1955, 11, 5, 11, 5, 55).single())
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }
}

pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Oldest first; ties broken by event name.
pub(crate) fn sort_events(events: &mut [LifecycleEvent]) {
    events.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.event.cmp(&b.event))
    });
}

// ── Tokens ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "instance_token_kind", rename_all = "lowercase")]
pub enum TokenKind {
    Persistent,
    Temporary,
}

/// 32 random bytes, hex encoded.
pub fn generate_token() -> String {
    use rand::Rng;
    let bytes: [u8; 32] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

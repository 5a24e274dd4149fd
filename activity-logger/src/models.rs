//! Event, record and session wire models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::Validate;

/// Metadata attached to an event. Sanitized before it is queued.
pub type Metadata = Map<String, Value>;

/// How far ahead of "now" the calendar item an action touched sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeHorizon {
    Immediate,
    ShortTerm,
    MediumTerm,
    LongTerm,
}

/// A user action as reported by the host application.
#[derive(Debug, Clone, Default, Validate)]
pub struct ActionEvent {
    #[validate(length(min = 1))]
    pub action: String,
    #[validate(length(min = 1))]
    pub category: String,
    pub calendar_id: Option<String>,
    pub event_id: Option<String>,
    pub impact_score: Option<f64>,
    pub time_horizon: Option<TimeHorizon>,
    pub metadata: Option<Metadata>,
    /// Defaults to enqueue time
    pub client_timestamp: Option<DateTime<Utc>>,
}

impl ActionEvent {
    pub fn new(action: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            category: category.into(),
            ..Default::default()
        }
    }

    pub fn with_calendar(mut self, calendar_id: impl Into<String>) -> Self {
        self.calendar_id = Some(calendar_id.into());
        self
    }

    pub fn with_event(mut self, event_id: impl Into<String>) -> Self {
        self.event_id = Some(event_id.into());
        self
    }

    pub fn with_impact(mut self, score: f64, horizon: TimeHorizon) -> Self {
        self.impact_score = Some(score);
        self.time_horizon = Some(horizon);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// An error observed by the host application.
#[derive(Debug, Clone, Default, Validate)]
pub struct ErrorEvent {
    pub error_code: Option<String>,
    #[validate(length(min = 1))]
    pub message: String,
    pub stack: Option<String>,
    pub recovery_action: Option<String>,
    pub calendar_id: Option<String>,
    pub metadata: Option<Metadata>,
    pub client_timestamp: Option<DateTime<Utc>>,
}

impl ErrorEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_recovery(mut self, recovery_action: impl Into<String>) -> Self {
        self.recovery_action = Some(recovery_action.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Queued form of an [`ActionEvent`], as sent to the actions endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    pub client_event_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub action: String,
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_horizon: Option<TimeHorizon>,
    pub metadata: Metadata,
    pub client_timestamp: DateTime<Utc>,
}

/// Queued form of an [`ErrorEvent`], as sent to the errors endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub client_event_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar_id: Option<String>,
    pub metadata: Metadata,
    pub client_timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ActionBatch<'a> {
    pub actions: &'a [ActionRecord],
}

#[derive(Debug, Serialize)]
pub struct ErrorBatch<'a> {
    pub errors: &'a [ErrorRecord],
}

/// Operation carried by a session request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionOperation {
    Create,
    Update,
    End,
}

/// Body of a request to the session endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub operation: SessionOperation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// `{ "session": { ... } }` as returned by the session endpoint.
#[derive(Debug, Deserialize)]
pub struct SessionEnvelope {
    pub session: SessionPayload,
}

/// Session row echoed by the backend. Only `id` is required.
#[derive(Debug, Deserialize)]
pub struct SessionPayload {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(default, alias = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "lastActivityAt")]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "endedAt")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Accept string or numeric ids; the logger treats them as opaque.
fn opaque_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number session id, got {}",
            other
        ))),
    }
}

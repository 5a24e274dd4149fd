//! Session bootstrap, activity refresh and termination.
//!
//! Whether a create request reuses a recent session or opens a new one is
//! decided by the backend; the logger keeps whatever id comes back.

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use crate::http::Transport;
use crate::models::{SessionEnvelope, SessionOperation, SessionPayload, SessionRequest};
use crate::{Error, Result};

/// The locally tracked session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    fn from_payload(payload: SessionPayload, user_id: &str) -> Self {
        let now = Utc::now();
        Self {
            id: payload.id,
            user_id: user_id.to_string(),
            started_at: payload.started_at.unwrap_or(now),
            last_activity_at: payload.last_activity_at.unwrap_or(now),
            ended_at: payload.ended_at,
        }
    }
}

/// Client for the session endpoint. Requests are single-attempt.
pub struct SessionApi<'a> {
    transport: &'a dyn Transport,
    url: &'a str,
}

impl<'a> SessionApi<'a> {
    pub fn new(transport: &'a dyn Transport, url: &'a str) -> Self {
        Self { transport, url }
    }

    /// Ask the backend for a session for `user_id`.
    pub async fn create(&self, bearer: &str, user_id: &str) -> Result<Session> {
        let request = SessionRequest {
            operation: SessionOperation::Create,
            session_id: None,
            metadata: Some(json!({
                "client": env!("CARGO_PKG_NAME"),
                "clientVersion": env!("CARGO_PKG_VERSION"),
            })),
        };
        let payload = self.send(bearer, &request).await?;
        debug!(session_id = %payload.id, "Session created");
        Ok(Session::from_payload(payload, user_id))
    }

    /// Bump the session's last-activity timestamp.
    pub async fn touch(&self, bearer: &str, session_id: &str) -> Result<DateTime<Utc>> {
        let request = SessionRequest {
            operation: SessionOperation::Update,
            session_id: Some(session_id.to_string()),
            metadata: None,
        };
        let payload = self.send(bearer, &request).await?;
        Ok(payload.last_activity_at.unwrap_or_else(Utc::now))
    }

    pub async fn end(&self, bearer: &str, session_id: &str) -> Result<()> {
        let request = SessionRequest {
            operation: SessionOperation::End,
            session_id: Some(session_id.to_string()),
            metadata: None,
        };
        let body = serde_json::to_value(&request)?;
        self.transport
            .post_json(self.url, bearer, &body)
            .await?
            .into_result()?;
        Ok(())
    }

    async fn send(&self, bearer: &str, request: &SessionRequest) -> Result<SessionPayload> {
        let body = serde_json::to_value(request)?;
        let response = self
            .transport
            .post_json(self.url, bearer, &body)
            .await?
            .into_result()?;
        let envelope: SessionEnvelope = serde_json::from_str(&response.body)
            .map_err(|e| Error::Session(format!("Malformed session response: {}", e)))?;
        Ok(envelope.session)
    }
}

//! Scripted in-memory transport for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::time::Instant;

use crate::http::{Transport, TransportResponse};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy)]
enum Reply {
    Status(u16),
    Network,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub bearer: String,
    pub body: Value,
    pub at: Instant,
}

#[derive(Default)]
struct State {
    scripts: HashMap<String, VecDeque<Reply>>,
    defaults: HashMap<String, Reply>,
    bodies: HashMap<String, String>,
    requests: Vec<RecordedRequest>,
}

/// Replays queued statuses per URL, then falls back to a per-URL default
/// (200 unless overridden). Every request is recorded.
#[derive(Default)]
pub struct ScriptedTransport {
    state: Mutex<State>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, url: &str, statuses: impl IntoIterator<Item = u16>) {
        let mut state = self.state.lock().unwrap();
        state
            .scripts
            .entry(url.to_string())
            .or_default()
            .extend(statuses.into_iter().map(Reply::Status));
    }

    pub fn set_default(&self, url: &str, status: u16) {
        let mut state = self.state.lock().unwrap();
        state.defaults.insert(url.to_string(), Reply::Status(status));
    }

    pub fn fail_network(&self, url: &str) {
        let mut state = self.state.lock().unwrap();
        state.defaults.insert(url.to_string(), Reply::Network);
    }

    pub fn set_body(&self, url: &str, body: &str) {
        let mut state = self.state.lock().unwrap();
        state.bodies.insert(url.to_string(), body.to_string());
    }

    pub fn requests(&self, url: &str) -> Vec<RecordedRequest> {
        let state = self.state.lock().unwrap();
        state.requests.iter().filter(|r| r.url == url).cloned().collect()
    }

    pub fn all_requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn request_count(&self, url: &str) -> usize {
        self.requests(url).len()
    }

    pub fn request_times(&self, url: &str) -> Vec<Instant> {
        self.requests(url).into_iter().map(|r| r.at).collect()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn post_json(&self, url: &str, bearer: &str, body: &Value) -> Result<TransportResponse> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(RecordedRequest {
            url: url.to_string(),
            bearer: bearer.to_string(),
            body: body.clone(),
            at: Instant::now(),
        });

        let scripted = state.scripts.get_mut(url).and_then(|queue| queue.pop_front());
        let reply = scripted
            .or_else(|| state.defaults.get(url).copied())
            .unwrap_or(Reply::Status(200));

        match reply {
            Reply::Status(status) => Ok(TransportResponse {
                status,
                body: state.bodies.get(url).cloned().unwrap_or_else(|| "{}".to_string()),
            }),
            Reply::Network => Err(Error::Network(format!("POST {} failed: connection refused", url))),
        }
    }
}

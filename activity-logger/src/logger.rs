//! The activity logger: event queues, flush timer and session lifecycle.
//!
//! Every public operation is fire-and-forget from the caller's point of
//! view. Failures are reported through `tracing` and never returned.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{resolve_token, TokenProvider};
use crate::http::{HttpTransport, Transport};
use crate::models::{ActionBatch, ActionEvent, ActionRecord, ErrorBatch, ErrorEvent, ErrorRecord};
use crate::queue::BatchQueue;
use crate::retry::{dispatch_with_retry, DispatchOutcome, RetryPolicy};
use crate::sanitize::{sanitize_metadata, truncate_stack};
use crate::session::{Session, SessionApi};
use crate::{LoggerConfig, Result};

/// Lifecycle phase of a logger instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoggerState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Destroyed,
}

/// Result of one flush attempt against one queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing queued, or no token provider configured
    Idle,
    /// No token available; the batch went back to the front of the queue
    Deferred { pending: usize },
    Delivered(usize),
    /// 4xx; the batch was discarded
    Rejected { status: u16, dropped: usize },
    /// Retries exhausted; the batch went back to the front of the queue
    Requeued(usize),
    /// Retries exhausted (or unserializable); the batch was discarded
    Dropped(usize),
    /// Another flush of this queue was in flight; nothing was taken
    Busy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    pub actions: FlushOutcome,
    pub errors: FlushOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCounts {
    pub actions: usize,
    pub errors: usize,
}

/// Who asked for a flush.
#[derive(Debug, Clone, Copy)]
enum Trigger {
    /// Timer tick or queue threshold; skipped while a flush is in flight
    Scheduled,
    /// Caller or teardown; waits for the in-flight flush to finish
    Requested,
}

/// What happens to a batch whose retries are exhausted.
#[derive(Debug, Clone, Copy)]
enum OnExhausted {
    Requeue,
    Drop,
}

/// Client-side activity logger.
///
/// Cheap to clone; clones share queues, timer and session. Construct one
/// per signed-in user context and hand it to whatever needs to log.
#[derive(Clone)]
pub struct ActivityLogger {
    inner: Arc<Inner>,
}

struct Inner {
    config: LoggerConfig,
    retry: RetryPolicy,
    transport: Arc<dyn Transport>,
    actions: BatchQueue<ActionRecord>,
    errors: BatchQueue<ErrorRecord>,
    lifecycle: Mutex<Lifecycle>,
    /// Threshold flushes and the final session end, awaited on destroy
    tasks: TaskTracker,
    /// Session activity refreshes, settled before a session is ended
    refreshes: TaskTracker,
}

#[derive(Default)]
struct Lifecycle {
    state: LoggerState,
    user_id: Option<String>,
    tokens: Option<Arc<dyn TokenProvider>>,
    session: Option<Session>,
    timer: Option<FlushTimer>,
    runtime: Option<Handle>,
}

/// Background task flushing both queues once per period.
struct FlushTimer {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl FlushTimer {
    fn start(inner: Weak<Inner>, period: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(inner) = inner.upgrade() else { break };
                        tokio::join!(
                            inner.flush_actions(Trigger::Scheduled),
                            inner.flush_errors(Trigger::Scheduled)
                        );
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        Self { shutdown, handle }
    }

    /// Signal the loop to exit after any tick in progress.
    fn cancel(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn stop(self) {
        self.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Flush timer task ended abnormally");
        }
    }
}

impl ActivityLogger {
    /// Create a logger talking HTTP to the configured endpoints.
    pub fn new(config: LoggerConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(config.request_timeout)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    pub fn with_transport(config: LoggerConfig, transport: Arc<dyn Transport>) -> Self {
        let retry = RetryPolicy::from_config(&config);
        Self {
            inner: Arc::new(Inner {
                config,
                retry,
                transport,
                actions: BatchQueue::new(),
                errors: BatchQueue::new(),
                lifecycle: Mutex::new(Lifecycle::default()),
                tasks: TaskTracker::new(),
                refreshes: TaskTracker::new(),
            }),
        }
    }

    /// Bind the logger to a user, open a session and start the flush timer.
    ///
    /// Runs at most once per instance. Session creation failure is logged and
    /// the logger still becomes ready, queueing events without a session.
    pub async fn initialize(&self, user_id: impl Into<String>, tokens: Arc<dyn TokenProvider>) {
        let user_id = user_id.into();
        {
            let mut lifecycle = self.inner.lifecycle();
            if lifecycle.state != LoggerState::Uninitialized {
                warn!(state = ?lifecycle.state, "Activity logger already initialized");
                return;
            }
            lifecycle.state = LoggerState::Initializing;
            lifecycle.user_id = Some(user_id.clone());
            lifecycle.tokens = Some(tokens.clone());
            lifecycle.runtime = Handle::try_current().ok();
        }

        let session = match resolve_token(tokens.as_ref()).await {
            Some(bearer) => {
                let api = SessionApi::new(self.inner.transport.as_ref(), &self.inner.config.session_url);
                match api.create(&bearer, &user_id).await {
                    Ok(session) => Some(session),
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "Session creation failed, continuing without a session");
                        None
                    }
                }
            }
            None => {
                warn!(user_id = %user_id, "No auth token available, continuing without a session");
                None
            }
        };

        let orphaned = {
            let mut lifecycle = self.inner.lifecycle();
            if lifecycle.state == LoggerState::Initializing {
                let session_id = session.as_ref().map(|s| s.id.clone());
                lifecycle.session = session;
                if let Some(previous) = lifecycle.timer.take() {
                    previous.cancel();
                }
                lifecycle.timer = Some(FlushTimer::start(
                    Arc::downgrade(&self.inner),
                    self.inner.config.flush_interval,
                ));
                lifecycle.state = LoggerState::Ready;
                info!(user_id = %user_id, session_id = ?session_id, "Activity logger ready");
                None
            } else {
                session
            }
        };

        // Destroyed while the session request was in flight.
        if let Some(session) = orphaned {
            self.inner.end_remote_session(session, Some(tokens)).await;
        }
    }

    /// Queue a user action. Ignored unless the logger is ready.
    pub fn log_action(&self, event: ActionEvent) {
        if let Err(e) = event.validate() {
            warn!(action = %event.action, error = %e, "Dropping invalid action");
            return;
        }

        let (queued, runtime) = {
            let lifecycle = self.inner.lifecycle();
            if lifecycle.state != LoggerState::Ready {
                warn!(state = ?lifecycle.state, action = %event.action, "log_action ignored, logger not ready");
                return;
            }
            let record = ActionRecord {
                client_event_id: Uuid::new_v4(),
                session_id: lifecycle.session.as_ref().map(|s| s.id.clone()),
                action: event.action,
                category: event.category,
                calendar_id: event.calendar_id,
                event_id: event.event_id,
                impact_score: event.impact_score,
                time_horizon: event.time_horizon,
                metadata: sanitize_metadata(event.metadata.unwrap_or_default()),
                client_timestamp: event.client_timestamp.unwrap_or_else(Utc::now),
            };
            (self.inner.actions.push(record), lifecycle.runtime.clone())
        };

        if queued >= self.inner.config.batch_size {
            if let Some(runtime) = runtime {
                let inner = self.inner.clone();
                self.inner.tasks.spawn_on(
                    async move {
                        inner.flush_actions(Trigger::Scheduled).await;
                    },
                    &runtime,
                );
            }
        }
    }

    /// Queue an error. Ignored unless the logger is ready.
    pub fn log_error(&self, event: ErrorEvent) {
        if let Err(e) = event.validate() {
            warn!(error = %e, "Dropping invalid error event");
            return;
        }

        let (queued, runtime) = {
            let lifecycle = self.inner.lifecycle();
            if lifecycle.state != LoggerState::Ready {
                warn!(state = ?lifecycle.state, "log_error ignored, logger not ready");
                return;
            }
            let record = ErrorRecord {
                client_event_id: Uuid::new_v4(),
                session_id: lifecycle.session.as_ref().map(|s| s.id.clone()),
                error_code: event.error_code,
                error_message: event.message,
                error_stack: event.stack.as_deref().map(truncate_stack),
                recovery_action: event.recovery_action,
                calendar_id: event.calendar_id,
                metadata: sanitize_metadata(event.metadata.unwrap_or_default()),
                client_timestamp: event.client_timestamp.unwrap_or_else(Utc::now),
            };
            (self.inner.errors.push(record), lifecycle.runtime.clone())
        };

        if queued >= self.inner.config.error_flush_threshold() {
            if let Some(runtime) = runtime {
                let inner = self.inner.clone();
                self.inner.tasks.spawn_on(
                    async move {
                        inner.flush_errors(Trigger::Scheduled).await;
                    },
                    &runtime,
                );
            }
        }
    }

    /// Run one flush cycle of both queues now, as a timer tick would.
    pub async fn flush(&self) -> FlushReport {
        let (actions, errors) = tokio::join!(
            self.inner.flush_actions(Trigger::Requested),
            self.inner.flush_errors(Trigger::Requested)
        );
        FlushReport { actions, errors }
    }

    /// Deliver everything queued, then close the tracked session.
    ///
    /// The session is untracked before the queues drain, so deliveries made
    /// here do not refresh it, and refreshes already in flight land before
    /// the end request.
    pub async fn end_session(&self) {
        let (session, tokens) = {
            let mut lifecycle = self.inner.lifecycle();
            (lifecycle.session.take(), lifecycle.tokens.clone())
        };
        let Some(session) = session else {
            debug!("end_session called without a tracked session");
            return;
        };

        self.inner.drain().await;
        self.inner.settle_refreshes().await;
        self.inner.end_remote_session(session, tokens).await;
    }

    /// Stop the timer, deliver what is queued and close the session in the
    /// background. The logger accepts no further events afterwards.
    pub async fn destroy(&self) {
        let (timer, runtime) = {
            let mut lifecycle = self.inner.lifecycle();
            if lifecycle.state == LoggerState::Destroyed {
                debug!("Activity logger already destroyed");
                return;
            }
            lifecycle.state = LoggerState::Destroyed;
            (lifecycle.timer.take(), lifecycle.runtime.clone())
        };

        if let Some(timer) = timer {
            timer.stop().await;
        }
        self.inner.tasks.close();
        self.inner.tasks.wait().await;

        self.inner.drain().await;
        self.inner.settle_refreshes().await;

        let (session, tokens) = {
            let mut lifecycle = self.inner.lifecycle();
            (lifecycle.session.take(), lifecycle.tokens.clone())
        };
        if let Some(session) = session {
            let inner = self.inner.clone();
            let end = async move { inner.end_remote_session(session, tokens).await };
            match runtime {
                Some(runtime) => drop(self.inner.tasks.spawn_on(end, &runtime)),
                None => drop(self.inner.tasks.spawn(end)),
            }
        }

        let pending = self.pending();
        info!(
            pending_actions = pending.actions,
            pending_errors = pending.errors,
            "Activity logger destroyed"
        );
    }

    /// Resolves once [`destroy`](Self::destroy) has returned and its
    /// background session end has completed. Pending until then.
    pub async fn wait_until_closed(&self) {
        self.inner.tasks.wait().await;
    }

    /// Ready and holding a session.
    pub fn is_ready(&self) -> bool {
        let lifecycle = self.inner.lifecycle();
        lifecycle.state == LoggerState::Ready && lifecycle.session.is_some()
    }

    pub fn state(&self) -> LoggerState {
        self.inner.lifecycle().state
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.lifecycle().session.clone()
    }

    pub fn user_id(&self) -> Option<String> {
        self.inner.lifecycle().user_id.clone()
    }

    pub fn pending(&self) -> PendingCounts {
        PendingCounts {
            actions: self.inner.actions.len(),
            errors: self.inner.errors.len(),
        }
    }

    #[cfg(test)]
    fn queued_actions(&self) -> Vec<ActionRecord> {
        self.inner.actions.snapshot()
    }
}

impl Inner {
    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn token_provider(&self) -> Option<Arc<dyn TokenProvider>> {
        self.lifecycle().tokens.clone()
    }

    async fn flush_actions(self: &Arc<Self>, trigger: Trigger) -> FlushOutcome {
        let outcome = self
            .flush_queue(
                trigger,
                &self.actions,
                &self.config.actions_url,
                |actions| serde_json::to_value(ActionBatch { actions }),
                OnExhausted::Requeue,
                "action",
            )
            .await;

        if let FlushOutcome::Delivered(_) = outcome {
            self.refresh_session();
        }
        outcome
    }

    async fn flush_errors(self: &Arc<Self>, trigger: Trigger) -> FlushOutcome {
        self.flush_queue(
            trigger,
            &self.errors,
            &self.config.errors_url,
            |errors| serde_json::to_value(ErrorBatch { errors }),
            OnExhausted::Drop,
            "error",
        )
        .await
    }

    async fn flush_queue<T>(
        &self,
        trigger: Trigger,
        queue: &BatchQueue<T>,
        url: &str,
        encode: fn(&[T]) -> serde_json::Result<Value>,
        on_exhausted: OnExhausted,
        kind: &'static str,
    ) -> FlushOutcome {
        let Some(tokens) = self.token_provider() else {
            return FlushOutcome::Idle;
        };
        // Held until the batch is delivered, dropped or requeued.
        let _flushing = match trigger {
            Trigger::Requested => queue.flush_lock().await,
            Trigger::Scheduled => match queue.try_flush_lock() {
                Some(guard) => guard,
                None => {
                    debug!(kind, "Flush already in flight, skipping");
                    return FlushOutcome::Busy;
                }
            },
        };
        let batch = queue.take_batch(self.config.batch_size);
        if batch.is_empty() {
            return FlushOutcome::Idle;
        }
        let size = batch.len();

        let Some(bearer) = resolve_token(tokens.as_ref()).await else {
            debug!(kind, batch_size = size, "No auth token, deferring batch");
            queue.requeue_front(batch);
            return FlushOutcome::Deferred { pending: size };
        };

        let body = match encode(&batch) {
            Ok(body) => body,
            Err(e) => {
                error!(kind, batch_size = size, error = %e, "Failed to serialize batch, dropping it");
                return FlushOutcome::Dropped(size);
            }
        };

        match dispatch_with_retry(self.transport.as_ref(), self.retry, url, &bearer, &body).await {
            DispatchOutcome::Delivered { attempts } => {
                debug!(kind, batch_size = size, attempts, "Batch delivered");
                FlushOutcome::Delivered(size)
            }
            DispatchOutcome::Rejected { status, .. } => {
                warn!(kind, batch_size = size, status, "Batch rejected by backend, dropping it");
                FlushOutcome::Rejected { status, dropped: size }
            }
            DispatchOutcome::Exhausted { error, attempts } => match on_exhausted {
                OnExhausted::Requeue => {
                    warn!(kind, batch_size = size, attempts, error = %error, "Batch delivery failed, requeueing");
                    queue.requeue_front(batch);
                    FlushOutcome::Requeued(size)
                }
                OnExhausted::Drop => {
                    warn!(kind, batch_size = size, attempts, error = %error, "Batch delivery failed, dropping it");
                    FlushOutcome::Dropped(size)
                }
            },
        }
    }

    /// Flush repeatedly until both queues are empty or a batch is not delivered.
    async fn drain(self: &Arc<Self>) {
        let actions = async {
            while let FlushOutcome::Delivered(_) = self.flush_actions(Trigger::Requested).await {
                if self.actions.is_empty() {
                    break;
                }
            }
        };
        let errors = async {
            while let FlushOutcome::Delivered(_) = self.flush_errors(Trigger::Requested).await {
                if self.errors.is_empty() {
                    break;
                }
            }
        };
        tokio::join!(actions, errors);
    }

    /// Bump the session's activity timestamp in the background.
    fn refresh_session(self: &Arc<Self>) {
        let (session_id, tokens) = {
            let lifecycle = self.lifecycle();
            if lifecycle.state != LoggerState::Ready {
                return;
            }
            match (&lifecycle.session, &lifecycle.tokens) {
                (Some(session), Some(tokens)) => (session.id.clone(), tokens.clone()),
                _ => return,
            }
        };

        let inner = self.clone();
        self.refreshes.spawn(async move {
            let Some(bearer) = resolve_token(tokens.as_ref()).await else {
                return;
            };
            let api = SessionApi::new(inner.transport.as_ref(), &inner.config.session_url);
            match api.touch(&bearer, &session_id).await {
                Ok(last_activity_at) => {
                    let mut lifecycle = inner.lifecycle();
                    if let Some(session) = lifecycle.session.as_mut().filter(|s| s.id == session_id) {
                        session.last_activity_at = last_activity_at;
                    }
                }
                Err(e) => warn!(session_id = %session_id, error = %e, "Failed to refresh session activity"),
            }
        });
    }

    /// Wait for in-flight activity refreshes so none lands after an end.
    async fn settle_refreshes(&self) {
        self.refreshes.close();
        self.refreshes.wait().await;
        self.refreshes.reopen();
    }

    async fn end_remote_session(&self, session: Session, tokens: Option<Arc<dyn TokenProvider>>) {
        let bearer = match tokens {
            Some(tokens) => resolve_token(tokens.as_ref()).await,
            None => None,
        };
        let Some(bearer) = bearer else {
            warn!(session_id = %session.id, "No auth token, session left for the backend to expire");
            return;
        };

        let api = SessionApi::new(self.transport.as_ref(), &self.config.session_url);
        match api.end(&bearer, &session.id).await {
            Ok(()) => info!(session_id = %session.id, "Session ended"),
            Err(e) => warn!(session_id = %session.id, error = %e, "Failed to end session"),
        }
    }
}

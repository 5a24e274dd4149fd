//! Client-side activity logger for the calendar health application.
//!
//! Queues user actions and errors in memory, strips PII from their metadata,
//! and ships them in batches to the ingestion backend on a timer (or as soon
//! as a queue fills up), retrying transient failures with exponential
//! backoff. A backend session is opened on [`ActivityLogger::initialize`] and
//! closed on [`ActivityLogger::end_session`] or [`ActivityLogger::destroy`].

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod logger;
pub mod models;
pub mod queue;
pub mod retry;
pub mod sanitize;
pub mod session;

#[cfg(test)]
mod testing;

pub use auth::{StaticToken, TokenProvider};
pub use config::LoggerConfig;
pub use error::{Error, Result};
pub use http::{HttpTransport, Transport, TransportResponse};
pub use logger::{ActivityLogger, FlushOutcome, FlushReport, LoggerState, PendingCounts};
pub use models::{ActionEvent, ErrorEvent, Metadata, TimeHorizon};
pub use session::Session;

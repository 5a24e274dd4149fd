//! Activity Smoke - Exercises an ingestion deployment end to end.
//!
//! Opens a session, logs a few actions and an error, flushes, and tears the
//! logger down. Configuration comes from the environment:
//! - `ACTIVITY_API_BASE_URL` (required) and the other `ACTIVITY_*` overrides
//! - `ACTIVITY_API_TOKEN` - bearer token for the test user
//! - `SMOKE_USER_ID` - user the session is opened for

use std::sync::Arc;

use activity_logger::{
    ActionEvent, ActivityLogger, ErrorEvent, LoggerConfig, Metadata, StaticToken, TimeHorizon,
    TokenProvider,
};
use anyhow::Context;
use serde_json::json;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let config = LoggerConfig::from_env().context("Invalid logger configuration")?;
    let token = std::env::var("ACTIVITY_API_TOKEN").context("ACTIVITY_API_TOKEN not set")?;
    let user_id = std::env::var("SMOKE_USER_ID").unwrap_or_else(|_| "smoke-test-user".to_string());

    let request_timeout = config.request_timeout;
    let logger = ActivityLogger::new(config)?;
    let tokens: Arc<dyn TokenProvider> = Arc::new(StaticToken(token));
    logger.initialize(user_id, tokens).await;

    if !logger.is_ready() {
        warn!("No session was opened; events will be sent without one");
    }

    let mut metadata = Metadata::new();
    metadata.insert("source".to_string(), json!("activity-smoke"));
    metadata.insert("duration_ms".to_string(), json!(12));
    logger.log_action(
        ActionEvent::new("view_insights", "insights").with_metadata(metadata.clone()),
    );
    logger.log_action(
        ActionEvent::new("accept_suggestion", "calendar")
            .with_calendar("primary")
            .with_impact(2.0, TimeHorizon::ShortTerm)
            .with_metadata(metadata),
    );
    logger.log_error(
        ErrorEvent::new("Smoke test error")
            .with_code("SMOKE")
            .with_recovery("none"),
    );

    let report = logger.flush().await;
    info!(actions = ?report.actions, errors = ?report.errors, "Smoke flush complete");

    logger.destroy().await;
    if tokio::time::timeout(request_timeout, logger.wait_until_closed())
        .await
        .is_err()
    {
        warn!("Session end still pending after the request timeout");
    }

    let pending = logger.pending();
    if pending.actions > 0 || pending.errors > 0 {
        anyhow::bail!(
            "{} actions and {} errors were not delivered",
            pending.actions,
            pending.errors
        );
    }
    Ok(())
}

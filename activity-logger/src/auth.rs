//! Bearer token retrieval.

use std::future::Future;

use async_trait::async_trait;

/// Supplies the bearer token attached to every ingestion request.
///
/// Called freely and concurrently; implementations should return the
/// current (refreshed if needed) token, or `None` when no user is signed in.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Option<String>;
}

/// A fixed token, mostly useful for service accounts and tests.
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Option<String> {
        Some(self.0.clone())
    }
}

#[async_trait]
impl<F, Fut> TokenProvider for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Option<String>> + Send + 'static,
{
    async fn token(&self) -> Option<String> {
        (self)().await
    }
}

/// Resolve a usable token, skipping a "Bearer " prefix and blank values.
pub async fn resolve_token(provider: &dyn TokenProvider) -> Option<String> {
    let token = provider.token().await?;
    let token = token.strip_prefix("Bearer ").unwrap_or(&token).trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

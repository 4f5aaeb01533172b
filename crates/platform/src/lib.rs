//! Client for the downstream document-processing platform.
//!
//! The platform is an external collaborator: a REST surface with bearer
//! auth and conditional writes. This crate owns the HTTP client, the typed
//! error taxonomy (which statuses are retryable), the optimistic-concurrency
//! retry helper, and the resource catalog that the tool runtime turns into
//! per-category tool descriptors.

pub mod catalog;
pub mod client;
pub mod error;
pub mod retry;

use async_trait::async_trait;
use serde_json::Value;

pub use client::PlatformClient;
pub use error::{PlatformError, PlatformResult};

/// The raw operations the tool runtime needs. `PlatformClient` implements
/// this over HTTP; tests substitute an in-memory stub.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn list(&self, resource: &str, params: &Value) -> PlatformResult<Value>;
    async fn retrieve(&self, resource: &str, id: &str) -> PlatformResult<Value>;
    async fn create(&self, resource: &str, body: &Value) -> PlatformResult<Value>;
    async fn patch(&self, resource: &str, id: &str, body: &Value) -> PlatformResult<Value>;
    async fn delete(&self, resource: &str, id: &str) -> PlatformResult<()>;
}

/// Builds a [`PlatformApi`] for a chat's credentials. One factory per
/// process; per-chat clients share the underlying HTTP connection pool.
pub trait PlatformFactory: Send + Sync {
    fn connect(&self, creds: &dp_domain::chat::Credentials) -> std::sync::Arc<dyn PlatformApi>;
}

/// Production factory over [`PlatformClient`].
pub struct HttpPlatformFactory {
    http: reqwest::Client,
}

impl HttpPlatformFactory {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .expect("reqwest client"),
        }
    }
}

impl Default for HttpPlatformFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformFactory for HttpPlatformFactory {
    fn connect(&self, creds: &dp_domain::chat::Credentials) -> std::sync::Arc<dyn PlatformApi> {
        std::sync::Arc::new(PlatformClient::new(
            self.http.clone(),
            &creds.base_url,
            &creds.token,
        ))
    }
}

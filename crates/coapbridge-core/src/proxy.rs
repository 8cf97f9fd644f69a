//! Interface to the proxy collaborator performing outbound exchanges

use async_trait::async_trait;

use crate::error::ProxyError;
use crate::message::{ProxyRequest, ProxyResponse};

/// Performs one request/response exchange with the node owning a resource
///
/// Timeouts are the implementation's responsibility; an exchange that gets no
/// answer in time resolves to an error.
#[async_trait]
pub trait Proxy: Send + Sync {
    async fn exchange(&self, request: ProxyRequest) -> Result<ProxyResponse, ProxyError>;
}

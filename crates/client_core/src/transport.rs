//! JSON-RPC plumbing between the client and a ledger node or wallet endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::protocol::{JsonRpcRequest, JsonRpcResponse};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error)]
pub enum RpcError {
    #[error("failed to reach {endpoint}: {message}")]
    Http { endpoint: String, message: String },
    #[error("{message} (code {code})")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },
    #[error("malformed response: {0}")]
    Decode(String),
}

impl RpcError {
    /// Message plus any node-supplied error data, lowercased for pattern matching.
    pub fn searchable_text(&self) -> String {
        let text = match self {
            Self::Rpc {
                message,
                data: Some(data),
                ..
            } => format!("{message} {data}"),
            other => other.to_string(),
        };
        text.to_ascii_lowercase()
    }
}

/// A live connection to something that speaks Ethereum JSON-RPC.
#[async_trait]
pub trait LedgerTransport: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;
    fn endpoint(&self) -> &str;
}

pub(crate) async fn request_as<T: DeserializeOwned>(
    transport: &dyn LedgerTransport,
    method: &str,
    params: Value,
) -> Result<T, RpcError> {
    let raw = transport.request(method, params).await?;
    serde_json::from_value(raw).map_err(|err| RpcError::Decode(format!("{method}: {err}")))
}

pub struct HttpTransport {
    http: Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl HttpTransport {
    pub fn new(endpoint: &str) -> Result<Self, url::ParseError> {
        let endpoint = url::Url::parse(endpoint)?.to_string();
        Ok(Self {
            http: Client::new(),
            endpoint,
            next_id: AtomicU64::new(1),
        })
    }

    fn http_error(&self, err: reqwest::Error) -> RpcError {
        RpcError::Http {
            endpoint: self.endpoint.clone(),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl LedgerTransport for HttpTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(endpoint = %self.endpoint, method, id, "json-rpc request");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&JsonRpcRequest::new(id, method, params))
            .send()
            .await
            .map_err(|err| self.http_error(err))?
            .error_for_status()
            .map_err(|err| self.http_error(err))?;
        let body: JsonRpcResponse = response
            .json()
            .await
            .map_err(|err| RpcError::Decode(format!("{method}: {err}")))?;

        if let Some(error) = body.error {
            debug!(method, id, code = error.code, message = %error.message, "json-rpc error");
            return Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
                data: error.data,
            });
        }
        Ok(body.result)
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;

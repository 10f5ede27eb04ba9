//! Provider resolution: injected signer first, local development node second.

use std::{fmt, sync::Arc};

use alloy_primitives::Address;
use serde_json::json;
use shared::domain::ConnectionMode;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    config::{Settings, SettingsError},
    transport::{request_as, HttpTransport, LedgerTransport},
};

const NO_INJECTED_SIGNER: &str = "no injected signer available";

#[derive(Debug, Clone, Error)]
#[error("no usable ledger connection (injected signer: {injected_signer}; local node: {local_node})")]
pub struct ConnectionError {
    pub injected_signer: String,
    pub local_node: String,
}

/// Acting account plus the connection it was granted on. Fixed for the session.
#[derive(Clone)]
pub struct Session {
    account: Address,
    mode: ConnectionMode,
    transport: Arc<dyn LedgerTransport>,
}

impl Session {
    pub fn new(account: Address, mode: ConnectionMode, transport: Arc<dyn LedgerTransport>) -> Self {
        Self {
            account,
            mode,
            transport,
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    pub fn transport(&self) -> &Arc<dyn LedgerTransport> {
        &self.transport
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("account", &self.account)
            .field("mode", &self.mode)
            .field("endpoint", &self.transport.endpoint())
            .finish()
    }
}

pub struct ProviderResolver {
    injected_signer: Option<Arc<dyn LedgerTransport>>,
    local_node: Arc<dyn LedgerTransport>,
}

impl ProviderResolver {
    pub fn new(
        injected_signer: Option<Arc<dyn LedgerTransport>>,
        local_node: Arc<dyn LedgerTransport>,
    ) -> Self {
        Self {
            injected_signer,
            local_node,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        let injected_signer = match settings.signer_url.as_deref() {
            Some(url) => Some(Arc::new(http_transport(url)?) as Arc<dyn LedgerTransport>),
            None => None,
        };
        let local_node = Arc::new(http_transport(&settings.node_url())?);
        Ok(Self::new(injected_signer, local_node))
    }

    pub async fn resolve(&self) -> Result<Session, ConnectionError> {
        let injected_signer = match &self.injected_signer {
            None => NO_INJECTED_SIGNER.to_string(),
            Some(signer) => match first_account(signer.as_ref(), "eth_requestAccounts").await {
                Ok(account) => {
                    info!(%account, endpoint = signer.endpoint(), "connected through injected signer");
                    return Ok(Session::new(
                        account,
                        ConnectionMode::InjectedSigner,
                        Arc::clone(signer),
                    ));
                }
                Err(cause) => {
                    warn!(%cause, "injected signer unavailable; falling back to local node");
                    cause
                }
            },
        };

        match first_account(self.local_node.as_ref(), "eth_accounts").await {
            Ok(account) => {
                info!(%account, endpoint = self.local_node.endpoint(), "connected to local node");
                Ok(Session::new(
                    account,
                    ConnectionMode::LocalNode,
                    Arc::clone(&self.local_node),
                ))
            }
            Err(local_node) => {
                error!(%injected_signer, %local_node, "no ledger connection strategy succeeded");
                Err(ConnectionError {
                    injected_signer,
                    local_node,
                })
            }
        }
    }
}

fn http_transport(url: &str) -> Result<HttpTransport, SettingsError> {
    HttpTransport::new(url).map_err(|err| SettingsError::InvalidEndpoint {
        url: url.to_string(),
        message: err.to_string(),
    })
}

async fn first_account(transport: &dyn LedgerTransport, method: &str) -> Result<Address, String> {
    let accounts: Vec<Address> = request_as(transport, method, json!([]))
        .await
        .map_err(|err| err.to_string())?;
    accounts
        .into_iter()
        .next()
        .ok_or_else(|| "no accounts available".to_string())
}

#[cfg(test)]
#[path = "tests/provider_tests.rs"]
mod tests;

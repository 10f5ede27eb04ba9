//! Resolves the one deployed contract instance for a session.

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use alloy_primitives::Address;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    config::{Settings, SettingsError},
    contract::{ContractBinding, Voting},
    provider::Session,
    transport::request_as,
};

#[derive(Debug, Clone, Error)]
#[error("no contract instance reachable on network {network_id}: {}", attempts.join("; "))]
pub struct BindingError {
    pub network_id: String,
    pub attempts: Vec<String>,
}

#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("failed to read deployment artifact {path}: {message}")]
    Unreadable { path: String, message: String },
    #[error("deployment artifact {path} is malformed: {message}")]
    Malformed { path: String, message: String },
}

/// Source of truth for where the contract was last deployed on a given network.
#[async_trait]
pub trait DeploymentRegistry: Send + Sync {
    async fn latest_address(&self, network_id: &str) -> Result<Option<Address>, RegistryError>;
}

/// Reads the `networks` table of a truffle build artifact.
pub struct ArtifactRegistry {
    path: PathBuf,
}

#[derive(Debug, Deserialize)]
struct TruffleArtifact {
    #[serde(default)]
    networks: HashMap<String, NetworkDeployment>,
}

#[derive(Debug, Deserialize)]
struct NetworkDeployment {
    address: Option<Address>,
}

impl ArtifactRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl DeploymentRegistry for ArtifactRegistry {
    async fn latest_address(&self, network_id: &str) -> Result<Option<Address>, RegistryError> {
        let path = self.path.display().to_string();
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|err| RegistryError::Unreadable {
                path: path.clone(),
                message: err.to_string(),
            })?;
        let artifact: TruffleArtifact =
            serde_json::from_str(&raw).map_err(|err| RegistryError::Malformed {
                path,
                message: err.to_string(),
            })?;
        Ok(artifact
            .networks
            .get(network_id)
            .and_then(|deployment| deployment.address))
    }
}

pub struct ContractBinder {
    registry: Arc<dyn DeploymentRegistry>,
    fallback_address: Option<Address>,
    configured_network_id: String,
}

impl ContractBinder {
    pub fn new(
        registry: Arc<dyn DeploymentRegistry>,
        fallback_address: Option<Address>,
        configured_network_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            fallback_address,
            configured_network_id: configured_network_id.into(),
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        Ok(Self::new(
            Arc::new(ArtifactRegistry::new(settings.artifact_path.clone())),
            settings.fallback_address()?,
            settings.network_id.clone(),
        ))
    }

    pub async fn bind(&self, session: &Session) -> Result<ContractBinding, BindingError> {
        let network_id = self.network_id(session).await;
        let mut attempts = Vec::new();

        match self.registry.latest_address(&network_id).await {
            Ok(Some(address)) => match verify_deployment(session, address).await {
                Ok(binding) => {
                    info!(%address, %network_id, "bound to registry deployment");
                    return Ok(binding);
                }
                Err(cause) => attempts.push(format!("registry address {address}: {cause}")),
            },
            Ok(None) => attempts.push(format!("registry has no deployment for network {network_id}")),
            Err(err) => attempts.push(err.to_string()),
        }

        match self.fallback_address {
            Some(address) => match verify_deployment(session, address).await {
                Ok(binding) => {
                    warn!(%address, %network_id, "registry lookup failed; bound to fallback address");
                    return Ok(binding);
                }
                Err(cause) => attempts.push(format!("fallback address {address}: {cause}")),
            },
            None => attempts.push("no fallback address configured".to_string()),
        }

        Err(BindingError {
            network_id,
            attempts,
        })
    }

    async fn network_id(&self, session: &Session) -> String {
        match request_as::<String>(session.transport().as_ref(), "net_version", json!([])).await {
            Ok(id) => id,
            Err(err) => {
                warn!(%err, configured = %self.configured_network_id, "net_version failed; using configured network id");
                self.configured_network_id.clone()
            }
        }
    }
}

/// An address only counts as bound once it answers the candidate count query.
async fn verify_deployment(session: &Session, address: Address) -> Result<ContractBinding, String> {
    let binding = ContractBinding::new(address, Arc::clone(session.transport()));
    binding
        .call(&Voting::getCountCandidatesCall {})
        .await
        .map(|_| binding)
        .map_err(|err| err.to_string())
}

#[cfg(test)]
#[path = "tests/binder_tests.rs"]
mod tests;

use std::sync::Arc;

use alloy_primitives::Address;
use chrono::NaiveDate;
use shared::domain::{CandidateId, ConnectionMode, VotingWindow};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};

pub mod auth;
pub mod binder;
pub mod config;
pub mod contract;
pub mod provider;
pub mod reads;
pub mod refresh;
pub mod submitter;
pub mod transport;

pub use binder::{ArtifactRegistry, BindingError, ContractBinder, DeploymentRegistry};
pub use config::Settings;
pub use contract::ContractBinding;
pub use provider::{ConnectionError, ProviderResolver, Session};
pub use reads::{CandidateList, PerItemReadError, ReadError};
pub use refresh::RefreshController;
pub use submitter::{
    ContractMethod, GasPolicy, Rejection, TransactionOutcome, TransactionSubmitter,
    ValidationError, WriteAction,
};
pub use transport::{HttpTransport, LedgerTransport, RpcError};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

/// Events published to presentation code.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    CandidatesRefreshed(CandidateList),
    Notification {
        method: ContractMethod,
        success: bool,
        message: String,
    },
}

/// Errors that end a session before it starts. Both are fatal until the
/// caller resolves the provider and binds again.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Settings(#[from] config::SettingsError),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Binding(#[from] BindingError),
}

/// One resolved session bound to one contract instance.
pub struct VotingClient {
    session: Session,
    binding: ContractBinding,
    submitter: TransactionSubmitter,
    refresh: RefreshController,
    events: broadcast::Sender<ClientEvent>,
}

impl VotingClient {
    pub async fn connect(settings: &Settings) -> Result<Arc<Self>, SessionError> {
        let resolver = ProviderResolver::from_settings(settings)?;
        let binder = ContractBinder::from_settings(settings)?;
        let session = resolver.resolve().await?;
        let binding = binder.bind(&session).await?;
        info!(
            mode = %session.mode(),
            account = %session.account(),
            contract = %binding.address(),
            "voting session ready"
        );
        Ok(Self::new(
            session,
            binding,
            TransactionSubmitter::from_settings(settings),
        ))
    }

    pub fn new(
        session: Session,
        binding: ContractBinding,
        submitter: TransactionSubmitter,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            session,
            binding,
            submitter,
            refresh: RefreshController::new(events.clone()),
            events,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn binding(&self) -> &ContractBinding {
        &self.binding
    }

    pub fn connection_mode(&self) -> ConnectionMode {
        self.session.mode()
    }

    pub fn account(&self) -> Address {
        self.session.account()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub async fn load_candidates(&self) -> Result<CandidateList, ReadError> {
        self.refresh.refresh(&self.binding).await
    }

    pub async fn displayed_candidates(&self) -> Option<CandidateList> {
        self.refresh.displayed().await
    }

    pub async fn voting_window(&self) -> Result<Option<VotingWindow>, ReadError> {
        reads::load_voting_window(&self.binding).await
    }

    pub async fn has_voted(&self) -> Result<bool, ReadError> {
        reads::has_voted(&self.binding, self.session.account()).await
    }

    pub async fn add_candidate(
        &self,
        name: &str,
        party: &str,
    ) -> Result<TransactionOutcome, ValidationError> {
        self.execute(WriteAction::AddCandidate {
            name: name.to_string(),
            party: party.to_string(),
        })
        .await
    }

    pub async fn vote(
        &self,
        candidate: Option<CandidateId>,
    ) -> Result<TransactionOutcome, ValidationError> {
        self.execute(WriteAction::Vote { candidate }).await
    }

    pub async fn set_dates(&self, start: u64, end: u64) -> Result<TransactionOutcome, ValidationError> {
        self.execute(WriteAction::SetDates { start, end }).await
    }

    pub async fn set_dates_from_calendar(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<TransactionOutcome, ValidationError> {
        let window = VotingWindow::from_calendar_dates(start, end).map_err(|err| {
            self.notify(ContractMethod::SetDates, false, err.to_string());
            ValidationError::from(err)
        })?;
        self.set_dates(window.start(), window.end()).await
    }

    async fn execute(&self, action: WriteAction) -> Result<TransactionOutcome, ValidationError> {
        let method = action.method();
        let outcome = match self
            .submitter
            .submit(&self.binding, &self.session, action)
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                self.notify(method, false, err.to_string());
                return Err(err);
            }
        };

        match &outcome {
            TransactionOutcome::Confirmed(_) => {
                self.notify(method, true, method.success_message().to_string());
                if let Some(Err(err)) = self.refresh.after_mutation(&self.binding, method).await {
                    warn!(%method, %err, "candidate refresh after mutation failed");
                    self.notify(method, false, err.to_string());
                }
            }
            TransactionOutcome::Rejected(rejection) => {
                self.notify(method, false, rejection.user_message());
            }
        }
        Ok(outcome)
    }

    fn notify(&self, method: ContractMethod, success: bool, message: String) {
        let _ = self.events.send(ClientEvent::Notification {
            method,
            success,
            message,
        });
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

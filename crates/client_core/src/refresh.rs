//! Keeps the displayed candidate list in step with the ledger after mutations.

use tokio::sync::{broadcast, Mutex, RwLock};
use tracing::debug;

use crate::{
    contract::ContractBinding,
    reads::{load_candidates, CandidateList, ReadError},
    submitter::ContractMethod,
    ClientEvent,
};

pub struct RefreshController {
    /// Held for the whole reload so refreshes against a binding never overlap.
    gate: Mutex<()>,
    displayed: RwLock<Option<CandidateList>>,
    events: broadcast::Sender<ClientEvent>,
}

impl RefreshController {
    pub fn new(events: broadcast::Sender<ClientEvent>) -> Self {
        Self {
            gate: Mutex::new(()),
            displayed: RwLock::new(None),
            events,
        }
    }

    /// Reloads the full list and replaces the displayed one wholesale.
    pub async fn refresh(&self, binding: &ContractBinding) -> Result<CandidateList, ReadError> {
        let _guard = self.gate.lock().await;
        debug!(contract = %binding.address(), "refreshing candidate list");
        let list = load_candidates(binding).await?;
        *self.displayed.write().await = Some(list.clone());
        let _ = self.events.send(ClientEvent::CandidatesRefreshed(list.clone()));
        Ok(list)
    }

    /// Runs after a confirmed call; `None` when the method cannot affect the list.
    pub async fn after_mutation(
        &self,
        binding: &ContractBinding,
        method: ContractMethod,
    ) -> Option<Result<CandidateList, ReadError>> {
        if !method.refreshes_candidates() {
            return None;
        }
        Some(self.refresh(binding).await)
    }

    pub async fn displayed(&self) -> Option<CandidateList> {
        self.displayed.read().await.clone()
    }
}

#[cfg(test)]
#[path = "tests/refresh_tests.rs"]
mod tests;

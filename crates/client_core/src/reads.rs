//! Read-only queries against the bound contract.
//!
//! Candidate enumeration is collect-all, fail-individually: every id in
//! `1..=count` is fetched independently and the pipeline only completes once
//! all of them have settled. A failed id becomes an inline error instead of
//! hiding the rest of the list.

use alloy_primitives::{Address, U256};
use futures::future::join_all;
use shared::domain::{Candidate, CandidateId, VotingWindow, WindowError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    contract::{to_u64, ContractBinding, Voting},
    transport::RpcError,
};

#[derive(Debug, Clone, Error)]
pub enum ReadError {
    #[error("error loading candidates: {0}")]
    Count(RpcError),
    #[error("{what} {value} is out of range")]
    OutOfRange { what: &'static str, value: String },
    #[error("error loading voting dates: {0}")]
    Window(RpcError),
    #[error("contract reported invalid voting dates: {0}")]
    InvalidWindow(WindowError),
    #[error("error checking vote status: {0}")]
    VoteStatus(RpcError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("candidate {id} failed to load: {message}")]
pub struct PerItemReadError {
    pub id: CandidateId,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateList {
    /// Successfully loaded candidates, ascending by id.
    pub candidates: Vec<Candidate>,
    /// Ids that failed, ascending.
    pub errors: Vec<PerItemReadError>,
    /// The contract reported a count of zero; not an error.
    pub no_candidates: bool,
}

impl CandidateList {
    fn none_registered() -> Self {
        Self {
            no_candidates: true,
            ..Self::default()
        }
    }

    pub fn get(&self, id: CandidateId) -> Option<&Candidate> {
        self.candidates.iter().find(|candidate| candidate.id == id)
    }

    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}

pub async fn load_candidates(binding: &ContractBinding) -> Result<CandidateList, ReadError> {
    let count = binding
        .call(&Voting::getCountCandidatesCall {})
        .await
        .map_err(ReadError::Count)?
        .count;
    let count = to_u64(count).ok_or_else(|| ReadError::OutOfRange {
        what: "candidate count",
        value: count.to_string(),
    })?;
    debug!(count, contract = %binding.address(), "candidate count loaded");

    if count == 0 {
        info!("no candidates added yet");
        return Ok(CandidateList::none_registered());
    }

    let settled = join_all((1..=count).filter_map(CandidateId::new).map(|id| async move {
        (id, fetch_candidate(binding, id).await)
    }))
    .await;

    let mut list = CandidateList::default();
    for (id, result) in settled {
        match result {
            Ok(candidate) => list.candidates.push(candidate),
            Err(message) => {
                warn!(%id, %message, "candidate failed to load");
                list.errors.push(PerItemReadError { id, message });
            }
        }
    }
    list.candidates.sort_by_key(|candidate| candidate.id);
    list.errors.sort_by_key(|err| err.id);
    Ok(list)
}

async fn fetch_candidate(binding: &ContractBinding, id: CandidateId) -> Result<Candidate, String> {
    let record = binding
        .call(&Voting::getCandidateCall {
            candidateId: U256::from(id.get()),
        })
        .await
        .map_err(|err| err.to_string())?;
    let vote_count = to_u64(record.voteCount)
        .ok_or_else(|| format!("vote count {} is out of range", record.voteCount))?;
    Ok(Candidate {
        id,
        name: record.name,
        party: record.party,
        vote_count,
    })
}

/// `None` until the admin has set the dates (the contract reports zeros).
pub async fn load_voting_window(
    binding: &ContractBinding,
) -> Result<Option<VotingWindow>, ReadError> {
    let dates = binding
        .call(&Voting::getDatesCall {})
        .await
        .map_err(ReadError::Window)?;
    if dates.startDate.is_zero() && dates.endDate.is_zero() {
        return Ok(None);
    }
    let timestamp = |value: U256| {
        to_u64(value).ok_or_else(|| ReadError::OutOfRange {
            what: "voting date",
            value: value.to_string(),
        })
    };
    let start = timestamp(dates.startDate)?;
    let end = timestamp(dates.endDate)?;
    VotingWindow::new(start, end)
        .map(Some)
        .map_err(ReadError::InvalidWindow)
}

pub async fn has_voted(binding: &ContractBinding, account: Address) -> Result<bool, ReadError> {
    binding
        .call_from(Some(account), &Voting::checkVoteCall {})
        .await
        .map(|status| status.voted)
        .map_err(ReadError::VoteStatus)
}

#[cfg(test)]
#[path = "tests/reads_tests.rs"]
mod tests;

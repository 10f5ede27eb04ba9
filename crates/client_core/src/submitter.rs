//! State-changing calls: local validation, submission, settlement and
//! failure classification.

use std::{fmt, time::Duration};

use alloy_primitives::{Address, U256};
use serde::Deserialize;
use serde_json::json;
use shared::{
    domain::{CandidateId, VotingWindow, WindowError},
    protocol::{quantity, SendTransactionParams, TransactionReceipt},
};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    config::Settings,
    contract::{encode_call, ContractBinding, Voting},
    provider::Session,
    transport::{request_as, RpcError},
};

const GWEI: u64 = 1_000_000_000;

/// Lowercased fragments that mean the remote execution itself refused the call.
const REJECTION_PATTERNS: &[&str] = &[
    "revert",
    "vm exception",
    "invalid opcode",
    "internal json-rpc error",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractMethod {
    AddCandidate,
    Vote,
    SetDates,
}

impl ContractMethod {
    /// Whether a confirmed call changes what the candidate list shows.
    pub fn refreshes_candidates(self) -> bool {
        matches!(self, Self::AddCandidate | Self::Vote)
    }

    pub fn success_message(self) -> &'static str {
        match self {
            Self::AddCandidate => "Candidate added successfully!",
            Self::Vote => "Vote cast successfully!",
            Self::SetDates => "Voting dates set successfully!",
        }
    }

    fn rejection_hint(self) -> &'static str {
        match self {
            Self::AddCandidate => {
                "Contract rejected the candidate. Make sure this account may register candidates."
            }
            Self::Vote => {
                "Make sure voting dates are set by the admin and the voting window is open; each account may vote only once."
            }
            Self::SetDates => {
                "Contract rejected the dates. Make sure dates haven't been set before and the end date is after the start date."
            }
        }
    }
}

impl fmt::Display for ContractMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddCandidate => f.write_str("addCandidate"),
            Self::Vote => f.write_str("vote"),
            Self::SetDates => f.write_str("setDates"),
        }
    }
}

/// A user action as entered, before validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteAction {
    AddCandidate { name: String, party: String },
    Vote { candidate: Option<CandidateId> },
    SetDates { start: u64, end: u64 },
}

impl WriteAction {
    pub fn method(&self) -> ContractMethod {
        match self {
            Self::AddCandidate { .. } => ContractMethod::AddCandidate,
            Self::Vote { .. } => ContractMethod::Vote,
            Self::SetDates { .. } => ContractMethod::SetDates,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("please enter both name and party")]
    MissingCandidateDetails,
    #[error("please select a candidate")]
    NoCandidateSelected,
    #[error(transparent)]
    InvalidWindow(#[from] WindowError),
}

/// Validated call arguments, in contract parameter order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallArgs {
    AddCandidate { name: String, party: String },
    Vote { candidate: CandidateId },
    SetDates { window: VotingWindow },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub args: CallArgs,
    pub from: Address,
    pub gas_limit: u64,
    pub gas_price: Option<u64>,
}

impl TransactionRequest {
    pub fn method(&self) -> ContractMethod {
        match self.args {
            CallArgs::AddCandidate { .. } => ContractMethod::AddCandidate,
            CallArgs::Vote { .. } => ContractMethod::Vote,
            CallArgs::SetDates { .. } => ContractMethod::SetDates,
        }
    }

    fn calldata(&self) -> String {
        match &self.args {
            CallArgs::AddCandidate { name, party } => encode_call(&Voting::addCandidateCall {
                name: name.clone(),
                party: party.clone(),
            }),
            CallArgs::Vote { candidate } => encode_call(&Voting::voteCall {
                candidateId: U256::from(candidate.get()),
            }),
            CallArgs::SetDates { window } => encode_call(&Voting::setDatesCall {
                startDate: U256::from(window.start()),
                endDate: U256::from(window.end()),
            }),
        }
    }

    pub fn to_params(&self, contract: Address) -> SendTransactionParams {
        SendTransactionParams {
            from: self.from,
            to: contract,
            data: self.calldata(),
            gas: quantity(self.gas_limit),
            gas_price: self.gas_price.map(quantity),
        }
    }
}

/// Gas ceilings per method and optional explicit price hints. Write gas is not
/// estimated, so the limits are generous fixed ceilings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GasPolicy {
    pub add_candidate_gas: u64,
    pub vote_gas: u64,
    pub set_dates_gas: u64,
    pub add_candidate_gas_price: Option<u64>,
    pub vote_gas_price: Option<u64>,
    pub set_dates_gas_price: Option<u64>,
}

impl Default for GasPolicy {
    fn default() -> Self {
        Self {
            add_candidate_gas: 300_000,
            vote_gas: 300_000,
            set_dates_gas: 500_000,
            add_candidate_gas_price: None,
            vote_gas_price: Some(20 * GWEI),
            set_dates_gas_price: None,
        }
    }
}

impl GasPolicy {
    fn limits_for(&self, method: ContractMethod) -> (u64, Option<u64>) {
        match method {
            ContractMethod::AddCandidate => (self.add_candidate_gas, self.add_candidate_gas_price),
            ContractMethod::Vote => (self.vote_gas, self.vote_gas_price),
            ContractMethod::SetDates => (self.set_dates_gas, self.set_dates_gas_price),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    ContractRejected {
        message: String,
        hint: Option<&'static str>,
    },
    TransportOrUserError {
        message: String,
    },
}

impl Rejection {
    pub fn user_message(&self) -> String {
        match self {
            Self::ContractRejected {
                message,
                hint: Some(hint),
            } => format!("{hint} ({message})"),
            Self::ContractRejected { message, hint: None } => {
                format!("Contract rejected the call: {message}")
            }
            Self::TransportOrUserError { message } => format!("Error: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    Confirmed(TransactionReceipt),
    Rejected(Rejection),
}

impl TransactionOutcome {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed(_))
    }
}

pub fn classify_failure(method: ContractMethod, err: &RpcError) -> Rejection {
    let text = err.searchable_text();
    if REJECTION_PATTERNS.iter().any(|pattern| text.contains(pattern)) {
        Rejection::ContractRejected {
            message: err.to_string(),
            hint: Some(method.rejection_hint()),
        }
    } else {
        Rejection::TransportOrUserError {
            message: err.to_string(),
        }
    }
}

fn rejected(method: ContractMethod, err: &RpcError) -> TransactionOutcome {
    let rejection = classify_failure(method, err);
    warn!(%method, ?rejection, "transaction failed");
    TransactionOutcome::Rejected(rejection)
}

pub struct TransactionSubmitter {
    gas: GasPolicy,
    receipt_poll_interval: Duration,
}

impl TransactionSubmitter {
    pub fn new(gas: GasPolicy, receipt_poll_interval: Duration) -> Self {
        Self {
            gas,
            receipt_poll_interval,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.gas.clone(), settings.receipt_poll_interval())
    }

    /// Local validation; nothing here touches the network.
    pub fn prepare(
        &self,
        session: &Session,
        action: WriteAction,
    ) -> Result<TransactionRequest, ValidationError> {
        let method = action.method();
        let args = match action {
            WriteAction::AddCandidate { name, party } => {
                let (name, party) = (name.trim(), party.trim());
                if name.is_empty() || party.is_empty() {
                    return Err(ValidationError::MissingCandidateDetails);
                }
                CallArgs::AddCandidate {
                    name: name.to_string(),
                    party: party.to_string(),
                }
            }
            WriteAction::Vote { candidate } => CallArgs::Vote {
                candidate: candidate.ok_or(ValidationError::NoCandidateSelected)?,
            },
            WriteAction::SetDates { start, end } => CallArgs::SetDates {
                window: VotingWindow::new(start, end)?,
            },
        };
        let (gas_limit, gas_price) = self.gas.limits_for(method);
        Ok(TransactionRequest {
            args,
            from: session.account(),
            gas_limit,
            gas_price,
        })
    }

    pub async fn submit(
        &self,
        binding: &ContractBinding,
        session: &Session,
        action: WriteAction,
    ) -> Result<TransactionOutcome, ValidationError> {
        let request = self.prepare(session, action)?;
        Ok(self.send(binding, &request).await)
    }

    /// Sends a prepared request and waits for it to settle. No retries; a
    /// rejected call is reported as-is.
    pub async fn send(
        &self,
        binding: &ContractBinding,
        request: &TransactionRequest,
    ) -> TransactionOutcome {
        let method = request.method();
        let params = request.to_params(binding.address());
        info!(
            %method,
            from = %request.from,
            gas = request.gas_limit,
            gas_price = ?request.gas_price,
            "submitting transaction"
        );

        let hash: String =
            match request_as(binding.transport(), "eth_sendTransaction", json!([params])).await {
                Ok(hash) => hash,
                Err(err) => return rejected(method, &err),
            };

        match self.await_receipt(binding, &hash).await {
            Ok(receipt) if receipt.reverted() => {
                warn!(%method, %hash, "transaction reverted");
                TransactionOutcome::Rejected(Rejection::ContractRejected {
                    message: format!("transaction {hash} reverted"),
                    hint: Some(method.rejection_hint()),
                })
            }
            Ok(receipt) => {
                info!(%method, %hash, block = ?receipt.block_number, "transaction confirmed");
                TransactionOutcome::Confirmed(receipt)
            }
            Err(err) => rejected(method, &err),
        }
    }

    async fn await_receipt(
        &self,
        binding: &ContractBinding,
        hash: &str,
    ) -> Result<TransactionReceipt, RpcError> {
        loop {
            // The transaction is already in flight; only a node answer settles it.
            match request_as::<Option<TransactionReceipt>>(
                binding.transport(),
                "eth_getTransactionReceipt",
                json!([hash]),
            )
            .await
            {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(RpcError::Http { endpoint, message }) => {
                    warn!(%hash, %endpoint, %message, "receipt poll failed; retrying");
                }
                Err(err) => return Err(err),
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}

#[cfg(test)]
#[path = "tests/submitter_tests.rs"]
mod tests;

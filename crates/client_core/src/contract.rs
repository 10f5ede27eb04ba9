//! ABI surface of the deployed voting contract and the session's handle to it.

use std::{fmt, sync::Arc};

use alloy_primitives::{hex, Address, U256};
use alloy_sol_types::{sol, SolCall};
use serde_json::json;
use shared::protocol::CallParams;

use crate::transport::{request_as, LedgerTransport, RpcError};

sol! {
    interface Voting {
        function getCountCandidates() external view returns (uint256 count);
        function getCandidate(uint256 candidateId) external view returns (
            uint256 id,
            string name,
            string party,
            uint256 voteCount
        );
        function addCandidate(string name, string party) external;
        function vote(uint256 candidateId) external;
        function setDates(uint256 startDate, uint256 endDate) external;
        function getDates() external view returns (uint256 startDate, uint256 endDate);
        function checkVote() external view returns (bool voted);
    }
}

pub(crate) fn to_u64(value: U256) -> Option<u64> {
    u64::try_from(value).ok()
}

pub(crate) fn encode_call<C: SolCall>(call: &C) -> String {
    hex::encode_prefixed(call.abi_encode())
}

/// Callable handle to the one contract instance bound for a session.
#[derive(Clone)]
pub struct ContractBinding {
    address: Address,
    transport: Arc<dyn LedgerTransport>,
}

impl ContractBinding {
    pub fn new(address: Address, transport: Arc<dyn LedgerTransport>) -> Self {
        Self { address, transport }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub(crate) fn transport(&self) -> &dyn LedgerTransport {
        self.transport.as_ref()
    }

    pub async fn call<C>(&self, call: &C) -> Result<C::Return, RpcError>
    where
        C: SolCall + Sync,
    {
        self.call_from(None, call).await
    }

    /// Read-only call evaluated as if sent by `from`; matters for views that read `msg.sender`.
    pub async fn call_from<C>(&self, from: Option<Address>, call: &C) -> Result<C::Return, RpcError>
    where
        C: SolCall + Sync,
    {
        let params = CallParams {
            from,
            to: self.address,
            data: encode_call(call),
        };
        let raw: String =
            request_as(self.transport(), "eth_call", json!([params, "latest"])).await?;
        let bytes = hex::decode(&raw)
            .map_err(|err| RpcError::Decode(format!("{}: {err}", C::SIGNATURE)))?;
        C::abi_decode_returns(&bytes, true)
            .map_err(|err| RpcError::Decode(format!("{}: {err}", C::SIGNATURE)))
    }
}

impl fmt::Debug for ContractBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractBinding")
            .field("address", &self.address)
            .field("endpoint", &self.transport.endpoint())
            .finish()
    }
}

//! Scripted in-memory ledger node for unit tests.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex},
    time::Duration,
};

use alloy_primitives::{hex, Address, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use serde_json::{json, Value};
use shared::domain::ConnectionMode;

use crate::{
    contract::{ContractBinding, Voting},
    provider::Session,
    transport::{LedgerTransport, RpcError},
};

pub(crate) const GANACHE_REVERT: &str = "VM Exception while processing transaction: revert";
pub(crate) const USER_DENIED: &str = "MetaMask Tx Signature: User denied transaction signature.";

pub(crate) fn account(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub(crate) fn contract_address() -> Address {
    Address::repeat_byte(0xc0)
}

pub(crate) struct LedgerState {
    pub accounts: Vec<Address>,
    pub refuse_access: Option<String>,
    pub network_id: Option<String>,
    pub contract: Option<Address>,
    pub candidates: Vec<(String, String, U256)>,
    /// Reported instead of the real candidate count when set.
    pub count_override: Option<U256>,
    pub failing_ids: HashSet<u64>,
    pub fail_count: Option<String>,
    pub dates: (u64, u64),
    pub now: u64,
    pub voted: HashSet<Address>,
    pub send_error: Option<String>,
    pub revert_via_receipt: bool,
    pub pending_polls: u32,
    /// Receipt polls that fail as if the node were unreachable.
    pub unreachable_polls: u32,
    pub call_delay: Option<Duration>,
    pub sent: Vec<Value>,
    pub log: Vec<String>,
    next_tx: u64,
    receipts: HashMap<String, Value>,
}

pub(crate) struct FakeLedger {
    endpoint: String,
    state: Mutex<LedgerState>,
}

fn rpc_error(code: i64, message: &str) -> RpcError {
    RpcError::Rpc {
        code,
        message: message.to_string(),
        data: None,
    }
}

fn encoded(bytes: Vec<u8>) -> Value {
    json!(hex::encode_prefixed(bytes))
}

fn param_address(params: &Value, field: &str) -> Option<Address> {
    params[0][field].as_str().and_then(|raw| raw.parse().ok())
}

fn param_data(params: &Value) -> Vec<u8> {
    params[0]["data"]
        .as_str()
        .and_then(|raw| hex::decode(raw).ok())
        .unwrap_or_default()
}

impl FakeLedger {
    pub(crate) fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            state: Mutex::new(LedgerState {
                accounts: vec![account(0xaa), account(0xbb)],
                refuse_access: None,
                network_id: Some("5777".into()),
                contract: Some(contract_address()),
                candidates: Vec::new(),
                count_override: None,
                failing_ids: HashSet::new(),
                fail_count: None,
                dates: (0, 0),
                now: 1_749_000_000,
                voted: HashSet::new(),
                send_error: None,
                revert_via_receipt: false,
                pending_polls: 0,
                unreachable_polls: 0,
                call_delay: None,
                sent: Vec::new(),
                log: Vec::new(),
                next_tx: 1,
                receipts: HashMap::new(),
            }),
        }
    }

    pub(crate) fn with(self, configure: impl FnOnce(&mut LedgerState)) -> Self {
        configure(&mut self.state.lock().expect("ledger lock"));
        self
    }

    pub(crate) fn with_candidates(self, names: &[(&str, &str, u64)]) -> Self {
        self.with(|state| {
            state.candidates = names
                .iter()
                .map(|(name, party, votes)| (name.to_string(), party.to_string(), U256::from(*votes)))
                .collect();
        })
    }

    pub(crate) fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub(crate) fn update(&self, configure: impl FnOnce(&mut LedgerState)) {
        configure(&mut self.state.lock().expect("ledger lock"));
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.state.lock().expect("ledger lock").log.clone()
    }

    pub(crate) fn count(&self, label: &str) -> usize {
        self.log().iter().filter(|entry| entry.as_str() == label).count()
    }

    pub(crate) fn candidate_fetches(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .log()
            .iter()
            .filter_map(|entry| entry.strip_prefix("getCandidate:"))
            .filter_map(|id| id.parse().ok())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub(crate) fn sent(&self) -> Vec<Value> {
        self.state.lock().expect("ledger lock").sent.clone()
    }

    pub(crate) fn network_calls(&self) -> usize {
        self.log().len()
    }

    fn handle(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        let mut state = self.state.lock().expect("ledger lock");
        match method {
            "eth_accounts" => {
                state.log.push(method.to_string());
                Ok(json!(state.accounts))
            }
            "eth_requestAccounts" => {
                state.log.push(method.to_string());
                match &state.refuse_access {
                    Some(reason) => Err(rpc_error(4001, reason)),
                    None => Ok(json!(state.accounts)),
                }
            }
            "net_version" => {
                state.log.push(method.to_string());
                state
                    .network_id
                    .clone()
                    .map(Value::from)
                    .ok_or_else(|| rpc_error(-32601, "method not found"))
            }
            "eth_call" => Self::handle_call(&mut state, params),
            "eth_sendTransaction" => Self::handle_send(&mut state, params),
            "eth_getTransactionReceipt" => {
                state.log.push(method.to_string());
                if state.unreachable_polls > 0 {
                    state.unreachable_polls -= 1;
                    return Err(RpcError::Http {
                        endpoint: self.endpoint.clone(),
                        message: "connection reset".into(),
                    });
                }
                if state.pending_polls > 0 {
                    state.pending_polls -= 1;
                    return Ok(Value::Null);
                }
                let hash = params[0].as_str().unwrap_or_default();
                Ok(state.receipts.get(hash).cloned().unwrap_or(Value::Null))
            }
            other => Err(rpc_error(-32601, &format!("method {other} not found"))),
        }
    }

    fn handle_call(state: &mut LedgerState, params: &Value) -> Result<Value, RpcError> {
        let to = param_address(params, "to");
        let data = param_data(params);
        if to.is_none() || to != state.contract || data.len() < 4 {
            state.log.push("eth_call:no-code".into());
            return Ok(json!("0x"));
        }

        let selector: [u8; 4] = [data[0], data[1], data[2], data[3]];
        if selector == Voting::getCountCandidatesCall::SELECTOR {
            state.log.push("getCountCandidates".into());
            if let Some(reason) = &state.fail_count {
                return Err(rpc_error(-32000, reason));
            }
            let count = state
                .count_override
                .unwrap_or_else(|| U256::from(state.candidates.len()));
            return Ok(encoded(Voting::getCountCandidatesCall::abi_encode_returns(&(count,))));
        }
        if selector == Voting::getCandidateCall::SELECTOR {
            let call = Voting::getCandidateCall::abi_decode(&data, true)
                .map_err(|err| rpc_error(-32602, &err.to_string()))?;
            let id = u64::try_from(call.candidateId).unwrap_or(u64::MAX);
            state.log.push(format!("getCandidate:{id}"));
            if state.failing_ids.contains(&id) {
                return Err(rpc_error(-32000, "header not found"));
            }
            let index = usize::try_from(id).ok().and_then(|id| id.checked_sub(1));
            let Some((name, party, votes)) = index.and_then(|index| state.candidates.get(index))
            else {
                return Err(rpc_error(-32000, GANACHE_REVERT));
            };
            return Ok(encoded(Voting::getCandidateCall::abi_encode_returns(&(
                U256::from(id),
                name.clone(),
                party.clone(),
                *votes,
            ))));
        }
        if selector == Voting::getDatesCall::SELECTOR {
            state.log.push("getDates".into());
            let (start, end) = state.dates;
            return Ok(encoded(Voting::getDatesCall::abi_encode_returns(&(
                U256::from(start),
                U256::from(end),
            ))));
        }
        if selector == Voting::checkVoteCall::SELECTOR {
            state.log.push("checkVote".into());
            let voted = param_address(params, "from").is_some_and(|from| state.voted.contains(&from));
            return Ok(encoded(Voting::checkVoteCall::abi_encode_returns(&(voted,))));
        }
        Err(rpc_error(-32000, GANACHE_REVERT))
    }

    fn handle_send(state: &mut LedgerState, params: &Value) -> Result<Value, RpcError> {
        state.sent.push(params[0].clone());
        if let Some(reason) = &state.send_error {
            state.log.push("send:denied".into());
            return Err(rpc_error(4001, reason));
        }
        let data = param_data(params);
        let from = param_address(params, "from");

        let outcome = if let Ok(call) = Voting::addCandidateCall::abi_decode(&data, true) {
            state.log.push("send:addCandidate".into());
            state.candidates.push((call.name, call.party, U256::ZERO));
            Ok(())
        } else if let Ok(call) = Voting::voteCall::abi_decode(&data, true) {
            state.log.push("send:vote".into());
            let (start, end) = state.dates;
            let id = usize::try_from(u64::try_from(call.candidateId).unwrap_or(u64::MAX))
                .unwrap_or(usize::MAX);
            let open = start != 0 && start <= state.now && state.now < end;
            match from {
                Some(from)
                    if open
                        && !state.voted.contains(&from)
                        && id >= 1
                        && id <= state.candidates.len() =>
                {
                    state.voted.insert(from);
                    state.candidates[id - 1].2 += U256::from(1);
                    Ok(())
                }
                _ => Err(()),
            }
        } else if let Ok(call) = Voting::setDatesCall::abi_decode(&data, true) {
            state.log.push("send:setDates".into());
            let start = u64::try_from(call.startDate).unwrap_or(u64::MAX);
            let end = u64::try_from(call.endDate).unwrap_or(0);
            if state.dates == (0, 0) && end > start {
                state.dates = (start, end);
                Ok(())
            } else {
                Err(())
            }
        } else {
            state.log.push("send:unknown".into());
            Err(())
        };

        let reverted = outcome.is_err();
        if reverted && !state.revert_via_receipt {
            return Err(rpc_error(-32000, GANACHE_REVERT));
        }

        let hash = format!("0x{:064x}", state.next_tx);
        state.next_tx += 1;
        let receipt = json!({
            "transactionHash": hash,
            "blockNumber": format!("{:#x}", state.next_tx),
            "gasUsed": "0x5208",
            "status": if reverted { "0x0" } else { "0x1" },
        });
        state.receipts.insert(hash.clone(), receipt);
        Ok(json!(hash))
    }
}

#[async_trait]
impl LedgerTransport for FakeLedger {
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let delay = self.state.lock().expect("ledger lock").call_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.handle(method, &params)
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

pub(crate) fn local_session(ledger: &Arc<FakeLedger>) -> Session {
    Session::new(
        account(0xaa),
        ConnectionMode::LocalNode,
        Arc::clone(ledger) as Arc<dyn LedgerTransport>,
    )
}

pub(crate) fn bound(ledger: &Arc<FakeLedger>) -> ContractBinding {
    ContractBinding::new(
        contract_address(),
        Arc::clone(ledger) as Arc<dyn LedgerTransport>,
    )
}

async fn serve_rpc(
    axum::extract::State(ledger): axum::extract::State<Arc<FakeLedger>>,
    axum::Json(request): axum::Json<Value>,
) -> axum::Json<Value> {
    let method = request["method"].as_str().unwrap_or_default().to_string();
    let params = request["params"].clone();
    let id = request["id"].clone();
    let body = match ledger.request(&method, params).await {
        Ok(result) => json!({ "jsonrpc": "2.0", "id": id, "result": result }),
        Err(RpcError::Rpc { code, message, data }) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message, "data": data },
        }),
        Err(other) => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32603, "message": other.to_string() },
        }),
    };
    axum::Json(body)
}

/// Serves `ledger` as a JSON-RPC node on an ephemeral local port; returns its URL.
pub(crate) async fn spawn_fake_node(ledger: Arc<FakeLedger>) -> String {
    let app = axum::Router::new()
        .route("/", axum::routing::post(serve_rpc))
        .with_state(ledger);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake node");
    let addr = listener.local_addr().expect("fake node addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve fake node");
    });
    format!("http://{addr}")
}

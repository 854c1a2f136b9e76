use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::{
    ActorState, Address, ChainEpoch, ChainError, ChainQuery, LockedFunds, MinerInfo, MinerPower,
    SectorCounts, TipSet, TipSetKey, TokenAmount,
};

pub const DEFAULT_RPC_URL: &str = "https://api.node.glif.io/rpc/v0";

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReadState {
    state: MinerStateFunds,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MinerStateFunds {
    pre_commit_deposits: TokenAmount,
    locked_funds: TokenAmount,
    #[serde(alias = "InitialPledgeRequirement")]
    initial_pledge: TokenAmount,
    #[serde(default)]
    fee_debt: TokenAmount,
}

/// JSON-RPC client for a Lotus full node.
#[derive(Clone)]
pub struct LotusClient {
    http: Client,
    url: String,
    token: Option<String>,
    next_id: Arc<AtomicU64>,
}

impl LotusClient {
    pub fn new(
        url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ChainError> {
        let http = Client::builder()
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            url: url.into(),
            token,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    #[instrument(skip(self, params), level = "debug")]
    async fn call<T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: Value,
    ) -> Result<T, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        let mut req = self.http.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?.error_for_status()?;
        let envelope: RpcResponse = resp.json().await?;

        if let Some(err) = envelope.error {
            return Err(ChainError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        let result = match envelope.result {
            Some(Value::Null) | None => return Err(ChainError::MissingResult { method }),
            Some(result) => result,
        };
        debug!(id, "rpc call answered");

        serde_json::from_value(result).map_err(|source| ChainError::Decode { method, source })
    }
}

#[async_trait]
impl ChainQuery for LotusClient {
    async fn chain_head(&self) -> Result<TipSet, ChainError> {
        self.call("Filecoin.ChainHead", json!([])).await
    }

    async fn tipset_by_height(&self, height: ChainEpoch) -> Result<TipSet, ChainError> {
        self.call(
            "Filecoin.ChainGetTipSetByHeight",
            json!([height, TipSetKey::head()]),
        )
        .await
    }

    async fn actor_state(
        &self,
        addr: &Address,
        key: &TipSetKey,
    ) -> Result<ActorState, ChainError> {
        self.call("Filecoin.StateGetActor", json!([addr, key])).await
    }

    async fn miner_info(&self, addr: &Address, key: &TipSetKey) -> Result<MinerInfo, ChainError> {
        self.call("Filecoin.StateMinerInfo", json!([addr, key])).await
    }

    async fn miner_power(
        &self,
        addr: &Address,
        key: &TipSetKey,
    ) -> Result<MinerPower, ChainError> {
        self.call("Filecoin.StateMinerPower", json!([addr, key])).await
    }

    async fn sector_counts(
        &self,
        addr: &Address,
        key: &TipSetKey,
    ) -> Result<SectorCounts, ChainError> {
        self.call("Filecoin.StateMinerSectorCount", json!([addr, key]))
            .await
    }

    async fn locked_funds(
        &self,
        addr: &Address,
        key: &TipSetKey,
    ) -> Result<LockedFunds, ChainError> {
        let read: ReadState = self.call("Filecoin.StateReadState", json!([addr, key])).await?;
        let funds = read.state;
        Ok(LockedFunds {
            vesting_funds: funds.locked_funds,
            initial_pledge_requirement: funds.initial_pledge,
            pre_commit_deposits: funds.pre_commit_deposits,
            fee_debt: funds.fee_debt,
        })
    }

    async fn balance(&self, addr: &Address, key: &TipSetKey) -> Result<TokenAmount, ChainError> {
        // Read through the actor at `key` rather than WalletBalance, which only answers at head.
        let actor = self.actor_state(addr, key).await?;
        Ok(actor.balance)
    }
}

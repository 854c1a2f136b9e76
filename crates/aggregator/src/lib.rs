//! One refresh cycle: query the node at a fixed chain reference, derive the
//! published values and assemble a [`Snapshot`].

mod scheduler;

use std::fmt;
use std::sync::Arc;

use chain::{Address, ChainEpoch, ChainError, ChainQuery, TokenAmount};
use derivation::{
    available_balance, balance_scale, power_scale, win_rate_per_day, ProtocolParams,
};
use state::{ChainReference, Snapshot};
use thiserror::Error;
use tracing::{debug, info, instrument};

pub use scheduler::{CycleError, Scheduler};

/// The query of a cycle that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    ChainHead,
    ActorState,
    MinerInfo,
    MinerPower,
    SectorCounts,
    LockedFunds,
    WorkerBalance,
    ControlBalance(Address),
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::ChainHead => f.write_str("chain head"),
            Query::ActorState => f.write_str("actor state"),
            Query::MinerInfo => f.write_str("miner info"),
            Query::MinerPower => f.write_str("miner power"),
            Query::SectorCounts => f.write_str("sector counts"),
            Query::LockedFunds => f.write_str("locked funds"),
            Query::WorkerBalance => f.write_str("worker balance"),
            Query::ControlBalance(addr) => write!(f, "control balance of {addr}"),
        }
    }
}

#[derive(Error, Debug)]
#[error("{query} query failed: {source}")]
pub struct AggregateError {
    pub query: Query,
    #[source]
    pub source: ChainError,
}

fn failed(query: Query) -> impl FnOnce(ChainError) -> AggregateError {
    move |source| AggregateError { query, source }
}

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("target height must not be negative, got {0}")]
    NegativeHeight(ChainEpoch),

    #[error("cannot resolve tipset at height {height}: {source}")]
    Lookup {
        height: ChainEpoch,
        #[source]
        source: ChainError,
    },
}

/// Pins the reference point used for the lifetime of the process.
/// `None` and `Some(0)` both mean the node's head.
pub async fn resolve_reference(
    client: &dyn ChainQuery,
    height: Option<ChainEpoch>,
) -> Result<ChainReference, ResolveError> {
    match height {
        None | Some(0) => {
            info!("target height: head");
            Ok(ChainReference::head())
        }
        Some(h) if h < 0 => Err(ResolveError::NegativeHeight(h)),
        Some(height) => {
            let tipset = client
                .tipset_by_height(height)
                .await
                .map_err(|source| ResolveError::Lookup { height, source })?;
            let reference = ChainReference::at(&tipset);
            info!(height = tipset.height, key = %reference.key, "target height resolved");
            Ok(reference)
        }
    }
}

pub struct SnapshotAggregator {
    client: Arc<dyn ChainQuery>,
    miner: Address,
    reference: ChainReference,
    params: ProtocolParams,
}

impl SnapshotAggregator {
    pub fn new(
        client: Arc<dyn ChainQuery>,
        miner: Address,
        reference: ChainReference,
        params: ProtocolParams,
    ) -> Self {
        Self {
            client,
            miner,
            reference,
            params,
        }
    }

    /// Runs every query of one cycle. The first failure aborts the cycle.
    ///
    /// When following head, head is read once and every query of the cycle
    /// is pinned to that tipset.
    #[instrument(skip(self), fields(miner = %self.miner, at = %self.reference.key))]
    pub async fn collect(&self) -> Result<Snapshot, AggregateError> {
        let client = self.client.as_ref();
        let miner = &self.miner;
        let reference = if self.reference.is_head() {
            let head = client.chain_head().await.map_err(failed(Query::ChainHead))?;
            debug!(height = head.height, "pinned cycle to head");
            ChainReference {
                height: None,
                key: head.key(),
            }
        } else {
            self.reference.clone()
        };
        let key = &reference.key;

        let actor = client
            .actor_state(miner, key)
            .await
            .map_err(failed(Query::ActorState))?;
        let info = client
            .miner_info(miner, key)
            .await
            .map_err(failed(Query::MinerInfo))?;
        debug!(sector_size = info.sector_size, "miner info loaded");

        let power = client
            .miner_power(miner, key)
            .await
            .map_err(failed(Query::MinerPower))?;
        let sectors = client
            .sector_counts(miner, key)
            .await
            .map_err(failed(Query::SectorCounts))?;
        let locked = client
            .locked_funds(miner, key)
            .await
            .map_err(failed(Query::LockedFunds))?;
        let worker_balance = client
            .balance(&info.worker, key)
            .await
            .map_err(failed(Query::WorkerBalance))?;

        let mut control_sum = TokenAmount::zero();
        for addr in &info.control_addresses {
            let balance = client
                .balance(addr, key)
                .await
                .map_err(failed(Query::ControlBalance(addr.clone())))?;
            control_sum = control_sum + &balance;
        }

        Ok(Snapshot {
            miner_id: miner.to_string(),
            reference,
            captured_at_ms: chrono::Utc::now().timestamp_millis(),

            total_raw_byte_power: power_scale(&power.total_power.raw_byte_power),
            total_quality_power: power_scale(&power.total_power.quality_adj_power),
            miner_raw_byte_power: power_scale(&power.miner_power.raw_byte_power),
            miner_quality_power: power_scale(&power.miner_power.quality_adj_power),

            win_per_day: win_rate_per_day(
                &power.miner_power.quality_adj_power,
                &power.total_power.quality_adj_power,
                power.has_min_power,
                self.params,
            ),

            sectors_committed: sectors.live as f64,
            sectors_active: sectors.active as f64,
            sectors_faulty: sectors.faulty as f64,
            sector_size: info.sector_size,

            worker_balance: balance_scale(&worker_balance),
            control_balance: balance_scale(&control_sum),
            miner_balance: balance_scale(&actor.balance),
            available_balance: balance_scale(&available_balance(&actor.balance, &locked)),
            pledged_balance: balance_scale(&locked.initial_pledge_requirement),
            pre_commit_balance: balance_scale(&locked.pre_commit_deposits),
            vesting_balance: balance_scale(&locked.vesting_funds),
        })
    }
}

//! Typed access to the Filecoin chain state consumed by the exporter.
//!
//! [`ChainQuery`] is the capability boundary the aggregator is written
//! against; [`LotusClient`] implements it over a Lotus node's JSON-RPC API.

mod address;
mod error;
mod lotus;
mod types;

use async_trait::async_trait;

pub use address::{Address, AddressError};
pub use error::ChainError;
pub use lotus::{LotusClient, DEFAULT_RPC_URL};
pub use types::{
    ActorState, BigNum, ChainEpoch, Cid, Claim, LockedFunds, MinerInfo, MinerPower, SectorCounts,
    StoragePower, TipSet, TipSetKey, TokenAmount,
};

/// Named queries against a remote chain node.
///
/// Every state query takes the tipset key it must be answered at, so that a
/// caller can pin a whole batch of queries to one reference point.
#[async_trait]
pub trait ChainQuery: Send + Sync {
    async fn chain_head(&self) -> Result<TipSet, ChainError>;

    async fn tipset_by_height(&self, height: ChainEpoch) -> Result<TipSet, ChainError>;

    async fn actor_state(&self, addr: &Address, key: &TipSetKey)
        -> Result<ActorState, ChainError>;

    async fn miner_info(&self, addr: &Address, key: &TipSetKey) -> Result<MinerInfo, ChainError>;

    async fn miner_power(&self, addr: &Address, key: &TipSetKey)
        -> Result<MinerPower, ChainError>;

    async fn sector_counts(
        &self,
        addr: &Address,
        key: &TipSetKey,
    ) -> Result<SectorCounts, ChainError>;

    async fn locked_funds(&self, addr: &Address, key: &TipSetKey)
        -> Result<LockedFunds, ChainError>;

    async fn balance(&self, addr: &Address, key: &TipSetKey) -> Result<TokenAmount, ChainError>;
}

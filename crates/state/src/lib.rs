use std::sync::Arc;

use arc_swap::ArcSwapOption;
use chain::{ChainEpoch, TipSet, TipSetKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The chain point every query of a refresh cycle is answered at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChainReference {
    /// `None` follows the node's head.
    pub height: Option<ChainEpoch>,
    #[serde(rename = "TipSetKey")]
    pub key: TipSetKey,
}

impl ChainReference {
    pub fn head() -> Self {
        Self {
            height: None,
            key: TipSetKey::head(),
        }
    }

    pub fn at(tipset: &TipSet) -> Self {
        Self {
            height: Some(tipset.height),
            key: tipset.key(),
        }
    }

    pub fn is_head(&self) -> bool {
        self.height.is_none()
    }
}

/// Everything published about the miner after one refresh cycle.
///
/// Power values are bytes, balances are FIL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Snapshot {
    #[serde(rename = "MinerID")]
    pub miner_id: String,
    #[serde(flatten)]
    pub reference: ChainReference,
    pub captured_at_ms: i64,

    pub total_raw_byte_power: f64,
    pub total_quality_power: f64,
    pub miner_raw_byte_power: f64,
    pub miner_quality_power: f64,

    pub win_per_day: f64,

    pub sectors_committed: f64,
    pub sectors_active: f64,
    pub sectors_faulty: f64,
    pub sector_size: u64,

    pub worker_balance: f64,
    pub control_balance: f64,
    pub miner_balance: f64,
    pub available_balance: f64,
    pub pledged_balance: f64,
    pub pre_commit_balance: f64,
    pub vesting_balance: f64,
}

/// A snapshot together with its JSON rendering, produced once at publish time.
#[derive(Debug)]
pub struct PublishedSnapshot {
    snapshot: Snapshot,
    json: String,
}

impl PublishedSnapshot {
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn json(&self) -> &str {
        &self.json
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("no snapshot has been published yet")]
pub struct NotReady;

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("failed to render snapshot: {0}")]
    Render(#[from] serde_json::Error),
}

/// Holds the latest published snapshot.
///
/// Reads are lock-free loads of an `Arc`; a publish swaps in a fully built
/// value, so readers see either the old or the new snapshot in full.
#[derive(Clone, Default)]
pub struct SnapshotStore {
    current: Arc<ArcSwapOption<PublishedSnapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Result<Arc<PublishedSnapshot>, NotReady> {
        self.current.load_full().ok_or(NotReady)
    }

    pub fn is_ready(&self) -> bool {
        self.current.load().is_some()
    }

    /// Renders `snapshot` and makes it current. On error the store is untouched.
    pub fn publish(&self, snapshot: Snapshot) -> Result<Arc<PublishedSnapshot>, PublishError> {
        let json = serde_json::to_string(&snapshot)?;
        let published = Arc::new(PublishedSnapshot { snapshot, json });
        self.current.store(Some(published.clone()));
        Ok(published)
    }
}

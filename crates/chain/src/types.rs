use std::fmt;
use std::ops::Add;

use num_bigint::BigInt;
use num_traits::Zero;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::Address;

pub type ChainEpoch = i64;

/// Arbitrary-precision integer carried on the wire as a decimal string.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct BigNum(pub BigInt);

/// Token amount in attoFIL.
pub type TokenAmount = BigNum;

/// Storage power in bytes.
pub type StoragePower = BigNum;

impl BigNum {
    pub fn zero() -> Self {
        Self(BigInt::zero())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn as_bigint(&self) -> &BigInt {
        &self.0
    }
}

impl From<u64> for BigNum {
    fn from(v: u64) -> Self {
        Self(BigInt::from(v))
    }
}

impl From<BigInt> for BigNum {
    fn from(v: BigInt) -> Self {
        Self(v)
    }
}

impl Add<&BigNum> for BigNum {
    type Output = BigNum;

    fn add(self, rhs: &BigNum) -> BigNum {
        BigNum(self.0 + &rhs.0)
    }
}

impl fmt::Display for BigNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl Serialize for BigNum {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for BigNum {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<BigInt>()
            .map(BigNum)
            .map_err(|err| de::Error::custom(format!("invalid big integer `{raw}`: {err}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cid {
    #[serde(rename = "/")]
    pub root: String,
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.root)
    }
}

/// Identifies a tipset. The empty key means "the node's current head".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TipSetKey(pub Vec<Cid>);

impl TipSetKey {
    pub fn head() -> Self {
        Self(Vec::new())
    }

    pub fn is_head(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for TipSetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_head() {
            return f.write_str("head");
        }
        let joined = self
            .0
            .iter()
            .map(|cid| cid.root.as_str())
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{{{joined}}}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TipSet {
    pub cids: Vec<Cid>,
    pub height: ChainEpoch,
}

impl TipSet {
    pub fn key(&self) -> TipSetKey {
        TipSetKey(self.cids.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ActorState {
    pub code: Cid,
    pub head: Cid,
    pub nonce: u64,
    pub balance: TokenAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MinerInfo {
    pub owner: Address,
    pub worker: Address,
    #[serde(default, deserialize_with = "null_as_default")]
    pub control_addresses: Vec<Address>,
    pub sector_size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Claim {
    pub raw_byte_power: StoragePower,
    pub quality_adj_power: StoragePower,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MinerPower {
    pub miner_power: Claim,
    pub total_power: Claim,
    pub has_min_power: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SectorCounts {
    pub live: u64,
    pub active: u64,
    pub faulty: u64,
}

/// Funds held by a miner actor that are not spendable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockedFunds {
    pub vesting_funds: TokenAmount,
    pub initial_pledge_requirement: TokenAmount,
    pub pre_commit_deposits: TokenAmount,
    pub fee_debt: TokenAmount,
}

impl LockedFunds {
    pub fn total_locked(&self) -> TokenAmount {
        self.vesting_funds.clone() + &self.initial_pledge_requirement + &self.pre_commit_deposits
    }
}

// Lotus encodes empty slices as `null`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

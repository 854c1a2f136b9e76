#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use num_bigint::BigInt;
use chain::{
    ActorState, Address, BigNum, ChainEpoch, ChainError, ChainQuery, Cid, Claim, LockedFunds,
    MinerInfo, MinerPower, SectorCounts, TipSet, TipSetKey, TokenAmount,
};

pub const ATTO: u64 = 1_000_000_000_000_000_000;

pub fn addr(s: &str) -> Address {
    s.parse().expect("test address")
}

pub fn fil(n: u64) -> TokenAmount {
    BigNum(BigInt::from(n) * BigInt::from(ATTO))
}

/// In-memory chain with per-method failure injection and a call log.
pub struct FakeChain {
    pub miner_balance: TokenAmount,
    pub info: MinerInfo,
    pub power: MinerPower,
    pub sectors: SectorCounts,
    pub locked: LockedFunds,
    pub balances: HashMap<Address, TokenAmount>,
    pub head: TipSet,
    pub tipsets: HashMap<ChainEpoch, TipSet>,
    pub fail: Mutex<Option<&'static str>>,
    pub delay: Option<Duration>,
    pub calls: Mutex<Vec<(&'static str, Option<Address>, TipSetKey)>>,
}

impl FakeChain {
    /// Miner with 10 of 1000 bytes of power and two control addresses.
    pub fn healthy() -> Self {
        let worker = addr("f0101");
        let controls = vec![addr("f0102"), addr("f0103")];
        let balances = HashMap::from([
            (worker.clone(), fil(2)),
            (controls[0].clone(), fil(3)),
            (controls[1].clone(), fil(4)),
        ]);
        Self {
            miner_balance: fil(100),
            info: MinerInfo {
                owner: addr("f0100"),
                worker,
                control_addresses: controls,
                sector_size: 34_359_738_368,
            },
            power: MinerPower {
                miner_power: Claim {
                    raw_byte_power: BigNum::from(10u64),
                    quality_adj_power: BigNum::from(10u64),
                },
                total_power: Claim {
                    raw_byte_power: BigNum::from(1000u64),
                    quality_adj_power: BigNum::from(1000u64),
                },
                has_min_power: true,
            },
            sectors: SectorCounts {
                live: 12,
                active: 11,
                faulty: 1,
            },
            locked: LockedFunds {
                vesting_funds: fil(25),
                initial_pledge_requirement: fil(50),
                pre_commit_deposits: fil(5),
                fee_debt: BigNum::zero(),
            },
            balances,
            head: TipSet {
                cids: vec![Cid {
                    root: "bafyhead2000100".into(),
                }],
                height: 2_000_100,
            },
            tipsets: HashMap::from([(
                2_000_000,
                TipSet {
                    cids: vec![Cid {
                        root: "bafy2000000".into(),
                    }],
                    height: 2_000_000,
                },
            )]),
            fail: Mutex::new(None),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_on(&self, method: &'static str) {
        *self.fail.lock().unwrap() = Some(method);
    }

    pub fn recover(&self) {
        *self.fail.lock().unwrap() = None;
    }

    pub fn calls_to(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _, _)| *m == method)
            .count()
    }

    async fn enter(
        &self,
        method: &'static str,
        addr: Option<&Address>,
        key: &TipSetKey,
    ) -> Result<(), ChainError> {
        self.calls
            .lock()
            .unwrap()
            .push((method, addr.cloned(), key.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if *self.fail.lock().unwrap() == Some(method) {
            return Err(ChainError::Rpc {
                code: 1,
                message: format!("{method} unavailable"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChainQuery for FakeChain {
    async fn chain_head(&self) -> Result<TipSet, ChainError> {
        self.enter("chain_head", None, &TipSetKey::head()).await?;
        Ok(self.head.clone())
    }

    async fn tipset_by_height(&self, height: ChainEpoch) -> Result<TipSet, ChainError> {
        self.enter("tipset_by_height", None, &TipSetKey::head()).await?;
        self.tipsets.get(&height).cloned().ok_or(ChainError::Rpc {
            code: 1,
            message: format!("no tipset at {height}"),
        })
    }

    async fn actor_state(
        &self,
        addr: &Address,
        key: &TipSetKey,
    ) -> Result<ActorState, ChainError> {
        self.enter("actor_state", Some(addr), key).await?;
        Ok(ActorState {
            code: Cid {
                root: "bafkminer".into(),
            },
            head: Cid {
                root: "bafyhead".into(),
            },
            nonce: 0,
            balance: self.miner_balance.clone(),
        })
    }

    async fn miner_info(&self, addr: &Address, key: &TipSetKey) -> Result<MinerInfo, ChainError> {
        self.enter("miner_info", Some(addr), key).await?;
        Ok(self.info.clone())
    }

    async fn miner_power(
        &self,
        addr: &Address,
        key: &TipSetKey,
    ) -> Result<MinerPower, ChainError> {
        self.enter("miner_power", Some(addr), key).await?;
        Ok(self.power.clone())
    }

    async fn sector_counts(
        &self,
        addr: &Address,
        key: &TipSetKey,
    ) -> Result<SectorCounts, ChainError> {
        self.enter("sector_counts", Some(addr), key).await?;
        Ok(self.sectors)
    }

    async fn locked_funds(
        &self,
        addr: &Address,
        key: &TipSetKey,
    ) -> Result<LockedFunds, ChainError> {
        self.enter("locked_funds", Some(addr), key).await?;
        Ok(self.locked.clone())
    }

    async fn balance(&self, addr: &Address, key: &TipSetKey) -> Result<TokenAmount, ChainError> {
        self.enter("balance", Some(addr), key).await?;
        let balance = self.balances.get(addr).cloned().ok_or(ChainError::Rpc {
            code: 1,
            message: format!("actor {addr} not found"),
        })?;
        Ok(balance)
    }
}

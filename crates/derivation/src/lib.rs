//! Conversions from raw chain quantities to the published gauge values.
//!
//! Everything here is pure. Edge cases (zero network power, a miner below
//! the consensus minimum) resolve to defined zero values, never errors.

use std::time::Duration;

use chain::{BigNum, LockedFunds, StoragePower, TokenAmount};
use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive};

/// attoFIL per FIL.
pub const FILECOIN_PRECISION: u64 = 1_000_000_000_000_000_000;

/// Fixed-point multiplier for the power share, divided out only at the end.
const SHARE_SCALE: u64 = 1_000_000;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Block production parameters of the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolParams {
    /// Expected number of blocks per epoch across the whole network.
    pub blocks_per_epoch: u64,
    pub block_delay_secs: u64,
}

impl Default for ProtocolParams {
    /// Mainnet values.
    fn default() -> Self {
        Self {
            blocks_per_epoch: 5,
            block_delay_secs: 30,
        }
    }
}

/// Converts a power value to the nearest `f64` through an exact rational.
pub fn power_scale(power: &StoragePower) -> f64 {
    BigRational::from_integer(power.as_bigint().clone())
        .to_f64()
        .unwrap_or(0.0)
}

/// Converts an attoFIL amount to FIL.
pub fn balance_scale(amount: &TokenAmount) -> f64 {
    if amount.is_zero() {
        return 0.0;
    }
    BigRational::new(
        amount.as_bigint().clone(),
        BigInt::from(FILECOIN_PRECISION),
    )
    .to_f64()
    .unwrap_or(0.0)
}

/// Spendable part of a miner actor's balance: what is left after locked
/// funds and fee debt, floored at zero.
pub fn available_balance(actor_balance: &TokenAmount, locked: &LockedFunds) -> TokenAmount {
    let spendable =
        actor_balance.as_bigint() - locked.total_locked().as_bigint() - locked.fee_debt.as_bigint();
    if spendable.is_negative() {
        BigNum::zero()
    } else {
        BigNum(spendable)
    }
}

/// Expected number of blocks won per 24 hours.
///
/// The power share is computed in integers scaled by [`SHARE_SCALE`]. The
/// per-epoch expectation is capped at 1 and turned into a mean interval
/// between wins, which is then converted to a daily rate. Returns exactly 0
/// when the miner lacks minimum power or the expectation rounds to zero.
pub fn win_rate_per_day(
    miner_quality_power: &StoragePower,
    total_quality_power: &StoragePower,
    has_min_power: bool,
    params: ProtocolParams,
) -> f64 {
    if !has_min_power || total_quality_power.is_zero() {
        return 0.0;
    }

    let share = miner_quality_power.as_bigint() * BigInt::from(SHARE_SCALE)
        / total_quality_power.as_bigint();
    let per_epoch = share * BigInt::from(params.blocks_per_epoch);
    let expected = per_epoch.to_f64().unwrap_or(0.0) / SHARE_SCALE as f64;
    if expected <= 0.0 {
        return 0.0;
    }
    let expected = expected.min(1.0);

    // an interval too long for `Duration` means no win within a day
    let Ok(win_interval) =
        Duration::try_from_secs_f64(params.block_delay_secs as f64 / expected)
    else {
        return 0.0;
    };
    if win_interval.is_zero() {
        return 0.0;
    }
    DAY.as_secs_f64() / win_interval.as_secs_f64()
}

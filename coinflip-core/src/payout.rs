//! Pool payout calculation.
//!
//! Winners split `total_pool - house_cut` in proportion to their stake on the
//! winning side. Shares are plain `f64` arithmetic; they are not reconciled to
//! sum exactly to `distributable`, the drift stays within float epsilon.

use crate::{bets::StakeEntry, RoundId, Side, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WinnerPayout {
    pub user_id: UserId,
    pub stake: f64,
    pub payout: f64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayoutResult {
    pub round_id: RoundId,
    pub hash: String,
    pub outcome: Side,
    pub total_pool: f64,
    pub total_winning_stake: f64,
    pub house_cut: f64,
    pub distributable: f64,
    /// What the house actually keeps: the cut, or the whole pool when nobody
    /// picked the winning side.
    pub house_take: f64,
    pub has_winners: bool,
    pub winners: BTreeMap<UserId, WinnerPayout>,
    pub house_profit_total: f64,
    pub computed_at: DateTime<Utc>,
}

impl PayoutResult {
    pub fn total_paid(&self) -> f64 {
        self.winners.values().map(|w| w.payout).sum()
    }

    pub fn payouts(&self) -> HashMap<UserId, f64> {
        self.winners
            .iter()
            .map(|(&user_id, w)| (user_id, w.payout))
            .collect()
    }
}

pub fn compute(
    round_id: RoundId,
    hash: &str,
    stakes: &[StakeEntry],
    outcome: Side,
    house_edge: f64,
) -> PayoutResult {
    let mut total_pool = 0.0;
    let mut total_winning_stake = 0.0;
    let mut per_winner: BTreeMap<UserId, f64> = BTreeMap::new();

    for entry in stakes {
        total_pool += entry.cost;
        if entry.side == outcome {
            total_winning_stake += entry.cost;
            *per_winner.entry(entry.user_id).or_insert(0.0) += entry.cost;
        }
    }

    let house_cut = total_pool * house_edge;
    let distributable = total_pool - house_cut;

    let mut winners = BTreeMap::new();
    if total_winning_stake > 0.0 && total_pool > 0.0 {
        for (user_id, stake) in per_winner {
            let payout = distributable * (stake / total_winning_stake);
            let multiplier = if stake > 0.0 { payout / stake } else { 0.0 };
            winners.insert(
                user_id,
                WinnerPayout {
                    user_id,
                    stake,
                    payout,
                    multiplier,
                },
            );
        }
    }

    let total_paid: f64 = winners.values().map(|w: &WinnerPayout| w.payout).sum();

    PayoutResult {
        round_id,
        hash: hash.to_string(),
        outcome,
        total_pool,
        total_winning_stake,
        house_cut,
        distributable,
        house_take: (total_pool - total_paid).max(0.0),
        has_winners: !winners.is_empty(),
        winners,
        house_profit_total: 0.0,
        computed_at: Utc::now(),
    }
}

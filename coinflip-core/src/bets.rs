use crate::{CoinflipError, ItemStake, Result, RoundId, Side, UserId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// All stakes a user placed in one round. The side is fixed by the first bet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBet {
    pub user_id: UserId,
    pub side: Side,
    pub items: Vec<ItemStake>,
}

impl UserBet {
    pub fn total_value(&self) -> f64 {
        self.items.iter().map(|item| item.cost).sum()
    }
}

/// One priced stake, flattened for the payout calculator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StakeEntry {
    pub user_id: UserId,
    pub side: Side,
    pub cost: f64,
}

/// Per-round record of who bet what. Not synchronized on its own; the round
/// engine owns it behind its lock.
#[derive(Debug, Default)]
pub struct BetLedger {
    rounds: HashMap<RoundId, HashMap<UserId, UserBet>>,
}

impl BetLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `items` to the user's bet for the round. Either every item is
    /// recorded or none is.
    pub fn record(
        &mut self,
        round_id: RoundId,
        user_id: UserId,
        side: Side,
        items: Vec<ItemStake>,
    ) -> Result<usize> {
        if items.is_empty() {
            return Err(CoinflipError::EmptyBet);
        }

        let round = self.rounds.entry(round_id).or_default();

        if let Some(existing) = round.get(&user_id) {
            if existing.side != side {
                return Err(CoinflipError::SideMismatch {
                    user_id,
                    existing: existing.side,
                    requested: side,
                });
            }
        }

        let accepted = items.len();
        round
            .entry(user_id)
            .or_insert_with(|| UserBet {
                user_id,
                side,
                items: Vec::new(),
            })
            .items
            .extend(items);

        Ok(accepted)
    }

    pub fn unique_bettors(&self, round_id: RoundId) -> usize {
        self.rounds.get(&round_id).map_or(0, |round| round.len())
    }

    pub fn user_bet(&self, round_id: RoundId, user_id: UserId) -> Option<&UserBet> {
        self.rounds.get(&round_id)?.get(&user_id)
    }

    pub fn snapshot(&self, round_id: RoundId) -> BetsSnapshot {
        let mut out = BetsSnapshot::default();

        let Some(round) = self.rounds.get(&round_id) else {
            return out;
        };

        for bet in round.values() {
            let slot = UserSlot {
                user_id: bet.user_id,
                total_value: bet.total_value(),
                items: bet.items.clone(),
            };

            let bucket = match bet.side {
                Side::Heads => &mut out.heads,
                Side::Tails => &mut out.tails,
            };
            bucket.total_bets += 1;
            bucket.total_value += slot.total_value;
            bucket.users.push(slot);
        }

        out.heads.users.sort_by_key(|slot| slot.user_id);
        out.tails.users.sort_by_key(|slot| slot.user_id);
        out.total_bets = out.heads.total_bets + out.tails.total_bets;
        out.total_value = out.heads.total_value + out.tails.total_value;
        out
    }

    pub fn stakes(&self, round_id: RoundId) -> Vec<StakeEntry> {
        self.rounds
            .get(&round_id)
            .map(|round| {
                round
                    .values()
                    .flat_map(|bet| {
                        bet.items.iter().map(move |item| StakeEntry {
                            user_id: bet.user_id,
                            side: bet.side,
                            cost: item.cost,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn clear(&mut self, round_id: RoundId) {
        self.rounds.remove(&round_id);
    }
}

/// Read-only view of a round's bets, grouped by side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BetsSnapshot {
    pub total_bets: usize,
    pub total_value: f64,
    pub heads: SideBucket,
    pub tails: SideBucket,
}

impl BetsSnapshot {
    pub fn is_empty(&self) -> bool {
        self.total_bets == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SideBucket {
    pub total_bets: usize,
    pub total_value: f64,
    pub users: Vec<UserSlot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSlot {
    pub user_id: UserId,
    pub total_value: f64,
    pub items: Vec<ItemStake>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stake(id: &str, cost: f64) -> ItemStake {
        ItemStake::new("gift", id, cost)
    }

    #[test]
    fn test_record_appends_on_same_side() {
        let mut ledger = BetLedger::new();
        assert_eq!(ledger.record(1, 7, Side::Heads, vec![stake("a", 1.0)]).unwrap(), 1);
        assert_eq!(
            ledger
                .record(1, 7, Side::Heads, vec![stake("b", 2.0), stake("c", 3.0)])
                .unwrap(),
            2
        );

        let bet = ledger.user_bet(1, 7).unwrap();
        assert_eq!(bet.items.len(), 3);
        assert_eq!(bet.total_value(), 6.0);
        assert_eq!(ledger.unique_bettors(1), 1);
    }

    #[test]
    fn test_side_switch_rejected_without_mutation() {
        let mut ledger = BetLedger::new();
        ledger.record(1, 7, Side::Heads, vec![stake("a", 1.0)]).unwrap();

        let err = ledger
            .record(1, 7, Side::Tails, vec![stake("b", 2.0)])
            .unwrap_err();
        assert!(matches!(err, CoinflipError::SideMismatch { user_id: 7, .. }));
        assert_eq!(ledger.user_bet(1, 7).unwrap().items.len(), 1);
    }

    #[test]
    fn test_empty_bet_rejected() {
        let mut ledger = BetLedger::new();
        assert!(matches!(
            ledger.record(1, 7, Side::Heads, vec![]),
            Err(CoinflipError::EmptyBet)
        ));
        assert_eq!(ledger.unique_bettors(1), 0);
    }

    #[test]
    fn test_snapshot_groups_by_side() {
        let mut ledger = BetLedger::new();
        ledger.record(1, 2, Side::Tails, vec![stake("a", 4.0)]).unwrap();
        ledger.record(1, 1, Side::Heads, vec![stake("b", 1.5)]).unwrap();
        ledger.record(1, 3, Side::Heads, vec![stake("c", 2.5)]).unwrap();
        ledger.record(2, 9, Side::Heads, vec![stake("d", 100.0)]).unwrap();

        let snap = ledger.snapshot(1);
        assert_eq!(snap.total_bets, 3);
        assert_eq!(snap.total_value, 8.0);
        assert_eq!(snap.heads.total_bets, 2);
        assert_eq!(snap.heads.total_value, 4.0);
        assert_eq!(
            snap.heads.users.iter().map(|u| u.user_id).collect::<Vec<_>>(),
            vec![1, 3]
        );
        assert_eq!(snap.tails.users[0].total_value, 4.0);
        assert_eq!(ledger.stakes(1).len(), 3);
    }

    #[test]
    fn test_clear_only_touches_one_round() {
        let mut ledger = BetLedger::new();
        ledger.record(1, 1, Side::Heads, vec![stake("a", 1.0)]).unwrap();
        ledger.record(2, 1, Side::Heads, vec![stake("a", 1.0)]).unwrap();

        ledger.clear(1);
        assert!(ledger.snapshot(1).is_empty());
        assert_eq!(ledger.unique_bettors(2), 1);
    }
}

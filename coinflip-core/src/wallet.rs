use crate::{CoinflipError, Result, RoundId, UserId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub user_id: UserId,
    pub available: f64,
    pub reserved: f64,
    pub total: f64,
}

#[derive(Debug, Default)]
struct Accounts {
    available: HashMap<UserId, f64>,
    reserved_by_round: HashMap<RoundId, HashMap<UserId, f64>>,
    house: f64,
}

impl Accounts {
    fn available_mut(&mut self, user_id: UserId, start_balance: f64) -> &mut f64 {
        self.available.entry(user_id).or_insert(start_balance)
    }

    fn reserved_for(&self, user_id: UserId) -> f64 {
        self.reserved_by_round
            .values()
            .filter_map(|round| round.get(&user_id))
            .sum()
    }
}

/// Per-user available and reserved funds.
///
/// Every reservation moves funds out of `available` into a per-round bucket;
/// rollbacks move them back and settlement clears the bucket. Funds are never
/// created except through [`FundLedger::deposit`] and the lazy starting
/// balance of a new account.
#[derive(Debug)]
pub struct FundLedger {
    start_balance: f64,
    accounts: Mutex<Accounts>,
}

impl FundLedger {
    pub fn new(start_balance: f64) -> Self {
        Self {
            start_balance,
            accounts: Mutex::new(Accounts::default()),
        }
    }

    pub fn start_balance(&self) -> f64 {
        self.start_balance
    }

    /// External credit to a user's available funds.
    pub fn deposit(&self, user_id: UserId, amount: f64) -> Result<()> {
        validate_user(user_id)?;
        validate_amount(amount)?;

        let mut accounts = self.accounts.lock();
        *accounts.available_mut(user_id, self.start_balance) += amount;

        tracing::debug!("Deposited {:.6} for user {}", amount, user_id);
        Ok(())
    }

    pub fn balance(&self, user_id: UserId) -> Result<Balance> {
        validate_user(user_id)?;

        let mut accounts = self.accounts.lock();
        let available = *accounts.available_mut(user_id, self.start_balance);
        let reserved = accounts.reserved_for(user_id);

        Ok(Balance {
            user_id,
            available,
            reserved,
            total: available + reserved,
        })
    }

    pub fn house_balance(&self) -> f64 {
        self.accounts.lock().house
    }

    pub fn reserved_for_round(&self, round_id: RoundId) -> f64 {
        self.accounts
            .lock()
            .reserved_by_round
            .get(&round_id)
            .map_or(0.0, |round| round.values().sum())
    }

    /// Move `amount` from available into the round's bucket, or fail with
    /// `InsufficientFunds` and change nothing.
    pub fn reserve(&self, round_id: RoundId, user_id: UserId, amount: f64) -> Result<()> {
        validate_user(user_id)?;
        validate_round(round_id)?;
        validate_amount(amount)?;

        let mut accounts = self.accounts.lock();
        let available = accounts.available_mut(user_id, self.start_balance);

        if *available < amount {
            return Err(CoinflipError::InsufficientFunds {
                need: amount,
                available: *available,
            });
        }
        *available -= amount;

        *accounts
            .reserved_by_round
            .entry(round_id)
            .or_default()
            .entry(user_id)
            .or_insert(0.0) += amount;

        Ok(())
    }

    /// Return up to `amount` of a reservation to available. Clamped to what is
    /// actually reserved; returns the amount released.
    pub fn rollback(&self, round_id: RoundId, user_id: UserId, amount: f64) -> f64 {
        if user_id <= 0 || round_id == 0 || !(amount > 0.0) {
            return 0.0;
        }

        let mut accounts = self.accounts.lock();

        let Some(round) = accounts.reserved_by_round.get_mut(&round_id) else {
            return 0.0;
        };
        let Some(current) = round.get_mut(&user_id) else {
            return 0.0;
        };

        let released = amount.min(*current);
        *current -= released;
        if *current <= 0.0 {
            round.remove(&user_id);
        }
        if round.is_empty() {
            accounts.reserved_by_round.remove(&round_id);
        }

        *accounts.available_mut(user_id, self.start_balance) += released;
        released
    }

    /// Clear the round's whole reservation bucket, credit winners and accrue
    /// the house take. Losers' reservations are not returned. Returns the
    /// total that was reserved under the round.
    pub fn settle(
        &self,
        round_id: RoundId,
        winners: &HashMap<UserId, f64>,
        house_take: f64,
    ) -> f64 {
        let mut accounts = self.accounts.lock();

        let cleared: f64 = accounts
            .reserved_by_round
            .remove(&round_id)
            .map_or(0.0, |round| round.values().sum());

        for (&user_id, &payout) in winners {
            if user_id <= 0 || !(payout > 0.0) {
                continue;
            }
            *accounts.available_mut(user_id, self.start_balance) += payout;
        }

        if house_take > 0.0 {
            accounts.house += house_take;
        }

        tracing::debug!(
            "Settled round {}: cleared {:.6}, {} winners, house take {:.6}",
            round_id,
            cleared,
            winners.len(),
            house_take
        );
        cleared
    }
}

fn validate_user(user_id: UserId) -> Result<()> {
    if user_id <= 0 {
        return Err(CoinflipError::InvalidUser(user_id));
    }
    Ok(())
}

fn validate_round(round_id: RoundId) -> Result<()> {
    if round_id == 0 {
        return Err(CoinflipError::InvalidRound(round_id));
    }
    Ok(())
}

fn validate_amount(amount: f64) -> Result<()> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(CoinflipError::InvalidAmount(amount));
    }
    Ok(())
}

//! Coinflip round engine
//!
//! Runs repeating heads/tails rounds over a shared pool. Each round commits to
//! a secret before bets open, reveals it after betting closes, and pays the
//! winning side in proportion to stake, minus the house edge.

pub mod bets;
pub mod commitment;
pub mod config;
pub mod driver;
pub mod error;
pub mod events;
pub mod game;
pub mod payout;
pub mod pricing;
pub mod types;
pub mod wallet;

pub use bets::{BetLedger, BetsSnapshot, StakeEntry, UserBet};
pub use commitment::{reveal_side, verify_commitment, Commitment, FairnessSource, OsFairness};
pub use config::GameConfig;
pub use driver::{OnlineCounter, RoundDriver};
pub use error::{CoinflipError, Result};
pub use events::GameEvent;
pub use game::{BetReceipt, RoundEngine, RoundSnapshot, TickOutcome};
pub use payout::{PayoutResult, WinnerPayout};
pub use pricing::PriceList;
pub use types::{item_key, ItemRef, ItemStake, Phase, RoundId, Side, UserId};
pub use wallet::{Balance, FundLedger};

use crate::types::{Phase, RoundId, Side, UserId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoinflipError>;

#[derive(Error, Debug)]
pub enum CoinflipError {
    #[error("Invalid user id: {0}")]
    InvalidUser(UserId),

    #[error("Invalid side: {0}")]
    InvalidSide(String),

    #[error("Bet contains no items")]
    EmptyBet,

    #[error("Invalid stake for item {item}: {cost}")]
    InvalidStake { item: String, cost: f64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(f64),

    #[error("Invalid round id: {0}")]
    InvalidRound(RoundId),

    #[error("Insufficient funds: need {need:.6}, have {available:.6}")]
    InsufficientFunds { need: f64, available: f64 },

    #[error("Unknown item price: {0}")]
    UnknownItem(String),

    #[error("Betting is closed (phase: {phase})")]
    BettingClosed { phase: Phase },

    #[error("User {user_id} already bet on {existing} this round, cannot switch to {requested}")]
    SideMismatch {
        user_id: UserId,
        existing: Side,
        requested: Side,
    },

    #[error("Invalid seed or hash: {0}")]
    InvalidSeed(String),

    #[error("Secure randomness unavailable: {0}")]
    Entropy(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Price list error: {0}")]
    Pricing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoinflipError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn pricing(msg: impl Into<String>) -> Self {
        Self::Pricing(msg.into())
    }

    pub fn entropy(msg: impl Into<String>) -> Self {
        Self::Entropy(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Short machine-readable reason, used in logs and outbound error events.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::InvalidUser(_) => "invalid_user",
            Self::InvalidSide(_) => "bad_side",
            Self::EmptyBet => "empty_bet_items",
            Self::InvalidStake { .. } => "invalid_stake",
            Self::InvalidAmount(_) => "invalid_amount",
            Self::InvalidRound(_) => "invalid_round",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::UnknownItem(_) => "unknown_price",
            Self::BettingClosed { .. } => "betting_closed",
            Self::SideMismatch { .. } => "side_mismatch",
            Self::InvalidSeed(_) => "bad_seed",
            Self::Entropy(_) => "entropy",
            Self::Config(_) => "config",
            Self::Pricing(_) => "pricing",
            Self::Io(_) => "io",
            Self::Serialization(_) => "bad_json",
            Self::Internal(_) => "internal",
        }
    }
}

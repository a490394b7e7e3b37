use crate::error::CoinflipError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub type RoundId = u64;
pub type UserId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Heads,
    Tails,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Heads => "heads",
            Side::Tails => "tails",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = CoinflipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "heads" => Ok(Side::Heads),
            "tails" => Ok(Side::Tails),
            other => Err(CoinflipError::InvalidSide(other.to_string())),
        }
    }
}

/// Round lifecycle phase. Wire names follow the client protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "waiting")]
    Waiting,
    #[serde(rename = "betting")]
    Betting,
    #[serde(rename = "gettingResult")]
    Revealing,
    #[serde(rename = "finished")]
    Settled,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Waiting => "waiting",
            Phase::Betting => "betting",
            Phase::Revealing => "gettingResult",
            Phase::Settled => "finished",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An item as referenced by a client, before pricing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    #[serde(rename = "type")]
    pub item_type: String,
    pub item_id: String,
}

impl ItemRef {
    pub fn new(item_type: impl Into<String>, item_id: impl Into<String>) -> Self {
        Self {
            item_type: item_type.into(),
            item_id: item_id.into(),
        }
    }

    pub fn key(&self) -> String {
        item_key(&self.item_type, &self.item_id)
    }
}

/// A priced item staked on a side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemStake {
    #[serde(rename = "type")]
    pub item_type: String,
    pub item_id: String,
    pub cost: f64,
}

impl ItemStake {
    pub fn new(item_type: impl Into<String>, item_id: impl Into<String>, cost: f64) -> Self {
        Self {
            item_type: item_type.into(),
            item_id: item_id.into(),
            cost,
        }
    }

    pub fn key(&self) -> String {
        item_key(&self.item_type, &self.item_id)
    }
}

/// Price-list key for an item: `type:item_id`.
pub fn item_key(item_type: &str, item_id: &str) -> String {
    format!("{}:{}", item_type, item_id)
}

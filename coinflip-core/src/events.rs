//! Outbound events, one variant per message kind sent to clients.

use crate::game::RoundSnapshot;
use crate::{Balance, BetsSnapshot, Phase, RoundId, Side, UserId};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum GameEvent {
    #[serde(rename = "firstUpdate")]
    FirstUpdate {
        game_phase: Phase,
        timer: i64,
        game_id: RoundId,
        hash: String,
        bets: Option<BetsSnapshot>,
        server_time: DateTime<Utc>,
    },

    #[serde(rename = "gameStarted")]
    GameStarted {
        game_id: RoundId,
        hash: String,
        betting_time: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ends_at: Option<DateTime<Utc>>,
        server_time: DateTime<Utc>,
    },

    #[serde(rename = "gettingResult")]
    GettingResult {
        game_id: RoundId,
        hash: String,
        time_till_result: i64,
        result_side: Side,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ends_at: Option<DateTime<Utc>>,
        server_time: DateTime<Utc>,
    },

    /// The only event that carries the round's secret.
    #[serde(rename = "gameFinished")]
    GameFinished {
        game_id: RoundId,
        hash: String,
        result_side: Side,
        seed: String,
        server_time: DateTime<Utc>,
    },

    #[serde(rename = "newGame")]
    NewGame {
        game_id: RoundId,
        hash: String,
        server_time: DateTime<Utc>,
    },

    #[serde(rename = "bets_accepted")]
    BetsAccepted {
        game_id: RoundId,
        hash: String,
        accepted: usize,
        server_time: DateTime<Utc>,
    },

    #[serde(rename = "new_bets")]
    NewBets {
        game_id: RoundId,
        hash: String,
        user_id: UserId,
        side: Side,
        bets: BetsSnapshot,
        server_time: DateTime<Utc>,
    },

    #[serde(rename = "online")]
    Online {
        online: usize,
        server_time: DateTime<Utc>,
    },

    #[serde(rename = "balance")]
    Balance {
        #[serde(flatten)]
        balance: Balance,
        server_time: DateTime<Utc>,
    },

    #[serde(rename = "error")]
    Error {
        reason: String,
        message: String,
        server_time: DateTime<Utc>,
    },
}

impl GameEvent {
    /// The event announcing that the engine has just entered `snapshot.phase`.
    pub fn for_phase(snapshot: &RoundSnapshot) -> Option<GameEvent> {
        let now = Utc::now();
        let ends_at = TimeDelta::try_seconds(snapshot.timer.max(0))
            .and_then(|delta| now.checked_add_signed(delta));

        match snapshot.phase {
            Phase::Betting => Some(GameEvent::GameStarted {
                game_id: snapshot.round_id,
                hash: snapshot.hash.clone(),
                betting_time: snapshot.timer,
                ends_at,
                server_time: now,
            }),
            Phase::Revealing => Some(GameEvent::GettingResult {
                game_id: snapshot.round_id,
                hash: snapshot.hash.clone(),
                time_till_result: snapshot.timer,
                result_side: snapshot.outcome?,
                ends_at,
                server_time: now,
            }),
            Phase::Settled => Some(GameEvent::GameFinished {
                game_id: snapshot.round_id,
                hash: snapshot.hash.clone(),
                result_side: snapshot.outcome?,
                seed: snapshot.seed.clone()?,
                server_time: now,
            }),
            Phase::Waiting => Some(GameEvent::NewGame {
                game_id: snapshot.round_id,
                hash: snapshot.hash.clone(),
                server_time: now,
            }),
        }
    }

    pub fn online(online: usize) -> Self {
        GameEvent::Online {
            online,
            server_time: Utc::now(),
        }
    }

    pub fn balance(balance: Balance) -> Self {
        GameEvent::Balance {
            balance,
            server_time: Utc::now(),
        }
    }

    pub fn error(err: &crate::CoinflipError) -> Self {
        GameEvent::Error {
            reason: err.reason().to_string(),
            message: err.to_string(),
            server_time: Utc::now(),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::FirstUpdate { .. } => "firstUpdate",
            GameEvent::GameStarted { .. } => "gameStarted",
            GameEvent::GettingResult { .. } => "gettingResult",
            GameEvent::GameFinished { .. } => "gameFinished",
            GameEvent::NewGame { .. } => "newGame",
            GameEvent::BetsAccepted { .. } => "bets_accepted",
            GameEvent::NewBets { .. } => "new_bets",
            GameEvent::Online { .. } => "online",
            GameEvent::Balance { .. } => "balance",
            GameEvent::Error { .. } => "error",
        }
    }
}

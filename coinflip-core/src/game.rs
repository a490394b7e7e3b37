use crate::commitment::{reveal_side, Commitment, FairnessSource, OsFairness};
use crate::{
    payout, BetLedger, BetsSnapshot, CoinflipError, FundLedger, GameConfig, GameEvent, ItemStake,
    PayoutResult, Phase, Result, RoundId, Side, UserId,
};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Timer value while no countdown is running.
pub const TIMER_IDLE: i64 = -1;

/// Minimum distinct bettors before a round leaves Waiting.
pub const MIN_BETTORS: usize = 2;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Consistent copy of the public round fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub phase: Phase,
    pub timer: i64,
    pub round_id: RoundId,
    pub hash: String,
    pub outcome: Option<Side>,
    /// Hex secret, present only once the round is settled.
    pub seed: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub phase_changed: bool,
    pub snapshot: RoundSnapshot,
    pub event: Option<GameEvent>,
}

/// Returned to the submitter of an accepted bet.
#[derive(Debug, Clone, PartialEq)]
pub struct BetReceipt {
    pub round_id: RoundId,
    pub hash: String,
    pub accepted: usize,
    pub stake: f64,
}

impl BetReceipt {
    pub fn accepted_event(&self) -> GameEvent {
        GameEvent::BetsAccepted {
            game_id: self.round_id,
            hash: self.hash.clone(),
            accepted: self.accepted,
            server_time: Utc::now(),
        }
    }
}

struct RoundState {
    phase: Phase,
    timer: i64,
    round_id: RoundId,
    commitment: Commitment,
    outcome: Option<Side>,
    bets: BetLedger,
    history: VecDeque<PayoutResult>,
    payouts: BTreeMap<RoundId, PayoutResult>,
    house_profit_total: f64,
}

impl RoundState {
    fn snapshot(&self) -> RoundSnapshot {
        let seed = (self.phase == Phase::Settled).then(|| hex::encode(self.commitment.secret()));
        RoundSnapshot {
            phase: self.phase,
            timer: self.timer,
            round_id: self.round_id,
            hash: self.commitment.hash_hex(),
            outcome: self.outcome,
            seed,
        }
    }

    fn bets_snapshot(&self) -> Option<BetsSnapshot> {
        let snap = self.bets.snapshot(self.round_id);
        (!snap.is_empty()).then_some(snap)
    }

    fn accepting_bets(&self) -> bool {
        match self.phase {
            Phase::Waiting => true,
            Phase::Betting => self.timer > 0,
            Phase::Revealing | Phase::Settled => false,
        }
    }
}

/// The round state machine: Waiting → Betting → Revealing → Settled → Waiting.
///
/// Round state and the bet ledger live behind one `RwLock`. The fund ledger
/// has its own lock and is always taken after the engine lock.
pub struct RoundEngine {
    config: GameConfig,
    fairness: Box<dyn FairnessSource>,
    wallet: Arc<FundLedger>,
    state: RwLock<RoundState>,
    events: broadcast::Sender<GameEvent>,
}

impl RoundEngine {
    pub fn new(
        config: GameConfig,
        fairness: impl FairnessSource + 'static,
        wallet: Arc<FundLedger>,
    ) -> Result<Self> {
        config.validate()?;

        let commitment = fairness.commit()?;
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        tracing::info!("Round 1 opened with commitment {}", commitment.hash_hex());

        Ok(Self {
            config,
            fairness: Box::new(fairness),
            wallet,
            state: RwLock::new(RoundState {
                phase: Phase::Waiting,
                timer: TIMER_IDLE,
                round_id: 1,
                commitment,
                outcome: None,
                bets: BetLedger::new(),
                history: VecDeque::new(),
                payouts: BTreeMap::new(),
                house_profit_total: 0.0,
            }),
            events,
        })
    }

    /// Engine with OS randomness and a fresh fund ledger.
    pub fn from_config(config: GameConfig) -> Result<Self> {
        let wallet = Arc::new(FundLedger::new(config.start_balance));
        Self::new(config, OsFairness, wallet)
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn wallet(&self) -> &Arc<FundLedger> {
        &self.wallet
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.events.subscribe()
    }

    pub(crate) fn publish(&self, event: GameEvent) {
        // no subscribers is not an error
        let _ = self.events.send(event);
    }

    pub fn snapshot(&self) -> RoundSnapshot {
        self.state.read().snapshot()
    }

    pub fn bets_snapshot(&self) -> Option<BetsSnapshot> {
        self.state.read().bets_snapshot()
    }

    /// The message a newly connected client receives.
    pub fn first_update(&self) -> GameEvent {
        let state = self.state.read();
        GameEvent::FirstUpdate {
            game_phase: state.phase,
            timer: state.timer,
            game_id: state.round_id,
            hash: state.commitment.hash_hex(),
            bets: state.bets_snapshot(),
            server_time: Utc::now(),
        }
    }

    pub fn unique_bettors(&self) -> usize {
        let state = self.state.read();
        state.bets.unique_bettors(state.round_id)
    }

    pub fn payout_for_round(&self, round_id: RoundId) -> Option<PayoutResult> {
        self.state.read().payouts.get(&round_id).cloned()
    }

    /// Most recent settled rounds, oldest first.
    pub fn history(&self) -> Vec<PayoutResult> {
        self.state.read().history.iter().cloned().collect()
    }

    pub fn house_profit_total(&self) -> f64 {
        self.state.read().house_profit_total
    }

    /// One clock step. At most one phase transition happens per call.
    pub fn tick(&self) -> Result<TickOutcome> {
        let (outcome, result) = {
            let mut state = self.state.write();
            let old_phase = state.phase;

            let result = match state.phase {
                Phase::Waiting => self.advance_locked(&mut state),
                _ => {
                    if state.timer > 0 {
                        state.timer -= 1;
                    }
                    if state.timer == 0 {
                        self.advance_locked(&mut state)
                    } else {
                        Ok(())
                    }
                }
            };

            let snapshot = state.snapshot();
            let phase_changed = snapshot.phase != old_phase;
            let event = if phase_changed {
                GameEvent::for_phase(&snapshot)
            } else {
                None
            };

            (
                TickOutcome {
                    phase_changed,
                    snapshot,
                    event,
                },
                result,
            )
        };

        if let Some(event) = &outcome.event {
            self.publish(event.clone());
        }

        result.map(|_| outcome)
    }

    /// Start betting now if enough users have bet. Returns whether the round
    /// was started.
    pub fn try_start_from_waiting(&self) -> Result<bool> {
        let snapshot = {
            let mut state = self.state.write();
            if state.phase != Phase::Waiting
                || state.bets.unique_bettors(state.round_id) < MIN_BETTORS
            {
                return Ok(false);
            }
            self.advance_locked(&mut state)?;
            state.snapshot()
        };

        if let Some(event) = GameEvent::for_phase(&snapshot) {
            self.publish(event);
        }
        Ok(snapshot.phase == Phase::Betting)
    }

    /// Accept a bet into the current round: reserve funds, then record.
    /// A failed record returns the reservation before the error is reported.
    pub fn add_bet(&self, user_id: UserId, side: Side, items: Vec<ItemStake>) -> Result<BetReceipt> {
        if user_id <= 0 {
            return Err(CoinflipError::InvalidUser(user_id));
        }
        if items.is_empty() {
            return Err(CoinflipError::EmptyBet);
        }
        if let Some(bad) = items.iter().find(|item| !item.cost.is_finite() || item.cost <= 0.0) {
            return Err(CoinflipError::InvalidStake {
                item: bad.key(),
                cost: bad.cost,
            });
        }
        let stake: f64 = items.iter().map(|item| item.cost).sum();

        let (receipt, new_bets) = {
            let mut state = self.state.write();

            if !state.accepting_bets() {
                return Err(CoinflipError::BettingClosed { phase: state.phase });
            }

            let round_id = state.round_id;
            self.wallet.reserve(round_id, user_id, stake)?;

            let accepted = match state.bets.record(round_id, user_id, side, items) {
                Ok(accepted) => accepted,
                Err(e) => {
                    self.wallet.rollback(round_id, user_id, stake);
                    tracing::warn!(
                        "Round {} rejected bet from user {}: {}",
                        round_id,
                        user_id,
                        e
                    );
                    return Err(e);
                }
            };

            let hash = state.commitment.hash_hex();
            let new_bets = GameEvent::NewBets {
                game_id: round_id,
                hash: hash.clone(),
                user_id,
                side,
                bets: state.bets.snapshot(round_id),
                server_time: Utc::now(),
            };

            tracing::info!(
                "Round {} accepted {} items from user {} on {} (stake {:.6})",
                round_id,
                accepted,
                user_id,
                side,
                stake
            );

            (
                BetReceipt {
                    round_id,
                    hash,
                    accepted,
                    stake,
                },
                new_bets,
            )
        };

        self.publish(new_bets);
        Ok(receipt)
    }

    /// The single transition function behind both `tick` and
    /// `try_start_from_waiting`. Caller holds the write lock.
    fn advance_locked(&self, state: &mut RoundState) -> Result<()> {
        match state.phase {
            Phase::Waiting => {
                if state.bets.unique_bettors(state.round_id) < MIN_BETTORS {
                    state.timer = TIMER_IDLE;
                    return Ok(());
                }
                state.phase = Phase::Betting;
                state.timer = self.config.betting_time;

                tracing::info!(
                    "Round {} started betting for {}s",
                    state.round_id,
                    state.timer
                );
            }

            Phase::Betting => {
                let outcome = reveal_side(state.commitment.secret()).ok_or_else(|| {
                    CoinflipError::internal(format!("Round {} has an empty secret", state.round_id))
                })?;

                state.outcome = Some(outcome);
                state.phase = Phase::Revealing;
                state.timer = self.config.time_till_result;

                tracing::info!("Round {} betting closed, result {}", state.round_id, outcome);
            }

            Phase::Revealing => {
                self.settle_locked(state)?;
                state.phase = Phase::Settled;
                state.timer = self.config.next_game_delay;

                tracing::info!("Round {} finished", state.round_id);
            }

            Phase::Settled => {
                // draw first so a failure leaves the settled round untouched
                let commitment = self.fairness.commit().map_err(|e| {
                    tracing::error!(
                        "Round {} cannot open its successor: {}",
                        state.round_id,
                        e
                    );
                    e
                })?;

                state.bets.clear(state.round_id);
                state.round_id += 1;
                state.phase = Phase::Waiting;
                state.timer = TIMER_IDLE;
                state.outcome = None;
                state.commitment = commitment;

                tracing::info!(
                    "Round {} opened with commitment {}",
                    state.round_id,
                    state.commitment.hash_hex()
                );
            }
        }

        Ok(())
    }

    fn settle_locked(&self, state: &mut RoundState) -> Result<()> {
        let round_id = state.round_id;
        let outcome = state
            .outcome
            .ok_or_else(|| CoinflipError::internal(format!("Round {} has no outcome", round_id)))?;

        let stakes = state.bets.stakes(round_id);
        let mut result = payout::compute(
            round_id,
            &state.commitment.hash_hex(),
            &stakes,
            outcome,
            self.config.house_edge,
        );

        state.house_profit_total += result.house_take;
        result.house_profit_total = state.house_profit_total;

        let cleared = self
            .wallet
            .settle(round_id, &result.payouts(), result.house_take);
        if (cleared - result.total_pool).abs() > 1e-6 {
            tracing::warn!(
                "Round {} reserved {:.6} but pool is {:.6}",
                round_id,
                cleared,
                result.total_pool
            );
        }

        tracing::debug!(
            "Round {} payout: pool {:.6}, winning {:.6}, house cut {:.6}, distributable {:.6}, house total {:.6}",
            round_id,
            result.total_pool,
            result.total_winning_stake,
            result.house_cut,
            result.distributable,
            result.house_profit_total
        );
        for winner in result.winners.values() {
            tracing::debug!(
                "Round {} winner {}: stake {:.6} payout {:.6} x{:.6}",
                round_id,
                winner.user_id,
                winner.stake,
                winner.payout,
                winner.multiplier
            );
        }

        let limit = self.config.history_limit;
        state.payouts.insert(round_id, result.clone());
        while state.payouts.len() > limit {
            state.payouts.pop_first();
        }
        state.history.push_back(result);
        while state.history.len() > limit {
            state.history.pop_front();
        }

        Ok(())
    }
}

impl std::fmt::Debug for RoundEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();
        f.debug_struct("RoundEngine")
            .field("round_id", &snapshot.round_id)
            .field("phase", &snapshot.phase)
            .field("timer", &snapshot.timer)
            .field("hash", &snapshot.hash)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::verify_commitment;
    use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

    /// Secrets `[n; 32]` for n = 0, 1, 2, ... so outcomes alternate heads/tails.
    #[derive(Default)]
    struct CountingFairness {
        next: AtomicU8,
        fail: Arc<AtomicBool>,
    }

    impl FairnessSource for CountingFairness {
        fn commit(&self) -> Result<Commitment> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(CoinflipError::entropy("rng offline"));
            }
            let n = self.next.fetch_add(1, Ordering::SeqCst);
            Ok(Commitment::from_secret(vec![n; 32]))
        }
    }

    fn test_config() -> GameConfig {
        GameConfig {
            betting_time: 2,
            time_till_result: 1,
            next_game_delay: 1,
            ..GameConfig::default()
        }
    }

    fn engine() -> RoundEngine {
        RoundEngine::new(
            test_config(),
            CountingFairness::default(),
            Arc::new(FundLedger::new(100.0)),
        )
        .unwrap()
    }

    fn gift(cost: f64) -> Vec<ItemStake> {
        vec![ItemStake::new("gift", "1", cost)]
    }

    #[test]
    fn test_initial_state() {
        let engine = engine();
        let snap = engine.snapshot();
        assert_eq!(snap.phase, Phase::Waiting);
        assert_eq!(snap.timer, TIMER_IDLE);
        assert_eq!(snap.round_id, 1);
        assert_eq!(snap.hash.len(), 64);
        assert!(snap.seed.is_none());
        assert!(engine.bets_snapshot().is_none());
    }

    #[test]
    fn test_single_bettor_never_starts() {
        let engine = engine();
        engine.add_bet(1, Side::Heads, gift(5.0)).unwrap();
        engine.add_bet(1, Side::Heads, gift(5.0)).unwrap();

        assert!(!engine.try_start_from_waiting().unwrap());
        for _ in 0..50 {
            let outcome = engine.tick().unwrap();
            assert!(!outcome.phase_changed);
        }
        assert_eq!(engine.snapshot().phase, Phase::Waiting);
        assert_eq!(engine.snapshot().timer, TIMER_IDLE);
    }

    #[test]
    fn test_second_bettor_starts_on_next_tick() {
        let engine = engine();
        engine.add_bet(1, Side::Heads, gift(5.0)).unwrap();
        engine.add_bet(2, Side::Tails, gift(5.0)).unwrap();
        assert_eq!(engine.snapshot().phase, Phase::Waiting);

        let outcome = engine.tick().unwrap();
        assert!(outcome.phase_changed);
        assert_eq!(outcome.snapshot.phase, Phase::Betting);
        assert_eq!(outcome.snapshot.timer, 2);
        assert!(matches!(outcome.event, Some(GameEvent::GameStarted { betting_time: 2, .. })));
    }

    #[test]
    fn test_try_start_starts_immediately() {
        let engine = engine();
        let mut events = engine.subscribe();
        engine.add_bet(1, Side::Heads, gift(5.0)).unwrap();
        engine.add_bet(2, Side::Tails, gift(5.0)).unwrap();

        assert!(engine.try_start_from_waiting().unwrap());
        assert_eq!(engine.snapshot().phase, Phase::Betting);
        assert!(!engine.try_start_from_waiting().unwrap());

        let names: Vec<&str> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|e| e.name())
            .collect();
        assert_eq!(names, vec!["new_bets", "new_bets", "gameStarted"]);
    }

    #[test]
    fn test_full_round_cycle() {
        let engine = engine();
        engine.add_bet(1, Side::Heads, gift(10.0)).unwrap();
        engine.add_bet(2, Side::Tails, gift(30.0)).unwrap();
        engine.try_start_from_waiting().unwrap();
        let published_hash = engine.snapshot().hash;

        // betting_time = 2
        assert!(!engine.tick().unwrap().phase_changed);
        let revealing = engine.tick().unwrap();
        assert_eq!(revealing.snapshot.phase, Phase::Revealing);
        // secret [0; 32] is even
        assert_eq!(revealing.snapshot.outcome, Some(Side::Heads));
        assert!(revealing.snapshot.seed.is_none());

        let settled = engine.tick().unwrap();
        assert_eq!(settled.snapshot.phase, Phase::Settled);
        let seed = settled.snapshot.seed.clone().unwrap();
        assert_eq!(
            verify_commitment(&seed, &published_hash).unwrap(),
            Some(Side::Heads)
        );

        let result = engine.payout_for_round(1).unwrap();
        assert_eq!(result.outcome, Side::Heads);
        assert_eq!(result.hash, published_hash);
        assert!((result.winners[&1].payout - 38.0).abs() < 1e-9);
        assert_eq!(engine.wallet().balance(1).unwrap().available, 128.0);
        assert_eq!(engine.wallet().balance(2).unwrap().available, 70.0);
        assert!((engine.wallet().house_balance() - 2.0).abs() < 1e-9);

        let waiting = engine.tick().unwrap();
        assert_eq!(waiting.snapshot.phase, Phase::Waiting);
        assert_eq!(waiting.snapshot.round_id, 2);
        assert_ne!(waiting.snapshot.hash, published_hash);
        assert!(matches!(waiting.event, Some(GameEvent::NewGame { game_id: 2, .. })));
        assert!(engine.bets_snapshot().is_none());
        assert_eq!(engine.unique_bettors(), 0);
    }

    #[test]
    fn test_bets_rejected_outside_betting() {
        let engine = engine();
        engine.add_bet(1, Side::Heads, gift(1.0)).unwrap();
        engine.add_bet(2, Side::Tails, gift(1.0)).unwrap();
        engine.try_start_from_waiting().unwrap();
        engine.tick().unwrap();
        engine.tick().unwrap();
        assert_eq!(engine.snapshot().phase, Phase::Revealing);

        let before = engine.wallet().balance(3).unwrap();
        let err = engine.add_bet(3, Side::Heads, gift(1.0)).unwrap_err();
        assert!(matches!(err, CoinflipError::BettingClosed { phase: Phase::Revealing }));
        assert_eq!(engine.wallet().balance(3).unwrap(), before);
    }

    #[test]
    fn test_validation_rejects_without_side_effects() {
        let engine = engine();
        assert!(matches!(
            engine.add_bet(0, Side::Heads, gift(1.0)),
            Err(CoinflipError::InvalidUser(0))
        ));
        assert!(matches!(
            engine.add_bet(1, Side::Heads, vec![]),
            Err(CoinflipError::EmptyBet)
        ));
        assert!(matches!(
            engine.add_bet(1, Side::Heads, gift(-2.0)),
            Err(CoinflipError::InvalidStake { .. })
        ));
        assert!(matches!(
            engine.add_bet(1, Side::Heads, gift(500.0)),
            Err(CoinflipError::InsufficientFunds { .. })
        ));
        assert_eq!(engine.wallet().balance(1).unwrap().available, 100.0);
        assert_eq!(engine.unique_bettors(), 0);
    }

    #[test]
    fn test_side_switch_rolls_back_reservation() {
        let engine = engine();
        engine.add_bet(1, Side::Heads, gift(10.0)).unwrap();
        let before = engine.wallet().balance(1).unwrap();

        let err = engine.add_bet(1, Side::Tails, gift(20.0)).unwrap_err();
        assert!(matches!(err, CoinflipError::SideMismatch { .. }));
        assert_eq!(engine.wallet().balance(1).unwrap(), before);
        assert_eq!(engine.wallet().reserved_for_round(1), 10.0);
    }

    #[test]
    fn test_entropy_failure_holds_settled_round() {
        let fail = Arc::new(AtomicBool::new(false));
        let fairness = CountingFairness {
            next: AtomicU8::new(0),
            fail: fail.clone(),
        };
        let engine =
            RoundEngine::new(test_config(), fairness, Arc::new(FundLedger::new(100.0))).unwrap();

        engine.add_bet(1, Side::Heads, gift(1.0)).unwrap();
        engine.add_bet(2, Side::Tails, gift(1.0)).unwrap();
        engine.try_start_from_waiting().unwrap();
        engine.tick().unwrap();
        engine.tick().unwrap();
        engine.tick().unwrap();
        assert_eq!(engine.snapshot().phase, Phase::Settled);

        fail.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            assert!(matches!(engine.tick(), Err(CoinflipError::Entropy(_))));
            let snap = engine.snapshot();
            assert_eq!(snap.phase, Phase::Settled);
            assert_eq!(snap.round_id, 1);
        }
        assert!(engine.add_bet(3, Side::Heads, gift(1.0)).is_err());

        fail.store(false, Ordering::SeqCst);
        let outcome = engine.tick().unwrap();
        assert_eq!(outcome.snapshot.phase, Phase::Waiting);
        assert_eq!(outcome.snapshot.round_id, 2);
    }

    #[test]
    fn test_entropy_failure_at_startup_is_fatal() {
        let fairness = CountingFairness::default();
        fairness.fail.store(true, Ordering::SeqCst);
        let result = RoundEngine::new(test_config(), fairness, Arc::new(FundLedger::new(1.0)));
        assert!(matches!(result, Err(CoinflipError::Entropy(_))));
    }

    #[test]
    fn test_oversized_timer_is_rejected_at_construction() {
        let config = GameConfig {
            betting_time: 100_000_000_000_000_000,
            ..test_config()
        };
        let result = RoundEngine::new(
            config,
            CountingFairness::default(),
            Arc::new(FundLedger::new(100.0)),
        );
        assert!(matches!(result, Err(CoinflipError::Config(_))));
    }

    #[test]
    fn test_first_update_carries_bets() {
        let engine = engine();
        engine.add_bet(4, Side::Tails, gift(2.0)).unwrap();

        match engine.first_update() {
            GameEvent::FirstUpdate {
                game_phase,
                timer,
                game_id,
                bets,
                ..
            } => {
                assert_eq!(game_phase, Phase::Waiting);
                assert_eq!(timer, TIMER_IDLE);
                assert_eq!(game_id, 1);
                assert_eq!(bets.unwrap().tails.total_value, 2.0);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}

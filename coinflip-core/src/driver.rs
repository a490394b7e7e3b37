//! Periodic clock for the round engine.

use crate::game::{RoundEngine, TickOutcome};
use crate::{GameEvent, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Number of live client connections, maintained by the transport.
#[derive(Debug, Default)]
pub struct OnlineCounter(AtomicUsize);

impl OnlineCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> usize {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn disconnect(&self) -> usize {
        let prev = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        prev.saturating_sub(1)
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct RoundDriver {
    engine: Arc<RoundEngine>,
    online: Arc<OnlineCounter>,
    ticks: u64,
}

impl RoundDriver {
    pub fn new(engine: Arc<RoundEngine>, online: Arc<OnlineCounter>) -> Self {
        Self {
            engine,
            online,
            ticks: 0,
        }
    }

    /// Tick the engine every `tick_interval` until `shutdown` is set.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let period = self.engine.config().tick_interval;
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!("Round driver started, tick every {:?}", period);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.step();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Round driver stopped after {} ticks", self.ticks);
        Ok(())
    }

    /// One clock step. Returns the engine's tick outcome when it ticked.
    pub fn step(&mut self) -> Option<TickOutcome> {
        self.ticks += 1;

        let online = self.online.get();
        if online == 0 && self.engine.config().pause_when_empty {
            return None;
        }

        let outcome = match self.engine.tick() {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::error!("Tick {} failed: {}", self.ticks, e);
                None
            }
        };

        let every = self.engine.config().online_interval;
        if every > 0 && self.ticks % every == 0 {
            self.engine.publish(GameEvent::online(online));
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{GameConfig, ItemStake, Phase, Side};
    use std::time::Duration;

    fn engine(config: GameConfig) -> Arc<RoundEngine> {
        Arc::new(RoundEngine::from_config(config).unwrap())
    }

    fn start_round(engine: &RoundEngine) {
        for user in [1, 2] {
            engine
                .add_bet(user, Side::Heads, vec![ItemStake::new("gift", "1", 1.0)])
                .unwrap();
        }
    }

    #[test]
    fn test_online_counter() {
        let online = OnlineCounter::new();
        assert_eq!(online.connect(), 1);
        assert_eq!(online.connect(), 2);
        assert_eq!(online.disconnect(), 1);
        assert_eq!(online.disconnect(), 0);
        assert_eq!(online.disconnect(), 0);
    }

    #[test]
    fn test_paused_while_nobody_online() {
        let engine = engine(GameConfig::default());
        start_round(&engine);
        let online = Arc::new(OnlineCounter::new());
        let mut driver = RoundDriver::new(engine.clone(), online.clone());

        assert!(driver.step().is_none());
        assert_eq!(engine.snapshot().phase, Phase::Waiting);

        online.connect();
        let outcome = driver.step().unwrap();
        assert_eq!(outcome.snapshot.phase, Phase::Betting);
    }

    #[test]
    fn test_online_broadcast_interval() {
        let config = GameConfig {
            online_interval: 2,
            pause_when_empty: false,
            ..GameConfig::default()
        };
        let engine = engine(config);
        let mut events = engine.subscribe();
        let online = Arc::new(OnlineCounter::new());
        online.connect();
        let mut driver = RoundDriver::new(engine, online);

        for _ in 0..4 {
            driver.step();
        }

        let online_events: Vec<GameEvent> = std::iter::from_fn(|| events.try_recv().ok())
            .filter(|e| matches!(e, GameEvent::Online { .. }))
            .collect();
        assert_eq!(online_events.len(), 2);
        assert!(matches!(online_events[0], GameEvent::Online { online: 1, .. }));
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let config = GameConfig {
            betting_time: 1_000,
            tick_interval: Duration::from_millis(5),
            pause_when_empty: false,
            ..GameConfig::default()
        };
        let engine = engine(config);
        start_round(&engine);

        let (tx, rx) = watch::channel(false);
        let driver = RoundDriver::new(engine.clone(), Arc::new(OnlineCounter::new()));
        let handle = tokio::spawn(driver.run(rx));

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(engine.snapshot().phase, Phase::Betting);
    }
}

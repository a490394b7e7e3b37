use anyhow::{bail, Result};
use coinflip_core::{CoinflipError, GameConfig, ItemStake, Phase, RoundEngine, Side, UserId};
use comfy_table::{presets::UTF8_FULL, Table};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Item catalog the simulated users pick from.
const CATALOG: &[(&str, &str, f64)] = &[
    ("gift", "rose", 0.5),
    ("gift", "cake", 2.0),
    ("sticker", "cat", 1.25),
    ("sticker", "dog", 4.0),
];

pub fn simulate(config: GameConfig, rounds: usize, players: usize, seed: Option<u64>) -> Result<()> {
    if players < 2 {
        bail!("need at least 2 players to start a round");
    }

    let engine = RoundEngine::from_config(config)?;
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let users: Vec<UserId> = (1..=players as UserId).collect();

    for _ in 0..rounds {
        let round_id = engine.snapshot().round_id;

        for &user_id in &users {
            let side = if rng.gen_bool(0.5) { Side::Heads } else { Side::Tails };
            let items: Vec<ItemStake> = (0..rng.gen_range(1..=3))
                .map(|_| {
                    let (item_type, item_id, cost) = CATALOG[rng.gen_range(0..CATALOG.len())];
                    ItemStake::new(item_type, item_id, cost)
                })
                .collect();

            match engine.add_bet(user_id, side, items) {
                Ok(_) => {}
                Err(CoinflipError::InsufficientFunds { need, available }) => {
                    tracing::info!(
                        "User {} sits out round {}: needs {:.2}, has {:.2}",
                        user_id,
                        round_id,
                        need,
                        available
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        if !engine.try_start_from_waiting()? {
            println!("Round {} could not start: fewer than 2 users can afford a bet", round_id);
            break;
        }

        while engine.snapshot().round_id == round_id {
            engine.tick()?;
        }
        debug_assert_eq!(engine.snapshot().phase, Phase::Waiting);
    }

    print_history(&engine);
    print_balances(&engine, &users)?;
    Ok(())
}

fn print_history(engine: &RoundEngine) {
    let history = engine.history();
    if history.is_empty() {
        println!("No rounds settled");
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec![
        "Round", "Result", "Pool", "Winning", "House", "Winners", "Hash",
    ]);

    for result in &history {
        table.add_row(vec![
            result.round_id.to_string(),
            result.outcome.to_string(),
            format!("{:.2}", result.total_pool),
            format!("{:.2}", result.total_winning_stake),
            format!("{:.2}", result.house_take),
            result.winners.len().to_string(),
            result.hash[..16].to_string(), // truncated for display
        ]);
    }

    println!("Last {} rounds:", history.len());
    println!("{}", table);
}

fn print_balances(engine: &RoundEngine, users: &[UserId]) -> Result<()> {
    let wallet = engine.wallet();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["User", "Available", "Reserved", "Total"]);

    for &user_id in users {
        let balance = wallet.balance(user_id)?;
        table.add_row(vec![
            user_id.to_string(),
            format!("{:.4}", balance.available),
            format!("{:.4}", balance.reserved),
            format!("{:.4}", balance.total),
        ]);
    }

    println!("Balances:");
    println!("{}", table);
    println!("House balance: {:.4}", wallet.house_balance());
    Ok(())
}

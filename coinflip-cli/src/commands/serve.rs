use anyhow::{Context, Result};
use coinflip_core::{
    CoinflipError, GameConfig, GameEvent, ItemRef, OnlineCounter, PriceList, RoundDriver,
    RoundEngine, Side, UserId,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tokio::sync::{mpsc, watch};

const OUTPUT_BUFFER: usize = 256;

/// Client messages, one JSON object per stdin line.
#[derive(Debug, Deserialize)]
#[serde(tag = "client_event", rename_all = "snake_case")]
enum ClientMessage {
    Bet {
        user_id: UserId,
        side: String,
        bet_items: Vec<ItemRef>,
    },
    Balance {
        user_id: UserId,
    },
}

pub async fn serve(config: GameConfig, prices: Option<PathBuf>) -> Result<()> {
    let prices_path = prices.or_else(|| config.prices_file.clone()).unwrap_or_default();
    let prices = PriceList::load(&prices_path)?;

    let engine = Arc::new(RoundEngine::from_config(config)?);
    let online = Arc::new(OnlineCounter::new());

    let (out_tx, mut out_rx) = mpsc::channel::<GameEvent>(OUTPUT_BUFFER);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(event) = out_rx.recv().await {
            let mut line = serde_json::to_vec(&event)?;
            line.push(b'\n');
            stdout.write_all(&line).await?;
            stdout.flush().await?;
        }
        Ok::<_, anyhow::Error>(())
    });

    let (stop_tx, stop_rx) = watch::channel(false);
    let forwarder = tokio::spawn(forward_events(engine.subscribe(), out_tx.clone(), stop_rx));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let driver = tokio::spawn(RoundDriver::new(engine.clone(), online.clone()).run(shutdown_rx));

    online.connect();
    out_tx.send(engine.first_update()).await?;
    tracing::info!("Serving round {}, reading bets from stdin", engine.snapshot().round_id);

    let mut stdin = BufReader::new(tokio::io::stdin());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut reading = true;
    loop {
        tokio::select! {
            line = read_raw_line(&mut stdin), if reading => {
                match line.context("reading stdin")? {
                    Some(line) if line.iter().all(u8::is_ascii_whitespace) => {}
                    Some(line) => {
                        let reply = handle_line(&engine, &prices, &line);
                        out_tx.send(reply).await?;
                    }
                    None => {
                        tracing::info!("stdin closed, rounds keep running until Ctrl-C");
                        reading = false;
                    }
                }
            }
            _ = &mut ctrl_c => break,
        }
    }

    online.disconnect();
    shutdown_tx.send(true)?;
    driver.await??;

    // The driver is stopped, so no more events are coming. Flush what is queued.
    stop_tx.send(true)?;
    forwarder.await?;
    drop(out_tx);
    writer.await??;

    tracing::info!(
        "Stopped at round {}, house balance {:.6}",
        engine.snapshot().round_id,
        engine.wallet().house_balance()
    );
    Ok(())
}

/// Copy engine broadcasts to the output queue until `stop` fires, then drain
/// whatever is still buffered.
async fn forward_events(
    mut events: broadcast::Receiver<GameEvent>,
    out: mpsc::Sender<GameEvent>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    if out.send(event).await.is_err() {
                        return;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Output lagged, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => return,
            },
            _ = stop.changed() => break,
        }
    }

    loop {
        match events.try_recv() {
            Ok(event) => {
                if out.send(event).await.is_err() {
                    return;
                }
            }
            Err(TryRecvError::Lagged(skipped)) => {
                tracing::warn!("Output lagged, {} events dropped", skipped);
            }
            Err(_) => return,
        }
    }
}

/// One newline-terminated line as raw bytes, `None` at end of input. Bytes
/// are not required to be UTF-8; the JSON parser rejects them per line.
async fn read_raw_line<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line).await? == 0 {
        return Ok(None);
    }
    Ok(Some(line))
}

/// Handle one client line and produce the reply for that client. Broadcasts
/// (`new_bets`, phase changes) reach stdout through the engine's channel.
fn handle_line(engine: &RoundEngine, prices: &PriceList, line: &[u8]) -> GameEvent {
    let message: ClientMessage = match serde_json::from_slice(line) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!("Rejected client line: bad_json ({})", e);
            return GameEvent::error(&CoinflipError::Serialization(e));
        }
    };

    let result = match message {
        ClientMessage::Bet {
            user_id,
            side,
            bet_items,
        } => place_bet(engine, prices, user_id, &side, &bet_items),
        ClientMessage::Balance { user_id } => engine
            .wallet()
            .balance(user_id)
            .map(GameEvent::balance),
    };

    result.unwrap_or_else(|e| {
        tracing::warn!("Rejected client request: {} ({})", e.reason(), e);
        GameEvent::error(&e)
    })
}

fn place_bet(
    engine: &RoundEngine,
    prices: &PriceList,
    user_id: UserId,
    side: &str,
    items: &[ItemRef],
) -> coinflip_core::Result<GameEvent> {
    let side: Side = side.parse()?;
    if items.is_empty() {
        return Err(CoinflipError::EmptyBet);
    }
    let stakes = prices.resolve(items)?;

    let receipt = engine.add_bet(user_id, side, stakes)?;
    engine.try_start_from_waiting()?;

    Ok(receipt.accepted_event())
}

use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::book::{Order, Side};
use crate::state::AppState;

const TELEMETRY_TICK_SECS: u64 = 5;

pub(crate) fn start_background_tasks(state: AppState, mut ingress_rx: mpsc::Receiver<Order>) {
    // 1) Ingestion: the single consumer of the ingress queue. Arrival here
    //    totally orders every insert; each push takes only its side's guard.
    let s_ingest = state.clone();
    tokio::spawn(async move {
        while let Some(order) = ingress_rx.recv().await {
            let side = order.side;
            s_ingest.engine.insert_order(order).await;
            match side {
                Side::Buy => s_ingest.perf.ingested_buy.fetch_add(1, Ordering::Relaxed),
                Side::Sell => s_ingest.perf.ingested_sell.fetch_add(1, Ordering::Relaxed),
            };
        }
    });

    // 2) Matcher: sweeps on a timer, or earlier when ingestion nudges.
    let s_match = state.clone();
    tokio::spawn(async move {
        let interval = Duration::from_millis(s_match.cfg.engine.match_interval_ms);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = s_match.engine.wait_for_nudge() => {}
            }
            let trades = s_match.engine.match_sweep().await;
            s_match.perf.match_sweeps.fetch_add(1, Ordering::Relaxed);
            for trade in trades {
                s_match.perf.match_trades.fetch_add(1, Ordering::Relaxed);
                s_match
                    .perf
                    .match_quantity
                    .fetch_add(trade.quantity as u64, Ordering::Relaxed);
                eprintln!(
                    "[matcher] trade buy_order_id={} sell_order_id={} price_cents={} quantity={}",
                    trade.buy_order_id, trade.sell_order_id, trade.price_cents, trade.quantity
                );
                s_match.record_trade(trade).await;
            }
        }
    });

    // 3) Matcher telemetry, emitted only when the counters moved.
    let s_stats = state.clone();
    tokio::spawn(async move {
        let mut last_sweeps = 0u64;
        let mut last_trades = 0u64;
        loop {
            tokio::time::sleep(Duration::from_secs(TELEMETRY_TICK_SECS)).await;
            let sweeps = s_stats.perf.match_sweeps.load(Ordering::Relaxed);
            let trades = s_stats.perf.match_trades.load(Ordering::Relaxed);
            if sweeps == last_sweeps && trades == last_trades {
                continue;
            }
            let (resting_buy, resting_sell) = s_stats.engine.depth().await;
            eprintln!(
                "[matcher] sweeps={} trades={} quantity={} resting_buy={} resting_sell={}",
                sweeps,
                trades,
                s_stats.perf.match_quantity.load(Ordering::Relaxed),
                resting_buy,
                resting_sell
            );
            last_sweeps = sweeps;
            last_trades = trades;
        }
    });
}

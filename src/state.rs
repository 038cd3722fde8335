use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::AppConfig;
use crate::engine::{Engine, Trade};

/// Bound on the recently-emitted-trades ring served by `GET /trades`.
pub(crate) const RECENT_TRADES_CAP: usize = 300;

pub(crate) struct PerfCounters {
    pub(crate) submit_received: AtomicU64,
    pub(crate) submit_rejected_invalid: AtomicU64,
    pub(crate) ingested_buy: AtomicU64,
    pub(crate) ingested_sell: AtomicU64,
    pub(crate) match_sweeps: AtomicU64,
    pub(crate) match_trades: AtomicU64,
    pub(crate) match_quantity: AtomicU64,
}

impl PerfCounters {
    pub(crate) fn new() -> Self {
        Self {
            submit_received: AtomicU64::new(0),
            submit_rejected_invalid: AtomicU64::new(0),
            ingested_buy: AtomicU64::new(0),
            ingested_sell: AtomicU64::new(0),
            match_sweeps: AtomicU64::new(0),
            match_trades: AtomicU64::new(0),
            match_quantity: AtomicU64::new(0),
        }
    }

    pub(crate) fn snapshot_json(&self) -> serde_json::Value {
        serde_json::json!({
            "submit": {
                "received": self.submit_received.load(Ordering::Relaxed),
                "rejected_invalid": self.submit_rejected_invalid.load(Ordering::Relaxed),
            },
            "ingress": {
                "buy_orders": self.ingested_buy.load(Ordering::Relaxed),
                "sell_orders": self.ingested_sell.load(Ordering::Relaxed),
            },
            "matcher": {
                "sweeps": self.match_sweeps.load(Ordering::Relaxed),
                "trades": self.match_trades.load(Ordering::Relaxed),
                "quantity": self.match_quantity.load(Ordering::Relaxed),
            }
        })
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) cfg: Arc<AppConfig>,
    pub(crate) engine: Arc<Engine>,
    pub(crate) perf: Arc<PerfCounters>,
    pub(crate) recent_trades: Arc<Mutex<VecDeque<Trade>>>,
}

impl AppState {
    pub(crate) async fn record_trade(&self, trade: Trade) {
        let mut list = self.recent_trades.lock().await;
        list.push_front(trade);
        while list.len() > RECENT_TRADES_CAP {
            list.pop_back();
        }
    }
}

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::StatusCode;
use tokio::sync::{mpsc, Mutex, Notify};

use crate::book::{Book, Order, Side};
use crate::config::TradePrice;
use crate::error::ApiError;

pub(crate) fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Debug, Clone)]
pub(crate) struct Trade {
    pub(crate) ts_ms: i64,
    pub(crate) buy_order_id: i64,
    pub(crate) sell_order_id: i64,
    pub(crate) price_cents: i64,
    pub(crate) quantity: i64,
}

/// Copy of both books in heap layout order. Consistent per book; the two
/// sides are captured one guard at a time, so a sweep in flight can leave a
/// top-of-book order visible in neither side.
#[derive(Debug, Clone)]
pub(crate) struct BookSnapshot {
    pub(crate) buys: Vec<Order>,
    pub(crate) sells: Vec<Order>,
}

pub(crate) struct Engine {
    buy_book: Mutex<Book>,
    sell_book: Mutex<Book>,
    ingress_tx: mpsc::Sender<Order>,
    next_seq: AtomicU64,
    match_nudge: Notify,
    trade_price: TradePrice,
}

impl Engine {
    pub(crate) fn new(trade_price: TradePrice, ingress_tx: mpsc::Sender<Order>) -> Self {
        Self {
            buy_book: Mutex::new(Book::new(Side::Buy)),
            sell_book: Mutex::new(Book::new(Side::Sell)),
            ingress_tx,
            next_seq: AtomicU64::new(0),
            match_nudge: Notify::new(),
            trade_price,
        }
    }

    /// Hands an order to the ingress queue. Returns once the order is
    /// enqueued, not once it is resting or matched; blocks only while the
    /// queue is at capacity. Invalid orders are dropped here and never reach
    /// a book.
    pub(crate) async fn submit(&self, order: Order) -> Result<(), ApiError> {
        if order.price_cents <= 0 || order.amount <= 0 {
            eprintln!(
                "[ingress] dropped invalid order id={} price_cents={} amount={}",
                order.id, order.price_cents, order.amount
            );
            return Err(ApiError::bad_request("price and amount must be positive"));
        }
        self.ingress_tx
            .send(order)
            .await
            .map_err(|_| ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "ingress queue closed"))
    }

    /// Insertion path for the single ingestion worker: stamps the arrival
    /// sequence, pushes under the side's guard, then wakes the matcher.
    pub(crate) async fn insert_order(&self, mut order: Order) {
        order.seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        match order.side {
            Side::Buy => self.buy_book.lock().await.push(order),
            Side::Sell => self.sell_book.lock().await.push(order),
        }
        self.match_nudge.notify_one();
    }

    /// Resolves when ingestion has inserted at least one order since the
    /// last sweep; the matcher races this against its timer.
    pub(crate) async fn wait_for_nudge(&self) {
        self.match_nudge.notified().await;
    }

    /// One matching sweep: repeatedly crosses the tops of the two books
    /// until they no longer cross or one side empties.
    ///
    /// Both guards are never held at once. Each popped top briefly lives
    /// outside its book while the opposite guard is taken, so a concurrent
    /// query can observe the next-best order as the root.
    pub(crate) async fn match_sweep(&self) -> Vec<Trade> {
        let mut trades = Vec::new();
        loop {
            let popped_buy = { self.buy_book.lock().await.pop() };
            let Some(mut best_buy) = popped_buy else {
                break;
            };

            let popped_sell = { self.sell_book.lock().await.pop() };
            let Some(mut best_sell) = popped_sell else {
                self.buy_book.lock().await.push(best_buy);
                break;
            };

            if best_buy.price_cents < best_sell.price_cents {
                // Not crossed; no later pair can cross either, both tops
                // dominate their books.
                self.buy_book.lock().await.push(best_buy);
                self.sell_book.lock().await.push(best_sell);
                break;
            }

            let quantity = best_buy.amount.min(best_sell.amount);
            let price_cents = match self.trade_price {
                TradePrice::Sell => best_sell.price_cents,
                TradePrice::Buy => best_buy.price_cents,
            };
            best_buy.amount -= quantity;
            best_sell.amount -= quantity;
            trades.push(Trade {
                ts_ms: now_epoch_ms(),
                buy_order_id: best_buy.id,
                sell_order_id: best_sell.id,
                price_cents,
                quantity,
            });

            if best_buy.amount > 0 {
                self.buy_book.lock().await.push(best_buy);
            }
            if best_sell.amount > 0 {
                self.sell_book.lock().await.push(best_sell);
            }

            let buy_left = { !self.buy_book.lock().await.is_empty() };
            let sell_left = { !self.sell_book.lock().await.is_empty() };
            if !buy_left || !sell_left {
                break;
            }
        }
        trades
    }

    pub(crate) async fn best_buy(&self) -> Option<Order> {
        self.buy_book.lock().await.peek().cloned()
    }

    pub(crate) async fn best_sell(&self) -> Option<Order> {
        self.sell_book.lock().await.peek().cloned()
    }

    pub(crate) async fn depth(&self) -> (usize, usize) {
        let buys = { self.buy_book.lock().await.len() };
        let sells = { self.sell_book.lock().await.len() };
        (buys, sells)
    }

    pub(crate) async fn book_snapshot(&self) -> BookSnapshot {
        let buys = { self.buy_book.lock().await.orders().to_vec() };
        let sells = { self.sell_book.lock().await.orders().to_vec() };
        BookSnapshot { buys, sells }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn engine(trade_price: TradePrice) -> (Engine, mpsc::Receiver<Order>) {
        let (tx, rx) = mpsc::channel(1024);
        (Engine::new(trade_price, tx), rx)
    }

    fn buy(id: i64, price_cents: i64, amount: i64) -> Order {
        Order::new(id, Side::Buy, price_cents, amount)
    }

    fn sell(id: i64, price_cents: i64, amount: i64) -> Order {
        Order::new(id, Side::Sell, price_cents, amount)
    }

    async fn assert_book_invariants(eng: &Engine) {
        let snap = eng.book_snapshot().await;
        for (side, orders) in [("buy", &snap.buys), ("sell", &snap.sells)] {
            for (i, o) in orders.iter().enumerate() {
                assert!(o.amount > 0, "{side} book holds order {} with zero residual", o.id);
                assert_eq!(
                    o.heap_index, i as i64,
                    "{side} book order {} heap_index drifted",
                    o.id
                );
            }
        }
        if let Some(root) = snap.buys.first() {
            let max = snap.buys.iter().map(|o| o.price_cents).max().unwrap_or(0);
            assert_eq!(root.price_cents, max, "buy root must carry the highest bid");
        }
        if let Some(root) = snap.sells.first() {
            let min = snap.sells.iter().map(|o| o.price_cents).min().unwrap_or(0);
            assert_eq!(root.price_cents, min, "sell root must carry the lowest ask");
        }
    }

    #[tokio::test]
    async fn equal_price_and_amount_match_exactly() {
        let (eng, _rx) = engine(TradePrice::Sell);
        eng.insert_order(buy(1, 10_000, 5)).await;
        eng.insert_order(sell(2, 10_000, 5)).await;

        let trades = eng.match_sweep().await;
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].buy_order_id, 1);
        assert_eq!(trades[0].sell_order_id, 2);
        assert_eq!(trades[0].price_cents, 10_000);
        assert_eq!(trades[0].quantity, 5);
        assert_eq!(eng.depth().await, (0, 0));
    }

    #[tokio::test]
    async fn partial_fill_leaves_residual_on_the_larger_side() {
        let (eng, _rx) = engine(TradePrice::Sell);
        eng.insert_order(buy(1, 10_000, 10)).await;
        eng.insert_order(sell(2, 10_000, 3)).await;

        let trades = eng.match_sweep().await;
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].quantity, 3);

        let resting = eng.best_buy().await.expect("residual buy must rest");
        assert_eq!(resting.id, 1);
        assert_eq!(resting.amount, 7);
        assert_eq!(eng.depth().await, (1, 0));
        assert_book_invariants(&eng).await;
    }

    #[tokio::test]
    async fn uncrossed_tops_do_not_trade() {
        let (eng, _rx) = engine(TradePrice::Sell);
        eng.insert_order(buy(1, 9_900, 5)).await;
        eng.insert_order(sell(2, 10_100, 5)).await;

        assert!(eng.match_sweep().await.is_empty());
        assert_eq!(eng.best_buy().await.map(|o| o.id), Some(1));
        assert_eq!(eng.best_sell().await.map(|o| o.id), Some(2));
        assert_eq!(eng.depth().await, (1, 1));
    }

    #[tokio::test]
    async fn one_ask_cascades_through_several_bids() {
        let (eng, _rx) = engine(TradePrice::Sell);
        eng.insert_order(buy(1, 10_500, 4)).await;
        eng.insert_order(buy(2, 10_000, 2)).await;
        eng.insert_order(sell(3, 9_900, 5)).await;

        let trades = eng.match_sweep().await;
        assert_eq!(trades.len(), 2);
        assert_eq!(
            (trades[0].buy_order_id, trades[0].sell_order_id, trades[0].price_cents, trades[0].quantity),
            (1, 3, 9_900, 4)
        );
        assert_eq!(
            (trades[1].buy_order_id, trades[1].sell_order_id, trades[1].price_cents, trades[1].quantity),
            (2, 3, 9_900, 1)
        );

        assert_eq!(eng.depth().await, (1, 0));
        let resting = eng.best_buy().await.expect("partially filled bid must rest");
        assert_eq!((resting.id, resting.amount), (2, 1));
        assert_book_invariants(&eng).await;
    }

    #[tokio::test]
    async fn higher_bid_wins_regardless_of_arrival() {
        let (eng, _rx) = engine(TradePrice::Sell);
        eng.insert_order(buy(1, 10_000, 1)).await;
        eng.insert_order(buy(2, 10_500, 1)).await;
        eng.insert_order(sell(3, 10_000, 1)).await;

        let trades = eng.match_sweep().await;
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].buy_order_id, 2, "the more aggressive bid matches first");
        assert_eq!(eng.best_buy().await.map(|o| o.id), Some(1));
    }

    #[tokio::test]
    async fn equal_bids_match_in_arrival_order() {
        let (eng, _rx) = engine(TradePrice::Sell);
        eng.insert_order(buy(1, 10_000, 1)).await;
        eng.insert_order(buy(2, 10_000, 1)).await;
        eng.insert_order(sell(3, 10_000, 1)).await;

        let trades = eng.match_sweep().await;
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].buy_order_id, 1, "price-time priority favors the earlier bid");
    }

    #[tokio::test]
    async fn sweep_without_new_orders_is_idempotent() {
        let (eng, _rx) = engine(TradePrice::Sell);
        eng.insert_order(buy(1, 9_900, 5)).await;
        eng.insert_order(buy(2, 9_800, 2)).await;
        eng.insert_order(sell(3, 10_100, 5)).await;

        assert!(eng.match_sweep().await.is_empty());
        let first = eng.book_snapshot().await;
        assert!(eng.match_sweep().await.is_empty());
        let second = eng.book_snapshot().await;

        let key = |orders: &[Order]| -> Vec<(i64, i64, i64, i64)> {
            orders
                .iter()
                .map(|o| (o.id, o.price_cents, o.amount, o.heap_index))
                .collect()
        };
        assert_eq!(key(&first.buys), key(&second.buys));
        assert_eq!(key(&first.sells), key(&second.sells));
    }

    #[tokio::test]
    async fn trade_price_side_is_configurable() {
        let (eng, _rx) = engine(TradePrice::Sell);
        eng.insert_order(buy(1, 10_200, 5)).await;
        eng.insert_order(sell(2, 10_000, 5)).await;
        assert_eq!(eng.match_sweep().await[0].price_cents, 10_000);

        let (eng, _rx) = engine(TradePrice::Buy);
        eng.insert_order(buy(1, 10_200, 5)).await;
        eng.insert_order(sell(2, 10_000, 5)).await;
        assert_eq!(eng.match_sweep().await[0].price_cents, 10_200);
    }

    #[tokio::test]
    async fn submit_drops_invalid_orders_before_the_queue() {
        let (eng, mut rx) = engine(TradePrice::Sell);
        let err = eng.submit(buy(1, 0, 5)).await.expect_err("zero price must be dropped");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        let err = eng.submit(sell(2, 10_000, 0)).await.expect_err("zero amount must be dropped");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        eng.submit(buy(3, 10_000, 5)).await.expect("valid order is enqueued");
        let queued = rx.try_recv().expect("exactly the valid order reaches the queue");
        assert_eq!(queued.id, 3);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn conservation_holds_over_a_random_batch() {
        let (eng, _rx) = engine(TradePrice::Sell);
        let mut rng = StdRng::seed_from_u64(42);
        let mut originals: HashMap<i64, i64> = HashMap::new();

        for id in 0..500i64 {
            let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
            let price = rng.gen_range(9_000..=11_000);
            let amount = rng.gen_range(1..=10);
            originals.insert(id, amount);
            eng.insert_order(Order::new(id, side, price, amount)).await;
        }

        let trades = eng.match_sweep().await;
        assert!(eng.match_sweep().await.is_empty(), "a second sweep must find nothing");

        let mut traded: HashMap<i64, i64> = HashMap::new();
        for t in &trades {
            assert!(t.quantity > 0);
            *traded.entry(t.buy_order_id).or_insert(0) += t.quantity;
            *traded.entry(t.sell_order_id).or_insert(0) += t.quantity;
        }

        let snap = eng.book_snapshot().await;
        let mut residuals: HashMap<i64, i64> = HashMap::new();
        for o in snap.buys.iter().chain(snap.sells.iter()) {
            residuals.insert(o.id, o.amount);
        }
        for (id, original) in &originals {
            let filled = traded.get(id).copied().unwrap_or(0);
            let resting = residuals.get(id).copied().unwrap_or(0);
            assert_eq!(
                filled + resting,
                *original,
                "order {id} leaked quantity (filled {filled}, resting {resting})"
            );
        }
        assert_book_invariants(&eng).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_producers_preserve_every_invariant() {
        const PRODUCERS: u64 = 8;
        const ORDERS_PER_PRODUCER: u64 = 1_250;
        const TOTAL: usize = (PRODUCERS * ORDERS_PER_PRODUCER) as usize;

        let (tx, mut rx) = mpsc::channel(1024);
        let eng = Arc::new(Engine::new(TradePrice::Sell, tx));

        let ingested = Arc::new(AtomicUsize::new(0));
        let worker_eng = eng.clone();
        let worker_count = ingested.clone();
        tokio::spawn(async move {
            while let Some(order) = rx.recv().await {
                worker_eng.insert_order(order).await;
                worker_count.fetch_add(1, Ordering::Relaxed);
            }
        });

        let mut producers = Vec::new();
        for p in 0..PRODUCERS {
            let eng = eng.clone();
            producers.push(tokio::spawn(async move {
                let mut rng = StdRng::seed_from_u64(7 + p);
                let mut submitted = Vec::with_capacity(ORDERS_PER_PRODUCER as usize);
                for i in 0..ORDERS_PER_PRODUCER {
                    let id = (p * ORDERS_PER_PRODUCER + i) as i64;
                    let side = if rng.gen_bool(0.5) { Side::Buy } else { Side::Sell };
                    let price = rng.gen_range(9_000..=11_000);
                    let amount = rng.gen_range(1..=10);
                    let order = Order::new(id, side, price, amount);
                    submitted.push(order.clone());
                    eng.submit(order).await.expect("queue stays open");
                }
                submitted
            }));
        }

        let mut submitted: HashMap<i64, Order> = HashMap::new();
        for handle in producers {
            for order in handle.await.expect("producer completes") {
                submitted.insert(order.id, order);
            }
        }

        // Quiescent period: wait for the ingestion worker to drain the queue.
        for _ in 0..1_000 {
            if ingested.load(Ordering::Relaxed) == TOTAL {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(ingested.load(Ordering::Relaxed), TOTAL, "ingestion never drained");

        let mut trades = Vec::new();
        loop {
            let batch = eng.match_sweep().await;
            if batch.is_empty() {
                break;
            }
            trades.extend(batch);
        }

        for t in &trades {
            assert!(t.quantity > 0);
            let b = &submitted[&t.buy_order_id];
            let s = &submitted[&t.sell_order_id];
            assert!(
                b.price_cents >= s.price_cents,
                "trade paired uncrossed orders {} and {}",
                b.id,
                s.id
            );
            assert_eq!(t.price_cents, s.price_cents, "sell-side trade pricing");
        }

        if let (Some(bid), Some(ask)) = (eng.best_buy().await, eng.best_sell().await) {
            assert!(bid.price_cents < ask.price_cents, "books must end uncrossed");
        }

        let mut traded: HashMap<i64, i64> = HashMap::new();
        for t in &trades {
            *traded.entry(t.buy_order_id).or_insert(0) += t.quantity;
            *traded.entry(t.sell_order_id).or_insert(0) += t.quantity;
        }
        let snap = eng.book_snapshot().await;
        let mut residuals: HashMap<i64, i64> = HashMap::new();
        for o in snap.buys.iter().chain(snap.sells.iter()) {
            residuals.insert(o.id, o.amount);
        }
        for (id, order) in &submitted {
            let filled = traded.get(id).copied().unwrap_or(0);
            let resting = residuals.get(id).copied().unwrap_or(0);
            assert!(filled <= order.amount, "order {id} overfilled");
            assert_eq!(filled + resting, order.amount, "order {id} leaked quantity");
        }
        assert_book_invariants(&eng).await;
    }
}

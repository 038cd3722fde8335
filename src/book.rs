use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub(crate) enum Side {
    Buy,
    Sell,
}

/// `heap_index` value of an order that is not resident in any book.
pub(crate) const NOT_RESIDENT: i64 = -1;

#[derive(Debug, Clone)]
pub(crate) struct Order {
    pub(crate) id: i64,
    pub(crate) side: Side,
    pub(crate) price_cents: i64,
    /// Residual quantity. Decreases monotonically while matching; an order
    /// with zero residual is never resident in a book.
    pub(crate) amount: i64,
    /// Arrival number stamped at insertion; breaks ties between equal prices.
    pub(crate) seq: u64,
    pub(crate) heap_index: i64,
}

impl Order {
    pub(crate) fn new(id: i64, side: Side, price_cents: i64, amount: i64) -> Self {
        Self {
            id,
            side,
            price_cents,
            amount,
            seq: 0,
            heap_index: NOT_RESIDENT,
        }
    }
}

/// One side of the book: an array-embedded binary heap keyed on price.
///
/// The buy variant keeps the highest price at the root, the sell variant the
/// lowest. Every resident order's `heap_index` equals its slot in the backing
/// array; sift and swap keep that in lockstep.
#[derive(Debug)]
pub(crate) struct Book {
    side: Side,
    orders: Vec<Order>,
}

impl Book {
    pub(crate) fn new(side: Side) -> Self {
        Self {
            side,
            orders: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.orders.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub(crate) fn peek(&self) -> Option<&Order> {
        self.orders.first()
    }

    /// Backing array in heap layout order.
    pub(crate) fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub(crate) fn push(&mut self, mut order: Order) {
        debug_assert!(order.amount > 0, "resting order must have residual quantity");
        order.heap_index = self.orders.len() as i64;
        self.orders.push(order);
        self.sift_up(self.orders.len() - 1);
    }

    pub(crate) fn pop(&mut self) -> Option<Order> {
        if self.orders.is_empty() {
            return None;
        }
        let last = self.orders.len() - 1;
        self.swap(0, last);
        let mut top = self.orders.pop()?;
        top.heap_index = NOT_RESIDENT;
        if !self.orders.is_empty() {
            self.sift_down(0);
        }
        Some(top)
    }

    // Heap order: more aggressive price first, earliest arrival on equal price.
    fn outranks(&self, a: &Order, b: &Order) -> bool {
        if a.price_cents == b.price_cents {
            return a.seq < b.seq;
        }
        match self.side {
            Side::Buy => a.price_cents > b.price_cents,
            Side::Sell => a.price_cents < b.price_cents,
        }
    }

    fn swap(&mut self, i: usize, j: usize) {
        self.orders.swap(i, j);
        self.orders[i].heap_index = i as i64;
        self.orders[j].heap_index = j as i64;
    }

    fn sift_up(&mut self, mut i: usize) {
        while i > 0 {
            let parent = (i - 1) / 2;
            if !self.outranks(&self.orders[i], &self.orders[parent]) {
                break;
            }
            self.swap(i, parent);
            i = parent;
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.orders.len();
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let mut best = left;
            let right = left + 1;
            if right < n && self.outranks(&self.orders[right], &self.orders[left]) {
                best = right;
            }
            if !self.outranks(&self.orders[best], &self.orders[i]) {
                break;
            }
            self.swap(i, best);
            i = best;
        }
    }
}

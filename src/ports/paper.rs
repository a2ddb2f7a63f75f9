use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::connector::{
    AccountSnapshot, ExchangeConnector, ExchangeError, OrderReceipt, PositionSide,
    PositionSnapshot,
};

const DEFAULT_PAPER_LEVERAGE: u32 = 25;

#[derive(Debug, Clone)]
struct PaperPosition {
    size: Decimal,
    entry_price: Decimal,
    leverage: u32,
}

#[derive(Debug)]
struct PaperBook {
    cash_equity: Decimal,
    available_balance: Decimal,
    marks: HashMap<String, Decimal>,
    positions: HashMap<(String, PositionSide), PaperPosition>,
    leverage: HashMap<String, u32>,
    reject_orders: bool,
    next_order_id: u64,
}

/// In-memory venue with deterministic fills at the configured mark price.
/// A single mutex guards the whole book; every call takes it briefly and
/// never holds it across an await.
pub struct PaperConnector {
    book: Mutex<PaperBook>,
}

impl PaperConnector {
    pub fn new(equity: Decimal) -> Self {
        Self {
            book: Mutex::new(PaperBook {
                cash_equity: equity,
                available_balance: equity,
                marks: HashMap::new(),
                positions: HashMap::new(),
                leverage: HashMap::new(),
                reject_orders: false,
                next_order_id: 1,
            }),
        }
    }

    pub fn set_mark_price(&self, pair: &str, price: Decimal) {
        if let Ok(mut book) = self.book.lock() {
            book.marks.insert(pair.to_string(), price);
        }
    }

    /// Every subsequent order comes back `Rejected` until cleared.
    pub fn set_reject_orders(&self, reject: bool) {
        if let Ok(mut book) = self.book.lock() {
            book.reject_orders = reject;
        }
    }

    fn place(
        &self,
        pair: &str,
        side: PositionSide,
        amount: Decimal,
        reduce_only: bool,
    ) -> Result<OrderReceipt, ExchangeError> {
        if amount <= Decimal::ZERO {
            return Err(ExchangeError::Rejected(format!(
                "non-positive amount {} for {}",
                amount, pair
            )));
        }
        let mut book = self
            .book
            .lock()
            .map_err(|_| ExchangeError::Transport("paper book poisoned".to_string()))?;
        if book.reject_orders {
            return Err(ExchangeError::Rejected(format!(
                "paper venue refusing orders ({})",
                pair
            )));
        }
        let mark = *book
            .marks
            .get(pair)
            .ok_or_else(|| ExchangeError::Rejected(format!("no mark price for {}", pair)))?;

        if reduce_only {
            // a reduce-only buy closes short exposure, a reduce-only sell
            // closes long exposure
            let closing_side = match side {
                PositionSide::Long => PositionSide::Short,
                PositionSide::Short => PositionSide::Long,
            };
            let key = (pair.to_string(), closing_side);
            let position = book.positions.get(&key).cloned().ok_or_else(|| {
                ExchangeError::Rejected(format!(
                    "no {} position on {} to reduce",
                    closing_side.label(),
                    pair
                ))
            })?;
            let closed = amount.min(position.size);
            let pnl = match closing_side {
                PositionSide::Long => (mark - position.entry_price) * closed,
                PositionSide::Short => (position.entry_price - mark) * closed,
            };
            let released = position.entry_price * closed / Decimal::from(position.leverage);
            book.cash_equity += pnl;
            book.available_balance += released + pnl;
            let remaining = position.size - closed;
            if remaining > Decimal::ZERO {
                if let Some(p) = book.positions.get_mut(&key) {
                    p.size = remaining;
                }
            } else {
                book.positions.remove(&key);
            }
        } else {
            let leverage = *book.leverage.get(pair).unwrap_or(&DEFAULT_PAPER_LEVERAGE);
            let margin = mark * amount / Decimal::from(leverage);
            if margin > book.available_balance {
                return Err(ExchangeError::Rejected(format!(
                    "insufficient margin for {} {} (needs {})",
                    pair,
                    side.label(),
                    margin
                )));
            }
            book.available_balance -= margin;
            let key = (pair.to_string(), side);
            match book.positions.get_mut(&key) {
                Some(p) => {
                    p.entry_price =
                        (p.entry_price * p.size + mark * amount) / (p.size + amount);
                    p.size += amount;
                }
                None => {
                    book.positions.insert(
                        key,
                        PaperPosition {
                            size: amount,
                            entry_price: mark,
                            leverage,
                        },
                    );
                }
            }
        }

        let order_id = book.next_order_id;
        book.next_order_id += 1;
        Ok(OrderReceipt {
            order_id: order_id.to_string(),
            pair: pair.to_string(),
            amount,
            reduce_only,
        })
    }
}

#[async_trait]
impl ExchangeConnector for PaperConnector {
    async fn get_account_snapshot(&self) -> Result<AccountSnapshot, ExchangeError> {
        let book = self
            .book
            .lock()
            .map_err(|_| ExchangeError::Transport("paper book poisoned".to_string()))?;
        let mut unrealized = Decimal::ZERO;
        for ((pair, side), position) in &book.positions {
            let mark = *book.marks.get(pair).unwrap_or(&position.entry_price);
            unrealized += match side {
                PositionSide::Long => (mark - position.entry_price) * position.size,
                PositionSide::Short => (position.entry_price - mark) * position.size,
            };
        }
        Ok(AccountSnapshot {
            equity: book.cash_equity + unrealized,
            available_balance: book.available_balance,
        })
    }

    async fn get_positions(&self) -> Result<Vec<PositionSnapshot>, ExchangeError> {
        let book = self
            .book
            .lock()
            .map_err(|_| ExchangeError::Transport("paper book poisoned".to_string()))?;
        let mut snapshots = Vec::with_capacity(book.positions.len());
        for ((pair, side), position) in &book.positions {
            let mark = *book.marks.get(pair).unwrap_or(&position.entry_price);
            let unrealized_pnl = match side {
                PositionSide::Long => (mark - position.entry_price) * position.size,
                PositionSide::Short => (position.entry_price - mark) * position.size,
            };
            snapshots.push(PositionSnapshot {
                pair: pair.clone(),
                side: *side,
                size: position.size,
                notional: mark * position.size,
                leverage: position.leverage,
                unrealized_pnl,
            });
        }
        snapshots.sort_by(|a, b| a.pair.cmp(&b.pair).then(a.side.label().cmp(b.side.label())));
        Ok(snapshots)
    }

    async fn set_leverage(&self, pair: &str, leverage: u32) -> Result<(), ExchangeError> {
        if leverage == 0 {
            return Err(ExchangeError::Rejected(format!(
                "zero leverage for {}",
                pair
            )));
        }
        let mut book = self
            .book
            .lock()
            .map_err(|_| ExchangeError::Transport("paper book poisoned".to_string()))?;
        book.leverage.insert(pair.to_string(), leverage);
        for ((position_pair, _), position) in book.positions.iter_mut() {
            if position_pair == pair {
                position.leverage = leverage;
            }
        }
        Ok(())
    }

    async fn buy(
        &self,
        pair: &str,
        amount: Decimal,
        reduce_only: bool,
    ) -> Result<OrderReceipt, ExchangeError> {
        self.place(pair, PositionSide::Long, amount, reduce_only)
    }

    async fn sell(
        &self,
        pair: &str,
        amount: Decimal,
        reduce_only: bool,
    ) -> Result<OrderReceipt, ExchangeError> {
        self.place(pair, PositionSide::Short, amount, reduce_only)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn orders_open_and_average_positions() {
        let venue = PaperConnector::new(dec!(1000));
        venue.set_mark_price("ETHUSDT", dec!(2000));
        venue.buy("ETHUSDT", dec!(0.01), false).await.unwrap();
        venue.set_mark_price("ETHUSDT", dec!(3000));
        venue.buy("ETHUSDT", dec!(0.01), false).await.unwrap();

        let positions = venue.get_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].side, PositionSide::Long);
        assert_eq!(positions[0].size, dec!(0.02));
        // averaged entry 2500, marked at 3000
        assert_eq!(positions[0].unrealized_pnl, dec!(10.00));
        assert_eq!(positions[0].notional, dec!(60.00));
    }

    #[tokio::test]
    async fn reduce_only_buy_closes_the_short() {
        let venue = PaperConnector::new(dec!(1000));
        venue.set_mark_price("ETHUSDT", dec!(2000));
        venue.sell("ETHUSDT", dec!(0.02), false).await.unwrap();
        venue.set_mark_price("ETHUSDT", dec!(1500));
        venue.buy("ETHUSDT", dec!(0.01), true).await.unwrap();

        let positions = venue.get_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].side, PositionSide::Short);
        assert_eq!(positions[0].size, dec!(0.01));

        // realized 5 on the closed half
        let account = venue.get_account_snapshot().await.unwrap();
        assert_eq!(account.equity, dec!(1010.00));
    }

    #[tokio::test]
    async fn reject_flag_refuses_every_order() {
        let venue = PaperConnector::new(dec!(1000));
        venue.set_mark_price("ETHUSDT", dec!(2000));
        venue.set_reject_orders(true);
        let err = venue.buy("ETHUSDT", dec!(0.01), false).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Rejected(_)));
        assert!(venue.get_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_mark_price_is_a_rejection() {
        let venue = PaperConnector::new(dec!(1000));
        let err = venue.buy("ETHUSDT", dec!(0.01), false).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Rejected(_)));
    }

    #[tokio::test]
    async fn insufficient_margin_is_a_rejection() {
        let venue = PaperConnector::new(dec!(1));
        venue.set_mark_price("BTCUSDT", dec!(60000));
        let err = venue.buy("BTCUSDT", dec!(1), false).await.unwrap_err();
        assert!(matches!(err, ExchangeError::Rejected(_)));
    }

    #[tokio::test]
    async fn leverage_applies_to_open_positions() {
        let venue = PaperConnector::new(dec!(1000));
        venue.set_mark_price("ETHUSDT", dec!(2000));
        venue.buy("ETHUSDT", dec!(0.01), false).await.unwrap();
        venue.set_leverage("ETHUSDT", 50).await.unwrap();
        let positions = venue.get_positions().await.unwrap();
        assert_eq!(positions[0].leverage, 50);
    }
}

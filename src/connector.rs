use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which side of a pair a position snapshot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn label(&self) -> &'static str {
        match self {
            PositionSide::Long => "long",
            PositionSide::Short => "short",
        }
    }
}

/// Account-level fundamentals, refreshed once per cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub equity: Decimal,
    pub available_balance: Decimal,
}

/// Normalized view of one open leg. The engine never sees raw exchange
/// payloads; connectors map whatever their venue returns into this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub pair: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub notional: Decimal,
    pub leverage: u32,
    pub unrealized_pnl: Decimal,
}

#[derive(Debug, Clone)]
pub struct OrderReceipt {
    pub order_id: String,
    pub pair: String,
    pub amount: Decimal,
    pub reduce_only: bool,
}

#[derive(Debug)]
pub enum ExchangeError {
    /// The venue refused the order (insufficient margin, bad size, ...).
    Rejected(String),
    /// Connectivity or data-integrity failure while talking to the venue.
    Transport(String),
    /// The requested connector or operation is not available.
    Unsupported(String),
}

impl fmt::Display for ExchangeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExchangeError::Rejected(e) => write!(f, "order rejected: {}", e),
            ExchangeError::Transport(e) => write!(f, "exchange transport error: {}", e),
            ExchangeError::Unsupported(e) => write!(f, "unsupported: {}", e),
        }
    }
}

impl std::error::Error for ExchangeError {}

/// Contract the advice engine consumes. Connectivity, retries and rate
/// limits are the implementor's business; the engine awaits each call
/// sequentially and treats a failed snapshot fetch as a cycle abort.
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    async fn get_account_snapshot(&self) -> Result<AccountSnapshot, ExchangeError>;

    async fn get_positions(&self) -> Result<Vec<PositionSnapshot>, ExchangeError>;

    async fn set_leverage(&self, pair: &str, leverage: u32) -> Result<(), ExchangeError>;

    async fn buy(
        &self,
        pair: &str,
        amount: Decimal,
        reduce_only: bool,
    ) -> Result<OrderReceipt, ExchangeError>;

    async fn sell(
        &self,
        pair: &str,
        amount: Decimal,
        reduce_only: bool,
    ) -> Result<OrderReceipt, ExchangeError>;
}

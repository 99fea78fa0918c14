// ===============================
// src/domain.rs
// ===============================
//
// Canonical shapes every venue normalizes into. These are transient values:
// constructed fresh per stream frame or REST response, never cached or
// diffed. "Most recent wins" is the consumer's policy, not ours.

use serde::{Deserialize, Serialize};

use crate::error::AdapterError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn sign(&self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }

    /// Side of a position from its signed quantity. Zero counts as long.
    pub fn from_signed_qty(qty: f64) -> Side {
        if qty < 0.0 {
            Side::Sell
        } else {
            Side::Buy
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

impl OrderType {
    pub fn requires_limit_price(&self) -> bool {
        matches!(self, OrderType::Limit | OrderType::StopLimit)
    }

    pub fn requires_stop_price(&self) -> bool {
        matches!(self, OrderType::Stop | OrderType::StopLimit)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Fok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginMode {
    Cross,
    Isolated,
}

/// One market-data update for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTick {
    pub symbol: String,
    pub last: f64,
    pub bid: f64,
    pub ask: f64,
    pub volume: f64,
    /// Epoch millis.
    pub timestamp: i64,
    pub change: Option<f64>,
    pub change_percent: Option<f64>,
}

/// What the caller asks a venue to do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: Side,
    pub quantity: f64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub time_in_force: TimeInForce,
    pub leverage: Option<u32>,
    pub margin_mode: Option<MarginMode>,
}

impl OrderRequest {
    /// Pre-flight validation. Runs before any network call; a rejection here
    /// never reaches the venue.
    pub fn validate(&self) -> Result<(), AdapterError> {
        if self.symbol.trim().is_empty() {
            return Err(AdapterError::InvalidOrder("empty symbol".into()));
        }
        if !self.quantity.is_finite() || self.quantity <= 0.0 {
            return Err(AdapterError::InvalidOrder(format!(
                "quantity must be positive, got {}",
                self.quantity
            )));
        }
        if self.order_type.requires_limit_price() && self.limit_price.is_none() {
            return Err(AdapterError::InvalidOrder(format!(
                "{:?} order requires a limit price",
                self.order_type
            )));
        }
        if self.order_type.requires_stop_price() && self.stop_price.is_none() {
            return Err(AdapterError::InvalidOrder(format!(
                "{:?} order requires a stop price",
                self.order_type
            )));
        }
        Ok(())
    }
}

/// Order lifecycle: `New -> {PartiallyFilled -> Filled | Canceled | Rejected}`,
/// with direct `New -> Filled` and `New -> Canceled` also valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderState {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl OrderState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderState::Filled | OrderState::Canceled | OrderState::Rejected
        )
    }

    /// Whether an update moving `self -> next` is a valid lifecycle step.
    /// Repeats of the current state are accepted (venues resend snapshots);
    /// a terminal state accepts nothing else.
    pub fn accepts(&self, next: OrderState) -> bool {
        if *self == next {
            return true;
        }
        match self {
            OrderState::New => true,
            OrderState::PartiallyFilled => next != OrderState::New,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::New => "new",
            OrderState::PartiallyFilled => "partially_filled",
            OrderState::Filled => "filled",
            OrderState::Canceled => "canceled",
            OrderState::Rejected => "rejected",
        }
    }
}

/// Venue-acknowledged order, as echoed by REST responses and stream updates.
/// Stream updates routinely omit echo fields, hence the `Option`s.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatus {
    pub order_id: String,
    pub client_order_id: Option<String>,
    pub symbol: String,
    pub side: Option<Side>,
    pub order_type: Option<OrderType>,
    pub quantity: f64,
    pub filled_quantity: f64,
    pub avg_fill_price: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    pub time_in_force: Option<TimeInForce>,
    pub state: OrderState,
    /// Epoch millis, when the venue accepted the order.
    pub submitted_at: Option<i64>,
    /// Epoch millis of this update.
    pub updated_at: i64,
}

/// Open position as reported by a venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    /// Magnitude; direction is carried by `side`.
    pub quantity: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub leverage: Option<u32>,
    pub margin_mode: Option<MarginMode>,
}

/// Account-level balances. Day-trade fields are only populated by
/// equities-regulated venues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub total_value: f64,
    pub available: f64,
    pub margin_used: f64,
    pub day_trade_count: Option<u32>,
    pub pattern_day_trader: Option<bool>,
}

/// Recorder envelope, one JSONL line per event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    Tick(MarketTick),
    Order(OrderStatus),
    Note(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit_req() -> OrderRequest {
        OrderRequest {
            symbol: "BTCUSDT".into(),
            side: Side::Buy,
            quantity: 1.0,
            order_type: OrderType::Limit,
            limit_price: Some(50_000.0),
            stop_price: None,
            time_in_force: TimeInForce::Gtc,
            leverage: None,
            margin_mode: None,
        }
    }

    #[test]
    fn limit_order_without_price_is_invalid() {
        let mut req = limit_req();
        req.limit_price = None;
        assert!(matches!(req.validate(), Err(AdapterError::InvalidOrder(_))));
    }

    #[test]
    fn stop_order_without_stop_price_is_invalid() {
        let mut req = limit_req();
        req.order_type = OrderType::Stop;
        req.limit_price = None;
        assert!(req.validate().is_err());
        req.stop_price = Some(49_000.0);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn non_positive_quantity_is_invalid() {
        let mut req = limit_req();
        req.quantity = 0.0;
        assert!(req.validate().is_err());
        req.quantity = -3.0;
        assert!(req.validate().is_err());
        req.quantity = f64::NAN;
        assert!(req.validate().is_err());
    }

    #[test]
    fn market_order_needs_no_prices() {
        let mut req = limit_req();
        req.order_type = OrderType::Market;
        req.limit_price = None;
        assert!(req.validate().is_ok());
    }

    #[test]
    fn terminal_states_accept_no_regression() {
        for terminal in [OrderState::Filled, OrderState::Canceled, OrderState::Rejected] {
            assert!(terminal.is_terminal());
            assert!(terminal.accepts(terminal));
            assert!(!terminal.accepts(OrderState::New));
            assert!(!terminal.accepts(OrderState::PartiallyFilled));
        }
        // Filled never flips to another terminal either.
        assert!(!OrderState::Filled.accepts(OrderState::Canceled));
    }

    #[test]
    fn new_transitions_anywhere() {
        for next in [
            OrderState::PartiallyFilled,
            OrderState::Filled,
            OrderState::Canceled,
            OrderState::Rejected,
        ] {
            assert!(OrderState::New.accepts(next));
        }
    }

    #[test]
    fn partial_fill_cannot_return_to_new() {
        assert!(!OrderState::PartiallyFilled.accepts(OrderState::New));
        assert!(OrderState::PartiallyFilled.accepts(OrderState::PartiallyFilled));
        assert!(OrderState::PartiallyFilled.accepts(OrderState::Filled));
        assert!(OrderState::PartiallyFilled.accepts(OrderState::Canceled));
    }

    #[test]
    fn position_side_from_signed_qty() {
        assert_eq!(Side::from_signed_qty(2.5), Side::Buy);
        assert_eq!(Side::from_signed_qty(-0.5), Side::Sell);
    }
}

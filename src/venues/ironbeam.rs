// ===============================
// src/venues/ironbeam.rs
// ===============================
//
// Futures broker family with session auth: username/password are exchanged
// for an access token at login, and every REST call carries a single
// `Authorization: Bearer` header. Wire frames are nested JSON with numeric
// fields, unlike the string-decimal crypto venues.

use serde::Deserialize;

use super::{Method, SignedRequest, VenueAdapter};
use crate::config::{VenueConfig, VenueKind};
use crate::domain::{
    AccountSnapshot, MarketTick, OrderRequest, OrderState, OrderStatus, OrderType, Position, Side,
    TimeInForce,
};
use crate::error::AdapterError;

pub struct Ironbeam;

// ---- stream models ----

#[derive(Debug, Deserialize)]
struct StreamFrame {
    #[serde(rename = "e")]
    event: String,
    #[serde(rename = "d", default)]
    data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    symbol: String,
    last: f64,
    bid: f64,
    ask: f64,
    volume: f64,
    timestamp: i64,
    #[serde(default)]
    change: Option<f64>,
    #[serde(rename = "changePct", default)]
    change_pct: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderData {
    order_id: i64,
    #[serde(default)]
    cl_ord_id: Option<String>,
    symbol: String,
    status: String,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    order_type: Option<String>,
    #[serde(default)]
    qty: Option<f64>,
    #[serde(default)]
    cum_qty: Option<f64>,
    #[serde(default)]
    avg_px: Option<f64>,
    #[serde(default)]
    price: Option<f64>,
    #[serde(default)]
    stop_price: Option<f64>,
    #[serde(default)]
    tif: Option<String>,
    #[serde(default)]
    created_at: Option<i64>,
    #[serde(default)]
    updated_at: Option<i64>,
    #[serde(default)]
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestAccount {
    account_value: f64,
    buying_power: f64,
    margin_used: f64,
    #[serde(default)]
    day_trades: Option<u32>,
    #[serde(default)]
    pattern_day_trader: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestPosition {
    symbol: String,
    net_pos: f64,
    avg_price: f64,
    mark_price: f64,
    #[serde(default)]
    open_pnl: f64,
    #[serde(default)]
    closed_pnl: f64,
}

fn map_status(s: &str) -> Option<OrderState> {
    match s {
        "Working" | "Accepted" => Some(OrderState::New),
        "PartialFill" => Some(OrderState::PartiallyFilled),
        "Filled" => Some(OrderState::Filled),
        "Canceled" => Some(OrderState::Canceled),
        "Rejected" => Some(OrderState::Rejected),
        _ => None,
    }
}

fn map_side(s: &str) -> Option<Side> {
    match s {
        "Buy" => Some(Side::Buy),
        "Sell" => Some(Side::Sell),
        _ => None,
    }
}

fn map_order_type(s: &str) -> Option<OrderType> {
    match s {
        "Market" => Some(OrderType::Market),
        "Limit" => Some(OrderType::Limit),
        "Stop" => Some(OrderType::Stop),
        "StopLimit" => Some(OrderType::StopLimit),
        _ => None,
    }
}

fn map_tif(s: &str) -> Option<TimeInForce> {
    match s {
        "Day" => Some(TimeInForce::Day),
        "GTC" => Some(TimeInForce::Gtc),
        "IOC" => Some(TimeInForce::Ioc),
        "FOK" => Some(TimeInForce::Fok),
        _ => None,
    }
}

fn order_from_data(o: OrderData) -> Option<OrderStatus> {
    let state = map_status(&o.status)?;
    let updated_at = o.updated_at.or(o.timestamp).or(o.created_at).unwrap_or(0);
    Some(OrderStatus {
        order_id: o.order_id.to_string(),
        client_order_id: o.cl_ord_id,
        symbol: o.symbol,
        side: o.side.as_deref().and_then(map_side),
        order_type: o.order_type.as_deref().and_then(map_order_type),
        quantity: o.qty.unwrap_or(0.0),
        filled_quantity: o.cum_qty.unwrap_or(0.0),
        avg_fill_price: o.avg_px.unwrap_or(0.0),
        limit_price: o.price,
        stop_price: o.stop_price,
        time_in_force: o.tif.as_deref().and_then(map_tif),
        state,
        submitted_at: o.created_at,
        updated_at,
    })
}

impl VenueAdapter for Ironbeam {
    fn kind(&self) -> VenueKind {
        VenueKind::Ironbeam
    }

    fn subscription_message(&self, symbols: &[String]) -> String {
        serde_json::json!({ "type": "subscribe", "symbols": symbols }).to_string()
    }

    fn normalize_tick(&self, raw: &str) -> Option<MarketTick> {
        let frame: StreamFrame = serde_json::from_str(raw).ok()?;
        if frame.event != "quote" {
            return None;
        }
        let q: QuoteData = serde_json::from_value(frame.data?).ok()?;
        Some(MarketTick {
            symbol: q.symbol,
            last: q.last,
            bid: q.bid,
            ask: q.ask,
            volume: q.volume,
            timestamp: q.timestamp,
            change: q.change,
            change_percent: q.change_pct,
        })
    }

    fn normalize_order_update(&self, raw: &str) -> Option<OrderStatus> {
        let frame: StreamFrame = serde_json::from_str(raw).ok()?;
        if frame.event != "order" {
            return None;
        }
        let o: OrderData = serde_json::from_value(frame.data?).ok()?;
        order_from_data(o)
    }

    fn requires_session(&self) -> bool {
        true
    }

    fn login_request(&self, cfg: &VenueConfig) -> Result<(String, String), AdapterError> {
        let username = cfg.username.clone().ok_or_else(|| {
            AdapterError::Configuration("ironbeam requires a username".into())
        })?;
        let password = cfg.password.clone().ok_or_else(|| {
            AdapterError::Configuration("ironbeam requires a password".into())
        })?;
        let body = serde_json::json!({ "username": username, "password": password }).to_string();
        Ok(("/auth/token".to_string(), body))
    }

    fn parse_session_token(&self, body: &str) -> Result<String, AdapterError> {
        let resp: LoginResponse = serde_json::from_str(body)?;
        Ok(resp.token)
    }

    fn order_payload(
        &self,
        _cfg: &VenueConfig,
        req: &OrderRequest,
        client_order_id: &str,
    ) -> Result<String, AdapterError> {
        let mut body = serde_json::json!({
            "symbol": req.symbol,
            "side": match req.side { Side::Buy => "Buy", Side::Sell => "Sell" },
            "orderType": match req.order_type {
                OrderType::Market => "Market",
                OrderType::Limit => "Limit",
                OrderType::Stop => "Stop",
                OrderType::StopLimit => "StopLimit",
            },
            "orderQty": req.quantity,
            "tif": match req.time_in_force {
                TimeInForce::Day => "Day",
                TimeInForce::Gtc => "GTC",
                TimeInForce::Ioc => "IOC",
                TimeInForce::Fok => "FOK",
            },
            "clOrdId": client_order_id,
        });
        if let Some(px) = req.limit_price {
            body["price"] = serde_json::json!(px);
        }
        if let Some(px) = req.stop_price {
            body["stopPrice"] = serde_json::json!(px);
        }
        Ok(body.to_string())
    }

    fn sign_request(
        &self,
        _cfg: &VenueConfig,
        session: Option<&str>,
        method: Method,
        path: &str,
        payload: &str,
    ) -> Result<SignedRequest, AdapterError> {
        let token = session.ok_or_else(|| {
            AdapterError::Configuration("ironbeam session token missing".into())
        })?;
        let body = if method == Method::Post && !payload.is_empty() {
            Some(payload.to_string())
        } else {
            None
        };
        Ok(SignedRequest {
            path: path.to_string(),
            headers: vec![("Authorization", format!("Bearer {token}"))],
            body,
        })
    }

    fn parse_order(&self, body: &str) -> Result<OrderStatus, AdapterError> {
        let o: OrderData = serde_json::from_str(body)?;
        let status = o.status.clone();
        order_from_data(o)
            .ok_or_else(|| AdapterError::Parse(format!("unknown order status {status:?}")))
    }

    fn parse_orders(&self, body: &str) -> Result<Vec<OrderStatus>, AdapterError> {
        let raw: Vec<OrderData> = serde_json::from_str(body)?;
        Ok(raw.into_iter().filter_map(order_from_data).collect())
    }

    fn parse_positions(&self, body: &str) -> Result<Vec<Position>, AdapterError> {
        let raw: Vec<RestPosition> = serde_json::from_str(body)?;
        Ok(raw
            .into_iter()
            .filter(|p| p.net_pos != 0.0)
            .map(|p| Position {
                symbol: p.symbol,
                side: Side::from_signed_qty(p.net_pos),
                quantity: p.net_pos.abs(),
                entry_price: p.avg_price,
                mark_price: p.mark_price,
                unrealized_pnl: p.open_pnl,
                realized_pnl: p.closed_pnl,
                leverage: None,
                margin_mode: None,
            })
            .collect())
    }

    fn parse_account(&self, body: &str) -> Result<AccountSnapshot, AdapterError> {
        let acc: RestAccount = serde_json::from_str(body)?;
        Ok(AccountSnapshot {
            total_value: acc.account_value,
            available: acc.buying_power,
            margin_used: acc.margin_used,
            day_trade_count: acc.day_trades,
            pattern_day_trader: acc.pattern_day_trader,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUOTE_FRAME: &str = r#"{"e":"quote","d":{"symbol":"ESZ5","last":5999.25,"bid":5999.00,"ask":5999.50,"volume":120345,"timestamp":1700000000123,"change":12.25,"changePct":0.2}}"#;

    #[test]
    fn normalizes_quote_frame() {
        let tick = Ironbeam.normalize_tick(QUOTE_FRAME).unwrap();
        assert_eq!(tick.symbol, "ESZ5");
        assert!((tick.last - 5999.25).abs() < 1e-9);
        assert!((tick.bid - 5999.00).abs() < 1e-9);
        assert!((tick.ask - 5999.50).abs() < 1e-9);
        assert!((tick.volume - 120345.0).abs() < 1e-9);
        assert_eq!(tick.timestamp, 1700000000123);
        assert!((tick.change_percent.unwrap() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn heartbeat_and_ack_are_ignored() {
        assert!(Ironbeam.normalize_tick(r#"{"e":"heartbeat"}"#).is_none());
        assert!(Ironbeam
            .normalize_tick(r#"{"e":"subscribed","d":{"symbols":["ESZ5"]}}"#)
            .is_none());
        assert!(Ironbeam
            .normalize_order_update(r#"{"e":"heartbeat"}"#)
            .is_none());
    }

    #[test]
    fn normalizes_order_frame() {
        let frame = r#"{"e":"order","d":{"orderId":991,"clOrdId":"CL-3","symbol":"ESZ5","status":"PartialFill","side":"Buy","orderType":"Limit","qty":2,"cumQty":1,"avgPx":5999.25,"price":5999.50,"tif":"Day","timestamp":1700000002000}}"#;
        let up = Ironbeam.normalize_order_update(frame).unwrap();
        assert_eq!(up.order_id, "991");
        assert_eq!(up.state, OrderState::PartiallyFilled);
        assert_eq!(up.time_in_force, Some(TimeInForce::Day));
        assert!((up.filled_quantity - 1.0).abs() < 1e-9);
        assert_eq!(up.updated_at, 1700000002000);
    }

    #[test]
    fn login_requires_credentials() {
        let cfg = VenueConfig::new(VenueKind::Ironbeam, true);
        assert!(matches!(
            Ironbeam.login_request(&cfg),
            Err(AdapterError::Configuration(_))
        ));

        let mut cfg = cfg;
        cfg.username = Some("trader".into());
        cfg.password = Some("hunter2".into());
        let (path, body) = Ironbeam.login_request(&cfg).unwrap();
        assert_eq!(path, "/auth/token");
        assert!(body.contains("trader"));
    }

    #[test]
    fn parses_session_token() {
        let token = Ironbeam
            .parse_session_token(r#"{"token":"tok-123","expiresIn":3600}"#)
            .unwrap();
        assert_eq!(token, "tok-123");
    }

    #[test]
    fn auth_is_exactly_one_bearer_header() {
        let cfg = VenueConfig::new(VenueKind::Ironbeam, true);
        let signed = Ironbeam
            .sign_request(&cfg, Some("tok-123"), Method::Get, "/positions", "")
            .unwrap();
        let keys: Vec<&str> = signed.headers.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["Authorization"]);
        assert_eq!(signed.headers[0].1, "Bearer tok-123");

        assert!(matches!(
            Ironbeam.sign_request(&cfg, None, Method::Get, "/positions", ""),
            Err(AdapterError::Configuration(_))
        ));
    }

    #[test]
    fn parses_account_with_day_trade_fields() {
        let body = r#"{"accountValue":250000.0,"buyingPower":180000.0,"marginUsed":22000.0,"dayTrades":1,"patternDayTrader":false}"#;
        let acc = Ironbeam.parse_account(body).unwrap();
        assert!((acc.total_value - 250000.0).abs() < 1e-9);
        assert_eq!(acc.day_trade_count, Some(1));
        assert_eq!(acc.pattern_day_trader, Some(false));
    }

    #[test]
    fn parses_positions_from_signed_net_qty() {
        let body = r#"[{"symbol":"ESZ5","netPos":-2,"avgPrice":5980.0,"markPrice":5999.25,"openPnl":-38.5,"closedPnl":120.0},{"symbol":"NQZ5","netPos":0,"avgPrice":0,"markPrice":0}]"#;
        let positions = Ironbeam.parse_positions(body).unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].side, Side::Sell);
        assert!((positions[0].quantity - 2.0).abs() < 1e-9);
        assert!((positions[0].realized_pnl - 120.0).abs() < 1e-9);
    }
}

// ===============================
// src/venues/coinbase.rs
// ===============================
//
// Crypto exchange family: key + timestamp + passphrase auth, signature
// computed over `timestamp + method + path + body`. Market data comes from
// the ticker channel; order events as received/match/done messages.

use chrono::DateTime;
use serde::Deserialize;

use super::{hmac_sha256_hex, parse_f64, timestamp_ms, Method, SignedRequest, VenueAdapter};
use crate::config::{VenueConfig, VenueKind};
use crate::domain::{
    AccountSnapshot, MarketTick, OrderRequest, OrderState, OrderStatus, OrderType, Position, Side,
    TimeInForce,
};
use crate::error::AdapterError;

pub struct Coinbase;

// ---- stream models ----

#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(rename = "type")]
    msg_type: String,
    #[serde(default)]
    product_id: Option<String>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    best_bid: Option<String>,
    #[serde(default)]
    best_ask: Option<String>,
    #[serde(default)]
    volume_24h: Option<String>,
    #[serde(default)]
    open_24h: Option<String>,
    #[serde(default)]
    time: Option<String>,

    // order lifecycle fields
    #[serde(default)]
    order_id: Option<String>,
    #[serde(default)]
    maker_order_id: Option<String>,
    #[serde(default)]
    client_oid: Option<String>,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    order_type: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    filled_size: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

fn iso_millis(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|d| d.timestamp_millis())
}

fn map_side(s: &str) -> Option<Side> {
    match s {
        "buy" => Some(Side::Buy),
        "sell" => Some(Side::Sell),
        _ => None,
    }
}

fn map_order_type(s: &str) -> Option<OrderType> {
    match s {
        "market" => Some(OrderType::Market),
        "limit" => Some(OrderType::Limit),
        "stop" => Some(OrderType::Stop),
        "stop_limit" => Some(OrderType::StopLimit),
        _ => None,
    }
}

fn map_tif(s: &str) -> Option<TimeInForce> {
    match s {
        "GTC" => Some(TimeInForce::Gtc),
        "IOC" => Some(TimeInForce::Ioc),
        "FOK" => Some(TimeInForce::Fok),
        "DAY" => Some(TimeInForce::Day),
        _ => None,
    }
}

// ---- REST models ----

#[derive(Debug, Deserialize)]
struct RestOrder {
    id: String,
    #[serde(default)]
    client_oid: Option<String>,
    product_id: String,
    #[serde(default)]
    side: Option<String>,
    #[serde(rename = "type", default)]
    order_type: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    filled_size: Option<String>,
    #[serde(default)]
    executed_value: Option<String>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    stop_price: Option<String>,
    #[serde(default)]
    time_in_force: Option<String>,
    status: String,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    done_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RestAccount {
    balance: String,
    available: String,
    #[serde(default)]
    hold: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RestPosition {
    product_id: String,
    size: String,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    entry_price: Option<String>,
    #[serde(default)]
    mark_price: Option<String>,
    #[serde(default)]
    unrealized_pl: Option<String>,
    #[serde(default)]
    realized_pl: Option<String>,
}

fn order_from_rest(o: RestOrder) -> Result<OrderStatus, AdapterError> {
    let filled = o.filled_size.as_deref().and_then(parse_f64).unwrap_or(0.0);
    let state = match o.status.as_str() {
        "pending" | "received" => OrderState::New,
        "open" | "active" => {
            if filled > 0.0 {
                OrderState::PartiallyFilled
            } else {
                OrderState::New
            }
        }
        "done" => match o.done_reason.as_deref() {
            Some("filled") => OrderState::Filled,
            Some("rejected") => OrderState::Rejected,
            _ => OrderState::Canceled,
        },
        "rejected" => OrderState::Rejected,
        other => {
            return Err(AdapterError::Parse(format!(
                "unknown order status {other:?}"
            )))
        }
    };
    let executed_value = o.executed_value.as_deref().and_then(parse_f64).unwrap_or(0.0);
    let avg = if filled > 0.0 { executed_value / filled } else { 0.0 };
    let submitted_at = o.created_at.as_deref().and_then(iso_millis);
    Ok(OrderStatus {
        order_id: o.id,
        client_order_id: o.client_oid,
        symbol: o.product_id,
        side: o.side.as_deref().and_then(map_side),
        order_type: o.order_type.as_deref().and_then(map_order_type),
        quantity: o.size.as_deref().and_then(parse_f64).unwrap_or(0.0),
        filled_quantity: filled,
        avg_fill_price: avg,
        limit_price: o.price.as_deref().and_then(parse_f64),
        stop_price: o.stop_price.as_deref().and_then(parse_f64),
        time_in_force: o.time_in_force.as_deref().and_then(map_tif),
        state,
        submitted_at,
        updated_at: o
            .done_at
            .as_deref()
            .and_then(iso_millis)
            .or(submitted_at)
            .unwrap_or(0),
    })
}

impl VenueAdapter for Coinbase {
    fn kind(&self) -> VenueKind {
        VenueKind::Coinbase
    }

    fn subscription_message(&self, symbols: &[String]) -> String {
        serde_json::json!({
            "type": "subscribe",
            "channels": [{ "name": "ticker", "product_ids": symbols }],
        })
        .to_string()
    }

    fn normalize_tick(&self, raw: &str) -> Option<MarketTick> {
        let msg: StreamMessage = serde_json::from_str(raw).ok()?;
        if msg.msg_type != "ticker" {
            return None;
        }
        let last = parse_f64(msg.price.as_deref()?)?;
        let open = msg.open_24h.as_deref().and_then(parse_f64);
        let change = open.map(|o| last - o);
        let change_percent = open
            .filter(|o| *o != 0.0)
            .map(|o| (last - o) / o * 100.0);
        Some(MarketTick {
            symbol: msg.product_id?,
            last,
            bid: parse_f64(msg.best_bid.as_deref()?)?,
            ask: parse_f64(msg.best_ask.as_deref()?)?,
            volume: parse_f64(msg.volume_24h.as_deref()?)?,
            timestamp: iso_millis(msg.time.as_deref()?)?,
            change,
            change_percent,
        })
    }

    fn normalize_order_update(&self, raw: &str) -> Option<OrderStatus> {
        let msg: StreamMessage = serde_json::from_str(raw).ok()?;
        let (state, filled) = match msg.msg_type.as_str() {
            "received" => (OrderState::New, 0.0),
            "match" => (
                OrderState::PartiallyFilled,
                msg.size.as_deref().and_then(parse_f64).unwrap_or(0.0),
            ),
            "done" => (
                match msg.reason.as_deref() {
                    Some("filled") => OrderState::Filled,
                    Some("rejected") => OrderState::Rejected,
                    _ => OrderState::Canceled,
                },
                msg.filled_size.as_deref().and_then(parse_f64).unwrap_or(0.0),
            ),
            _ => return None,
        };
        let order_id = msg.order_id.or(msg.maker_order_id)?;
        Some(OrderStatus {
            order_id,
            client_order_id: msg.client_oid,
            symbol: msg.product_id.unwrap_or_default(),
            side: msg.side.as_deref().and_then(map_side),
            order_type: msg.order_type.as_deref().and_then(map_order_type),
            quantity: msg.size.as_deref().and_then(parse_f64).unwrap_or(0.0),
            filled_quantity: filled,
            avg_fill_price: msg.price.as_deref().and_then(parse_f64).unwrap_or(0.0),
            limit_price: msg.price.as_deref().and_then(parse_f64),
            stop_price: None,
            time_in_force: None,
            state,
            submitted_at: None,
            updated_at: msg.time.as_deref().and_then(iso_millis).unwrap_or(0),
        })
    }

    fn order_payload(
        &self,
        _cfg: &VenueConfig,
        req: &OrderRequest,
        client_order_id: &str,
    ) -> Result<String, AdapterError> {
        let mut body = serde_json::json!({
            "product_id": req.symbol,
            "side": match req.side { Side::Buy => "buy", Side::Sell => "sell" },
            "type": match req.order_type {
                OrderType::Market => "market",
                OrderType::Limit => "limit",
                OrderType::Stop => "stop",
                OrderType::StopLimit => "stop_limit",
            },
            "size": format!("{}", req.quantity),
            "time_in_force": match req.time_in_force {
                TimeInForce::Gtc => "GTC",
                TimeInForce::Ioc => "IOC",
                TimeInForce::Fok => "FOK",
                TimeInForce::Day => "DAY",
            },
            "client_oid": client_order_id,
        });
        if let Some(px) = req.limit_price {
            body["price"] = serde_json::json!(format!("{px}"));
        }
        if let Some(px) = req.stop_price {
            body["stop_price"] = serde_json::json!(format!("{px}"));
        }
        Ok(body.to_string())
    }

    fn sign_request(
        &self,
        cfg: &VenueConfig,
        _session: Option<&str>,
        method: Method,
        path: &str,
        payload: &str,
    ) -> Result<SignedRequest, AdapterError> {
        let passphrase = cfg.passphrase.clone().ok_or_else(|| {
            AdapterError::Configuration("coinbase requires an API passphrase".into())
        })?;
        let body = if method == Method::Post { payload } else { "" };
        let ts = timestamp_ms() / 1000;
        Ok(SignedRequest {
            path: path.to_string(),
            headers: access_headers(&cfg.api_key, &cfg.api_secret, &passphrase, ts, method, path, body),
            body: if body.is_empty() {
                None
            } else {
                Some(body.to_string())
            },
        })
    }

    fn parse_order(&self, body: &str) -> Result<OrderStatus, AdapterError> {
        order_from_rest(serde_json::from_str::<RestOrder>(body)?)
    }

    fn parse_orders(&self, body: &str) -> Result<Vec<OrderStatus>, AdapterError> {
        serde_json::from_str::<Vec<RestOrder>>(body)?
            .into_iter()
            .map(order_from_rest)
            .collect()
    }

    fn parse_positions(&self, body: &str) -> Result<Vec<Position>, AdapterError> {
        let raw: Vec<RestPosition> = serde_json::from_str(body)?;
        Ok(raw
            .into_iter()
            .filter_map(|p| {
                let size = parse_f64(&p.size)?;
                if size == 0.0 {
                    return None;
                }
                let side = match p.side.as_deref() {
                    Some("short") | Some("sell") => Side::Sell,
                    Some(_) => Side::Buy,
                    None => Side::from_signed_qty(size),
                };
                Some(Position {
                    symbol: p.product_id,
                    side,
                    quantity: size.abs(),
                    entry_price: p.entry_price.as_deref().and_then(parse_f64).unwrap_or(0.0),
                    mark_price: p.mark_price.as_deref().and_then(parse_f64).unwrap_or(0.0),
                    unrealized_pnl: p.unrealized_pl.as_deref().and_then(parse_f64).unwrap_or(0.0),
                    realized_pnl: p.realized_pl.as_deref().and_then(parse_f64).unwrap_or(0.0),
                    leverage: None,
                    margin_mode: None,
                })
            })
            .collect())
    }

    fn parse_account(&self, body: &str) -> Result<AccountSnapshot, AdapterError> {
        let acc: RestAccount = serde_json::from_str(body)?;
        Ok(AccountSnapshot {
            total_value: parse_f64(&acc.balance).unwrap_or(0.0),
            available: parse_f64(&acc.available).unwrap_or(0.0),
            margin_used: acc.hold.as_deref().and_then(parse_f64).unwrap_or(0.0),
            day_trade_count: None,
            pattern_day_trader: None,
        })
    }
}

/// The venue's exact header set, in documented order. Signature prehash is
/// `timestamp + method + path + body` with the shared HMAC helper.
fn access_headers(
    key: &str,
    secret: &str,
    passphrase: &str,
    ts_secs: u64,
    method: Method,
    path: &str,
    body: &str,
) -> Vec<(&'static str, String)> {
    let prehash = format!("{}{}{}{}", ts_secs, method.as_str(), path, body);
    vec![
        ("CB-ACCESS-KEY", key.to_string()),
        ("CB-ACCESS-SIGN", hmac_sha256_hex(secret, &prehash)),
        ("CB-ACCESS-TIMESTAMP", ts_secs.to_string()),
        ("CB-ACCESS-PASSPHRASE", passphrase.to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICKER_FRAME: &str = r#"{"type":"ticker","sequence":12345,"product_id":"BTC-USD","price":"50012.34","open_24h":"49500.00","volume_24h":"8821.3344","best_bid":"50011.90","best_ask":"50012.80","time":"2024-01-15T08:30:00.123Z"}"#;

    #[test]
    fn normalizes_ticker_message() {
        let tick = Coinbase.normalize_tick(TICKER_FRAME).unwrap();
        assert_eq!(tick.symbol, "BTC-USD");
        assert!((tick.last - 50012.34).abs() < 1e-9);
        assert!((tick.bid - 50011.90).abs() < 1e-9);
        assert!((tick.ask - 50012.80).abs() < 1e-9);
        assert!((tick.volume - 8821.3344).abs() < 1e-9);
        assert_eq!(tick.timestamp, 1705307400123);
        assert!((tick.change.unwrap() - 512.34).abs() < 1e-6);
        assert!((tick.change_percent.unwrap() - 512.34 / 49500.0 * 100.0).abs() < 1e-6);
    }

    #[test]
    fn subscriptions_ack_and_heartbeat_are_ignored() {
        let ack = r#"{"type":"subscriptions","channels":[{"name":"ticker","product_ids":["BTC-USD"]}]}"#;
        assert!(Coinbase.normalize_tick(ack).is_none());
        assert!(Coinbase.normalize_order_update(ack).is_none());
        let hb = r#"{"type":"heartbeat","sequence":90,"last_trade_id":20,"product_id":"BTC-USD","time":"2024-01-15T08:30:01.000Z"}"#;
        assert!(Coinbase.normalize_tick(hb).is_none());
    }

    #[test]
    fn done_filled_maps_to_filled() {
        let frame = r#"{"type":"done","order_id":"d50ec984-77a8-460a-b958-66f114b0de9b","product_id":"BTC-USD","side":"buy","reason":"filled","filled_size":"1.5","price":"50000.00","time":"2024-01-15T08:31:00.000Z"}"#;
        let up = Coinbase.normalize_order_update(frame).unwrap();
        assert_eq!(up.state, OrderState::Filled);
        assert!((up.filled_quantity - 1.5).abs() < 1e-9);
        assert_eq!(up.order_id, "d50ec984-77a8-460a-b958-66f114b0de9b");
    }

    #[test]
    fn done_canceled_maps_to_canceled() {
        let frame = r#"{"type":"done","order_id":"abc","product_id":"BTC-USD","reason":"canceled","time":"2024-01-15T08:31:00.000Z"}"#;
        let up = Coinbase.normalize_order_update(frame).unwrap();
        assert_eq!(up.state, OrderState::Canceled);
    }

    #[test]
    fn auth_headers_are_exactly_the_documented_four() {
        let headers = access_headers(
            "key",
            "secret",
            "phrase",
            1_700_000_000,
            Method::Post,
            "/orders",
            r#"{"size":"1"}"#,
        );
        let keys: Vec<&str> = headers.iter().map(|(k, _)| *k).collect();
        assert_eq!(
            keys,
            vec![
                "CB-ACCESS-KEY",
                "CB-ACCESS-SIGN",
                "CB-ACCESS-TIMESTAMP",
                "CB-ACCESS-PASSPHRASE"
            ]
        );
        let expected = hmac_sha256_hex("secret", "1700000000POST/orders{\"size\":\"1\"}");
        assert_eq!(headers[1].1, expected);
    }

    #[test]
    fn signing_without_passphrase_is_a_configuration_error() {
        let mut cfg = VenueConfig::new(VenueKind::Coinbase, true);
        cfg.api_key = "k".into();
        cfg.api_secret = "s".into();
        let err = Coinbase
            .sign_request(&cfg, None, Method::Get, "/account", "")
            .unwrap_err();
        assert!(matches!(err, AdapterError::Configuration(_)));
    }

    #[test]
    fn parses_rest_order_with_avg_price() {
        let body = r#"{"id":"o-1","client_oid":"CL-2","product_id":"ETH-USD","side":"sell","type":"limit","size":"2","filled_size":"2","executed_value":"6400.00","price":"3200.00","status":"done","done_reason":"filled","time_in_force":"GTC","created_at":"2024-01-15T08:00:00Z","done_at":"2024-01-15T08:05:00Z"}"#;
        let order = Coinbase.parse_order(body).unwrap();
        assert_eq!(order.state, OrderState::Filled);
        assert!((order.avg_fill_price - 3200.0).abs() < 1e-9);
        assert_eq!(order.client_order_id.as_deref(), Some("CL-2"));
        assert!(order.updated_at > order.submitted_at.unwrap());
    }

    #[test]
    fn parses_account_with_hold_as_margin() {
        let body = r#"{"balance":"120000.50","available":"80000.00","hold":"1500.00"}"#;
        let acc = Coinbase.parse_account(body).unwrap();
        assert!((acc.total_value - 120000.50).abs() < 1e-9);
        assert!((acc.margin_used - 1500.0).abs() < 1e-9);
    }
}

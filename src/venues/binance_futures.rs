// ===============================
// src/venues/binance_futures.rs
// ===============================
//
// Futures gateway family: API key header plus HMAC-SHA256 signature
// appended to the query string. Market data arrives on the 24h ticker
// stream; private order events as ORDER_TRADE_UPDATE envelopes.

use serde::Deserialize;

use super::{
    build_query, hmac_sha256_hex, parse_f64, timestamp_ms, Method, SignedRequest, VenueAdapter,
};
use crate::config::{VenueConfig, VenueKind};
use crate::domain::{
    AccountSnapshot, MarginMode, MarketTick, OrderRequest, OrderState, OrderStatus, OrderType,
    Position, Side, TimeInForce,
};
use crate::error::AdapterError;

const RECV_WINDOW_MS: u64 = 5_000;

pub struct BinanceFutures;

// ---- stream models ----

#[derive(Debug, Deserialize)]
struct TickerEvent {
    #[serde(rename = "e")]
    event: String,
    #[serde(rename = "E")]
    event_time: i64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    last: String,
    #[serde(rename = "b")]
    bid: String,
    #[serde(rename = "a")]
    ask: String,
    #[serde(rename = "v")]
    volume: String,
    #[serde(rename = "p", default)]
    change: Option<String>,
    #[serde(rename = "P", default)]
    change_percent: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WsEnvelope {
    #[serde(rename = "e", default)]
    event: Option<String>,
    #[serde(rename = "E", default)]
    event_time: Option<i64>,
    #[serde(rename = "o", default)]
    order: Option<OrderTradeUpdate>,
}

#[derive(Debug, Deserialize)]
struct OrderTradeUpdate {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "c")]
    client_order_id: String,
    #[serde(rename = "i", default)]
    order_id: Option<i64>,
    #[serde(rename = "S", default)]
    side: Option<String>,
    #[serde(rename = "o", default)]
    order_type: Option<String>,
    #[serde(rename = "X")]
    status: String,
    #[serde(rename = "q", default)]
    orig_qty: Option<String>,
    #[serde(rename = "z", default)]
    cum_filled_qty: Option<String>,
    #[serde(rename = "ap", default)]
    avg_price: Option<String>,
    #[serde(rename = "p", default)]
    price: Option<String>,
    #[serde(rename = "sp", default)]
    stop_price: Option<String>,
    #[serde(rename = "f", default)]
    time_in_force: Option<String>,
}

// ---- REST models ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestOrder {
    order_id: i64,
    #[serde(default)]
    client_order_id: Option<String>,
    symbol: String,
    status: String,
    #[serde(default)]
    side: Option<String>,
    #[serde(rename = "type", default)]
    order_type: Option<String>,
    #[serde(default)]
    orig_qty: Option<String>,
    #[serde(default)]
    executed_qty: Option<String>,
    #[serde(default)]
    avg_price: Option<String>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    stop_price: Option<String>,
    #[serde(default)]
    time_in_force: Option<String>,
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    update_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestAccount {
    total_wallet_balance: String,
    available_balance: String,
    #[serde(default)]
    total_initial_margin: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RestPosition {
    symbol: String,
    position_amt: String,
    entry_price: String,
    mark_price: String,
    un_realized_profit: String,
    #[serde(default)]
    leverage: Option<String>,
    #[serde(default)]
    margin_type: Option<String>,
}

fn map_status(s: &str) -> Option<OrderState> {
    match s {
        "NEW" => Some(OrderState::New),
        "PARTIALLY_FILLED" => Some(OrderState::PartiallyFilled),
        "FILLED" => Some(OrderState::Filled),
        "CANCELED" | "EXPIRED" => Some(OrderState::Canceled),
        "REJECTED" => Some(OrderState::Rejected),
        _ => None,
    }
}

fn map_side(s: &str) -> Option<Side> {
    match s {
        "BUY" => Some(Side::Buy),
        "SELL" => Some(Side::Sell),
        _ => None,
    }
}

fn map_order_type(s: &str) -> Option<OrderType> {
    match s {
        "MARKET" => Some(OrderType::Market),
        "LIMIT" => Some(OrderType::Limit),
        "STOP_MARKET" => Some(OrderType::Stop),
        "STOP" => Some(OrderType::StopLimit),
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

fn tif_str(t: TimeInForce) -> &'static str {
    match t {
        TimeInForce::Gtc => "GTC",
        TimeInForce::Ioc => "IOC",
        TimeInForce::Fok => "FOK",
        TimeInForce::Day => "DAY",
    }
}

fn type_str(t: OrderType) -> &'static str {
    match t {
        OrderType::Market => "MARKET",
        OrderType::Limit => "LIMIT",
        OrderType::Stop => "STOP_MARKET",
        OrderType::StopLimit => "STOP",
    }
}

/// Zeroed string fields ("0", "0.00000") mean "unset" on this venue.
fn nonzero(s: Option<&str>) -> Option<f64> {
    parse_f64(s?).filter(|v| *v != 0.0)
}

fn order_from_rest(o: RestOrder) -> Result<OrderStatus, AdapterError> {
    let state = map_status(&o.status)
        .ok_or_else(|| AdapterError::Parse(format!("unknown order status {:?}", o.status)))?;
    Ok(OrderStatus {
        order_id: o.order_id.to_string(),
        client_order_id: o.client_order_id,
        symbol: o.symbol,
        side: o.side.as_deref().and_then(map_side),
        order_type: o.order_type.as_deref().and_then(map_order_type),
        quantity: o.orig_qty.as_deref().and_then(parse_f64).unwrap_or(0.0),
        filled_quantity: o.executed_qty.as_deref().and_then(parse_f64).unwrap_or(0.0),
        avg_fill_price: o.avg_price.as_deref().and_then(parse_f64).unwrap_or(0.0),
        limit_price: nonzero(o.price.as_deref()),
        stop_price: nonzero(o.stop_price.as_deref()),
        time_in_force: o.time_in_force.as_deref().and_then(map_tif),
        state,
        submitted_at: o.time,
        updated_at: o.update_time.or(o.time).unwrap_or(0),
    })
}

impl VenueAdapter for BinanceFutures {
    fn kind(&self) -> VenueKind {
        VenueKind::BinanceFutures
    }

    fn subscription_message(&self, symbols: &[String]) -> String {
        let params: Vec<String> = symbols
            .iter()
            .map(|s| format!("{}@ticker", s.to_lowercase()))
            .collect();
        serde_json::json!({
            "method": "SUBSCRIBE",
            "params": params,
            "id": 1,
        })
        .to_string()
    }

    fn normalize_tick(&self, raw: &str) -> Option<MarketTick> {
        let ev: TickerEvent = serde_json::from_str(raw).ok()?;
        if ev.event != "24hrTicker" {
            return None;
        }
        Some(MarketTick {
            symbol: ev.symbol,
            last: parse_f64(&ev.last)?,
            bid: parse_f64(&ev.bid)?,
            ask: parse_f64(&ev.ask)?,
            volume: parse_f64(&ev.volume)?,
            timestamp: ev.event_time,
            change: ev.change.as_deref().and_then(parse_f64),
            change_percent: ev.change_percent.as_deref().and_then(parse_f64),
        })
    }

    fn normalize_order_update(&self, raw: &str) -> Option<OrderStatus> {
        let env: WsEnvelope = serde_json::from_str(raw).ok()?;
        if env.event.as_deref() != Some("ORDER_TRADE_UPDATE") {
            return None;
        }
        let o = env.order?;
        let state = map_status(&o.status)?;
        Some(OrderStatus {
            order_id: o
                .order_id
                .map(|i| i.to_string())
                .unwrap_or_else(|| o.client_order_id.clone()),
            client_order_id: Some(o.client_order_id),
            symbol: o.symbol,
            side: o.side.as_deref().and_then(map_side),
            order_type: o.order_type.as_deref().and_then(map_order_type),
            quantity: o.orig_qty.as_deref().and_then(parse_f64).unwrap_or(0.0),
            filled_quantity: o
                .cum_filled_qty
                .as_deref()
                .and_then(parse_f64)
                .unwrap_or(0.0),
            avg_fill_price: o.avg_price.as_deref().and_then(parse_f64).unwrap_or(0.0),
            limit_price: nonzero(o.price.as_deref()),
            stop_price: nonzero(o.stop_price.as_deref()),
            time_in_force: o.time_in_force.as_deref().and_then(map_tif),
            state,
            submitted_at: None,
            updated_at: env.event_time.unwrap_or(0),
        })
    }

    fn order_payload(
        &self,
        cfg: &VenueConfig,
        req: &OrderRequest,
        client_order_id: &str,
    ) -> Result<String, AdapterError> {
        let mut params: Vec<(&str, String)> = vec![
            ("symbol", req.symbol.to_ascii_uppercase()),
            (
                "side",
                match req.side {
                    Side::Buy => "BUY".into(),
                    Side::Sell => "SELL".into(),
                },
            ),
            ("type", type_str(req.order_type).into()),
            ("quantity", format!("{}", req.quantity)),
        ];
        if let Some(px) = req.limit_price {
            params.push(("price", format!("{px}")));
        }
        if let Some(px) = req.stop_price {
            params.push(("stopPrice", format!("{px}")));
        }
        if req.order_type != OrderType::Market {
            params.push(("timeInForce", tif_str(req.time_in_force).into()));
        }
        params.push(("newClientOrderId", client_order_id.to_string()));
        if let Some(lev) = req.leverage.or(cfg.leverage) {
            params.push(("leverage", lev.to_string()));
        }
        if let Some(mode) = req.margin_mode.or(cfg.margin_mode) {
            params.push((
                "marginType",
                match mode {
                    MarginMode::Cross => "CROSSED".into(),
                    MarginMode::Isolated => "ISOLATED".into(),
                },
            ));
        }
        Ok(build_query(&params))
    }

    fn sign_request(
        &self,
        cfg: &VenueConfig,
        _session: Option<&str>,
        _method: Method,
        path: &str,
        payload: &str,
    ) -> Result<SignedRequest, AdapterError> {
        let (base, existing) = match path.split_once('?') {
            Some((b, q)) => (b, q),
            None => (path, ""),
        };
        let query = signed_query(&cfg.api_secret, existing, payload, timestamp_ms());
        Ok(SignedRequest {
            path: format!("{base}?{query}"),
            headers: vec![("X-MBX-APIKEY", cfg.api_key.clone())],
            body: None,
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
                let amt = parse_f64(&p.position_amt)?;
                if amt == 0.0 {
                    return None;
                }
                Some(Position {
                    symbol: p.symbol,
                    side: Side::from_signed_qty(amt),
                    quantity: amt.abs(),
                    entry_price: parse_f64(&p.entry_price).unwrap_or(0.0),
                    mark_price: parse_f64(&p.mark_price).unwrap_or(0.0),
                    unrealized_pnl: parse_f64(&p.un_realized_profit).unwrap_or(0.0),
                    realized_pnl: 0.0,
                    leverage: p.leverage.as_deref().and_then(|s| s.parse().ok()),
                    margin_mode: match p.margin_type.as_deref() {
                        Some("cross") | Some("CROSSED") => Some(MarginMode::Cross),
                        Some("isolated") | Some("ISOLATED") => Some(MarginMode::Isolated),
                        _ => None,
                    },
                })
            })
            .collect())
    }

    fn parse_account(&self, body: &str) -> Result<AccountSnapshot, AdapterError> {
        let acc: RestAccount = serde_json::from_str(body)?;
        Ok(AccountSnapshot {
            total_value: parse_f64(&acc.total_wallet_balance).unwrap_or(0.0),
            available: parse_f64(&acc.available_balance).unwrap_or(0.0),
            margin_used: acc
                .total_initial_margin
                .as_deref()
                .and_then(parse_f64)
                .unwrap_or(0.0),
            day_trade_count: None,
            pattern_day_trader: None,
        })
    }
}

/// Assembles the signed query: existing query + payload params + timestamp +
/// recvWindow, with the HMAC signature appended last.
fn signed_query(secret: &str, existing: &str, payload: &str, ts: u64) -> String {
    let mut query = String::new();
    for part in [existing, payload] {
        if !part.is_empty() {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(part);
        }
    }
    if !query.is_empty() {
        query.push('&');
    }
    query.push_str(&format!("timestamp={ts}&recvWindow={RECV_WINDOW_MS}"));
    let sig = hmac_sha256_hex(secret, &query);
    format!("{query}&signature={sig}")
}

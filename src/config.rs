// ===============================
// src/config.rs
// ===============================
//
// Venue profiles and session configuration.
//
// `VenueKind` doubles as the venue profile registry: REST and stream
// endpoints are static tables keyed by (venue, sandbox) — no runtime
// negotiation. `VenueConfig` is immutable once handed to a session;
// swapping it means re-configuring the adapter.

use std::env;
use std::time::Duration;

use dotenvy::dotenv;

use crate::domain::MarginMode;
use crate::error::AdapterError;

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Supported venue families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VenueKind {
    /// Futures broker with username/password session auth.
    Ironbeam,
    /// Crypto exchange with key + timestamp + passphrase auth.
    Coinbase,
    /// Futures gateway with key header + signed query auth.
    BinanceFutures,
}

impl VenueKind {
    pub fn parse_one(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ironbeam" => Some(VenueKind::Ironbeam),
            "coinbase" => Some(VenueKind::Coinbase),
            "binance_futures" | "binancefutures" | "binance" => Some(VenueKind::BinanceFutures),
            _ => None,
        }
    }

    pub fn from_env(key: &str, default_kind: VenueKind) -> VenueKind {
        env::var(key)
            .ok()
            .and_then(|s| Self::parse_one(&s))
            .unwrap_or(default_kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VenueKind::Ironbeam => "ironbeam",
            VenueKind::Coinbase => "coinbase",
            VenueKind::BinanceFutures => "binance_futures",
        }
    }

    // Endpoint defaults per venue and environment
    pub fn default_rest_url(&self, sandbox: bool) -> &'static str {
        match (self, sandbox) {
            (VenueKind::Ironbeam, true) => "https://demo.ironbeamapi.com/v2",
            (VenueKind::Ironbeam, false) => "https://live.ironbeamapi.com/v2",
            (VenueKind::Coinbase, true) => "https://api-public.sandbox.exchange.coinbase.com",
            (VenueKind::Coinbase, false) => "https://api.exchange.coinbase.com",
            (VenueKind::BinanceFutures, true) => "https://testnet.binancefuture.com",
            (VenueKind::BinanceFutures, false) => "https://fapi.binance.com",
        }
    }

    pub fn default_stream_url(&self, sandbox: bool) -> &'static str {
        match (self, sandbox) {
            (VenueKind::Ironbeam, true) => "wss://demo.ironbeamapi.com/v2/stream",
            (VenueKind::Ironbeam, false) => "wss://live.ironbeamapi.com/v2/stream",
            (VenueKind::Coinbase, true) => "wss://ws-feed-public.sandbox.exchange.coinbase.com",
            (VenueKind::Coinbase, false) => "wss://ws-feed.exchange.coinbase.com",
            (VenueKind::BinanceFutures, true) => "wss://stream.binancefuture.com/ws",
            (VenueKind::BinanceFutures, false) => "wss://fstream.binance.com/ws",
        }
    }
}

/// Credentials and endpoints for one venue session. Built once, never
/// mutated; the facade discards it on disconnect.
#[derive(Debug, Clone)]
pub struct VenueConfig {
    pub venue: VenueKind,
    pub sandbox: bool,

    // credentials (subset used per venue family)
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,

    // endpoints
    pub rest_url: String,
    /// Overrides the profile-derived stream endpoint when set.
    pub stream_url: Option<String>,

    // derivatives defaults
    pub leverage: Option<u32>,
    pub margin_mode: Option<MarginMode>,

    pub request_timeout: Duration,
}

impl VenueConfig {
    pub fn new(venue: VenueKind, sandbox: bool) -> Self {
        Self {
            venue,
            sandbox,
            api_key: String::new(),
            api_secret: String::new(),
            passphrase: None,
            username: None,
            password: None,
            rest_url: venue.default_rest_url(sandbox).to_string(),
            stream_url: None,
            leverage: None,
            margin_mode: None,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }

    pub fn stream_url(&self) -> String {
        self.stream_url
            .clone()
            .unwrap_or_else(|| self.venue.default_stream_url(self.sandbox).to_string())
    }
}

/// Demo-binary arguments, separate from the per-venue credentials.
#[derive(Debug, Clone)]
pub struct Args {
    pub venue: VenueKind,
    pub symbols: Vec<String>,
    pub sandbox: bool,
    pub record_file: Option<String>,
    pub metrics_port: u16,
}

/// Load demo args + venue config from the environment (`.env` honored).
pub fn load() -> Result<(Args, VenueConfig), AdapterError> {
    let _ = dotenv();

    let venue = VenueKind::from_env("VENUE", VenueKind::BinanceFutures);
    let sandbox = env::var("SANDBOX")
        .map(|s| !matches!(s.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
        .unwrap_or(true);

    // SYMBOLS=BTCUSDT,ETHUSDT
    let symbols: Vec<String> = env::var("SYMBOLS")
        .unwrap_or_else(|_| "BTCUSDT".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        return Err(AdapterError::Configuration("SYMBOLS is empty".into()));
    }

    let record_file = env::var("RECORD_FILE").ok();
    let metrics_port = env::var("METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9898);

    let mut cfg = VenueConfig::new(venue, sandbox);
    if let Ok(url) = env::var("REST_URL") {
        cfg.rest_url = url;
    }
    if let Ok(url) = env::var("STREAM_URL") {
        cfg.stream_url = Some(url);
    }
    cfg.api_key = env::var("API_KEY").unwrap_or_default();
    cfg.api_secret = env::var("API_SECRET").unwrap_or_default();
    cfg.passphrase = env::var("API_PASSPHRASE").ok();
    cfg.username = env::var("VENUE_USERNAME").ok();
    cfg.password = env::var("VENUE_PASSWORD").ok();
    cfg.leverage = env::var("LEVERAGE").ok().and_then(|s| s.parse().ok());
    cfg.margin_mode = env::var("MARGIN_MODE")
        .ok()
        .and_then(|s| match s.to_ascii_lowercase().as_str() {
            "cross" => Some(MarginMode::Cross),
            "isolated" => Some(MarginMode::Isolated),
            _ => None,
        });
    if let Some(ms) = env::var("REQUEST_TIMEOUT_MS").ok().and_then(|s| s.parse().ok()) {
        cfg.request_timeout = Duration::from_millis(ms);
    }

    let args = Args {
        venue,
        symbols,
        sandbox,
        record_file,
        metrics_port,
    };
    Ok((args, cfg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn venue_kind_parses_aliases() {
        assert_eq!(VenueKind::parse_one("ironbeam"), Some(VenueKind::Ironbeam));
        assert_eq!(VenueKind::parse_one("Coinbase"), Some(VenueKind::Coinbase));
        assert_eq!(
            VenueKind::parse_one("binance"),
            Some(VenueKind::BinanceFutures)
        );
        assert_eq!(VenueKind::parse_one("nyse"), None);
    }

    #[test]
    fn profile_registry_distinguishes_sandbox_and_live() {
        for kind in [
            VenueKind::Ironbeam,
            VenueKind::Coinbase,
            VenueKind::BinanceFutures,
        ] {
            assert_ne!(kind.default_rest_url(true), kind.default_rest_url(false));
            assert_ne!(
                kind.default_stream_url(true),
                kind.default_stream_url(false)
            );
            assert!(kind.default_stream_url(true).starts_with("wss://"));
        }
    }

    #[test]
    fn stream_url_override_wins() {
        let mut cfg = VenueConfig::new(VenueKind::Coinbase, true);
        assert_eq!(
            cfg.stream_url(),
            VenueKind::Coinbase.default_stream_url(true)
        );
        cfg.stream_url = Some("ws://127.0.0.1:9999".into());
        assert_eq!(cfg.stream_url(), "ws://127.0.0.1:9999");
    }
}

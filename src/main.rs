// ===============================
// src/main.rs
// ===============================
/*
=============================================================================
Project : venue_bridge — multi-venue market-data & order-routing adapters
Version : 0.4.0
License : MIT (see LICENSE)

Summary : Connects one venue session (futures broker / crypto exchange /
          futures gateway), streams normalized market ticks and order
          updates to registered callbacks, exposes Prometheus metrics,
          and optionally records events as JSONL.
=============================================================================
*/

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::{select, sync::mpsc, time::Duration};
use tracing::{error, info, warn};

use venue_bridge::domain::Event;
use venue_bridge::{config, metrics, recorder, VenueSession};

#[tokio::main]
async fn main() {
    // ---- Logging ----
    tracing_subscriber::fmt().with_env_filter("info").init();

    // ---- Load config ----
    let (args, venue_cfg) = match config::load() {
        Ok(loaded) => loaded,
        Err(e) => {
            error!(?e, "config load failed");
            return;
        }
    };
    if venue_cfg.api_key.is_empty() && venue_cfg.username.is_none() {
        warn!("no credentials configured; market data only, order calls will fail");
    }

    // ---- Metrics ----
    metrics::init();
    tokio::spawn(metrics::serve_metrics(args.metrics_port));

    info!(
        venue = args.venue.as_str(),
        sandbox = args.sandbox,
        symbols = ?args.symbols,
        rest = %venue_cfg.rest_url,
        stream = %venue_cfg.stream_url(),
        "startup config"
    );

    // ---- Recorder (optional) ----
    let rec_tx = args.record_file.clone().map(|path| {
        let (tx, rx) = mpsc::channel::<Event>(8192);
        tokio::spawn(recorder::run(rx, path));
        tx
    });

    // ---- Session ----
    let mut session = VenueSession::new(args.venue);
    if let Err(e) = session.configure(venue_cfg) {
        error!(?e, "configure failed");
        return;
    }

    let tick_count = Arc::new(AtomicU64::new(0));

    let counter = Arc::clone(&tick_count);
    let rec = rec_tx.clone();
    let _md_sub = session.on_market_data(move |tick| {
        counter.fetch_add(1, Ordering::Relaxed);
        if let Some(tx) = &rec {
            let _ = tx.try_send(Event::Tick(tick.clone()));
        }
    });

    let rec = rec_tx.clone();
    let _ord_sub = session.on_order_update(move |update| {
        info!(
            order_id = %update.order_id,
            state = update.state.as_str(),
            filled = update.filled_quantity,
            avg_px = update.avg_fill_price,
            "order update"
        );
        if let Some(tx) = &rec {
            let _ = tx.try_send(Event::Order(update.clone()));
        }
    });

    if let Err(e) = session.connect_market_data(&args.symbols) {
        error!(?e, "connect failed");
        return;
    }

    // ---- Heartbeat ----
    loop {
        select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                let ticks = tick_count.swap(0, Ordering::Relaxed);
                info!(ticks, connected = session.is_connected(), "heartbeat");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                session.disconnect();
                break;
            }
        }
    }
}

// Integration: a session against a local WebSocket server standing in for
// the venue stream — subscription handshake, normalized fan-out, teardown.

use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::Message;

use venue_bridge::{MarketTick, VenueConfig, VenueKind, VenueSession};

fn ticker_frame(price: f64) -> String {
    format!(
        r#"{{"e":"24hrTicker","E":1700000000123,"s":"BTCUSDT","c":"{price}","b":"{}","a":"{}","v":"11203.4"}}"#,
        price - 0.1,
        price + 0.1
    )
}

/// Accepts one stream client, records its subscription message, pushes the
/// given frames, then keeps the socket open until the client goes away.
async fn spawn_market_server(
    frames: Vec<String>,
    got_sub: Arc<Mutex<Option<String>>>,
) -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            if let Some(Ok(msg)) = ws.next().await {
                *got_sub.lock().unwrap() = Some(msg.into_text().unwrap_or_default());
            }
            for frame in frames {
                if ws.send(Message::Text(frame)).await.is_err() {
                    break;
                }
            }
            while let Some(Ok(_)) = ws.next().await {}
        }
    });
    port
}

#[tokio::test]
async fn market_data_flows_end_to_end() {
    let got_sub = Arc::new(Mutex::new(None));
    let port = spawn_market_server(
        vec![
            ticker_frame(50000.0),
            r#"{"result":null,"id":1}"#.to_string(), // ack mid-stream, must be dropped
            ticker_frame(50001.0),
        ],
        Arc::clone(&got_sub),
    )
    .await;

    let mut session = VenueSession::new(VenueKind::BinanceFutures);
    let mut cfg = VenueConfig::new(VenueKind::BinanceFutures, true);
    cfg.stream_url = Some(format!("ws://127.0.0.1:{port}"));
    session.configure(cfg).unwrap();

    let ticks: Arc<Mutex<Vec<MarketTick>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&ticks);
    let _sub = session.on_market_data(move |tick| sink.lock().unwrap().push(tick.clone()));

    session.connect_market_data(&["BTCUSDT".into()]).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while ticks.lock().unwrap().len() < 2 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for normalized ticks"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(session.is_connected());
    let sub = got_sub.lock().unwrap().clone().expect("no subscription seen");
    assert!(sub.contains("SUBSCRIBE"));
    assert!(sub.contains("btcusdt@ticker"));

    {
        let collected = ticks.lock().unwrap();
        assert_eq!(collected.len(), 2); // the ack frame reached nobody
        assert_eq!(collected[0].symbol, "BTCUSDT");
        assert!((collected[0].last - 50000.0).abs() < 1e-9);
        assert!((collected[1].last - 50001.0).abs() < 1e-9);
    }

    // Teardown: socket closed, callbacks gone, nothing fires afterwards.
    session.disconnect();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!session.is_connected());
    let seen = ticks.lock().unwrap().len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ticks.lock().unwrap().len(), seen);
}

#[tokio::test]
async fn canceled_subscription_stops_receiving() {
    let got_sub = Arc::new(Mutex::new(None));
    let port =
        spawn_market_server(vec![ticker_frame(100.0)], Arc::clone(&got_sub)).await;

    let mut session = VenueSession::new(VenueKind::BinanceFutures);
    let mut cfg = VenueConfig::new(VenueKind::BinanceFutures, true);
    cfg.stream_url = Some(format!("ws://127.0.0.1:{port}"));
    session.configure(cfg).unwrap();

    let kept: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));
    let canceled: Arc<Mutex<u32>> = Arc::new(Mutex::new(0));

    let k = Arc::clone(&kept);
    let _keep = session.on_market_data(move |_| *k.lock().unwrap() += 1);
    let c = Arc::clone(&canceled);
    let drop_me = session.on_market_data(move |_| *c.lock().unwrap() += 1);
    drop_me.cancel();

    session.connect_market_data(&["BTCUSDT".into()]).unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while *kept.lock().unwrap() == 0 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for tick"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(*canceled.lock().unwrap(), 0);
    session.disconnect();
}

// ===============================
// src/rest.rs
// ===============================
//
// Authenticated request/response cycle for order and account operations.
// Paths are fixed per-operation suffixes on the configured base URL; the
// venue adapter contributes payload shape, signing and response parsing.
// Non-2xx responses surface as RequestError with the raw body — there is
// no automatic retry, order-mutating calls especially.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info};

use crate::config::VenueConfig;
use crate::domain::{AccountSnapshot, OrderRequest, OrderState, OrderStatus, Position};
use crate::error::AdapterError;
use crate::metrics;
use crate::venues::{Method, VenueAdapter};

const ORDERS_PATH: &str = "/orders";
const ACCOUNT_PATH: &str = "/account";
const POSITIONS_PATH: &str = "/positions";

fn orders_path(filter: Option<OrderState>) -> String {
    match filter {
        Some(state) => format!("{ORDERS_PATH}?status={}", state.as_str()),
        None => ORDERS_PATH.to_string(),
    }
}

pub struct RestGateway {
    adapter: Arc<dyn VenueAdapter>,
    config: Arc<VenueConfig>,
    http: reqwest::Client,
    /// Cached bearer token for session-auth venues; filled on first use.
    session: tokio::sync::Mutex<Option<String>>,
}

impl RestGateway {
    pub fn new(
        adapter: Arc<dyn VenueAdapter>,
        config: Arc<VenueConfig>,
    ) -> Result<Self, AdapterError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            adapter,
            config,
            http,
            session: tokio::sync::Mutex::new(None),
        })
    }

    /// Logs in once for session-auth venues and caches the token. Other
    /// venues pass through with `None`.
    async fn session_token(&self) -> Result<Option<String>, AdapterError> {
        if !self.adapter.requires_session() {
            return Ok(None);
        }
        let mut guard = self.session.lock().await;
        if let Some(token) = guard.as_ref() {
            return Ok(Some(token.clone()));
        }
        let (path, body) = self.adapter.login_request(&self.config)?;
        let url = format!("{}{}", self.config.rest_url.trim_end_matches('/'), path);
        info!(venue = self.adapter.kind().as_str(), "opening venue session");
        let resp = self
            .http
            .post(url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(AdapterError::request(status.as_u16(), text));
        }
        let token = self.adapter.parse_session_token(&text)?;
        *guard = Some(token.clone());
        Ok(Some(token))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        payload: &str,
        op: &'static str,
    ) -> Result<String, AdapterError> {
        let venue = self.adapter.kind().as_str();
        let session = self.session_token().await?;
        let signed =
            self.adapter
                .sign_request(&self.config, session.as_deref(), method, path, payload)?;
        let url = format!(
            "{}{}",
            self.config.rest_url.trim_end_matches('/'),
            signed.path
        );

        let mut req = match method {
            Method::Get => self.http.get(url),
            Method::Post => self.http.post(url),
            Method::Delete => self.http.delete(url),
        };
        for (k, v) in &signed.headers {
            req = req.header(*k, v.as_str());
        }
        if let Some(body) = signed.body {
            req = req.header("Content-Type", "application/json").body(body);
        }

        let started = Instant::now();
        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        metrics::REST_LATENCY
            .with_label_values(&[venue, op])
            .observe(started.elapsed().as_secs_f64() * 1000.0);

        if !status.is_success() {
            metrics::REST_ERRORS.with_label_values(&[venue, op]).inc();
            error!(venue, op, status = status.as_u16(), "venue request failed");
            return Err(AdapterError::request(status.as_u16(), text));
        }
        debug!(venue, op, status = status.as_u16(), "venue request ok");
        Ok(text)
    }

    pub async fn place_order(
        &self,
        req: &OrderRequest,
        client_order_id: &str,
    ) -> Result<OrderStatus, AdapterError> {
        let payload = self
            .adapter
            .order_payload(&self.config, req, client_order_id)?;
        let body = self
            .send(Method::Post, ORDERS_PATH, &payload, "place_order")
            .await?;
        metrics::ORDERS_SUBMITTED
            .with_label_values(&[self.adapter.kind().as_str()])
            .inc();
        self.adapter.parse_order(&body)
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<OrderStatus, AdapterError> {
        let path = format!("{ORDERS_PATH}/{order_id}");
        let body = self.send(Method::Delete, &path, "", "cancel_order").await?;
        self.adapter.parse_order(&body)
    }

    pub async fn get_account(&self) -> Result<AccountSnapshot, AdapterError> {
        let body = self.send(Method::Get, ACCOUNT_PATH, "", "get_account").await?;
        self.adapter.parse_account(&body)
    }

    pub async fn get_positions(&self) -> Result<Vec<Position>, AdapterError> {
        let body = self
            .send(Method::Get, POSITIONS_PATH, "", "get_positions")
            .await?;
        self.adapter.parse_positions(&body)
    }

    pub async fn get_orders(
        &self,
        filter: Option<OrderState>,
    ) -> Result<Vec<OrderStatus>, AdapterError> {
        let body = self
            .send(Method::Get, &orders_path(filter), "", "get_orders")
            .await?;
        self.adapter.parse_orders(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VenueKind;
    use crate::venues::{adapter_for, BinanceFutures};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn orders_path_carries_status_filter() {
        assert_eq!(orders_path(None), "/orders");
        assert_eq!(orders_path(Some(OrderState::New)), "/orders?status=new");
        assert_eq!(
            orders_path(Some(OrderState::Filled)),
            "/orders?status=filled"
        );
    }

    /// One-shot HTTP responder: accepts a single connection, drains the
    /// request, answers with the given status and body.
    async fn one_shot_server(status_line: &'static str, body: &'static str) -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf).await;
                let resp = format!(
                    "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.flush().await;
            }
        });
        port
    }

    fn test_config(port: u16) -> Arc<VenueConfig> {
        let mut cfg = VenueConfig::new(VenueKind::BinanceFutures, true);
        cfg.rest_url = format!("http://127.0.0.1:{port}");
        cfg.api_key = "k".into();
        cfg.api_secret = "s".into();
        Arc::new(cfg)
    }

    #[tokio::test]
    async fn get_account_round_trip() {
        let port = one_shot_server(
            "200 OK",
            r#"{"totalWalletBalance":"100.0","availableBalance":"60.0","totalInitialMargin":"10.0"}"#,
        )
        .await;
        let gw = RestGateway::new(Arc::new(BinanceFutures), test_config(port)).unwrap();
        let acc = gw.get_account().await.unwrap();
        assert!((acc.total_value - 100.0).abs() < 1e-9);
        assert!((acc.available - 60.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn non_2xx_surfaces_status_and_body() {
        let port = one_shot_server("503 Service Unavailable", r#"{"msg":"maintenance"}"#).await;
        let gw = RestGateway::new(Arc::new(BinanceFutures), test_config(port)).unwrap();
        let err = gw.get_positions().await.unwrap_err();
        match err {
            AdapterError::Request { status, body } => {
                assert_eq!(status, 503);
                assert!(body.contains("maintenance"));
            }
            other => panic!("expected Request error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn session_venue_logs_in_before_first_call() {
        // Two sequential connections: login, then the signed GET.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let responses = [
                r#"{"token":"tok-9"}"#,
                r#"{"accountValue":1.0,"buyingPower":1.0,"marginUsed":0.0}"#,
            ];
            for body in responses {
                if let Ok((mut stream, _)) = listener.accept().await {
                    let mut buf = [0u8; 4096];
                    let n = stream.read(&mut buf).await.unwrap_or(0);
                    let req = String::from_utf8_lossy(&buf[..n]).to_string();
                    // second request must carry the bearer token
                    if req.starts_with("GET") {
                        assert!(req.contains("Bearer tok-9"));
                    }
                    let resp = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(resp.as_bytes()).await;
                }
            }
        });

        let mut cfg = VenueConfig::new(VenueKind::Ironbeam, true);
        cfg.rest_url = format!("http://127.0.0.1:{port}");
        cfg.username = Some("trader".into());
        cfg.password = Some("pw".into());
        let gw = RestGateway::new(adapter_for(VenueKind::Ironbeam), Arc::new(cfg)).unwrap();
        let acc = gw.get_account().await.unwrap();
        assert!((acc.total_value - 1.0).abs() < 1e-9);
    }
}

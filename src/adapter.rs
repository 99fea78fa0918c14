// ===============================
// src/adapter.rs
// ===============================
//
// VenueSession: the one object an embedding layer holds per venue. It
// composes the connection manager, REST gateway and venue adapter behind a
// uniform surface. Sessions are plain values owned by the caller — no
// process-wide instances — and several sessions for different venues
// coexist without shared state.

use std::sync::Arc;

use rand::Rng;
use tracing::info;

use crate::config::{VenueConfig, VenueKind};
use crate::domain::{
    AccountSnapshot, MarketTick, OrderRequest, OrderState, OrderStatus, Position,
};
use crate::error::AdapterError;
use crate::rest::RestGateway;
use crate::stream::{ConnectionManager, SubscriptionHandle};
use crate::venues::{adapter_for, VenueAdapter};

/// Client order id in the `CL-{millis}-{rand}` convention; forwarded to the
/// venue so fills can be matched back to the submitting session.
fn next_client_order_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    format!("CL-{}-{}", millis, rand::thread_rng().gen::<u32>())
}

pub struct VenueSession {
    adapter: Arc<dyn VenueAdapter>,
    stream: ConnectionManager,
    config: Option<Arc<VenueConfig>>,
    gateway: Option<RestGateway>,
}

impl VenueSession {
    pub fn new(kind: VenueKind) -> Self {
        let adapter = adapter_for(kind);
        let stream = ConnectionManager::new(Arc::clone(&adapter));
        Self {
            adapter,
            stream,
            config: None,
            gateway: None,
        }
    }

    pub fn venue(&self) -> VenueKind {
        self.adapter.kind()
    }

    /// Stores the config and rebuilds the REST gateway. Never connects; a
    /// live socket from a previous config is shut down first so sessions
    /// never overlap.
    pub fn configure(&mut self, config: VenueConfig) -> Result<(), AdapterError> {
        if config.venue != self.adapter.kind() {
            return Err(AdapterError::Configuration(format!(
                "config is for {}, session is {}",
                config.venue.as_str(),
                self.adapter.kind().as_str()
            )));
        }
        self.stream.close_socket();
        let config = Arc::new(config);
        self.gateway = Some(RestGateway::new(
            Arc::clone(&self.adapter),
            Arc::clone(&config),
        )?);
        info!(venue = config.venue.as_str(), sandbox = config.sandbox, "session configured");
        self.config = Some(config);
        Ok(())
    }

    pub fn connect_market_data(&self, symbols: &[String]) -> Result<(), AdapterError> {
        let cfg = self
            .config
            .as_ref()
            .ok_or_else(|| AdapterError::not_configured("connect_market_data"))?;
        self.stream.connect(cfg, symbols)
    }

    pub fn on_market_data(
        &self,
        cb: impl Fn(&MarketTick) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.stream.on_market_data(cb)
    }

    pub fn on_order_update(
        &self,
        cb: impl Fn(&OrderStatus) + Send + Sync + 'static,
    ) -> SubscriptionHandle {
        self.stream.on_order_update(cb)
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_connected()
    }

    fn gateway(&self, op: &str) -> Result<&RestGateway, AdapterError> {
        self.gateway
            .as_ref()
            .ok_or_else(|| AdapterError::not_configured(op))
    }

    pub async fn place_order(&self, req: &OrderRequest) -> Result<OrderStatus, AdapterError> {
        let gateway = self.gateway("place_order")?;
        req.validate()?;
        let client_order_id = next_client_order_id();
        info!(
            venue = self.adapter.kind().as_str(),
            symbol = %req.symbol,
            side = ?req.side,
            qty = req.quantity,
            client_order_id = %client_order_id,
            "submitting order"
        );
        gateway.place_order(req, &client_order_id).await
    }

    pub async fn cancel_order(&self, order_id: &str) -> Result<OrderStatus, AdapterError> {
        self.gateway("cancel_order")?.cancel_order(order_id).await
    }

    pub async fn get_account(&self) -> Result<AccountSnapshot, AdapterError> {
        self.gateway("get_account")?.get_account().await
    }

    pub async fn get_positions(&self) -> Result<Vec<Position>, AdapterError> {
        self.gateway("get_positions")?.get_positions().await
    }

    pub async fn get_orders(
        &self,
        filter: Option<OrderState>,
    ) -> Result<Vec<OrderStatus>, AdapterError> {
        self.gateway("get_orders")?.get_orders(filter).await
    }

    /// Tears everything down: socket closed, callbacks cleared, config and
    /// gateway discarded. The session must be configured again before use.
    pub fn disconnect(&mut self) {
        self.stream.disconnect();
        self.config = None;
        self.gateway = None;
        info!(venue = self.adapter.kind().as_str(), "session disconnected");
    }
}

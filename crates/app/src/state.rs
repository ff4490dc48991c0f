use std::sync::Arc;

use chrono::{DateTime, Utc};
use kora_core::pricing::ShippingPolicy;
use kora_platform::{AuthClient, ObjectStorageClient};
use kora_storage::Database;
use metrics_exporter_prometheus::PrometheusHandle;

use crate::auth::TokenVerifier;
use crate::checkout::OrderDesk;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Shared handles passed to every handler.
#[derive(Clone)]
pub struct AppState {
    metrics: PrometheusHandle,
    storage: Database,
    auth: AuthClient,
    objects: ObjectStorageClient,
    tokens: TokenVerifier,
    shipping: ShippingPolicy,
    clock: Clock,
    orders: OrderDesk,
}

impl AppState {
    pub fn new(
        metrics: PrometheusHandle,
        storage: Database,
        auth: AuthClient,
        objects: ObjectStorageClient,
        tokens: TokenVerifier,
        shipping: ShippingPolicy,
    ) -> Self {
        let clock: Clock = Arc::new(Utc::now);
        let orders = OrderDesk::new(storage.clone(), shipping, clock.clone());
        Self {
            metrics,
            storage,
            auth,
            objects,
            tokens,
            shipping,
            clock,
            orders,
        }
    }

    #[cfg(test)]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.orders = OrderDesk::new(self.storage.clone(), self.shipping, clock.clone());
        self.clock = clock;
        self
    }

    pub fn metrics(&self) -> &PrometheusHandle {
        &self.metrics
    }

    pub fn storage(&self) -> &Database {
        &self.storage
    }

    pub fn auth(&self) -> &AuthClient {
        &self.auth
    }

    pub fn objects(&self) -> &ObjectStorageClient {
        &self.objects
    }

    pub fn tokens(&self) -> &TokenVerifier {
        &self.tokens
    }

    pub fn shipping(&self) -> &ShippingPolicy {
        &self.shipping
    }

    pub fn orders(&self) -> &OrderDesk {
        &self.orders
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }
}

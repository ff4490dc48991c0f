mod auth;
mod cart;
mod catalog;
mod checkout;
mod dashboard;
mod orders;
mod partnerships;
mod problem;
mod router;
mod state;
mod storefront;
mod telemetry;

use std::{net::SocketAddr, time::Duration};

use kora_core::pricing::ShippingPolicy;
use kora_platform::{AuthClient, ObjectStorageClient};
use kora_storage::Database;
use kora_util::{load_env_file, AppConfig};
use tracing::info;

use crate::auth::TokenVerifier;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_env_file();
    let config = AppConfig::from_env()?;

    telemetry::init_tracing(&config)?;
    let metrics = telemetry::init_metrics()?;

    let storage = Database::connect(&config.database_url).await?;
    storage.run_migrations().await?;
    info!(stage = "storage", database_url = %config.database_url, "database ready");

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()?;
    let platform = &config.platform;
    let auth = AuthClient::new(
        platform.anon_key.clone(),
        platform.base_url.clone(),
        http.clone(),
    );
    let objects = ObjectStorageClient::new(
        platform.service_key.clone(),
        platform.storage_bucket.clone(),
        platform.base_url.clone(),
        http,
    );
    let tokens = TokenVerifier::new(platform.jwt_secret.as_bytes());
    let shipping = ShippingPolicy::new(
        config.checkout.shipping_flat_fee,
        config.checkout.free_shipping_threshold,
    );

    let state = AppState::new(metrics, storage, auth, objects, tokens, shipping);

    let addr: SocketAddr = config.bind_addr;
    info!(stage = "app", %addr, env = %config.environment.as_str(), "starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router::app_router(state))
        .await
        .map_err(|err| err.into())
}

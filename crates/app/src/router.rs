use axum::{
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Router,
};
use kora_core::validation::MAX_IMAGE_BYTES;

use crate::state::AppState;
use crate::{auth, cart, catalog, dashboard, orders, partnerships, storefront, telemetry};

pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics))
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/me", get(auth::me).patch(auth::update_me))
        .route("/products", get(catalog::list_products).post(catalog::create_product))
        .route(
            "/products/:id",
            get(catalog::get_product)
                .patch(catalog::update_product)
                .delete(catalog::delete_product),
        )
        .route(
            "/products/:id/image",
            post(catalog::upload_image).layer(DefaultBodyLimit::max(MAX_IMAGE_BYTES + 1024)),
        )
        .route("/categories", get(catalog::list_categories))
        .route("/storefront", get(storefront::my_storefront))
        .route("/storefront/listings", post(storefront::create_listing))
        .route(
            "/storefront/listings/:id",
            patch(storefront::update_listing).delete(storefront::delete_listing),
        )
        .route("/storefronts/:id", get(storefront::public_storefront))
        .route("/cart", get(cart::get_cart).delete(cart::clear_cart))
        .route("/cart/items", post(cart::add_item))
        .route(
            "/cart/items/:id",
            patch(cart::update_item).delete(cart::remove_item),
        )
        .route("/checkout", post(orders::checkout))
        .route("/orders", get(orders::list_my_orders))
        .route("/orders/:id", get(orders::get_order))
        .route("/orders/:id/cancel", post(orders::cancel_order))
        .route(
            "/orders/:id/status",
            post(orders::update_status).patch(orders::update_status),
        )
        .route("/seller/orders", get(orders::seller_orders))
        .route("/partnerships", get(partnerships::list).post(partnerships::request))
        .route("/partnerships/:id/respond", post(partnerships::respond))
        .route("/partnerships/:id/commission", patch(partnerships::update_commission))
        .route("/dashboard", get(dashboard::dashboard))
        .route("/admin/users", get(dashboard::list_users))
        .route("/admin/users/:id/status", patch(dashboard::set_user_status))
        .route("/admin/orders", get(orders::admin_orders))
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = telemetry::render_metrics(state.metrics());
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
}

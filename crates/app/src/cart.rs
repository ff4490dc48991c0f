use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use kora_core::{
    pricing::{line_total, summarize, CartSummary},
    types::LineIssue,
    validation::{self, ValidationError},
};
use kora_storage::{CartError, CartLineRecord, CartLineUpsert};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::catalog::fetch_product;
use crate::problem::{conflict, internal_error, not_found, ProblemResponse};
use crate::state::AppState;
use crate::storefront::listing_problem;

#[derive(Debug, Serialize)]
pub struct CartView {
    pub items: Vec<CartLineView>,
    pub summary: CartSummary,
}

#[derive(Debug, Serialize)]
pub struct CartLineView {
    #[serde(flatten)]
    pub line: CartLineRecord,
    pub unit_price: i64,
    pub line_total: i64,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue: Option<LineIssue>,
}

pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<CartView>, ProblemResponse> {
    load_cart(&state, user.id()).await.map(Json)
}

#[derive(Debug, Deserialize)]
pub struct AddItemBody {
    pub product_id: String,
    #[serde(default)]
    pub listing_id: Option<String>,
    #[serde(default = "default_quantity")]
    pub quantity: i64,
}

fn default_quantity() -> i64 {
    1
}

/// Adds units of a product, bought directly or through a storefront listing.
/// Repeated adds for the same purchase path merge into one line.
pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<AddItemBody>,
) -> Result<Json<CartView>, ProblemResponse> {
    let quantity = validation::line_quantity(body.quantity)?;
    let product = fetch_product(&state, &body.product_id).await?;
    if !product.is_active() {
        return Err(conflict("product_inactive", "this product is no longer on sale"));
    }

    if let Some(listing_id) = body.listing_id.as_deref() {
        let listing = state
            .storage()
            .listings()
            .fetch(listing_id)
            .await
            .map_err(listing_problem)?
            .ok_or_else(|| not_found("listing_not_found", "listing does not exist"))?;
        if listing.product.id != product.id {
            return Err(ValidationError::new("listing_id", "listing is for a different product").into());
        }
        if !listing.available {
            return Err(conflict("listing_unavailable", "this listing cannot be bought right now"));
        }
    }

    let carts = state.storage().carts();
    let existing = carts
        .existing_quantity(user.id(), &product.id, body.listing_id.as_deref())
        .await
        .map_err(cart_problem)?;
    let merged = validation::line_quantity(existing + quantity)?;
    ensure_in_stock(merged, product.stock)?;

    let new_id = Uuid::new_v4().to_string();
    carts
        .upsert_line(&CartLineUpsert {
            new_id: &new_id,
            user_id: user.id(),
            product_id: &product.id,
            listing_id: body.listing_id.as_deref(),
            quantity: merged,
            now: state.now(),
        })
        .await
        .map_err(cart_problem)?;

    load_cart(&state, user.id()).await.map(Json)
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemBody {
    pub quantity: i64,
}

/// Sets the quantity of a line; zero removes it.
pub async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<String>,
    Json(body): Json<UpdateItemBody>,
) -> Result<Json<CartView>, ProblemResponse> {
    let carts = state.storage().carts();
    if body.quantity == 0 {
        carts
            .remove_item(user.id(), &item_id)
            .await
            .map_err(cart_problem)?;
        return load_cart(&state, user.id()).await.map(Json);
    }

    let quantity = validation::line_quantity(body.quantity)?;
    let item = carts
        .fetch_item(user.id(), &item_id)
        .await
        .map_err(cart_problem)?
        .ok_or_else(item_missing)?;
    let product = fetch_product(&state, &item.product_id).await?;
    ensure_in_stock(quantity, product.stock)?;

    carts
        .set_quantity(user.id(), &item_id, quantity, state.now())
        .await
        .map_err(cart_problem)?;
    load_cart(&state, user.id()).await.map(Json)
}

pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<String>,
) -> Result<Json<CartView>, ProblemResponse> {
    state
        .storage()
        .carts()
        .remove_item(user.id(), &item_id)
        .await
        .map_err(cart_problem)?;
    load_cart(&state, user.id()).await.map(Json)
}

pub async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<StatusCode, ProblemResponse> {
    state
        .storage()
        .carts()
        .clear(user.id())
        .await
        .map_err(cart_problem)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn load_cart(state: &AppState, user_id: &str) -> Result<CartView, ProblemResponse> {
    let lines = state
        .storage()
        .carts()
        .lines(user_id)
        .await
        .map_err(cart_problem)?;
    let summary = summarize(
        lines.iter().map(|line| (line.unit_price(), line.quantity)),
        state.shipping(),
    )
    .map_err(|err| {
        error!(stage = "cart", user_id, error = %err, "cart total overflow");
        ValidationError::new("quantity", "cart total is too large")
    })?;

    let mut items = Vec::with_capacity(lines.len());
    for line in lines {
        let total = line_total(line.unit_price(), line.quantity)
            .map_err(|_| ValidationError::new("quantity", "cart total is too large"))?;
        let issue = line.issue();
        items.push(CartLineView {
            unit_price: line.unit_price(),
            line_total: total,
            available: issue.is_none(),
            issue,
            line,
        });
    }
    Ok(CartView { items, summary })
}

fn ensure_in_stock(quantity: i64, stock: i64) -> Result<(), ProblemResponse> {
    if quantity > stock {
        return Err(conflict(
            "insufficient_stock",
            format!("only {stock} units are in stock"),
        ));
    }
    Ok(())
}

fn item_missing() -> ProblemResponse {
    not_found("cart_item_not_found", "cart item does not exist")
}

fn cart_problem(err: CartError) -> ProblemResponse {
    match err {
        CartError::ItemNotFound => item_missing(),
        CartError::Database(err) => {
            error!(stage = "cart", error = %err, "cart storage failure");
            internal_error("failed to access the cart")
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::state::test_support::TestApp;
    use kora_core::types::Role;
    use kora_storage::NewListing;
    use serde_json::json;

    async fn shop() -> (TestApp, String) {
        let app = TestApp::new().await;
        app.profile("w-1", Role::Wholesaler).await;
        app.profile("d-1", Role::Dropshipper).await;
        let customer = app.profile("c-1", Role::Customer).await;
        app.product("p-1", "w-1", 10_000, 8).await;
        app.product("p-2", "w-1", 30_000, 3).await;
        app.partnership("pa-1", "w-1", "d-1", 500).await;
        app.db()
            .listings()
            .insert(&NewListing {
                id: "l-1".into(),
                dropshipper_id: "d-1".into(),
                product_id: "p-1".into(),
                retail_price: 12_500,
                created_at: app.state.now(),
            })
            .await
            .expect("listing");
        (app, customer)
    }

    #[tokio::test]
    async fn adding_merges_lines_and_prices_listings_at_retail() {
        let (app, customer) = shop().await;

        app.send(
            "POST",
            "/cart/items",
            Some(&customer),
            Some(json!({ "product_id": "p-1", "listing_id": "l-1" })),
        )
        .await;
        let (status, cart) = app
            .send(
                "POST",
                "/cart/items",
                Some(&customer),
                Some(json!({ "product_id": "p-1", "listing_id": "l-1", "quantity": 2 })),
            )
            .await;
        assert_eq!(status, 200);
        let items = cart["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["quantity"], 3);
        assert_eq!(items[0]["unit_price"], 12_500);
        assert_eq!(cart["summary"]["subtotal"], 37_500);
        assert_eq!(cart["summary"]["shipping_fee"], 2_000);

        let (_, cart) = app
            .send(
                "POST",
                "/cart/items",
                Some(&customer),
                Some(json!({ "product_id": "p-2", "quantity": 1 })),
            )
            .await;
        assert_eq!(cart["items"].as_array().unwrap().len(), 2);
        assert_eq!(cart["summary"]["subtotal"], 67_500);
        assert_eq!(cart["summary"]["shipping_fee"], 0);
        assert_eq!(cart["summary"]["total"], 67_500);
    }

    #[tokio::test]
    async fn wholesale_price_above_retail_suspends_listing() {
        let (app, customer) = shop().await;
        let wholesaler = crate::state::test_support::token_for("w-1");
        app.send(
            "POST",
            "/cart/items",
            Some(&customer),
            Some(json!({ "product_id": "p-1", "listing_id": "l-1" })),
        )
        .await;

        let (status, _) = app
            .send("PATCH", "/products/p-1", Some(&wholesaler), Some(json!({ "price": 13_000 })))
            .await;
        assert_eq!(status, 200);

        let (_, cart) = app.send("GET", "/cart", Some(&customer), None).await;
        assert_eq!(cart["items"][0]["available"], false);
        assert_eq!(cart["items"][0]["issue"], "listing_unavailable");

        let (status, problem) = app
            .send(
                "POST",
                "/cart/items",
                Some(&customer),
                Some(json!({ "product_id": "p-1", "listing_id": "l-1" })),
            )
            .await;
        assert_eq!(status, 409);
        assert_eq!(problem["type"], "listing_unavailable");
    }

    #[tokio::test]
    async fn quantity_is_bounded_by_stock_and_limits() {
        let (app, customer) = shop().await;

        let (status, body) = app
            .send(
                "POST",
                "/cart/items",
                Some(&customer),
                Some(json!({ "product_id": "p-2", "quantity": 4 })),
            )
            .await;
        assert_eq!(status, 409);
        assert_eq!(body["type"], "insufficient_stock");

        let (status, _) = app
            .send(
                "POST",
                "/cart/items",
                Some(&customer),
                Some(json!({ "product_id": "p-2", "quantity": 0 })),
            )
            .await;
        assert_eq!(status, 422);

        let (status, _) = app
            .send(
                "POST",
                "/cart/items",
                Some(&customer),
                Some(json!({ "product_id": "p-2", "listing_id": "l-1" })),
            )
            .await;
        assert_eq!(status, 422, "listing belongs to p-1");
    }

    #[tokio::test]
    async fn update_to_zero_removes_and_clear_empties() {
        let (app, customer) = shop().await;
        let (_, cart) = app
            .send(
                "POST",
                "/cart/items",
                Some(&customer),
                Some(json!({ "product_id": "p-1", "quantity": 2 })),
            )
            .await;
        let item_id = cart["items"][0]["id"].as_str().unwrap().to_string();

        let (status, cart) = app
            .send(
                "PATCH",
                &format!("/cart/items/{item_id}"),
                Some(&customer),
                Some(json!({ "quantity": 5 })),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(cart["items"][0]["quantity"], 5);

        let (status, cart) = app
            .send(
                "PATCH",
                &format!("/cart/items/{item_id}"),
                Some(&customer),
                Some(json!({ "quantity": 0 })),
            )
            .await;
        assert_eq!(status, 200);
        assert!(cart["items"].as_array().unwrap().is_empty());
        assert_eq!(cart["summary"]["shipping_fee"], 0);

        let (status, _) = app
            .send("DELETE", &format!("/cart/items/{item_id}"), Some(&customer), None)
            .await;
        assert_eq!(status, 404);

        app.send(
            "POST",
            "/cart/items",
            Some(&customer),
            Some(json!({ "product_id": "p-2" })),
        )
        .await;
        let (status, _) = app.send("DELETE", "/cart", Some(&customer), None).await;
        assert_eq!(status, 204);
        let (_, cart) = app.send("GET", "/cart", Some(&customer), None).await;
        assert!(cart["items"].as_array().unwrap().is_empty());
    }
}

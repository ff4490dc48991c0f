use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use kora_core::{
    types::{Order, OrderDetails, OrderStatus, PaymentMethod, Role, ShippingDetails},
    validation,
};
use kora_storage::OrderScope;
use serde::Deserialize;
use tracing::error;

use crate::auth::AuthUser;
use crate::checkout::{CheckoutError, PlaceOrder};
use crate::problem::{conflict, forbidden, internal_error, not_found, ProblemResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub shipping: ShippingDetails,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub notes: Option<String>,
}

pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CheckoutBody>,
) -> Result<(StatusCode, Json<OrderDetails>), ProblemResponse> {
    let shipping = ShippingDetails {
        full_name: validation::required_text("full_name", &body.shipping.full_name)?,
        phone: validation::rwanda_phone(&body.shipping.phone)?,
        district: validation::required_text("district", &body.shipping.district)?,
        address: validation::required_text("address", &body.shipping.address)?,
    };
    let request = PlaceOrder {
        shipping,
        payment_method: body.payment_method,
        notes: validation::optional_text("notes", body.notes.as_deref())?,
    };

    let details = state
        .orders()
        .place(user.id(), &request)
        .await
        .map_err(checkout_problem)?;
    Ok((StatusCode::CREATED, Json(details)))
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub status: Option<OrderStatus>,
}

pub async fn list_my_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Vec<Order>>, ProblemResponse> {
    list_scoped(&state, OrderScope::Customer(user.id().to_string()), query.status).await
}

/// Orders with at least one line supplied or resold by the caller.
pub async fn seller_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Vec<Order>>, ProblemResponse> {
    if !matches!(user.role(), Role::Wholesaler | Role::Dropshipper) {
        return Err(forbidden("only sellers have seller orders"));
    }
    list_scoped(&state, OrderScope::Seller(user.id().to_string()), query.status).await
}

pub async fn admin_orders(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Vec<Order>>, ProblemResponse> {
    user.require_admin()?;
    list_scoped(&state, OrderScope::All, query.status).await
}

/// Order with its lines and status history, for tracking.
pub async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<String>,
) -> Result<Json<OrderDetails>, ProblemResponse> {
    let details = state
        .storage()
        .orders()
        .details(&order_id)
        .await
        .map_err(|err| {
            error!(stage = "orders", order_id = %order_id, error = %err, "failed to load order");
            internal_error("failed to load order")
        })?
        .ok_or_else(order_missing)?;

    let sellers = details.items.iter().flat_map(|item| {
        std::iter::once(item.wholesaler_id.as_str()).chain(item.dropshipper_id.as_deref())
    });
    // Existence of other people's orders is not disclosed.
    if !user.actor().can_view_order(&details.order.customer_id, sellers) {
        return Err(order_missing());
    }
    Ok(Json(details))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelBody {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn cancel_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<String>,
    body: Option<Json<CancelBody>>,
) -> Result<Json<OrderDetails>, ProblemResponse> {
    let reason = body.and_then(|Json(body)| body.reason);
    let reason = validation::optional_text("reason", reason.as_deref())?;
    let details = state
        .orders()
        .change_status(&user.actor(), &order_id, OrderStatus::Cancelled, reason.as_deref())
        .await
        .map_err(checkout_problem)?;
    Ok(Json(details))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusBody {
    pub status: OrderStatus,
    #[serde(default)]
    pub note: Option<String>,
}

pub async fn update_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<String>,
    Json(body): Json<UpdateStatusBody>,
) -> Result<Json<OrderDetails>, ProblemResponse> {
    let note = validation::optional_text("note", body.note.as_deref())?;
    let details = state
        .orders()
        .change_status(&user.actor(), &order_id, body.status, note.as_deref())
        .await
        .map_err(checkout_problem)?;
    Ok(Json(details))
}

async fn list_scoped(
    state: &AppState,
    scope: OrderScope,
    status: Option<OrderStatus>,
) -> Result<Json<Vec<Order>>, ProblemResponse> {
    let orders = state
        .storage()
        .orders()
        .list(&scope, status)
        .await
        .map_err(|err| {
            error!(stage = "orders", error = %err, "failed to list orders");
            internal_error("failed to list orders")
        })?;
    Ok(Json(orders))
}

fn order_missing() -> ProblemResponse {
    not_found("order_not_found", "order does not exist")
}

pub(crate) fn checkout_problem(err: CheckoutError) -> ProblemResponse {
    match err {
        CheckoutError::EmptyCart => conflict("empty_cart", "the cart is empty"),
        CheckoutError::LineUnavailable { product_id, issue } => conflict(
            issue.as_str(),
            format!("product {product_id} cannot be ordered right now"),
        ),
        CheckoutError::NotFound => order_missing(),
        CheckoutError::Forbidden => forbidden("you may not change this order"),
        CheckoutError::Transition(err) => conflict("invalid_transition", err.to_string()),
        other => {
            error!(stage = "orders", error = %other, "order operation failed");
            internal_error("failed to process the order")
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::state::test_support::TestApp;
    use kora_core::types::Role;
    use kora_storage::NewListing;
    use serde_json::{json, Value};

    struct Market {
        app: TestApp,
        wholesaler: String,
        dropshipper: String,
        customer: String,
        admin: String,
    }

    async fn market() -> Market {
        let app = TestApp::new().await;
        let wholesaler = app.profile("w-1", Role::Wholesaler).await;
        let dropshipper = app.profile("d-1", Role::Dropshipper).await;
        let customer = app.profile("c-1", Role::Customer).await;
        let admin = app.profile("a-1", Role::Admin).await;
        app.product("p-1", "w-1", 10_000, 5).await;
        app.partnership("pa-1", "w-1", "d-1", 1_000).await;
        app.db()
            .listings()
            .insert(&NewListing {
                id: "l-1".into(),
                dropshipper_id: "d-1".into(),
                product_id: "p-1".into(),
                retail_price: 14_000,
                created_at: app.state.now(),
            })
            .await
            .expect("listing");
        Market {
            app,
            wholesaler,
            dropshipper,
            customer,
            admin,
        }
    }

    fn checkout_body() -> Value {
        json!({
            "shipping": {
                "full_name": "Aline Uwase",
                "phone": "0788 123 456",
                "district": "Musanze",
                "address": "KN 5 Rd"
            },
            "payment_method": "cash_on_delivery",
            "notes": "  "
        })
    }

    async fn place(m: &Market, quantity: i64) -> Value {
        let (status, _) = m
            .app
            .send(
                "POST",
                "/cart/items",
                Some(&m.customer),
                Some(json!({ "product_id": "p-1", "listing_id": "l-1", "quantity": quantity })),
            )
            .await;
        assert_eq!(status, 200);
        let (status, order) = m
            .app
            .send("POST", "/checkout", Some(&m.customer), Some(checkout_body()))
            .await;
        assert_eq!(status, 201, "{order}");
        order
    }

    #[tokio::test]
    async fn checkout_creates_a_trackable_order() {
        let m = market().await;

        let (status, problem) = m
            .app
            .send("POST", "/checkout", Some(&m.customer), Some(checkout_body()))
            .await;
        assert_eq!(status, 409);
        assert_eq!(problem["type"], "empty_cart");

        let order = place(&m, 2).await;
        assert_eq!(order["status"], "pending");
        assert_eq!(order["shipping"]["phone"], "+250788123456");
        assert_eq!(order["notes"], Value::Null);
        assert_eq!(order["subtotal"], 28_000);
        assert_eq!(order["items"][0]["commission_amount"], 2_000);
        assert!(order["order_number"].as_str().unwrap().starts_with("KORA-"));
        let id = order["id"].as_str().unwrap().to_string();

        let (status, tracked) = m
            .app
            .send("GET", &format!("/orders/{id}"), Some(&m.customer), None)
            .await;
        assert_eq!(status, 200);
        assert_eq!(tracked["history"].as_array().unwrap().len(), 1);

        let (_, mine) = m.app.send("GET", "/orders", Some(&m.customer), None).await;
        assert_eq!(mine.as_array().unwrap().len(), 1);
        let (_, delivered) = m
            .app
            .send("GET", "/orders?status=delivered", Some(&m.customer), None)
            .await;
        assert!(delivered.as_array().unwrap().is_empty());

        for token in [&m.wholesaler, &m.dropshipper] {
            let (_, sold) = m.app.send("GET", "/seller/orders", Some(token), None).await;
            assert_eq!(sold.as_array().unwrap().len(), 1);
        }
        let (status, _) = m.app.send("GET", "/seller/orders", Some(&m.customer), None).await;
        assert_eq!(status, 403);

        let stranger = m.app.profile("c-2", Role::Customer).await;
        let (status, _) = m
            .app
            .send("GET", &format!("/orders/{id}"), Some(&stranger), None)
            .await;
        assert_eq!(status, 404);

        let (_, all) = m.app.send("GET", "/admin/orders", Some(&m.admin), None).await;
        assert_eq!(all.as_array().unwrap().len(), 1);
        let (status, _) = m.app.send("GET", "/admin/orders", Some(&m.customer), None).await;
        assert_eq!(status, 403);
    }

    #[tokio::test]
    async fn checkout_rejects_bad_shipping_details() {
        let m = market().await;
        let mut body = checkout_body();
        body["shipping"]["phone"] = json!("12345");
        let (status, problem) = m
            .app
            .send("POST", "/checkout", Some(&m.customer), Some(body))
            .await;
        assert_eq!(status, 422);
        assert_eq!(problem["type"], "invalid_input");
    }

    #[tokio::test]
    async fn fulfilment_follows_the_state_machine() {
        let m = market().await;
        let order = place(&m, 1).await;
        let uri = format!("/orders/{}/status", order["id"].as_str().unwrap());

        let (status, _) = m
            .app
            .send("POST", &uri, Some(&m.dropshipper), Some(json!({ "status": "confirmed" })))
            .await;
        assert_eq!(status, 403);

        let (status, problem) = m
            .app
            .send("POST", &uri, Some(&m.wholesaler), Some(json!({ "status": "shipped" })))
            .await;
        assert_eq!(status, 409);
        assert_eq!(problem["type"], "invalid_transition");

        for next in ["confirmed", "processing", "shipped", "delivered"] {
            let (status, updated) = m
                .app
                .send("PATCH", &uri, Some(&m.wholesaler), Some(json!({ "status": next, "note": "ok" })))
                .await;
            assert_eq!(status, 200);
            assert_eq!(updated["status"], next);
        }

        let (_, tracked) = m
            .app
            .send("GET", &format!("/orders/{}", order["id"].as_str().unwrap()), Some(&m.customer), None)
            .await;
        assert_eq!(tracked["history"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn status_change_checks_permission_before_transition() {
        let m = market().await;
        let order = place(&m, 1).await;
        let uri = format!("/orders/{}/status", order["id"].as_str().unwrap());

        // pending -> shipped is also an invalid transition; the role check answers first.
        for token in [&m.dropshipper, &m.customer] {
            let (status, problem) = m
                .app
                .send("POST", &uri, Some(token), Some(json!({ "status": "shipped" })))
                .await;
            assert_eq!(status, 403);
            assert_eq!(problem["type"], "forbidden");
        }

        let (status, _) = m
            .app
            .send("POST", &uri, Some(&m.admin), Some(json!({ "status": "confirmed" })))
            .await;
        assert_eq!(status, 200);
        let (status, problem) = m
            .app
            .send("POST", &uri, Some(&m.customer), Some(json!({ "status": "pending" })))
            .await;
        assert_eq!(status, 403);
        assert_eq!(problem["type"], "forbidden");
    }

    #[tokio::test]
    async fn customer_cancels_only_while_pending() {
        let m = market().await;
        let first = place(&m, 2).await;
        let first_id = first["id"].as_str().unwrap().to_string();

        let (status, cancelled) = m
            .app
            .send(
                "POST",
                &format!("/orders/{first_id}/cancel"),
                Some(&m.customer),
                Some(json!({ "reason": "changed my mind" })),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(cancelled["status"], "cancelled");
        let product = m.app.db().products().fetch("p-1").await.unwrap().unwrap();
        assert_eq!(product.stock, 5);

        let second = place(&m, 1).await;
        let second_id = second["id"].as_str().unwrap().to_string();
        m.app
            .send(
                "POST",
                &format!("/orders/{second_id}/status"),
                Some(&m.admin),
                Some(json!({ "status": "confirmed" })),
            )
            .await;
        let (status, _) = m
            .app
            .send("POST", &format!("/orders/{second_id}/cancel"), Some(&m.customer), None)
            .await;
        assert_eq!(status, 403);
        let (status, _) = m
            .app
            .send("POST", &format!("/orders/{second_id}/cancel"), Some(&m.wholesaler), None)
            .await;
        assert_eq!(status, 200);
    }
}

use std::time::Instant;

use chrono::{DateTime, Utc};
use kora_core::{
    access::Actor,
    order::{order_number, validate_transition, TransitionError},
    pricing::{commission_split, summarize, PricingError, ShippingPolicy},
    types::{LineIssue, OrderDetails, OrderStatus, PaymentMethod, ShippingDetails},
};
use kora_storage::{
    CartError, CartRepository, Database, NewOrder, NewOrderItem, NewStatusChange, OrderError,
    OrderRepository, ProductError, ProductRepository, StorageError,
};
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::info;
use ulid::Ulid;
use uuid::Uuid;

use crate::state::Clock;

/// Places orders and moves them through their lifecycle. Every operation runs
/// in one transaction so stock, cart and history never diverge.
#[derive(Clone)]
pub struct OrderDesk {
    database: Database,
    shipping: ShippingPolicy,
    clock: Clock,
}

pub struct PlaceOrder {
    pub shipping: ShippingDetails,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
}

impl OrderDesk {
    pub fn new(database: Database, shipping: ShippingPolicy, clock: Clock) -> Self {
        Self {
            database,
            shipping,
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Turns the customer's cart into a pending order.
    pub async fn place(
        &self,
        customer_id: &str,
        request: &PlaceOrder,
    ) -> Result<OrderDetails, CheckoutError> {
        let started = Instant::now();
        let result = self.place_inner(customer_id, request).await;
        let outcome = match &result {
            Ok(_) => "placed",
            Err(CheckoutError::EmptyCart) => "empty_cart",
            Err(CheckoutError::LineUnavailable { .. }) => "unavailable",
            Err(_) => "error",
        };
        counter!("checkouts_total", "result" => outcome).increment(1);
        histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        result
    }

    async fn place_inner(
        &self,
        customer_id: &str,
        request: &PlaceOrder,
    ) -> Result<OrderDetails, CheckoutError> {
        let now = self.now();
        let mut tx = self.database.begin().await?;

        let lines = CartRepository::lines_with(&mut *tx, customer_id).await?;
        if lines.is_empty() {
            return Err(CheckoutError::EmptyCart);
        }
        if let Some((line, issue)) = lines
            .iter()
            .find_map(|line| line.issue().map(|issue| (line, issue)))
        {
            return Err(CheckoutError::LineUnavailable {
                product_id: line.product_id.clone(),
                issue,
            });
        }

        let summary = summarize(
            lines.iter().map(|line| (line.unit_price(), line.quantity)),
            &self.shipping,
        )?;

        let order_id = Uuid::new_v4().to_string();
        let number = order_number(&Ulid::new().to_string());
        OrderRepository::insert_order(
            &mut *tx,
            &NewOrder {
                id: &order_id,
                order_number: &number,
                customer_id,
                subtotal: summary.subtotal,
                shipping_fee: summary.shipping_fee,
                total: summary.total,
                shipping: &request.shipping,
                payment_method: request.payment_method,
                notes: request.notes.as_deref(),
                created_at: now,
            },
        )
        .await?;

        for line in &lines {
            let split = commission_split(
                line.unit_price(),
                line.wholesale_price,
                line.quantity,
                line.commission_bps(),
            )?;
            let item_id = Uuid::new_v4().to_string();
            OrderRepository::insert_item(
                &mut *tx,
                &NewOrderItem {
                    id: &item_id,
                    order_id: &order_id,
                    product_id: &line.product_id,
                    product_name: &line.product_name,
                    wholesaler_id: &line.wholesaler_id,
                    dropshipper_id: line.dropshipper_id.as_deref(),
                    listing_id: line.listing_id.as_deref(),
                    quantity: line.quantity,
                    unit_price: line.unit_price(),
                    wholesale_price: line.wholesale_price,
                    commission_bps: line.commission_bps(),
                    commission_amount: split.commission_amount,
                    line_total: split.line_total,
                },
            )
            .await?;

            ProductRepository::decrement_stock(&mut *tx, &line.product_id, line.quantity, now)
                .await
                .map_err(|err| match err {
                    ProductError::InsufficientStock => CheckoutError::LineUnavailable {
                        product_id: line.product_id.clone(),
                        issue: LineIssue::InsufficientStock,
                    },
                    other => CheckoutError::Product(other),
                })?;
        }

        OrderRepository::append_history(
            &mut *tx,
            &NewStatusChange {
                order_id: &order_id,
                status: OrderStatus::Pending,
                changed_by: customer_id,
                note: None,
                at: now,
            },
        )
        .await?;
        CartRepository::clear_with(&mut *tx, customer_id).await?;
        tx.commit().await.map_err(StorageError::from)?;

        info!(
            stage = "checkout",
            order_id = %order_id,
            order_number = %number,
            customer_id,
            total = summary.total,
            lines = lines.len(),
            "order placed"
        );

        self.database
            .orders()
            .details(&order_id)
            .await?
            .ok_or(CheckoutError::NotFound)
    }

    /// Applies a status change requested by `actor`. Cancelling returns the
    /// ordered units to stock.
    pub async fn change_status(
        &self,
        actor: &Actor,
        order_id: &str,
        next: OrderStatus,
        note: Option<&str>,
    ) -> Result<OrderDetails, CheckoutError> {
        let now = self.now();
        let mut tx = self.database.begin().await?;

        let order = OrderRepository::fetch_with(&mut *tx, order_id)
            .await?
            .ok_or(CheckoutError::NotFound)?;
        let items = OrderRepository::items_with(&mut *tx, order_id).await?;

        let sellers = items.iter().flat_map(|item| {
            std::iter::once(item.wholesaler_id.as_str()).chain(item.dropshipper_id.as_deref())
        });
        if !actor.can_view_order(&order.customer_id, sellers) {
            return Err(CheckoutError::NotFound);
        }

        // Callers without rights get 403 whatever the order's status.
        let wholesalers = || items.iter().map(|item| item.wholesaler_id.as_str());
        let cancelling = next == OrderStatus::Cancelled;
        let may_request = actor.can_fulfil_order(wholesalers())
            || (cancelling && actor.id == order.customer_id);
        if !may_request {
            return Err(CheckoutError::Forbidden);
        }

        validate_transition(order.status, next)?;
        if cancelling && !actor.can_cancel_order(order.status, &order.customer_id, wholesalers()) {
            return Err(CheckoutError::Forbidden);
        }

        OrderRepository::transition(&mut *tx, order_id, order.status, next, now).await?;
        if cancelling {
            for item in &items {
                ProductRepository::restore_stock(&mut *tx, &item.product_id, item.quantity, now)
                    .await?;
            }
        }
        OrderRepository::append_history(
            &mut *tx,
            &NewStatusChange {
                order_id,
                status: next,
                changed_by: &actor.id,
                note,
                at: now,
            },
        )
        .await?;
        tx.commit().await.map_err(StorageError::from)?;

        counter!("order_transitions_total", "status" => next.as_str()).increment(1);
        info!(
            stage = "orders",
            order_id,
            from = order.status.as_str(),
            to = next.as_str(),
            actor = %actor.id,
            "order status changed"
        );

        self.database
            .orders()
            .details(order_id)
            .await?
            .ok_or(CheckoutError::NotFound)
    }
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("cart is empty")]
    EmptyCart,
    #[error("product {product_id} cannot be ordered: {}", issue.as_str())]
    LineUnavailable { product_id: String, issue: LineIssue },
    #[error("order not found")]
    NotFound,
    #[error("not allowed to change this order")]
    Forbidden,
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error("order total cannot be computed: {0}")]
    Pricing(#[from] PricingError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Cart(#[from] CartError),
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error(transparent)]
    Product(#[from] ProductError),
}

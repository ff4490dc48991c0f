use chrono::{DateTime, Utc};
use kora_core::types::{
    Order, OrderDetails, OrderItem, OrderStatus, PaymentMethod, ShippingDetails, StatusChange,
    UnknownVariant,
};
use sqlx::{QueryBuilder, Sqlite, SqliteExecutor, SqlitePool};
use thiserror::Error;

use crate::{is_unique_violation, to_rfc3339};

const ORDER_COLUMNS: &str = "o.id, o.order_number, o.customer_id, o.status, o.subtotal, o.shipping_fee, o.total, \
     o.shipping_name, o.shipping_phone, o.shipping_district, o.shipping_address, o.payment_method, o.notes, \
     o.created_at, o.updated_at";

const ITEM_COLUMNS: &str = "id, order_id, product_id, product_name, wholesaler_id, dropshipper_id, listing_id, \
     quantity, unit_price, wholesale_price, commission_bps, commission_amount, line_total";

/// Repository for orders, order lines and their status history.
#[derive(Clone)]
pub struct OrderRepository {
    pool: SqlitePool,
}

impl OrderRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_order(
        executor: impl SqliteExecutor<'_>,
        order: &NewOrder<'_>,
    ) -> Result<(), OrderError> {
        let created_at = to_rfc3339(order.created_at);
        sqlx::query(
            "INSERT INTO orders \
             (id, order_number, customer_id, status, subtotal, shipping_fee, total, shipping_name, shipping_phone, \
              shipping_district, shipping_address, payment_method, notes, created_at, updated_at) \
             VALUES (?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(order.id)
        .bind(order.order_number)
        .bind(order.customer_id)
        .bind(order.subtotal)
        .bind(order.shipping_fee)
        .bind(order.total)
        .bind(&order.shipping.full_name)
        .bind(&order.shipping.phone)
        .bind(&order.shipping.district)
        .bind(&order.shipping.address)
        .bind(order.payment_method.as_str())
        .bind(order.notes)
        .bind(&created_at)
        .bind(&created_at)
        .execute(executor)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                OrderError::DuplicateNumber
            } else {
                OrderError::Database(err)
            }
        })?;
        Ok(())
    }

    pub async fn insert_item(
        executor: impl SqliteExecutor<'_>,
        item: &NewOrderItem<'_>,
    ) -> Result<(), OrderError> {
        sqlx::query(
            "INSERT INTO order_items \
             (id, order_id, product_id, product_name, wholesaler_id, dropshipper_id, listing_id, quantity, \
              unit_price, wholesale_price, commission_bps, commission_amount, line_total) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(item.id)
        .bind(item.order_id)
        .bind(item.product_id)
        .bind(item.product_name)
        .bind(item.wholesaler_id)
        .bind(item.dropshipper_id)
        .bind(item.listing_id)
        .bind(item.quantity)
        .bind(item.unit_price)
        .bind(item.wholesale_price)
        .bind(item.commission_bps)
        .bind(item.commission_amount)
        .bind(item.line_total)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn append_history(
        executor: impl SqliteExecutor<'_>,
        change: &NewStatusChange<'_>,
    ) -> Result<(), OrderError> {
        sqlx::query(
            "INSERT INTO order_status_history (order_id, status, changed_by, note, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(change.order_id)
        .bind(change.status.as_str())
        .bind(change.changed_by)
        .bind(change.note)
        .bind(to_rfc3339(change.at))
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Moves the order from `expected` to `next`; `StaleStatus` when another writer got there first.
    pub async fn transition(
        executor: impl SqliteExecutor<'_>,
        id: &str,
        expected: OrderStatus,
        next: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        let result = sqlx::query(
            "UPDATE orders SET status = ?, updated_at = ? WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(to_rfc3339(now))
        .bind(id)
        .bind(expected.as_str())
        .execute(executor)
        .await?;
        if result.rows_affected() == 0 {
            return Err(OrderError::StaleStatus);
        }
        Ok(())
    }

    pub async fn fetch(&self, id: &str) -> Result<Option<Order>, OrderError> {
        Self::fetch_with(&self.pool, id).await
    }

    pub async fn fetch_with(
        executor: impl SqliteExecutor<'_>,
        id: &str,
    ) -> Result<Option<Order>, OrderError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders AS o WHERE o.id = ?"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await?;
        row.map(OrderRow::into_domain).transpose()
    }

    pub async fn items(&self, order_id: &str) -> Result<Vec<OrderItem>, OrderError> {
        Self::items_with(&self.pool, order_id).await
    }

    pub async fn items_with(
        executor: impl SqliteExecutor<'_>,
        order_id: &str,
    ) -> Result<Vec<OrderItem>, OrderError> {
        let rows = sqlx::query_as::<_, OrderItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM order_items WHERE order_id = ? ORDER BY rowid"
        ))
        .bind(order_id)
        .fetch_all(executor)
        .await?;
        Ok(rows.into_iter().map(OrderItemRow::into_domain).collect())
    }

    /// Tracking timeline, oldest first.
    pub async fn history(&self, order_id: &str) -> Result<Vec<StatusChange>, OrderError> {
        let rows = sqlx::query_as::<_, StatusChangeRow>(
            "SELECT status, changed_by, note, created_at FROM order_status_history \
              WHERE order_id = ? ORDER BY id",
        )
        .bind(order_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(StatusChangeRow::into_domain).collect()
    }

    /// Order with lines and history, as shown on the tracking page.
    pub async fn details(&self, id: &str) -> Result<Option<OrderDetails>, OrderError> {
        let Some(order) = self.fetch(id).await? else {
            return Ok(None);
        };
        let items = self.items(id).await?;
        let history = self.history(id).await?;
        Ok(Some(OrderDetails {
            order,
            items,
            history,
        }))
    }

    /// Lists orders visible through `scope`, newest first.
    pub async fn list(
        &self,
        scope: &OrderScope,
        status: Option<OrderStatus>,
    ) -> Result<Vec<Order>, OrderError> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {ORDER_COLUMNS} FROM orders AS o WHERE 1 = 1"));
        match scope {
            OrderScope::All => {}
            OrderScope::Customer(customer_id) => {
                builder
                    .push(" AND o.customer_id = ")
                    .push_bind(customer_id.clone());
            }
            OrderScope::Seller(seller_id) => {
                builder
                    .push(
                        " AND EXISTS (SELECT 1 FROM order_items AS i WHERE i.order_id = o.id AND (i.wholesaler_id = ",
                    )
                    .push_bind(seller_id.clone())
                    .push(" OR i.dropshipper_id = ")
                    .push_bind(seller_id.clone())
                    .push("))");
            }
        }
        if let Some(status) = status {
            builder.push(" AND o.status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY o.created_at DESC, o.id DESC");

        let rows = builder
            .build_query_as::<OrderRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(OrderRow::into_domain).collect()
    }
}

/// Which orders a listing query may return.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderScope {
    All,
    Customer(String),
    /// Orders with at least one line supplied (wholesaler) or sold (dropshipper) by this profile.
    Seller(String),
}

pub struct NewOrder<'a> {
    pub id: &'a str,
    pub order_number: &'a str,
    pub customer_id: &'a str,
    pub subtotal: i64,
    pub shipping_fee: i64,
    pub total: i64,
    pub shipping: &'a ShippingDetails,
    pub payment_method: PaymentMethod,
    pub notes: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

pub struct NewOrderItem<'a> {
    pub id: &'a str,
    pub order_id: &'a str,
    pub product_id: &'a str,
    pub product_name: &'a str,
    pub wholesaler_id: &'a str,
    pub dropshipper_id: Option<&'a str>,
    pub listing_id: Option<&'a str>,
    pub quantity: i64,
    pub unit_price: i64,
    pub wholesale_price: i64,
    pub commission_bps: i64,
    pub commission_amount: i64,
    pub line_total: i64,
}

pub struct NewStatusChange<'a> {
    pub order_id: &'a str,
    pub status: OrderStatus,
    pub changed_by: &'a str,
    pub note: Option<&'a str>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, sqlx::FromRow)]
struct OrderRow {
    id: String,
    order_number: String,
    customer_id: String,
    status: String,
    subtotal: i64,
    shipping_fee: i64,
    total: i64,
    shipping_name: String,
    shipping_phone: String,
    shipping_district: String,
    shipping_address: String,
    payment_method: String,
    notes: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl OrderRow {
    fn into_domain(self) -> Result<Order, OrderError> {
        Ok(Order {
            status: self.status.parse()?,
            payment_method: self.payment_method.parse()?,
            id: self.id,
            order_number: self.order_number,
            customer_id: self.customer_id,
            subtotal: self.subtotal,
            shipping_fee: self.shipping_fee,
            total: self.total,
            shipping: ShippingDetails {
                full_name: self.shipping_name,
                phone: self.shipping_phone,
                district: self.shipping_district,
                address: self.shipping_address,
            },
            notes: self.notes,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct OrderItemRow {
    id: String,
    order_id: String,
    product_id: String,
    product_name: String,
    wholesaler_id: String,
    dropshipper_id: Option<String>,
    listing_id: Option<String>,
    quantity: i64,
    unit_price: i64,
    wholesale_price: i64,
    commission_bps: i64,
    commission_amount: i64,
    line_total: i64,
}

impl OrderItemRow {
    fn into_domain(self) -> OrderItem {
        OrderItem {
            id: self.id,
            order_id: self.order_id,
            product_id: self.product_id,
            product_name: self.product_name,
            wholesaler_id: self.wholesaler_id,
            dropshipper_id: self.dropshipper_id,
            listing_id: self.listing_id,
            quantity: self.quantity,
            unit_price: self.unit_price,
            wholesale_price: self.wholesale_price,
            commission_bps: self.commission_bps,
            commission_amount: self.commission_amount,
            line_total: self.line_total,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct StatusChangeRow {
    status: String,
    changed_by: String,
    note: Option<String>,
    created_at: DateTime<Utc>,
}

impl StatusChangeRow {
    fn into_domain(self) -> Result<StatusChange, OrderError> {
        Ok(StatusChange {
            status: self.status.parse()?,
            changed_by: self.changed_by,
            note: self.note,
            at: self.created_at,
        })
    }
}

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("order not found")]
    NotFound,
    #[error("order number already in use")]
    DuplicateNumber,
    #[error("order status changed concurrently")]
    StaleStatus,
    #[error("stored order is invalid: {0}")]
    Corrupt(#[from] UnknownVariant),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, insert_product, insert_profile, setup_db};
    use kora_core::types::Role;

    fn shipping() -> ShippingDetails {
        ShippingDetails {
            full_name: "Aline Uwase".into(),
            phone: "+250788123456".into(),
            district: "Gasabo".into(),
            address: "KG 7 Ave, Kacyiru".into(),
        }
    }

    async fn place(db: &crate::Database, id: &str, customer: &str, created_at: &str) {
        let shipping = shipping();
        let number = format!("KORA-{id}");
        let mut tx = db.begin().await.expect("tx");
        OrderRepository::insert_order(
            &mut *tx,
            &NewOrder {
                id,
                order_number: &number,
                customer_id: customer,
                subtotal: 20_000,
                shipping_fee: 2_000,
                total: 22_000,
                shipping: &shipping,
                payment_method: PaymentMethod::CashOnDelivery,
                notes: None,
                created_at: at(created_at),
            },
        )
        .await
        .expect("order");
        let item_id = format!("{id}-i1");
        OrderRepository::insert_item(
            &mut *tx,
            &NewOrderItem {
                id: &item_id,
                order_id: id,
                product_id: "p-1",
                product_name: "Product p-1",
                wholesaler_id: "w-1",
                dropshipper_id: Some("d-1"),
                listing_id: Some("l-1"),
                quantity: 2,
                unit_price: 10_000,
                wholesale_price: 8_000,
                commission_bps: 500,
                commission_amount: 800,
                line_total: 20_000,
            },
        )
        .await
        .expect("item");
        OrderRepository::append_history(
            &mut *tx,
            &NewStatusChange {
                order_id: id,
                status: OrderStatus::Pending,
                changed_by: customer,
                note: None,
                at: at(created_at),
            },
        )
        .await
        .expect("history");
        tx.commit().await.expect("commit");
    }

    async fn seeded() -> crate::Database {
        let db = setup_db().await;
        insert_profile(&db, "w-1", Role::Wholesaler).await;
        insert_profile(&db, "d-1", Role::Dropshipper).await;
        insert_profile(&db, "c-1", Role::Customer).await;
        insert_profile(&db, "c-2", Role::Customer).await;
        insert_product(&db, "p-1", "w-1", 8_000, 10).await;
        db
    }

    #[tokio::test]
    async fn details_include_items_and_history() {
        let db = seeded().await;
        place(&db, "o-1", "c-1", "2024-05-01T10:00:00Z").await;

        let details = db
            .orders()
            .details("o-1")
            .await
            .expect("details")
            .expect("order exists");
        assert_eq!(details.order.status, OrderStatus::Pending);
        assert_eq!(details.order.shipping.district, "Gasabo");
        assert_eq!(details.items.len(), 1);
        assert_eq!(details.items[0].commission_amount, 800);
        assert_eq!(details.history.len(), 1);
        assert!(db.orders().details("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transition_is_conditional_on_current_status() {
        let db = seeded().await;
        place(&db, "o-1", "c-1", "2024-05-01T10:00:00Z").await;
        let now = at("2024-05-01T12:00:00Z");

        OrderRepository::transition(
            db.pool(),
            "o-1",
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            now,
        )
        .await
        .expect("confirm");
        let err = OrderRepository::transition(
            db.pool(),
            "o-1",
            OrderStatus::Pending,
            OrderStatus::Cancelled,
            now,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, OrderError::StaleStatus));
    }

    #[tokio::test]
    async fn list_scopes() {
        let db = seeded().await;
        place(&db, "o-1", "c-1", "2024-05-01T10:00:00Z").await;
        place(&db, "o-2", "c-2", "2024-05-02T10:00:00Z").await;
        let repo = db.orders();

        let mine = repo
            .list(&OrderScope::Customer("c-1".into()), None)
            .await
            .expect("list");
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].id, "o-1");

        let sold = repo
            .list(&OrderScope::Seller("d-1".into()), None)
            .await
            .expect("list");
        assert_eq!(sold.len(), 2);
        assert_eq!(sold[0].id, "o-2", "newest first");

        let none = repo
            .list(&OrderScope::All, Some(OrderStatus::Delivered))
            .await
            .expect("list");
        assert!(none.is_empty());
    }
}

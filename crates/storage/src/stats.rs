use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::SqlitePool;

/// Products with fewer units than this show up as low stock on the wholesaler dashboard.
pub const LOW_STOCK_THRESHOLD: i64 = 5;

/// Read-only aggregates backing the role dashboards.
#[derive(Clone)]
pub struct StatsRepository {
    pool: SqlitePool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdminStats {
    pub users_by_role: BTreeMap<String, i64>,
    pub total_products: i64,
    pub active_products: i64,
    pub orders_by_status: BTreeMap<String, i64>,
    /// Sum of totals of delivered orders.
    pub gross_revenue: i64,
    pub pending_partnerships: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WholesalerStats {
    pub product_count: i64,
    pub low_stock_products: i64,
    pub order_count: i64,
    pub payout: i64,
    pub active_partnerships: i64,
    pub pending_requests: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DropshipperStats {
    pub listing_count: i64,
    pub active_partnerships: i64,
    pub order_count: i64,
    pub earnings: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CustomerStats {
    pub orders_by_status: BTreeMap<String, i64>,
    pub total_spent: i64,
}

impl StatsRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn admin(&self) -> Result<AdminStats, sqlx::Error> {
        let users_by_role = self
            .grouped("SELECT role, COUNT(*) FROM profiles GROUP BY role", None)
            .await?;
        let orders_by_status = self
            .grouped("SELECT status, COUNT(*) FROM orders GROUP BY status", None)
            .await?;
        let (total_products, active_products): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(status = 'active'), 0) FROM products",
        )
        .fetch_one(&self.pool)
        .await?;
        let gross_revenue = self
            .scalar(
                "SELECT COALESCE(SUM(total), 0) FROM orders WHERE status = 'delivered'",
                None,
            )
            .await?;
        let pending_partnerships = self
            .scalar(
                "SELECT COUNT(*) FROM partnerships WHERE status = 'pending'",
                None,
            )
            .await?;

        Ok(AdminStats {
            users_by_role,
            total_products,
            active_products,
            orders_by_status,
            gross_revenue,
            pending_partnerships,
        })
    }

    pub async fn wholesaler(&self, wholesaler_id: &str) -> Result<WholesalerStats, sqlx::Error> {
        let id = Some(wholesaler_id);
        let (product_count, low_stock_products): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(stock < ?), 0) FROM products WHERE wholesaler_id = ?",
        )
        .bind(LOW_STOCK_THRESHOLD)
        .bind(wholesaler_id)
        .fetch_one(&self.pool)
        .await?;
        let order_count = self
            .scalar(
                "SELECT COUNT(DISTINCT order_id) FROM order_items WHERE wholesaler_id = ?",
                id,
            )
            .await?;
        let payout = self
            .scalar(
                "SELECT COALESCE(SUM(i.wholesale_price * i.quantity - i.commission_amount), 0) \
                   FROM order_items AS i JOIN orders AS o ON o.id = i.order_id \
                  WHERE i.wholesaler_id = ? AND o.status <> 'cancelled'",
                id,
            )
            .await?;
        let active_partnerships = self
            .scalar(
                "SELECT COUNT(*) FROM partnerships WHERE wholesaler_id = ? AND status = 'active'",
                id,
            )
            .await?;
        let pending_requests = self
            .scalar(
                "SELECT COUNT(*) FROM partnerships WHERE wholesaler_id = ? AND status = 'pending'",
                id,
            )
            .await?;

        Ok(WholesalerStats {
            product_count,
            low_stock_products,
            order_count,
            payout,
            active_partnerships,
            pending_requests,
        })
    }

    pub async fn dropshipper(&self, dropshipper_id: &str) -> Result<DropshipperStats, sqlx::Error> {
        let id = Some(dropshipper_id);
        let listing_count = self
            .scalar(
                "SELECT COUNT(*) FROM storefront_listings WHERE dropshipper_id = ?",
                id,
            )
            .await?;
        let active_partnerships = self
            .scalar(
                "SELECT COUNT(*) FROM partnerships WHERE dropshipper_id = ? AND status = 'active'",
                id,
            )
            .await?;
        let order_count = self
            .scalar(
                "SELECT COUNT(DISTINCT order_id) FROM order_items WHERE dropshipper_id = ?",
                id,
            )
            .await?;
        let earnings = self
            .scalar(
                "SELECT COALESCE(SUM(i.line_total - i.wholesale_price * i.quantity + i.commission_amount), 0) \
                   FROM order_items AS i JOIN orders AS o ON o.id = i.order_id \
                  WHERE i.dropshipper_id = ? AND o.status <> 'cancelled'",
                id,
            )
            .await?;

        Ok(DropshipperStats {
            listing_count,
            active_partnerships,
            order_count,
            earnings,
        })
    }

    pub async fn customer(&self, customer_id: &str) -> Result<CustomerStats, sqlx::Error> {
        let id = Some(customer_id);
        let orders_by_status = self
            .grouped(
                "SELECT status, COUNT(*) FROM orders WHERE customer_id = ? GROUP BY status",
                id,
            )
            .await?;
        let total_spent = self
            .scalar(
                "SELECT COALESCE(SUM(total), 0) FROM orders WHERE customer_id = ? AND status <> 'cancelled'",
                id,
            )
            .await?;
        Ok(CustomerStats {
            orders_by_status,
            total_spent,
        })
    }

    async fn scalar(&self, sql: &str, id: Option<&str>) -> Result<i64, sqlx::Error> {
        let mut query = sqlx::query_as::<_, (i64,)>(sql);
        if let Some(id) = id {
            query = query.bind(id);
        }
        let (value,) = query.fetch_one(&self.pool).await?;
        Ok(value)
    }

    async fn grouped(
        &self,
        sql: &str,
        id: Option<&str>,
    ) -> Result<BTreeMap<String, i64>, sqlx::Error> {
        let mut query = sqlx::query_as::<_, (String, i64)>(sql);
        if let Some(id) = id {
            query = query.bind(id);
        }
        Ok(query.fetch_all(&self.pool).await?.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, insert_product, insert_profile, setup_db};
    use crate::{NewOrder, NewOrderItem, NewPartnership, OrderRepository};
    use kora_core::types::{OrderStatus, PartnershipStatus, PaymentMethod, Role, ShippingDetails};

    async fn seeded() -> crate::Database {
        let db = setup_db().await;
        insert_profile(&db, "w-1", Role::Wholesaler).await;
        insert_profile(&db, "d-1", Role::Dropshipper).await;
        insert_profile(&db, "c-1", Role::Customer).await;
        insert_product(&db, "p-1", "w-1", 10_000, 20).await;
        insert_product(&db, "p-2", "w-1", 4_000, 2).await;
        db.partnerships()
            .insert(&NewPartnership {
                id: "pa-1".into(),
                wholesaler_id: "w-1".into(),
                dropshipper_id: "d-1".into(),
                commission_bps: 1_000,
                status: PartnershipStatus::Active,
                message: None,
                created_at: at("2024-05-01T09:00:00Z"),
            })
            .await
            .expect("partnership");
        db
    }

    async fn order(db: &crate::Database, id: &str) {
        let shipping = ShippingDetails {
            full_name: "Eric Mugisha".into(),
            phone: "+250722000111".into(),
            district: "Nyarugenge".into(),
            address: "KN 4 Ave".into(),
        };
        let number = format!("KORA-{id}");
        let item_id = format!("{id}-1");
        let mut tx = db.begin().await.expect("tx");
        OrderRepository::insert_order(
            &mut *tx,
            &NewOrder {
                id,
                order_number: &number,
                customer_id: "c-1",
                subtotal: 24_000,
                shipping_fee: 2_000,
                total: 26_000,
                shipping: &shipping,
                payment_method: PaymentMethod::MobileMoney,
                notes: None,
                created_at: at("2024-05-02T09:00:00Z"),
            },
        )
        .await
        .expect("order");
        // 2 x 12 000 retail on a 10 000 wholesale product, 10% commission.
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
                unit_price: 12_000,
                wholesale_price: 10_000,
                commission_bps: 1_000,
                commission_amount: 2_000,
                line_total: 24_000,
            },
        )
        .await
        .expect("item");
        tx.commit().await.expect("commit");
    }

    #[tokio::test]
    async fn seller_dashboards_exclude_cancelled_orders() {
        let db = seeded().await;
        order(&db, "o-1").await;
        order(&db, "o-2").await;
        OrderRepository::transition(
            db.pool(),
            "o-2",
            OrderStatus::Pending,
            OrderStatus::Cancelled,
            at("2024-05-02T10:00:00Z"),
        )
        .await
        .expect("cancel");

        let wholesaler = db.stats().wholesaler("w-1").await.expect("stats");
        assert_eq!(wholesaler.product_count, 2);
        assert_eq!(wholesaler.low_stock_products, 1);
        assert_eq!(wholesaler.order_count, 2);
        assert_eq!(wholesaler.payout, 18_000);
        assert_eq!(wholesaler.active_partnerships, 1);

        let dropshipper = db.stats().dropshipper("d-1").await.expect("stats");
        assert_eq!(dropshipper.earnings, 6_000);
        assert_eq!(dropshipper.active_partnerships, 1);

        let customer = db.stats().customer("c-1").await.expect("stats");
        assert_eq!(customer.total_spent, 26_000);
        assert_eq!(customer.orders_by_status.get("cancelled"), Some(&1));
    }

    #[tokio::test]
    async fn admin_overview_counts_everything() {
        let db = seeded().await;
        order(&db, "o-1").await;

        let stats = db.stats().admin().await.expect("stats");
        assert_eq!(stats.users_by_role.get("wholesaler"), Some(&1));
        assert_eq!(stats.users_by_role.get("customer"), Some(&1));
        assert_eq!(stats.total_products, 2);
        assert_eq!(stats.active_products, 2);
        assert_eq!(stats.orders_by_status.get("pending"), Some(&1));
        assert_eq!(stats.gross_revenue, 0, "nothing delivered yet");
        assert_eq!(stats.pending_partnerships, 0);
    }
}

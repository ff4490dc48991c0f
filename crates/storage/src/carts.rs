use chrono::{DateTime, Utc};
use kora_core::types::LineIssue;
use serde::Serialize;
use sqlx::{SqliteExecutor, SqlitePool};
use thiserror::Error;

use crate::to_rfc3339;

/// Cart lines joined with the product, the listing they were added through and
/// the commission of the partnership backing that listing.
const CART_LINES: &str = r#"
SELECT c.id,
       c.product_id,
       c.listing_id,
       c.quantity,
       p.name AS product_name,
       p.image_url,
       p.status AS product_status,
       p.stock,
       p.price AS wholesale_price,
       p.wholesaler_id,
       l.retail_price,
       l.dropshipper_id,
       pa.commission_bps
  FROM cart_items AS c
  JOIN products AS p ON p.id = c.product_id
  LEFT JOIN storefront_listings AS l ON l.id = c.listing_id
  LEFT JOIN partnerships AS pa
    ON pa.wholesaler_id = p.wholesaler_id
   AND pa.dropshipper_id = l.dropshipper_id
   AND pa.status = 'active'
 WHERE c.user_id = ?
 ORDER BY c.created_at ASC, c.id ASC
"#;

/// Repository for shopping carts.
#[derive(Clone)]
pub struct CartRepository {
    pool: SqlitePool,
}

impl CartRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn lines(&self, user_id: &str) -> Result<Vec<CartLineRecord>, CartError> {
        Self::lines_with(&self.pool, user_id).await
    }

    /// Same as [`CartRepository::lines`] but usable inside a transaction.
    pub async fn lines_with(
        executor: impl SqliteExecutor<'_>,
        user_id: &str,
    ) -> Result<Vec<CartLineRecord>, CartError> {
        let rows = sqlx::query_as::<_, CartLineRecord>(CART_LINES)
            .bind(user_id)
            .fetch_all(executor)
            .await?;
        Ok(rows)
    }

    /// Quantity already in the cart for the same product bought the same way.
    pub async fn existing_quantity(
        &self,
        user_id: &str,
        product_id: &str,
        listing_id: Option<&str>,
    ) -> Result<i64, CartError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT quantity FROM cart_items WHERE user_id = ? AND product_id = ? AND listing_id IS ?",
        )
        .bind(user_id)
        .bind(product_id)
        .bind(listing_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(quantity,)| quantity).unwrap_or(0))
    }

    /// Sets the quantity of the (product, listing) line, creating it when absent.
    /// Returns the id of the line.
    pub async fn upsert_line(&self, line: &CartLineUpsert<'_>) -> Result<String, CartError> {
        let mut tx = self.pool.begin().await?;
        let now = to_rfc3339(line.now);

        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT id FROM cart_items WHERE user_id = ? AND product_id = ? AND listing_id IS ?",
        )
        .bind(line.user_id)
        .bind(line.product_id)
        .bind(line.listing_id)
        .fetch_optional(&mut *tx)
        .await?;

        let id = match existing {
            Some((id,)) => {
                sqlx::query("UPDATE cart_items SET quantity = ?, updated_at = ? WHERE id = ?")
                    .bind(line.quantity)
                    .bind(&now)
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
                id
            }
            None => {
                sqlx::query(
                    "INSERT INTO cart_items (id, user_id, product_id, listing_id, quantity, created_at, updated_at) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(line.new_id)
                .bind(line.user_id)
                .bind(line.product_id)
                .bind(line.listing_id)
                .bind(line.quantity)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                line.new_id.to_string()
            }
        };

        tx.commit().await?;
        Ok(id)
    }

    pub async fn fetch_item(
        &self,
        user_id: &str,
        item_id: &str,
    ) -> Result<Option<CartItemRecord>, CartError> {
        let row = sqlx::query_as::<_, CartItemRecord>(
            "SELECT id, product_id, listing_id, quantity FROM cart_items WHERE user_id = ? AND id = ?",
        )
        .bind(user_id)
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn set_quantity(
        &self,
        user_id: &str,
        item_id: &str,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> Result<(), CartError> {
        let result = sqlx::query(
            "UPDATE cart_items SET quantity = ?, updated_at = ? WHERE user_id = ? AND id = ?",
        )
        .bind(quantity)
        .bind(to_rfc3339(now))
        .bind(user_id)
        .bind(item_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CartError::ItemNotFound);
        }
        Ok(())
    }

    pub async fn remove_item(&self, user_id: &str, item_id: &str) -> Result<(), CartError> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = ? AND id = ?")
            .bind(user_id)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CartError::ItemNotFound);
        }
        Ok(())
    }

    pub async fn clear(&self, user_id: &str) -> Result<u64, CartError> {
        Self::clear_with(&self.pool, user_id).await
    }

    pub async fn clear_with(
        executor: impl SqliteExecutor<'_>,
        user_id: &str,
    ) -> Result<u64, CartError> {
        let result = sqlx::query("DELETE FROM cart_items WHERE user_id = ?")
            .bind(user_id)
            .execute(executor)
            .await?;
        Ok(result.rows_affected())
    }
}

/// Parameters for [`CartRepository::upsert_line`].
pub struct CartLineUpsert<'a> {
    pub new_id: &'a str,
    pub user_id: &'a str,
    pub product_id: &'a str,
    pub listing_id: Option<&'a str>,
    pub quantity: i64,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CartItemRecord {
    pub id: String,
    pub product_id: String,
    pub listing_id: Option<String>,
    pub quantity: i64,
}

/// A cart line with everything needed to price it and to check it out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct CartLineRecord {
    pub id: String,
    pub product_id: String,
    pub listing_id: Option<String>,
    pub quantity: i64,
    pub product_name: String,
    pub image_url: Option<String>,
    #[serde(skip)]
    pub product_status: String,
    pub stock: i64,
    pub wholesale_price: i64,
    pub wholesaler_id: String,
    #[serde(skip)]
    pub retail_price: Option<i64>,
    pub dropshipper_id: Option<String>,
    #[serde(skip)]
    pub commission_bps: Option<i64>,
}

impl CartLineRecord {
    /// Listing purchases are charged the retail price, direct purchases the wholesale price.
    pub fn unit_price(&self) -> i64 {
        self.retail_price.unwrap_or(self.wholesale_price)
    }

    /// Commission snapshot for checkout; zero for direct purchases.
    pub fn commission_bps(&self) -> i64 {
        self.commission_bps.unwrap_or(0)
    }

    /// First problem preventing checkout of this line, if any.
    pub fn issue(&self) -> Option<LineIssue> {
        if self.product_status != "active" {
            return Some(LineIssue::ProductUnavailable);
        }
        if self.listing_id.is_some() {
            match (self.retail_price, self.commission_bps) {
                // A wholesale price raised above the listing's retail price suspends the listing.
                (Some(retail), Some(_)) if retail >= self.wholesale_price => {}
                _ => return Some(LineIssue::ListingUnavailable),
            }
        }
        if self.quantity > self.stock {
            return Some(LineIssue::InsufficientStock);
        }
        None
    }
}

#[derive(Debug, Error)]
pub enum CartError {
    #[error("cart item not found")]
    ItemNotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, insert_product, insert_profile, setup_db};
    use crate::{NewListing, NewPartnership};
    use kora_core::types::{PartnershipStatus, Role};

    async fn seeded() -> crate::Database {
        let db = setup_db().await;
        insert_profile(&db, "w-1", Role::Wholesaler).await;
        insert_profile(&db, "d-1", Role::Dropshipper).await;
        insert_profile(&db, "c-1", Role::Customer).await;
        insert_product(&db, "p-1", "w-1", 10_000, 4).await;
        db.listings()
            .insert(&NewListing {
                id: "l-1".into(),
                dropshipper_id: "d-1".into(),
                product_id: "p-1".into(),
                retail_price: 13_000,
                created_at: at("2024-05-01T10:00:00Z"),
            })
            .await
            .expect("listing");
        db
    }

    fn upsert<'a>(id: &'a str, listing: Option<&'a str>, quantity: i64) -> CartLineUpsert<'a> {
        CartLineUpsert {
            new_id: id,
            user_id: "c-1",
            product_id: "p-1",
            listing_id: listing,
            quantity,
            now: at("2024-05-02T10:00:00Z"),
        }
    }

    #[tokio::test]
    async fn upsert_merges_same_purchase_path() {
        let db = seeded().await;
        let repo = db.carts();

        let first = repo.upsert_line(&upsert("ci-1", None, 1)).await.expect("insert");
        let second = repo.upsert_line(&upsert("ci-2", None, 3)).await.expect("update");
        assert_eq!(first, "ci-1");
        assert_eq!(second, "ci-1");
        assert_eq!(repo.existing_quantity("c-1", "p-1", None).await.unwrap(), 3);

        let via_listing = repo
            .upsert_line(&upsert("ci-3", Some("l-1"), 1))
            .await
            .expect("listing line");
        assert_eq!(via_listing, "ci-3");
        assert_eq!(repo.lines("c-1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn listing_line_is_unavailable_without_partnership() {
        let db = seeded().await;
        let repo = db.carts();
        repo.upsert_line(&upsert("ci-1", Some("l-1"), 1))
            .await
            .expect("insert");

        let lines = repo.lines("c-1").await.expect("lines");
        assert_eq!(lines[0].unit_price(), 13_000);
        assert_eq!(lines[0].issue(), Some(LineIssue::ListingUnavailable));

        db.partnerships()
            .insert(&NewPartnership {
                id: "pa-1".into(),
                wholesaler_id: "w-1".into(),
                dropshipper_id: "d-1".into(),
                commission_bps: 500,
                status: PartnershipStatus::Active,
                message: None,
                created_at: at("2024-05-01T09:00:00Z"),
            })
            .await
            .expect("partnership");

        let lines = repo.lines("c-1").await.expect("lines");
        assert_eq!(lines[0].issue(), None);
        assert_eq!(lines[0].commission_bps(), 500);
        assert_eq!(lines[0].dropshipper_id.as_deref(), Some("d-1"));
    }

    #[tokio::test]
    async fn listing_below_wholesale_price_is_unavailable() {
        let db = seeded().await;
        db.partnerships()
            .insert(&NewPartnership {
                id: "pa-1".into(),
                wholesaler_id: "w-1".into(),
                dropshipper_id: "d-1".into(),
                commission_bps: 500,
                status: PartnershipStatus::Active,
                message: None,
                created_at: at("2024-05-01T09:00:00Z"),
            })
            .await
            .expect("partnership");
        let repo = db.carts();
        repo.upsert_line(&upsert("ci-1", Some("l-1"), 1))
            .await
            .expect("insert");

        let raise = |price| crate::ProductUpdate {
            price: Some(price),
            ..crate::ProductUpdate::default()
        };
        db.products()
            .update("p-1", &raise(13_000), at("2024-05-03T00:00:00Z"))
            .await
            .expect("price at retail");
        assert_eq!(repo.lines("c-1").await.unwrap()[0].issue(), None);

        db.products()
            .update("p-1", &raise(13_001), at("2024-05-03T00:00:00Z"))
            .await
            .expect("price above retail");
        assert_eq!(
            repo.lines("c-1").await.unwrap()[0].issue(),
            Some(LineIssue::ListingUnavailable)
        );
    }

    #[tokio::test]
    async fn stock_shortfall_is_flagged() {
        let db = seeded().await;
        let repo = db.carts();
        repo.upsert_line(&upsert("ci-1", None, 5)).await.expect("insert");

        let lines = repo.lines("c-1").await.expect("lines");
        assert_eq!(lines[0].unit_price(), 10_000);
        assert_eq!(lines[0].issue(), Some(LineIssue::InsufficientStock));
    }

    #[tokio::test]
    async fn deleting_listing_cascades_to_cart() {
        let db = seeded().await;
        let repo = db.carts();
        repo.upsert_line(&upsert("ci-1", Some("l-1"), 1))
            .await
            .expect("insert");
        db.listings().delete("l-1").await.expect("delete listing");
        assert!(repo.lines("c-1").await.expect("lines").is_empty());
    }

    #[tokio::test]
    async fn items_are_scoped_to_their_owner() {
        let db = seeded().await;
        insert_profile(&db, "c-2", Role::Customer).await;
        let repo = db.carts();
        repo.upsert_line(&upsert("ci-1", None, 1)).await.expect("insert");

        assert!(repo.fetch_item("c-2", "ci-1").await.unwrap().is_none());
        assert!(matches!(
            repo.remove_item("c-2", "ci-1").await,
            Err(CartError::ItemNotFound)
        ));
        repo.set_quantity("c-1", "ci-1", 2, at("2024-05-03T00:00:00Z"))
            .await
            .expect("owner can update");
        assert_eq!(repo.clear("c-1").await.unwrap(), 1);
    }
}

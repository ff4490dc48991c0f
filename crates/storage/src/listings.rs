use chrono::{DateTime, Utc};
use kora_core::types::{Listing, Product, UnknownVariant};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::{is_unique_violation, to_rfc3339};

/// Listing joined with its product and whether the supplying partnership is still active.
const LISTING_SELECT: &str = r#"
SELECT l.id AS listing_id,
       l.dropshipper_id,
       l.retail_price,
       l.created_at AS listing_created_at,
       l.updated_at AS listing_updated_at,
       p.id, p.wholesaler_id, p.name, p.description, p.category, p.price, p.stock,
       p.image_url, p.status, p.created_at, p.updated_at,
       EXISTS (
           SELECT 1 FROM partnerships AS pa
            WHERE pa.wholesaler_id = p.wholesaler_id
              AND pa.dropshipper_id = l.dropshipper_id
              AND pa.status = 'active'
       ) AS partnered
  FROM storefront_listings AS l
  JOIN products AS p ON p.id = l.product_id
"#;

/// Repository for dropshipper storefront listings.
#[derive(Clone)]
pub struct ListingRepository {
    pool: SqlitePool,
}

impl ListingRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, listing: &NewListing) -> Result<Listing, ListingError> {
        let created_at = to_rfc3339(listing.created_at);
        sqlx::query(
            "INSERT INTO storefront_listings (id, dropshipper_id, product_id, retail_price, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&listing.id)
        .bind(&listing.dropshipper_id)
        .bind(&listing.product_id)
        .bind(listing.retail_price)
        .bind(&created_at)
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                ListingError::Duplicate
            } else {
                ListingError::Database(err)
            }
        })?;

        self.fetch(&listing.id).await?.ok_or(ListingError::NotFound)
    }

    pub async fn fetch(&self, id: &str) -> Result<Option<Listing>, ListingError> {
        let row = sqlx::query_as::<_, ListingRow>(&format!("{LISTING_SELECT} WHERE l.id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(ListingRow::into_domain).transpose()
    }

    /// Lightweight lookup used for ownership checks.
    pub async fn fetch_record(&self, id: &str) -> Result<Option<ListingRecord>, ListingError> {
        let row = sqlx::query_as::<_, ListingRecord>(
            "SELECT id, dropshipper_id, product_id, retail_price FROM storefront_listings WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Lists a dropshipper's storefront. `available_only` hides listings that cannot be bought.
    pub async fn list_for_dropshipper(
        &self,
        dropshipper_id: &str,
        available_only: bool,
    ) -> Result<Vec<Listing>, ListingError> {
        let rows = sqlx::query_as::<_, ListingRow>(&format!(
            "{LISTING_SELECT} WHERE l.dropshipper_id = ? ORDER BY l.created_at DESC, l.id"
        ))
        .bind(dropshipper_id)
        .fetch_all(&self.pool)
        .await?;

        let listings = rows
            .into_iter()
            .map(ListingRow::into_domain)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(listings
            .into_iter()
            .filter(|listing| !available_only || listing.available)
            .collect())
    }

    pub async fn update_price(
        &self,
        id: &str,
        retail_price: i64,
        now: DateTime<Utc>,
    ) -> Result<Listing, ListingError> {
        let result = sqlx::query(
            "UPDATE storefront_listings SET retail_price = ?, updated_at = ? WHERE id = ?",
        )
        .bind(retail_price)
        .bind(to_rfc3339(now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ListingError::NotFound);
        }
        self.fetch(id).await?.ok_or(ListingError::NotFound)
    }

    /// Deletes a listing; cart lines bought through it are removed by cascade.
    pub async fn delete(&self, id: &str) -> Result<(), ListingError> {
        let result = sqlx::query("DELETE FROM storefront_listings WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ListingError::NotFound);
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NewListing {
    pub id: String,
    pub dropshipper_id: String,
    pub product_id: String,
    pub retail_price: i64,
    pub created_at: DateTime<Utc>,
}

/// Bare listing row without the product join.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ListingRecord {
    pub id: String,
    pub dropshipper_id: String,
    pub product_id: String,
    pub retail_price: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct ListingRow {
    listing_id: String,
    dropshipper_id: String,
    retail_price: i64,
    listing_created_at: DateTime<Utc>,
    listing_updated_at: DateTime<Utc>,
    id: String,
    wholesaler_id: String,
    name: String,
    description: String,
    category: String,
    price: i64,
    stock: i64,
    image_url: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    partnered: bool,
}

impl ListingRow {
    fn into_domain(self) -> Result<Listing, ListingError> {
        let product = Product {
            status: self.status.parse()?,
            id: self.id,
            wholesaler_id: self.wholesaler_id,
            name: self.name,
            description: self.description,
            category: self.category,
            price: self.price,
            stock: self.stock,
            image_url: self.image_url,
            created_at: self.created_at,
            updated_at: self.updated_at,
        };
        let available = self.partnered
            && product.is_active()
            && product.stock > 0
            && self.retail_price >= product.price;
        Ok(Listing {
            id: self.listing_id,
            dropshipper_id: self.dropshipper_id,
            product,
            retail_price: self.retail_price,
            available,
            created_at: self.listing_created_at,
            updated_at: self.listing_updated_at,
        })
    }
}

#[derive(Debug, Error)]
pub enum ListingError {
    #[error("listing not found")]
    NotFound,
    #[error("product is already listed in this storefront")]
    Duplicate,
    #[error("stored listing is invalid: {0}")]
    Corrupt(#[from] UnknownVariant),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

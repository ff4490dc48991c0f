use chrono::{DateTime, Utc};
use kora_core::types::{Product, ProductStatus, UnknownVariant};
use sqlx::{QueryBuilder, Sqlite, SqliteExecutor, SqlitePool};
use thiserror::Error;

use crate::{is_foreign_key_violation, to_rfc3339};

const PRODUCT_COLUMNS: &str = "id, wholesaler_id, name, description, category, price, stock, image_url, status, created_at, updated_at";
pub const DEFAULT_PAGE_SIZE: i64 = 20;
pub const MAX_PAGE_SIZE: i64 = 100;

/// Repository for the wholesaler product catalog.
#[derive(Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, product: &NewProduct) -> Result<Product, ProductError> {
        let created_at = to_rfc3339(product.created_at);
        sqlx::query(
            "INSERT INTO products \
             (id, wholesaler_id, name, description, category, price, stock, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 'active', ?, ?)",
        )
        .bind(&product.id)
        .bind(&product.wholesaler_id)
        .bind(&product.name)
        .bind(&product.description)
        .bind(&product.category)
        .bind(product.price)
        .bind(product.stock)
        .bind(&created_at)
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_foreign_key_violation(&err) {
                ProductError::UnknownWholesaler
            } else {
                ProductError::Database(err)
            }
        })?;

        self.fetch(&product.id).await?.ok_or(ProductError::NotFound)
    }

    pub async fn fetch(&self, id: &str) -> Result<Option<Product>, ProductError> {
        fetch_product(&self.pool, id).await
    }

    /// Searches the catalog. Results are ordered newest first.
    pub async fn list(&self, filter: &ProductFilter) -> Result<Vec<Product>, ProductError> {
        let mut builder: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE 1 = 1"));

        if !filter.include_inactive {
            builder.push(" AND status = 'active'");
        }
        if let Some(ref wholesaler_id) = filter.wholesaler_id {
            builder.push(" AND wholesaler_id = ").push_bind(wholesaler_id.clone());
        }
        if let Some(ref category) = filter.category {
            builder
                .push(" AND lower(category) = lower(")
                .push_bind(category.clone())
                .push(")");
        }
        if let Some(ref search) = filter.search {
            let pattern = format!("%{}%", escape_like(&search.to_lowercase()));
            builder
                .push(" AND (lower(name) LIKE ")
                .push_bind(pattern.clone())
                .push(" ESCAPE '\\' OR lower(description) LIKE ")
                .push_bind(pattern)
                .push(" ESCAPE '\\')");
        }
        if let Some(min_price) = filter.min_price {
            builder.push(" AND price >= ").push_bind(min_price);
        }
        if let Some(max_price) = filter.max_price {
            builder.push(" AND price <= ").push_bind(max_price);
        }

        builder
            .push(" ORDER BY created_at DESC, id LIMIT ")
            .push_bind(filter.page_size())
            .push(" OFFSET ")
            .push_bind(filter.offset.max(0));

        let rows = builder
            .build_query_as::<ProductRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(ProductRow::into_domain).collect()
    }

    /// Applies a partial update; `None` fields keep their stored value.
    pub async fn update(
        &self,
        id: &str,
        update: &ProductUpdate,
        now: DateTime<Utc>,
    ) -> Result<Product, ProductError> {
        let result = sqlx::query(
            "UPDATE products \
                SET name = COALESCE(?, name), \
                    description = COALESCE(?, description), \
                    category = COALESCE(?, category), \
                    price = COALESCE(?, price), \
                    stock = COALESCE(?, stock), \
                    status = COALESCE(?, status), \
                    updated_at = ? \
              WHERE id = ?",
        )
        .bind(&update.name)
        .bind(&update.description)
        .bind(&update.category)
        .bind(update.price)
        .bind(update.stock)
        .bind(update.status.map(ProductStatus::as_str))
        .bind(to_rfc3339(now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ProductError::NotFound);
        }
        self.fetch(id).await?.ok_or(ProductError::NotFound)
    }

    pub async fn set_image_url(
        &self,
        id: &str,
        image_url: &str,
        now: DateTime<Utc>,
    ) -> Result<Product, ProductError> {
        let result = sqlx::query("UPDATE products SET image_url = ?, updated_at = ? WHERE id = ?")
            .bind(image_url)
            .bind(to_rfc3339(now))
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ProductError::NotFound);
        }
        self.fetch(id).await?.ok_or(ProductError::NotFound)
    }

    /// Distinct categories of products currently on sale.
    pub async fn categories(&self) -> Result<Vec<String>, ProductError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT category FROM products WHERE status = 'active' ORDER BY category",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(category,)| category).collect())
    }

    /// Takes `quantity` units out of stock, failing when not enough remain.
    pub async fn decrement_stock(
        executor: impl SqliteExecutor<'_>,
        id: &str,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> Result<(), ProductError> {
        let result = sqlx::query(
            "UPDATE products SET stock = stock - ?, updated_at = ? WHERE id = ? AND stock >= ?",
        )
        .bind(quantity)
        .bind(to_rfc3339(now))
        .bind(id)
        .bind(quantity)
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ProductError::InsufficientStock);
        }
        Ok(())
    }

    /// Returns units to stock after a cancellation.
    pub async fn restore_stock(
        executor: impl SqliteExecutor<'_>,
        id: &str,
        quantity: i64,
        now: DateTime<Utc>,
    ) -> Result<(), ProductError> {
        sqlx::query("UPDATE products SET stock = stock + ?, updated_at = ? WHERE id = ?")
            .bind(quantity)
            .bind(to_rfc3339(now))
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }
}

pub(crate) async fn fetch_product(
    executor: impl SqliteExecutor<'_>,
    id: &str,
) -> Result<Option<Product>, ProductError> {
    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?;

    row.map(ProductRow::into_domain).transpose()
}

#[derive(Debug, Clone)]
pub struct NewProduct {
    pub id: String,
    pub wholesaler_id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub price: i64,
    pub stock: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Option<i64>,
    pub stock: Option<i64>,
    pub status: Option<ProductStatus>,
}

/// Catalog search parameters.
#[derive(Debug, Clone, Default)]
pub struct ProductFilter {
    pub search: Option<String>,
    pub category: Option<String>,
    pub wholesaler_id: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub include_inactive: bool,
    pub limit: Option<i64>,
    pub offset: i64,
}

impl ProductFilter {
    pub fn page_size(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ProductRow {
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
}

impl ProductRow {
    pub(crate) fn into_domain(self) -> Result<Product, ProductError> {
        Ok(Product {
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
        })
    }
}

/// Escapes `%`, `_` and the backslash so user input matches literally under `ESCAPE`.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[derive(Debug, Error)]
pub enum ProductError {
    #[error("product not found")]
    NotFound,
    #[error("wholesaler does not exist")]
    UnknownWholesaler,
    #[error("not enough stock")]
    InsufficientStock,
    #[error("stored product is invalid: {0}")]
    Corrupt(#[from] UnknownVariant),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

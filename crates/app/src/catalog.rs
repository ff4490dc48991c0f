use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use kora_core::{
    types::{Product, ProductStatus, Role},
    validation,
};
use kora_storage::{NewProduct, ProductError, ProductFilter, ProductUpdate};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use ulid::Ulid;
use uuid::Uuid;

use crate::auth::{record_platform_call, AuthUser};
use crate::problem::{bad_gateway, forbidden, internal_error, not_found, ProblemResponse};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    pub q: Option<String>,
    pub category: Option<String>,
    pub wholesaler_id: Option<String>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Debug, Serialize)]
pub struct ProductPage {
    pub items: Vec<Product>,
    pub limit: i64,
    pub offset: i64,
}

pub async fn list_products(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Query(query): Query<ProductQuery>,
) -> Result<Json<ProductPage>, ProblemResponse> {
    // Inactive products are only shown to admins and to a wholesaler browsing their own catalog.
    let include_inactive = query.include_inactive
        && user.as_ref().is_some_and(|user| {
            user.role() == Role::Admin
                || (user.role() == Role::Wholesaler
                    && query.wholesaler_id.as_deref() == Some(user.id()))
        });

    let filter = ProductFilter {
        search: query.q.filter(|q| !q.trim().is_empty()),
        category: query.category.filter(|c| !c.trim().is_empty()),
        wholesaler_id: query.wholesaler_id,
        min_price: query.min_price,
        max_price: query.max_price,
        include_inactive,
        limit: query.limit,
        offset: query.offset.max(0),
    };
    let items = state
        .storage()
        .products()
        .list(&filter)
        .await
        .map_err(product_problem)?;

    Ok(Json(ProductPage {
        items,
        limit: filter.page_size(),
        offset: filter.offset,
    }))
}

pub async fn get_product(
    State(state): State<AppState>,
    user: Option<AuthUser>,
    Path(product_id): Path<String>,
) -> Result<Json<Product>, ProblemResponse> {
    let product = fetch_product(&state, &product_id).await?;
    let can_see_inactive = user
        .as_ref()
        .is_some_and(|user| user.actor().can_manage_product(&product.wholesaler_id));
    if !product.is_active() && !can_see_inactive {
        return Err(product_missing());
    }
    Ok(Json(product))
}

pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, ProblemResponse> {
    let categories = state
        .storage()
        .products()
        .categories()
        .await
        .map_err(product_problem)?;
    Ok(Json(categories))
}

#[derive(Debug, Deserialize)]
pub struct CreateProductBody {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub category: String,
    pub price: i64,
    pub stock: i64,
}

pub async fn create_product(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateProductBody>,
) -> Result<(StatusCode, Json<Product>), ProblemResponse> {
    user.require_role(Role::Wholesaler)?;

    let record = NewProduct {
        id: Uuid::new_v4().to_string(),
        wholesaler_id: user.id().to_string(),
        name: validation::required_text("name", &body.name)?,
        description: validation::optional_text("description", body.description.as_deref())?
            .unwrap_or_default(),
        category: validation::required_text("category", &body.category)?,
        price: validation::price("price", body.price)?,
        stock: validation::stock(body.stock)?,
        created_at: state.now(),
    };
    let product = state
        .storage()
        .products()
        .insert(&record)
        .await
        .map_err(product_problem)?;

    info!(stage = "catalog", product_id = %product.id, wholesaler_id = %product.wholesaler_id, "product created");
    Ok((StatusCode::CREATED, Json(product)))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateProductBody {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price: Option<i64>,
    pub stock: Option<i64>,
    pub status: Option<ProductStatus>,
}

pub async fn update_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<String>,
    Json(body): Json<UpdateProductBody>,
) -> Result<Json<Product>, ProblemResponse> {
    let product = fetch_product(&state, &product_id).await?;
    ensure_manager(&user, &product)?;

    let update = ProductUpdate {
        name: body
            .name
            .as_deref()
            .map(|name| validation::required_text("name", name))
            .transpose()?,
        description: body
            .description
            .as_deref()
            .map(|text| validation::optional_text("description", Some(text)).map(Option::unwrap_or_default))
            .transpose()?,
        category: body
            .category
            .as_deref()
            .map(|category| validation::required_text("category", category))
            .transpose()?,
        price: body
            .price
            .map(|price| validation::price("price", price))
            .transpose()?,
        stock: body.stock.map(validation::stock).transpose()?,
        status: body.status,
    };
    let product = state
        .storage()
        .products()
        .update(&product_id, &update, state.now())
        .await
        .map_err(product_problem)?;
    Ok(Json(product))
}

/// Soft delete: the product stays referenced by past orders.
pub async fn delete_product(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    let product = fetch_product(&state, &product_id).await?;
    ensure_manager(&user, &product)?;

    state
        .storage()
        .products()
        .update(
            &product_id,
            &ProductUpdate {
                status: Some(ProductStatus::Inactive),
                ..ProductUpdate::default()
            },
            state.now(),
        )
        .await
        .map_err(product_problem)?;

    info!(stage = "catalog", product_id = %product_id, actor = %user.id(), "product deactivated");
    Ok(StatusCode::NO_CONTENT)
}

/// Raw image body; the content type header selects the stored extension.
pub async fn upload_image(
    State(state): State<AppState>,
    user: AuthUser,
    Path(product_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Product>, ProblemResponse> {
    let product = fetch_product(&state, &product_id).await?;
    ensure_manager(&user, &product)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let extension = validation::image_extension(content_type)?;
    validation::image_size(body.len())?;

    let path = format!("products/{product_id}/{}.{extension}", Ulid::new());
    let stored = state
        .objects()
        .upload(&path, content_type, body.to_vec())
        .await;
    record_platform_call("upload", stored.is_ok());
    let stored = stored.map_err(|err| {
        error!(stage = "catalog", product_id = %product_id, error = %err, "image upload failed");
        bad_gateway("image storage is unavailable")
    })?;

    match state
        .storage()
        .products()
        .set_image_url(&product_id, stored.public_url.as_str(), state.now())
        .await
    {
        Ok(product) => Ok(Json(product)),
        Err(err) => {
            if let Err(cleanup) = state.objects().remove(&stored.path).await {
                warn!(stage = "catalog", path = %stored.path, error = %cleanup, "orphaned product image");
            }
            Err(product_problem(err))
        }
    }
}

fn ensure_manager(user: &AuthUser, product: &Product) -> Result<(), ProblemResponse> {
    if user.actor().can_manage_product(&product.wholesaler_id) {
        Ok(())
    } else {
        Err(forbidden("only the owning wholesaler can change this product"))
    }
}

pub(crate) async fn fetch_product(state: &AppState, id: &str) -> Result<Product, ProblemResponse> {
    state
        .storage()
        .products()
        .fetch(id)
        .await
        .map_err(product_problem)?
        .ok_or_else(product_missing)
}

fn product_missing() -> ProblemResponse {
    not_found("product_not_found", "product does not exist")
}

pub(crate) fn product_problem(err: ProductError) -> ProblemResponse {
    match err {
        ProductError::NotFound => product_missing(),
        ProductError::UnknownWholesaler => forbidden("wholesaler profile is missing"),
        other => {
            error!(stage = "catalog", error = %other, "product storage failure");
            internal_error("failed to access the catalog")
        }
    }
}

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use kora_core::{
    types::{Listing, Role},
    validation::{self, ValidationError},
};
use kora_storage::{ListingError, NewListing, PartnershipRepository};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::catalog::fetch_product;
use crate::problem::{conflict, forbidden, internal_error, not_found, ProblemResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateListingBody {
    pub product_id: String,
    pub retail_price: i64,
}

pub async fn create_listing(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<CreateListingBody>,
) -> Result<(StatusCode, Json<Listing>), ProblemResponse> {
    user.require_role(Role::Dropshipper)?;

    let product = fetch_product(&state, &body.product_id).await?;
    if !product.is_active() {
        return Err(conflict("product_inactive", "this product is no longer on sale"));
    }
    let partnership =
        PartnershipRepository::find_active(state.storage().pool(), &product.wholesaler_id, user.id())
            .await
            .map_err(|err| {
                error!(stage = "storefront", error = %err, "failed to look up partnership");
                internal_error("failed to verify partnership")
            })?;
    if partnership.is_none() {
        return Err(ProblemResponse::new(
            StatusCode::FORBIDDEN,
            "partnership_required",
            "an active partnership with this wholesaler is required",
        ));
    }
    let retail_price = retail_price(body.retail_price, product.price)?;

    let listing = state
        .storage()
        .listings()
        .insert(&NewListing {
            id: Uuid::new_v4().to_string(),
            dropshipper_id: user.id().to_string(),
            product_id: product.id.clone(),
            retail_price,
            created_at: state.now(),
        })
        .await
        .map_err(listing_problem)?;

    info!(stage = "storefront", listing_id = %listing.id, product_id = %product.id, dropshipper_id = %user.id(), "listing created");
    Ok((StatusCode::CREATED, Json(listing)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateListingBody {
    pub retail_price: i64,
}

pub async fn update_listing(
    State(state): State<AppState>,
    user: AuthUser,
    Path(listing_id): Path<String>,
    Json(body): Json<UpdateListingBody>,
) -> Result<Json<Listing>, ProblemResponse> {
    let listing = owned_listing(&state, &user, &listing_id).await?;
    let retail_price = retail_price(body.retail_price, listing.product.price)?;

    let listing = state
        .storage()
        .listings()
        .update_price(&listing_id, retail_price, state.now())
        .await
        .map_err(listing_problem)?;
    Ok(Json(listing))
}

pub async fn delete_listing(
    State(state): State<AppState>,
    user: AuthUser,
    Path(listing_id): Path<String>,
) -> Result<StatusCode, ProblemResponse> {
    owned_listing(&state, &user, &listing_id).await?;
    state
        .storage()
        .listings()
        .delete(&listing_id)
        .await
        .map_err(listing_problem)?;
    Ok(StatusCode::NO_CONTENT)
}

/// The caller's storefront, including listings that currently cannot be bought.
pub async fn my_storefront(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<Listing>>, ProblemResponse> {
    user.require_role(Role::Dropshipper)?;
    let listings = state
        .storage()
        .listings()
        .list_for_dropshipper(user.id(), false)
        .await
        .map_err(listing_problem)?;
    Ok(Json(listings))
}

#[derive(Debug, Serialize)]
pub struct PublicStorefront {
    pub dropshipper_id: String,
    pub name: String,
    pub listings: Vec<Listing>,
}

pub async fn public_storefront(
    State(state): State<AppState>,
    Path(dropshipper_id): Path<String>,
) -> Result<Json<PublicStorefront>, ProblemResponse> {
    let profile = state
        .storage()
        .profiles()
        .fetch(&dropshipper_id)
        .await
        .map_err(|err| {
            error!(stage = "storefront", error = %err, "failed to load dropshipper");
            internal_error("failed to load storefront")
        })?
        .filter(|profile| profile.role == Role::Dropshipper && profile.is_active())
        .ok_or_else(|| not_found("storefront_not_found", "storefront does not exist"))?;

    let listings = state
        .storage()
        .listings()
        .list_for_dropshipper(&dropshipper_id, true)
        .await
        .map_err(listing_problem)?;

    Ok(Json(PublicStorefront {
        dropshipper_id: profile.id,
        name: profile.business_name.unwrap_or(profile.full_name),
        listings,
    }))
}

/// Dropshippers never sell below the wholesale price.
fn retail_price(value: i64, wholesale_price: i64) -> Result<i64, ProblemResponse> {
    let value = validation::price("retail_price", value)?;
    if value < wholesale_price {
        return Err(ValidationError::new(
            "retail_price",
            format!("must be at least the wholesale price of {wholesale_price} RWF"),
        )
        .into());
    }
    Ok(value)
}

async fn owned_listing(
    state: &AppState,
    user: &AuthUser,
    listing_id: &str,
) -> Result<Listing, ProblemResponse> {
    let listing = state
        .storage()
        .listings()
        .fetch(listing_id)
        .await
        .map_err(listing_problem)?
        .ok_or_else(listing_missing)?;
    if listing.dropshipper_id != user.id() {
        return Err(forbidden("this listing belongs to another storefront"));
    }
    Ok(listing)
}

fn listing_missing() -> ProblemResponse {
    not_found("listing_not_found", "listing does not exist")
}

pub(crate) fn listing_problem(err: ListingError) -> ProblemResponse {
    match err {
        ListingError::NotFound => listing_missing(),
        ListingError::Duplicate => conflict("listing_exists", "this product is already in your storefront"),
        other => {
            error!(stage = "storefront", error = %other, "listing storage failure");
            internal_error("failed to access storefront listings")
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::state::test_support::TestApp;
    use kora_core::types::Role;
    use serde_json::json;

    #[tokio::test]
    async fn listing_requires_partnership_and_markup() {
        let app = TestApp::new().await;
        app.profile("w-1", Role::Wholesaler).await;
        let dropshipper = app.profile("d-1", Role::Dropshipper).await;
        app.product("p-1", "w-1", 10_000, 5).await;

        let body = json!({ "product_id": "p-1", "retail_price": 12_000 });
        let (status, problem) = app
            .send("POST", "/storefront/listings", Some(&dropshipper), Some(body.clone()))
            .await;
        assert_eq!(status, 403);
        assert_eq!(problem["type"], "partnership_required");

        app.partnership("pa-1", "w-1", "d-1", 800).await;
        let (status, _) = app
            .send(
                "POST",
                "/storefront/listings",
                Some(&dropshipper),
                Some(json!({ "product_id": "p-1", "retail_price": 9_000 })),
            )
            .await;
        assert_eq!(status, 422);

        let (status, listing) = app
            .send("POST", "/storefront/listings", Some(&dropshipper), Some(body.clone()))
            .await;
        assert_eq!(status, 201);
        assert_eq!(listing["available"], true);

        let (status, _) = app
            .send("POST", "/storefront/listings", Some(&dropshipper), Some(body))
            .await;
        assert_eq!(status, 409);
    }

    #[tokio::test]
    async fn public_storefront_hides_unavailable_listings() {
        let app = TestApp::new().await;
        let wholesaler = app.profile("w-1", Role::Wholesaler).await;
        let dropshipper = app.profile("d-1", Role::Dropshipper).await;
        let other = app.profile("d-2", Role::Dropshipper).await;
        app.product("p-1", "w-1", 10_000, 5).await;
        app.product("p-2", "w-1", 2_000, 5).await;
        app.partnership("pa-1", "w-1", "d-1", 800).await;

        for product in ["p-1", "p-2"] {
            let (status, _) = app
                .send(
                    "POST",
                    "/storefront/listings",
                    Some(&dropshipper),
                    Some(json!({ "product_id": product, "retail_price": 12_000 })),
                )
                .await;
            assert_eq!(status, 201);
        }
        let (status, _) = app.send("DELETE", "/products/p-2", Some(&wholesaler), None).await;
        assert_eq!(status, 204);

        let (status, storefront) = app.send("GET", "/storefronts/d-1", None, None).await;
        assert_eq!(status, 200);
        let listings = storefront["listings"].as_array().unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0]["product"]["id"], "p-1");

        let (_, mine) = app.send("GET", "/storefront", Some(&dropshipper), None).await;
        assert_eq!(mine.as_array().unwrap().len(), 2);

        let listing_id = listings[0]["id"].as_str().unwrap().to_string();
        let (status, _) = app
            .send(
                "PATCH",
                &format!("/storefront/listings/{listing_id}"),
                Some(&other),
                Some(json!({ "retail_price": 15_000 })),
            )
            .await;
        assert_eq!(status, 403);
        let (status, updated) = app
            .send(
                "PATCH",
                &format!("/storefront/listings/{listing_id}"),
                Some(&dropshipper),
                Some(json!({ "retail_price": 15_000 })),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(updated["retail_price"], 15_000);

        let (status, _) = app.send("GET", "/storefronts/w-1", None, None).await;
        assert_eq!(status, 404);
    }
}

use axum::{
    extract::{Path, Query, State},
    Json,
};
use kora_core::types::{AccountStatus, Profile, Role};
use kora_storage::{AdminStats, CustomerStats, DropshipperStats, ProfileError, WholesalerStats};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::auth::AuthUser;
use crate::problem::{conflict, internal_error, not_found, ProblemResponse};
use crate::state::AppState;

/// Role-specific summary shown on the landing page after login.
#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Dashboard {
    Admin(AdminStats),
    Wholesaler(WholesalerStats),
    Dropshipper(DropshipperStats),
    Customer(CustomerStats),
}

pub async fn dashboard(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Dashboard>, ProblemResponse> {
    let stats = state.storage().stats();
    let dashboard = match user.role() {
        Role::Admin => stats.admin().await.map(Dashboard::Admin),
        Role::Wholesaler => stats.wholesaler(user.id()).await.map(Dashboard::Wholesaler),
        Role::Dropshipper => stats.dropshipper(user.id()).await.map(Dashboard::Dropshipper),
        Role::Customer => stats.customer(user.id()).await.map(Dashboard::Customer),
    }
    .map_err(|err| {
        error!(stage = "dashboard", user_id = %user.id(), error = %err, "failed to compute dashboard");
        internal_error("failed to compute dashboard")
    })?;
    Ok(Json(dashboard))
}

#[derive(Debug, Default, Deserialize)]
pub struct UsersQuery {
    pub role: Option<Role>,
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<UsersQuery>,
) -> Result<Json<Vec<Profile>>, ProblemResponse> {
    user.require_admin()?;
    let profiles = state
        .storage()
        .profiles()
        .list(query.role)
        .await
        .map_err(profile_problem)?;
    Ok(Json(profiles))
}

#[derive(Debug, Deserialize)]
pub struct UserStatusBody {
    pub status: AccountStatus,
}

pub async fn set_user_status(
    State(state): State<AppState>,
    user: AuthUser,
    Path(profile_id): Path<String>,
    Json(body): Json<UserStatusBody>,
) -> Result<Json<Profile>, ProblemResponse> {
    user.require_admin()?;
    if profile_id == user.id() && body.status == AccountStatus::Suspended {
        return Err(conflict("self_suspension", "admins cannot suspend themselves"));
    }

    let profile = state
        .storage()
        .profiles()
        .set_status(&profile_id, body.status, state.now())
        .await
        .map_err(profile_problem)?;
    info!(
        stage = "admin",
        profile_id = %profile.id,
        status = profile.status.as_str(),
        admin_id = %user.id(),
        "account status changed"
    );
    Ok(Json(profile))
}

fn profile_problem(err: ProfileError) -> ProblemResponse {
    match err {
        ProfileError::NotFound => not_found("user_not_found", "user does not exist"),
        other => {
            error!(stage = "admin", error = %other, "profile storage failure");
            internal_error("failed to access user accounts")
        }
    }
}

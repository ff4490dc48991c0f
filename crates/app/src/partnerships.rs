use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use kora_core::{
    partnership::{self, PartnershipRuleError},
    types::{Partnership, PartnershipStatus, Role},
    validation::{self, ValidationError},
};
use kora_storage::{NewPartnership, PartnershipError, PartnershipFilter};
use metrics::counter;
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::auth::AuthUser;
use crate::problem::{conflict, forbidden, internal_error, not_found, ProblemResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RequestBody {
    pub wholesaler_id: String,
    pub commission_bps: i64,
    #[serde(default)]
    pub message: Option<String>,
}

/// A dropshipper asks a wholesaler to resell their catalog.
pub async fn request(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<RequestBody>,
) -> Result<(StatusCode, Json<Partnership>), ProblemResponse> {
    user.require_role(Role::Dropshipper)?;
    let commission_bps = partnership::validate_commission(body.commission_bps).map_err(rule_problem)?;
    let message = validation::optional_text("message", body.message.as_deref())?;

    let wholesaler = state
        .storage()
        .profiles()
        .fetch(&body.wholesaler_id)
        .await
        .map_err(|err| {
            error!(stage = "partnerships", error = %err, "failed to load wholesaler");
            internal_error("failed to load wholesaler")
        })?
        .filter(|profile| profile.role == Role::Wholesaler && profile.is_active())
        .ok_or_else(|| not_found("wholesaler_not_found", "no active wholesaler with this id"))?;

    let created = state
        .storage()
        .partnerships()
        .insert(&NewPartnership {
            id: Uuid::new_v4().to_string(),
            wholesaler_id: wholesaler.id,
            dropshipper_id: user.id().to_string(),
            commission_bps,
            status: PartnershipStatus::Pending,
            message,
            created_at: state.now(),
        })
        .await
        .map_err(partnership_problem)?;

    info!(
        stage = "partnerships",
        partnership_id = %created.id,
        wholesaler_id = %created.wholesaler_id,
        dropshipper_id = %created.dropshipper_id,
        "partnership requested"
    );
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
pub struct RespondBody {
    pub accept: bool,
}

pub async fn respond(
    State(state): State<AppState>,
    user: AuthUser,
    Path(partnership_id): Path<String>,
    Json(body): Json<RespondBody>,
) -> Result<Json<Partnership>, ProblemResponse> {
    let current = load(&state, &partnership_id).await?;
    if current.wholesaler_id != user.id() {
        return Err(forbidden("only the wholesaler can answer this request"));
    }
    let next = partnership::respond(current.status, body.accept).map_err(rule_problem)?;

    let updated = state
        .storage()
        .partnerships()
        .transition(&partnership_id, current.status, next, state.now())
        .await
        .map_err(partnership_problem)?;

    let decision = if body.accept { "accepted" } else { "rejected" };
    counter!("partnership_decisions_total", "decision" => decision).increment(1);
    info!(stage = "partnerships", partnership_id = %updated.id, decision, "partnership answered");
    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct CommissionBody {
    pub commission_bps: i64,
}

/// New rates apply to future orders only; placed orders keep their snapshot.
pub async fn update_commission(
    State(state): State<AppState>,
    user: AuthUser,
    Path(partnership_id): Path<String>,
    Json(body): Json<CommissionBody>,
) -> Result<Json<Partnership>, ProblemResponse> {
    let current = load(&state, &partnership_id).await?;
    if !(user.role() == Role::Admin || current.wholesaler_id == user.id()) {
        return Err(forbidden("only the wholesaler or an admin can change the commission"));
    }
    partnership::ensure_commission_editable(current.status).map_err(rule_problem)?;
    let commission_bps = partnership::validate_commission(body.commission_bps).map_err(rule_problem)?;

    let updated = state
        .storage()
        .partnerships()
        .update_commission(&partnership_id, commission_bps, state.now())
        .await
        .map_err(partnership_problem)?;
    Ok(Json(updated))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<PartnershipStatus>,
}

pub async fn list(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Partnership>>, ProblemResponse> {
    let participant_id = match user.role() {
        Role::Admin => None,
        Role::Wholesaler | Role::Dropshipper => Some(user.id().to_string()),
        Role::Customer => return Err(forbidden("customers have no partnerships")),
    };
    let partnerships = state
        .storage()
        .partnerships()
        .list(&PartnershipFilter {
            participant_id,
            status: query.status,
        })
        .await
        .map_err(partnership_problem)?;
    Ok(Json(partnerships))
}

async fn load(state: &AppState, id: &str) -> Result<Partnership, ProblemResponse> {
    state
        .storage()
        .partnerships()
        .fetch(id)
        .await
        .map_err(partnership_problem)?
        .ok_or_else(partnership_missing)
}

fn partnership_missing() -> ProblemResponse {
    not_found("partnership_not_found", "partnership does not exist")
}

fn rule_problem(err: PartnershipRuleError) -> ProblemResponse {
    match err {
        PartnershipRuleError::CommissionOutOfRange(_) => {
            ValidationError::new("commission_bps", err.to_string()).into()
        }
        PartnershipRuleError::AlreadyAnswered(_) => conflict("already_answered", err.to_string()),
        PartnershipRuleError::NotActive(_) => conflict("partnership_inactive", err.to_string()),
    }
}

fn partnership_problem(err: PartnershipError) -> ProblemResponse {
    match err {
        PartnershipError::NotFound => partnership_missing(),
        PartnershipError::Duplicate => conflict(
            "partnership_exists",
            "a pending or active partnership with this wholesaler already exists",
        ),
        PartnershipError::UnknownParticipant => {
            not_found("wholesaler_not_found", "no active wholesaler with this id")
        }
        PartnershipError::StaleStatus => conflict(
            "partnership_changed",
            "the partnership changed while this request was processed",
        ),
        other => {
            error!(stage = "partnerships", error = %other, "partnership storage failure");
            internal_error("failed to access partnerships")
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::state::test_support::TestApp;
    use kora_core::types::Role;
    use serde_json::json;

    #[tokio::test]
    async fn request_then_accept() {
        let app = TestApp::new().await;
        let wholesaler = app.profile("w-1", Role::Wholesaler).await;
        let dropshipper = app.profile("d-1", Role::Dropshipper).await;
        let customer = app.profile("c-1", Role::Customer).await;

        let body = json!({ "wholesaler_id": "w-1", "commission_bps": 750, "message": "Hello" });
        let (status, _) = app
            .send("POST", "/partnerships", Some(&customer), Some(body.clone()))
            .await;
        assert_eq!(status, 403);

        let (status, _) = app
            .send(
                "POST",
                "/partnerships",
                Some(&dropshipper),
                Some(json!({ "wholesaler_id": "w-1", "commission_bps": 10_001 })),
            )
            .await;
        assert_eq!(status, 422);

        let (status, _) = app
            .send(
                "POST",
                "/partnerships",
                Some(&dropshipper),
                Some(json!({ "wholesaler_id": "c-1", "commission_bps": 500 })),
            )
            .await;
        assert_eq!(status, 404);

        let (status, created) = app
            .send("POST", "/partnerships", Some(&dropshipper), Some(body.clone()))
            .await;
        assert_eq!(status, 201);
        assert_eq!(created["status"], "pending");
        let (status, problem) = app
            .send("POST", "/partnerships", Some(&dropshipper), Some(body))
            .await;
        assert_eq!(status, 409);
        assert_eq!(problem["type"], "partnership_exists");

        let respond = format!("/partnerships/{}/respond", created["id"].as_str().unwrap());
        let (status, _) = app
            .send("POST", &respond, Some(&dropshipper), Some(json!({ "accept": true })))
            .await;
        assert_eq!(status, 403);
        let (status, accepted) = app
            .send("POST", &respond, Some(&wholesaler), Some(json!({ "accept": true })))
            .await;
        assert_eq!(status, 200);
        assert_eq!(accepted["status"], "active");
        assert!(accepted["responded_at"].is_string());

        let (status, problem) = app
            .send("POST", &respond, Some(&wholesaler), Some(json!({ "accept": false })))
            .await;
        assert_eq!(status, 409);
        assert_eq!(problem["type"], "already_answered");

        let (_, mine) = app
            .send("GET", "/partnerships?status=active", Some(&dropshipper), None)
            .await;
        assert_eq!(mine.as_array().unwrap().len(), 1);
        let (_, pending) = app
            .send("GET", "/partnerships?status=pending", Some(&wholesaler), None)
            .await;
        assert!(pending.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn commission_changes_only_on_active_partnerships() {
        let app = TestApp::new().await;
        let wholesaler = app.profile("w-1", Role::Wholesaler).await;
        let dropshipper = app.profile("d-1", Role::Dropshipper).await;
        let admin = app.profile("a-1", Role::Admin).await;
        app.profile("w-2", Role::Wholesaler).await;

        app.partnership("pa-1", "w-1", "d-1", 500).await;
        let (status, _) = app
            .send(
                "PATCH",
                "/partnerships/pa-1/commission",
                Some(&dropshipper),
                Some(json!({ "commission_bps": 900 })),
            )
            .await;
        assert_eq!(status, 403);
        let (status, updated) = app
            .send(
                "PATCH",
                "/partnerships/pa-1/commission",
                Some(&wholesaler),
                Some(json!({ "commission_bps": 900 })),
            )
            .await;
        assert_eq!(status, 200);
        assert_eq!(updated["commission_bps"], 900);

        let (_, pending) = app
            .send(
                "POST",
                "/partnerships",
                Some(&dropshipper),
                Some(json!({ "wholesaler_id": "w-2", "commission_bps": 300 })),
            )
            .await;
        let (status, problem) = app
            .send(
                "PATCH",
                &format!("/partnerships/{}/commission", pending["id"].as_str().unwrap()),
                Some(&admin),
                Some(json!({ "commission_bps": 400 })),
            )
            .await;
        assert_eq!(status, 409);
        assert_eq!(problem["type"], "partnership_inactive");

        let (_, all) = app.send("GET", "/partnerships", Some(&admin), None).await;
        assert_eq!(all.as_array().unwrap().len(), 2);
    }
}

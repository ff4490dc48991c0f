use axum::{
    extract::{FromRequestParts, State},
    http::{header, request::Parts, StatusCode},
    Json,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use kora_core::{
    access::Actor,
    types::{Profile, Role},
    validation,
};
use kora_platform::{PlatformError, Session, SignupRequest};
use kora_storage::{NewProfile, ProfileError, ProfileUpdate};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::problem::{
    bad_gateway, bad_request, conflict, forbidden, internal_error, unauthorized, ProblemResponse,
};
use crate::state::AppState;

/// Verifies HS256 access tokens issued by the hosted auth provider.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Provider tokens carry `aud: authenticated`; the signature is what matters here.
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<TokenClaims, TokenError> {
        let data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| TokenError::Invalid(err.to_string()))?;
        Ok(data.claims)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub exp: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Authenticated caller with an active marketplace profile.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub profile: Profile,
}

impl AuthUser {
    pub fn id(&self) -> &str {
        &self.profile.id
    }

    pub fn role(&self) -> Role {
        self.profile.role
    }

    pub fn actor(&self) -> Actor {
        Actor::new(self.profile.id.clone(), self.profile.role)
    }

    pub fn require_role(&self, role: Role) -> Result<(), ProblemResponse> {
        if self.profile.role == role {
            Ok(())
        } else {
            Err(forbidden(format!("only {role} accounts may do this")))
        }
    }

    pub fn require_admin(&self) -> Result<(), ProblemResponse> {
        self.require_role(Role::Admin)
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ProblemResponse;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| unauthorized("missing_token", "a bearer token is required"))?;

        let claims = state.tokens().verify(token).map_err(|err| {
            warn!(stage = "auth", error = %err, "rejected access token");
            unauthorized("invalid_token", "access token is invalid or expired")
        })?;

        let profile = state
            .storage()
            .profiles()
            .fetch(&claims.sub)
            .await
            .map_err(|err| {
                error!(stage = "auth", user_id = %claims.sub, error = %err, "failed to load profile");
                internal_error("failed to load profile")
            })?
            .ok_or_else(|| forbidden("no marketplace profile for this account"))?;

        if !profile.is_active() {
            return Err(ProblemResponse::new(
                StatusCode::FORBIDDEN,
                "account_suspended",
                "this account has been suspended",
            ));
        }

        Ok(Self { profile })
    }
}

#[derive(Debug, Deserialize)]
pub struct SignupBody {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: Role,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub business_name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub profile: Profile,
    /// Absent while the provider waits for email confirmation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
}

pub async fn signup(
    State(state): State<AppState>,
    Json(body): Json<SignupBody>,
) -> Result<(StatusCode, Json<SignupResponse>), ProblemResponse> {
    let email = validation::email(&body.email)?;
    validation::password(&body.password)?;
    let full_name = validation::required_text("full_name", &body.full_name)?;
    let phone = body
        .phone
        .as_deref()
        .filter(|value| !value.trim().is_empty())
        .map(validation::rwanda_phone)
        .transpose()?;
    let business_name = validation::optional_text("business_name", body.business_name.as_deref())?;

    if !body.role.is_self_assignable() {
        return Err(forbidden("this role cannot be chosen at signup"));
    }
    if body.role == Role::Wholesaler && business_name.is_none() {
        return Err(validation::ValidationError::new(
            "business_name",
            "wholesalers must provide a business name",
        )
        .into());
    }

    let outcome = state
        .auth()
        .sign_up(&SignupRequest {
            email: &email,
            password: &body.password,
            data: json!({ "full_name": full_name, "role": body.role.as_str() }),
        })
        .await;
    record_platform_call("signup", outcome.is_ok());
    let outcome = outcome.map_err(|err| platform_problem("signup", err))?;
    let provider_user_id = outcome.user().id.clone();

    let profile = state
        .storage()
        .profiles()
        .insert(&NewProfile {
            id: provider_user_id.clone(),
            email,
            full_name,
            role: body.role,
            phone,
            business_name,
            created_at: state.now(),
        })
        .await
        .map_err(|err| {
            // The provider account exists now and must be removed by an operator.
            error!(
                stage = "auth",
                provider_user_id = %provider_user_id,
                error = %err,
                "provider account left without profile"
            );
            match err {
                ProfileError::Duplicate => {
                    conflict("email_taken", "an account with this email exists")
                }
                _ => internal_error("failed to create profile"),
            }
        })?;

    info!(stage = "auth", user_id = %profile.id, role = profile.role.as_str(), "account created");
    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            profile,
            session: outcome.session().cloned(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub session: Session,
    pub profile: Profile,
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginBody>,
) -> Result<Json<LoginResponse>, ProblemResponse> {
    let email = validation::email(&body.email)?;
    if body.password.is_empty() {
        return Err(bad_request("invalid_input", "password is required"));
    }

    let session = state.auth().sign_in_with_password(&email, &body.password).await;
    record_platform_call("login", session.is_ok());
    let session = session.map_err(|err| match err.status() {
        Some(status) if status.is_client_error() => {
            unauthorized("invalid_credentials", "email or password is incorrect")
        }
        _ => platform_problem("login", err),
    })?;

    let profile = load_profile(&state, &session.user.id).await?;
    if !profile.is_active() {
        warn!(stage = "auth", user_id = %profile.id, "suspended account tried to sign in");
        return Err(ProblemResponse::new(
            StatusCode::FORBIDDEN,
            "account_suspended",
            "this account has been suspended",
        ));
    }

    Ok(Json(LoginResponse { session, profile }))
}

#[derive(Debug, Deserialize)]
pub struct RefreshBody {
    pub refresh_token: String,
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshBody>,
) -> Result<Json<Session>, ProblemResponse> {
    let session = state.auth().refresh_session(&body.refresh_token).await;
    record_platform_call("refresh", session.is_ok());
    session.map(Json).map_err(|err| match err.status() {
        Some(status) if status.is_client_error() => {
            unauthorized("invalid_token", "refresh token is invalid or expired")
        }
        _ => platform_problem("refresh", err),
    })
}

pub async fn me(user: AuthUser) -> Json<Profile> {
    Json(user.profile)
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateMeBody {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub business_name: Option<String>,
    pub location: Option<String>,
}

pub async fn update_me(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<UpdateMeBody>,
) -> Result<Json<Profile>, ProblemResponse> {
    let update = ProfileUpdate {
        full_name: body
            .full_name
            .as_deref()
            .map(|name| validation::required_text("full_name", name))
            .transpose()?,
        phone: body
            .phone
            .as_deref()
            .map(validation::rwanda_phone)
            .transpose()?,
        business_name: validation::optional_text("business_name", body.business_name.as_deref())?,
        location: validation::optional_text("location", body.location.as_deref())?,
    };

    let profile = state
        .storage()
        .profiles()
        .update(user.id(), &update, state.now())
        .await
        .map_err(|err| {
            error!(stage = "auth", user_id = %user.id(), error = %err, "failed to update profile");
            internal_error("failed to update profile")
        })?;
    Ok(Json(profile))
}

async fn load_profile(state: &AppState, id: &str) -> Result<Profile, ProblemResponse> {
    state
        .storage()
        .profiles()
        .fetch(id)
        .await
        .map_err(|err| {
            error!(stage = "auth", user_id = %id, error = %err, "failed to load profile");
            internal_error("failed to load profile")
        })?
        .ok_or_else(|| forbidden("no marketplace profile for this account"))
}

pub(crate) fn record_platform_call(operation: &'static str, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    counter!("platform_requests_total", "operation" => operation, "result" => result).increment(1);
}

/// Maps provider failures: 422 on signup means the email is registered, other
/// client errors are the caller's fault, everything else is an upstream outage.
pub(crate) fn platform_problem(operation: &'static str, err: PlatformError) -> ProblemResponse {
    match err.status() {
        Some(StatusCode::UNPROCESSABLE_ENTITY) if operation == "signup" => {
            conflict("email_taken", "an account with this email exists")
        }
        Some(status) if status.is_client_error() => {
            warn!(stage = "platform", operation, error = %err, "platform rejected request");
            bad_request("platform_rejected", "the request was rejected by the auth provider")
        }
        _ => {
            error!(stage = "platform", operation, error = %err, "platform request failed");
            bad_gateway("the hosted platform is unavailable")
        }
    }
}

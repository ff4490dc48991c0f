use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{parse_json, PlatformError};

/// Client for the hosted auth provider (GoTrue-compatible REST API).
#[derive(Clone)]
pub struct AuthClient {
    http: Client,
    base_url: Url,
    anon_key: String,
}

impl AuthClient {
    /// `base_url` is the platform root; auth endpoints live under `auth/v1/`.
    pub fn new(anon_key: impl Into<String>, base_url: Url, http: Client) -> Self {
        Self {
            http,
            base_url,
            anon_key: anon_key.into(),
        }
    }

    /// Registers a new user. Profile fields travel as user metadata.
    pub async fn sign_up(&self, request: &SignupRequest<'_>) -> Result<SignupOutcome, PlatformError> {
        let url = self.base_url.join("auth/v1/signup")?;
        let response = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .json(request)
            .send()
            .await?;

        parse_json(response).await
    }

    /// Password grant.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, PlatformError> {
        let url = self.token_url("password")?;
        let body = serde_json::json!({ "email": email, "password": password });
        let response = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;

        parse_json(response).await
    }

    /// Exchanges a refresh token for a fresh session.
    pub async fn refresh_session(&self, refresh_token: &str) -> Result<Session, PlatformError> {
        let url = self.token_url("refresh_token")?;
        let body = serde_json::json!({ "refresh_token": refresh_token });
        let response = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;

        parse_json(response).await
    }

    fn token_url(&self, grant_type: &str) -> Result<Url, PlatformError> {
        let mut url = self.base_url.join("auth/v1/token")?;
        url.query_pairs_mut().append_pair("grant_type", grant_type);
        Ok(url)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SignupRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
    /// Stored by the provider as `user_metadata`.
    pub data: serde_json::Value,
}

/// Session issued by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub user: AuthUser,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// The provider returns a session when email confirmation is disabled, and the bare user otherwise.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SignupOutcome {
    Session(Session),
    PendingConfirmation(AuthUser),
}

impl SignupOutcome {
    pub fn user(&self) -> &AuthUser {
        match self {
            Self::Session(session) => &session.user,
            Self::PendingConfirmation(user) => user,
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Session(session) => Some(session),
            Self::PendingConfirmation(_) => None,
        }
    }
}

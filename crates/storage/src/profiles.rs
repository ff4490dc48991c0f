use chrono::{DateTime, Utc};
use kora_core::types::{AccountStatus, Profile, Role, UnknownVariant};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::{is_unique_violation, to_rfc3339};

const PROFILE_COLUMNS: &str = "id, email, full_name, role, phone, business_name, location, status, created_at, updated_at";

/// Repository used to query and mutate marketplace profiles.
#[derive(Clone)]
pub struct ProfileRepository {
    pool: SqlitePool,
}

impl ProfileRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts the profile created alongside a hosted auth user.
    pub async fn insert(&self, profile: &NewProfile) -> Result<Profile, ProfileError> {
        let created_at = to_rfc3339(profile.created_at);
        sqlx::query(
            "INSERT INTO profiles (id, email, full_name, role, phone, business_name, status, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, 'active', ?, ?)",
        )
        .bind(&profile.id)
        .bind(&profile.email)
        .bind(&profile.full_name)
        .bind(profile.role.as_str())
        .bind(&profile.phone)
        .bind(&profile.business_name)
        .bind(&created_at)
        .bind(&created_at)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                ProfileError::Duplicate
            } else {
                ProfileError::Database(err)
            }
        })?;

        self.fetch(&profile.id).await?.ok_or(ProfileError::NotFound)
    }

    pub async fn fetch(&self, id: &str) -> Result<Option<Profile>, ProfileError> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM profiles WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(ProfileRow::into_domain).transpose()
    }

    /// Applies a partial update; `None` fields keep their stored value.
    pub async fn update(
        &self,
        id: &str,
        update: &ProfileUpdate,
        now: DateTime<Utc>,
    ) -> Result<Profile, ProfileError> {
        let result = sqlx::query(
            "UPDATE profiles \
                SET full_name = COALESCE(?, full_name), \
                    phone = COALESCE(?, phone), \
                    business_name = COALESCE(?, business_name), \
                    location = COALESCE(?, location), \
                    updated_at = ? \
              WHERE id = ?",
        )
        .bind(&update.full_name)
        .bind(&update.phone)
        .bind(&update.business_name)
        .bind(&update.location)
        .bind(to_rfc3339(now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ProfileError::NotFound);
        }
        self.fetch(id).await?.ok_or(ProfileError::NotFound)
    }

    pub async fn set_status(
        &self,
        id: &str,
        status: AccountStatus,
        now: DateTime<Utc>,
    ) -> Result<Profile, ProfileError> {
        let result = sqlx::query("UPDATE profiles SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(to_rfc3339(now))
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ProfileError::NotFound);
        }
        self.fetch(id).await?.ok_or(ProfileError::NotFound)
    }

    /// Lists profiles, newest first, optionally restricted to one role.
    pub async fn list(&self, role: Option<Role>) -> Result<Vec<Profile>, ProfileError> {
        let rows = match role {
            Some(role) => {
                sqlx::query_as::<_, ProfileRow>(&format!(
                    "SELECT {PROFILE_COLUMNS} FROM profiles WHERE role = ? ORDER BY created_at DESC, id"
                ))
                .bind(role.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ProfileRow>(&format!(
                    "SELECT {PROFILE_COLUMNS} FROM profiles ORDER BY created_at DESC, id"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(ProfileRow::into_domain).collect()
    }
}

/// Data required to create a profile.
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub id: String,
    pub email: String,
    pub full_name: String,
    pub role: Role,
    pub phone: Option<String>,
    pub business_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub business_name: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, sqlx::FromRow)]
struct ProfileRow {
    id: String,
    email: String,
    full_name: String,
    role: String,
    phone: Option<String>,
    business_name: Option<String>,
    location: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProfileRow {
    fn into_domain(self) -> Result<Profile, ProfileError> {
        Ok(Profile {
            role: self.role.parse()?,
            status: self.status.parse()?,
            id: self.id,
            email: self.email,
            full_name: self.full_name,
            phone: self.phone,
            business_name: self.business_name,
            location: self.location,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile not found")]
    NotFound,
    #[error("a profile with this id or email already exists")]
    Duplicate,
    #[error("stored profile is invalid: {0}")]
    Corrupt(#[from] UnknownVariant),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

use chrono::{DateTime, Utc};
use kora_core::types::{Partnership, PartnershipStatus, UnknownVariant};
use sqlx::{QueryBuilder, Sqlite, SqliteExecutor, SqlitePool};
use thiserror::Error;

use crate::{is_foreign_key_violation, is_unique_violation, to_rfc3339};

const PARTNERSHIP_COLUMNS: &str = "id, wholesaler_id, dropshipper_id, commission_bps, status, message, created_at, updated_at, responded_at";

/// Repository for wholesaler/dropshipper partnerships.
#[derive(Clone)]
pub struct PartnershipRepository {
    pool: SqlitePool,
}

impl PartnershipRepository {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Inserts a partnership; a second open (pending/active) record for the pair is a duplicate.
    pub async fn insert(&self, record: &NewPartnership) -> Result<Partnership, PartnershipError> {
        let created_at = to_rfc3339(record.created_at);
        let responded_at = match record.status {
            PartnershipStatus::Pending => None,
            _ => Some(created_at.clone()),
        };
        sqlx::query(
            "INSERT INTO partnerships \
             (id, wholesaler_id, dropshipper_id, commission_bps, status, message, created_at, updated_at, responded_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.wholesaler_id)
        .bind(&record.dropshipper_id)
        .bind(record.commission_bps)
        .bind(record.status.as_str())
        .bind(&record.message)
        .bind(&created_at)
        .bind(&created_at)
        .bind(responded_at)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                PartnershipError::Duplicate
            } else if is_foreign_key_violation(&err) {
                PartnershipError::UnknownParticipant
            } else {
                PartnershipError::Database(err)
            }
        })?;

        self.fetch(&record.id)
            .await?
            .ok_or(PartnershipError::NotFound)
    }

    pub async fn fetch(&self, id: &str) -> Result<Option<Partnership>, PartnershipError> {
        let row = sqlx::query_as::<_, PartnershipRow>(&format!(
            "SELECT {PARTNERSHIP_COLUMNS} FROM partnerships WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(PartnershipRow::into_domain).transpose()
    }

    /// Active partnership between the pair, if any.
    pub async fn find_active(
        executor: impl SqliteExecutor<'_>,
        wholesaler_id: &str,
        dropshipper_id: &str,
    ) -> Result<Option<Partnership>, PartnershipError> {
        let row = sqlx::query_as::<_, PartnershipRow>(&format!(
            "SELECT {PARTNERSHIP_COLUMNS} FROM partnerships \
              WHERE wholesaler_id = ? AND dropshipper_id = ? AND status = 'active'"
        ))
        .bind(wholesaler_id)
        .bind(dropshipper_id)
        .fetch_optional(executor)
        .await?;
        row.map(PartnershipRow::into_domain).transpose()
    }

    pub async fn list(
        &self,
        filter: &PartnershipFilter,
    ) -> Result<Vec<Partnership>, PartnershipError> {
        let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(format!(
            "SELECT {PARTNERSHIP_COLUMNS} FROM partnerships WHERE 1 = 1"
        ));
        if let Some(ref participant) = filter.participant_id {
            builder
                .push(" AND (wholesaler_id = ")
                .push_bind(participant.clone())
                .push(" OR dropshipper_id = ")
                .push_bind(participant.clone())
                .push(")");
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        builder.push(" ORDER BY created_at DESC, id");

        let rows = builder
            .build_query_as::<PartnershipRow>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(PartnershipRow::into_domain).collect()
    }

    /// Moves a partnership out of `expected`; fails with `StaleStatus` when it changed meanwhile.
    pub async fn transition(
        &self,
        id: &str,
        expected: PartnershipStatus,
        next: PartnershipStatus,
        now: DateTime<Utc>,
    ) -> Result<Partnership, PartnershipError> {
        let now = to_rfc3339(now);
        let result = sqlx::query(
            "UPDATE partnerships SET status = ?, updated_at = ?, responded_at = ? \
              WHERE id = ? AND status = ?",
        )
        .bind(next.as_str())
        .bind(&now)
        .bind(&now)
        .bind(id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PartnershipError::StaleStatus);
        }
        self.fetch(id).await?.ok_or(PartnershipError::NotFound)
    }

    /// Updates the commission of an active partnership. Existing orders keep their snapshot.
    pub async fn update_commission(
        &self,
        id: &str,
        commission_bps: i64,
        now: DateTime<Utc>,
    ) -> Result<Partnership, PartnershipError> {
        let result = sqlx::query(
            "UPDATE partnerships SET commission_bps = ?, updated_at = ? \
              WHERE id = ? AND status = 'active'",
        )
        .bind(commission_bps)
        .bind(to_rfc3339(now))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PartnershipError::StaleStatus);
        }
        self.fetch(id).await?.ok_or(PartnershipError::NotFound)
    }
}

#[derive(Debug, Clone)]
pub struct NewPartnership {
    pub id: String,
    pub wholesaler_id: String,
    pub dropshipper_id: String,
    pub commission_bps: i64,
    pub status: PartnershipStatus,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct PartnershipFilter {
    /// Restricts results to partnerships where this profile is either side.
    pub participant_id: Option<String>,
    pub status: Option<PartnershipStatus>,
}

#[derive(Debug, sqlx::FromRow)]
struct PartnershipRow {
    id: String,
    wholesaler_id: String,
    dropshipper_id: String,
    commission_bps: i64,
    status: String,
    message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    responded_at: Option<DateTime<Utc>>,
}

impl PartnershipRow {
    fn into_domain(self) -> Result<Partnership, PartnershipError> {
        Ok(Partnership {
            status: self.status.parse()?,
            id: self.id,
            wholesaler_id: self.wholesaler_id,
            dropshipper_id: self.dropshipper_id,
            commission_bps: self.commission_bps,
            message: self.message,
            created_at: self.created_at,
            updated_at: self.updated_at,
            responded_at: self.responded_at,
        })
    }
}

#[derive(Debug, Error)]
pub enum PartnershipError {
    #[error("partnership not found")]
    NotFound,
    #[error("an open partnership already exists for this pair")]
    Duplicate,
    #[error("wholesaler or dropshipper does not exist")]
    UnknownParticipant,
    #[error("partnership status changed concurrently")]
    StaleStatus,
    #[error("stored partnership is invalid: {0}")]
    Corrupt(#[from] UnknownVariant),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{at, insert_profile, setup_db};
    use kora_core::types::Role;

    async fn seeded() -> crate::Database {
        let db = setup_db().await;
        insert_profile(&db, "w-1", Role::Wholesaler).await;
        insert_profile(&db, "d-1", Role::Dropshipper).await;
        insert_profile(&db, "d-2", Role::Dropshipper).await;
        db
    }

    fn request(id: &str, dropshipper: &str) -> NewPartnership {
        NewPartnership {
            id: id.into(),
            wholesaler_id: "w-1".into(),
            dropshipper_id: dropshipper.into(),
            commission_bps: 750,
            status: PartnershipStatus::Pending,
            message: Some("Muraho! I sell in Huye.".into()),
            created_at: at("2024-05-01T10:00:00Z"),
        }
    }

    #[tokio::test]
    async fn only_one_open_partnership_per_pair() {
        let db = seeded().await;
        let repo = db.partnerships();
        repo.insert(&request("pa-1", "d-1")).await.expect("first");
        let err = repo.insert(&request("pa-2", "d-1")).await.unwrap_err();
        assert!(matches!(err, PartnershipError::Duplicate));

        repo.transition(
            "pa-1",
            PartnershipStatus::Pending,
            PartnershipStatus::Rejected,
            at("2024-05-02T10:00:00Z"),
        )
        .await
        .expect("reject");
        repo.insert(&request("pa-3", "d-1"))
            .await
            .expect("new request after rejection");
    }

    #[tokio::test]
    async fn transition_detects_stale_status() {
        let db = seeded().await;
        let repo = db.partnerships();
        repo.insert(&request("pa-1", "d-1")).await.expect("insert");
        let accepted = repo
            .transition(
                "pa-1",
                PartnershipStatus::Pending,
                PartnershipStatus::Active,
                at("2024-05-02T10:00:00Z"),
            )
            .await
            .expect("accept");
        assert_eq!(accepted.status, PartnershipStatus::Active);
        assert_eq!(accepted.responded_at, Some(at("2024-05-02T10:00:00Z")));

        let err = repo
            .transition(
                "pa-1",
                PartnershipStatus::Pending,
                PartnershipStatus::Rejected,
                at("2024-05-02T11:00:00Z"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, PartnershipError::StaleStatus));
    }

    #[tokio::test]
    async fn commission_updates_only_apply_to_active() {
        let db = seeded().await;
        let repo = db.partnerships();
        repo.insert(&request("pa-1", "d-1")).await.expect("insert");
        let err = repo
            .update_commission("pa-1", 900, at("2024-05-02T10:00:00Z"))
            .await
            .unwrap_err();
        assert!(matches!(err, PartnershipError::StaleStatus));

        repo.transition(
            "pa-1",
            PartnershipStatus::Pending,
            PartnershipStatus::Active,
            at("2024-05-02T10:00:00Z"),
        )
        .await
        .expect("accept");
        let updated = repo
            .update_commission("pa-1", 900, at("2024-05-03T10:00:00Z"))
            .await
            .expect("update");
        assert_eq!(updated.commission_bps, 900);

        let active = PartnershipRepository::find_active(db.pool(), "w-1", "d-1")
            .await
            .expect("find")
            .expect("active exists");
        assert_eq!(active.id, "pa-1");
    }

    #[tokio::test]
    async fn list_filters_by_participant_and_status() {
        let db = seeded().await;
        let repo = db.partnerships();
        repo.insert(&request("pa-1", "d-1")).await.expect("insert");
        repo.insert(&request("pa-2", "d-2")).await.expect("insert");

        let for_d1 = repo
            .list(&PartnershipFilter {
                participant_id: Some("d-1".into()),
                status: None,
            })
            .await
            .expect("list");
        assert_eq!(for_d1.len(), 1);

        let for_w1 = repo
            .list(&PartnershipFilter {
                participant_id: Some("w-1".into()),
                status: Some(PartnershipStatus::Pending),
            })
            .await
            .expect("list");
        assert_eq!(for_w1.len(), 2);
    }
}

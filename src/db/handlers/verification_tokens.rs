//! PostgreSQL store for verification and password-reset token records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    errors::Result,
    models::verification_tokens::{VerificationTokenRecord, VerificationTokenType},
    store::VerificationTokenStore,
};
use crate::types::UserId;

const TOKEN_COLUMNS: &str = "id, user_id, token_type, revoked, created_at";

#[derive(Debug, Clone)]
pub struct PgVerificationTokenStore {
    pool: PgPool,
}

impl PgVerificationTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VerificationTokenStore for PgVerificationTokenStore {
    #[instrument(skip(self), err)]
    async fn whitelist(&self, user_id: UserId, token_type: VerificationTokenType) -> Result<VerificationTokenRecord> {
        let record = sqlx::query_as::<_, VerificationTokenRecord>(&format!(
            "INSERT INTO verification_tokens (user_id, token_type)
             VALUES ($1, $2)
             RETURNING {TOKEN_COLUMNS}"
        ))
        .bind(user_id)
        .bind(token_type)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    #[instrument(skip(self), err)]
    async fn find_by_id(&self, jti: Uuid) -> Result<Option<VerificationTokenRecord>> {
        let record = sqlx::query_as::<_, VerificationTokenRecord>(&format!(
            "SELECT {TOKEN_COLUMNS} FROM verification_tokens WHERE id = $1"
        ))
        .bind(jti)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    #[instrument(skip(self), err)]
    async fn revoke(&self, jti: Uuid) -> Result<()> {
        sqlx::query("UPDATE verification_tokens SET revoked = TRUE WHERE id = $1")
            .bind(jti)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn consume(&self, jti: Uuid) -> Result<bool> {
        let result = sqlx::query("UPDATE verification_tokens SET revoked = TRUE WHERE id = $1 AND revoked = FALSE")
            .bind(jti)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn delete_revoked(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM verification_tokens WHERE revoked = TRUE")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn delete_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM verification_tokens WHERE revoked = FALSE AND created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

//! PostgreSQL store for refresh-token whitelist records.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    errors::Result,
    models::refresh_tokens::RefreshTokenRecord,
    store::RefreshTokenStore,
};
use crate::types::UserId;

const TOKEN_COLUMNS: &str = "id, user_id, hashed_token, revoked, created_at";

#[derive(Debug, Clone)]
pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    #[instrument(skip(self, hashed_token), err)]
    async fn whitelist(&self, jti: Uuid, hashed_token: &str, user_id: UserId) -> Result<RefreshTokenRecord> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&format!(
            "INSERT INTO refresh_tokens (id, user_id, hashed_token)
             VALUES ($1, $2, $3)
             RETURNING {TOKEN_COLUMNS}"
        ))
        .bind(jti)
        .bind(user_id)
        .bind(hashed_token)
        .fetch_one(&self.pool)
        .await?;

        Ok(record)
    }

    #[instrument(skip(self), err)]
    async fn find_by_id(&self, jti: Uuid) -> Result<Option<RefreshTokenRecord>> {
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&format!("SELECT {TOKEN_COLUMNS} FROM refresh_tokens WHERE id = $1"))
            .bind(jti)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    #[instrument(skip(self), err)]
    async fn revoke(&self, jti: Uuid) -> Result<()> {
        sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = $1")
            .bind(jti)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn consume(&self, jti: Uuid) -> Result<bool> {
        // The affected-row count decides the rotation race: only one caller
        // observes the flip from active to revoked.
        let result = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE id = $1 AND revoked = FALSE")
            .bind(jti)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self), err)]
    async fn revoke_all_for_user(&self, user_id: UserId) -> Result<u64> {
        let result = sqlx::query("UPDATE refresh_tokens SET revoked = TRUE WHERE user_id = $1 AND revoked = FALSE")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self), err)]
    async fn delete_revoked(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE revoked = TRUE")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

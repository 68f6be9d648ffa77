//! PostgreSQL store for users.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;

use crate::db::{
    errors::{DbError, Result},
    models::users::{User, UserCreateRequest},
    store::UserStore,
};
use crate::types::UserId;

const USER_COLUMNS: &str = "id, email, name, password_hash, email_verified_at, role_id, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    #[instrument(skip(self, request), fields(email = %request.email), err)]
    async fn create(&self, request: &UserCreateRequest) -> Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (email, name, password_hash, role_id)
             VALUES ($1, $2, $3, $4)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&request.email)
        .bind(&request.name)
        .bind(&request.password_hash)
        .bind(request.role_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    #[instrument(skip(self, email), err)]
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(user)
    }

    #[instrument(skip(self, at), err)]
    async fn set_email_verified(&self, id: UserId, at: DateTime<Utc>) -> Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET email_verified_at = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        user.ok_or(DbError::NotFound)
    }

    #[instrument(skip(self, password_hash), err)]
    async fn set_password_hash(&self, id: UserId, password_hash: &str) -> Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET password_hash = $2, updated_at = NOW()
             WHERE id = $1
             RETURNING {USER_COLUMNS}"
        ))
        .bind(id)
        .bind(password_hash)
        .fetch_optional(&self.pool)
        .await?;

        user.ok_or(DbError::NotFound)
    }
}

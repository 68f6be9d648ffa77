//! Database models for refresh tokens.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::UserId;

/// Server-side whitelist record for one refresh token.
///
/// The record id doubles as the token's jti claim; `hashed_token` is the
/// SHA-256 digest of the signed token string, never the raw token.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub hashed_token: String,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

//! Database models for users.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::{RoleId, UserId};

/// Database request for creating a new user
#[derive(Debug, Clone)]
pub struct UserCreateRequest {
    /// Already lowercased by the caller
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role_id: RoleId,
}

/// Database entity model
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    /// Null until the email-verification token is redeemed
    pub email_verified_at: Option<DateTime<Utc>>,
    pub role_id: RoleId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_verified(&self) -> bool {
        self.email_verified_at.is_some()
    }
}

//! User-facing representations of account data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{db::models::users::User, types::{RoleId, UserId}};

/// Public view of a user account. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
    pub role_id: RoleId,
    pub created_at: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            email_verified: user.email_verified_at.is_some(),
            role_id: user.role_id,
            created_at: user.created_at,
        }
    }
}

/// Authenticated requester, extracted from the session cookie or a bearer
/// access token.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CurrentUser {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
    pub role_id: RoleId,
}

impl From<User> for CurrentUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            email_verified: user.email_verified_at.is_some(),
            role_id: user.role_id,
        }
    }
}

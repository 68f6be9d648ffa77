//! Database models for email-verification and password-reset tokens.
//!
//! Both single-use token kinds share one table, distinguished by a type tag.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::UserId;

/// Type tag for the shared verification-token table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "verification_token_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum VerificationTokenType {
    EmailVerification,
    PasswordReset,
}

/// Server-side record for one single-use token.
///
/// `revoked` flips to true on redemption; `created_at` drives expiry sweeping
/// independent of the signed token's own expiry claim.
#[derive(Debug, Clone, FromRow)]
pub struct VerificationTokenRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub token_type: VerificationTokenType,
    pub revoked: bool,
    pub created_at: DateTime<Utc>,
}

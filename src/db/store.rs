//! Store traits: the server-side source of truth for users and tokens.
//!
//! The services are written against these traits so they can run over
//! PostgreSQL in production ([`handlers`](crate::db::handlers)) and over
//! in-memory stores in tests ([`memory`](crate::db::memory)).
//!
//! # Atomicity contract
//!
//! `consume` on both token stores is the single-use decision point: it must
//! atomically check-and-set the revoked flag so that two concurrent attempts
//! on one jti produce exactly one `true`. The PostgreSQL implementations use
//! a conditional `UPDATE ... WHERE revoked = FALSE` and inspect the affected
//! row count; the in-memory implementations hold a lock across the
//! check-and-set. `revoke`, by contrast, is unconditional and idempotent.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{
    errors::Result,
    models::{
        refresh_tokens::RefreshTokenRecord,
        users::{User, UserCreateRequest},
        verification_tokens::{VerificationTokenRecord, VerificationTokenType},
    },
};
use crate::types::UserId;

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, request: &UserCreateRequest) -> Result<User>;

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>>;

    /// Lookup by email. Callers normalize to lowercase before calling.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Set the email-verification timestamp, returning the updated user.
    async fn set_email_verified(&self, id: UserId, at: DateTime<Utc>) -> Result<User>;

    /// Replace the stored password hash, returning the updated user.
    async fn set_password_hash(&self, id: UserId, password_hash: &str) -> Result<User>;
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Insert a whitelist record for a freshly minted refresh token.
    async fn whitelist(&self, jti: Uuid, hashed_token: &str, user_id: UserId) -> Result<RefreshTokenRecord>;

    async fn find_by_id(&self, jti: Uuid) -> Result<Option<RefreshTokenRecord>>;

    /// Mark a record revoked. Idempotent; revoking an already-revoked or
    /// missing record is not an error.
    async fn revoke(&self, jti: Uuid) -> Result<()>;

    /// Atomically revoke the record if it is currently active. Returns true
    /// for the one caller that flipped the flag; false for everyone else.
    async fn consume(&self, jti: Uuid) -> Result<bool>;

    /// Revoke every active refresh token belonging to the user (sign-out).
    /// Returns the number of records revoked.
    async fn revoke_all_for_user(&self, user_id: UserId) -> Result<u64>;

    /// Delete all revoked records. Returns the number deleted.
    async fn delete_revoked(&self) -> Result<u64>;
}

#[async_trait]
pub trait VerificationTokenStore: Send + Sync {
    /// Insert a record for a new single-use token; the returned record's id
    /// is the jti to embed in the signed token.
    async fn whitelist(&self, user_id: UserId, token_type: VerificationTokenType) -> Result<VerificationTokenRecord>;

    async fn find_by_id(&self, jti: Uuid) -> Result<Option<VerificationTokenRecord>>;

    /// Mark a record revoked. Idempotent.
    async fn revoke(&self, jti: Uuid) -> Result<()>;

    /// Atomically revoke the record if it is currently active. Exactly one
    /// concurrent redemption of a jti observes true.
    async fn consume(&self, jti: Uuid) -> Result<bool>;

    /// Delete all revoked records. Returns the number deleted.
    async fn delete_revoked(&self) -> Result<u64>;

    /// Delete non-revoked records created before the cutoff (abandoned,
    /// never-redeemed tokens). Returns the number deleted.
    async fn delete_stale(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

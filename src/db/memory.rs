//! In-memory store implementations for tests.
//!
//! These mirror the PostgreSQL stores' semantics exactly, including the
//! atomic consume contract: the mutex is held across the check-and-set, so
//! concurrent consumers of one jti see exactly one `true`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::{
    errors::{DbError, Result},
    models::{
        refresh_tokens::RefreshTokenRecord,
        users::{User, UserCreateRequest},
        verification_tokens::{VerificationTokenRecord, VerificationTokenType},
    },
    store::{RefreshTokenStore, UserStore, VerificationTokenStore},
};
use crate::types::UserId;

#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<UserId, User>>,
    next_id: AtomicI64,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn create(&self, request: &UserCreateRequest) -> Result<User> {
        let mut users = self.users.lock().await;

        if users.values().any(|u| u.email == request.email) {
            return Err(DbError::UniqueViolation {
                constraint: Some("users_email_key".to_string()),
                table: Some("users".to_string()),
                message: format!("duplicate key value violates unique constraint: {}", request.email),
            });
        }

        let now = Utc::now();
        let user = User {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            email: request.email.clone(),
            name: request.name.clone(),
            password_hash: request.password_hash.clone(),
            email_verified_at: None,
            role_id: request.role_id,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_id(&self, id: UserId) -> Result<Option<User>> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.users.lock().await.values().find(|u| u.email == email).cloned())
    }

    async fn set_email_verified(&self, id: UserId, at: DateTime<Utc>) -> Result<User> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(&id).ok_or(DbError::NotFound)?;
        user.email_verified_at = Some(at);
        user.updated_at = Utc::now();
        Ok(user.clone())
    }

    async fn set_password_hash(&self, id: UserId, password_hash: &str) -> Result<User> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(&id).ok_or(DbError::NotFound)?;
        user.password_hash = password_hash.to_string();
        user.updated_at = Utc::now();
        Ok(user.clone())
    }
}

#[derive(Default)]
pub struct MemoryRefreshTokenStore {
    records: Mutex<HashMap<Uuid, RefreshTokenRecord>>,
}

impl MemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records, revoked or not.
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryRefreshTokenStore {
    async fn whitelist(&self, jti: Uuid, hashed_token: &str, user_id: UserId) -> Result<RefreshTokenRecord> {
        let record = RefreshTokenRecord {
            id: jti,
            user_id,
            hashed_token: hashed_token.to_string(),
            revoked: false,
            created_at: Utc::now(),
        };
        self.records.lock().await.insert(jti, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, jti: Uuid) -> Result<Option<RefreshTokenRecord>> {
        Ok(self.records.lock().await.get(&jti).cloned())
    }

    async fn revoke(&self, jti: Uuid) -> Result<()> {
        if let Some(record) = self.records.lock().await.get_mut(&jti) {
            record.revoked = true;
        }
        Ok(())
    }

    async fn consume(&self, jti: Uuid) -> Result<bool> {
        let mut records = self.records.lock().await;
        match records.get_mut(&jti) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke_all_for_user(&self, user_id: UserId) -> Result<u64> {
        let mut records = self.records.lock().await;
        let mut revoked = 0;
        for record in records.values_mut() {
            if record.user_id == user_id && !record.revoked {
                record.revoked = true;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    async fn delete_revoked(&self) -> Result<u64> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, r| !r.revoked);
        Ok((before - records.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemoryVerificationTokenStore {
    records: Mutex<HashMap<Uuid, VerificationTokenRecord>>,
}

impl MemoryVerificationTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Rewrite a record's creation time, for exercising stale-row sweeping.
    pub async fn backdate(&self, jti: Uuid, created_at: DateTime<Utc>) {
        if let Some(record) = self.records.lock().await.get_mut(&jti) {
            record.created_at = created_at;
        }
    }
}

#[async_trait]
impl VerificationTokenStore for MemoryVerificationTokenStore {
    async fn whitelist(&self, user_id: UserId, token_type: VerificationTokenType) -> Result<VerificationTokenRecord> {
        let record = VerificationTokenRecord {
            id: Uuid::new_v4(),
            user_id,
            token_type,
            revoked: false,
            created_at: Utc::now(),
        };
        self.records.lock().await.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, jti: Uuid) -> Result<Option<VerificationTokenRecord>> {
        Ok(self.records.lock().await.get(&jti).cloned())
    }

    async fn revoke(&self, jti: Uuid) -> Result<()> {
        if let Some(record) = self.records.lock().await.get_mut(&jti) {
            record.revoked = true;
        }
        Ok(())
    }

    async fn consume(&self, jti: Uuid) -> Result<bool> {
        let mut records = self.records.lock().await;
        match records.get_mut(&jti) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_revoked(&self) -> Result<u64> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, r| !r.revoked);
        Ok((before - records.len()) as u64)
    }

    async fn delete_stale(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut records = self.records.lock().await;
        let before = records.len();
        records.retain(|_, r| r.revoked || r.created_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}

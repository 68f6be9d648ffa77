//! Email verification and password reset flows.
//!
//! Both flows mint a single-use token whose jti is the id of a whitelisted
//! server-side record. Redeeming applies the user mutation first and then
//! consumes the record, so a crash between the two leaves the token safely
//! re-redeemable; the consume CAS still guarantees at most one concurrent
//! redemption reports success.

use std::sync::Arc;

use chrono::Utc;
use tracing::instrument;

use crate::{
    auth::{
        password::{self, Argon2Params},
        tokens::{TokenCodec, TokenPurpose},
    },
    db::{
        models::{
            users::{User, UserCreateRequest},
            verification_tokens::VerificationTokenType,
        },
        store::{UserStore, VerificationTokenStore},
    },
    email::Notifier,
    errors::Error,
    types::{RoleId, UserId},
};

/// Role assigned to self-service signups.
pub const DEFAULT_ROLE_ID: RoleId = 1;

pub struct VerificationFlowService {
    codec: Arc<TokenCodec>,
    users: Arc<dyn UserStore>,
    verification_tokens: Arc<dyn VerificationTokenStore>,
    notifier: Arc<dyn Notifier>,
    argon2: Argon2Params,
}

impl VerificationFlowService {
    pub fn new(
        codec: Arc<TokenCodec>,
        users: Arc<dyn UserStore>,
        verification_tokens: Arc<dyn VerificationTokenStore>,
        notifier: Arc<dyn Notifier>,
        argon2: Argon2Params,
    ) -> Self {
        Self {
            codec,
            users,
            verification_tokens,
            notifier,
            argon2,
        }
    }

    /// Create an unverified account and send the verification email.
    ///
    /// A notifier failure after the user row exists is reported in the return
    /// value rather than failing the signup; the caller can surface it and the
    /// user can ask for a resend.
    #[instrument(skip(self, password_input), err)]
    pub async fn signup(&self, email: &str, name: &str, password_input: &str) -> Result<(User, Option<Error>), Error> {
        let email = email.trim().to_lowercase();

        // Hash the password on a blocking thread to avoid blocking async runtime
        let password = password_input.to_string();
        let params = self.argon2;
        let password_hash = tokio::task::spawn_blocking(move || password::hash_string_with_params(&password, Some(params)))
            .await
            .map_err(|e| Error::Internal {
                operation: format!("spawn password hashing task: {e}"),
            })??;

        let user = self
            .users
            .create(&UserCreateRequest {
                email,
                name: name.trim().to_string(),
                password_hash,
                role_id: DEFAULT_ROLE_ID,
            })
            .await?;

        let email_error = self.issue_email_verification(user.id).await.err();
        if let Some(ref e) = email_error {
            tracing::warn!(user_id = user.id, error = %e, "signup succeeded but verification email failed");
        }

        Ok((user, email_error))
    }

    /// Whitelist a fresh email-verification record for `user_id`, mint the
    /// matching token, and mail the link.
    #[instrument(skip(self), err)]
    pub async fn issue_email_verification(&self, user_id: UserId) -> Result<(), Error> {
        let user = self.users.find_by_id(user_id).await?.ok_or(Error::UserNotFound)?;

        if user.is_verified() {
            return Err(Error::AlreadyVerified);
        }

        let record = self
            .verification_tokens
            .whitelist(user.id, VerificationTokenType::EmailVerification)
            .await?;
        let token = self.codec.mint_verification_token(user.id, record.id)?;

        self.notifier.send_verification_email(&user.email, &user.name, &token).await
    }

    /// Redeem an email-verification token, marking the owning user verified.
    #[instrument(skip_all, err)]
    pub async fn redeem_email_verification(&self, token: &str) -> Result<User, Error> {
        let claims = self.codec.verify(token, TokenPurpose::EmailVerification)?;
        let jti = claims.jti.ok_or(Error::MissingJti)?;

        let record = match self.verification_tokens.find_by_id(jti).await? {
            Some(r) if r.token_type == VerificationTokenType::EmailVerification => r,
            Some(_) => {
                tracing::warn!(%jti, "verification token jti resolves to a record of another type");
                return Err(Error::UnknownOrRevokedToken);
            }
            None => {
                tracing::warn!(%jti, "verification token carries a jti with no record");
                return Err(Error::UnknownOrRevokedToken);
            }
        };
        if record.revoked {
            tracing::debug!(%jti, "verification token already redeemed or revoked");
            return Err(Error::UnknownOrRevokedToken);
        }

        let user = self
            .users
            .find_by_id(record.user_id)
            .await?
            .ok_or(Error::UserNotFound)?;

        if user.is_verified() {
            // stale token for an account verified through another path
            self.verification_tokens.revoke(jti).await?;
            return Err(Error::AlreadyVerified);
        }

        let user = self.users.set_email_verified(user.id, Utc::now()).await?;

        if !self.verification_tokens.consume(jti).await? {
            return Err(Error::UnknownOrRevokedToken);
        }

        Ok(user)
    }

    /// Whitelist a password-reset record and mail the reset link.
    ///
    /// Callers gate on verification status before invoking this; the flow
    /// itself only requires that the user exists.
    #[instrument(skip(self), err)]
    pub async fn issue_password_reset(&self, user_id: UserId) -> Result<(), Error> {
        let user = self.users.find_by_id(user_id).await?.ok_or(Error::UserNotFound)?;

        let record = self
            .verification_tokens
            .whitelist(user.id, VerificationTokenType::PasswordReset)
            .await?;
        let token = self.codec.mint_password_reset_token(user.id, record.id)?;

        self.notifier.send_password_reset_email(&user.email, &user.name, &token).await
    }

    /// Redeem a password-reset token, replacing the user's password hash.
    #[instrument(skip_all, err)]
    pub async fn redeem_password_reset(&self, token: &str, new_password: &str) -> Result<User, Error> {
        let claims = self.codec.verify(token, TokenPurpose::PasswordReset)?;
        let jti = claims.jti.ok_or(Error::MissingJti)?;

        let record = match self.verification_tokens.find_by_id(jti).await? {
            Some(r) if r.token_type == VerificationTokenType::PasswordReset => r,
            Some(_) => {
                tracing::warn!(%jti, "reset token jti resolves to a record of another type");
                return Err(Error::UnknownOrRevokedToken);
            }
            None => {
                tracing::warn!(%jti, "reset token carries a jti with no record");
                return Err(Error::UnknownOrRevokedToken);
            }
        };
        if record.revoked {
            tracing::debug!(%jti, "reset token already redeemed or revoked");
            return Err(Error::UnknownOrRevokedToken);
        }

        let user = self
            .users
            .find_by_id(record.user_id)
            .await?
            .ok_or(Error::UserNotFound)?;

        // Hash the password on a blocking thread to avoid blocking async runtime
        let password = new_password.to_string();
        let params = self.argon2;
        let password_hash = tokio::task::spawn_blocking(move || password::hash_string_with_params(&password, Some(params)))
            .await
            .map_err(|e| Error::Internal {
                operation: format!("spawn password hashing task: {e}"),
            })??;

        let user = self.users.set_password_hash(user.id, &password_hash).await?;

        if !self.verification_tokens.consume(jti).await? {
            return Err(Error::UnknownOrRevokedToken);
        }

        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::memory::{MemoryUserStore, MemoryVerificationTokenStore},
        test_utils::{MockNotifier, test_codec},
    };

    struct Fixture {
        service: VerificationFlowService,
        users: Arc<MemoryUserStore>,
        tokens: Arc<MemoryVerificationTokenStore>,
        notifier: Arc<MockNotifier>,
    }

    fn fixture() -> Fixture {
        let users = Arc::new(MemoryUserStore::new());
        let tokens = Arc::new(MemoryVerificationTokenStore::new());
        let notifier = Arc::new(MockNotifier::default());
        // small memory cost keeps the hashing-heavy tests fast
        let service = VerificationFlowService::new(
            Arc::new(test_codec()),
            users.clone(),
            tokens.clone(),
            notifier.clone(),
            Argon2Params {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
        );
        Fixture {
            service,
            users,
            tokens,
            notifier,
        }
    }

    #[tokio::test]
    async fn signup_creates_unverified_user_and_sends_email() {
        let fx = fixture();

        let (user, email_error) = fx.service.signup("Ada@FiniteLoop.Club", "Ada", "correct horse").await.unwrap();

        assert!(email_error.is_none());
        assert_eq!(user.email, "ada@finiteloop.club");
        assert!(!user.is_verified());
        assert_eq!(fx.notifier.verification_emails().await.len(), 1);
    }

    #[tokio::test]
    async fn signup_rejects_duplicate_email() {
        let fx = fixture();
        fx.service.signup("ada@finiteloop.club", "Ada", "correct horse").await.unwrap();

        let err = fx.service.signup("ada@finiteloop.club", "Ada Again", "other").await.unwrap_err();
        assert!(matches!(err, Error::Database(crate::db::errors::DbError::UniqueViolation { .. })));
    }

    #[tokio::test]
    async fn signup_survives_notifier_failure() {
        let fx = fixture();
        fx.notifier.fail_next().await;

        let (user, email_error) = fx.service.signup("ada@finiteloop.club", "Ada", "correct horse").await.unwrap();

        assert!(email_error.is_some());
        assert!(fx.users.find_by_id(user.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn verify_email_flow_end_to_end() {
        let fx = fixture();
        let (user, _) = fx.service.signup("ada@finiteloop.club", "Ada", "correct horse").await.unwrap();

        let token = fx.notifier.verification_emails().await[0].token.clone();
        let verified = fx.service.redeem_email_verification(&token).await.unwrap();

        assert_eq!(verified.id, user.id);
        assert!(verified.is_verified());

        // the token is single-use
        let err = fx.service.redeem_email_verification(&token).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyVerified | Error::UnknownOrRevokedToken));
    }

    #[tokio::test]
    async fn concurrent_verification_has_exactly_one_winner() {
        let fx = fixture();
        fx.service.signup("ada@finiteloop.club", "Ada", "correct horse").await.unwrap();

        let token = fx.notifier.verification_emails().await[0].token.clone();

        let (a, b) = tokio::join!(
            fx.service.redeem_email_verification(&token),
            fx.service.redeem_email_verification(&token)
        );

        let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn resend_verification_rejects_verified_user() {
        let fx = fixture();
        let (user, _) = fx.service.signup("ada@finiteloop.club", "Ada", "correct horse").await.unwrap();
        fx.users.set_email_verified(user.id, Utc::now()).await.unwrap();

        let err = fx.service.issue_email_verification(user.id).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyVerified));
    }

    #[tokio::test]
    async fn redeem_rejects_token_with_no_record() {
        let fx = fixture();
        let (user, _) = fx.service.signup("ada@finiteloop.club", "Ada", "correct horse").await.unwrap();

        // validly signed, but its jti does not match any record
        let token = test_codec().mint_verification_token(user.id, uuid::Uuid::new_v4()).unwrap();
        let err = fx.service.redeem_email_verification(&token).await.unwrap_err();
        assert!(matches!(err, Error::UnknownOrRevokedToken));
    }

    #[tokio::test]
    async fn redeem_rejects_reset_token_on_verification_endpoint() {
        let fx = fixture();
        let (user, _) = fx.service.signup("ada@finiteloop.club", "Ada", "correct horse").await.unwrap();

        fx.service.issue_password_reset(user.id).await.unwrap();
        let reset_token = fx.notifier.reset_emails().await[0].token.clone();

        // a reset token is signed with a different purpose secret
        let err = fx.service.redeem_email_verification(&reset_token).await.unwrap_err();
        assert!(matches!(err, Error::TokenInvalid));
    }

    #[tokio::test]
    async fn password_reset_flow_end_to_end() {
        let fx = fixture();
        let (user, _) = fx.service.signup("ada@finiteloop.club", "Ada", "correct horse").await.unwrap();

        fx.service.issue_password_reset(user.id).await.unwrap();
        let token = fx.notifier.reset_emails().await[0].token.clone();

        let updated = fx.service.redeem_password_reset(&token, "brand new password").await.unwrap();
        assert!(password::verify_string("brand new password", &updated.password_hash).unwrap());

        // single-use
        let err = fx.service.redeem_password_reset(&token, "again").await.unwrap_err();
        assert!(matches!(err, Error::UnknownOrRevokedToken));
    }

    #[tokio::test]
    async fn reset_with_revoked_record_leaves_password_unchanged() {
        let fx = fixture();
        let (user, _) = fx.service.signup("ada@finiteloop.club", "Ada", "correct horse").await.unwrap();
        let original_hash = user.password_hash.clone();

        fx.service.issue_password_reset(user.id).await.unwrap();
        let token = fx.notifier.reset_emails().await[0].token.clone();

        let record = fx.tokens.find_by_id(
            test_codec()
                .verify(&token, TokenPurpose::PasswordReset)
                .unwrap()
                .jti
                .unwrap(),
        )
        .await
        .unwrap()
        .unwrap();
        fx.tokens.revoke(record.id).await.unwrap();

        let err = fx.service.redeem_password_reset(&token, "attacker password").await.unwrap_err();
        assert!(matches!(err, Error::UnknownOrRevokedToken));

        let stored = fx.users.find_by_id(user.id).await.unwrap().unwrap();
        assert_eq!(stored.password_hash, original_hash);
    }
}

//! Session lifecycle: login, refresh-token rotation, sign-out.
//!
//! Refresh tokens are whitelisted server-side under their jti claim. Rotation
//! consumes the presented record atomically and whitelists a replacement, so a
//! replayed token fails with `UnknownOrRevokedToken` no matter how the
//! concurrent attempts interleave.

use std::sync::Arc;

use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    auth::{
        password,
        tokens::{TokenCodec, TokenPurpose},
    },
    db::{
        models::users::User,
        store::{RefreshTokenStore, UserStore},
    },
    errors::Error,
    types::UserId,
};

/// Access/refresh pair handed out at login and on every rotation.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
}

pub struct AuthSessionService {
    codec: Arc<TokenCodec>,
    users: Arc<dyn UserStore>,
    refresh_tokens: Arc<dyn RefreshTokenStore>,
}

impl AuthSessionService {
    pub fn new(codec: Arc<TokenCodec>, users: Arc<dyn UserStore>, refresh_tokens: Arc<dyn RefreshTokenStore>) -> Self {
        Self {
            codec,
            users,
            refresh_tokens,
        }
    }

    /// Mint a fresh access/refresh pair for `user_id` and whitelist the
    /// refresh token's digest under a new jti.
    async fn issue_session(&self, user_id: UserId) -> Result<SessionTokens, Error> {
        let jti = Uuid::new_v4();
        let refresh_token = self.codec.mint_refresh_token(user_id, jti)?;

        self.refresh_tokens
            .whitelist(jti, &password::token_digest(&refresh_token), user_id)
            .await?;

        let access_token = self.codec.mint_access_token(user_id)?;

        Ok(SessionTokens {
            access_token,
            refresh_token,
        })
    }

    /// Authenticate with email and password.
    ///
    /// The email is matched case-insensitively (stored lowercased). Login is
    /// refused for unverified accounts even when the password is correct.
    #[instrument(skip(self, password_input), err)]
    pub async fn login(&self, email: &str, password_input: &str) -> Result<(User, SessionTokens), Error> {
        let email = email.trim().to_lowercase();

        let user = self.users.find_by_email(&email).await?.ok_or(Error::UserNotFound)?;

        // Verify password on a blocking thread to avoid blocking async runtime
        let password = password_input.to_string();
        let hash = user.password_hash.clone();
        let is_valid = tokio::task::spawn_blocking(move || password::verify_string(&password, &hash))
            .await
            .map_err(|e| Error::Internal {
                operation: format!("spawn password verification task: {e}"),
            })??;

        if !is_valid {
            return Err(Error::InvalidCredentials);
        }

        if !user.is_verified() {
            return Err(Error::EmailNotVerified);
        }

        let tokens = self.issue_session(user.id).await?;
        Ok((user, tokens))
    }

    /// Exchange a valid refresh token for a new access/refresh pair.
    ///
    /// The presented record is consumed before the replacement is whitelisted.
    /// When two callers race on the same token, exactly one wins the consume
    /// and the other sees `UnknownOrRevokedToken`.
    #[instrument(skip_all, err)]
    pub async fn rotate(&self, refresh_token: &str) -> Result<(User, SessionTokens), Error> {
        if refresh_token.trim().is_empty() {
            return Err(Error::ValidationFailed {
                message: "Refresh token must not be empty".to_string(),
            });
        }

        let claims = self.codec.verify(refresh_token, TokenPurpose::Refresh)?;
        let jti = claims.jti.ok_or(Error::MissingJti)?;

        let record = match self.refresh_tokens.find_by_id(jti).await? {
            Some(record) => record,
            None => {
                warn!(%jti, "refresh token carries a jti with no whitelist record");
                return Err(Error::UnknownOrRevokedToken);
            }
        };
        if record.revoked {
            warn!(%jti, "refresh token replayed after rotation or sign-out");
            return Err(Error::UnknownOrRevokedToken);
        }

        if record.hashed_token != password::token_digest(refresh_token) {
            return Err(Error::TokenMismatch);
        }

        // The record, not the claim, decides whose session this is.
        let user = self
            .users
            .find_by_id(record.user_id)
            .await?
            .ok_or(Error::UserNotFound)?;

        if !self.refresh_tokens.consume(jti).await? {
            return Err(Error::UnknownOrRevokedToken);
        }

        let tokens = self.issue_session(user.id).await?;
        Ok((user, tokens))
    }

    /// Revoke every refresh token belonging to `user_id`.
    ///
    /// Returns the number of records revoked. Signing out an already
    /// signed-out session is not an error.
    #[instrument(skip(self), err)]
    pub async fn sign_out(&self, user_id: UserId) -> Result<u64, Error> {
        Ok(self.refresh_tokens.revoke_all_for_user(user_id).await?)
    }

    /// Validate an access token and return the authenticated user id.
    pub fn verify_access(&self, access_token: &str) -> Result<UserId, Error> {
        let claims = self.codec.verify(access_token, TokenPurpose::Access)?;
        Ok(claims.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::{
            memory::{MemoryRefreshTokenStore, MemoryUserStore},
            models::users::UserCreateRequest,
        },
        test_utils::test_codec,
    };

    struct Fixture {
        service: AuthSessionService,
        refresh_tokens: Arc<MemoryRefreshTokenStore>,
        users: Arc<MemoryUserStore>,
    }

    async fn fixture() -> Fixture {
        let users = Arc::new(MemoryUserStore::new());
        let refresh_tokens = Arc::new(MemoryRefreshTokenStore::new());
        let service = AuthSessionService::new(Arc::new(test_codec()), users.clone(), refresh_tokens.clone());
        Fixture {
            service,
            refresh_tokens,
            users,
        }
    }

    async fn seed_user(fixture: &Fixture, email: &str, password: &str, verified: bool) -> UserId {
        let user = fixture
            .users
            .create(&UserCreateRequest {
                email: email.to_string(),
                name: "Test User".to_string(),
                password_hash: password::hash_string(password).unwrap(),
                role_id: 1,
            })
            .await
            .unwrap();
        if verified {
            fixture.users.set_email_verified(user.id, chrono::Utc::now()).await.unwrap();
        }
        user.id
    }

    #[tokio::test]
    async fn login_succeeds_for_verified_user() {
        let fx = fixture().await;
        let user_id = seed_user(&fx, "ada@finiteloop.club", "correct horse", true).await;

        let (user, tokens) = fx.service.login("ada@finiteloop.club", "correct horse").await.unwrap();

        assert_eq!(user.id, user_id);
        assert_eq!(fx.service.verify_access(&tokens.access_token).unwrap(), user_id);
        assert_eq!(fx.refresh_tokens.len().await, 1);
    }

    #[tokio::test]
    async fn login_normalizes_email_case() {
        let fx = fixture().await;
        seed_user(&fx, "ada@finiteloop.club", "correct horse", true).await;

        let result = fx.service.login("  Ada@FiniteLoop.Club ", "correct horse").await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn login_rejects_unknown_email() {
        let fx = fixture().await;

        let err = fx.service.login("ghost@finiteloop.club", "whatever").await.unwrap_err();
        assert!(matches!(err, Error::UserNotFound));
    }

    #[tokio::test]
    async fn login_rejects_wrong_password() {
        let fx = fixture().await;
        seed_user(&fx, "ada@finiteloop.club", "correct horse", true).await;

        let err = fx.service.login("ada@finiteloop.club", "wrong").await.unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials));
    }

    #[tokio::test]
    async fn login_rejects_unverified_user_even_with_correct_password() {
        let fx = fixture().await;
        seed_user(&fx, "ada@finiteloop.club", "correct horse", false).await;

        let err = fx.service.login("ada@finiteloop.club", "correct horse").await.unwrap_err();
        assert!(matches!(err, Error::EmailNotVerified));
    }

    #[tokio::test]
    async fn rotate_issues_new_pair_and_invalidates_old_token() {
        let fx = fixture().await;
        let user_id = seed_user(&fx, "ada@finiteloop.club", "correct horse", true).await;

        let (_, original) = fx.service.login("ada@finiteloop.club", "correct horse").await.unwrap();
        let (rotated_user, rotated) = fx.service.rotate(&original.refresh_token).await.unwrap();

        assert_eq!(rotated_user.id, user_id);
        assert_ne!(rotated.refresh_token, original.refresh_token);
        assert_eq!(fx.service.verify_access(&rotated.access_token).unwrap(), user_id);

        // replaying the consumed token must fail
        let err = fx.service.rotate(&original.refresh_token).await.unwrap_err();
        assert!(matches!(err, Error::UnknownOrRevokedToken));
    }

    #[tokio::test]
    async fn rotate_chain_works_repeatedly() {
        let fx = fixture().await;
        seed_user(&fx, "ada@finiteloop.club", "correct horse", true).await;

        let (_, mut tokens) = fx.service.login("ada@finiteloop.club", "correct horse").await.unwrap();
        for _ in 0..3 {
            (_, tokens) = fx.service.rotate(&tokens.refresh_token).await.unwrap();
        }

        // one live record per session plus the consumed ones
        assert_eq!(fx.refresh_tokens.len().await, 4);
    }

    #[tokio::test]
    async fn concurrent_rotation_has_exactly_one_winner() {
        let fx = fixture().await;
        seed_user(&fx, "ada@finiteloop.club", "correct horse", true).await;

        let (_, tokens) = fx.service.login("ada@finiteloop.club", "correct horse").await.unwrap();

        let (a, b) = tokio::join!(
            fx.service.rotate(&tokens.refresh_token),
            fx.service.rotate(&tokens.refresh_token)
        );

        let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(successes, 1);

        let failure = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert!(matches!(failure, Error::UnknownOrRevokedToken));
    }

    #[tokio::test]
    async fn rotate_rejects_access_token() {
        let fx = fixture().await;
        let user_id = seed_user(&fx, "ada@finiteloop.club", "correct horse", true).await;

        let access = test_codec().mint_access_token(user_id).unwrap();
        let err = fx.service.rotate(&access).await.unwrap_err();
        assert!(matches!(err, Error::TokenInvalid));
    }

    #[tokio::test]
    async fn rotate_rejects_token_with_no_whitelist_record() {
        let fx = fixture().await;
        let user_id = seed_user(&fx, "ada@finiteloop.club", "correct horse", true).await;

        // validly signed, but its jti was never whitelisted
        let token = test_codec().mint_refresh_token(user_id, Uuid::new_v4()).unwrap();
        let err = fx.service.rotate(&token).await.unwrap_err();
        assert!(matches!(err, Error::UnknownOrRevokedToken));
    }

    #[tokio::test]
    async fn rotate_detects_digest_mismatch() {
        let fx = fixture().await;
        let user_id = seed_user(&fx, "ada@finiteloop.club", "correct horse", true).await;

        // whitelist a record whose digest does not belong to the token
        let jti = Uuid::new_v4();
        let token = test_codec().mint_refresh_token(user_id, jti).unwrap();
        fx.refresh_tokens
            .whitelist(jti, &password::token_digest("something else"), user_id)
            .await
            .unwrap();

        let err = fx.service.rotate(&token).await.unwrap_err();
        assert!(matches!(err, Error::TokenMismatch));
    }

    #[tokio::test]
    async fn sign_out_revokes_all_sessions_for_user() {
        let fx = fixture().await;
        let user_id = seed_user(&fx, "ada@finiteloop.club", "correct horse", true).await;

        let (_, first) = fx.service.login("ada@finiteloop.club", "correct horse").await.unwrap();
        let (_, second) = fx.service.login("ada@finiteloop.club", "correct horse").await.unwrap();

        let revoked = fx.service.sign_out(user_id).await.unwrap();
        assert_eq!(revoked, 2);

        for token in [&first.refresh_token, &second.refresh_token] {
            let err = fx.service.rotate(token).await.unwrap_err();
            assert!(matches!(err, Error::UnknownOrRevokedToken));
        }

        // a second sign-out finds nothing left to revoke
        assert_eq!(fx.service.sign_out(user_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sign_out_does_not_touch_other_users() {
        let fx = fixture().await;
        let ada_id = seed_user(&fx, "ada@finiteloop.club", "correct horse", true).await;
        seed_user(&fx, "grace@finiteloop.club", "other password", true).await;

        fx.service.login("ada@finiteloop.club", "correct horse").await.unwrap();
        let (_, grace) = fx.service.login("grace@finiteloop.club", "other password").await.unwrap();

        fx.service.sign_out(ada_id).await.unwrap();

        assert!(fx.service.rotate(&grace.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn rotate_rejects_empty_token() {
        let fx = fixture().await;

        let err = fx.service.rotate("  ").await.unwrap_err();
        assert!(matches!(err, Error::ValidationFailed { .. }));
    }
}

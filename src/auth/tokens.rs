//! Token minting and verification for the four token purposes.
//!
//! Every token is an HS256 JWT carrying the subject user id, an optional jti
//! linking it to its server-side whitelist record, and issued-at/not-before/
//! expiry timestamps. Each purpose signs with its own secret derived from the
//! master secret; a token minted for one purpose never verifies under another.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    config::AuthConfig,
    errors::{Error, Result},
    types::UserId,
};

/// The four token purposes, each with its own signing secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPurpose {
    Access,
    Refresh,
    EmailVerification,
    PasswordReset,
}

impl TokenPurpose {
    /// Suffix appended to the master secret to derive this purpose's signing
    /// secret. The scheme is irregular ("verify" for refresh tokens) but is
    /// part of the wire contract for tokens already in circulation - do not
    /// regularize it.
    fn secret_suffix(self) -> &'static str {
        match self {
            TokenPurpose::Access => "access",
            TokenPurpose::Refresh => "verify",
            TokenPurpose::EmailVerification => "verification",
            TokenPurpose::PasswordReset => "passwordReset",
        }
    }

    fn index(self) -> usize {
        match self {
            TokenPurpose::Access => 0,
            TokenPurpose::Refresh => 1,
            TokenPurpose::EmailVerification => 2,
            TokenPurpose::PasswordReset => 3,
        }
    }
}

const PURPOSES: [TokenPurpose; 4] = [
    TokenPurpose::Access,
    TokenPurpose::Refresh,
    TokenPurpose::EmailVerification,
    TokenPurpose::PasswordReset,
];

/// JWT claims carried by every token purpose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject user id
    pub sub: UserId,
    /// Unique token id, the join key to the server-side whitelist record.
    /// Absent on access tokens, which are self-contained.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<Uuid>,
    /// Issued at (epoch seconds)
    pub iat: i64,
    /// Not before (epoch seconds, equals iat)
    pub nbf: i64,
    /// Expiry (epoch seconds)
    pub exp: i64,
}

struct PurposeKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

/// Mints and verifies the four token kinds. Pure cryptographic operations,
/// no storage access.
pub struct TokenCodec {
    keys: [PurposeKeys; 4],
    access_ttl: Duration,
    refresh_ttl: Duration,
    verification_ttl: Duration,
}

impl TokenCodec {
    pub fn new(master_secret: &str, auth: &AuthConfig) -> Self {
        let keys = PURPOSES.map(|purpose| {
            let secret = format!("{master_secret}{}", purpose.secret_suffix());
            PurposeKeys {
                encoding: EncodingKey::from_secret(secret.as_bytes()),
                decoding: DecodingKey::from_secret(secret.as_bytes()),
            }
        });

        Self {
            keys,
            access_ttl: Duration::from_std(auth.access_token_ttl).unwrap_or_else(|_| Duration::days(1)),
            refresh_ttl: Duration::from_std(auth.refresh_token_ttl).unwrap_or_else(|_| Duration::days(1096)),
            verification_ttl: Duration::from_std(auth.verification_token_ttl).unwrap_or_else(|_| Duration::days(1)),
        }
    }

    /// Mint a self-contained access token. No jti: access tokens are validated
    /// by signature and expiry alone, with no server-side record.
    pub fn mint_access_token(&self, user_id: UserId) -> Result<String> {
        self.mint(TokenPurpose::Access, user_id, None, self.access_ttl)
    }

    /// Mint a refresh token bound to its whitelist record by jti.
    pub fn mint_refresh_token(&self, user_id: UserId, jti: Uuid) -> Result<String> {
        self.mint(TokenPurpose::Refresh, user_id, Some(jti), self.refresh_ttl)
    }

    /// Mint a single-use email-verification token bound to its record by jti.
    pub fn mint_verification_token(&self, user_id: UserId, jti: Uuid) -> Result<String> {
        self.mint(TokenPurpose::EmailVerification, user_id, Some(jti), self.verification_ttl)
    }

    /// Mint a single-use password-reset token bound to its record by jti.
    pub fn mint_password_reset_token(&self, user_id: UserId, jti: Uuid) -> Result<String> {
        self.mint(TokenPurpose::PasswordReset, user_id, Some(jti), self.verification_ttl)
    }

    fn mint(&self, purpose: TokenPurpose, user_id: UserId, jti: Option<Uuid>, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id,
            jti,
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        encode(&Header::default(), &claims, &self.keys[purpose.index()].encoding).map_err(|e| Error::Internal {
            operation: format!("sign {purpose:?} token: {e}"),
        })
    }

    /// Verify signature, expiry, and not-before for the given purpose.
    ///
    /// Failure modes are distinguishable so callers can surface expiry (benign,
    /// re-login) separately from signature problems.
    pub fn verify(&self, token: &str, purpose: TokenPurpose) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_nbf = true;

        let token_data = decode::<Claims>(token, &self.keys[purpose.index()].decoding, &validation).map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Error::TokenExpired,
            jsonwebtoken::errors::ErrorKind::ImmatureSignature => Error::TokenNotYetValid,

            // Client errors: malformed tokens, wrong-purpose signatures, bad claims
            jsonwebtoken::errors::ErrorKind::InvalidToken
            | jsonwebtoken::errors::ErrorKind::InvalidSignature
            | jsonwebtoken::errors::ErrorKind::MissingRequiredClaim(_)
            | jsonwebtoken::errors::ErrorKind::InvalidIssuer
            | jsonwebtoken::errors::ErrorKind::InvalidAudience
            | jsonwebtoken::errors::ErrorKind::InvalidSubject
            | jsonwebtoken::errors::ErrorKind::InvalidAlgorithm
            | jsonwebtoken::errors::ErrorKind::Base64(_)
            | jsonwebtoken::errors::ErrorKind::Json(_)
            | jsonwebtoken::errors::ErrorKind::Utf8(_) => Error::TokenInvalid,

            // Server errors: key issues, internal failures
            _ => Error::Internal {
                operation: format!("verify {purpose:?} token: {e}"),
            },
        })?;

        Ok(token_data.claims)
    }

    /// Decode claims without verifying the signature.
    ///
    /// Only for bookkeeping (reading expiry for cleanup decisions). Never use
    /// the result for an authorization decision.
    pub fn decode_unsafe(token: &str) -> Option<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
            .ok()
            .map(|data| data.claims)
    }

    /// Whether the token's expiry claim is in the past.
    ///
    /// Undecodable tokens count as expired.
    pub fn is_expired(token: &str) -> bool {
        match Self::decode_unsafe(token) {
            Some(claims) => claims.exp <= Utc::now().timestamp(),
            None => true,
        }
    }

    /// The token's expiry as epoch seconds, or 0 if it cannot be decoded.
    pub fn expires_at(token: &str) -> i64 {
        Self::decode_unsafe(token).map_or(0, |claims| claims.exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;

    fn codec() -> TokenCodec {
        TokenCodec::new("test-master-secret", &AuthConfig::default())
    }

    /// Mint a token with arbitrary timestamps, bypassing the codec's clock.
    fn mint_raw(codec_secret: &str, purpose: TokenPurpose, claims: &Claims) -> String {
        let secret = format!("{codec_secret}{}", purpose.secret_suffix());
        encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn mint_and_verify_round_trip() {
        let codec = codec();
        let jti = Uuid::new_v4();

        let token = codec.mint_refresh_token(42, jti).unwrap();
        let claims = codec.verify(&token, TokenPurpose::Refresh).unwrap();

        assert_eq!(claims.sub, 42);
        assert_eq!(claims.jti, Some(jti));
        assert!(claims.exp > claims.iat);
        assert_eq!(claims.nbf, claims.iat);
    }

    #[test]
    fn access_tokens_carry_no_jti() {
        let codec = codec();
        let token = codec.mint_access_token(7).unwrap();
        let claims = codec.verify(&token, TokenPurpose::Access).unwrap();
        assert_eq!(claims.jti, None);
    }

    #[test]
    fn purposes_do_not_cross_verify() {
        let codec = codec();
        let jti = Uuid::new_v4();

        let refresh = codec.mint_refresh_token(1, jti).unwrap();
        let verification = codec.mint_verification_token(1, jti).unwrap();
        let reset = codec.mint_password_reset_token(1, jti).unwrap();

        assert!(matches!(codec.verify(&refresh, TokenPurpose::Access), Err(Error::TokenInvalid)));
        assert!(matches!(
            codec.verify(&verification, TokenPurpose::PasswordReset),
            Err(Error::TokenInvalid)
        ));
        assert!(matches!(
            codec.verify(&reset, TokenPurpose::EmailVerification),
            Err(Error::TokenInvalid)
        ));
    }

    #[test]
    fn different_master_secrets_do_not_verify() {
        let codec_a = codec();
        let codec_b = TokenCodec::new("other-master-secret", &AuthConfig::default());

        let token = codec_a.mint_access_token(1).unwrap();
        assert!(matches!(codec_b.verify(&token, TokenPurpose::Access), Err(Error::TokenInvalid)));
    }

    #[test]
    fn expired_token_fails_with_token_expired() {
        let codec = codec();
        let now = Utc::now().timestamp();
        // Past the default 60s leeway
        let claims = Claims {
            sub: 1,
            jti: None,
            iat: now - 7200,
            nbf: now - 7200,
            exp: now - 3600,
        };
        let token = mint_raw("test-master-secret", TokenPurpose::Access, &claims);

        assert!(matches!(codec.verify(&token, TokenPurpose::Access), Err(Error::TokenExpired)));
    }

    #[test]
    fn not_yet_valid_token_fails_distinctly() {
        let codec = codec();
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: 1,
            jti: None,
            iat: now,
            nbf: now + 3600,
            exp: now + 7200,
        };
        let token = mint_raw("test-master-secret", TokenPurpose::Access, &claims);

        assert!(matches!(codec.verify(&token, TokenPurpose::Access), Err(Error::TokenNotYetValid)));
    }

    #[test]
    fn malformed_tokens_fail_with_token_invalid() {
        let codec = codec();
        for token in ["", "not-a-token", "a.b", "too.many.parts.in.this.token"] {
            assert!(
                matches!(codec.verify(token, TokenPurpose::Refresh), Err(Error::TokenInvalid)),
                "expected TokenInvalid for {token:?}"
            );
        }
    }

    #[test]
    fn decode_unsafe_reads_claims_without_a_key() {
        let codec = codec();
        let jti = Uuid::new_v4();
        let token = codec.mint_refresh_token(9, jti).unwrap();

        let claims = TokenCodec::decode_unsafe(&token).unwrap();
        assert_eq!(claims.sub, 9);
        assert_eq!(claims.jti, Some(jti));

        assert!(TokenCodec::decode_unsafe("garbage").is_none());
    }

    #[test]
    fn is_expired_and_expires_at() {
        let codec = codec();
        let token = codec.mint_access_token(1).unwrap();

        assert!(!TokenCodec::is_expired(&token));
        assert!(TokenCodec::expires_at(&token) > Utc::now().timestamp());

        let now = Utc::now().timestamp();
        let stale = mint_raw(
            "test-master-secret",
            TokenPurpose::Access,
            &Claims {
                sub: 1,
                jti: None,
                iat: now - 7200,
                nbf: now - 7200,
                exp: now - 3600,
            },
        );
        assert!(TokenCodec::is_expired(&stale));
        assert_eq!(TokenCodec::expires_at(&stale), now - 3600);

        // Undecodable input counts as expired with expiry 0
        assert!(TokenCodec::is_expired("garbage"));
        assert_eq!(TokenCodec::expires_at("garbage"), 0);
    }
}

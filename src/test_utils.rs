//! Test utilities (available with the `test-utils` feature).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{
    AppState,
    auth::{password::Argon2Params, session::AuthSessionService, tokens::TokenCodec, verification::VerificationFlowService},
    config::{Config, EmailTransportConfig},
    db::memory::{MemoryRefreshTokenStore, MemoryUserStore, MemoryVerificationTokenStore},
    email::Notifier,
    errors::Error,
};

pub const TEST_SECRET: &str = "test-secret-key-for-testing-only";

pub fn create_test_config() -> Config {
    // Use temp directory for test emails
    let temp_dir = std::env::temp_dir().join(format!("loopauth-test-emails-{}", std::process::id()));

    let mut config = Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        dashboard_url: "https://example.com".to_string(),
        secret_key: Some(TEST_SECRET.to_string()),
        ..Config::default()
    };
    config.email.transport = EmailTransportConfig::File {
        path: temp_dir.to_string_lossy().to_string(),
    };
    // light hashing parameters keep the test suite fast
    config.auth.password.argon2_memory_kib = 1024;
    config.auth.password.argon2_iterations = 1;
    config
}

/// Codec signing with the fixed test secret and default lifetimes.
pub fn test_codec() -> TokenCodec {
    TokenCodec::new(TEST_SECRET, &create_test_config().auth)
}

/// An email captured by [`MockNotifier`] instead of being sent.
#[derive(Debug, Clone)]
pub struct CapturedEmail {
    pub to_email: String,
    pub to_name: String,
    pub token: String,
}

/// Notifier that records outbound emails for assertions.
#[derive(Default)]
pub struct MockNotifier {
    verification: Mutex<Vec<CapturedEmail>>,
    reset: Mutex<Vec<CapturedEmail>>,
    fail_next: Mutex<bool>,
}

impl MockNotifier {
    pub async fn verification_emails(&self) -> Vec<CapturedEmail> {
        self.verification.lock().await.clone()
    }

    pub async fn reset_emails(&self) -> Vec<CapturedEmail> {
        self.reset.lock().await.clone()
    }

    /// Make the next send fail with an internal error.
    pub async fn fail_next(&self) {
        *self.fail_next.lock().await = true;
    }

    async fn check_failure(&self) -> Result<(), Error> {
        let mut fail = self.fail_next.lock().await;
        if *fail {
            *fail = false;
            return Err(Error::Internal {
                operation: "send email: simulated transport failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send_verification_email(&self, to_email: &str, to_name: &str, token: &str) -> Result<(), Error> {
        self.check_failure().await?;
        self.verification.lock().await.push(CapturedEmail {
            to_email: to_email.to_string(),
            to_name: to_name.to_string(),
            token: token.to_string(),
        });
        Ok(())
    }

    async fn send_password_reset_email(&self, to_email: &str, to_name: &str, token: &str) -> Result<(), Error> {
        self.check_failure().await?;
        self.reset.lock().await.push(CapturedEmail {
            to_email: to_email.to_string(),
            to_name: to_name.to_string(),
            token: token.to_string(),
        });
        Ok(())
    }
}

/// Fully wired application state over in-memory stores, plus handles to the
/// backing fakes for assertions.
#[derive(Clone)]
pub struct TestApp {
    pub state: AppState,
    pub notifier: Arc<MockNotifier>,
    pub users: Arc<MemoryUserStore>,
    pub refresh_tokens: Arc<MemoryRefreshTokenStore>,
    pub verification_tokens: Arc<MemoryVerificationTokenStore>,
}

impl TestApp {
    pub fn mock_notifier(&self) -> Arc<MockNotifier> {
        self.notifier.clone()
    }
}

pub fn create_test_state() -> TestApp {
    let config = Arc::new(create_test_config());
    let codec = Arc::new(TokenCodec::new(TEST_SECRET, &config.auth));

    let users = Arc::new(MemoryUserStore::new());
    let refresh_tokens = Arc::new(MemoryRefreshTokenStore::new());
    let verification_tokens = Arc::new(MemoryVerificationTokenStore::new());
    let notifier = Arc::new(MockNotifier::default());

    let sessions = Arc::new(AuthSessionService::new(codec.clone(), users.clone(), refresh_tokens.clone()));
    let verification = Arc::new(VerificationFlowService::new(
        codec.clone(),
        users.clone(),
        verification_tokens.clone(),
        notifier.clone(),
        Argon2Params::from(&config.auth.password),
    ));

    let state = AppState {
        config,
        codec,
        users: users.clone(),
        refresh_tokens: refresh_tokens.clone(),
        verification_tokens: verification_tokens.clone(),
        sessions,
        verification,
    };

    TestApp {
        state,
        notifier,
        users,
        refresh_tokens,
        verification_tokens,
    }
}

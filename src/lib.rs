//! Authentication and session token service for the Finite Loop Club
//! dashboard.
//!
//! The crate issues four kinds of HS256 JWTs (access, refresh, email
//! verification, password reset), each signed with a secret derived from the
//! configured master secret. Refresh tokens rotate through a server-side
//! whitelist keyed by jti, and verification/reset tokens are single-use
//! records in the same style. A background sweeper purges spent records.
//!
//! ## Architecture
//!
//! - [`auth::tokens`] mints and verifies the JWTs
//! - [`auth::session`] and [`auth::verification`] implement the flows over
//!   the [`db::store`] traits
//! - [`db::handlers`] are the PostgreSQL store implementations;
//!   [`db::memory`] backs the tests
//! - [`api`] is the axum surface, documented via utoipa
//! - [`sweeper`] runs the periodic cleanup

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod email;
pub mod errors;
pub mod openapi;
pub mod sweeper;
pub mod telemetry;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::{
    auth::{session::AuthSessionService, tokens::TokenCodec, verification::VerificationFlowService},
    config::Config,
    db::{
        handlers::{PgRefreshTokenStore, PgUserStore, PgVerificationTokenStore},
        store::{RefreshTokenStore, UserStore, VerificationTokenStore},
    },
    email::{EmailService, Notifier},
    errors::Error,
    openapi::ApiDoc,
    sweeper::MaintenanceSweeper,
};

/// Shared application state for handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub codec: Arc<TokenCodec>,
    pub users: Arc<dyn UserStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub verification_tokens: Arc<dyn VerificationTokenStore>,
    pub sessions: Arc<AuthSessionService>,
    pub verification: Arc<VerificationFlowService>,
}

/// Get the loopauth database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Assemble the HTTP router over the given state.
pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/auth/signup", post(api::handlers::auth::signup))
        .route("/auth/login", post(api::handlers::auth::login))
        .route("/auth/refresh", post(api::handlers::auth::refresh))
        .route("/auth/verify-email", post(api::handlers::auth::verify_email))
        .route("/auth/resend-verification", post(api::handlers::auth::resend_verification))
        .route("/auth/password-reset-request", post(api::handlers::auth::request_password_reset))
        .route("/auth/reset-password", post(api::handlers::auth::reset_password))
        .route("/auth/signout", post(api::handlers::auth::signout))
        .with_state(state);

    Router::new()
        .route("/health", get(api::handlers::health::health))
        .route("/api-docs/openapi.json", get(|| async { axum::Json(ApiDoc::openapi()) }))
        .merge(auth_routes)
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
}

/// Wire application state from a live database pool and config.
fn build_state(pool: PgPool, config: Config) -> Result<AppState, Error> {
    let secret_key = config.secret_key.as_deref().ok_or(Error::Internal {
        operation: "read secret_key from config".to_string(),
    })?;

    let codec = Arc::new(TokenCodec::new(secret_key, &config.auth));

    let users: Arc<dyn UserStore> = Arc::new(PgUserStore::new(pool.clone()));
    let refresh_tokens: Arc<dyn RefreshTokenStore> = Arc::new(PgRefreshTokenStore::new(pool.clone()));
    let verification_tokens: Arc<dyn VerificationTokenStore> = Arc::new(PgVerificationTokenStore::new(pool));

    let notifier: Arc<dyn Notifier> = Arc::new(EmailService::new(&config)?);

    let sessions = Arc::new(AuthSessionService::new(codec.clone(), users.clone(), refresh_tokens.clone()));
    let verification = Arc::new(VerificationFlowService::new(
        codec.clone(),
        users.clone(),
        verification_tokens.clone(),
        notifier,
        auth::password::Argon2Params::from(&config.auth.password),
    ));

    Ok(AppState {
        config: Arc::new(config),
        codec,
        users,
        refresh_tokens,
        verification_tokens,
        sessions,
        verification,
    })
}

/// Long-running tasks spawned at startup. Dropping the guard or calling
/// `shutdown` cancels them.
pub struct BackgroundServices {
    background_tasks: Vec<tokio::task::JoinHandle<()>>,
    shutdown_token: tokio_util::sync::CancellationToken,
    pub drop_guard: Option<tokio_util::sync::DropGuard>,
}

impl BackgroundServices {
    fn start(state: &AppState) -> Self {
        let shutdown_token = tokio_util::sync::CancellationToken::new();
        let drop_guard = shutdown_token.clone().drop_guard();
        let mut background_tasks = Vec::new();

        if state.config.sweeper.enabled {
            let sweeper = MaintenanceSweeper::new(
                state.refresh_tokens.clone(),
                state.verification_tokens.clone(),
                state.config.sweeper.clone(),
            );
            background_tasks.push(tokio::spawn(sweeper.run(shutdown_token.clone())));
        }

        Self {
            background_tasks,
            shutdown_token,
            drop_guard: Some(drop_guard),
        }
    }

    /// Gracefully shutdown all background tasks
    pub async fn shutdown(self) {
        self.shutdown_token.cancel();

        for handle in self.background_tasks {
            let _ = handle.await;
        }
    }
}

/// The assembled application: router, state, and background services.
pub struct Application {
    router: Router,
    config: Arc<Config>,
    bg_services: BackgroundServices,
}

impl Application {
    /// Connect to the database, run migrations, and build the full service.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting loopauth with configuration: {:#?}", config);

        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .acquire_timeout(config.database.acquire_timeout)
            .connect(&config.database.url)
            .await?;

        migrator().run(&pool).await?;
        info!("Database migrations applied");

        let state = build_state(pool, config)?;
        let bg_services = BackgroundServices::start(&state);
        let config = state.config.clone();
        let router = build_router(state);

        Ok(Self {
            router,
            config,
            bg_services,
        })
    }

    /// Start serving until the shutdown future resolves, then stop the
    /// background services.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("loopauth listening on http://{bind_addr}");

        axum::serve(listener, self.router).with_graceful_shutdown(shutdown).await?;

        self.bg_services.shutdown().await;
        Ok(())
    }
}

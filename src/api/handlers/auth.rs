use axum::{Json, extract::State, http::StatusCode};

use crate::{
    AppState,
    api::models::{
        auth::{
            AuthResponse, LoginRequest, LoginResponse, MessageResponse, PasswordResetRequest, RefreshRequest,
            ResendVerificationRequest, ResetPasswordRequest, SignoutResponse, SignupRequest, SignupResponse,
            UserMessageResponse, VerifyEmailRequest,
        },
        users::{CurrentUser, UserResponse},
    },
    config::Config,
    errors::Error,
};

fn validate_password(config: &Config, password: &str) -> Result<(), Error> {
    let password_config = &config.auth.password;
    if password.len() < password_config.min_length {
        return Err(Error::ValidationFailed {
            message: format!("Password must be at least {} characters", password_config.min_length),
        });
    }
    if password.len() > password_config.max_length {
        return Err(Error::ValidationFailed {
            message: format!("Password must be no more than {} characters", password_config.max_length),
        });
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), Error> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(Error::ValidationFailed {
            message: "A valid email address is required".to_string(),
        });
    }
    Ok(())
}

/// Create an unverified account and send the verification email
#[utoipa::path(
    post,
    path = "/auth/signup",
    request_body = SignupRequest,
    tag = "auth",
    responses(
        (status = 201, description = "Account created", body = SignupResponse),
        (status = 400, description = "Invalid input"),
        (status = 409, description = "Email already registered"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn signup(
    State(state): State<AppState>,
    Json(request): Json<SignupRequest>,
) -> Result<(StatusCode, Json<SignupResponse>), Error> {
    validate_email(&request.email)?;
    if request.name.trim().is_empty() {
        return Err(Error::ValidationFailed {
            message: "Name must not be empty".to_string(),
        });
    }
    validate_password(&state.config, &request.password)?;

    let (user, email_error) = state
        .verification
        .signup(&request.email, &request.name, &request.password)
        .await?;

    let message = if email_error.is_some() {
        "Account created, but the verification email could not be sent. Request a new one to continue.".to_string()
    } else {
        "Account created. Check your inbox for a verification link.".to_string()
    };

    Ok((
        StatusCode::CREATED,
        Json(SignupResponse {
            user: UserResponse::from(user),
            message,
        }),
    ))
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Login successful", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 403, description = "Email not verified"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Result<LoginResponse, Error> {
    let (user, tokens) = state.sessions.login(&request.email, &request.password).await?;

    let cookie = create_session_cookie(&tokens.access_token, &state.config);

    Ok(LoginResponse {
        auth_response: AuthResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            user: UserResponse::from(user),
        },
        cookie,
    })
}

/// Exchange a refresh token for a new access/refresh pair
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    tag = "auth",
    responses(
        (status = 200, description = "New token pair", body = AuthResponse),
        (status = 401, description = "Invalid or expired token"),
        (status = 403, description = "Unknown or revoked token"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn refresh(State(state): State<AppState>, Json(request): Json<RefreshRequest>) -> Result<LoginResponse, Error> {
    let (user, tokens) = state.sessions.rotate(&request.refresh_token).await?;

    let cookie = create_session_cookie(&tokens.access_token, &state.config);

    Ok(LoginResponse {
        auth_response: AuthResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            user: UserResponse::from(user),
        },
        cookie,
    })
}

/// Redeem an email-verification token
#[utoipa::path(
    post,
    path = "/auth/verify-email",
    request_body = VerifyEmailRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Email verified", body = UserMessageResponse),
        (status = 401, description = "Invalid or expired token"),
        (status = 403, description = "Unknown or revoked token"),
        (status = 409, description = "Already verified"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn verify_email(
    State(state): State<AppState>,
    Json(request): Json<VerifyEmailRequest>,
) -> Result<Json<UserMessageResponse>, Error> {
    let user = state.verification.redeem_email_verification(&request.token).await?;

    Ok(Json(UserMessageResponse {
        user: UserResponse::from(user),
        message: "Email verified. You can now log in.".to_string(),
    }))
}

/// Send a fresh verification email
#[utoipa::path(
    post,
    path = "/auth/resend-verification",
    request_body = ResendVerificationRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Verification email sent if the address is registered", body = MessageResponse),
        (status = 409, description = "Already verified"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn resend_verification(
    State(state): State<AppState>,
    Json(request): Json<ResendVerificationRequest>,
) -> Result<Json<MessageResponse>, Error> {
    let email = request.email.trim().to_lowercase();

    // Unknown addresses get the same response as known ones
    if let Some(user) = state.users.find_by_email(&email).await? {
        state.verification.issue_email_verification(user.id).await?;
    }

    Ok(Json(MessageResponse {
        message: "If that address is registered, a verification email is on its way.".to_string(),
    }))
}

/// Request a password reset email
#[utoipa::path(
    post,
    path = "/auth/password-reset-request",
    request_body = PasswordResetRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Reset email sent if the address is registered", body = MessageResponse),
        (status = 403, description = "Email not verified"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(request): Json<PasswordResetRequest>,
) -> Result<Json<MessageResponse>, Error> {
    let email = request.email.trim().to_lowercase();

    if let Some(user) = state.users.find_by_email(&email).await? {
        if !user.is_verified() {
            return Err(Error::EmailNotVerified);
        }
        state.verification.issue_password_reset(user.id).await?;
    }

    Ok(Json(MessageResponse {
        message: "If that address is registered, a reset email is on its way.".to_string(),
    }))
}

/// Redeem a password-reset token
#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordRequest,
    tag = "auth",
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Invalid or expired token"),
        (status = 403, description = "Unknown or revoked token"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(request): Json<ResetPasswordRequest>,
) -> Result<Json<MessageResponse>, Error> {
    if request.new_password != request.confirm_new_password {
        return Err(Error::ValidationFailed {
            message: "Password confirmation does not match".to_string(),
        });
    }
    validate_password(&state.config, &request.new_password)?;

    state
        .verification
        .redeem_password_reset(&request.token, &request.new_password)
        .await?;

    Ok(Json(MessageResponse {
        message: "Password updated. You can now log in with your new password.".to_string(),
    }))
}

/// Sign out, revoking every refresh token of the current user
#[utoipa::path(
    post,
    path = "/auth/signout",
    tag = "auth",
    responses(
        (status = 200, description = "Signed out", body = MessageResponse),
        (status = 401, description = "Not authenticated"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn signout(State(state): State<AppState>, current_user: CurrentUser) -> Result<SignoutResponse, Error> {
    let revoked = state.sessions.sign_out(current_user.id).await?;
    tracing::debug!(user_id = current_user.id, revoked, "signed out");

    // Expired cookie clears the session
    let cookie = clear_session_cookie(&state.config);

    Ok(SignoutResponse {
        message_response: MessageResponse {
            message: "Signed out".to_string(),
        },
        cookie,
    })
}

/// Helper function to create a session cookie
fn create_session_cookie(token: &str, config: &Config) -> String {
    let max_age = config.auth.access_token_ttl.as_secs();
    session_cookie(config, token, max_age)
}

/// Expired empty cookie that clears the session, with the same attributes
/// the login cookie was set with.
fn clear_session_cookie(config: &Config) -> String {
    session_cookie(config, "", 0)
}

fn session_cookie(config: &Config, token: &str, max_age: u64) -> String {
    let session_config = &config.auth.session;

    format!(
        "{}={}; Path=/; HttpOnly; Secure={}; SameSite={}; Max-Age={}",
        session_config.cookie_name, token, session_config.cookie_secure, session_config.cookie_same_site, max_age
    )
}

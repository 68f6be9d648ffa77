//! OpenAPI document for the authentication API.

use utoipa::OpenApi;

use crate::api;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "loopauth",
        description = "Authentication and session token service for the Finite Loop Club dashboard"
    ),
    paths(
        api::handlers::auth::signup,
        api::handlers::auth::login,
        api::handlers::auth::refresh,
        api::handlers::auth::verify_email,
        api::handlers::auth::resend_verification,
        api::handlers::auth::request_password_reset,
        api::handlers::auth::reset_password,
        api::handlers::auth::signout,
        api::handlers::health::health,
    ),
    components(schemas(
        api::models::auth::SignupRequest,
        api::models::auth::SignupResponse,
        api::models::auth::LoginRequest,
        api::models::auth::RefreshRequest,
        api::models::auth::VerifyEmailRequest,
        api::models::auth::ResendVerificationRequest,
        api::models::auth::PasswordResetRequest,
        api::models::auth::ResetPasswordRequest,
        api::models::auth::AuthResponse,
        api::models::auth::UserMessageResponse,
        api::models::auth::MessageResponse,
        api::models::users::UserResponse,
    )),
    tags(
        (name = "auth", description = "Signup, login, token rotation, and recovery flows"),
        (name = "health", description = "Service liveness"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_document_builds() {
        let doc = ApiDoc::openapi();
        let paths = &doc.paths.paths;
        assert!(paths.contains_key("/auth/signup"));
        assert!(paths.contains_key("/auth/login"));
        assert!(paths.contains_key("/auth/refresh"));
        assert!(paths.contains_key("/auth/signout"));
        assert!(paths.contains_key("/health"));
    }
}

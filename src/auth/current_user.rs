use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{
    AppState,
    api::models::users::CurrentUser,
    auth::tokens::TokenPurpose,
    errors::{Error, Result},
};

/// Pull an access token out of the request, session cookie first, then a
/// bearer Authorization header.
///
/// Returns None when no credential is present at all; invalid or expired
/// tokens also yield None so the caller can respond with a uniform 401.
fn extract_access_token(parts: &Parts, cookie_name: &str) -> Option<String> {
    if let Some(cookie_header) = parts.headers.get(axum::http::header::COOKIE)
        && let Ok(cookie_str) = cookie_header.to_str()
    {
        for cookie in cookie_str.split(';') {
            let cookie = cookie.trim();
            if let Some((name, value)) = cookie.split_once('=')
                && name == cookie_name
                && !value.is_empty()
            {
                return Some(value.to_string());
            }
        }
    }

    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let cookie_name = &state.config.auth.session.cookie_name;
        let token = extract_access_token(parts, cookie_name).ok_or(Error::Unauthenticated)?;

        // expired or malformed session cookies are expected, not suspicious
        let claims = state
            .codec
            .verify(&token, TokenPurpose::Access)
            .map_err(|_| Error::Unauthenticated)?;

        let user = state
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or(Error::Unauthenticated)?;

        Ok(CurrentUser::from(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts_with_header(header_name: &str, header_value: &str) -> Parts {
        let request = axum::http::Request::builder()
            .uri("http://localhost/test")
            .header(header_name, header_value)
            .body(())
            .unwrap();

        let (parts, _body) = request.into_parts();
        parts
    }

    #[test]
    fn extracts_token_from_session_cookie() {
        let parts = parts_with_header("cookie", "other=1; loopauth_session=abc.def.ghi; more=2");
        assert_eq!(extract_access_token(&parts, "loopauth_session"), Some("abc.def.ghi".to_string()));
    }

    #[test]
    fn extracts_token_from_bearer_header() {
        let parts = parts_with_header("authorization", "Bearer abc.def.ghi");
        assert_eq!(extract_access_token(&parts, "loopauth_session"), Some("abc.def.ghi".to_string()));
    }

    #[test]
    fn cookie_takes_precedence_over_bearer() {
        let mut parts = parts_with_header("cookie", "loopauth_session=from-cookie");
        parts
            .headers
            .insert("authorization", "Bearer from-header".parse().unwrap());
        assert_eq!(extract_access_token(&parts, "loopauth_session"), Some("from-cookie".to_string()));
    }

    #[test]
    fn missing_credentials_yield_none() {
        let request = axum::http::Request::builder().uri("http://localhost/test").body(()).unwrap();
        let (parts, _) = request.into_parts();
        assert_eq!(extract_access_token(&parts, "loopauth_session"), None);
    }

    #[test]
    fn empty_cookie_value_is_ignored() {
        let parts = parts_with_header("cookie", "loopauth_session=");
        assert_eq!(extract_access_token(&parts, "loopauth_session"), None);
    }
}

pub mod admin;
pub mod bookings;
pub mod health;
pub mod payments;
pub mod webhook;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::services::amount::ActingUser;

#[allow(clippy::result_large_err)]
pub(crate) fn check_auth(headers: &HeaderMap, expected_token: &str) -> Result<(), Response> {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let token = auth.strip_prefix("Bearer ").unwrap_or("");
    if expected_token.is_empty() || token != expected_token {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"error": "unauthorized"})),
        )
            .into_response());
    }
    Ok(())
}

/// Staff identity, trusted only on requests that carry the admin token.
pub(crate) fn acting_user(headers: &HeaderMap, admin_token: &str) -> Option<ActingUser> {
    check_auth(headers, admin_token).ok()?;

    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .trim()
            .to_string()
    };
    let email = header("x-staff-email");
    if email.is_empty() {
        return None;
    }
    let groups = header("x-staff-groups")
        .split(',')
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .map(str::to_string)
        .collect();
    Some(ActingUser { email, groups })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_acting_user_requires_admin_token() {
        let mut headers = HeaderMap::new();
        headers.insert("x-staff-email", HeaderValue::from_static("desk@example.com"));
        headers.insert("x-staff-groups", HeaderValue::from_static("staff, offline"));
        assert!(acting_user(&headers, "secret").is_none());

        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        let user = acting_user(&headers, "secret").unwrap();
        assert_eq!(user.email, "desk@example.com");
        assert_eq!(user.groups, vec!["staff", "offline"]);
    }
}

//! Request identity.
//!
//! Authentication itself (sessions, OTP, tokens) lives in the upstream gateway; by the time a request reaches this
//! service, the trusted proxy has resolved the caller and injected `x-user-id` and `x-user-role` headers. These
//! extractors are the narrow interface the core consumes.
use std::future::{ready, Ready};

use actix_web::{dev::Payload, FromRequest, HttpRequest};
use rupi_payment_engine::db_types::Role;

use crate::errors::ServerError;

/// Any authenticated caller.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub role: Role,
}

impl FromRequest for AuthenticatedUser {
    type Error = ServerError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(extract_identity(req))
    }
}

/// An authenticated caller with the `Admin` role.
#[derive(Debug, Clone, Copy)]
pub struct AdminUser {
    pub user_id: i64,
}

impl FromRequest for AdminUser {
    type Error = ServerError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let result = extract_identity(req).and_then(|user| match user.role {
            Role::Admin => Ok(AdminUser { user_id: user.user_id }),
            Role::User => Err(ServerError::Forbidden),
        });
        ready(result)
    }
}

fn extract_identity(req: &HttpRequest) -> Result<AuthenticatedUser, ServerError> {
    let user_id = req
        .headers()
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<i64>().ok())
        .ok_or(ServerError::Forbidden)?;
    let role = req
        .headers()
        .get("x-user-role")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<Role>().ok())
        .unwrap_or(Role::User);
    Ok(AuthenticatedUser { user_id, role })
}

#[cfg(test)]
mod test {
    use actix_web::test::TestRequest;

    use super::*;

    #[actix_web::test]
    async fn identity_comes_from_proxy_headers() {
        let req = TestRequest::default()
            .insert_header(("x-user-id", "42"))
            .insert_header(("x-user-role", "Admin"))
            .to_http_request();
        let user = extract_identity(&req).unwrap();
        assert_eq!(user.user_id, 42);
        assert_eq!(user.role, Role::Admin);
    }

    #[actix_web::test]
    async fn missing_identity_is_forbidden() {
        let req = TestRequest::default().to_http_request();
        assert!(matches!(extract_identity(&req), Err(ServerError::Forbidden)));
    }

    #[actix_web::test]
    async fn unknown_role_defaults_to_user() {
        let req = TestRequest::default()
            .insert_header(("x-user-id", "7"))
            .insert_header(("x-user-role", "Wizard"))
            .to_http_request();
        assert_eq!(extract_identity(&req).unwrap().role, Role::User);
    }
}

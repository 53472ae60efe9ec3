use crate::models::user::UserRole;
use crate::services::auth::AuthService;
use actix_web::{Error, FromRequest, HttpRequest, dev::Payload, error::ErrorUnauthorized};
use futures_util::future::{Ready, ready};
use uuid::Uuid;

/// Caller identity decoded from the bearer token. Role and account status
/// ride in the claims so capability checks don't need a user lookup.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub user_role: UserRole,
    pub is_active: bool,
}

impl FromRequest for AuthenticatedUser {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let header = req
            .headers()
            .get("Authorization")
            .and_then(|value| value.to_str().ok());

        let token = match header.and_then(|h| h.strip_prefix("Bearer ")) {
            Some(token) => token,
            None => return ready(Err(ErrorUnauthorized("Missing bearer token"))),
        };

        let service = match AuthService::new() {
            Ok(service) => service,
            Err(_) => {
                return ready(Err(actix_web::error::ErrorInternalServerError(
                    "Authentication service error",
                )));
            }
        };

        match service.verify_token(token) {
            Ok(claims) => ready(Ok(AuthenticatedUser {
                user_id: claims.sub,
                email: claims.email,
                user_role: claims.role,
                is_active: claims.active,
            })),
            Err(_) => ready(Err(ErrorUnauthorized("Invalid or expired token"))),
        }
    }
}

use crate::models::user::UserRole;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserInfo,
}

#[derive(Debug, Serialize)]
pub struct UserInfo {
    pub id: Uuid,
    pub fullname: String,
    pub email: String,
    pub user_role: UserRole,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub role: UserRole,
    pub active: bool,
    pub exp: i64, // expiration time
    pub iat: i64, // issued at
}

impl Claims {
    pub fn new(user_id: Uuid, email: String, role: UserRole, active: bool) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: user_id,
            email,
            role,
            active,
            exp: now + (24 * 60 * 60), // 24 hours
            iat: now,
        }
    }
}

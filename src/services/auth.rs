use crate::database::connection::DbPool;
use crate::models::auth::Claims;
use crate::models::user::User;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use std::env;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("JWT_SECRET not set")]
    MissingSecret,
    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct AuthService {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl AuthService {
    pub fn new() -> Result<Self, AuthError> {
        let secret = env::var("JWT_SECRET").map_err(|_| AuthError::MissingSecret)?;
        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        })
    }

    pub fn generate_token(&self, user: &User) -> Result<String, AuthError> {
        let claims = Claims::new(user.id, user.email.clone(), user.user_role, user.is_active);
        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        Ok(decode::<Claims>(token, &self.decoding, &Validation::default())?.claims)
    }

    pub async fn authenticate_user(
        &self,
        pool: &DbPool,
        email: &str,
        password: &str,
    ) -> Result<Option<User>, AuthError> {
        Ok(User::authenticate(pool, email, password).await?)
    }
}

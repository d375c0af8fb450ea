use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use botdesk_db::Database;
use botdesk_types::api::{Claims, LoginRequest, LoginResponse, RegisterRequest, RegisterResponse};
use botdesk_types::validation::ValidationErrors;

use crate::blocking;
use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::ingest::Ingestor;
use crate::storage::Storage;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub storage: Storage,
    pub jwt_secret: String,
    pub ingestor: Arc<dyn Ingestor>,
}

pub async fn register(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = req.name.trim().to_string();
    let email = req.email.trim().to_ascii_lowercase();

    let mut errors = ValidationErrors::default();
    if name.is_empty() || name.chars().count() > 255 {
        errors.add("name", "Name must be between 1 and 255 characters.");
    }
    if !email.contains('@') || email.len() > 255 {
        errors.add("email", "Email must be a valid email address.");
    }
    if req.password.chars().count() < 8 {
        errors.add("password", "Password must be at least 8 characters.");
    }
    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    let lookup = email.clone();
    if blocking(&state, move |db| db.get_user_by_email(&lookup)).await?.is_some() {
        return Err(ApiError::Conflict("The email has already been taken."));
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {}", e)))?
        .to_string();

    let user_id = Uuid::new_v4();
    let (n, e) = (name.clone(), email.clone());
    blocking(&state, move |db| db.create_user(user_id, &n, &e, &password_hash)).await?;

    let token = issue_token(&state.jwt_secret, user_id, &name)?;
    info!("Registered user {} ({})", user_id, email);

    Ok((StatusCode::CREATED, Json(RegisterResponse { user_id, token })))
}

pub async fn login(
    State(state): State<AppState>,
    JsonBody(req): JsonBody<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_ascii_lowercase();
    let user = blocking(&state, move |db| db.get_user_by_email(&email))
        .await?
        .ok_or(ApiError::Unauthenticated)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&user.password)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("stored hash unreadable: {}", e)))?;

    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthenticated)?;

    let user_id: Uuid = user.id.parse().map_err(|e| ApiError::Internal(anyhow::Error::new(e)))?;
    let token = issue_token(&state.jwt_secret, user_id, &user.name)?;

    Ok(Json(LoginResponse {
        user_id,
        name: user.name,
        token,
    }))
}

/// Sign a 30-day bearer token for `user_id`.
pub fn issue_token(secret: &str, user_id: Uuid, name: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        name: name.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

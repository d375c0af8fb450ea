use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use botdesk_types::api::Claims;
use botdesk_types::authz::Actor;

use crate::auth::AppState;
use crate::error::ApiError;

/// Validate the bearer JWT and make the caller available to handlers as an
/// [`Actor`] extension.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = bearer.map_err(|_| ApiError::Unauthenticated)?;

    let token_data = decode::<Claims>(
        bearer.token(),
        &DecodingKey::from_secret(state.jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| ApiError::Unauthenticated)?;

    req.extensions_mut().insert(Actor::new(token_data.claims.sub));
    Ok(next.run(req).await)
}

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use crate::errors::AppError;
use crate::models::caller::{Caller, Claims};
use crate::state::AppState;

/// Verifies the bearer token and hands the resulting `Caller` to handlers
/// through request extensions.
pub async fn auth_middleware(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = headers
        .get("authorization")
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .ok_or(AppError::AuthError)?;

    let decoding_key = DecodingKey::from_secret(state.jwt_secret.as_bytes());
    let token_data = decode::<Claims>(token, &decoding_key, &Validation::new(Algorithm::HS256))
        .map_err(|e| {
            tracing::debug!("rejected bearer token: {}", e);
            AppError::AuthError
        })?;

    request
        .extensions_mut()
        .insert(Caller::from(token_data.claims));

    Ok(next.run(request).await)
}

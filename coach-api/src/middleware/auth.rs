use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
    RequestPartsExt,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// JWT Claims
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    Customer,
    Employee,
    Admin,
}

impl Role {
    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Employee | Role::Admin)
    }
}

/// Tokens are issued elsewhere; `sub` is the numeric customer or employee id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub exp: usize,
}

impl Claims {
    pub fn subject_id(&self) -> Result<i64, ApiError> {
        self.sub
            .parse()
            .map_err(|_| ApiError::unauthorized("Token subject is not an account id"))
    }
}

fn decode_claims(token: &str, secret: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    .map_err(|e| {
        tracing::debug!(error = %e, "Rejected bearer token");
        ApiError::unauthorized("Invalid or expired token")
    })
}

async fn bearer_claims(parts: &mut Parts, secret: &str) -> Result<Claims, ApiError> {
    let TypedHeader(Authorization(bearer)) = parts
        .extract::<TypedHeader<Authorization<Bearer>>>()
        .await
        .map_err(|_| ApiError::unauthorized("Missing bearer token"))?;
    decode_claims(bearer.token(), secret)
}

// ============================================================================
// Route-level middleware
// ============================================================================

pub async fn customer_auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = req.into_parts();
    let claims = bearer_claims(&mut parts, &state.auth.secret).await?;
    if claims.role != Role::Customer {
        return Err(ApiError::Forbidden { role: "CUSTOMER" });
    }

    let mut req = Request::from_parts(parts, body);
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub async fn staff_auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = req.into_parts();
    let claims = bearer_claims(&mut parts, &state.auth.secret).await?;
    if !claims.role.is_staff() {
        return Err(ApiError::Forbidden { role: "EMPLOYEE" });
    }

    let mut req = Request::from_parts(parts, body);
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

// ============================================================================
// Optional identity
// ============================================================================

/// Customer id of a signed-in caller on endpoints that also serve guests.
/// A present but invalid token is rejected rather than treated as a guest.
pub struct MaybeCustomer(pub Option<i64>);

impl FromRequestParts<AppState> for MaybeCustomer {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if !parts.headers.contains_key(AUTHORIZATION) {
            return Ok(MaybeCustomer(None));
        }
        let claims = bearer_claims(parts, &state.auth.secret).await?;
        match claims.role {
            Role::Customer => Ok(MaybeCustomer(Some(claims.subject_id()?))),
            // Staff booking at the counter books as a guest
            Role::Employee | Role::Admin => Ok(MaybeCustomer(None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(role: Role, secret: &str) -> String {
        let claims = Claims {
            sub: "42".into(),
            role,
            exp: (chrono::Utc::now().timestamp() + 600) as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn test_decodes_role_and_subject() {
        let claims = decode_claims(&token(Role::Employee, "s3cret"), "s3cret").unwrap();
        assert_eq!(claims.role, Role::Employee);
        assert!(claims.role.is_staff());
        assert_eq!(claims.subject_id().unwrap(), 42);
    }

    #[test]
    fn test_wrong_secret_is_unauthorized() {
        let err = decode_claims(&token(Role::Customer, "s3cret"), "other").unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized { .. }));
    }

    #[test]
    fn test_customer_is_not_staff() {
        assert!(!Role::Customer.is_staff());
    }
}

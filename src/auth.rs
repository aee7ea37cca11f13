use async_trait::async_trait;
use axum::{RequestPartsExt, extract::FromRequestParts, http::request::Parts};
use axum_extra::{
    TypedHeader,
    typed_header::TypedHeaderRejectionReason,
    headers::{Authorization, authorization::Bearer},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{
    DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    AppState,
    error::{AppError, Result},
    models::validate_id,
};

/// Why a bearer credential was refused. `MissingCredential` and
/// `MalformedCredential` mean the caller never presented a usable token;
/// the other two mean the token was well-formed but is no longer (or never
/// was) acceptable.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("Missing authorization credential")]
    MissingCredential,

    #[error("Malformed authorization credential")]
    MalformedCredential,

    #[error("Credential expired")]
    ExpiredCredential,

    #[error("Invalid credential")]
    InvalidCredential,
}

impl IdentityError {
    pub fn is_missing_or_malformed(&self) -> bool {
        matches!(
            self,
            IdentityError::MissingCredential | IdentityError::MalformedCredential
        )
    }
}

/// Validates a bearer credential and yields a stable user id.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn validate(
        &self,
        credential: Option<&str>,
    ) -> std::result::Result<String, IdentityError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // user_id
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
}

impl Claims {
    pub fn issue(user_id: &str, jwt_secret: &str, ttl: Duration) -> Result<String> {
        let now = Utc::now();
        let claims = Self {
            sub: user_id.to_string(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(jwt_secret.as_ref()),
        )
        .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
    }

    pub fn verify(token: &str, jwt_secret: &str) -> std::result::Result<Self, IdentityError> {
        let mut validation = Validation::default();
        validation.leeway = 0;

        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(jwt_secret.as_ref()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => IdentityError::MalformedCredential,
            ErrorKind::ExpiredSignature => IdentityError::ExpiredCredential,
            _ => IdentityError::InvalidCredential,
        })?;

        Ok(token_data.claims)
    }
}

/// HS256 JWT identity.
pub struct JwtIdentity {
    secret: String,
}

impl JwtIdentity {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: secret.to_string(),
        }
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentity {
    async fn validate(
        &self,
        credential: Option<&str>,
    ) -> std::result::Result<String, IdentityError> {
        let token = credential
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(IdentityError::MissingCredential)?;

        let claims = Claims::verify(token, &self.secret)?;
        validate_id("user", &claims.sub).map_err(|_| IdentityError::InvalidCredential)?;
        Ok(claims.sub)
    }
}

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        let credential = match parts.extract::<TypedHeader<Authorization<Bearer>>>().await {
            Ok(TypedHeader(Authorization(bearer))) => Some(bearer.token().to_string()),
            Err(rejection) if matches!(rejection.reason(), TypedHeaderRejectionReason::Missing) => {
                None
            }
            Err(_) => return Err(IdentityError::MalformedCredential.into()),
        };

        let user_id = state.identity.validate(credential.as_deref()).await?;
        Ok(AuthUser { user_id })
    }
}

// Optional auth user (for endpoints that work with or without auth)
#[derive(Debug)]
pub struct OptionalAuthUser(pub Option<AuthUser>);

impl FromRequestParts<AppState> for OptionalAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self> {
        match AuthUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(OptionalAuthUser(Some(user))),
            Err(_) => Ok(OptionalAuthUser(None)),
        }
    }
}

use std::collections::HashMap;

use axum::{
    async_trait,
    extract::{FromRequest, FromRequestParts, Path, Query, Request},
    http::request::Parts,
    Json,
};
use serde_json::Value;

use super::{parse, parse_params, ValidationError, Validated};
use crate::error::AppError;

/// JSON body checked against `T::schema()`.
pub struct Valid<T>(pub T);

/// Query string checked against `T::schema()`.
pub struct ValidQuery<T>(pub T);

/// Path parameters checked against `T::schema()`.
pub struct ValidPath<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Valid<T>
where
    S: Send + Sync,
    T: Validated,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<Value>::from_request(req, state)
            .await
            .map_err(|rejection| ValidationError::single("$", rejection.body_text()))?;
        Ok(Valid(parse::<T>(&value)?))
    }
}

#[async_trait]
impl<S, T> FromRequestParts<S> for ValidQuery<T>
where
    S: Send + Sync,
    T: Validated,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(params) = Query::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ValidationError::single("$", rejection.body_text()))?;
        Ok(ValidQuery(parse_params::<T>(&params)?))
    }
}

#[async_trait]
impl<S, T> FromRequestParts<S> for ValidPath<T>
where
    S: Send + Sync,
    T: Validated,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(params) = Path::<HashMap<String, String>>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| ValidationError::single("$", rejection.body_text()))?;
        Ok(ValidPath(parse_params::<T>(&params)?))
    }
}

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::error;

use botdesk_types::authz::AuthorizationError;
use botdesk_types::validation::ValidationErrors;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Unauthenticated.")]
    Unauthenticated,

    #[error(transparent)]
    Forbidden(#[from] AuthorizationError),

    #[error("Not found.")]
    NotFound,

    #[error("{0}")]
    Conflict(&'static str),

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    #[error("storage failure: {0}")]
    Storage(anyhow::Error),

    #[error("internal failure: {0}")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Storage(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Validation(errors) => json!({
                "message": self.to_string(),
                "errors": errors,
            }),
            Self::Storage(e) | Self::Internal(e) => {
                error!("{}: {:#}", status, e);
                json!({ "message": "Server Error" })
            }
            _ => json!({ "message": self.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes() {
        assert_eq!(ApiError::from(AuthorizationError).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::from(ValidationErrors::default()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ApiError::Storage(anyhow::anyhow!("disk full")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn forbidden_message_leaks_nothing() {
        assert_eq!(ApiError::from(AuthorizationError).to_string(), "This action is unauthorized.");
    }
}

use axum::{
    Json,
    extract::{FromRequest, Request, rejection::JsonRejection},
};
use serde::de::DeserializeOwned;

use botdesk_types::validation::ValidationErrors;

use crate::error::ApiError;

const DATA_ERROR_PREFIX: &str = "Failed to deserialize the JSON body into the target type: ";

/// [`Json`] body whose shape errors (wrong types, unknown or missing fields)
/// are reported as field errors like any other validation failure.
pub struct JsonBody<T>(pub T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(JsonRejection::JsonDataError(e)) => {
                Err(ApiError::Validation(field_errors(&e.body_text())))
            }
            Err(rejection) => Err(ApiError::BadRequest(rejection.body_text())),
        }
    }
}

/// Key a serde data error by the field it names.
fn field_errors(text: &str) -> ValidationErrors {
    let detail = text.strip_prefix(DATA_ERROR_PREFIX).unwrap_or(text);
    let mut errors = ValidationErrors::default();

    if let Some(field) = backticked(detail, "unknown field `") {
        errors.add(field, format!("The {} field is not allowed.", field));
    } else if let Some(field) = backticked(detail, "missing field `") {
        errors.add(field, format!("The {} field is required.", field));
    } else if let Some((path, _)) = detail.split_once(": ").filter(|(p, _)| is_path(p)) {
        let message = if detail.contains("expected a string") {
            format!("The {} field must be a string.", path)
        } else {
            format!("The {} field is invalid.", path)
        };
        errors.add(path, message);
    } else {
        errors.add("body", "The request body is invalid.");
    }
    errors
}

fn backticked<'a>(detail: &'a str, marker: &str) -> Option<&'a str> {
    let rest = detail.split_once(marker)?.1;
    Some(rest.split_once('`')?.0)
}

fn is_path(path: &str) -> bool {
    !path.is_empty()
        && path != "."
        && path
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_type_is_keyed_by_field() {
        let errors = field_errors(
            "Failed to deserialize the JSON body into the target type: name: invalid type: \
             integer `123`, expected a string at line 1 column 11",
        );
        assert_eq!(errors.messages("name"), ["The name field must be a string."]);
    }

    #[test]
    fn unknown_and_missing_fields() {
        let errors = field_errors(
            "Failed to deserialize the JSON body into the target type: unknown field `owner_id`, \
             expected one of `name`, `status` at line 1 column 12",
        );
        assert!(errors.has("owner_id"));

        let errors = field_errors(
            "Failed to deserialize the JSON body into the target type: missing field `email` \
             at line 1 column 20",
        );
        assert_eq!(errors.messages("email"), ["The email field is required."]);
    }

    #[test]
    fn unkeyed_errors_fall_back_to_body() {
        let errors = field_errors(
            "Failed to deserialize the JSON body into the target type: invalid type: \
             sequence, expected struct ChatbotRequest at line 1 column 0",
        );
        assert!(errors.has("body"));
    }
}

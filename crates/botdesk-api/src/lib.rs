pub mod access;
pub mod auth;
pub mod chatbots;
pub mod conversations;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod knowledge_bases;
pub mod middleware;
pub mod routes;
pub mod storage;

use std::str::FromStr;

use tracing::error;

use botdesk_db::Database;

use crate::auth::AppState;
use crate::error::ApiError;

/// Run blocking database work off the async runtime.
pub(crate) async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(e.into())
        })?
        .map_err(ApiError::Internal)
}

/// Parse an optional `?status=` listing filter.
pub(crate) fn parse_filter<T: FromStr>(
    field: &str,
    value: Option<&str>,
    message: &str,
) -> Result<Option<T>, ApiError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => v.parse().map(Some).map_err(|_| {
            let mut errors = botdesk_types::validation::ValidationErrors::default();
            errors.add(field, message);
            ApiError::Validation(errors)
        }),
    }
}

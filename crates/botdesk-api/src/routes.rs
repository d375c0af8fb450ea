use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    http::{
        Method,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use botdesk_types::api::HealthResponse;
use botdesk_types::validation::MAX_UPLOAD_BYTES;

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::{chatbots, conversations, knowledge_bases};

/// Leaves room above the upload limit so an oversized file reaches
/// validation and gets a field error instead of a bare 413.
const BODY_LIMIT: usize = MAX_UPLOAD_BYTES + 6 * 1024 * 1024;

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health-check", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/dashboard", get(chatbots::dashboard))
        .route("/chatbots", get(chatbots::index).post(chatbots::store))
        .route(
            "/chatbots/{id}",
            get(chatbots::show)
                .put(chatbots::update)
                .delete(chatbots::destroy),
        )
        .route(
            "/chatbots/{id}/knowledge-bases",
            get(knowledge_bases::index).post(knowledge_bases::store),
        )
        .route(
            "/knowledge-bases/{id}",
            get(knowledge_bases::show)
                .put(knowledge_bases::update)
                .delete(knowledge_bases::destroy),
        )
        .route("/knowledge-bases/{id}/reingest", post(knowledge_bases::reingest))
        .route("/chatbots/{id}/conversations", get(conversations::index))
        .route("/conversations/{id}", get(conversations::show))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(false);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(BODY_LIMIT))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now(),
    })
}

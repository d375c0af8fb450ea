use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{info, warn};
use uuid::Uuid;

use botdesk_types::api::{
    ChatbotDetail, ChatbotRequest, ChatbotSummary, Confirmation, ListQuery, Notice, PER_PAGE, Page,
};
use botdesk_types::authz::Actor;
use botdesk_types::models::ChatbotStatus;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::extract::JsonBody;
use crate::{access, blocking, parse_filter};

/// Chatbots shown on the dashboard.
const DASHBOARD_CHATBOTS: u32 = 3;

pub async fn index(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<ChatbotSummary>>, ApiError> {
    let status: Option<ChatbotStatus> = parse_filter(
        "status",
        query.status.as_deref(),
        "Status must be active or inactive.",
    )?;
    let page = query.page();
    let offset = Page::<ChatbotSummary>::offset(page, PER_PAGE);

    let (data, total) = blocking(&state, move |db| {
        db.list_chatbots(actor.user_id, status, PER_PAGE, offset)
    })
    .await?;

    Ok(Json(Page::new(data, page, PER_PAGE, total)))
}

pub async fn dashboard(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Vec<ChatbotSummary>>, ApiError> {
    let (recent, _) = blocking(&state, move |db| {
        db.list_chatbots(actor.user_id, None, DASHBOARD_CHATBOTS, 0)
    })
    .await?;
    Ok(Json(recent))
}

pub async fn store(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    JsonBody(req): JsonBody<ChatbotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = req.into_new()?;
    let chatbot = blocking(&state, move |db| db.insert_chatbot(actor.user_id, &new)).await?;
    info!("User {} created chatbot {}", actor.user_id, chatbot.id);

    Ok((
        StatusCode::CREATED,
        Json(Confirmation::new("Chatbot created successfully!", chatbot)),
    ))
}

pub async fn show(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<ChatbotDetail>, ApiError> {
    let chatbot = access::chatbot(&state, &actor, id).await?;
    let detail = blocking(&state, move |db| db.chatbot_detail(chatbot)).await?;
    Ok(Json(detail))
}

pub async fn update(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    JsonBody(req): JsonBody<ChatbotRequest>,
) -> Result<impl IntoResponse, ApiError> {
    access::chatbot(&state, &actor, id).await?;
    let changes = req.into_changes()?;

    let chatbot = blocking(&state, move |db| db.update_chatbot(id, &changes))
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(Confirmation::new("Chatbot updated successfully!", chatbot)))
}

pub async fn destroy(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    access::chatbot(&state, &actor, id).await?;

    let file_paths = blocking(&state, move |db| db.delete_chatbot(id)).await?;

    // Rows are gone already; leftover files are only logged.
    for file_path in &file_paths {
        if let Err(e) = state.storage.delete(file_path).await {
            warn!("Could not remove {} of deleted chatbot {}: {:#}", file_path, id, e);
        }
    }

    info!("User {} deleted chatbot {} ({} files)", actor.user_id, id, file_paths.len());
    Ok(Json(Notice {
        message: "Chatbot deleted successfully!".into(),
    }))
}

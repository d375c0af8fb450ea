use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use uuid::Uuid;

use botdesk_types::api::{ConversationThread, ListQuery, PER_PAGE, Page};
use botdesk_types::authz::Actor;
use botdesk_types::models::Conversation;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::{access, blocking};

/// A chatbot's conversations, most recently active first.
pub async fn index(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(chatbot_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Page<Conversation>>, ApiError> {
    access::chatbot(&state, &actor, chatbot_id).await?;

    let page = query.page();
    let offset = Page::<Conversation>::offset(page, PER_PAGE);
    let (data, total) = blocking(&state, move |db| {
        db.list_conversations(chatbot_id, PER_PAGE, offset)
    })
    .await?;

    Ok(Json(Page::new(data, page, PER_PAGE, total)))
}

pub async fn show(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<ConversationThread>, ApiError> {
    let conversation = access::conversation(&state, &actor, id).await?;
    let messages = blocking(&state, move |db| db.get_messages(id)).await?;
    Ok(Json(ConversationThread {
        conversation,
        messages,
    }))
}

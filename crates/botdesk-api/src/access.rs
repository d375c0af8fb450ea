//! Fetch-and-authorize helpers. Every handler that touches a single chatbot,
//! knowledge base or conversation goes through one of these, so the ownership
//! chain is checked the same way everywhere and before anything is returned
//! or changed.

use uuid::Uuid;

use botdesk_types::authz::{Actor, authorize};
use botdesk_types::models::{Chatbot, Conversation, KnowledgeBase};

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;

pub async fn chatbot(state: &AppState, actor: &Actor, id: Uuid) -> Result<Chatbot, ApiError> {
    let owned = blocking(state, move |db| db.get_chatbot(id))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(authorize(actor, owned)?)
}

pub async fn knowledge_base(
    state: &AppState,
    actor: &Actor,
    id: Uuid,
) -> Result<KnowledgeBase, ApiError> {
    let owned = blocking(state, move |db| db.get_knowledge_base(id))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(authorize(actor, owned)?)
}

pub async fn conversation(
    state: &AppState,
    actor: &Actor,
    id: Uuid,
) -> Result<Conversation, ApiError> {
    let owned = blocking(state, move |db| db.get_conversation(id))
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(authorize(actor, owned)?)
}

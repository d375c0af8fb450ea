use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::models::{Chatbot, Conversation, KnowledgeBase, Message};

/// Rows per page on every paginated listing.
pub const PER_PAGE: u32 = 10;

// -- JWT Claims --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub name: String,
    pub token: String,
}

// -- Pagination --

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    /// Optional status filter, interpreted per resource.
    pub status: Option<String>,
}

impl ListQuery {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub current_page: u32,
    pub per_page: u32,
    pub total: u64,
    pub last_page: u32,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, current_page: u32, per_page: u32, total: u64) -> Self {
        let last_page = total.div_ceil(u64::from(per_page)).max(1) as u32;
        Self {
            data,
            current_page,
            per_page,
            total,
            last_page,
        }
    }

    /// Zero-based row offset of `page`.
    pub fn offset(page: u32, per_page: u32) -> u32 {
        page.saturating_sub(1).saturating_mul(per_page)
    }
}

// -- Chatbots --

/// Body of `POST /chatbots` and `PUT /chatbots/{id}`.
///
/// Optional fields distinguish "absent" (`None`, left unchanged on update)
/// from an explicit `null` (`Some(None)`, cleared).
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatbotRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub whatsapp_phone_number: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub whatsapp_access_token: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub whatsapp_webhook_verify_token: Option<Option<String>>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatbotSummary {
    #[serde(flatten)]
    pub chatbot: Chatbot,
    pub knowledge_bases_count: u64,
    pub conversations_count: u64,
}

#[derive(Debug, Serialize)]
pub struct ChatbotDetail {
    #[serde(flatten)]
    pub chatbot: Chatbot,
    pub knowledge_bases: Vec<KnowledgeBase>,
    pub conversations: Vec<ConversationThread>,
}

// -- Knowledge bases --

/// A file received in a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Fields of the multipart `POST /chatbots/{id}/knowledge-bases` form.
#[derive(Debug, Default)]
pub struct KnowledgeBaseForm {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub content: Option<String>,
    pub file: Option<UploadedFile>,
}

/// Body of `PUT /knowledge-bases/{id}`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateKnowledgeBaseRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub content: Option<Option<String>>,
    pub status: Option<String>,
}

// -- Conversations --

#[derive(Debug, Serialize)]
pub struct ConversationThread {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

// -- Responses --

/// Success confirmation for a mutation, with the affected record.
#[derive(Debug, Serialize)]
pub struct Confirmation<T> {
    pub message: String,
    pub data: T,
}

impl<T> Confirmation<T> {
    pub fn new(message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Notice {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Wraps a present field (including `null`) in `Some`, so that together with
/// `#[serde(default)]` an absent field stays `None`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

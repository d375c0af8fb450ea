//! Database row types. These map directly to SQLite rows and are converted
//! into `botdesk-types` models at the edge of this crate.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::Row;
use serde_json::Value;
use uuid::Uuid;

use botdesk_types::models::{Chatbot, Conversation, JsonMap, KnowledgeBase, Message};

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub created_at: DateTime<Utc>,
}

pub struct ChatbotRow {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub description: Option<String>,
    pub whatsapp_phone_number: Option<String>,
    pub whatsapp_access_token: Option<String>,
    pub whatsapp_webhook_verify_token: Option<String>,
    pub status: String,
    pub settings: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct KnowledgeBaseRow {
    pub id: String,
    pub chatbot_id: String,
    pub name: String,
    pub kind: String,
    pub file_path: Option<String>,
    pub original_filename: Option<String>,
    pub content: Option<String>,
    pub metadata: Option<Value>,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct ConversationRow {
    pub id: String,
    pub chatbot_id: String,
    pub end_user_phone_number: String,
    pub end_user_name: Option<String>,
    pub status: String,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub kind: String,
    pub content: String,
    pub external_message_id: Option<String>,
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Column lists, kept in the same order as the row readers below --

pub(crate) const CHATBOT_COLUMNS: &str = "c.id, c.owner_id, c.name, c.description, \
     c.whatsapp_phone_number, c.whatsapp_access_token, c.whatsapp_webhook_verify_token, \
     c.status, c.settings, c.created_at, c.updated_at";

pub(crate) const KNOWLEDGE_BASE_COLUMNS: &str = "k.id, k.chatbot_id, k.name, k.type, \
     k.file_path, k.original_filename, k.content, k.metadata, k.status, k.error_message, \
     k.created_at, k.updated_at";

pub(crate) const CONVERSATION_COLUMNS: &str = "v.id, v.chatbot_id, v.end_user_phone_number, \
     v.end_user_name, v.status, v.last_message_at, v.created_at, v.updated_at";

pub(crate) const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.type, m.content, \
     m.external_message_id, m.metadata, m.created_at, m.updated_at";

impl ChatbotRow {
    pub(crate) const WIDTH: usize = 11;

    pub(crate) fn read(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            name: row.get(2)?,
            description: row.get(3)?,
            whatsapp_phone_number: row.get(4)?,
            whatsapp_access_token: row.get(5)?,
            whatsapp_webhook_verify_token: row.get(6)?,
            status: row.get(7)?,
            settings: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }
}

impl KnowledgeBaseRow {
    pub(crate) const WIDTH: usize = 12;

    pub(crate) fn read(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            chatbot_id: row.get(1)?,
            name: row.get(2)?,
            kind: row.get(3)?,
            file_path: row.get(4)?,
            original_filename: row.get(5)?,
            content: row.get(6)?,
            metadata: row.get(7)?,
            status: row.get(8)?,
            error_message: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

impl ConversationRow {
    pub(crate) const WIDTH: usize = 8;

    pub(crate) fn read(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            chatbot_id: row.get(1)?,
            end_user_phone_number: row.get(2)?,
            end_user_name: row.get(3)?,
            status: row.get(4)?,
            last_message_at: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

impl MessageRow {
    pub(crate) fn read(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            kind: row.get(2)?,
            content: row.get(3)?,
            external_message_id: row.get(4)?,
            metadata: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

// -- Row -> model --

pub(crate) fn parse_id(value: &str) -> Result<Uuid> {
    value.parse().with_context(|| format!("corrupt id '{}'", value))
}

/// NULL and non-object JSON both read back as an empty map.
fn json_map(value: Option<Value>) -> JsonMap {
    match value {
        Some(Value::Object(map)) => map,
        _ => JsonMap::new(),
    }
}

impl TryFrom<ChatbotRow> for Chatbot {
    type Error = anyhow::Error;

    fn try_from(row: ChatbotRow) -> Result<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            owner_id: parse_id(&row.owner_id)?,
            name: row.name,
            description: row.description,
            whatsapp_phone_number: row.whatsapp_phone_number,
            whatsapp_access_token: row.whatsapp_access_token,
            whatsapp_webhook_verify_token: row.whatsapp_webhook_verify_token,
            status: row.status.parse()?,
            settings: json_map(row.settings),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<KnowledgeBaseRow> for KnowledgeBase {
    type Error = anyhow::Error;

    fn try_from(row: KnowledgeBaseRow) -> Result<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            chatbot_id: parse_id(&row.chatbot_id)?,
            name: row.name,
            kind: row.kind.parse()?,
            file_path: row.file_path,
            original_filename: row.original_filename,
            content: row.content,
            metadata: json_map(row.metadata),
            status: row.status.parse()?,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = anyhow::Error;

    fn try_from(row: ConversationRow) -> Result<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            chatbot_id: parse_id(&row.chatbot_id)?,
            end_user_phone_number: row.end_user_phone_number,
            end_user_name: row.end_user_name,
            status: row.status.parse()?,
            last_message_at: row.last_message_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            conversation_id: parse_id(&row.conversation_id)?,
            kind: row.kind.parse()?,
            content: row.content,
            external_message_id: row.external_message_id,
            metadata: json_map(row.metadata),
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Opaque key-value map stored as JSON (chatbot settings, knowledge base and
/// message metadata).
pub type JsonMap = Map<String, Value>;

/// Error returned when a stored or submitted string is not one of an enum's
/// variants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

/// Closed string enums that are stored as TEXT and travel as lowercase JSON.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant { kind: $kind, value: other.to_string() }),
                }
            }
        }
    };
}

string_enum!(
    /// Whether a chatbot answers incoming WhatsApp traffic.
    ChatbotStatus, "chatbot status" {
        Active => "active",
        Inactive => "inactive",
    }
);

string_enum!(
    /// Document kind of a knowledge base.
    KnowledgeBaseType, "knowledge base type" {
        Pdf => "pdf",
        Excel => "excel",
        Text => "text",
    }
);

string_enum!(
    /// Ingestion state of a knowledge base. Transitions are driven by the
    /// external ingestion process: `processing -> ready | error`, and back to
    /// `processing` when ingestion is retried.
    KnowledgeBaseStatus, "knowledge base status" {
        Processing => "processing",
        Ready => "ready",
        Error => "error",
    }
);

string_enum!(
    ConversationStatus, "conversation status" {
        Active => "active",
        Closed => "closed",
    }
);

string_enum!(
    /// Who sent a message.
    MessageType, "message type" {
        User => "user",
        Bot => "bot",
    }
);

impl Default for ChatbotStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl Default for KnowledgeBaseStatus {
    fn default() -> Self {
        Self::Processing
    }
}

impl Default for ConversationStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl KnowledgeBaseType {
    /// Type tag for an uploaded file, decided by its extension alone.
    pub fn from_extension(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "xlsx" | "xls" | "csv" => Self::Excel,
            _ => Self::Text,
        }
    }
}

/// Result reported by the ingestion collaborator for one knowledge base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "lowercase")]
pub enum IngestOutcome {
    Ready,
    Error(String),
}

impl IngestOutcome {
    pub fn status(&self) -> KnowledgeBaseStatus {
        match self {
            Self::Ready => KnowledgeBaseStatus::Ready,
            Self::Error(_) => KnowledgeBaseStatus::Error,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match self {
            Self::Ready => None,
            Self::Error(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Chatbot {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub whatsapp_phone_number: Option<String>,
    /// Never leaves the server; responses only say whether one is configured.
    #[serde(
        rename(serialize = "has_whatsapp_access_token"),
        serialize_with = "serialize_presence"
    )]
    pub whatsapp_access_token: Option<String>,
    pub whatsapp_webhook_verify_token: Option<String>,
    pub status: ChatbotStatus,
    pub settings: JsonMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn serialize_presence<S: Serializer>(value: &Option<String>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_bool(value.as_deref().is_some_and(|v| !v.is_empty()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeBase {
    pub id: Uuid,
    pub chatbot_id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: KnowledgeBaseType,
    pub file_path: Option<String>,
    pub original_filename: Option<String>,
    pub content: Option<String>,
    pub metadata: JsonMap,
    pub status: KnowledgeBaseStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub chatbot_id: Uuid,
    pub end_user_phone_number: String,
    pub end_user_name: Option<String>,
    pub status: ConversationStatus,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub content: String,
    pub external_message_id: Option<String>,
    pub metadata: JsonMap,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_decides_type() {
        assert_eq!(KnowledgeBaseType::from_extension("pdf"), KnowledgeBaseType::Pdf);
        assert_eq!(KnowledgeBaseType::from_extension("PDF"), KnowledgeBaseType::Pdf);
        assert_eq!(KnowledgeBaseType::from_extension("xlsx"), KnowledgeBaseType::Excel);
        assert_eq!(KnowledgeBaseType::from_extension("xls"), KnowledgeBaseType::Excel);
        assert_eq!(KnowledgeBaseType::from_extension("csv"), KnowledgeBaseType::Excel);
        assert_eq!(KnowledgeBaseType::from_extension("txt"), KnowledgeBaseType::Text);
        assert_eq!(KnowledgeBaseType::from_extension(""), KnowledgeBaseType::Text);
    }

    #[test]
    fn status_strings_are_closed() {
        for status in KnowledgeBaseStatus::ALL {
            assert_eq!(status.as_str().parse::<KnowledgeBaseStatus>().unwrap(), *status);
        }
        let err = "done".parse::<KnowledgeBaseStatus>().unwrap_err();
        assert_eq!(err.value, "done");
    }

    #[test]
    fn defaults_match_new_records() {
        assert_eq!(ChatbotStatus::default(), ChatbotStatus::Active);
        assert_eq!(KnowledgeBaseStatus::default(), KnowledgeBaseStatus::Processing);
        assert_eq!(ConversationStatus::default(), ConversationStatus::Active);
    }

    #[test]
    fn access_token_is_not_serialized() {
        let now = Utc::now();
        let bot = Chatbot {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            name: "Support".into(),
            description: None,
            whatsapp_phone_number: None,
            whatsapp_access_token: Some("EAAG-secret".into()),
            whatsapp_webhook_verify_token: None,
            status: ChatbotStatus::Active,
            settings: JsonMap::new(),
            created_at: now,
            updated_at: now,
        };

        let json = serde_json::to_value(&bot).unwrap();
        assert_eq!(json["has_whatsapp_access_token"], true);
        assert!(json.get("whatsapp_access_token").is_none());
        assert!(!json.to_string().contains("EAAG-secret"));
    }

    #[test]
    fn ingest_outcome_maps_to_status() {
        assert_eq!(IngestOutcome::Ready.status(), KnowledgeBaseStatus::Ready);
        let failed = IngestOutcome::Error("unreadable".into());
        assert_eq!(failed.status(), KnowledgeBaseStatus::Error);
        assert_eq!(failed.error_message(), Some("unreadable"));
    }
}

use std::collections::HashMap;

use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};
use serde_json::Value;
use uuid::Uuid;

use botdesk_types::api::{ChatbotDetail, ChatbotSummary, ConversationThread};
use botdesk_types::authz::Owned;
use botdesk_types::models::{
    Chatbot, ChatbotStatus, Conversation, ConversationStatus, JsonMap, KnowledgeBase,
    KnowledgeBaseStatus, KnowledgeBaseType, Message, MessageType,
};
use botdesk_types::validation::{ChatbotChanges, KnowledgeBaseChanges, NewChatbot};

use crate::Database;
use crate::models::{
    CHATBOT_COLUMNS, CONVERSATION_COLUMNS, ChatbotRow, ConversationRow, KNOWLEDGE_BASE_COLUMNS,
    KnowledgeBaseRow, MESSAGE_COLUMNS, MessageRow, UserRow, parse_id,
};

/// Number of conversations embedded in a chatbot's detail view.
pub const RECENT_CONVERSATIONS: u32 = 5;

/// A knowledge base row about to be inserted. Any uploaded file has already
/// been written to storage under `file_path`.
pub struct KnowledgeBaseInsert<'a> {
    pub name: &'a str,
    pub kind: KnowledgeBaseType,
    pub content: Option<&'a str>,
    pub file_path: Option<&'a str>,
    pub original_filename: Option<&'a str>,
    pub metadata: &'a JsonMap,
}

/// Outcome of [`Database::transition_knowledge_base`].
#[derive(Debug)]
pub enum StatusTransition {
    Applied(KnowledgeBase),
    /// The record exists but was in this status, so nothing was written.
    Refused(KnowledgeBaseStatus),
    Missing,
}

impl Database {
    // -- Users --

    pub fn create_user(&self, id: Uuid, name: &str, email: &str, password_hash: &str) -> Result<()> {
        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, email, password, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id.to_string(), name, email, password_hash, Utc::now()],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, email, password, created_at FROM users WHERE email = ?1",
                    [email],
                    |row| {
                        Ok(UserRow {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            email: row.get(2)?,
                            password: row.get(3)?,
                            created_at: row.get(4)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    // -- Chatbots --

    pub fn insert_chatbot(&self, owner_id: Uuid, new: &NewChatbot) -> Result<Chatbot> {
        let now = Utc::now();
        let chatbot = Chatbot {
            id: Uuid::new_v4(),
            owner_id,
            name: new.name.clone(),
            description: new.description.clone(),
            whatsapp_phone_number: new.whatsapp_phone_number.clone(),
            whatsapp_access_token: new.whatsapp_access_token.clone(),
            whatsapp_webhook_verify_token: new.whatsapp_webhook_verify_token.clone(),
            status: new.status,
            settings: JsonMap::new(),
            created_at: now,
            updated_at: now,
        };

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO chatbots (id, owner_id, name, description, whatsapp_phone_number,
                     whatsapp_access_token, whatsapp_webhook_verify_token, status, settings,
                     created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    chatbot.id.to_string(),
                    owner_id.to_string(),
                    chatbot.name,
                    chatbot.description,
                    chatbot.whatsapp_phone_number,
                    chatbot.whatsapp_access_token,
                    chatbot.whatsapp_webhook_verify_token,
                    chatbot.status.as_str(),
                    Value::Object(chatbot.settings.clone()),
                    now,
                    now,
                ],
            )?;
            Ok(())
        })?;

        Ok(chatbot)
    }

    /// One page of the owner's chatbots, newest first, with child counts.
    /// Returns the page and the total number of matching chatbots.
    pub fn list_chatbots(
        &self,
        owner_id: Uuid,
        status: Option<ChatbotStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<ChatbotSummary>, u64)> {
        let owner = owner_id.to_string();
        let status = status.map(|s| s.as_str());

        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chatbots WHERE owner_id = ?1 AND (?2 IS NULL OR status = ?2)",
                params![owner, status],
                |row| row.get(0),
            )?;

            let sql = format!(
                "SELECT {CHATBOT_COLUMNS},
                    (SELECT COUNT(*) FROM knowledge_bases k WHERE k.chatbot_id = c.id),
                    (SELECT COUNT(*) FROM conversations v WHERE v.chatbot_id = c.id)
                 FROM chatbots c
                 WHERE c.owner_id = ?1 AND (?2 IS NULL OR c.status = ?2)
                 ORDER BY c.created_at DESC, c.rowid DESC
                 LIMIT ?3 OFFSET ?4"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![owner, status, limit, offset], |row| {
                    Ok((
                        ChatbotRow::read(row)?,
                        row.get::<_, i64>(ChatbotRow::WIDTH)?,
                        row.get::<_, i64>(ChatbotRow::WIDTH + 1)?,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            let summaries = rows
                .into_iter()
                .map(|(row, knowledge_bases, conversations)| -> Result<ChatbotSummary> {
                    Ok(ChatbotSummary {
                        chatbot: row.try_into()?,
                        knowledge_bases_count: knowledge_bases as u64,
                        conversations_count: conversations as u64,
                    })
                })
                .collect::<Result<Vec<_>>>()?;

            Ok((summaries, total as u64))
        })
    }

    pub fn get_chatbot(&self, id: Uuid) -> Result<Option<Owned<Chatbot>>> {
        self.with_conn(|conn| {
            Ok(query_chatbot(conn, id)?.map(|chatbot| Owned::new(chatbot.owner_id, chatbot)))
        })
    }

    /// Knowledge bases newest first, plus the most recently active
    /// conversations with their messages.
    pub fn chatbot_detail(&self, chatbot: Chatbot) -> Result<ChatbotDetail> {
        let knowledge_bases = self.with_conn(|conn| {
            query_knowledge_bases(conn, chatbot.id, None, -1, 0)
        })?;
        let conversations = self.recent_conversations(chatbot.id, RECENT_CONVERSATIONS)?;

        Ok(ChatbotDetail {
            chatbot,
            knowledge_bases,
            conversations,
        })
    }

    pub fn update_chatbot(&self, id: Uuid, changes: &ChatbotChanges) -> Result<Option<Chatbot>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let Some(mut chatbot) = query_chatbot(&tx, id)? else {
                return Ok(None);
            };

            chatbot.name = changes.name.clone();
            if let Some(v) = &changes.description {
                chatbot.description = v.clone();
            }
            if let Some(v) = &changes.whatsapp_phone_number {
                chatbot.whatsapp_phone_number = v.clone();
            }
            if let Some(v) = &changes.whatsapp_access_token {
                chatbot.whatsapp_access_token = v.clone();
            }
            if let Some(v) = &changes.whatsapp_webhook_verify_token {
                chatbot.whatsapp_webhook_verify_token = v.clone();
            }
            if let Some(status) = changes.status {
                chatbot.status = status;
            }
            chatbot.updated_at = Utc::now();

            tx.execute(
                "UPDATE chatbots SET name = ?2, description = ?3, whatsapp_phone_number = ?4,
                     whatsapp_access_token = ?5, whatsapp_webhook_verify_token = ?6,
                     status = ?7, updated_at = ?8
                 WHERE id = ?1",
                params![
                    id.to_string(),
                    chatbot.name,
                    chatbot.description,
                    chatbot.whatsapp_phone_number,
                    chatbot.whatsapp_access_token,
                    chatbot.whatsapp_webhook_verify_token,
                    chatbot.status.as_str(),
                    chatbot.updated_at,
                ],
            )?;
            tx.commit()?;

            Ok(Some(chatbot))
        })
    }

    /// Delete a chatbot; knowledge bases, conversations and messages go with
    /// it through ON DELETE CASCADE. Returns the storage paths of the files
    /// that belonged to the removed knowledge bases.
    pub fn delete_chatbot(&self, id: Uuid) -> Result<Vec<String>> {
        let id = id.to_string();
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let paths = {
                let mut stmt = tx.prepare(
                    "SELECT file_path FROM knowledge_bases
                     WHERE chatbot_id = ?1 AND file_path IS NOT NULL",
                )?;
                stmt.query_map([&id], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?
            };
            tx.execute("DELETE FROM chatbots WHERE id = ?1", [&id])?;
            tx.commit()?;
            Ok(paths)
        })
    }

    // -- Knowledge bases --

    pub fn insert_knowledge_base(
        &self,
        chatbot_id: Uuid,
        insert: &KnowledgeBaseInsert<'_>,
    ) -> Result<KnowledgeBase> {
        let now = Utc::now();
        let knowledge_base = KnowledgeBase {
            id: Uuid::new_v4(),
            chatbot_id,
            name: insert.name.to_string(),
            kind: insert.kind,
            file_path: insert.file_path.map(str::to_string),
            original_filename: insert.original_filename.map(str::to_string),
            content: insert.content.map(str::to_string),
            metadata: insert.metadata.clone(),
            status: KnowledgeBaseStatus::default(),
            error_message: None,
            created_at: now,
            updated_at: now,
        };

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO knowledge_bases (id, chatbot_id, name, type, file_path,
                     original_filename, content, metadata, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    knowledge_base.id.to_string(),
                    chatbot_id.to_string(),
                    knowledge_base.name,
                    knowledge_base.kind.as_str(),
                    knowledge_base.file_path,
                    knowledge_base.original_filename,
                    knowledge_base.content,
                    Value::Object(knowledge_base.metadata.clone()),
                    knowledge_base.status.as_str(),
                    now,
                    now,
                ],
            )?;
            Ok(())
        })?;

        Ok(knowledge_base)
    }

    pub fn list_knowledge_bases(
        &self,
        chatbot_id: Uuid,
        status: Option<KnowledgeBaseStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<KnowledgeBase>, u64)> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM knowledge_bases
                 WHERE chatbot_id = ?1 AND (?2 IS NULL OR status = ?2)",
                params![chatbot_id.to_string(), status.map(|s| s.as_str())],
                |row| row.get(0),
            )?;
            let page = query_knowledge_bases(
                conn,
                chatbot_id,
                status,
                i64::from(limit),
                i64::from(offset),
            )?;
            Ok((page, total as u64))
        })
    }

    /// A knowledge base together with the owner of its chatbot.
    pub fn get_knowledge_base(&self, id: Uuid) -> Result<Option<Owned<KnowledgeBase>>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {KNOWLEDGE_BASE_COLUMNS}, c.owner_id
                 FROM knowledge_bases k
                 JOIN chatbots c ON c.id = k.chatbot_id
                 WHERE k.id = ?1"
            );
            let row = conn
                .query_row(&sql, [id.to_string()], |row| {
                    Ok((
                        KnowledgeBaseRow::read(row)?,
                        row.get::<_, String>(KnowledgeBaseRow::WIDTH)?,
                    ))
                })
                .optional()?;

            match row {
                Some((row, owner)) => {
                    let knowledge_base = KnowledgeBase::try_from(row)?;
                    Ok(Some(Owned::new(parse_id(&owner)?, knowledge_base)))
                }
                None => Ok(None),
            }
        })
    }

    /// Apply an owner's edit. Leaving the error state clears the stored
    /// error message.
    pub fn update_knowledge_base(
        &self,
        id: Uuid,
        changes: &KnowledgeBaseChanges,
    ) -> Result<Option<KnowledgeBase>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let Some(mut knowledge_base) = query_knowledge_base(&tx, id)? else {
                return Ok(None);
            };

            knowledge_base.name = changes.name.clone();
            if let Some(content) = &changes.content {
                knowledge_base.content = content.clone();
            }
            if let Some(status) = changes.status {
                knowledge_base.status = status;
                if status != KnowledgeBaseStatus::Error {
                    knowledge_base.error_message = None;
                }
            }
            knowledge_base.updated_at = Utc::now();

            write_knowledge_base(&tx, &knowledge_base)?;
            tx.commit()?;
            Ok(Some(knowledge_base))
        })
    }

    /// Move a knowledge base to `to` only if its current status is one of
    /// `from`. The check and the write share one transaction.
    pub fn transition_knowledge_base(
        &self,
        id: Uuid,
        from: &[KnowledgeBaseStatus],
        to: KnowledgeBaseStatus,
        error_message: Option<&str>,
    ) -> Result<StatusTransition> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let Some(mut knowledge_base) = query_knowledge_base(&tx, id)? else {
                return Ok(StatusTransition::Missing);
            };
            if !from.contains(&knowledge_base.status) {
                return Ok(StatusTransition::Refused(knowledge_base.status));
            }

            knowledge_base.status = to;
            knowledge_base.error_message = error_message.map(str::to_string);
            knowledge_base.updated_at = Utc::now();

            write_knowledge_base(&tx, &knowledge_base)?;
            tx.commit()?;
            Ok(StatusTransition::Applied(knowledge_base))
        })
    }

    /// Returns whether a row was deleted.
    pub fn delete_knowledge_base(&self, id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let n = conn.execute("DELETE FROM knowledge_bases WHERE id = ?1", [id.to_string()])?;
            Ok(n > 0)
        })
    }

    // -- Conversations & messages --

    /// Record a new conversation with an end user. Used by the messaging
    /// integration; there is no HTTP route for it.
    pub fn insert_conversation(
        &self,
        chatbot_id: Uuid,
        end_user_phone_number: &str,
        end_user_name: Option<&str>,
    ) -> Result<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            chatbot_id,
            end_user_phone_number: end_user_phone_number.to_string(),
            end_user_name: end_user_name.map(str::to_string),
            status: ConversationStatus::default(),
            last_message_at: None,
            created_at: now,
            updated_at: now,
        };

        self.with_conn_mut(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, chatbot_id, end_user_phone_number, end_user_name,
                     status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    conversation.id.to_string(),
                    chatbot_id.to_string(),
                    conversation.end_user_phone_number,
                    conversation.end_user_name,
                    conversation.status.as_str(),
                    now,
                    now,
                ],
            )?;
            Ok(())
        })?;

        Ok(conversation)
    }

    /// Append a message and move the conversation's `last_message_at` to it.
    pub fn append_message(
        &self,
        conversation_id: Uuid,
        kind: MessageType,
        content: &str,
        external_message_id: Option<&str>,
        metadata: &JsonMap,
    ) -> Result<Message> {
        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            kind,
            content: content.to_string(),
            external_message_id: external_message_id.map(str::to_string),
            metadata: metadata.clone(),
            created_at: now,
            updated_at: now,
        };

        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, conversation_id, type, content, external_message_id,
                     metadata, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    message.id.to_string(),
                    conversation_id.to_string(),
                    kind.as_str(),
                    message.content,
                    message.external_message_id,
                    Value::Object(message.metadata.clone()),
                    now,
                    now,
                ],
            )?;
            tx.execute(
                "UPDATE conversations SET last_message_at = ?2, updated_at = ?2 WHERE id = ?1",
                params![conversation_id.to_string(), now],
            )?;
            tx.commit()?;
            Ok(())
        })?;

        Ok(message)
    }

    /// One page of a chatbot's conversations, most recently active first.
    pub fn list_conversations(
        &self,
        chatbot_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<Conversation>, u64)> {
        self.with_conn(|conn| {
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM conversations WHERE chatbot_id = ?1",
                [chatbot_id.to_string()],
                |row| row.get(0),
            )?;
            let page = query_conversations(conn, chatbot_id, limit, offset)?;
            Ok((page, total as u64))
        })
    }

    /// The `limit` most recently active conversations, each with its messages.
    pub fn recent_conversations(&self, chatbot_id: Uuid, limit: u32) -> Result<Vec<ConversationThread>> {
        self.with_conn(|conn| {
            let conversations = query_conversations(conn, chatbot_id, limit, 0)?;
            let ids: Vec<String> = conversations.iter().map(|c| c.id.to_string()).collect();
            let mut by_conversation: HashMap<Uuid, Vec<Message>> = HashMap::new();
            for message in query_messages(conn, &ids)? {
                by_conversation.entry(message.conversation_id).or_default().push(message);
            }

            Ok(conversations
                .into_iter()
                .map(|conversation| ConversationThread {
                    messages: by_conversation.remove(&conversation.id).unwrap_or_default(),
                    conversation,
                })
                .collect())
        })
    }

    /// A conversation together with the owner of its chatbot.
    pub fn get_conversation(&self, id: Uuid) -> Result<Option<Owned<Conversation>>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {CONVERSATION_COLUMNS}, c.owner_id
                 FROM conversations v
                 JOIN chatbots c ON c.id = v.chatbot_id
                 WHERE v.id = ?1"
            );
            let row = conn
                .query_row(&sql, [id.to_string()], |row| {
                    Ok((
                        ConversationRow::read(row)?,
                        row.get::<_, String>(ConversationRow::WIDTH)?,
                    ))
                })
                .optional()?;

            match row {
                Some((row, owner)) => {
                    let conversation = Conversation::try_from(row)?;
                    Ok(Some(Owned::new(parse_id(&owner)?, conversation)))
                }
                None => Ok(None),
            }
        })
    }

    /// Messages of one conversation, oldest first.
    pub fn get_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>> {
        self.with_conn(|conn| query_messages(conn, &[conversation_id.to_string()]))
    }
}

fn query_chatbot(conn: &Connection, id: Uuid) -> Result<Option<Chatbot>> {
    let sql = format!("SELECT {CHATBOT_COLUMNS} FROM chatbots c WHERE c.id = ?1");
    let row = conn
        .query_row(&sql, [id.to_string()], ChatbotRow::read)
        .optional()?;
    row.map(Chatbot::try_from).transpose()
}

fn query_knowledge_base(conn: &Connection, id: Uuid) -> Result<Option<KnowledgeBase>> {
    let sql = format!("SELECT {KNOWLEDGE_BASE_COLUMNS} FROM knowledge_bases k WHERE k.id = ?1");
    let row = conn
        .query_row(&sql, [id.to_string()], KnowledgeBaseRow::read)
        .optional()?;
    row.map(KnowledgeBase::try_from).transpose()
}

/// Newest first. A negative `limit` returns every row.
fn query_knowledge_bases(
    conn: &Connection,
    chatbot_id: Uuid,
    status: Option<KnowledgeBaseStatus>,
    limit: i64,
    offset: i64,
) -> Result<Vec<KnowledgeBase>> {
    let sql = format!(
        "SELECT {KNOWLEDGE_BASE_COLUMNS}
         FROM knowledge_bases k
         WHERE k.chatbot_id = ?1 AND (?2 IS NULL OR k.status = ?2)
         ORDER BY k.created_at DESC, k.rowid DESC
         LIMIT ?3 OFFSET ?4"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            params![chatbot_id.to_string(), status.map(|s| s.as_str()), limit, offset],
            KnowledgeBaseRow::read,
        )?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(KnowledgeBase::try_from).collect()
}

fn write_knowledge_base(conn: &Connection, knowledge_base: &KnowledgeBase) -> Result<()> {
    conn.execute(
        "UPDATE knowledge_bases SET name = ?2, content = ?3, status = ?4, error_message = ?5,
             updated_at = ?6
         WHERE id = ?1",
        params![
            knowledge_base.id.to_string(),
            knowledge_base.name,
            knowledge_base.content,
            knowledge_base.status.as_str(),
            knowledge_base.error_message,
            knowledge_base.updated_at,
        ],
    )?;
    Ok(())
}

/// Conversations that never received a message sort last.
fn query_conversations(
    conn: &Connection,
    chatbot_id: Uuid,
    limit: u32,
    offset: u32,
) -> Result<Vec<Conversation>> {
    let sql = format!(
        "SELECT {CONVERSATION_COLUMNS}
         FROM conversations v
         WHERE v.chatbot_id = ?1
         ORDER BY v.last_message_at DESC NULLS LAST, v.rowid DESC
         LIMIT ?2 OFFSET ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![chatbot_id.to_string(), limit, offset], ConversationRow::read)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(Conversation::try_from).collect()
}

/// Batch-fetch messages for a set of conversation ids, oldest first.
fn query_messages(conn: &Connection, conversation_ids: &[String]) -> Result<Vec<Message>> {
    if conversation_ids.is_empty() {
        return Ok(vec![]);
    }

    let placeholders: Vec<String> = (1..=conversation_ids.len()).map(|i| format!("?{}", i)).collect();
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages m
         WHERE m.conversation_id IN ({})
         ORDER BY m.created_at ASC, m.rowid ASC",
        placeholders.join(", ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(conversation_ids), MessageRow::read)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(Message::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use botdesk_types::authz::{Actor, authorize};

    fn db_with_user() -> (Database, Uuid) {
        let db = Database::open_in_memory().unwrap();
        let user = add_user(&db, "owner@example.com");
        (db, user)
    }

    fn add_user(db: &Database, email: &str) -> Uuid {
        let id = Uuid::new_v4();
        db.create_user(id, "Test User", email, "not-a-real-hash").unwrap();
        id
    }

    fn chatbot(db: &Database, owner: Uuid, name: &str) -> Chatbot {
        let new = NewChatbot {
            name: name.to_string(),
            description: None,
            whatsapp_phone_number: None,
            whatsapp_access_token: None,
            whatsapp_webhook_verify_token: None,
            status: ChatbotStatus::Active,
        };
        db.insert_chatbot(owner, &new).unwrap()
    }

    fn knowledge_base(db: &Database, chatbot_id: Uuid, name: &str, file: Option<&str>) -> KnowledgeBase {
        let metadata = JsonMap::new();
        let insert = KnowledgeBaseInsert {
            name,
            kind: KnowledgeBaseType::Text,
            content: Some("Hello"),
            file_path: file,
            original_filename: file,
            metadata: &metadata,
        };
        db.insert_knowledge_base(chatbot_id, &insert).unwrap()
    }

    fn count(db: &Database, table: &str) -> i64 {
        db.with_conn(|conn| {
            Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?)
        })
        .unwrap()
    }

    #[test]
    fn migrations_are_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| crate::migrations::run(conn)).unwrap();
        let version: i64 = db
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))?)
            })
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn new_chatbot_round_trips_with_owner() {
        let (db, owner) = db_with_user();
        let created = chatbot(&db, owner, "Support");

        let owned = db.get_chatbot(created.id).unwrap().unwrap();
        assert_eq!(owned.owner_id(), owner);
        let loaded = authorize(&Actor::new(owner), owned).unwrap();
        assert_eq!(loaded.name, "Support");
        assert_eq!(loaded.status, ChatbotStatus::Active);
        assert!(loaded.settings.is_empty());

        assert!(db.get_chatbot(Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn listing_is_paginated_newest_first_and_owner_scoped() {
        let (db, owner) = db_with_user();
        let other = add_user(&db, "other@example.com");
        for i in 0..15 {
            chatbot(&db, owner, &format!("bot-{i}"));
        }
        chatbot(&db, other, "not-mine");

        let (first, total) = db.list_chatbots(owner, None, 10, 0).unwrap();
        assert_eq!(total, 15);
        assert_eq!(first.len(), 10);
        assert_eq!(first[0].chatbot.name, "bot-14");
        assert_eq!(first[9].chatbot.name, "bot-5");

        let (second, _) = db.list_chatbots(owner, None, 10, 10).unwrap();
        assert_eq!(second.len(), 5);
        assert_eq!(second[4].chatbot.name, "bot-0");
        assert!(second.iter().all(|s| s.chatbot.owner_id == owner));
    }

    #[test]
    fn listing_counts_children_and_filters_status() {
        let (db, owner) = db_with_user();
        let bot = chatbot(&db, owner, "Support");
        knowledge_base(&db, bot.id, "FAQ", None);
        knowledge_base(&db, bot.id, "Manual", None);
        db.insert_conversation(bot.id, "+15550001", None).unwrap();

        let idle = chatbot(&db, owner, "Idle");
        let changes = ChatbotChanges {
            name: "Idle".into(),
            description: None,
            whatsapp_phone_number: None,
            whatsapp_access_token: None,
            whatsapp_webhook_verify_token: None,
            status: Some(ChatbotStatus::Inactive),
        };
        db.update_chatbot(idle.id, &changes).unwrap();

        let (active, total) = db.list_chatbots(owner, Some(ChatbotStatus::Active), 10, 0).unwrap();
        assert_eq!(total, 1);
        assert_eq!(active[0].knowledge_bases_count, 2);
        assert_eq!(active[0].conversations_count, 1);

        let (inactive, _) = db.list_chatbots(owner, Some(ChatbotStatus::Inactive), 10, 0).unwrap();
        assert_eq!(inactive[0].chatbot.name, "Idle");
    }

    #[test]
    fn update_leaves_absent_fields_alone() {
        let (db, owner) = db_with_user();
        let new = NewChatbot {
            name: "Support".into(),
            description: Some("Helps customers".into()),
            whatsapp_phone_number: Some("+15550100".into()),
            whatsapp_access_token: None,
            whatsapp_webhook_verify_token: None,
            status: ChatbotStatus::Active,
        };
        let bot = db.insert_chatbot(owner, &new).unwrap();

        let changes = ChatbotChanges {
            name: "Sales".into(),
            description: Some(None),
            whatsapp_phone_number: None,
            whatsapp_access_token: Some(Some("token".into())),
            whatsapp_webhook_verify_token: None,
            status: None,
        };
        let updated = db.update_chatbot(bot.id, &changes).unwrap().unwrap();
        assert_eq!(updated.name, "Sales");
        assert_eq!(updated.description, None);
        assert_eq!(updated.whatsapp_phone_number.as_deref(), Some("+15550100"));
        assert_eq!(updated.whatsapp_access_token.as_deref(), Some("token"));
        assert_eq!(updated.status, ChatbotStatus::Active);
        assert_eq!(updated.owner_id, owner);

        assert!(db.update_chatbot(Uuid::new_v4(), &changes).unwrap().is_none());
    }

    #[test]
    fn deleting_a_chatbot_cascades() {
        let (db, owner) = db_with_user();
        let bot = chatbot(&db, owner, "Support");
        let keep = chatbot(&db, owner, "Keep");
        knowledge_base(&db, bot.id, "FAQ", Some("knowledge-bases/a.pdf"));
        knowledge_base(&db, bot.id, "Notes", None);
        knowledge_base(&db, keep.id, "Kept", None);
        let conversation = db.insert_conversation(bot.id, "+15550001", Some("Ana")).unwrap();
        db.append_message(conversation.id, MessageType::User, "hi", None, &JsonMap::new())
            .unwrap();
        db.append_message(conversation.id, MessageType::Bot, "hello", None, &JsonMap::new())
            .unwrap();

        let paths = db.delete_chatbot(bot.id).unwrap();
        assert_eq!(paths, vec!["knowledge-bases/a.pdf".to_string()]);

        assert!(db.get_chatbot(bot.id).unwrap().is_none());
        assert_eq!(count(&db, "knowledge_bases"), 1);
        assert_eq!(count(&db, "conversations"), 0);
        assert_eq!(count(&db, "messages"), 0);
    }

    #[test]
    fn knowledge_base_resolves_owner_through_chatbot() {
        let (db, owner) = db_with_user();
        let bot = chatbot(&db, owner, "Support");
        let kb = knowledge_base(&db, bot.id, "FAQ", None);

        let owned = db.get_knowledge_base(kb.id).unwrap().unwrap();
        assert_eq!(owned.owner_id(), owner);
        assert!(authorize(&Actor::new(Uuid::new_v4()), owned).is_err());

        let loaded = authorize(&Actor::new(owner), db.get_knowledge_base(kb.id).unwrap().unwrap())
            .unwrap();
        assert_eq!(loaded.status, KnowledgeBaseStatus::Processing);
        assert_eq!(loaded.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn knowledge_bases_list_newest_first_with_status_filter() {
        let (db, owner) = db_with_user();
        let bot = chatbot(&db, owner, "Support");
        for i in 0..12 {
            knowledge_base(&db, bot.id, &format!("kb-{i}"), None);
        }
        let ready = knowledge_base(&db, bot.id, "ready-one", None);
        db.transition_knowledge_base(
            ready.id,
            &[KnowledgeBaseStatus::Processing],
            KnowledgeBaseStatus::Ready,
            None,
        )
        .unwrap();

        let (page, total) = db.list_knowledge_bases(bot.id, None, 10, 0).unwrap();
        assert_eq!(total, 13);
        assert_eq!(page.len(), 10);
        assert_eq!(page[0].name, "ready-one");

        let (only_ready, total) = db
            .list_knowledge_bases(bot.id, Some(KnowledgeBaseStatus::Ready), 10, 0)
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(only_ready[0].id, ready.id);
    }

    #[test]
    fn status_transitions_keep_error_message_consistent() {
        let (db, owner) = db_with_user();
        let bot = chatbot(&db, owner, "Support");
        let kb = knowledge_base(&db, bot.id, "FAQ", None);

        let StatusTransition::Applied(failed) = db
            .transition_knowledge_base(
                kb.id,
                &[KnowledgeBaseStatus::Processing],
                KnowledgeBaseStatus::Error,
                Some("unreadable"),
            )
            .unwrap()
        else {
            panic!("expected the transition to apply");
        };
        assert_eq!(failed.status, KnowledgeBaseStatus::Error);
        assert_eq!(failed.error_message.as_deref(), Some("unreadable"));

        let changes = KnowledgeBaseChanges {
            name: "FAQ v2".into(),
            content: None,
            status: Some(KnowledgeBaseStatus::Processing),
        };
        let retried = db.update_knowledge_base(kb.id, &changes).unwrap().unwrap();
        assert_eq!(retried.status, KnowledgeBaseStatus::Processing);
        assert_eq!(retried.error_message, None);
        assert_eq!(retried.name, "FAQ v2");
        assert_eq!(retried.content.as_deref(), Some("Hello"));
    }

    #[test]
    fn delete_knowledge_base_reports_missing_rows() {
        let (db, owner) = db_with_user();
        let bot = chatbot(&db, owner, "Support");
        let kb = knowledge_base(&db, bot.id, "FAQ", None);

        assert!(db.delete_knowledge_base(kb.id).unwrap());
        assert!(!db.delete_knowledge_base(kb.id).unwrap());
        assert!(db.get_knowledge_base(kb.id).unwrap().is_none());
    }

    #[test]
    fn recent_conversations_are_limited_and_ordered_by_activity() {
        let (db, owner) = db_with_user();
        let bot = chatbot(&db, owner, "Support");

        let silent = db.insert_conversation(bot.id, "+15550000", None).unwrap();
        let mut active = Vec::new();
        for i in 0..7 {
            let c = db.insert_conversation(bot.id, &format!("+1555000{}", i + 1), None).unwrap();
            db.append_message(c.id, MessageType::User, &format!("question {i}"), None, &JsonMap::new())
                .unwrap();
            active.push(c.id);
        }
        db.append_message(active[0], MessageType::Bot, "late answer", Some("wamid.1"), &JsonMap::new())
            .unwrap();

        let recent = db.recent_conversations(bot.id, RECENT_CONVERSATIONS).unwrap();
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].conversation.id, active[0]);
        assert_eq!(recent[1].conversation.id, active[6]);
        assert!(recent.iter().all(|t| t.conversation.id != silent.id));

        let first = &recent[0];
        assert_eq!(first.messages.len(), 2);
        assert_eq!(first.messages[0].kind, MessageType::User);
        assert_eq!(first.messages[1].external_message_id.as_deref(), Some("wamid.1"));
        assert_eq!(first.conversation.last_message_at, Some(first.messages[1].created_at));

        let (all, total) = db.list_conversations(bot.id, 10, 0).unwrap();
        assert_eq!(total, 8);
        assert_eq!(all.last().unwrap().id, silent.id);
    }

    #[test]
    fn conversation_resolves_owner_through_chatbot() {
        let (db, owner) = db_with_user();
        let bot = chatbot(&db, owner, "Support");
        let conversation = db.insert_conversation(bot.id, "+15550001", Some("Ana")).unwrap();

        let owned = db.get_conversation(conversation.id).unwrap().unwrap();
        assert_eq!(owned.owner_id(), owner);
        assert!(db.get_messages(conversation.id).unwrap().is_empty());
    }

    #[test]
    fn chatbot_detail_embeds_children() {
        let (db, owner) = db_with_user();
        let bot = chatbot(&db, owner, "Support");
        knowledge_base(&db, bot.id, "older", None);
        knowledge_base(&db, bot.id, "newer", None);
        let c = db.insert_conversation(bot.id, "+15550001", None).unwrap();
        db.append_message(c.id, MessageType::User, "hi", None, &JsonMap::new()).unwrap();

        let detail = db.chatbot_detail(bot).unwrap();
        let names: Vec<_> = detail.knowledge_bases.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, ["newer", "older"]);
        assert_eq!(detail.conversations.len(), 1);
        assert_eq!(detail.conversations[0].messages[0].content, "hi");
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let (db, _) = db_with_user();
        let again = db.create_user(Uuid::new_v4(), "Dup", "owner@example.com", "hash");
        assert!(again.is_err());
        let user = db.get_user_by_email("owner@example.com").unwrap().unwrap();
        assert_eq!(user.name, "Test User");
    }

    #[test]
    fn guarded_transition() {
        let (db, owner) = db_with_user();
        let bot = chatbot(&db, owner, "Support");
        let kb = knowledge_base(&db, bot.id, "FAQ", None);
        let processing = [KnowledgeBaseStatus::Processing];

        match db
            .transition_knowledge_base(kb.id, &processing, KnowledgeBaseStatus::Error, Some("bad file"))
            .unwrap()
        {
            StatusTransition::Applied(kb) => {
                assert_eq!(kb.status, KnowledgeBaseStatus::Error);
                assert_eq!(kb.error_message.as_deref(), Some("bad file"));
            }
            other => panic!("expected the transition to apply, got {:?}", other),
        }

        // No longer processing, so a second completion is refused and nothing changes.
        assert!(matches!(
            db.transition_knowledge_base(kb.id, &processing, KnowledgeBaseStatus::Ready, None)
                .unwrap(),
            StatusTransition::Refused(KnowledgeBaseStatus::Error)
        ));
        let stored =
            authorize(&Actor::new(owner), db.get_knowledge_base(kb.id).unwrap().unwrap()).unwrap();
        assert_eq!(stored.status, KnowledgeBaseStatus::Error);
        assert_eq!(stored.error_message.as_deref(), Some("bad file"));

        assert!(matches!(
            db.transition_knowledge_base(Uuid::new_v4(), &processing, KnowledgeBaseStatus::Ready, None)
                .unwrap(),
            StatusTransition::Missing
        ));
    }
}

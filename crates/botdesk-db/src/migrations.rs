use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            BEGIN;

            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                name        TEXT NOT NULL,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE chatbots (
                id                              TEXT PRIMARY KEY,
                owner_id                        TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name                            TEXT NOT NULL,
                description                     TEXT,
                whatsapp_phone_number           TEXT,
                whatsapp_access_token           TEXT,
                whatsapp_webhook_verify_token   TEXT,
                status                          TEXT NOT NULL DEFAULT 'active'
                                                CHECK (status IN ('active', 'inactive')),
                settings                        TEXT,
                created_at                      TEXT NOT NULL,
                updated_at                      TEXT NOT NULL
            );

            CREATE INDEX idx_chatbots_owner ON chatbots(owner_id, created_at);
            CREATE INDEX idx_chatbots_owner_status ON chatbots(owner_id, status);

            CREATE TABLE knowledge_bases (
                id                  TEXT PRIMARY KEY,
                chatbot_id          TEXT NOT NULL REFERENCES chatbots(id) ON DELETE CASCADE,
                name                TEXT NOT NULL,
                type                TEXT NOT NULL CHECK (type IN ('pdf', 'excel', 'text')),
                file_path           TEXT,
                original_filename   TEXT,
                content             TEXT,
                metadata            TEXT,
                status              TEXT NOT NULL DEFAULT 'processing'
                                    CHECK (status IN ('processing', 'ready', 'error')),
                error_message       TEXT,
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            );

            CREATE INDEX idx_knowledge_bases_chatbot ON knowledge_bases(chatbot_id, created_at);
            CREATE INDEX idx_knowledge_bases_chatbot_status ON knowledge_bases(chatbot_id, status);

            CREATE TABLE conversations (
                id                      TEXT PRIMARY KEY,
                chatbot_id              TEXT NOT NULL REFERENCES chatbots(id) ON DELETE CASCADE,
                end_user_phone_number   TEXT NOT NULL,
                end_user_name           TEXT,
                status                  TEXT NOT NULL DEFAULT 'active'
                                        CHECK (status IN ('active', 'closed')),
                last_message_at         TEXT,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            );

            CREATE INDEX idx_conversations_chatbot ON conversations(chatbot_id, last_message_at);
            CREATE INDEX idx_conversations_phone ON conversations(chatbot_id, end_user_phone_number);
            CREATE INDEX idx_conversations_status ON conversations(status);

            CREATE TABLE messages (
                id                      TEXT PRIMARY KEY,
                conversation_id         TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
                type                    TEXT NOT NULL CHECK (type IN ('user', 'bot')),
                content                 TEXT NOT NULL,
                external_message_id     TEXT,
                metadata                TEXT,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            );

            CREATE INDEX idx_messages_conversation ON messages(conversation_id, created_at);
            CREATE INDEX idx_messages_external ON messages(external_message_id);

            INSERT INTO schema_version (version) VALUES (1);

            COMMIT;
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

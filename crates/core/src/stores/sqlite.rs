use crate::error::StoreError;
use crate::models::{Agent, ChatMessage, KnowledgeDocument, NewDocument, NewMessage, QuotaState, Sender};
use crate::quota::Plan;
use crate::traits::MetadataStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    pub title: String,
    pub message_count: i64,
    pub last_activity: DateTime<Utc>,
}

const SESSION_TITLE_MAX: usize = 50;
const SESSION_LIST_MAX: usize = 50;
const FALLBACK_TITLE: &str = "Nova Conversa";

/// One connection behind a mutex; queries are short.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(path: impl AsRef<Path>) -> Result<SqliteStore, StoreError> {
        let conn = Connection::open(path)?;
        let store = SqliteStore { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<SqliteStore, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteStore { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS tenants (
                id              INTEGER PRIMARY KEY,
                plan            TEXT NOT NULL,
                tokens_consumed INTEGER NOT NULL DEFAULT 0,
                last_reset      TEXT NOT NULL,
                last_activity   TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS agents (
                id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_tenant       INTEGER,
                name               TEXT NOT NULL,
                specialty          TEXT NOT NULL,
                system_instruction TEXT NOT NULL,
                is_public          INTEGER NOT NULL DEFAULT 0
            );
            CREATE TABLE IF NOT EXISTS knowledge_documents (
                id               INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id        INTEGER NOT NULL,
                file_name        TEXT NOT NULL,
                file_type        TEXT NOT NULL,
                vector_id_prefix TEXT NOT NULL,
                tag              TEXT NOT NULL,
                created_at       TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS chat_messages (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id   INTEGER NOT NULL,
                agent_ref   TEXT NOT NULL,
                session_id  TEXT NOT NULL,
                sender      TEXT NOT NULL,
                text        TEXT NOT NULL,
                tokens_used INTEGER NOT NULL DEFAULT 0,
                timestamp   TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_session
                ON chat_messages (tenant_id, session_id, timestamp);
            CREATE INDEX IF NOT EXISTS idx_documents_tag
                ON knowledge_documents (tag);",
        )?;
        Ok(())
    }

    /// An existing row keeps its counters and plan.
    pub fn ensure_tenant(&self, tenant_id: i64, plan: Plan) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn.lock().execute(
            "INSERT OR IGNORE INTO tenants (id, plan, tokens_consumed, last_reset, last_activity)
             VALUES (?1, ?2, 0, ?3, ?3)",
            params![tenant_id, plan.as_str(), now],
        )?;
        Ok(())
    }

    pub fn set_plan(&self, tenant_id: i64, plan: Plan) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "UPDATE tenants SET plan = ?2 WHERE id = ?1",
            params![tenant_id, plan.as_str()],
        )?;
        Ok(())
    }

    pub fn insert_agent(
        &self,
        owner_tenant: Option<i64>,
        name: &str,
        specialty: &str,
        system_instruction: &str,
        is_public: bool,
    ) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO agents (owner_tenant, name, specialty, system_instruction, is_public)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![owner_tenant, name, specialty, system_instruction, is_public],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn documents_for_tenant(&self, tenant_id: i64) -> Result<Vec<KnowledgeDocument>, StoreError> {
        let conn = self.conn.lock();
        let mut statement = conn.prepare(
            "SELECT id, tenant_id, file_name, file_type, vector_id_prefix, tag, created_at
             FROM knowledge_documents WHERE tenant_id = ?1 ORDER BY created_at DESC",
        )?;
        let rows = statement
            .query_map(params![tenant_id], document_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_document).collect()
    }

    /// Newest activity first; the title is the first user message of
    /// the session, truncated.
    pub fn list_sessions(&self, tenant_id: i64) -> Result<Vec<SessionSummary>, StoreError> {
        let conn = self.conn.lock();
        let mut statement = conn.prepare(
            "SELECT session_id, COUNT(*), MAX(timestamp)
             FROM chat_messages WHERE tenant_id = ?1
             GROUP BY session_id ORDER BY MAX(timestamp) DESC LIMIT ?2",
        )?;
        let groups = statement
            .query_map(params![tenant_id, SESSION_LIST_MAX as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut title_query = conn.prepare(
            "SELECT text FROM chat_messages
             WHERE tenant_id = ?1 AND session_id = ?2 AND sender = 'user'
             ORDER BY timestamp ASC, id ASC LIMIT 1",
        )?;

        let mut sessions = Vec::with_capacity(groups.len());
        for (session_id, message_count, last_activity) in groups {
            let first_user: Option<String> = title_query
                .query_row(params![tenant_id, session_id], |row| row.get(0))
                .optional()?;
            let title = match first_user {
                Some(text) => text.chars().take(SESSION_TITLE_MAX).collect(),
                None => FALLBACK_TITLE.to_string(),
            };
            sessions.push(SessionSummary {
                session_id,
                title,
                message_count,
                last_activity: parse_timestamp(&last_activity)?,
            });
        }
        Ok(sessions)
    }

    pub fn session_messages(
        &self,
        tenant_id: i64,
        session_id: &str,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let conn = self.conn.lock();
        let mut statement = conn.prepare(
            "SELECT id, tenant_id, agent_ref, session_id, sender, text, tokens_used, timestamp
             FROM chat_messages WHERE tenant_id = ?1 AND session_id = ?2
             ORDER BY timestamp ASC, id ASC",
        )?;
        let rows = statement
            .query_map(params![tenant_id, session_id], message_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_message).collect()
    }

    #[cfg(test)]
    pub fn set_consumed(&self, tenant_id: i64, consumed: i64) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "UPDATE tenants SET tokens_consumed = ?2 WHERE id = ?1",
            params![tenant_id, consumed],
        )?;
        Ok(())
    }

    #[cfg(test)]
    pub fn set_last_reset(&self, tenant_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "UPDATE tenants SET last_reset = ?2 WHERE id = ?1",
            params![tenant_id, at.to_rfc3339()],
        )?;
        Ok(())
    }
}

type DocumentRow = (i64, i64, String, String, String, String, String);
type MessageRow = (i64, i64, String, String, String, String, i64, String);
type AgentRow = (i64, Option<i64>, String, String, String, bool);

fn document_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DocumentRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn agent_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn into_document(raw: DocumentRow) -> Result<KnowledgeDocument, StoreError> {
    Ok(KnowledgeDocument {
        id: raw.0,
        tenant_id: raw.1,
        file_name: raw.2,
        file_type: raw.3,
        vector_id_prefix: raw.4,
        tag: raw.5,
        created_at: parse_timestamp(&raw.6)?,
    })
}

fn into_message(raw: MessageRow) -> Result<ChatMessage, StoreError> {
    let sender = Sender::parse(&raw.4)
        .ok_or_else(|| StoreError::Decode(format!("unknown sender value: {}", raw.4)))?;
    Ok(ChatMessage {
        id: raw.0,
        tenant_id: raw.1,
        agent_ref: raw.2,
        session_id: raw.3,
        sender,
        text: raw.5,
        tokens_used: raw.6,
        timestamp: parse_timestamp(&raw.7)?,
    })
}

fn into_agent(raw: AgentRow) -> Agent {
    Agent {
        id: raw.0,
        owner_tenant: raw.1,
        name: raw.2,
        specialty: raw.3,
        system_instruction: raw.4,
        is_public: raw.5,
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| StoreError::Decode(format!("bad timestamp {value}: {error}")))
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn agent_by_id(&self, id: i64) -> Result<Option<Agent>, StoreError> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                "SELECT id, owner_tenant, name, specialty, system_instruction, is_public
                 FROM agents WHERE id = ?1",
                params![id],
                agent_row,
            )
            .optional()?;
        Ok(raw.map(into_agent))
    }

    async fn agent_by_name(&self, name: &str, tenant_id: i64) -> Result<Option<Agent>, StoreError> {
        // a tenant-owned agent shadows a system agent of the same name
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                "SELECT id, owner_tenant, name, specialty, system_instruction, is_public
                 FROM agents WHERE name = ?1 AND (owner_tenant IS NULL OR owner_tenant = ?2)
                 ORDER BY owner_tenant IS NULL LIMIT 1",
                params![name, tenant_id],
                agent_row,
            )
            .optional()?;
        Ok(raw.map(into_agent))
    }

    async fn insert_document(&self, document: &NewDocument) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO knowledge_documents (tenant_id, file_name, file_type, vector_id_prefix, tag, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                document.tenant_id,
                document.file_name,
                document.file_type,
                document.vector_id_prefix,
                document.tag,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn document_by_id(&self, id: i64) -> Result<Option<KnowledgeDocument>, StoreError> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                "SELECT id, tenant_id, file_name, file_type, vector_id_prefix, tag, created_at
                 FROM knowledge_documents WHERE id = ?1",
                params![id],
                document_row,
            )
            .optional()?;
        raw.map(into_document).transpose()
    }

    async fn delete_document(&self, id: i64) -> Result<(), StoreError> {
        self.conn
            .lock()
            .execute("DELETE FROM knowledge_documents WHERE id = ?1", params![id])?;
        Ok(())
    }

    async fn documents_by_tag(&self, tag: &str) -> Result<Vec<KnowledgeDocument>, StoreError> {
        let conn = self.conn.lock();
        let mut statement = conn.prepare(
            "SELECT id, tenant_id, file_name, file_type, vector_id_prefix, tag, created_at
             FROM knowledge_documents WHERE tag = ?1 ORDER BY created_at DESC",
        )?;
        let rows = statement
            .query_map(params![tag], document_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(into_document).collect()
    }

    async fn quota_state(&self, tenant_id: i64) -> Result<Option<QuotaState>, StoreError> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                "SELECT tokens_consumed, last_reset, plan FROM tenants WHERE id = ?1",
                params![tenant_id],
                |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
                },
            )
            .optional()?;
        match raw {
            Some((consumed, last_reset, plan)) => Ok(Some(QuotaState {
                consumed,
                last_reset: parse_timestamp(&last_reset)?,
                plan: Plan::parse(&plan),
            })),
            None => Ok(None),
        }
    }

    async fn reset_quota(&self, tenant_id: i64, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.conn.lock().execute(
            "UPDATE tenants SET tokens_consumed = 0, last_reset = ?2 WHERE id = ?1",
            params![tenant_id, at.to_rfc3339()],
        )?;
        Ok(())
    }

    async fn charge_tokens(
        &self,
        tenant_id: i64,
        tokens: i64,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        // additive update, no read-modify-write
        self.conn.lock().execute(
            "UPDATE tenants SET tokens_consumed = tokens_consumed + ?2, last_activity = ?3
             WHERE id = ?1",
            params![tenant_id, tokens, at.to_rfc3339()],
        )?;
        Ok(())
    }

    async fn append_message(&self, message: &NewMessage) -> Result<i64, StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO chat_messages (tenant_id, agent_ref, session_id, sender, text, tokens_used, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.tenant_id,
                message.agent_ref,
                message.session_id,
                message.sender.as_str(),
                message.text,
                message.tokens_used,
                message.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn recent_history(
        &self,
        tenant_id: i64,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let conn = self.conn.lock();
        let mut statement = conn.prepare(
            "SELECT id, tenant_id, agent_ref, session_id, sender, text, tokens_used, timestamp
             FROM chat_messages WHERE tenant_id = ?1 AND session_id = ?2
             ORDER BY timestamp DESC, id DESC LIMIT ?3",
        )?;
        let rows = statement
            .query_map(params![tenant_id, session_id, limit as i64], message_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let mut messages = rows
            .into_iter()
            .map(into_message)
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn message(session: &str, sender: Sender, text: &str, at: DateTime<Utc>) -> NewMessage {
        NewMessage {
            tenant_id: 7,
            agent_ref: "Advogado Civil".to_string(),
            session_id: session.to_string(),
            sender,
            text: text.to_string(),
            tokens_used: 0,
            timestamp: at,
        }
    }

    #[tokio::test]
    async fn tenant_quota_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.ensure_tenant(7, Plan::Pro).unwrap();

        store.charge_tokens(7, 150, Utc::now()).await.unwrap();
        store.charge_tokens(7, 50, Utc::now()).await.unwrap();

        let quota = store.quota_state(7).await.unwrap().unwrap();
        assert_eq!(quota.consumed, 200);
        assert_eq!(quota.plan, Plan::Pro);

        let reset_at = Utc::now();
        store.reset_quota(7, reset_at).await.unwrap();
        let quota = store.quota_state(7).await.unwrap().unwrap();
        assert_eq!(quota.consumed, 0);
        assert_eq!(quota.last_reset.timestamp(), reset_at.timestamp());
    }

    #[tokio::test]
    async fn ensure_tenant_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.ensure_tenant(7, Plan::Free).unwrap();
        store.charge_tokens(7, 100, Utc::now()).await.unwrap();

        store.ensure_tenant(7, Plan::Pro).unwrap();
        let quota = store.quota_state(7).await.unwrap().unwrap();
        assert_eq!(quota.consumed, 100, "existing row untouched");
        assert_eq!(quota.plan, Plan::Free);
    }

    #[tokio::test]
    async fn missing_tenant_yields_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.quota_state(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn tenant_owned_agent_shadows_system_agent() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_agent(None, "Advogado Civil", "direito civil", "persona sistema", true)
            .unwrap();
        let own = store
            .insert_agent(Some(7), "Advogado Civil", "direito civil", "persona própria", false)
            .unwrap();

        let found = store.agent_by_name("Advogado Civil", 7).await.unwrap().unwrap();
        assert_eq!(found.id, own);

        let other = store.agent_by_name("Advogado Civil", 8).await.unwrap().unwrap();
        assert!(other.is_system(), "other tenants only see the system agent");
    }

    #[tokio::test]
    async fn foreign_private_agent_is_invisible() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .insert_agent(Some(7), "Contador", "fiscal", "persona", false)
            .unwrap();
        assert!(store.agent_by_name("Contador", 8).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn recent_history_is_bounded_and_chronological() {
        let store = SqliteStore::open_in_memory().unwrap();
        let base = Utc::now();
        for index in 0..15 {
            let sender = if index % 2 == 0 { Sender::User } else { Sender::Assistant };
            let at = base + Duration::seconds(index);
            store
                .append_message(&message("s1", sender, &format!("m{index}"), at))
                .await
                .unwrap();
        }

        let history = store.recent_history(7, "s1", 10).await.unwrap();
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].text, "m5");
        assert_eq!(history[9].text, "m14");
    }

    #[tokio::test]
    async fn sessions_are_titled_by_first_user_message() {
        let store = SqliteStore::open_in_memory().unwrap();
        let base = Utc::now();
        let long = "a".repeat(80);
        store
            .append_message(&message("s1", Sender::User, &long, base))
            .await
            .unwrap();
        store
            .append_message(&message("s1", Sender::Assistant, "resposta", base + Duration::seconds(1)))
            .await
            .unwrap();
        store
            .append_message(&message("s2", Sender::Assistant, "saudação", base + Duration::seconds(2)))
            .await
            .unwrap();

        let sessions = store.list_sessions(7).unwrap();
        assert_eq!(sessions.len(), 2);
        // newest activity first
        assert_eq!(sessions[0].session_id, "s2");
        assert_eq!(sessions[0].title, FALLBACK_TITLE);
        assert_eq!(sessions[1].session_id, "s1");
        assert_eq!(sessions[1].title.chars().count(), SESSION_TITLE_MAX);
        assert_eq!(sessions[1].message_count, 2);
    }

    #[tokio::test]
    async fn session_messages_replays_the_full_log_in_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        let base = Utc::now();
        store
            .append_message(&message("s1", Sender::User, "pergunta", base))
            .await
            .unwrap();
        store
            .append_message(&message("s1", Sender::Assistant, "resposta", base + Duration::seconds(1)))
            .await
            .unwrap();
        store
            .append_message(&message("s2", Sender::User, "outra sessão", base + Duration::seconds(2)))
            .await
            .unwrap();

        let log = store.session_messages(7, "s1").unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].text, "pergunta");
        assert_eq!(log[0].sender, Sender::User);
        assert_eq!(log[1].text, "resposta");

        assert!(store.session_messages(8, "s1").unwrap().is_empty());
    }

    #[tokio::test]
    async fn document_lifecycle_round_trip() {
        let store = SqliteStore::open_in_memory().unwrap();
        let id = store
            .insert_document(&NewDocument {
                tenant_id: 7,
                file_name: "contrato.pdf".to_string(),
                file_type: "pdf".to_string(),
                vector_id_prefix: "abc123".to_string(),
                tag: "Advogado Civil".to_string(),
            })
            .await
            .unwrap();

        let found = store.document_by_id(id).await.unwrap().unwrap();
        assert_eq!(found.file_name, "contrato.pdf");

        let tagged = store.documents_by_tag("Advogado Civil").await.unwrap();
        assert_eq!(tagged.len(), 1);

        store.delete_document(id).await.unwrap();
        assert!(store.document_by_id(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_sender_surfaces_a_decode_error() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .conn
            .lock()
            .execute(
                "INSERT INTO chat_messages (tenant_id, agent_ref, session_id, sender, text, tokens_used, timestamp)
                 VALUES (7, 'a', 's1', 'robot', 'x', 0, ?1)",
                params![Utc::now().to_rfc3339()],
            )
            .unwrap();

        let result = store.recent_history(7, "s1", 10).await;
        assert!(matches!(result, Err(StoreError::Decode(_))));
    }
}

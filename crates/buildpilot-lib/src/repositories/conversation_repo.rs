// Conversation Repository
// Handles persisted chat history and the cached history summary per workspace

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::models::{ConversationSummary, Message, MessageRole, MessageStatus};
use crate::utils::database::Database;

pub struct ConversationRepository {
    db: Database,
}

impl ConversationRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Messages of a workspace in conversation order
    pub fn get_messages(&self, workspace_path: &str) -> Result<Vec<Message>, String> {
        self.db.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, role, content, status, created_at
                    FROM conversation_messages
                    WHERE workspace_path = ?1
                    ORDER BY position ASC
                    "#,
                )
                .map_err(|e| format!("Failed to prepare statement: {}", e))?;

            let rows = stmt
                .query_map(params![workspace_path], |row| {
                    Ok(MessageRow {
                        id: row.get(0)?,
                        role: row.get(1)?,
                        content: row.get(2)?,
                        status: row.get(3)?,
                        created_at: row.get(4)?,
                    })
                })
                .map_err(|e| format!("Failed to query messages: {}", e))?;

            let mut messages = Vec::new();
            for row in rows {
                let row = row.map_err(|e| format!("Failed to read row: {}", e))?;
                messages.push(row.into_message()?);
            }
            Ok(messages)
        })
    }

    /// Replace the stored history of a workspace
    pub fn replace_messages(&self, workspace_path: &str, messages: &[Message]) -> Result<(), String> {
        self.db.with_transaction(|conn| {
            conn.execute(
                "DELETE FROM conversation_messages WHERE workspace_path = ?1",
                params![workspace_path],
            )
            .map_err(|e| format!("Failed to clear messages: {}", e))?;

            let mut stmt = conn
                .prepare(
                    r#"
                    INSERT INTO conversation_messages (id, workspace_path, position, role, content, status, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                    "#,
                )
                .map_err(|e| format!("Failed to prepare statement: {}", e))?;

            for (position, message) in messages.iter().enumerate() {
                stmt.execute(params![
                    message.id,
                    workspace_path,
                    position as i64,
                    message.role.to_string(),
                    message.content,
                    message.status.to_string(),
                    message.created_at.to_rfc3339(),
                ])
                .map_err(|e| format!("Failed to save message: {}", e))?;
            }
            Ok(())
        })
    }

    // =========================================================================
    // Summary
    // =========================================================================

    pub fn get_summary(&self, workspace_path: &str) -> Result<Option<ConversationSummary>, String> {
        self.db.with_connection(|conn| {
            let result = conn.query_row(
                r#"
                SELECT summary, covered_start, covered_end, created_at
                FROM conversation_summaries
                WHERE workspace_path = ?1
                "#,
                params![workspace_path],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            );

            match result {
                Ok((summary, start, end, created_at)) => Ok(Some(ConversationSummary {
                    summary,
                    covered_start: to_index(start)?,
                    covered_end: to_index(end)?,
                    created_at: parse_timestamp(&created_at)?,
                })),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(format!("Failed to get summary: {}", e)),
            }
        })
    }

    pub fn save_summary(&self, workspace_path: &str, summary: &ConversationSummary) -> Result<(), String> {
        self.db.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO conversation_summaries (workspace_path, summary, covered_start, covered_end, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(workspace_path) DO UPDATE SET
                    summary = excluded.summary,
                    covered_start = excluded.covered_start,
                    covered_end = excluded.covered_end,
                    created_at = excluded.created_at
                "#,
                params![
                    workspace_path,
                    summary.summary,
                    summary.covered_start as i64,
                    summary.covered_end as i64,
                    summary.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| format!("Failed to save summary: {}", e))?;
            Ok(())
        })
    }

    pub fn delete_summary(&self, workspace_path: &str) -> Result<(), String> {
        self.db.with_connection(|conn| {
            conn.execute(
                "DELETE FROM conversation_summaries WHERE workspace_path = ?1",
                params![workspace_path],
            )
            .map_err(|e| format!("Failed to delete summary: {}", e))?;
            Ok(())
        })
    }
}

struct MessageRow {
    id: String,
    role: String,
    content: String,
    status: String,
    created_at: String,
}

impl MessageRow {
    fn into_message(self) -> Result<Message, String> {
        Ok(Message {
            id: self.id,
            role: self.role.parse::<MessageRole>()?,
            content: self.content,
            status: self.status.parse::<MessageStatus>()?,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("Invalid timestamp {:?}: {}", value, e))
}

fn to_index(value: i64) -> Result<usize, String> {
    usize::try_from(value).map_err(|_| format!("Invalid message index: {}", value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo() -> ConversationRepository {
        ConversationRepository::new(Database::in_memory().unwrap())
    }

    #[test]
    fn test_messages_keep_order_and_fields() {
        let repo = repo();
        let mut truncated = Message::assistant("partial");
        truncated.status = MessageStatus::Truncated;
        let messages = vec![Message::user("hi"), truncated, Message::system("note")];

        repo.replace_messages("/w", &messages).unwrap();
        let loaded = repo.get_messages("/w").unwrap();

        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].content, "hi");
        assert_eq!(loaded[1].status, MessageStatus::Truncated);
        assert_eq!(loaded[2].role, MessageRole::System);
        assert_eq!(loaded[0].id, messages[0].id);
    }

    #[test]
    fn test_replace_overwrites_previous_history() {
        let repo = repo();
        repo.replace_messages("/w", &[Message::user("one"), Message::assistant("two")])
            .unwrap();
        repo.replace_messages("/w", &[Message::user("three")]).unwrap();
        repo.replace_messages("/other", &[Message::user("elsewhere")]).unwrap();

        let loaded = repo.get_messages("/w").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].content, "three");
    }

    #[test]
    fn test_summary_roundtrip_and_delete() {
        let repo = repo();
        assert_eq!(repo.get_summary("/w").unwrap(), None);

        let summary = ConversationSummary::new("Set up Vite".into(), 2, 21);
        repo.save_summary("/w", &summary).unwrap();
        let loaded = repo.get_summary("/w").unwrap().unwrap();
        assert_eq!(loaded.summary, "Set up Vite");
        assert_eq!((loaded.covered_start, loaded.covered_end), (2, 21));

        let newer = ConversationSummary::new("Added routing".into(), 2, 31);
        repo.save_summary("/w", &newer).unwrap();
        assert_eq!(repo.get_summary("/w").unwrap().unwrap().covered_end, 31);

        repo.delete_summary("/w").unwrap();
        assert_eq!(repo.get_summary("/w").unwrap(), None);
    }
}

// Project State Repository
// Stores one ProjectState per workspace as a JSON document

use chrono::Utc;
use rusqlite::params;

use crate::models::ProjectState;
use crate::utils::database::Database;

pub struct ProjectStateRepository {
    db: Database,
}

impl ProjectStateRepository {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn get(&self, workspace_path: &str) -> Result<Option<ProjectState>, String> {
        self.db.with_connection(|conn| {
            let result = conn.query_row(
                "SELECT state FROM project_states WHERE workspace_path = ?1",
                params![workspace_path],
                |row| row.get::<_, String>(0),
            );

            match result {
                Ok(json) => serde_json::from_str(&json)
                    .map(Some)
                    .map_err(|e| format!("Failed to parse project state: {}", e)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(format!("Failed to get project state: {}", e)),
            }
        })
    }

    /// Insert or replace the state for a workspace
    pub fn save(&self, workspace_path: &str, state: &ProjectState) -> Result<(), String> {
        let json = serde_json::to_string(state)
            .map_err(|e| format!("Failed to serialize project state: {}", e))?;

        self.db.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO project_states (workspace_path, state, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(workspace_path) DO UPDATE SET
                    state = excluded.state,
                    updated_at = excluded.updated_at
                "#,
                params![workspace_path, json, Utc::now().to_rfc3339()],
            )
            .map_err(|e| format!("Failed to save project state: {}", e))?;
            Ok(())
        })
    }

    /// Returns true if a row was removed
    pub fn delete(&self, workspace_path: &str) -> Result<bool, String> {
        self.db.with_connection(|conn| {
            let rows = conn
                .execute(
                    "DELETE FROM project_states WHERE workspace_path = ?1",
                    params![workspace_path],
                )
                .map_err(|e| format!("Failed to delete project state: {}", e))?;
            Ok(rows > 0)
        })
    }
}

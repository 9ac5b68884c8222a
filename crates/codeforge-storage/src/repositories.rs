// Repository layer for database operations

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::*;

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create database connection from URL
    pub async fn from_url(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded migrations
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // ============================================
    // Conversations (two tables, same shape)
    // ============================================

    pub async fn upsert_conversation(
        &self,
        table_is_full: bool,
        id: &str,
        messages: &str,
    ) -> Result<()> {
        let query = if table_is_full {
            r#"
            INSERT INTO full_conversations (id, messages)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET messages = EXCLUDED.messages
            "#
        } else {
            r#"
            INSERT INTO compact_conversations (id, messages)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET messages = EXCLUDED.messages
            "#
        };
        sqlx::query(query)
            .bind(id)
            .bind(messages)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_conversation(
        &self,
        table_is_full: bool,
        id: &str,
    ) -> Result<Option<ConversationRow>> {
        let query = if table_is_full {
            "SELECT id, messages FROM full_conversations WHERE id = $1"
        } else {
            "SELECT id, messages FROM compact_conversations WHERE id = $1"
        };
        let row = sqlx::query_as::<_, ConversationRow>(query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    // ============================================
    // Session state
    // ============================================

    pub async fn upsert_session_state(
        &self,
        session_id: Uuid,
        project_type: &str,
        state: &serde_json::Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO session_states (session_id, project_type, state, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (session_id)
            DO UPDATE SET state = EXCLUDED.state, updated_at = NOW()
            "#,
        )
        .bind(session_id)
        .bind(project_type)
        .bind(state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_session_state(&self, session_id: Uuid) -> Result<Option<SessionStateRow>> {
        let row = sqlx::query_as::<_, SessionStateRow>(
            r#"
            SELECT session_id, project_type, state, updated_at
            FROM session_states
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ============================================
    // VCS objects
    // ============================================

    pub async fn insert_git_objects(
        &self,
        session_id: Uuid,
        objects: &[(String, String, Vec<u8>)],
    ) -> Result<()> {
        // Objects are content-addressed: a conflict means the bytes are
        // already there.
        for (object_id, kind, data) in objects {
            sqlx::query(
                r#"
                INSERT INTO git_objects (session_id, object_id, kind, data)
                VALUES ($1, $2, $3, $4)
                ON CONFLICT (session_id, object_id) DO NOTHING
                "#,
            )
            .bind(session_id)
            .bind(object_id)
            .bind(kind)
            .bind(data)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn list_git_objects(&self, session_id: Uuid) -> Result<Vec<GitObjectRow>> {
        let rows = sqlx::query_as::<_, GitObjectRow>(
            r#"
            SELECT session_id, object_id, kind, data, created_at
            FROM git_objects
            WHERE session_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn set_git_head(&self, session_id: Uuid, head: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO git_heads (session_id, head, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (session_id)
            DO UPDATE SET head = EXCLUDED.head, updated_at = NOW()
            "#,
        )
        .bind(session_id)
        .bind(head)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_git_head(&self, session_id: Uuid) -> Result<Option<GitHeadRow>> {
        let row = sqlx::query_as::<_, GitHeadRow>(
            "SELECT session_id, head, updated_at FROM git_heads WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ============================================
    // Session index
    // ============================================

    pub async fn create_session_index(&self, input: CreateSessionIndex) -> Result<SessionIndexRow> {
        let row = sqlx::query_as::<_, SessionIndexRow>(
            r#"
            INSERT INTO session_index (session_id, project_name, project_type, query)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_id) DO UPDATE SET project_name = EXCLUDED.project_name
            RETURNING session_id, project_name, project_type, query, repository_url, created_at
            "#,
        )
        .bind(input.session_id)
        .bind(&input.project_name)
        .bind(&input.project_type)
        .bind(&input.query)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_session_index(&self, session_id: Uuid) -> Result<Option<SessionIndexRow>> {
        let row = sqlx::query_as::<_, SessionIndexRow>(
            r#"
            SELECT session_id, project_name, project_type, query, repository_url, created_at
            FROM session_index
            WHERE session_id = $1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn set_repository_url(&self, session_id: Uuid, url: &str) -> Result<()> {
        sqlx::query("UPDATE session_index SET repository_url = $2 WHERE session_id = $1")
            .bind(session_id)
            .bind(url)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

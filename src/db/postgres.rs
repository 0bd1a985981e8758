use anyhow::Context;
use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

use super::{
    ActiveSession, DbResult, NewSession, NewTodo, NewUser, NewVerification, Page, Session, Store,
    Todo, TodoFilter, TodoPatch, User, Verification,
};
use crate::config::DatabaseConfig;

const USER_COLUMNS: &str =
    "id, email, name, password_hash, email_verified, created_at, updated_at";
const TODO_COLUMNS: &str = "id, user_id, title, description, completed, created_at, updated_at";

/// `Store` backed by a PostgreSQL pool. Every statement binds its
/// parameters; no SQL text is assembled from request data.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(cfg: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(cfg.acquire_timeout())
            .connect(&cfg.url)
            .await
            .context("connect to database")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Applies the forward-only migrations embedded from `./migrations`.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("run migrations")?;
        info!("migrations applied");
        Ok(())
    }
}

async fn insert_todo_tx(
    tx: &mut Transaction<'_, Postgres>,
    owner: Uuid,
    todo: &NewTodo,
) -> DbResult<Todo> {
    let row = sqlx::query_as::<_, Todo>(&format!(
        r#"
        INSERT INTO todos (user_id, title, description, completed)
        VALUES ($1, $2, $3, $4)
        RETURNING {TODO_COLUMNS}
        "#
    ))
    .bind(owner)
    .bind(&todo.title)
    .bind(&todo.description)
    .bind(todo.completed)
    .fetch_one(&mut **tx)
    .await?;
    Ok(row)
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_user_with_verification(
        &self,
        user: NewUser,
        verification: NewVerification,
    ) -> DbResult<(User, Verification)> {
        // Dropping `tx` on an early return rolls back.
        let mut tx = self.pool.begin().await?;

        let user = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (email, name, password_hash)
            VALUES ($1, $2, $3)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.password_hash)
        .fetch_one(&mut *tx)
        .await?;

        let verification = sqlx::query_as::<_, Verification>(
            r#"
            INSERT INTO verifications (user_id, identifier, value, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, identifier, value, expires_at, created_at
            "#,
        )
        .bind(user.id)
        .bind(&verification.identifier)
        .bind(&verification.value)
        .bind(verification.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((user, verification))
    }

    async fn find_user(&self, id: Uuid) -> DbResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> DbResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn consume_verification(
        &self,
        identifier: &str,
        value: &str,
        now: OffsetDateTime,
    ) -> DbResult<Option<Uuid>> {
        let mut tx = self.pool.begin().await?;

        let consumed = sqlx::query_as::<_, (Uuid, OffsetDateTime)>(
            r#"
            DELETE FROM verifications
             WHERE identifier = $1 AND value = $2
            RETURNING user_id, expires_at
            "#,
        )
        .bind(identifier)
        .bind(value)
        .fetch_optional(&mut *tx)
        .await?;

        let user_id = match consumed {
            Some((user_id, expires_at)) if expires_at > now => {
                sqlx::query(
                    "UPDATE users SET email_verified = TRUE, updated_at = now() WHERE id = $1",
                )
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
                Some(user_id)
            }
            Some((user_id, _)) => {
                debug!(%user_id, "expired verification discarded");
                None
            }
            None => None,
        };

        tx.commit().await?;
        Ok(user_id)
    }

    async fn replace_verification(
        &self,
        user_id: Uuid,
        verification: NewVerification,
    ) -> DbResult<Verification> {
        let mut tx = self.pool.begin().await?;

        let dropped = sqlx::query("DELETE FROM verifications WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let row = sqlx::query_as::<_, Verification>(
            r#"
            INSERT INTO verifications (user_id, identifier, value, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, identifier, value, expires_at, created_at
            "#,
        )
        .bind(user_id)
        .bind(&verification.identifier)
        .bind(&verification.value)
        .bind(verification.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(%user_id, dropped, "verification replaced");
        Ok(row)
    }

    async fn insert_session(&self, session: NewSession) -> DbResult<Session> {
        let row = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (user_id, token, expires_at, user_agent, ip_address)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, token, expires_at, user_agent, ip_address, created_at, updated_at
            "#,
        )
        .bind(session.user_id)
        .bind(&session.token)
        .bind(session.expires_at)
        .bind(&session.user_agent)
        .bind(&session.ip_address)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_session(&self, token: &str) -> DbResult<Option<ActiveSession>> {
        let row = sqlx::query_as::<_, ActiveSession>(
            r#"
            SELECT s.id, s.user_id, s.expires_at, u.email_verified
              FROM sessions s
              JOIN users u ON u.id = s.user_id
             WHERE s.token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn extend_session(&self, id: Uuid, expires_at: OffsetDateTime) -> DbResult<u64> {
        let res = sqlx::query(
            "UPDATE sessions SET expires_at = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    async fn delete_session(&self, id: Uuid) -> DbResult<u64> {
        let res = sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }

    async fn purge_expired(&self, now: OffsetDateTime, limit: i64) -> DbResult<u64> {
        let sessions = sqlx::query(
            r#"
            DELETE FROM sessions
             WHERE id IN (SELECT id FROM sessions WHERE expires_at <= $1 LIMIT $2)
            "#,
        )
        .bind(now)
        .bind(limit)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let verifications = sqlx::query(
            r#"
            DELETE FROM verifications
             WHERE id IN (SELECT id FROM verifications WHERE expires_at <= $1 LIMIT $2)
            "#,
        )
        .bind(now)
        .bind(limit)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(sessions + verifications)
    }

    async fn select_todos(&self, filter: &TodoFilter, page: Page) -> DbResult<Vec<Todo>> {
        let rows = sqlx::query_as::<_, Todo>(&format!(
            r#"
            SELECT {TODO_COLUMNS}
              FROM todos
             WHERE user_id = $1
               AND ($2::uuid IS NULL OR id = $2)
               AND ($3::bool IS NULL OR completed = $3)
             ORDER BY created_at DESC, id DESC
             LIMIT $4 OFFSET $5
            "#
        ))
        .bind(filter.owner())
        .bind(filter.id())
        .bind(filter.completed())
        .bind(page.limit)
        .bind(page.offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn insert_todo(&self, owner: Uuid, todo: NewTodo) -> DbResult<Todo> {
        let mut tx = self.pool.begin().await?;
        let row = insert_todo_tx(&mut tx, owner, &todo).await?;
        tx.commit().await?;
        Ok(row)
    }

    async fn insert_todos(&self, owner: Uuid, todos: Vec<NewTodo>) -> DbResult<Vec<Todo>> {
        let mut tx = self.pool.begin().await?;
        let mut rows = Vec::with_capacity(todos.len());
        for todo in &todos {
            rows.push(insert_todo_tx(&mut tx, owner, todo).await?);
        }
        tx.commit().await?;
        Ok(rows)
    }

    async fn update_todos(&self, filter: &TodoFilter, patch: TodoPatch) -> DbResult<u64> {
        let res = sqlx::query(
            r#"
            UPDATE todos
               SET title = COALESCE($4, title),
                   description = CASE WHEN $5 THEN $6 ELSE description END,
                   completed = COALESCE($7, completed),
                   updated_at = now()
             WHERE user_id = $1
               AND ($2::uuid IS NULL OR id = $2)
               AND ($3::bool IS NULL OR completed = $3)
            "#,
        )
        .bind(filter.owner())
        .bind(filter.id())
        .bind(filter.completed())
        .bind(&patch.title)
        .bind(patch.description.is_some())
        .bind(patch.description.flatten())
        .bind(patch.completed)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }

    async fn delete_todos(&self, filter: &TodoFilter) -> DbResult<u64> {
        let res = sqlx::query(
            r#"
            DELETE FROM todos
             WHERE user_id = $1
               AND ($2::uuid IS NULL OR id = $2)
               AND ($3::bool IS NULL OR completed = $3)
            "#,
        )
        .bind(filter.owner())
        .bind(filter.id())
        .bind(filter.completed())
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected())
    }
}

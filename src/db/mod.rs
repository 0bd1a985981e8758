//! Typed data access. Handlers only ever see the [`Store`] trait; the
//! Postgres implementation and the in-memory one share its semantics.

pub mod memory;
pub mod models;
pub mod postgres;
pub mod sweep;

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use models::{
    ActiveSession, NewSession, NewTodo, NewUser, NewVerification, Page, Session, Todo, TodoFilter,
    TodoPatch, User, Verification,
};
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum DbError {
    /// Uniqueness, foreign key, not-null or check constraint rejected a write.
    #[error("constraint violated: {constraint}")]
    ConstraintViolation { constraint: String },
    /// The store could not be reached; distinct from "no rows".
    #[error("data store unavailable: {0}")]
    DataUnavailable(String),
    #[error(transparent)]
    Query(sqlx::Error),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db) => {
                let is_constraint = matches!(
                    db.code().as_deref(),
                    Some("23505" | "23503" | "23502" | "23514")
                );
                if is_constraint {
                    DbError::ConstraintViolation {
                        constraint: db.constraint().unwrap_or("unknown").to_string(),
                    }
                } else {
                    DbError::Query(err)
                }
            }
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => DbError::DataUnavailable(err.to_string()),
            other => DbError::Query(other),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

#[async_trait]
pub trait Store: Send + Sync {
    /// Round-trips to the store without touching any table.
    async fn ping(&self) -> DbResult<()>;

    /// Creates the user and its first verification record atomically.
    async fn insert_user_with_verification(
        &self,
        user: NewUser,
        verification: NewVerification,
    ) -> DbResult<(User, Verification)>;
    async fn find_user(&self, id: Uuid) -> DbResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> DbResult<Option<User>>;

    /// Deletes the matching verification record and, when it had not expired,
    /// marks its user verified. Returns the verified user id. A record can
    /// be consumed once; a second call finds nothing.
    async fn consume_verification(
        &self,
        identifier: &str,
        value: &str,
        now: OffsetDateTime,
    ) -> DbResult<Option<Uuid>>;

    /// Drops every outstanding verification of the user and stores a fresh
    /// one, in one transaction.
    async fn replace_verification(
        &self,
        user_id: Uuid,
        verification: NewVerification,
    ) -> DbResult<Verification>;

    async fn insert_session(&self, session: NewSession) -> DbResult<Session>;
    async fn find_session(&self, token: &str) -> DbResult<Option<ActiveSession>>;
    async fn extend_session(&self, id: Uuid, expires_at: OffsetDateTime) -> DbResult<u64>;
    async fn delete_session(&self, id: Uuid) -> DbResult<u64>;

    /// Removes at most `limit` expired rows from each of sessions and
    /// verifications. Returns the total removed.
    async fn purge_expired(&self, now: OffsetDateTime, limit: i64) -> DbResult<u64>;

    /// Newest first; an empty result is not an error.
    async fn select_todos(&self, filter: &TodoFilter, page: Page) -> DbResult<Vec<Todo>>;
    async fn insert_todo(&self, owner: Uuid, todo: NewTodo) -> DbResult<Todo>;
    /// All rows or none.
    async fn insert_todos(&self, owner: Uuid, todos: Vec<NewTodo>) -> DbResult<Vec<Todo>>;
    async fn update_todos(&self, filter: &TodoFilter, patch: TodoPatch) -> DbResult<u64>;
    async fn delete_todos(&self, filter: &TodoFilter) -> DbResult<u64>;
}

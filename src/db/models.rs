use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 hash, not exposed in JSON
    pub email_verified: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub password_hash: String,
}

/// Single-use token proving control of an identifier (an email address).
#[derive(Debug, Clone, FromRow)]
pub struct Verification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub identifier: String,
    pub value: String,
    pub expires_at: OffsetDateTime,
    pub created_at: OffsetDateTime,
}

/// The owning user is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewVerification {
    pub identifier: String,
    pub value: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, FromRow)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: OffsetDateTime,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: OffsetDateTime,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

/// A session row joined with the owner's verification state.
#[derive(Debug, Clone, FromRow)]
pub struct ActiveSession {
    pub id: Uuid,
    pub user_id: Uuid,
    pub expires_at: OffsetDateTime,
    pub email_verified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct Todo {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub user_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewTodo {
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
}

/// Fields left `None` keep their value. `description: Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct TodoPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub completed: Option<bool>,
}

/// Selects todos of exactly one owner. There is no way to build a filter
/// that spans users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TodoFilter {
    owner: Uuid,
    id: Option<Uuid>,
    completed: Option<bool>,
}

impl TodoFilter {
    pub fn owned_by(owner: Uuid) -> Self {
        Self {
            owner,
            id: None,
            completed: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_completed(mut self, completed: Option<bool>) -> Self {
        self.completed = completed;
        self
    }

    pub fn owner(&self) -> Uuid {
        self.owner
    }

    pub fn id(&self) -> Option<Uuid> {
        self.id
    }

    pub fn completed(&self) -> Option<bool> {
        self.completed
    }

    pub fn matches(&self, todo: &Todo) -> bool {
        todo.user_id == self.owner
            && self.id.map_or(true, |id| todo.id == id)
            && self.completed.map_or(true, |c| todo.completed == c)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub const ONE: Page = Page { limit: 1, offset: 0 };
}

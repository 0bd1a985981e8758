use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::db::{NewTodo, Page, Todo, TodoPatch};
use crate::schema::{registry, Schema, Validated};

#[derive(Debug, Deserialize)]
pub struct CreateTodoRequest {
    pub title: String,
    pub description: Option<String>,
    pub completed: bool,
}

impl Validated for CreateTodoRequest {
    fn schema() -> &'static Schema {
        &registry::CREATE_TODO
    }
}

impl From<CreateTodoRequest> for NewTodo {
    fn from(r: CreateTodoRequest) -> Self {
        Self {
            title: r.title,
            description: r.description,
            completed: r.completed,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTodosRequest {
    pub items: Vec<CreateTodoRequest>,
}

impl Validated for CreateTodosRequest {
    fn schema() -> &'static Schema {
        &registry::CREATE_TODOS
    }
}

/// Absent stays `None`; an explicit `null` becomes `Some(None)`.
fn present<'de, D, T>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Some)
}

#[derive(Debug, Deserialize)]
pub struct UpdateTodoRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub description: Option<Option<String>>,
    pub completed: Option<bool>,
}

impl Validated for UpdateTodoRequest {
    fn schema() -> &'static Schema {
        &registry::UPDATE_TODO
    }
}

impl From<UpdateTodoRequest> for TodoPatch {
    fn from(r: UpdateTodoRequest) -> Self {
        Self {
            title: r.title,
            description: r.description,
            completed: r.completed,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListTodosQuery {
    pub limit: i64,
    pub offset: i64,
    pub completed: Option<bool>,
}

impl Validated for ListTodosQuery {
    fn schema() -> &'static Schema {
        &registry::LIST_TODOS
    }
}

impl ListTodosQuery {
    pub fn page(&self) -> Page {
        Page {
            limit: self.limit,
            offset: self.offset,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TodoIdPath {
    pub id: Uuid,
}

impl Validated for TodoIdPath {
    fn schema() -> &'static Schema {
        &registry::TODO_ID
    }
}

#[derive(Debug, Serialize)]
pub struct TodoList {
    pub items: Vec<Todo>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub deleted: u64,
}

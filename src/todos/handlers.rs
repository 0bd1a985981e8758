use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use super::dto::{
    CreateTodoRequest, CreateTodosRequest, DeletedResponse, ListTodosQuery, TodoIdPath, TodoList,
    UpdateTodoRequest,
};
use crate::{
    auth::AuthUser,
    db::{NewTodo, Page, Todo, TodoFilter},
    error::AppError,
    schema::extract::{Valid, ValidPath, ValidQuery},
    state::AppState,
};

pub fn read_routes() -> Router<AppState> {
    Router::new().route("/todos", get(list_todos)).route(
        "/todos/:id",
        get(get_todo).patch(update_todo).delete(delete_todo),
    )
}

pub fn write_routes() -> Router<AppState> {
    Router::new()
        .route("/todos", post(create_todo))
        .route("/todos/batch", post(create_todos))
}

#[instrument(skip(state, identity, query), fields(user_id = %identity.user_id))]
pub async fn list_todos(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    ValidQuery(query): ValidQuery<ListTodosQuery>,
) -> Result<Json<TodoList>, AppError> {
    let filter = TodoFilter::owned_by(identity.user_id).with_completed(query.completed);
    let items = state.store.select_todos(&filter, query.page()).await?;
    Ok(Json(TodoList {
        items,
        limit: query.limit,
        offset: query.offset,
    }))
}

async fn find_owned(state: &AppState, filter: &TodoFilter) -> Result<Todo, AppError> {
    state
        .store
        .select_todos(filter, Page::ONE)
        .await?
        .into_iter()
        .next()
        .ok_or(AppError::NotFound("todo"))
}

/// Another user's todo is reported exactly like a missing one.
#[instrument(skip(state, identity, path), fields(user_id = %identity.user_id, todo_id = %path.id))]
pub async fn get_todo(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    ValidPath(path): ValidPath<TodoIdPath>,
) -> Result<Json<Todo>, AppError> {
    let filter = TodoFilter::owned_by(identity.user_id).with_id(path.id);
    Ok(Json(find_owned(&state, &filter).await?))
}

#[instrument(skip(state, identity, payload), fields(user_id = %identity.user_id))]
pub async fn create_todo(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Valid(payload): Valid<CreateTodoRequest>,
) -> Result<impl IntoResponse, AppError> {
    let todo = state
        .store
        .insert_todo(identity.user_id, payload.into())
        .await?;
    info!(todo_id = %todo.id, "todo created");

    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, format!("/todos/{}", todo.id))],
        Json(todo),
    ))
}

#[instrument(skip(state, identity, payload), fields(user_id = %identity.user_id, count = payload.items.len()))]
pub async fn create_todos(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Valid(payload): Valid<CreateTodosRequest>,
) -> Result<(StatusCode, Json<Vec<Todo>>), AppError> {
    let items: Vec<NewTodo> = payload.items.into_iter().map(Into::into).collect();
    let todos = state.store.insert_todos(identity.user_id, items).await?;
    info!(created = todos.len(), "todo batch created");
    Ok((StatusCode::CREATED, Json(todos)))
}

#[instrument(skip(state, identity, path, payload), fields(user_id = %identity.user_id, todo_id = %path.id))]
pub async fn update_todo(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    ValidPath(path): ValidPath<TodoIdPath>,
    Valid(payload): Valid<UpdateTodoRequest>,
) -> Result<Json<Todo>, AppError> {
    let filter = TodoFilter::owned_by(identity.user_id).with_id(path.id);
    let affected = state.store.update_todos(&filter, payload.into()).await?;
    if affected == 0 {
        return Err(AppError::NotFound("todo"));
    }
    info!("todo updated");
    Ok(Json(find_owned(&state, &filter).await?))
}

/// Deleting something already gone reports `deleted: 0`, not an error.
#[instrument(skip(state, identity, path), fields(user_id = %identity.user_id, todo_id = %path.id))]
pub async fn delete_todo(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    ValidPath(path): ValidPath<TodoIdPath>,
) -> Result<Json<DeletedResponse>, AppError> {
    let filter = TodoFilter::owned_by(identity.user_id).with_id(path.id);
    let deleted = state.store.delete_todos(&filter).await?;
    info!(deleted, "todo delete");
    Ok(Json(DeletedResponse { deleted }))
}

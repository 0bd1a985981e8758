use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{
    ActiveSession, DbError, DbResult, NewSession, NewTodo, NewUser, NewVerification, Page,
    Session, Store, Todo, TodoFilter, TodoPatch, User, Verification,
};

#[derive(Default, Clone)]
struct Tables {
    users: Vec<User>,
    verifications: Vec<Verification>,
    sessions: Vec<Session>,
    todos: Vec<Todo>,
}

impl Tables {
    fn check_todo(&self, owner: Uuid, title: &str) -> DbResult<()> {
        if !self.users.iter().any(|u| u.id == owner) {
            return Err(violation("todos_user_id_fkey"));
        }
        if self.todos.iter().any(|t| t.user_id == owner && t.title == title) {
            return Err(violation("todos_user_id_title_key"));
        }
        Ok(())
    }

    fn push_todo(&mut self, owner: Uuid, todo: NewTodo) -> DbResult<Todo> {
        self.check_todo(owner, &todo.title)?;
        let now = OffsetDateTime::now_utc();
        let row = Todo {
            id: Uuid::new_v4(),
            user_id: owner,
            title: todo.title,
            description: todo.description,
            completed: todo.completed,
            created_at: now,
            updated_at: now,
        };
        self.todos.push(row.clone());
        Ok(row)
    }
}

fn violation(constraint: &str) -> DbError {
    DbError::ConstraintViolation {
        constraint: constraint.to_string(),
    }
}

/// In-process `Store` with the same constraint and transaction semantics as
/// the Postgres schema. Multi-row writes are staged on a copy and swapped in
/// only when every row succeeds.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    todo_ops: AtomicUsize,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of todo operations that reached the store.
    pub fn todo_ops(&self) -> usize {
        self.todo_ops.load(Ordering::SeqCst)
    }

    /// Simulates losing the connection: every call fails with `DataUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Rewrites a session's expiry, as if time had passed.
    pub fn force_session_expiry(&self, token: &str, expires_at: OffsetDateTime) {
        if let Ok(mut t) = self.tables.lock() {
            if let Some(s) = t.sessions.iter_mut().find(|s| s.token == token) {
                s.expires_at = expires_at;
            }
        }
    }

    /// Rewrites the expiry of every verification issued for `identifier`.
    pub fn force_verification_expiry(&self, identifier: &str, expires_at: OffsetDateTime) {
        if let Ok(mut t) = self.tables.lock() {
            for v in t.verifications.iter_mut().filter(|v| v.identifier == identifier) {
                v.expires_at = expires_at;
            }
        }
    }

    pub fn verification_count(&self) -> usize {
        self.tables.lock().map(|t| t.verifications.len()).unwrap_or(0)
    }

    pub fn session_count(&self) -> usize {
        self.tables.lock().map(|t| t.sessions.len()).unwrap_or(0)
    }

    fn tables(&self) -> DbResult<MutexGuard<'_, Tables>> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(DbError::DataUnavailable("memory store offline".into()));
        }
        self.tables
            .lock()
            .map_err(|_| DbError::DataUnavailable("memory store lock poisoned".into()))
    }

    fn todo_tables(&self) -> DbResult<MutexGuard<'_, Tables>> {
        self.todo_ops.fetch_add(1, Ordering::SeqCst);
        self.tables()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> DbResult<()> {
        self.tables().map(|_| ())
    }

    async fn insert_user_with_verification(
        &self,
        user: NewUser,
        verification: NewVerification,
    ) -> DbResult<(User, Verification)> {
        let mut t = self.tables()?;
        if t.users.iter().any(|u| u.email == user.email) {
            return Err(violation("users_email_key"));
        }
        if t
            .verifications
            .iter()
            .any(|v| v.identifier == verification.identifier && v.value == verification.value)
        {
            return Err(violation("verifications_identifier_value_key"));
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            email: user.email,
            name: user.name,
            password_hash: user.password_hash,
            email_verified: false,
            created_at: now,
            updated_at: now,
        };
        let verification = Verification {
            id: Uuid::new_v4(),
            user_id: user.id,
            identifier: verification.identifier,
            value: verification.value,
            expires_at: verification.expires_at,
            created_at: now,
        };
        t.users.push(user.clone());
        t.verifications.push(verification.clone());
        Ok((user, verification))
    }

    async fn find_user(&self, id: Uuid) -> DbResult<Option<User>> {
        Ok(self.tables()?.users.iter().find(|u| u.id == id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> DbResult<Option<User>> {
        Ok(self.tables()?.users.iter().find(|u| u.email == email).cloned())
    }

    async fn consume_verification(
        &self,
        identifier: &str,
        value: &str,
        now: OffsetDateTime,
    ) -> DbResult<Option<Uuid>> {
        let mut t = self.tables()?;
        let Some(pos) = t
            .verifications
            .iter()
            .position(|v| v.identifier == identifier && v.value == value)
        else {
            return Ok(None);
        };
        let record = t.verifications.remove(pos);
        if record.expires_at <= now {
            return Ok(None);
        }
        if let Some(user) = t.users.iter_mut().find(|u| u.id == record.user_id) {
            user.email_verified = true;
            user.updated_at = now;
        }
        Ok(Some(record.user_id))
    }

    async fn replace_verification(
        &self,
        user_id: Uuid,
        verification: NewVerification,
    ) -> DbResult<Verification> {
        let mut t = self.tables()?;
        if !t.users.iter().any(|u| u.id == user_id) {
            return Err(violation("verifications_user_id_fkey"));
        }
        let mut staged = t.clone();
        staged.verifications.retain(|v| v.user_id != user_id);
        if staged
            .verifications
            .iter()
            .any(|v| v.identifier == verification.identifier && v.value == verification.value)
        {
            return Err(violation("verifications_identifier_value_key"));
        }
        let row = Verification {
            id: Uuid::new_v4(),
            user_id,
            identifier: verification.identifier,
            value: verification.value,
            expires_at: verification.expires_at,
            created_at: OffsetDateTime::now_utc(),
        };
        staged.verifications.push(row.clone());
        *t = staged;
        Ok(row)
    }

    async fn insert_session(&self, session: NewSession) -> DbResult<Session> {
        let mut t = self.tables()?;
        if !t.users.iter().any(|u| u.id == session.user_id) {
            return Err(violation("sessions_user_id_fkey"));
        }
        if t.sessions.iter().any(|s| s.token == session.token) {
            return Err(violation("sessions_token_key"));
        }
        let now = OffsetDateTime::now_utc();
        let row = Session {
            id: Uuid::new_v4(),
            user_id: session.user_id,
            token: session.token,
            expires_at: session.expires_at,
            user_agent: session.user_agent,
            ip_address: session.ip_address,
            created_at: now,
            updated_at: now,
        };
        t.sessions.push(row.clone());
        Ok(row)
    }

    async fn find_session(&self, token: &str) -> DbResult<Option<ActiveSession>> {
        let t = self.tables()?;
        let found = t.sessions.iter().find(|s| s.token == token).and_then(|s| {
            let user = t.users.iter().find(|u| u.id == s.user_id)?;
            Some(ActiveSession {
                id: s.id,
                user_id: s.user_id,
                expires_at: s.expires_at,
                email_verified: user.email_verified,
            })
        });
        Ok(found)
    }

    async fn extend_session(&self, id: Uuid, expires_at: OffsetDateTime) -> DbResult<u64> {
        let mut t = self.tables()?;
        match t.sessions.iter_mut().find(|s| s.id == id) {
            Some(s) => {
                s.expires_at = expires_at;
                s.updated_at = OffsetDateTime::now_utc();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_session(&self, id: Uuid) -> DbResult<u64> {
        let mut t = self.tables()?;
        let before = t.sessions.len();
        t.sessions.retain(|s| s.id != id);
        Ok((before - t.sessions.len()) as u64)
    }

    async fn purge_expired(&self, now: OffsetDateTime, limit: i64) -> DbResult<u64> {
        let mut t = self.tables()?;
        let limit = limit.max(0) as usize;

        let mut budget = limit;
        t.sessions.retain(|s| {
            let drop = s.expires_at <= now && budget > 0;
            budget -= drop as usize;
            !drop
        });
        let sessions = limit - budget;

        let mut budget = limit;
        t.verifications.retain(|v| {
            let drop = v.expires_at <= now && budget > 0;
            budget -= drop as usize;
            !drop
        });
        let verifications = limit - budget;

        Ok((sessions + verifications) as u64)
    }

    async fn select_todos(&self, filter: &TodoFilter, page: Page) -> DbResult<Vec<Todo>> {
        let t = self.todo_tables()?;
        // Insertion order stands in for creation time, so reverse for newest first.
        let rows = t
            .todos
            .iter()
            .rev()
            .filter(|todo| filter.matches(todo))
            .skip(page.offset.max(0) as usize)
            .take(page.limit.max(0) as usize)
            .cloned()
            .collect();
        Ok(rows)
    }

    async fn insert_todo(&self, owner: Uuid, todo: NewTodo) -> DbResult<Todo> {
        self.todo_tables()?.push_todo(owner, todo)
    }

    async fn insert_todos(&self, owner: Uuid, todos: Vec<NewTodo>) -> DbResult<Vec<Todo>> {
        let mut t = self.todo_tables()?;
        let mut staged = t.clone();
        let rows = todos
            .into_iter()
            .map(|todo| staged.push_todo(owner, todo))
            .collect::<DbResult<Vec<_>>>()?;
        *t = staged;
        Ok(rows)
    }

    async fn update_todos(&self, filter: &TodoFilter, patch: TodoPatch) -> DbResult<u64> {
        let mut t = self.todo_tables()?;
        if let Some(title) = &patch.title {
            let clash = t.todos.iter().any(|todo| {
                todo.user_id == filter.owner() && &todo.title == title && !filter.matches(todo)
            });
            let targets = t.todos.iter().filter(|todo| filter.matches(todo)).count();
            if clash || targets > 1 {
                return Err(violation("todos_user_id_title_key"));
            }
        }
        let now = OffsetDateTime::now_utc();
        let mut affected = 0;
        for todo in t.todos.iter_mut().filter(|todo| filter.matches(todo)) {
            if let Some(title) = &patch.title {
                todo.title = title.clone();
            }
            if let Some(description) = &patch.description {
                todo.description = description.clone();
            }
            if let Some(completed) = patch.completed {
                todo.completed = completed;
            }
            todo.updated_at = now;
            affected += 1;
        }
        Ok(affected)
    }

    async fn delete_todos(&self, filter: &TodoFilter) -> DbResult<u64> {
        let mut t = self.todo_tables()?;
        let before = t.todos.len();
        t.todos.retain(|todo| !filter.matches(todo));
        Ok((before - t.todos.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use time::Duration;

    async fn seeded() -> (MemoryStore, Uuid) {
        let store = MemoryStore::new();
        let (user, _) = store
            .insert_user_with_verification(
                NewUser {
                    email: "a@example.com".into(),
                    name: "A".into(),
                    password_hash: "hash".into(),
                },
                NewVerification {
                    identifier: "a@example.com".into(),
                    value: "tok".into(),
                    expires_at: OffsetDateTime::now_utc() + Duration::hours(1),
                },
            )
            .await
            .unwrap();
        (store, user.id)
    }

    fn new_todo(title: &str) -> NewTodo {
        NewTodo {
            title: title.into(),
            description: None,
            completed: false,
        }
    }

    #[tokio::test]
    async fn select_is_scoped_and_empty_is_ok() {
        let (store, owner) = seeded().await;
        store.insert_todo(owner, new_todo("one")).await.unwrap();
        let stranger = Uuid::new_v4();
        let rows = store
            .select_todos(&TodoFilter::owned_by(stranger), Page { limit: 10, offset: 0 })
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn delete_twice_returns_zero_the_second_time() {
        let (store, owner) = seeded().await;
        let todo = store.insert_todo(owner, new_todo("one")).await.unwrap();
        let filter = TodoFilter::owned_by(owner).with_id(todo.id);
        assert_eq!(store.delete_todos(&filter).await.unwrap(), 1);
        assert_eq!(store.delete_todos(&filter).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn batch_insert_is_all_or_nothing() {
        let (store, owner) = seeded().await;
        let err = store
            .insert_todos(owner, vec![new_todo("x"), new_todo("y"), new_todo("x")])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation { .. }));
        let rows = store
            .select_todos(&TodoFilter::owned_by(owner), Page { limit: 10, offset: 0 })
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn concurrent_duplicate_inserts_let_exactly_one_win() {
        let (store, owner) = seeded().await;
        let store = Arc::new(store);
        let a = tokio::spawn({
            let store = store.clone();
            async move { store.insert_todo(owner, new_todo("same")).await }
        });
        let b = tokio::spawn({
            let store = store.clone();
            async move { store.insert_todo(owner, new_todo("same")).await }
        });
        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(DbError::ConstraintViolation { .. }))));
    }

    #[tokio::test]
    async fn verification_is_single_use_and_expires() {
        let (store, owner) = seeded().await;
        let now = OffsetDateTime::now_utc();
        assert_eq!(
            store.consume_verification("a@example.com", "tok", now).await.unwrap(),
            Some(owner)
        );
        assert_eq!(
            store.consume_verification("a@example.com", "tok", now).await.unwrap(),
            None
        );
        assert!(store.find_user(owner).await.unwrap().unwrap().email_verified);

        let (store, _) = seeded().await;
        let later = now + Duration::hours(2);
        assert_eq!(
            store.consume_verification("a@example.com", "tok", later).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn replacing_a_verification_invalidates_the_old_one() {
        let (store, owner) = seeded().await;
        let fresh = store
            .replace_verification(
                owner,
                NewVerification {
                    identifier: "a@example.com".into(),
                    value: "tok-2".into(),
                    expires_at: OffsetDateTime::now_utc() + Duration::hours(1),
                },
            )
            .await
            .unwrap();
        assert_eq!(fresh.user_id, owner);
        assert_eq!(store.verification_count(), 1);

        let now = OffsetDateTime::now_utc();
        assert_eq!(
            store.consume_verification("a@example.com", "tok", now).await.unwrap(),
            None
        );
        assert_eq!(
            store.consume_verification("a@example.com", "tok-2", now).await.unwrap(),
            Some(owner)
        );
    }

    #[tokio::test]
    async fn purge_removes_only_expired_rows_up_to_the_limit() {
        let (store, owner) = seeded().await;
        let now = OffsetDateTime::now_utc();
        for (token, offset) in [("old-1", -2), ("old-2", -1), ("live", 1)] {
            store
                .insert_session(NewSession {
                    user_id: owner,
                    token: token.into(),
                    expires_at: now + Duration::hours(offset),
                    user_agent: None,
                    ip_address: None,
                })
                .await
                .unwrap();
        }
        store.force_verification_expiry("a@example.com", now - Duration::minutes(1));

        assert_eq!(store.purge_expired(now, 1).await.unwrap(), 2);
        assert_eq!(store.session_count(), 2);
        assert_eq!(store.verification_count(), 0);

        assert_eq!(store.purge_expired(now, 10).await.unwrap(), 1);
        assert_eq!(store.session_count(), 1);
        assert!(store.find_session("live").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn patch_can_clear_the_description() {
        let (store, owner) = seeded().await;
        let todo = store
            .insert_todo(
                owner,
                NewTodo {
                    title: "t".into(),
                    description: Some("d".into()),
                    completed: false,
                },
            )
            .await
            .unwrap();
        let filter = TodoFilter::owned_by(owner).with_id(todo.id);

        let keep = TodoPatch {
            completed: Some(true),
            ..TodoPatch::default()
        };
        store.update_todos(&filter, keep).await.unwrap();
        let rows = store.select_todos(&filter, Page::ONE).await.unwrap();
        assert_eq!(rows[0].description.as_deref(), Some("d"));

        let clear = TodoPatch {
            description: Some(None),
            ..TodoPatch::default()
        };
        assert_eq!(store.update_todos(&filter, clear).await.unwrap(), 1);
        let rows = store.select_todos(&filter, Page::ONE).await.unwrap();
        assert_eq!(rows[0].description, None);
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let store = MemoryStore::new();
        let err = store.insert_todo(Uuid::new_v4(), new_todo("orphan")).await.unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation { constraint } if constraint == "todos_user_id_fkey"));
    }

    #[tokio::test]
    async fn offline_store_is_unavailable_not_empty() {
        let (store, owner) = seeded().await;
        store.set_offline(true);
        assert!(matches!(store.ping().await, Err(DbError::DataUnavailable(_))));
        let err = store
            .select_todos(&TodoFilter::owned_by(owner), Page::ONE)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::DataUnavailable(_)));
    }
}

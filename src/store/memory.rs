//! In-process store used in development and tests.

use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::{SessionRepository, StoreError, Transition, UserRepository};
use crate::models::{NewSession, NewUser, Session, SessionState, User};

#[derive(Default)]
struct UserTable {
    by_id: HashMap<Uuid, User>,
    id_by_email: HashMap<String, Uuid>,
}

#[derive(Default)]
struct SessionTable {
    by_id: HashMap<Uuid, Session>,
    id_by_hash: HashMap<String, Uuid>,
}

impl SessionTable {
    fn insert(&mut self, session: NewSession) -> Result<Session, StoreError> {
        if self.id_by_hash.contains_key(&session.token_hash) || self.by_id.contains_key(&session.id)
        {
            return Err(StoreError::UniqueViolation);
        }
        let session = session.into_session();
        self.id_by_hash.insert(session.token_hash.clone(), session.id);
        self.by_id.insert(session.id, session.clone());
        Ok(session)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<UserTable>,
    sessions: Mutex<SessionTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn users(&self) -> Result<MutexGuard<'_, UserTable>, StoreError> {
        self.users
            .lock()
            .map_err(|_| StoreError::Backend("user table lock poisoned".to_string()))
    }

    fn sessions(&self) -> Result<MutexGuard<'_, SessionTable>, StoreError> {
        self.sessions
            .lock()
            .map_err(|_| StoreError::Backend("session table lock poisoned".to_string()))
    }
}

impl UserRepository for MemoryStore {
    fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let mut table = self.users()?;
        let key = user.email.to_lowercase();

        if table.id_by_email.contains_key(&key) {
            return Err(StoreError::UniqueViolation);
        }

        let user = user.into_user();
        table.id_by_email.insert(key, user.id);
        table.by_id.insert(user.id, user.clone());
        Ok(user)
    }

    fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let table = self.users()?;
        Ok(table
            .id_by_email
            .get(&email.to_lowercase())
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users()?.by_id.get(&id).cloned())
    }

    fn update_password_hash(
        &self,
        id: Uuid,
        password_hash: &str,
        now: NaiveDateTime,
    ) -> Result<bool, StoreError> {
        let mut table = self.users()?;
        match table.by_id.get_mut(&id) {
            Some(user) => {
                user.password_hash = password_hash.to_string();
                user.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn ping(&self) -> Result<(), StoreError> {
        drop(self.users()?);
        drop(self.sessions()?);
        Ok(())
    }
}

impl SessionRepository for MemoryStore {
    fn insert(&self, session: NewSession) -> Result<Session, StoreError> {
        self.sessions()?.insert(session)
    }

    fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, StoreError> {
        let table = self.sessions()?;
        Ok(table
            .id_by_hash
            .get(token_hash)
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        Ok(self.sessions()?.by_id.get(&id).cloned())
    }

    fn transition(&self, id: Uuid, to: SessionState) -> Result<Transition<()>, StoreError> {
        let mut table = self.sessions()?;
        let Some(session) = table.by_id.get_mut(&id) else {
            return Ok(Transition::NotFound);
        };

        let current = session.state();
        if current.is_terminal() {
            return Ok(Transition::AlreadyTerminal(current));
        }

        session.state = to.as_str().to_string();
        Ok(Transition::Applied(()))
    }

    fn rotate(
        &self,
        old_id: Uuid,
        replacement: NewSession,
        now: NaiveDateTime,
    ) -> Result<Transition<Session>, StoreError> {
        let mut table = self.sessions()?;

        let current = match table.by_id.get(&old_id) {
            Some(session) => session.state(),
            None => return Ok(Transition::NotFound),
        };
        if current.is_terminal() {
            return Ok(Transition::AlreadyTerminal(current));
        }

        let new_session = table.insert(replacement)?;

        if let Some(old) = table.by_id.get_mut(&old_id) {
            old.state = SessionState::Consumed.as_str().to_string();
            old.replaced_by = Some(new_session.id);
            old.last_used_at = now;
        }

        Ok(Transition::Applied(new_session))
    }

    fn revoke_all_for_user(&self, user_id: Uuid) -> Result<usize, StoreError> {
        let mut table = self.sessions()?;
        let mut revoked = 0;

        for session in table.by_id.values_mut() {
            if session.user_id == user_id && session.state() == SessionState::Active {
                session.state = SessionState::Revoked.as_str().to_string();
                revoked += 1;
            }
        }

        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::sync::Arc;

    fn new_user(email: &str) -> NewUser {
        let now = Utc::now().naive_utc();
        NewUser {
            id: Uuid::new_v4(),
            email: email.to_string(),
            password_hash: "$argon2id$stub".to_string(),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn new_session(user_id: Uuid, hash: &str) -> NewSession {
        let now = Utc::now().naive_utc();
        NewSession::active(user_id, hash.to_string(), now, now + Duration::days(7))
    }

    #[test]
    fn test_user_email_unique_case_insensitive() {
        let store = MemoryStore::new();
        UserRepository::insert(&store, new_user("a@x.com")).unwrap();

        let dup = UserRepository::insert(&store, new_user("A@X.COM"));
        assert_eq!(dup.unwrap_err(), StoreError::UniqueViolation);

        let found = store.find_by_email("A@x.Com").unwrap();
        assert!(found.is_some());
    }

    #[test]
    fn test_update_password_hash() {
        let store = MemoryStore::new();
        let user = UserRepository::insert(&store, new_user("a@x.com")).unwrap();
        let now = Utc::now().naive_utc();

        assert!(store.update_password_hash(user.id, "$new", now).unwrap());
        assert_eq!(
            UserRepository::find_by_id(&store, user.id)
                .unwrap()
                .unwrap()
                .password_hash,
            "$new"
        );
        assert!(!store
            .update_password_hash(Uuid::new_v4(), "$new", now)
            .unwrap());
    }

    #[test]
    fn test_transition_is_single_shot() {
        let store = MemoryStore::new();
        let session = SessionRepository::insert(&store, new_session(Uuid::new_v4(), "h1")).unwrap();

        assert_eq!(
            store.transition(session.id, SessionState::Consumed).unwrap(),
            Transition::Applied(())
        );
        assert_eq!(
            store.transition(session.id, SessionState::Revoked).unwrap(),
            Transition::AlreadyTerminal(SessionState::Consumed)
        );
        assert_eq!(
            store.transition(Uuid::new_v4(), SessionState::Revoked).unwrap(),
            Transition::NotFound
        );
    }

    #[test]
    fn test_rotate_links_replacement() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let old = SessionRepository::insert(&store, new_session(user_id, "old")).unwrap();
        let now = Utc::now().naive_utc();

        let rotated = store
            .rotate(old.id, new_session(user_id, "new"), now)
            .unwrap();
        let Transition::Applied(new) = rotated else {
            panic!("rotation should apply");
        };

        let old = SessionRepository::find_by_id(&store, old.id).unwrap().unwrap();
        assert_eq!(old.state(), SessionState::Consumed);
        assert_eq!(old.replaced_by, Some(new.id));
        assert_eq!(
            store.find_by_token_hash("new").unwrap().map(|s| s.id),
            Some(new.id)
        );

        let again = store
            .rotate(old.id, new_session(user_id, "newer"), now)
            .unwrap();
        assert_eq!(again, Transition::AlreadyTerminal(SessionState::Consumed));
        assert!(store.find_by_token_hash("newer").unwrap().is_none());
    }

    #[test]
    fn test_concurrent_rotation_has_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let user_id = Uuid::new_v4();
        let old = SessionRepository::insert(store.as_ref(), new_session(user_id, "old")).unwrap();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .rotate(
                            old.id,
                            new_session(user_id, &format!("new-{i}")),
                            Utc::now().naive_utc(),
                        )
                        .unwrap()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|t| matches!(t, Transition::Applied(_)))
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_revoke_all_for_user_only_touches_active() {
        let store = MemoryStore::new();
        let user_id = Uuid::new_v4();
        let other = Uuid::new_v4();

        let a = SessionRepository::insert(&store, new_session(user_id, "a")).unwrap();
        SessionRepository::insert(&store, new_session(user_id, "b")).unwrap();
        SessionRepository::insert(&store, new_session(other, "c")).unwrap();
        store.transition(a.id, SessionState::Consumed).unwrap();

        assert_eq!(store.revoke_all_for_user(user_id).unwrap(), 1);
        assert_eq!(store.revoke_all_for_user(user_id).unwrap(), 0);
        assert_eq!(
            store.find_by_token_hash("c").unwrap().unwrap().state(),
            SessionState::Active
        );
    }

    #[test]
    fn test_ping_releases_both_tables() {
        let store = MemoryStore::new();
        assert_eq!(store.ping(), Ok(()));
        assert_eq!(store.ping(), Ok(()));
        assert!(store.find_by_email("a@x.com").unwrap().is_none());
    }
}

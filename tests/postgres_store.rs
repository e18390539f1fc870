//! Postgres repository tests.
//!
//! These run against the database named by `TEST_DATABASE_URL`, which must already
//! have the migrations applied (`diesel migration run`). Without it every test
//! returns early.

use auth_service::auth::refresh::RefreshSecret;
use auth_service::models::{NewSession, NewUser, SessionState, User};
use auth_service::store::{PgStore, SessionRepository, StoreError, Transition, UserRepository};
use auth_service::Config;
use chrono::{Duration, Utc};
use std::sync::Arc;
use std::thread;
use uuid::Uuid;

const CONTENDERS: usize = 8;

fn pg_store() -> Option<Arc<PgStore>> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping Postgres store test");
        return None;
    };
    let mut database = Config::default_for_testing().database;
    database.max_connections = CONTENDERS as u32 + 2;
    Some(Arc::new(
        PgStore::connect(&url, &database).expect("Failed to connect to test database"),
    ))
}

fn new_user(email: &str) -> NewUser {
    let now = Utc::now().naive_utc();
    NewUser {
        id: Uuid::new_v4(),
        email: email.to_string(),
        password_hash: "$argon2id$placeholder".to_string(),
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}

fn new_session(user_id: Uuid) -> NewSession {
    let now = Utc::now().naive_utc();
    NewSession::active(
        user_id,
        RefreshSecret::generate().digest(),
        now,
        now + Duration::days(7),
    )
}

fn unique_email() -> String {
    format!("pg_{}@example.com", Uuid::new_v4())
}

fn seeded_user(store: &PgStore) -> User {
    UserRepository::insert(store, new_user(&unique_email())).unwrap()
}

fn session_state(store: &PgStore, id: Uuid) -> SessionState {
    SessionRepository::find_by_id(store, id)
        .unwrap()
        .expect("session should exist")
        .state()
}

#[test]
fn email_lookup_and_uniqueness_ignore_case() {
    let Some(store) = pg_store() else { return };
    let email = unique_email();

    let user = UserRepository::insert(&*store, new_user(&email)).unwrap();

    let found = store.find_by_email(&email.to_uppercase()).unwrap();
    assert_eq!(found.map(|u| u.id), Some(user.id));

    let duplicate = UserRepository::insert(&*store, new_user(&email.to_uppercase()));
    assert_eq!(duplicate.unwrap_err(), StoreError::UniqueViolation);
}

#[test]
fn concurrent_inserts_of_one_email_have_one_winner() {
    let Some(store) = pg_store() else { return };
    let email = unique_email();

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..CONTENDERS)
            .map(|_| scope.spawn(|| UserRepository::insert(&*store, new_user(&email))))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| *e == StoreError::UniqueViolation));
}

#[test]
fn concurrent_transitions_have_one_winner() {
    let Some(store) = pg_store() else { return };
    let user = seeded_user(&store);
    let session = SessionRepository::insert(&*store, new_session(user.id)).unwrap();

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..CONTENDERS)
            .map(|_| scope.spawn(|| store.transition(session.id, SessionState::Consumed)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let applied = results
        .iter()
        .filter(|r| matches!(r, Ok(Transition::Applied(()))))
        .count();
    assert_eq!(applied, 1);
    assert!(results
        .iter()
        .filter(|r| !matches!(r, Ok(Transition::Applied(()))))
        .all(|r| *r == Ok(Transition::AlreadyTerminal(SessionState::Consumed))));

    assert_eq!(
        store.transition(Uuid::new_v4(), SessionState::Revoked),
        Ok(Transition::NotFound)
    );
}

#[test]
fn rotate_consumes_old_and_links_replacement() {
    let Some(store) = pg_store() else { return };
    let user = seeded_user(&store);
    let old = SessionRepository::insert(&*store, new_session(user.id)).unwrap();
    let replacement = new_session(user.id);
    let replacement_id = replacement.id;

    let rotated = store
        .rotate(old.id, replacement, Utc::now().naive_utc())
        .unwrap();

    let new = match rotated {
        Transition::Applied(session) => session,
        other => panic!("rotation was not applied: {other:?}"),
    };
    assert_eq!(new.id, replacement_id);
    assert_eq!(new.state(), SessionState::Active);

    let old = SessionRepository::find_by_id(&*store, old.id).unwrap().unwrap();
    assert_eq!(old.state(), SessionState::Consumed);
    assert_eq!(old.replaced_by, Some(replacement_id));

    assert_eq!(
        store.rotate(old.id, new_session(user.id), Utc::now().naive_utc()),
        Ok(Transition::AlreadyTerminal(SessionState::Consumed))
    );
}

#[test]
fn rotate_rolls_back_when_replacement_insert_fails() {
    let Some(store) = pg_store() else { return };
    let user = seeded_user(&store);
    let existing = SessionRepository::insert(&*store, new_session(user.id)).unwrap();
    let old = SessionRepository::insert(&*store, new_session(user.id)).unwrap();

    let mut clashing = new_session(user.id);
    clashing.token_hash = existing.token_hash.clone();

    let result = store.rotate(old.id, clashing, Utc::now().naive_utc());

    assert_eq!(result.unwrap_err(), StoreError::UniqueViolation);
    let old = SessionRepository::find_by_id(&*store, old.id).unwrap().unwrap();
    assert_eq!(old.state(), SessionState::Active);
    assert_eq!(old.replaced_by, None);
}

#[test]
fn revoke_all_touches_only_active_sessions_of_the_user() {
    let Some(store) = pg_store() else { return };
    let user = seeded_user(&store);
    let bystander = seeded_user(&store);

    let first = SessionRepository::insert(&*store, new_session(user.id)).unwrap();
    let second = SessionRepository::insert(&*store, new_session(user.id)).unwrap();
    let consumed = SessionRepository::insert(&*store, new_session(user.id)).unwrap();
    store
        .transition(consumed.id, SessionState::Consumed)
        .unwrap();
    let other = SessionRepository::insert(&*store, new_session(bystander.id)).unwrap();

    assert_eq!(store.revoke_all_for_user(user.id), Ok(2));

    assert_eq!(session_state(&store, first.id), SessionState::Revoked);
    assert_eq!(session_state(&store, second.id), SessionState::Revoked);
    assert_eq!(session_state(&store, consumed.id), SessionState::Consumed);
    assert_eq!(session_state(&store, other.id), SessionState::Active);

    assert_eq!(store.revoke_all_for_user(user.id), Ok(0));
}

#[test]
fn password_hash_update_reports_missing_user() {
    let Some(store) = pg_store() else { return };
    let user = seeded_user(&store);
    let now = Utc::now().naive_utc();

    assert_eq!(store.update_password_hash(user.id, "$argon2id$new", now), Ok(true));
    assert_eq!(
        UserRepository::find_by_id(&*store, user.id)
            .unwrap()
            .map(|u| u.password_hash),
        Some("$argon2id$new".to_string())
    );
    assert_eq!(
        store.update_password_hash(Uuid::new_v4(), "$argon2id$new", now),
        Ok(false)
    );
    assert_eq!(store.ping(), Ok(()));
}

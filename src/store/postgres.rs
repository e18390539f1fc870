//! Postgres-backed repositories on an r2d2 connection pool.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::r2d2::{self, ConnectionManager, CustomizeConnection, PoolError, PooledConnection};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use std::time::Duration;
use uuid::Uuid;

use super::{SessionRepository, StoreError, Transition, UserRepository};
use crate::config::DatabaseConfig;
use crate::models::{NewSession, NewUser, Session, SessionState, User};
use crate::schema::{sessions, users};

pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;

diesel::define_sql_function! {
    fn lower(x: diesel::sql_types::Text) -> diesel::sql_types::Text;
}

/// Sets `statement_timeout` on every new connection, so a slow write is aborted
/// and rolled back by the server rather than left running.
#[derive(Debug, Clone, Copy)]
struct StatementTimeout(u64);

impl CustomizeConnection<PgConnection, r2d2::Error> for StatementTimeout {
    fn on_acquire(&self, conn: &mut PgConnection) -> Result<(), r2d2::Error> {
        diesel::sql_query(format!("SET statement_timeout = {}", self.0))
            .execute(conn)
            .map(drop)
            .map_err(r2d2::Error::QueryError)
    }
}

pub fn create_db_pool(url: &str, config: &DatabaseConfig) -> Result<DbPool, StoreError> {
    let manager = ConnectionManager::<PgConnection>::new(url);
    r2d2::Pool::builder()
        .max_size(config.max_connections)
        .min_idle(Some(config.min_connections))
        .connection_timeout(Duration::from_secs(config.connection_timeout_secs))
        .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
        .connection_customizer(Box::new(StatementTimeout(config.statement_timeout_ms)))
        .build(manager)
        .map_err(StoreError::from)
}

impl From<PoolError> for StoreError {
    fn from(err: PoolError) -> Self {
        StoreError::Unavailable(err.to_string())
    }
}

impl From<DieselError> for StoreError {
    fn from(err: DieselError) -> Self {
        match err {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                StoreError::UniqueViolation
            }
            DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, info) => {
                StoreError::Unavailable(info.message().to_string())
            }
            // The statement was cancelled and its transaction rolled back.
            DieselError::DatabaseError(_, info) if info.message().contains("statement timeout") => {
                StoreError::Unavailable(info.message().to_string())
            }
            other => StoreError::Backend(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn connect(url: &str, config: &DatabaseConfig) -> Result<Self, StoreError> {
        Ok(Self::new(create_db_pool(url, config)?))
    }

    fn conn(&self) -> Result<PooledConnection<ConnectionManager<PgConnection>>, StoreError> {
        Ok(self.pool.get()?)
    }
}

fn current_state(conn: &mut PgConnection, id: Uuid) -> Result<Option<SessionState>, DieselError> {
    let state = sessions::table
        .find(id)
        .select(sessions::state)
        .first::<String>(conn)
        .optional()?;
    Ok(state.map(|s| SessionState::parse(&s).unwrap_or(SessionState::Revoked)))
}

fn lost_race<T>(state: Option<SessionState>) -> Transition<T> {
    match state {
        Some(state) => Transition::AlreadyTerminal(state),
        None => Transition::NotFound,
    }
}

impl UserRepository for PgStore {
    fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let mut conn = self.conn()?;
        let user = diesel::insert_into(users::table)
            .values(&user)
            .returning(User::as_returning())
            .get_result(&mut conn)?;
        Ok(user)
    }

    fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let mut conn = self.conn()?;
        let user = users::table
            .filter(lower(users::email).eq(email.to_lowercase()))
            .select(User::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(user)
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let mut conn = self.conn()?;
        let user = users::table
            .find(id)
            .select(User::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(user)
    }

    fn update_password_hash(
        &self,
        id: Uuid,
        password_hash: &str,
        now: NaiveDateTime,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn()?;
        let updated = diesel::update(users::table.find(id))
            .set((
                users::password_hash.eq(password_hash),
                users::updated_at.eq(now),
            ))
            .execute(&mut conn)?;
        Ok(updated == 1)
    }

    fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        diesel::sql_query("SELECT 1").execute(&mut conn)?;
        Ok(())
    }
}

impl SessionRepository for PgStore {
    fn insert(&self, session: NewSession) -> Result<Session, StoreError> {
        let mut conn = self.conn()?;
        let session = diesel::insert_into(sessions::table)
            .values(&session)
            .returning(Session::as_returning())
            .get_result(&mut conn)?;
        Ok(session)
    }

    fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, StoreError> {
        let mut conn = self.conn()?;
        let session = sessions::table
            .filter(sessions::token_hash.eq(token_hash))
            .select(Session::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(session)
    }

    fn find_by_id(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let mut conn = self.conn()?;
        let session = sessions::table
            .find(id)
            .select(Session::as_select())
            .first(&mut conn)
            .optional()?;
        Ok(session)
    }

    fn transition(&self, id: Uuid, to: SessionState) -> Result<Transition<()>, StoreError> {
        let mut conn = self.conn()?;

        let updated = diesel::update(
            sessions::table
                .filter(sessions::id.eq(id))
                .filter(sessions::state.eq(SessionState::Active.as_str())),
        )
        .set(sessions::state.eq(to.as_str()))
        .execute(&mut conn)?;

        if updated == 1 {
            return Ok(Transition::Applied(()));
        }
        Ok(lost_race(current_state(&mut conn, id)?))
    }

    fn rotate(
        &self,
        old_id: Uuid,
        replacement: NewSession,
        now: NaiveDateTime,
    ) -> Result<Transition<Session>, StoreError> {
        let mut conn = self.conn()?;

        let outcome = conn.transaction::<_, DieselError, _>(|conn| {
            let consumed = diesel::update(
                sessions::table
                    .filter(sessions::id.eq(old_id))
                    .filter(sessions::state.eq(SessionState::Active.as_str())),
            )
            .set((
                sessions::state.eq(SessionState::Consumed.as_str()),
                sessions::replaced_by.eq(Some(replacement.id)),
                sessions::last_used_at.eq(now),
            ))
            .execute(conn)?;

            if consumed == 0 {
                return Ok(lost_race(current_state(conn, old_id)?));
            }

            let session = diesel::insert_into(sessions::table)
                .values(&replacement)
                .returning(Session::as_returning())
                .get_result(conn)?;

            Ok(Transition::Applied(session))
        })?;

        Ok(outcome)
    }

    fn revoke_all_for_user(&self, user_id: Uuid) -> Result<usize, StoreError> {
        let mut conn = self.conn()?;
        let revoked = diesel::update(
            sessions::table
                .filter(sessions::user_id.eq(user_id))
                .filter(sessions::state.eq(SessionState::Active.as_str())),
        )
        .set(sessions::state.eq(SessionState::Revoked.as_str()))
        .execute(&mut conn)?;
        Ok(revoked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lost_race_mapping() {
        assert_eq!(lost_race::<()>(None), Transition::NotFound);
        assert_eq!(
            lost_race::<()>(Some(SessionState::Revoked)),
            Transition::AlreadyTerminal(SessionState::Revoked)
        );
    }

    #[test]
    fn test_unique_violation_maps_to_store_error() {
        let err = DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new("duplicate key".to_string()),
        );
        assert_eq!(StoreError::from(err), StoreError::UniqueViolation);

        let err = DieselError::NotFound;
        assert!(matches!(StoreError::from(err), StoreError::Backend(_)));
    }

    #[test]
    fn test_statement_timeout_is_unavailable() {
        let err = DieselError::DatabaseError(
            DatabaseErrorKind::Unknown,
            Box::new("canceling statement due to statement timeout".to_string()),
        );
        assert!(matches!(StoreError::from(err), StoreError::Unavailable(_)));
    }
}

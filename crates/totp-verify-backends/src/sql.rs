//! SQL-backed storage, built on `sqlx` against SQLite.
//!
//! `sqlx` is async-only; the public trait surface in `totp-verify-core` is
//! synchronous (SPEC_FULL §5), so each backend here owns a small dedicated
//! Tokio runtime and blocks on it at the trait boundary. Callers never see
//! an `async fn` or need their own reactor.

use serde::{Deserialize, Serialize};
use sqlx::pool::PoolConnection;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, Sqlite, SqlitePool};
use tokio::runtime::Runtime;

use totp_verify_core::backend::{PincodeBackend, SecretBackend, StateBackend, StateGuard};
use totp_verify_core::{Error, Secret, UserState};

use crate::crypto::SecretDecryptor as _;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlBackendConfig {
    pub database_url: String,
}

fn blocking_runtime() -> Result<Runtime, Error> {
    Runtime::new().map_err(|e| Error::verify_failed(format!("cannot start SQL runtime: {e}")))
}

fn connect(database_url: &str, rt: &Runtime) -> Result<SqlitePool, Error> {
    rt.block_on(async {
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
    })
    .map_err(|e| {
        tracing::warn!(%database_url, error = %e, "SQL backend failed to connect");
        Error::verify_failed(format!("cannot connect to SQL backend: {e}"))
    })
}

pub struct SqlSecretBackend {
    rt: Runtime,
    pool: SqlitePool,
}

impl SqlSecretBackend {
    pub fn new(config: SqlBackendConfig) -> Result<Self, Error> {
        let rt = blocking_runtime()?;
        let pool = connect(&config.database_url, &rt)?;
        Ok(SqlSecretBackend { rt, pool })
    }
}

impl SecretBackend for SqlSecretBackend {
    fn load_secret(&self, username: &str, pincode: Option<&str>) -> Result<Secret, Error> {
        self.rt.block_on(async {
            let row = sqlx::query(
                "SELECT s.secret, s.rate_limit_times, s.rate_limit_seconds, s.window_size, s.encrypted
                 FROM secrets s JOIN users u ON u.userid = s.userid
                 WHERE u.username = ?",
            )
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::warn!(%username, error = %e, "SQL secret lookup failed");
                Error::user_secret(e.to_string())
            })?
            .ok_or_else(|| Error::user_secret(format!("no secret found for user {username}")))?;

            let stored: String = row.get("secret");
            let encrypted: bool = row.get("encrypted");
            let rate_limit_times: u32 = row.get::<i64, _>("rate_limit_times") as u32;
            let rate_limit_seconds: i64 = row.get("rate_limit_seconds");
            let window_size: i64 = row.get("window_size");

            let totp_key = if encrypted {
                let pincode = pincode
                    .ok_or_else(|| Error::user_secret("Could not decrypt: no pincode supplied"))?;
                let sealed = base64::decode(stored.trim())
                    .map_err(|_| Error::user_secret("malformed encrypted secret"))?;
                crate::crypto::Argon2AesGcmDecryptor.decrypt(&sealed, pincode)?
            } else {
                stored
            };

            let mut secret = Secret::new(totp_key)
                .with_rate_limit(rate_limit_times, rate_limit_seconds)
                .with_window_size(window_size);

            if !encrypted {
                let tokens: Vec<String> = sqlx::query(
                    "SELECT t.token FROM scratch_tokens t
                     JOIN users u ON u.userid = t.userid
                     WHERE u.username = ?",
                )
                .bind(username)
                .fetch_all(&self.pool)
                .await
                .map_err(|e| Error::user_secret(e.to_string()))?
                .into_iter()
                .map(|r| r.get::<String, _>("token"))
                .collect();
                secret = secret.with_scratch_tokens(tokens);
            }

            Ok(secret)
        })
    }
}

pub struct SqlPincodeBackend {
    rt: Runtime,
    pool: SqlitePool,
}

impl SqlPincodeBackend {
    pub fn new(config: SqlBackendConfig) -> Result<Self, Error> {
        let rt = blocking_runtime()?;
        let pool = connect(&config.database_url, &rt)?;
        Ok(SqlPincodeBackend { rt, pool })
    }
}

impl PincodeBackend for SqlPincodeBackend {
    fn verify_pincode(&self, username: &str, candidate: &str) -> Result<bool, Error> {
        self.rt.block_on(async {
            let row = sqlx::query(
                "SELECT p.pincode FROM pincodes p
                 JOIN users u ON u.userid = p.userid
                 WHERE u.username = ?",
            )
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                tracing::warn!(%username, error = %e, "SQL pincode lookup failed");
                Error::user_pincode(e.to_string())
            })?
            .ok_or_else(|| Error::user_pincode("no pincodes record found for user"))?;

            let hash: String = row.get("pincode");
            totp_verify_core::hash::verify_pincode(candidate, &hash)
        })
    }
}

pub struct SqlStateBackend {
    rt: Runtime,
    pool: SqlitePool,
}

impl SqlStateBackend {
    pub fn new(config: SqlBackendConfig) -> Result<Self, Error> {
        let rt = blocking_runtime()?;
        let pool = connect(&config.database_url, &rt)?;
        Ok(SqlStateBackend { rt, pool })
    }
}

impl StateBackend for SqlStateBackend {
    /// Takes the write lock immediately (`BEGIN IMMEDIATE`) rather than
    /// SQLite's default deferred `BEGIN`, so a second `acquire` for the same
    /// user blocks here instead of racing past the read and losing an
    /// update — the per-user exclusive-lock contract `StateBackend::acquire`
    /// promises every other backend variant also upholds.
    fn acquire(&self, username: &str) -> Result<Box<dyn StateGuard>, Error> {
        self.rt.block_on(async {
            let mut conn = self
                .pool
                .acquire()
                .await
                .map_err(|e| Error::verify_failed(e.to_string()))?;

            sqlx::query("BEGIN IMMEDIATE")
                .execute(&mut *conn)
                .await
                .map_err(|e| Error::verify_failed(e.to_string()))?;

            let userid: i64 = sqlx::query("SELECT userid FROM users WHERE username = ?")
                .bind(username)
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| Error::verify_failed(e.to_string()))?
                .map(|r| r.get("userid"))
                .ok_or_else(|| Error::user_not_found(format!("no such user {username}")))?;

            let row = sqlx::query("SELECT json FROM state WHERE userid = ?")
                .bind(userid)
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| Error::verify_failed(e.to_string()))?;

            let state = match row {
                Some(r) => {
                    let json: String = r.get("json");
                    serde_json::from_str(&json).unwrap_or_default()
                }
                None => UserState::default(),
            };

            tracing::debug!(%username, "acquired per-user SQL state lock");

            Ok(Box::new(SqlStateGuard {
                rt_handle: self.rt.handle().clone(),
                conn: Some(conn),
                userid,
                state,
            }) as Box<dyn StateGuard>)
        })
    }
}

struct SqlStateGuard {
    rt_handle: tokio::runtime::Handle,
    conn: Option<PoolConnection<Sqlite>>,
    userid: i64,
    state: UserState,
}

impl StateGuard for SqlStateGuard {
    fn state(&self) -> &UserState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut UserState {
        &mut self.state
    }

    fn commit(mut self: Box<Self>, state: UserState) -> Result<(), Error> {
        let handle = self.rt_handle.clone();
        let userid = self.userid;
        let mut conn = self.conn.take().expect("guard used after release");
        handle.block_on(async move {
            let json = serde_json::to_string(&state).map_err(|e| Error::verify_failed(e.to_string()))?;
            sqlx::query(
                "INSERT INTO state (userid, json) VALUES (?, ?)
                 ON CONFLICT(userid) DO UPDATE SET json = excluded.json",
            )
            .bind(userid)
            .bind(json)
            .execute(&mut *conn)
            .await
            .map_err(|e| Error::verify_failed(e.to_string()))?;
            sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .map_err(|e| Error::verify_failed(e.to_string()))?;
            Ok(())
        })
    }

    fn abort(mut self: Box<Self>) -> Result<(), Error> {
        let mut conn = self.conn.take().expect("guard used after release");
        self.rt_handle
            .block_on(async move { sqlx::query("ROLLBACK").execute(&mut *conn).await })
            .map(|_| ())
            .map_err(|e| Error::verify_failed(e.to_string()))
    }

    fn delete(mut self: Box<Self>) -> Result<(), Error> {
        let handle = self.rt_handle.clone();
        let userid = self.userid;
        let mut conn = self.conn.take().expect("guard used after release");
        handle.block_on(async move {
            sqlx::query("DELETE FROM state WHERE userid = ?")
                .bind(userid)
                .execute(&mut *conn)
                .await
                .map_err(|e| Error::verify_failed(e.to_string()))?;
            sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .map_err(|e| Error::verify_failed(e.to_string()))?;
            Ok(())
        })
    }
}

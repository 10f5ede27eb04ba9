use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::Role;

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredVoter {
    pub voter_id: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

/// Lowercase hex SHA-256 of a password, as stored in `voters.password_sha256`.
pub fn password_digest(password: &str) -> String {
    Sha256::digest(password.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    /// Inserts a voter, or replaces the password and role of an existing one.
    pub async fn upsert_voter(&self, voter_id: &str, password: &str, role: Role) -> Result<()> {
        let voter_id = voter_key(voter_id);
        if voter_id.is_empty() {
            return Err(anyhow!("voter id must not be empty"));
        }
        sqlx::query(
            "INSERT INTO voters (voter_id, password_sha256, role) VALUES (?, ?, ?)
             ON CONFLICT(voter_id) DO UPDATE SET
                password_sha256 = excluded.password_sha256,
                role = excluded.role",
        )
        .bind(voter_id)
        .bind(password_digest(password))
        .bind(role.to_string())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store voter '{voter_id}'"))?;
        Ok(())
    }

    /// Returns `false` when no such voter exists.
    pub async fn set_role(&self, voter_id: &str, role: Role) -> Result<bool> {
        let voter_id = voter_key(voter_id);
        let result = sqlx::query("UPDATE voters SET role = ? WHERE voter_id = ?")
            .bind(role.to_string())
            .bind(voter_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_voter(&self, voter_id: &str) -> Result<Option<StoredVoter>> {
        let voter_id = voter_key(voter_id);
        let row = sqlx::query("SELECT voter_id, role, created_at FROM voters WHERE voter_id = ?")
            .bind(voter_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            let role: String = row.get(1);
            let created_at: NaiveDateTime = row.get(2);
            Ok(StoredVoter {
                voter_id: row.get(0),
                role: parse_role(&role)?,
                created_at: created_at.and_utc(),
            })
        })
        .transpose()
    }

    /// Role of the voter when the password matches; `None` for unknown ids and wrong passwords alike.
    pub async fn verify_credentials(&self, voter_id: &str, password: &str) -> Result<Option<Role>> {
        let voter_id = voter_key(voter_id);
        let row = sqlx::query("SELECT role FROM voters WHERE voter_id = ? AND password_sha256 = ?")
            .bind(voter_id)
            .bind(password_digest(password))
            .fetch_optional(&self.pool)
            .await
            .context("credential lookup failed")?;
        row.map(|row| parse_role(&row.get::<String, _>(0))).transpose()
    }
}

/// Voter ids are stored and looked up without surrounding whitespace.
fn voter_key(voter_id: &str) -> &str {
    voter_id.trim()
}

fn parse_role(raw: &str) -> Result<Role> {
    Role::from_str(raw).map_err(|err| anyhow!("stored voter has {err}"))
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use thiserror::Error;

use crate::db::timestamp;
use crate::model::{Credentials, Session, User};

const BCRYPT_COST: u32 = 10;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Email and password are required")]
    MissingCredentials,

    #[error("Password must be at least 6 characters")]
    WeakPassword,

    #[error("User already registered")]
    AlreadyRegistered,

    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Email/password accounts and bearer sessions.
#[derive(Clone)]
pub struct AuthDatabase {
    pool: SqlitePool,
    cost: u32,
}

impl AuthDatabase {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cost: BCRYPT_COST,
        }
    }

    /// Use a different bcrypt cost; tests use the minimum to stay fast.
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    pub async fn sign_up(&self, credentials: Credentials) -> Result<User, AuthError> {
        let email = credentials.email.trim().to_lowercase();
        if email.is_empty() || credentials.password.is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        if credentials.password.len() < 6 {
            return Err(AuthError::WeakPassword);
        }

        let password_hash =
            bcrypt::hash(&credentials.password, self.cost).context("Failed to hash password")?;
        let id = uuid::Uuid::new_v4().to_string();
        let now = timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&email)
        .bind(&password_hash)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                tracing::info!("Registered user {}", id);
                Ok(User {
                    id,
                    email,
                    created_at: now,
                })
            }
            Err(e) if e.to_string().contains("UNIQUE constraint failed") => {
                Err(AuthError::AlreadyRegistered)
            }
            Err(e) => Err(AuthError::Other(
                anyhow::Error::new(e).context("Failed to insert user"),
            )),
        }
    }

    /// Check credentials and open a new session.
    pub async fn sign_in(&self, credentials: Credentials) -> Result<Session, AuthError> {
        let email = credentials.email.trim().to_lowercase();

        let row = sqlx::query_as::<_, (String, String, String, String)>(
            "SELECT id, email, password_hash, created_at FROM users WHERE email = ?",
        )
        .bind(&email)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch user")?;

        let Some((id, email, password_hash, created_at)) = row else {
            return Err(AuthError::InvalidCredentials);
        };

        if !bcrypt::verify(&credentials.password, &password_hash).unwrap_or(false) {
            return Err(AuthError::InvalidCredentials);
        }

        let token = uuid::Uuid::new_v4().simple().to_string();
        sqlx::query("INSERT INTO sessions (token, user_id, created_at) VALUES (?, ?, ?)")
            .bind(&token)
            .bind(&id)
            .bind(timestamp())
            .execute(&self.pool)
            .await
            .context("Failed to create session")?;

        tracing::debug!("Opened session for user {}", id);

        Ok(Session {
            access_token: token,
            user: User {
                id,
                email,
                created_at,
            },
        })
    }

    /// Resolve a bearer token to its user
    pub async fn current_user(&self, token: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, (String, String, String)>(
            r#"
            SELECT u.id, u.email, u.created_at
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token = ?
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to resolve session")?;

        Ok(row.map(|(id, email, created_at)| User {
            id,
            email,
            created_at,
        }))
    }
}

//! User accounts for the Roost gateway.
//!
//! SQLite-backed storage with argon2 password hashing and one-time email
//! verification codes.

use anyhow::{Context, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// User record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID
    pub id: String,
    /// Username for login
    pub username: String,
    /// Email address, targeted by the verification code
    pub email: String,
    /// Argon2 password hash (never exposed in API responses)
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Whether the email address has been verified
    pub verified: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last login timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<DateTime<Utc>>,
}

/// Request to create a new user.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// User store backed by SQLite.
#[derive(Clone)]
pub struct UserStore {
    conn: Arc<Mutex<Connection>>,
}

impl UserStore {
    /// Create a new user store at the given database path.
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                email TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                verification_code TEXT,
                verified INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                last_login_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);
            ",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create a new user. Returns the record and the one-time verification
    /// code to send to the user's email address.
    pub fn create(&self, request: &CreateUserRequest) -> Result<(User, String)> {
        if request.username.is_empty() {
            anyhow::bail!("Username cannot be empty");
        }
        if request.username.len() > 64 {
            anyhow::bail!("Username too long (max 64 characters)");
        }
        if !request.email.contains('@') {
            anyhow::bail!("Invalid email address");
        }
        if request.password.len() < 8 {
            anyhow::bail!("Password must be at least 8 characters");
        }

        let password_hash = hash_password(&request.password)?;
        let verification_code = generate_code();
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();

        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.execute(
            r"
            INSERT INTO users (id, username, email, password_hash, verification_code, verified, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6)
            ",
            params![
                id,
                request.username,
                request.email,
                password_hash,
                verification_code,
                now.to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to create user '{}'", request.username))?;

        Ok((
            User {
                id,
                username: request.username.clone(),
                email: request.email.clone(),
                password_hash,
                verified: false,
                created_at: now,
                last_login_at: None,
            },
            verification_code,
        ))
    }

    /// Get a user by ID.
    pub fn get(&self, id: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        self.get_internal(&conn, "id", id)
    }

    /// Get a user by username.
    pub fn get_by_username(&self, username: &str) -> Result<Option<User>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        self.get_internal(&conn, "username", username)
    }

    fn get_internal(&self, conn: &Connection, field: &str, value: &str) -> Result<Option<User>> {
        let query = format!(
            "SELECT id, username, email, password_hash, verified, created_at, last_login_at
             FROM users WHERE {field} = ?1"
        );

        conn.query_row(&query, params![value], |row| {
            let created_at: String = row.get(5)?;
            let last_login_at: Option<String> = row.get(6)?;

            Ok(User {
                id: row.get(0)?,
                username: row.get(1)?,
                email: row.get(2)?,
                password_hash: row.get(3)?,
                verified: row.get::<_, i64>(4)? != 0,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                last_login_at: last_login_at.and_then(|s| {
                    DateTime::parse_from_rfc3339(&s)
                        .map(|dt| dt.with_timezone(&Utc))
                        .ok()
                }),
            })
        })
        .optional()
        .with_context(|| format!("Failed to get user by {field} = {value}"))
    }

    /// Confirm the email verification code for a user. Returns whether the
    /// code matched; a match clears the code so it cannot be replayed.
    pub fn confirm_email(&self, username: &str, code: &str) -> Result<bool> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let rows = conn.execute(
            "UPDATE users SET verified = 1, verification_code = NULL
             WHERE username = ?1 AND verification_code = ?2",
            params![username, code],
        )?;
        Ok(rows > 0)
    }

    /// Verify a user's password and update last login time.
    pub fn verify_password(&self, username: &str, password: &str) -> Result<Option<User>> {
        let Some(user) = self.get_by_username(username)? else {
            return Ok(None);
        };

        if !verify_password(password, &user.password_hash)? {
            return Ok(None);
        }

        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.execute(
            "UPDATE users SET last_login_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), user.id],
        )?;

        drop(conn);
        self.get(&user.id)
    }

    /// Count total users.
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// Generate a 6-digit verification code.
fn generate_code() -> String {
    format!("{:06}", rand::thread_rng().gen_range(0..1_000_000))
}

/// Hash a password using Argon2.
fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// Verify a password against a hash.
fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("Invalid password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_store() -> (UserStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = UserStore::new(&dir.path().join("users.db")).unwrap();
        (store, dir)
    }

    fn request(username: &str) -> CreateUserRequest {
        CreateUserRequest {
            username: username.into(),
            email: format!("{username}@example.com"),
            password: "password123".into(),
        }
    }

    #[test]
    fn test_create_user() {
        let (store, _dir) = create_test_store();

        let (user, code) = store.create(&request("testuser")).unwrap();
        assert_eq!(user.username, "testuser");
        assert_eq!(user.email, "testuser@example.com");
        assert!(!user.verified);
        assert_eq!(code.len(), 6);
    }

    #[test]
    fn test_email_verification_flow() {
        let (store, _dir) = create_test_store();
        let (_, code) = store.create(&request("verifyme")).unwrap();

        assert!(!store.confirm_email("verifyme", "000000").unwrap() || code == "000000");
        assert!(store.confirm_email("verifyme", &code).unwrap());
        assert!(store.get_by_username("verifyme").unwrap().unwrap().verified);

        // The code is cleared after use and cannot be replayed.
        assert!(!store.confirm_email("verifyme", &code).unwrap());
    }

    #[test]
    fn test_verify_password() {
        let (store, _dir) = create_test_store();
        store.create(&request("authtest")).unwrap();

        let user = store.verify_password("authtest", "password123").unwrap();
        assert!(user.is_some());
        assert!(user.unwrap().last_login_at.is_some());

        assert!(store
            .verify_password("authtest", "wrongpassword")
            .unwrap()
            .is_none());
        assert!(store
            .verify_password("nonexistent", "password123")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_validation_rules() {
        let (store, _dir) = create_test_store();

        let mut bad = request("shortpw");
        bad.password = "short".into();
        assert!(store.create(&bad).is_err());

        let mut bad = request("bademail");
        bad.email = "not-an-email".into();
        assert!(store.create(&bad).is_err());

        let mut bad = request("x");
        bad.username = String::new();
        assert!(store.create(&bad).is_err());
    }

    #[test]
    fn test_duplicate_username_fails() {
        let (store, _dir) = create_test_store();
        store.create(&request("duplicate")).unwrap();
        assert!(store.create(&request("duplicate")).is_err());
    }

    #[test]
    fn test_count() {
        let (store, _dir) = create_test_store();
        assert_eq!(store.count().unwrap(), 0);
        store.create(&request("one")).unwrap();
        store.create(&request("two")).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_password_hashing() {
        let hash = hash_password("testpassword123").unwrap();
        assert!(!hash.contains("testpassword123"));
        assert!(verify_password("testpassword123", &hash).unwrap());
        assert!(!verify_password("wrongpassword", &hash).unwrap());
    }
}

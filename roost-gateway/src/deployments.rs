//! Bot deployment records for the Roost gateway.
//!
//! A deployment ties an owner to a named bot and its session id, and tracks
//! where the bot is in its lifecycle. The live connection state lives in
//! `roost-sessions`; this table is the durable record the API serves from.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Lifecycle state of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    /// Created, coins debited, not yet handed to the session manager.
    Pending,
    /// Session creation in flight.
    Deploying,
    /// Session created, waiting for the user to scan the pairing artifact.
    Pairing,
    /// Connected and serving.
    Active,
    /// Pairing or connection failed permanently; coins refunded.
    Failed,
    /// Stopped by the owner or logged out on the device.
    Stopped,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Deploying => "deploying",
            Self::Pairing => "pairing",
            Self::Active => "active",
            Self::Failed => "failed",
            Self::Stopped => "stopped",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "deploying" => Self::Deploying,
            "pairing" => Self::Pairing,
            "active" => Self::Active,
            "failed" => Self::Failed,
            _ => Self::Stopped,
        }
    }
}

/// Deployment record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub owner_user_id: String,
    /// Bot name chosen by the owner, unique per owner.
    pub name: String,
    /// Session id in the session manager and credential store.
    pub session_id: String,
    pub status: DeploymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Deployment store backed by SQLite.
#[derive(Clone)]
pub struct DeploymentStore {
    conn: Arc<Mutex<Connection>>,
}

impl DeploymentStore {
    /// Open (or create) the deployment store at the given database path.
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS deployments (
                id TEXT PRIMARY KEY,
                owner_user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                session_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(owner_user_id, name)
            );

            CREATE INDEX IF NOT EXISTS idx_deployments_owner ON deployments(owner_user_id);
            CREATE INDEX IF NOT EXISTS idx_deployments_session ON deployments(session_id);
            ",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create a new deployment in `Pending` state.
    pub fn create(&self, owner_user_id: &str, name: &str, session_id: &str) -> Result<Deployment> {
        if name.is_empty() {
            anyhow::bail!("Bot name cannot be empty");
        }
        if name.len() > 64 {
            anyhow::bail!("Bot name too long (max 64 characters)");
        }

        let now = Utc::now();
        let deployment = Deployment {
            id: Uuid::new_v4().to_string(),
            owner_user_id: owner_user_id.to_string(),
            name: name.to_string(),
            session_id: session_id.to_string(),
            status: DeploymentStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.execute(
            r"
            INSERT INTO deployments (id, owner_user_id, name, session_id, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ",
            params![
                deployment.id,
                deployment.owner_user_id,
                deployment.name,
                deployment.session_id,
                deployment.status.as_str(),
                now.to_rfc3339(),
                now.to_rfc3339(),
            ],
        )
        .with_context(|| format!("Failed to create deployment '{name}'"))?;

        Ok(deployment)
    }

    /// Get a deployment by id.
    pub fn get(&self, id: &str) -> Result<Option<Deployment>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.query_row(
            "SELECT id, owner_user_id, name, session_id, status, created_at, updated_at
             FROM deployments WHERE id = ?1",
            params![id],
            row_to_deployment,
        )
        .optional()
        .with_context(|| format!("Failed to get deployment {id}"))
    }

    /// Get a deployment by owner and bot name.
    pub fn get_by_name(&self, owner_user_id: &str, name: &str) -> Result<Option<Deployment>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.query_row(
            "SELECT id, owner_user_id, name, session_id, status, created_at, updated_at
             FROM deployments WHERE owner_user_id = ?1 AND name = ?2",
            params![owner_user_id, name],
            row_to_deployment,
        )
        .optional()
        .with_context(|| format!("Failed to get deployment '{name}'"))
    }

    /// List all deployments owned by a user, newest first.
    pub fn list_for_owner(&self, owner_user_id: &str) -> Result<Vec<Deployment>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let mut stmt = conn.prepare(
            "SELECT id, owner_user_id, name, session_id, status, created_at, updated_at
             FROM deployments WHERE owner_user_id = ?1 ORDER BY created_at DESC",
        )?;

        let deployments = stmt
            .query_map(params![owner_user_id], row_to_deployment)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list deployments")?;

        Ok(deployments)
    }

    /// List all deployments currently in `Active` or `Pairing` state, used to
    /// resume sessions after a gateway restart.
    pub fn list_resumable(&self) -> Result<Vec<Deployment>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let mut stmt = conn.prepare(
            "SELECT id, owner_user_id, name, session_id, status, created_at, updated_at
             FROM deployments WHERE status IN ('active', 'pairing') ORDER BY created_at",
        )?;

        let deployments = stmt
            .query_map([], row_to_deployment)?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to list resumable deployments")?;

        Ok(deployments)
    }

    /// Update a deployment's status. Returns whether a record was updated.
    pub fn set_status(&self, id: &str, status: DeploymentStatus) -> Result<bool> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let rows = conn.execute(
            "UPDATE deployments SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), id],
        )?;
        Ok(rows > 0)
    }

    /// Update status by session id, for lifecycle events that only know the
    /// session. Returns whether a record was updated.
    pub fn set_status_by_session(&self, session_id: &str, status: DeploymentStatus) -> Result<bool> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let rows = conn.execute(
            "UPDATE deployments SET status = ?1, updated_at = ?2 WHERE session_id = ?3",
            params![status.as_str(), Utc::now().to_rfc3339(), session_id],
        )?;
        Ok(rows > 0)
    }
}

fn row_to_deployment(row: &rusqlite::Row<'_>) -> rusqlite::Result<Deployment> {
    let status: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let updated_at: String = row.get(6)?;

    Ok(Deployment {
        id: row.get(0)?,
        owner_user_id: row.get(1)?,
        name: row.get(2)?,
        session_id: row.get(3)?,
        status: DeploymentStatus::parse(&status),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

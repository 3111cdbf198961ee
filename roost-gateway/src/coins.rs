//! Coin ledger for the Roost gateway.
//!
//! Every balance change is recorded as a ledger entry; balances are stored
//! denormalized per account and updated in the same transaction as the entry.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use roost_common::Error;

/// A single ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub user_id: String,
    /// Positive for credits, negative for debits.
    pub amount: i64,
    /// Human-readable reason, e.g. "signup bonus" or "bot deployment".
    pub reason: String,
    /// Counterparty user for transfers, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counterparty: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Coin ledger backed by SQLite.
#[derive(Clone)]
pub struct CoinLedger {
    conn: Arc<Mutex<Connection>>,
}

impl CoinLedger {
    /// Open (or create) the ledger at the given database path.
    pub fn new(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.execute_batch(
            r"
            CREATE TABLE IF NOT EXISTS balances (
                user_id TEXT PRIMARY KEY,
                balance INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS ledger (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                reason TEXT NOT NULL,
                counterparty TEXT,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_ledger_user ON ledger(user_id, created_at);
            ",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Current balance for a user. Unknown users have a zero balance.
    pub fn balance(&self, user_id: &str) -> Result<i64> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let balance: Option<i64> = conn
            .query_row(
                "SELECT balance FROM balances WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(balance.unwrap_or(0))
    }

    /// Credit coins to a user's balance.
    pub fn credit(&self, user_id: &str, amount: u64, reason: &str) -> Result<i64> {
        self.apply(user_id, amount as i64, reason, None)
            .map_err(Into::into)
    }

    /// Debit coins from a user's balance. Fails with
    /// [`Error::InsufficientFunds`] when the balance does not cover the
    /// amount; the balance is left untouched in that case.
    pub fn debit(&self, user_id: &str, amount: u64, reason: &str) -> Result<i64, Error> {
        self.apply(user_id, -(amount as i64), reason, None)
    }

    /// Transfer coins between users atomically.
    pub fn transfer(&self, from: &str, to: &str, amount: u64) -> Result<(), Error> {
        if amount == 0 {
            return Err(Error::InvalidInput("Transfer amount must be positive".into()));
        }
        if from == to {
            return Err(Error::InvalidInput("Cannot transfer to yourself".into()));
        }

        let mut conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(e.to_string()))?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Internal(e.to_string()))?;

        let from_balance = balance_in_tx(&tx, from)?;
        if from_balance < amount as i64 {
            return Err(Error::InsufficientFunds(format!(
                "Balance {} is less than transfer amount {}",
                from_balance, amount
            )));
        }

        record_in_tx(&tx, from, -(amount as i64), "transfer out", Some(to))?;
        record_in_tx(&tx, to, amount as i64, "transfer in", Some(from))?;

        tx.commit().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(())
    }

    /// Recent ledger entries for a user, newest first.
    pub fn history(&self, user_id: &str, limit: u32) -> Result<Vec<LedgerEntry>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, amount, reason, counterparty, created_at
             FROM ledger WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC LIMIT ?2",
        )?;

        let entries = stmt
            .query_map(params![user_id, limit], |row| {
                let created_at: String = row.get(5)?;
                Ok(LedgerEntry {
                    id: row.get(0)?,
                    user_id: row.get(1)?,
                    amount: row.get(2)?,
                    reason: row.get(3)?,
                    counterparty: row.get(4)?,
                    created_at: DateTime::parse_from_rfc3339(&created_at)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read ledger history")?;

        Ok(entries)
    }

    fn apply(
        &self,
        user_id: &str,
        amount: i64,
        reason: &str,
        counterparty: Option<&str>,
    ) -> Result<i64, Error> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| Error::Internal(e.to_string()))?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Internal(e.to_string()))?;

        let balance = balance_in_tx(&tx, user_id)?;
        let new_balance = balance + amount;
        if new_balance < 0 {
            return Err(Error::InsufficientFunds(format!(
                "Balance {} does not cover debit of {}",
                balance, -amount
            )));
        }

        record_in_tx(&tx, user_id, amount, reason, counterparty)?;
        tx.commit().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(new_balance)
    }
}

fn balance_in_tx(tx: &rusqlite::Transaction<'_>, user_id: &str) -> Result<i64, Error> {
    let balance: Option<i64> = tx
        .query_row(
            "SELECT balance FROM balances WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| Error::Internal(e.to_string()))?;
    Ok(balance.unwrap_or(0))
}

fn record_in_tx(
    tx: &rusqlite::Transaction<'_>,
    user_id: &str,
    amount: i64,
    reason: &str,
    counterparty: Option<&str>,
) -> Result<(), Error> {
    tx.execute(
        r"
        INSERT INTO balances (user_id, balance) VALUES (?1, ?2)
        ON CONFLICT(user_id) DO UPDATE SET balance = balance + ?2
        ",
        params![user_id, amount],
    )
    .map_err(|e| Error::Internal(e.to_string()))?;

    tx.execute(
        r"
        INSERT INTO ledger (id, user_id, amount, reason, counterparty, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ",
        params![
            Uuid::new_v4().to_string(),
            user_id,
            amount,
            reason,
            counterparty,
            Utc::now().to_rfc3339(),
        ],
    )
    .map_err(|e| Error::Internal(e.to_string()))?;

    Ok(())
}

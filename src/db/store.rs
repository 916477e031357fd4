//! SQLite state store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use super::models::*;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
}

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Thread-safe state store.
///
/// The store is the only shared mutable resource in the process; every
/// component goes through it, and each target row has exactly one writer
/// (its own probe task), except for `Notification.sent` which only the
/// dispatcher touches.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with the embedded schema.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/0001_init.sql"))
            .map_err(|e| DbError::Migration(format!("schema init failed: {}", e)))?;
        Ok(())
    }

    // --- Target CRUD ---

    /// Add a new target and return its ID.
    pub fn add_target(&self, target: &mut Target) -> Result<i64, DbError> {
        if target.check_interval <= 0 {
            target.check_interval = 60;
        }

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO targets (kind, url, name, check_interval, notify_email, status, consecutive_failures, alerted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                target.kind.as_str(),
                target.url,
                target.name,
                target.check_interval,
                target.notify_email,
                target.status.as_str(),
                target.consecutive_failures,
                target.alerted,
            ],
        )?;
        let id = conn.last_insert_rowid();
        target.id = id;
        Ok(id)
    }

    /// Get a target by ID.
    pub fn get_target(&self, id: i64) -> Result<Target, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{} WHERE id = ?1", SELECT_TARGET),
            params![id],
            target_from_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => DbError::NotFound,
            other => DbError::Sqlite(other),
        })
    }

    /// Get a target by its URL (unique key), if present.
    pub fn get_target_by_url(&self, url: &str) -> Result<Option<Target>, DbError> {
        let conn = self.conn.lock().unwrap();
        match conn.query_row(
            &format!("{} WHERE url = ?1", SELECT_TARGET),
            params![url],
            target_from_row,
        ) {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Get all targets.
    pub fn get_targets(&self) -> Result<Vec<Target>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{} ORDER BY id", SELECT_TARGET))?;
        let targets = stmt
            .query_map([], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(targets)
    }

    /// Get all targets of one kind.
    pub fn targets_by_kind(&self, kind: TargetKind) -> Result<Vec<Target>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{} WHERE kind = ?1 ORDER BY id", SELECT_TARGET))?;
        let targets = stmt
            .query_map(params![kind.as_str()], target_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(targets)
    }

    /// Delete a target and its logs and notifications.
    pub fn delete_target(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM logs WHERE target_id = ?1", params![id])?;
        conn.execute("DELETE FROM notifications WHERE target_id = ?1", params![id])?;
        conn.execute("DELETE FROM targets WHERE id = ?1", params![id])?;
        Ok(())
    }

    // --- Probe outcomes ---

    /// Apply one probe outcome atomically: update the target row, append the
    /// log entry, and optionally enqueue a notification.
    pub fn record_outcome(
        &self,
        target_id: i64,
        update: &ProbeOutcomeUpdate,
        log: &NewLogEntry,
        notification: Option<&str>,
    ) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            "UPDATE targets SET
                 status = ?1,
                 consecutive_failures = ?2,
                 alerted = ?3,
                 last_check = ?4,
                 response_time = COALESCE(?5, response_time),
                 name = COALESCE(name, ?6)
             WHERE id = ?7",
            params![
                update.status.as_str(),
                update.consecutive_failures,
                update.alerted,
                update.last_check.format(TIME_FORMAT).to_string(),
                update.response_time,
                update.name,
                target_id,
            ],
        )?;

        tx.execute(
            "INSERT INTO logs (target_id, status, response_time, message) VALUES (?1, ?2, ?3, ?4)",
            params![target_id, log.status.as_str(), log.response_time, log.message],
        )?;

        if let Some(message) = notification {
            tx.execute(
                "INSERT INTO notifications (target_id, message, sent) VALUES (?1, ?2, 0)",
                params![target_id, message],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    // --- Logs ---

    /// Append a log entry outside of a probe outcome.
    pub fn add_log(&self, target_id: i64, log: &NewLogEntry) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO logs (target_id, status, response_time, message) VALUES (?1, ?2, ?3, ?4)",
            params![target_id, log.status.as_str(), log.response_time, log.message],
        )?;
        Ok(())
    }

    /// Delete log entries older than the cutoff. Returns the number removed.
    pub fn delete_logs_before(&self, cutoff: DateTime<Utc>) -> Result<usize, DbError> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM logs WHERE created_at < ?1",
            params![cutoff.format(TIME_FORMAT).to_string()],
        )?;
        Ok(deleted)
    }

    /// Fraction of logged probes since `since` that were up, as a percentage.
    /// `None` when the target has no logs in the window.
    pub fn uptime_percent(
        &self,
        target_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Option<f64>, DbError> {
        let conn = self.conn.lock().unwrap();
        let (total, up): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(status = 'up'), 0) FROM logs
             WHERE target_id = ?1 AND created_at >= ?2",
            params![target_id, since.format(TIME_FORMAT).to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        if total == 0 {
            Ok(None)
        } else {
            Ok(Some(up as f64 * 100.0 / total as f64))
        }
    }

    // --- Notifications ---

    /// Enqueue a notification for later delivery.
    pub fn add_notification(&self, target_id: i64, message: &str) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO notifications (target_id, message, sent) VALUES (?1, ?2, 0)",
            params![target_id, message],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// All undelivered notifications, oldest first.
    pub fn pending_notifications(&self) -> Result<Vec<Notification>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, target_id, message, sent, error, created_at FROM notifications
             WHERE sent = 0 ORDER BY created_at ASC, id ASC",
        )?;
        let notifications = stmt
            .query_map([], notification_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(notifications)
    }

    /// Record a delivery attempt. On success the notification leaves the
    /// pending set; on failure the error is kept and it stays pending.
    pub fn mark_notification_sent(
        &self,
        id: i64,
        sent: bool,
        error: Option<&str>,
    ) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE notifications SET sent = ?1, error = ?2 WHERE id = ?3",
            params![sent, error, id],
        )?;
        Ok(())
    }

    // --- Stats ---

    /// Per-status target counts for the federation health snapshot.
    pub fn target_stats(&self) -> Result<TargetStats, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM targets WHERE kind = 'service' GROUP BY status")?;
        let mut stats = TargetStats::default();
        let rows = stmt.query_map([], |row| {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            Ok((status, count))
        })?;
        for row in rows {
            let (status, count) = row?;
            stats.total += count;
            match TargetStatus::parse(&status) {
                Some(TargetStatus::Up) => stats.up += count,
                Some(TargetStatus::Down) => stats.down += count,
                _ => stats.unknown += count,
            }
        }
        Ok(stats)
    }
}

const SELECT_TARGET: &str = "SELECT id, kind, url, name, check_interval, notify_email, status, \
                             consecutive_failures, alerted, response_time, last_check FROM targets";

fn target_from_row(row: &Row<'_>) -> SqlResult<Target> {
    let kind_str: String = row.get(1)?;
    let status_str: String = row.get(6)?;
    let last_check: Option<String> = row.get(10)?;
    Ok(Target {
        id: row.get(0)?,
        kind: TargetKind::parse(&kind_str).ok_or_else(|| bad_column(1, &kind_str))?,
        url: row.get(2)?,
        name: row.get(3)?,
        check_interval: row.get(4)?,
        notify_email: row.get(5)?,
        status: TargetStatus::parse(&status_str).ok_or_else(|| bad_column(6, &status_str))?,
        consecutive_failures: row.get(7)?,
        alerted: row.get(8)?,
        response_time: row.get(9)?,
        last_check: last_check.as_deref().and_then(parse_db_time),
    })
}

fn notification_from_row(row: &Row<'_>) -> SqlResult<Notification> {
    let created_at: String = row.get(5)?;
    Ok(Notification {
        id: row.get(0)?,
        target_id: row.get(1)?,
        message: row.get(2)?,
        sent: row.get(3)?,
        error: row.get(4)?,
        created_at: parse_db_time(&created_at).unwrap_or_else(Utc::now),
    })
}

fn bad_column(idx: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unexpected value: {}", value).into(),
    )
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

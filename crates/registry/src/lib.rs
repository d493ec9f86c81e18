//! Durable SQLite-backed Subscription Registry (C8).
//!
//! # Schema
//! `desired_subscriptions`, `active_subscriptions`, `hub_state`,
//! `worker_registrations`, `worker_metrics`, `telemetry_llm_usage`,
//! `audit_log` — see `schema.sql`.
//!
//! # Durability
//! Applied at open: WAL, synchronous=FULL, foreign_keys=ON.
//! `PRAGMA integrity_check` runs at open and fails the open on corruption.
//!
//! # Concurrency
//! A `Registry` is owned by a single task per process (the Hub's reconcile
//! loop, the Monitor's writer task). It is not `Sync`; callers needing
//! access from multiple tasks confine it behind a channel or a mutex with a
//! bounded critical section, never holding it open across an `await` that
//! performs network I/O.

mod error;
mod types;

pub use error::RegistryError;
pub use types::{
    ActiveSubscription, ActiveStatus, AuditEntry, DesiredSubscription, WorkerRegistration, WorkerStatus,
};

use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub struct Registry {
    conn: Connection,
}

impl Registry {
    /// Open (or create) the registry at `path`. Runs `PRAGMA integrity_check`
    /// and creates tables if needed; returns `Err` if the file is corrupt.
    pub fn open(path: &Path) -> Result<Self, RegistryError> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        run_integrity_check(&conn)?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self { conn })
    }

    /// An in-memory registry, for tests and short-lived processes.
    pub fn open_in_memory() -> Result<Self, RegistryError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(Self { conn })
    }

    // -----------------------------------------------------------------
    // Desired subscriptions
    // -----------------------------------------------------------------

    /// Upsert a Desired row (I1: unique on channel_id+topic).
    pub fn upsert_desired(
        &mut self,
        channel_id: &str,
        topic: &str,
        version: &str,
        transport: &str,
    ) -> Result<(), RegistryError> {
        let now = now_rfc3339();
        self.conn.execute(
            "INSERT INTO desired_subscriptions
                 (channel_id, topic, version, transport, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT(channel_id, topic) DO UPDATE SET
                 version = excluded.version,
                 transport = excluded.transport,
                 updated_at = excluded.updated_at",
            params![channel_id, topic, version, transport, now],
        )?;
        Ok(())
    }

    pub fn delete_desired(&mut self, channel_id: &str, topic: &str) -> Result<(), RegistryError> {
        self.conn.execute(
            "DELETE FROM desired_subscriptions WHERE channel_id = ?1 AND topic = ?2",
            params![channel_id, topic],
        )?;
        Ok(())
    }

    /// Remove every Desired row for a channel (channel shutdown/removal).
    pub fn delete_desired_for_channel(&mut self, channel_id: &str) -> Result<(), RegistryError> {
        self.conn.execute(
            "DELETE FROM desired_subscriptions WHERE channel_id = ?1",
            params![channel_id],
        )?;
        Ok(())
    }

    pub fn list_desired(&self) -> Result<Vec<DesiredSubscription>, RegistryError> {
        let mut stmt = self.conn.prepare(
            "SELECT channel_id, topic, version, transport, created_at, updated_at
             FROM desired_subscriptions ORDER BY channel_id, topic",
        )?;
        let rows = stmt.query_map([], map_desired)?;
        collect(rows)
    }

    // -----------------------------------------------------------------
    // Active subscriptions
    // -----------------------------------------------------------------

    pub fn upsert_active(
        &mut self,
        channel_id: &str,
        topic: &str,
        upstream_id: &str,
        status: ActiveStatus,
        cost: i64,
    ) -> Result<(), RegistryError> {
        let now = now_rfc3339();
        self.conn.execute(
            "INSERT INTO active_subscriptions
                 (channel_id, topic, upstream_id, status, cost, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             ON CONFLICT(channel_id, topic) DO UPDATE SET
                 upstream_id = excluded.upstream_id,
                 status = excluded.status,
                 cost = excluded.cost,
                 updated_at = excluded.updated_at",
            params![channel_id, topic, upstream_id, status.as_str(), cost, now],
        )?;
        Ok(())
    }

    pub fn delete_active(&mut self, channel_id: &str, topic: &str) -> Result<(), RegistryError> {
        self.conn.execute(
            "DELETE FROM active_subscriptions WHERE channel_id = ?1 AND topic = ?2",
            params![channel_id, topic],
        )?;
        Ok(())
    }

    /// Delete an Active row by its upstream id, used for revocation handling
    /// where the Hub knows the upstream id but not necessarily the topic.
    pub fn delete_active_by_upstream_id(
        &mut self,
        upstream_id: &str,
    ) -> Result<Option<(String, String)>, RegistryError> {
        let found: Option<(String, String)> = self
            .conn
            .query_row(
                "SELECT channel_id, topic FROM active_subscriptions WHERE upstream_id = ?1",
                params![upstream_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((channel_id, topic)) = &found {
            self.conn.execute(
                "DELETE FROM active_subscriptions WHERE channel_id = ?1 AND topic = ?2",
                params![channel_id, topic],
            )?;
        }
        Ok(found)
    }

    pub fn list_active(&self) -> Result<Vec<ActiveSubscription>, RegistryError> {
        let mut stmt = self.conn.prepare(
            "SELECT channel_id, topic, upstream_id, status, cost, created_at, updated_at
             FROM active_subscriptions ORDER BY channel_id, topic",
        )?;
        let rows = stmt.query_map([], map_active)?;
        collect(rows)
    }

    /// Delete every Active row (used when a new upstream session forces
    /// recreation of the whole set, §4.5.2).
    pub fn clear_active(&mut self) -> Result<(), RegistryError> {
        self.conn.execute("DELETE FROM active_subscriptions", [])?;
        Ok(())
    }

    /// A consistent snapshot of Desired and Active, read within a single
    /// transaction, per §4.6's atomicity requirement for reconciliation.
    pub fn snapshot(
        &mut self,
    ) -> Result<(Vec<DesiredSubscription>, Vec<ActiveSubscription>), RegistryError> {
        let tx = self.conn.transaction()?;
        let desired = {
            let mut stmt = tx.prepare(
                "SELECT channel_id, topic, version, transport, created_at, updated_at
                 FROM desired_subscriptions ORDER BY channel_id, topic",
            )?;
            collect(stmt.query_map([], map_desired)?)?
        };
        let active = {
            let mut stmt = tx.prepare(
                "SELECT channel_id, topic, upstream_id, status, cost, created_at, updated_at
                 FROM active_subscriptions ORDER BY channel_id, topic",
            )?;
            collect(stmt.query_map([], map_active)?)?
        };
        tx.commit()?;
        Ok((desired, active))
    }

    // -----------------------------------------------------------------
    // Hub state key-value
    // -----------------------------------------------------------------

    pub fn get_hub_state(&self, key: &str) -> Result<Option<String>, RegistryError> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM hub_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_hub_state(&mut self, key: &str, value: &str) -> Result<(), RegistryError> {
        self.conn.execute(
            "INSERT INTO hub_state (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Parse `key` as an integer counter, add `delta`, and store it back.
    /// Missing/unparseable values start from 0. Returns the new value.
    pub fn increment_hub_state_counter(&mut self, key: &str, delta: i64) -> Result<i64, RegistryError> {
        let current: i64 = self.get_hub_state(key)?.and_then(|v| v.parse().ok()).unwrap_or(0);
        let next = current + delta;
        self.set_hub_state(key, &next.to_string())?;
        Ok(next)
    }

    // -----------------------------------------------------------------
    // Worker registrations
    // -----------------------------------------------------------------

    pub fn upsert_worker_registration(
        &mut self,
        channel: &str,
        pid: u32,
        features_json: &str,
    ) -> Result<(), RegistryError> {
        let now = now_rfc3339();
        self.conn.execute(
            "INSERT INTO worker_registrations
                 (channel, pid, features, registered_at, last_heartbeat, status)
             VALUES (?1, ?2, ?3, ?4, ?4, 'online')
             ON CONFLICT(channel) DO UPDATE SET
                 pid = excluded.pid,
                 features = excluded.features,
                 registered_at = excluded.registered_at,
                 last_heartbeat = excluded.last_heartbeat,
                 status = 'online'",
            params![channel, pid, features_json, now],
        )?;
        Ok(())
    }

    pub fn record_heartbeat(&mut self, channel: &str, pid: u32) -> Result<(), RegistryError> {
        let now = now_rfc3339();
        self.conn.execute(
            "UPDATE worker_registrations
             SET last_heartbeat = ?3, status = 'online'
             WHERE channel = ?1 AND pid = ?2",
            params![channel, pid, now],
        )?;
        Ok(())
    }

    pub fn mark_worker_offline(&mut self, channel: &str, pid: u32) -> Result<(), RegistryError> {
        self.conn.execute(
            "UPDATE worker_registrations SET status = 'offline' WHERE channel = ?1 AND pid = ?2",
            params![channel, pid],
        )?;
        Ok(())
    }

    pub fn append_worker_metric(
        &mut self,
        channel: &str,
        pid: u32,
        rss_mb: Option<f64>,
        cpu_pct: Option<f64>,
    ) -> Result<(), RegistryError> {
        let now = now_rfc3339();
        self.conn.execute(
            "INSERT INTO worker_metrics (channel, pid, rss_mb, cpu_pct, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![channel, pid, rss_mb, cpu_pct, now],
        )?;
        Ok(())
    }

    pub fn list_worker_registrations(&self) -> Result<Vec<WorkerRegistration>, RegistryError> {
        let mut stmt = self.conn.prepare(
            "SELECT channel, pid, features, registered_at, last_heartbeat, status
             FROM worker_registrations ORDER BY channel",
        )?;
        let rows = stmt.query_map([], map_worker_registration)?;
        collect(rows)
    }

    /// Idempotently flip any registration whose `last_heartbeat` is older
    /// than `stale_timeout_secs` from `online` to `stale`. Returns the
    /// channels that were flipped (for audit logging).
    pub fn sweep_stale_workers(
        &mut self,
        stale_timeout_secs: i64,
    ) -> Result<Vec<String>, RegistryError> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::seconds(stale_timeout_secs))
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let mut stmt = self.conn.prepare(
            "SELECT channel FROM worker_registrations
             WHERE status = 'online' AND last_heartbeat < ?1",
        )?;
        let channels: Vec<String> = stmt
            .query_map(params![cutoff], |row| row.get(0))?
            .collect::<Result<_, _>>()?;
        drop(stmt);
        if !channels.is_empty() {
            self.conn.execute(
                "UPDATE worker_registrations SET status = 'stale'
                 WHERE status = 'online' AND last_heartbeat < ?1",
                params![cutoff],
            )?;
        }
        Ok(channels)
    }

    // -----------------------------------------------------------------
    // Telemetry
    // -----------------------------------------------------------------

    pub fn append_telemetry_llm_usage(
        &mut self,
        channel: &str,
        model: &str,
        feature: &str,
        tokens_in: i64,
        tokens_out: i64,
        latency_ms: i64,
        estimated_cost: f64,
    ) -> Result<(), RegistryError> {
        let now = now_rfc3339();
        self.conn.execute(
            "INSERT INTO telemetry_llm_usage
                 (ts, channel, model, feature, tokens_in, tokens_out, latency_ms, estimated_cost)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![now, channel, model, feature, tokens_in, tokens_out, latency_ms, estimated_cost],
        )?;
        Ok(())
    }

    /// Remove telemetry and metric rows older than `retention_days`.
    /// Returns the number of rows deleted.
    pub fn prune_telemetry_older_than(&mut self, retention_days: i64) -> Result<i64, RegistryError> {
        let cutoff = (chrono::Utc::now() - chrono::Duration::days(retention_days))
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
        let a = self.conn.execute(
            "DELETE FROM telemetry_llm_usage WHERE ts < ?1",
            params![cutoff],
        )?;
        let b = self.conn.execute(
            "DELETE FROM worker_metrics WHERE recorded_at < ?1",
            params![cutoff],
        )?;
        Ok((a + b) as i64)
    }

    // -----------------------------------------------------------------
    // Audit log
    // -----------------------------------------------------------------

    pub fn append_audit(&mut self, event: &str, detail: &str) -> Result<(), RegistryError> {
        let now = now_rfc3339();
        self.conn.execute(
            "INSERT INTO audit_log (ts, event, detail) VALUES (?1, ?2, ?3)",
            params![now, event, detail],
        )?;
        Ok(())
    }

    /// Most recent audit entries, newest last. Operator tooling and tests use
    /// this to confirm a structured event was actually recorded.
    pub fn list_audit(&self, limit: u32) -> Result<Vec<AuditEntry>, RegistryError> {
        let mut stmt = self.conn.prepare(
            "SELECT ts, event, detail FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let mut rows: Vec<AuditEntry> = stmt
            .query_map(params![limit], |row| {
                Ok(AuditEntry {
                    ts: row.get(0)?,
                    event: row.get(1)?,
                    detail: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.reverse();
        Ok(rows)
    }
}

// -----------------------------------------------------------------
// Private helpers
// -----------------------------------------------------------------

fn apply_pragmas(conn: &Connection) -> Result<(), RegistryError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=FULL;
         PRAGMA foreign_keys=ON;",
    )?;
    Ok(())
}

fn run_integrity_check(conn: &Connection) -> Result<(), RegistryError> {
    let result: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if result != "ok" {
        return Err(RegistryError::IntegrityCheckFailed(result));
    }
    Ok(())
}

/// RFC3339 with a `Z` suffix and second precision, so stored timestamps
/// compare correctly as plain strings (used by the stale/retention sweeps).
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

fn collect<T>(rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>) -> Result<Vec<T>, RegistryError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn map_desired(row: &rusqlite::Row<'_>) -> rusqlite::Result<DesiredSubscription> {
    Ok(DesiredSubscription {
        channel_id: row.get(0)?,
        topic: row.get(1)?,
        version: row.get(2)?,
        transport: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn map_active(row: &rusqlite::Row<'_>) -> rusqlite::Result<ActiveSubscription> {
    let status: String = row.get(3)?;
    Ok(ActiveSubscription {
        channel_id: row.get(0)?,
        topic: row.get(1)?,
        upstream_id: row.get(2)?,
        status: ActiveStatus::from_str(&status),
        cost: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

fn map_worker_registration(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkerRegistration> {
    let status: String = row.get(5)?;
    Ok(WorkerRegistration {
        channel: row.get(0)?,
        pid: row.get(1)?,
        features_json: row.get(2)?,
        registered_at: row.get(3)?,
        last_heartbeat: row.get(4)?,
        status: WorkerStatus::from_str(&status),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reg() -> Registry {
        Registry::open_in_memory().unwrap()
    }

    #[test]
    fn desired_upsert_is_idempotent_on_channel_and_topic() {
        let mut r = reg();
        r.upsert_desired("100", "stream.online", "1", "websocket").unwrap();
        r.upsert_desired("100", "stream.online", "2", "websocket").unwrap();
        let all = r.list_desired().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].version, "2");
    }

    #[test]
    fn snapshot_reflects_desired_minus_active_as_to_create() {
        let mut r = reg();
        r.upsert_desired("100", "stream.online", "1", "websocket").unwrap();
        r.upsert_desired("200", "stream.online", "1", "websocket").unwrap();
        r.upsert_active("200", "stream.online", "up-1", ActiveStatus::Enabled, 1).unwrap();

        let (desired, active) = r.snapshot().unwrap();
        assert_eq!(desired.len(), 2);
        assert_eq!(active.len(), 1);

        let to_create: Vec<_> = desired
            .iter()
            .filter(|d| !active.iter().any(|a| a.channel_id == d.channel_id && a.topic == d.topic))
            .collect();
        assert_eq!(to_create.len(), 1);
        assert_eq!(to_create[0].channel_id, "100");
    }

    #[test]
    fn hub_state_round_trips() {
        let mut r = reg();
        assert_eq!(r.get_hub_state("ws_state").unwrap(), None);
        r.set_hub_state("ws_state", "connected").unwrap();
        assert_eq!(r.get_hub_state("ws_state").unwrap(), Some("connected".to_owned()));
        r.set_hub_state("ws_state", "down").unwrap();
        assert_eq!(r.get_hub_state("ws_state").unwrap(), Some("down".to_owned()));
    }

    #[test]
    fn sweep_stale_workers_flips_only_expired_registrations() {
        let mut r = reg();
        r.upsert_worker_registration("c1", 100, "{}").unwrap();
        // Simulate an old heartbeat directly.
        r.conn
            .execute(
                "UPDATE worker_registrations SET last_heartbeat = '2000-01-01T00:00:00Z' WHERE channel = 'c1'",
                [],
            )
            .unwrap();
        r.upsert_worker_registration("c2", 101, "{}").unwrap();

        let flipped = r.sweep_stale_workers(60).unwrap();
        assert_eq!(flipped, vec!["c1".to_owned()]);

        let all = r.list_worker_registrations().unwrap();
        let c1 = all.iter().find(|w| w.channel == "c1").unwrap();
        let c2 = all.iter().find(|w| w.channel == "c2").unwrap();
        assert_eq!(c1.status, WorkerStatus::Stale);
        assert_eq!(c2.status, WorkerStatus::Online);
    }

    #[test]
    fn delete_active_by_upstream_id_supports_revocation_handling() {
        let mut r = reg();
        r.upsert_active("100", "stream.online", "up-1", ActiveStatus::Enabled, 1).unwrap();
        let found = r.delete_active_by_upstream_id("up-1").unwrap();
        assert_eq!(found, Some(("100".to_owned(), "stream.online".to_owned())));
        assert!(r.list_active().unwrap().is_empty());
    }

    #[test]
    fn clear_active_drops_every_row_for_session_recreation() {
        let mut r = reg();
        r.upsert_active("100", "a", "up-1", ActiveStatus::Enabled, 1).unwrap();
        r.upsert_active("200", "b", "up-2", ActiveStatus::Enabled, 1).unwrap();
        r.clear_active().unwrap();
        assert!(r.list_active().unwrap().is_empty());
    }

    #[test]
    fn audit_log_records_entries_in_order() {
        let mut r = reg();
        r.append_audit("bot_start", "channel=100").unwrap();
        r.append_audit("bot_crash", "channel=100").unwrap();
        let entries = r.list_audit(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event, "bot_start");
        assert_eq!(entries[1].event, "bot_crash");
    }

    #[test]
    fn list_audit_respects_limit_and_returns_newest_within_it() {
        let mut r = reg();
        for i in 0..5 {
            r.append_audit("tick", &format!("n={i}")).unwrap();
        }
        let entries = r.list_audit(2).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].detail, "n=3");
        assert_eq!(entries[1].detail, "n=4");
    }
}

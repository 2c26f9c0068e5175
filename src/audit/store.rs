//! SQLite persistence for the audit chain.
//!
//! Writes are serialized per tenant: the head read and the insert happen
//! under a per-tenant mutex, with the unique `(tenant_id, sequence_number)`
//! index as the backstop and a bounded retry on conflict. Cross-tenant
//! writes proceed in parallel.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{
    classify_event, compute_record_hash, AuditActor, AuditCategory, AuditInput, AuditOutcome,
    AuditRecord, AuditSeverity, AuditTarget,
};
use crate::errors::AuditError;

const SEQUENCE_RETRY_LIMIT: u32 = 5;

/// Filters for audit queries. Unset fields do not constrain.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub tenant_id: String,
    pub event_type: Option<String>,
    pub category: Option<AuditCategory>,
    pub severity: Option<AuditSeverity>,
    pub actor_id: Option<String>,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
    pub trace_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl AuditQuery {
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            limit: 100,
            ..Default::default()
        }
    }
}

/// One page of query results.
#[derive(Debug, Clone)]
pub struct QueryPage {
    pub records: Vec<AuditRecord>,
    pub total: usize,
    pub has_more: bool,
}

/// The SQLite-backed audit store.
#[derive(Debug, Clone)]
pub struct AuditStore {
    db_path: PathBuf,
    /// Per-tenant write locks guarding the head read + insert.
    tenant_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl AuditStore {
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let store = Self {
            db_path: db_path.as_ref().to_path_buf(),
            tenant_locks: Arc::new(DashMap::new()),
        };
        store.initialize_db()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, AuditError> {
        let conn = Connection::open(&self.db_path)?;
        // Durable writes: the caller must never see an allow without a
        // committed audit record.
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(conn)
    }

    fn initialize_db(&self) -> Result<(), AuditError> {
        let conn = self.open()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS audit_records (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                event_category TEXT NOT NULL,
                severity TEXT NOT NULL,
                actor_type TEXT NOT NULL,
                actor_id TEXT NOT NULL,
                actor_name TEXT,
                actor_ip TEXT,
                target_type TEXT,
                target_id TEXT,
                target_name TEXT,
                request_id TEXT,
                trace_id TEXT,
                span_id TEXT,
                action TEXT NOT NULL,
                outcome TEXT NOT NULL,
                reason TEXT,
                before_state TEXT,
                after_state TEXT,
                diff_state TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                tags TEXT NOT NULL DEFAULT '[]',
                sequence_number INTEGER NOT NULL,
                previous_hash TEXT,
                record_hash TEXT NOT NULL,
                event_time TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                archived INTEGER NOT NULL DEFAULT 0,
                archived_at TEXT
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_audit_tenant_seq
                ON audit_records(tenant_id, sequence_number);
            CREATE INDEX IF NOT EXISTS idx_audit_tenant_time
                ON audit_records(tenant_id, event_time);
            CREATE INDEX IF NOT EXISTS idx_audit_tenant_target
                ON audit_records(tenant_id, target_type, target_id);
            CREATE INDEX IF NOT EXISTS idx_audit_tenant_trace
                ON audit_records(tenant_id, trace_id);",
        )?;
        Ok(())
    }

    fn tenant_lock(&self, tenant_id: &str) -> Arc<Mutex<()>> {
        self.tenant_locks
            .entry(tenant_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Append one record: derive category and severity, allocate the next
    /// sequence number, bind the previous hash, compute the record hash,
    /// and insert. Synchronous commit; any failure means no record.
    pub fn append(&self, input: &AuditInput) -> Result<AuditRecord, AuditError> {
        let lock = self.tenant_lock(&input.tenant_id);
        let _guard = lock.lock();

        let (category, table_severity) = classify_event(&input.event_type);
        let severity = input.severity.unwrap_or(table_severity);
        let event_time = input.event_time.unwrap_or_else(Utc::now);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let conn = self.open()?;
            let head: Option<(i64, String)> = conn
                .query_row(
                    "SELECT sequence_number, record_hash FROM audit_records
                     WHERE tenant_id = ?1
                     ORDER BY sequence_number DESC LIMIT 1",
                    params![input.tenant_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;

            let (sequence_number, previous_hash) = match head {
                Some((seq, hash)) => (seq + 1, Some(hash)),
                None => (1, None),
            };

            let record_hash = compute_record_hash(
                &input.tenant_id,
                &input.event_type,
                &input.actor,
                input.target.as_ref(),
                &input.action,
                input.outcome,
                sequence_number,
                previous_hash.as_deref(),
                event_time,
            );

            let record = AuditRecord {
                id: uuid::Uuid::new_v4().to_string(),
                tenant_id: input.tenant_id.clone(),
                event_type: input.event_type.clone(),
                event_category: category,
                severity,
                actor: input.actor.clone(),
                target: input.target.clone(),
                request_id: input.request_id.clone(),
                trace_id: input.trace_id.clone(),
                span_id: input.span_id.clone(),
                action: input.action.clone(),
                outcome: input.outcome,
                reason: input.reason.clone(),
                before_state: input.before_state.clone(),
                after_state: input.after_state.clone(),
                diff_state: input.diff_state.clone(),
                metadata: input.metadata.clone(),
                tags: input.tags.clone(),
                sequence_number,
                previous_hash,
                record_hash,
                event_time,
                recorded_at: Utc::now(),
                archived: false,
                archived_at: None,
            };

            match self.insert_row(&conn, &record) {
                Ok(()) => return Ok(record),
                Err(AuditError::Sqlite(rusqlite::Error::SqliteFailure(e, _)))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation
                        && attempt < SEQUENCE_RETRY_LIMIT =>
                {
                    log::warn!(
                        "audit sequence conflict for tenant {} at seq {}, retrying ({attempt})",
                        input.tenant_id,
                        sequence_number
                    );
                    continue;
                }
                Err(AuditError::Sqlite(rusqlite::Error::SqliteFailure(e, _)))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    return Err(AuditError::SequenceContention {
                        tenant_id: input.tenant_id.clone(),
                        attempts: attempt,
                    });
                }
                Err(other) => return Err(other),
            }
        }
    }

    fn insert_row(&self, conn: &Connection, record: &AuditRecord) -> Result<(), AuditError> {
        let metadata = serde_json::to_string(&record.metadata)
            .map_err(|e| AuditError::Storage { message: e.to_string() })?;
        let tags = serde_json::to_string(&record.tags)
            .map_err(|e| AuditError::Storage { message: e.to_string() })?;
        let state = |v: &Option<serde_json::Value>| v.as_ref().map(|s| s.to_string());

        conn.execute(
            "INSERT INTO audit_records (
                id, tenant_id, event_type, event_category, severity,
                actor_type, actor_id, actor_name, actor_ip,
                target_type, target_id, target_name,
                request_id, trace_id, span_id,
                action, outcome, reason,
                before_state, after_state, diff_state,
                metadata, tags,
                sequence_number, previous_hash, record_hash,
                event_time, recorded_at, archived, archived_at
            ) VALUES (
                ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26,
                ?27, ?28, 0, NULL
            )",
            params![
                record.id,
                record.tenant_id,
                record.event_type,
                record.event_category.as_str(),
                record.severity.as_str(),
                record.actor.actor_type,
                record.actor.id,
                record.actor.name,
                record.actor.ip,
                record.target.as_ref().map(|t| t.target_type.clone()),
                record.target.as_ref().map(|t| t.id.clone()),
                record.target.as_ref().and_then(|t| t.name.clone()),
                record.request_id,
                record.trace_id,
                record.span_id,
                record.action,
                record.outcome.as_str(),
                record.reason,
                state(&record.before_state),
                state(&record.after_state),
                state(&record.diff_state),
                metadata,
                tags,
                record.sequence_number,
                record.previous_hash,
                record.record_hash,
                record.event_time.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                record.recorded_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            ],
        )?;
        Ok(())
    }

    /// Filtered, paged query. Never mutates.
    pub fn query(&self, query: &AuditQuery) -> Result<QueryPage, AuditError> {
        let conn = self.open()?;

        let mut clauses = vec!["tenant_id = ?".to_string()];
        let mut args: Vec<String> = vec![query.tenant_id.clone()];
        let push = |clauses: &mut Vec<String>, args: &mut Vec<String>, clause: &str, value: String| {
            clauses.push(clause.to_string());
            args.push(value);
        };
        if let Some(v) = &query.event_type {
            push(&mut clauses, &mut args, "event_type = ?", v.clone());
        }
        if let Some(v) = query.category {
            push(&mut clauses, &mut args, "event_category = ?", v.as_str().to_string());
        }
        if let Some(v) = query.severity {
            push(&mut clauses, &mut args, "severity = ?", v.as_str().to_string());
        }
        if let Some(v) = &query.actor_id {
            push(&mut clauses, &mut args, "actor_id = ?", v.clone());
        }
        if let Some(v) = &query.target_type {
            push(&mut clauses, &mut args, "target_type = ?", v.clone());
        }
        if let Some(v) = &query.target_id {
            push(&mut clauses, &mut args, "target_id = ?", v.clone());
        }
        if let Some(v) = &query.trace_id {
            push(&mut clauses, &mut args, "trace_id = ?", v.clone());
        }
        if let Some(v) = query.from {
            push(&mut clauses, &mut args, "event_time >= ?", v.to_rfc3339_opts(chrono::SecondsFormat::Millis, true));
        }
        if let Some(v) = query.to {
            push(&mut clauses, &mut args, "event_time < ?", v.to_rfc3339_opts(chrono::SecondsFormat::Millis, true));
        }
        let where_sql = clauses.join(" AND ");

        let total: usize = conn.query_row(
            &format!("SELECT COUNT(*) FROM audit_records WHERE {where_sql}"),
            params_from_iter(args.iter()),
            |row| row.get::<_, i64>(0).map(|n| n as usize),
        )?;

        let limit = if query.limit == 0 { 100 } else { query.limit };
        let sql = format!(
            "SELECT * FROM audit_records WHERE {where_sql}
             ORDER BY sequence_number DESC LIMIT {limit} OFFSET {offset}",
            offset = query.offset
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params_from_iter(args.iter()), row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;

        let has_more = query.offset + records.len() < total;
        Ok(QueryPage {
            records,
            total,
            has_more,
        })
    }

    pub fn get_by_id(&self, tenant_id: &str, id: &str) -> Result<Option<AuditRecord>, AuditError> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT * FROM audit_records WHERE tenant_id = ?1 AND id = ?2",
            params![tenant_id, id],
            row_to_record,
        )
        .optional()
        .map_err(AuditError::from)
    }

    /// Records in ascending sequence order, for chain verification.
    pub fn records_ascending(
        &self,
        tenant_id: &str,
        start_sequence: i64,
        limit: Option<usize>,
    ) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self.open()?;
        let limit_sql = limit.map(|l| format!(" LIMIT {l}")).unwrap_or_default();
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM audit_records
             WHERE tenant_id = ?1 AND sequence_number >= ?2
             ORDER BY sequence_number ASC{limit_sql}"
        ))?;
        let records = stmt
            .query_map(params![tenant_id, start_sequence], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Mark un-archived records older than `cutoff` archived. Returns the
    /// number of rows touched.
    pub fn archive_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, AuditError> {
        let conn = self.open()?;
        let touched = conn.execute(
            "UPDATE audit_records SET archived = 1, archived_at = ?1
             WHERE archived = 0 AND event_time < ?2",
            params![
                Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                cutoff.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
            ],
        )?;
        Ok(touched)
    }

    /// Delete archived records older than `cutoff`. Un-archived rows are
    /// never deleted.
    pub fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, AuditError> {
        let conn = self.open()?;
        let removed = conn.execute(
            "DELETE FROM audit_records
             WHERE archived = 1 AND event_time < ?1",
            params![cutoff.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)],
        )?;
        Ok(removed)
    }

    /// Overwrite a stored record hash. Test-only: simulates tampering.
    #[cfg(test)]
    pub fn corrupt_record_hash(&self, tenant_id: &str, sequence: i64, bogus: &str) {
        let conn = self.open().unwrap();
        conn.execute(
            "UPDATE audit_records SET record_hash = ?3
             WHERE tenant_id = ?1 AND sequence_number = ?2",
            params![tenant_id, sequence, bogus],
        )
        .unwrap();
    }

    /// Aggregate counts for a tenant within a window.
    pub fn stats(
        &self,
        tenant_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<(String, String, usize)>, AuditError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT event_category, severity, COUNT(*)
             FROM audit_records
             WHERE tenant_id = ?1 AND event_time >= ?2
             GROUP BY event_category, severity",
        )?;
        let rows = stmt
            .query_map(
                params![
                    tenant_id,
                    since.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
                ],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)? as usize,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Retention accounting: (total, archived, oldest event, newest event).
    pub fn retention_stats(
        &self,
        tenant_id: &str,
    ) -> Result<(usize, usize, Option<DateTime<Utc>>, Option<DateTime<Utc>>), AuditError> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(archived), 0),
                    MIN(event_time),
                    MAX(event_time)
             FROM audit_records WHERE tenant_id = ?1",
            params![tenant_id],
            |row| {
                let total: i64 = row.get(0)?;
                let archived: i64 = row.get(1)?;
                let oldest: Option<String> = row.get(2)?;
                let newest: Option<String> = row.get(3)?;
                Ok((
                    total as usize,
                    archived as usize,
                    oldest.and_then(|s| s.parse().ok()),
                    newest.and_then(|s| s.parse().ok()),
                ))
            },
        )
        .map_err(AuditError::from)
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<AuditRecord> {
    let parse_time = |raw: String| {
        raw.parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| DateTime::<Utc>::MIN_UTC)
    };
    let parse_state = |raw: Option<String>| {
        raw.and_then(|s| serde_json::from_str(&s).ok())
    };

    let target_type: Option<String> = row.get("target_type")?;
    let target = match target_type {
        Some(target_type) => Some(AuditTarget {
            target_type,
            id: row.get::<_, Option<String>>("target_id")?.unwrap_or_default(),
            name: row.get("target_name")?,
        }),
        None => None,
    };

    let metadata: String = row.get("metadata")?;
    let tags: String = row.get("tags")?;
    let archived_at: Option<String> = row.get("archived_at")?;

    Ok(AuditRecord {
        id: row.get("id")?,
        tenant_id: row.get("tenant_id")?,
        event_type: row.get("event_type")?,
        event_category: category_from_str(&row.get::<_, String>("event_category")?),
        severity: severity_from_str(&row.get::<_, String>("severity")?),
        actor: AuditActor {
            actor_type: row.get("actor_type")?,
            id: row.get("actor_id")?,
            name: row.get("actor_name")?,
            ip: row.get("actor_ip")?,
        },
        target,
        request_id: row.get("request_id")?,
        trace_id: row.get("trace_id")?,
        span_id: row.get("span_id")?,
        action: row.get("action")?,
        outcome: outcome_from_str(&row.get::<_, String>("outcome")?),
        reason: row.get("reason")?,
        before_state: parse_state(row.get("before_state")?),
        after_state: parse_state(row.get("after_state")?),
        diff_state: parse_state(row.get("diff_state")?),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        sequence_number: row.get("sequence_number")?,
        previous_hash: row.get("previous_hash")?,
        record_hash: row.get("record_hash")?,
        event_time: parse_time(row.get("event_time")?),
        recorded_at: parse_time(row.get("recorded_at")?),
        archived: row.get("archived")?,
        archived_at: archived_at.and_then(|s| s.parse().ok()),
    })
}

fn category_from_str(raw: &str) -> AuditCategory {
    match raw {
        "policy" => AuditCategory::Policy,
        "security" => AuditCategory::Security,
        "escalation" => AuditCategory::Escalation,
        "trust" => AuditCategory::Trust,
        "data" => AuditCategory::Data,
        _ => AuditCategory::System,
    }
}

fn severity_from_str(raw: &str) -> AuditSeverity {
    match raw {
        "notice" => AuditSeverity::Notice,
        "warn" => AuditSeverity::Warn,
        "error" => AuditSeverity::Error,
        "critical" => AuditSeverity::Critical,
        _ => AuditSeverity::Info,
    }
}

fn outcome_from_str(raw: &str) -> AuditOutcome {
    match raw {
        "failure" => AuditOutcome::Failure,
        "partial" => AuditOutcome::Partial,
        _ => AuditOutcome::Success,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, AuditStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::new(dir.path().join("audit.db")).unwrap();
        (dir, store)
    }

    fn input(tenant: &str, event_type: &str) -> AuditInput {
        AuditInput {
            tenant_id: tenant.to_string(),
            event_type: event_type.to_string(),
            actor: AuditActor {
                actor_type: "agent".into(),
                id: "did:ex:agent-1".into(),
                name: None,
                ip: None,
            },
            target: None,
            action: "evaluate".into(),
            outcome: AuditOutcome::Success,
            reason: None,
            request_id: None,
            trace_id: None,
            span_id: None,
            before_state: None,
            after_state: None,
            diff_state: None,
            metadata: Default::default(),
            tags: Vec::new(),
            event_time: None,
            severity: None,
        }
    }

    #[test]
    fn sequences_are_gap_free_from_one() {
        let (_dir, store) = store();
        for expected in 1..=5 {
            let record = store.append(&input("tenant-a", "intent.allowed")).unwrap();
            assert_eq!(record.sequence_number, expected);
        }
        // A second tenant starts its own chain at 1.
        let other = store.append(&input("tenant-b", "intent.allowed")).unwrap();
        assert_eq!(other.sequence_number, 1);
        assert!(other.previous_hash.is_none());
    }

    #[test]
    fn chain_links_previous_hash() {
        let (_dir, store) = store();
        let first = store.append(&input("tenant-a", "intent.allowed")).unwrap();
        let second = store.append(&input("tenant-a", "intent.denied")).unwrap();
        assert!(first.previous_hash.is_none());
        assert_eq!(second.previous_hash.as_deref(), Some(first.record_hash.as_str()));
        assert_eq!(second.severity, AuditSeverity::Warn);
        assert_eq!(second.event_category, AuditCategory::Policy);
    }

    #[test]
    fn concurrent_writers_never_collide() {
        let (_dir, store) = store();
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        store.append(&input("tenant-a", "intent.allowed")).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        let records = store.records_ascending("tenant-a", 1, None).unwrap();
        assert_eq!(records.len(), 40);
        for (i, record) in records.iter().enumerate() {
            assert_eq!(record.sequence_number, i as i64 + 1);
            if i > 0 {
                assert_eq!(
                    record.previous_hash.as_deref(),
                    Some(records[i - 1].record_hash.as_str())
                );
            }
        }
    }

    #[test]
    fn query_filters_and_pages() {
        let (_dir, store) = store();
        for _ in 0..3 {
            store.append(&input("tenant-a", "intent.allowed")).unwrap();
        }
        store.append(&input("tenant-a", "intent.denied")).unwrap();

        let page = store
            .query(&AuditQuery {
                event_type: Some("intent.allowed".into()),
                ..AuditQuery::for_tenant("tenant-a")
            })
            .unwrap();
        assert_eq!(page.total, 3);
        assert!(!page.has_more);

        let paged = store
            .query(&AuditQuery {
                limit: 2,
                ..AuditQuery::for_tenant("tenant-a")
            })
            .unwrap();
        assert_eq!(paged.records.len(), 2);
        assert_eq!(paged.total, 4);
        assert!(paged.has_more);

        let by_severity = store
            .query(&AuditQuery {
                severity: Some(AuditSeverity::Warn),
                ..AuditQuery::for_tenant("tenant-a")
            })
            .unwrap();
        assert_eq!(by_severity.total, 1);
    }

    #[test]
    fn round_trips_full_record_shape() {
        let (_dir, store) = store();
        let mut rich = input("tenant-a", "trust.adjusted");
        rich.target = Some(AuditTarget {
            target_type: "entity".into(),
            id: "agent-9".into(),
            name: Some("Agent Nine".into()),
        });
        rich.metadata
            .insert("delta".into(), serde_json::json!(250));
        rich.tags = vec!["trust".into(), "manual".into()];
        rich.before_state = Some(serde_json::json!({"score": 100}));
        rich.after_state = Some(serde_json::json!({"score": 350}));
        rich.trace_id = Some("trace-1".into());

        let written = store.append(&rich).unwrap();
        let read = store
            .get_by_id("tenant-a", &written.id)
            .unwrap()
            .unwrap();
        assert_eq!(read.target.as_ref().unwrap().id, "agent-9");
        assert_eq!(read.metadata["delta"], serde_json::json!(250));
        assert_eq!(read.tags, vec!["trust", "manual"]);
        assert_eq!(read.before_state, Some(serde_json::json!({"score": 100})));
        assert_eq!(read.record_hash, written.record_hash);
        assert_eq!(read.trace_id.as_deref(), Some("trace-1"));
    }

    #[test]
    fn archive_and_purge_respect_flags() {
        let (_dir, store) = store();
        let mut old = input("tenant-a", "intent.allowed");
        old.event_time = Some(Utc::now() - chrono::Duration::days(120));
        store.append(&old).unwrap();
        store.append(&input("tenant-a", "intent.allowed")).unwrap();

        // Purge before archive touches nothing.
        let purged = store
            .purge_older_than(Utc::now() - chrono::Duration::days(90))
            .unwrap();
        assert_eq!(purged, 0);

        let archived = store
            .archive_older_than(Utc::now() - chrono::Duration::days(90))
            .unwrap();
        assert_eq!(archived, 1);

        let purged = store
            .purge_older_than(Utc::now() - chrono::Duration::days(90))
            .unwrap();
        assert_eq!(purged, 1);

        let (total, archived_count, _, _) = store.retention_stats("tenant-a").unwrap();
        assert_eq!(total, 1);
        assert_eq!(archived_count, 0);
    }
}

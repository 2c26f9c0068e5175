//! The audit service: record, query, verify, retain.
//!
//! Wraps the SQLite store with async entry points (blocking work runs on
//! the tokio blocking pool) and implements chain verification and the
//! archive-then-purge retention cycle.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::store::{AuditQuery, AuditStore, QueryPage};
use super::{AuditInput, AuditRecord};
use crate::errors::AuditError;

/// Result of walking a tenant's chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub valid: bool,
    pub records_checked: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_record: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_record: Option<i64>,
    /// Id of the first record whose link is broken.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of one retention cycle. Errors in either step are collected
/// and do not prevent the other step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupReport {
    pub archived: usize,
    pub purged: usize,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Aggregated counts over a stats window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditStats {
    pub total: usize,
    pub by_category: HashMap<String, usize>,
    pub by_severity: HashMap<String, usize>,
}

/// A signed export of a tenant's chain head, suitable for anchoring
/// elsewhere. Anchoring itself is out of scope; only the export is.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainRoot {
    pub tenant_id: String,
    pub sequence_number: i64,
    pub record_hash: String,
    /// Base64 HMAC-SHA256 over `tenant:sequence:hash` under the service
    /// signing key.
    pub signature: String,
    pub exported_at: DateTime<Utc>,
}

/// Retention accounting for a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionStats {
    pub total: usize,
    pub archived: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oldest_event: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub newest_event: Option<DateTime<Utc>>,
}

/// The audit service.
#[derive(Debug, Clone)]
pub struct AuditService {
    store: AuditStore,
}

impl AuditService {
    pub fn new(store: AuditStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &AuditStore {
        &self.store
    }

    /// Append a record synchronously. Durable on return: a write failure
    /// yields an error and no record.
    pub fn record(&self, input: &AuditInput) -> Result<AuditRecord, AuditError> {
        self.store.append(input)
    }

    /// Async append; the blocking SQLite work runs on the blocking pool.
    pub async fn record_async(&self, input: AuditInput) -> Result<AuditRecord, AuditError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.append(&input))
            .await
            .map_err(|e| AuditError::Storage {
                message: format!("audit write task: {e}"),
            })?
    }

    /// Filtered query; read-only.
    pub fn query(&self, query: &AuditQuery) -> Result<QueryPage, AuditError> {
        self.store.query(query)
    }

    pub async fn query_async(&self, query: AuditQuery) -> Result<QueryPage, AuditError> {
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.query(&query))
            .await
            .map_err(|e| AuditError::Storage {
                message: format!("audit query task: {e}"),
            })?
    }

    /// Records about one target, newest first.
    pub fn get_for_target(
        &self,
        tenant_id: &str,
        target_type: &str,
        target_id: &str,
        limit: usize,
    ) -> Result<QueryPage, AuditError> {
        self.store.query(&AuditQuery {
            target_type: Some(target_type.to_string()),
            target_id: Some(target_id.to_string()),
            limit,
            ..AuditQuery::for_tenant(tenant_id)
        })
    }

    /// Every record sharing a trace id, newest first.
    pub fn get_by_trace(&self, tenant_id: &str, trace_id: &str) -> Result<QueryPage, AuditError> {
        self.store.query(&AuditQuery {
            trace_id: Some(trace_id.to_string()),
            limit: 1000,
            ..AuditQuery::for_tenant(tenant_id)
        })
    }

    /// Walk the chain for a tenant and verify every link.
    ///
    /// For each record after the first, `previous_hash` must equal the
    /// prior record's `record_hash`, and sequence numbers must be
    /// contiguous. Returns the first break.
    pub fn verify_chain_integrity(
        &self,
        tenant_id: &str,
        start_sequence: Option<i64>,
        limit: Option<usize>,
    ) -> Result<ChainVerification, AuditError> {
        let records = self
            .store
            .records_ascending(tenant_id, start_sequence.unwrap_or(1), limit)?;

        if records.is_empty() {
            return Ok(ChainVerification {
                valid: true,
                records_checked: 0,
                first_record: None,
                last_record: None,
                broken_at: None,
                error: None,
            });
        }

        let first_sequence = records[0].sequence_number;
        let mut last: Option<&AuditRecord> = None;
        for (index, record) in records.iter().enumerate() {
            if let Some(prior) = last {
                let sequence_ok = record.sequence_number == prior.sequence_number + 1;
                let hash_ok = record.previous_hash.as_deref() == Some(prior.record_hash.as_str());
                if !sequence_ok || !hash_ok {
                    let error = if sequence_ok {
                        format!(
                            "previous_hash mismatch at sequence {}",
                            record.sequence_number
                        )
                    } else {
                        format!(
                            "sequence gap between {} and {}",
                            prior.sequence_number, record.sequence_number
                        )
                    };
                    return Ok(ChainVerification {
                        valid: false,
                        records_checked: index + 1,
                        first_record: Some(first_sequence),
                        last_record: Some(record.sequence_number),
                        broken_at: Some(record.id.clone()),
                        error: Some(error),
                    });
                }
            }
            last = Some(record);
        }

        Ok(ChainVerification {
            valid: true,
            records_checked: records.len(),
            first_record: Some(first_sequence),
            last_record: last.map(|r| r.sequence_number),
            broken_at: None,
            error: None,
        })
    }

    /// Archive records older than `days` days.
    pub fn archive_old_records(&self, days: i64) -> Result<usize, AuditError> {
        let cutoff = Utc::now() - Duration::days(days);
        let archived = self.store.archive_older_than(cutoff)?;
        if archived > 0 {
            log::info!("archived {archived} audit records older than {days}d");
        }
        Ok(archived)
    }

    /// Purge archived records older than `days` days. Never touches
    /// un-archived rows.
    pub fn purge_old_records(&self, days: i64) -> Result<usize, AuditError> {
        let cutoff = Utc::now() - Duration::days(days);
        let purged = self.store.purge_older_than(cutoff)?;
        if purged > 0 {
            log::info!("purged {purged} archived audit records older than {days}d");
        }
        Ok(purged)
    }

    /// Archive then purge. Errors in either step are collected; the other
    /// step still runs.
    pub fn run_cleanup(&self, archive_after_days: i64, retention_days: i64) -> CleanupReport {
        let mut report = CleanupReport {
            archived: 0,
            purged: 0,
            errors: Vec::new(),
        };
        match self.archive_old_records(archive_after_days) {
            Ok(n) => report.archived = n,
            Err(e) => report.errors.push(format!("archive: {e}")),
        }
        match self.purge_old_records(retention_days) {
            Ok(n) => report.purged = n,
            Err(e) => report.errors.push(format!("purge: {e}")),
        }
        report
    }

    /// Aggregate stats over a trailing window.
    pub fn get_stats(&self, tenant_id: &str, window: Duration) -> Result<AuditStats, AuditError> {
        let rows = self.store.stats(tenant_id, Utc::now() - window)?;
        let mut stats = AuditStats {
            total: 0,
            by_category: HashMap::new(),
            by_severity: HashMap::new(),
        };
        for (category, severity, count) in rows {
            stats.total += count;
            *stats.by_category.entry(category).or_insert(0) += count;
            *stats.by_severity.entry(severity).or_insert(0) += count;
        }
        Ok(stats)
    }

    /// Export the tenant's signed chain head. `None` when the tenant has
    /// no records yet.
    pub fn export_root(
        &self,
        tenant_id: &str,
        signing_key: &[u8],
    ) -> Result<Option<ChainRoot>, AuditError> {
        let page = self.store.query(&AuditQuery {
            limit: 1,
            ..AuditQuery::for_tenant(tenant_id)
        })?;
        let Some(head) = page.records.first() else {
            return Ok(None);
        };
        let payload = format!(
            "{}:{}:{}",
            tenant_id, head.sequence_number, head.record_hash
        );
        Ok(Some(ChainRoot {
            tenant_id: tenant_id.to_string(),
            sequence_number: head.sequence_number,
            record_hash: head.record_hash.clone(),
            signature: crate::semantic::signature::sign(signing_key, payload.as_bytes()),
            exported_at: Utc::now(),
        }))
    }

    pub fn get_retention_stats(&self, tenant_id: &str) -> Result<RetentionStats, AuditError> {
        let (total, archived, oldest_event, newest_event) =
            self.store.retention_stats(tenant_id)?;
        Ok(RetentionStats {
            total,
            archived,
            oldest_event,
            newest_event,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditActor, AuditOutcome};

    fn service() -> (tempfile::TempDir, AuditService) {
        let dir = tempfile::tempdir().unwrap();
        let store = AuditStore::new(dir.path().join("audit.db")).unwrap();
        (dir, AuditService::new(store))
    }

    fn input(tenant: &str) -> AuditInput {
        AuditInput {
            tenant_id: tenant.to_string(),
            event_type: "intent.allowed".into(),
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
    fn empty_chain_verifies_clean() {
        let (_dir, service) = service();
        let verification = service
            .verify_chain_integrity("tenant-a", None, None)
            .unwrap();
        assert!(verification.valid);
        assert_eq!(verification.records_checked, 0);
    }

    #[test]
    fn intact_chain_verifies() {
        let (_dir, service) = service();
        for _ in 0..20 {
            service.record(&input("tenant-a")).unwrap();
        }
        let verification = service
            .verify_chain_integrity("tenant-a", None, None)
            .unwrap();
        assert!(verification.valid);
        assert_eq!(verification.records_checked, 20);
        assert_eq!(verification.first_record, Some(1));
        assert_eq!(verification.last_record, Some(20));
    }

    #[test]
    fn tampering_is_detected_at_the_next_link() {
        let (_dir, service) = service();
        let mut records = Vec::new();
        for _ in 0..100 {
            records.push(service.record(&input("tenant-a")).unwrap());
        }
        // Overwrite record 50's hash with garbage.
        service
            .store()
            .corrupt_record_hash("tenant-a", 50, &"f".repeat(64));

        let verification = service
            .verify_chain_integrity("tenant-a", None, None)
            .unwrap();
        assert!(!verification.valid);
        assert_eq!(verification.records_checked, 51);
        // The break surfaces at record 51, whose previous_hash no longer
        // matches.
        assert_eq!(verification.broken_at.as_deref(), Some(records[50].id.as_str()));
        assert_eq!(verification.last_record, Some(51));
    }

    #[test]
    fn verification_window_with_start_and_limit() {
        let (_dir, service) = service();
        for _ in 0..10 {
            service.record(&input("tenant-a")).unwrap();
        }
        let verification = service
            .verify_chain_integrity("tenant-a", Some(4), Some(3))
            .unwrap();
        assert!(verification.valid);
        assert_eq!(verification.records_checked, 3);
        assert_eq!(verification.first_record, Some(4));
        assert_eq!(verification.last_record, Some(6));
    }

    #[test]
    fn cleanup_archives_then_purges() {
        let (_dir, service) = service();
        let mut ancient = input("tenant-a");
        ancient.event_time = Some(Utc::now() - Duration::days(400));
        service.record(&ancient).unwrap();
        service.record(&input("tenant-a")).unwrap();

        let report = service.run_cleanup(30, 365);
        assert_eq!(report.archived, 1);
        assert_eq!(report.purged, 1);
        assert!(report.errors.is_empty());

        let retention = service.get_retention_stats("tenant-a").unwrap();
        assert_eq!(retention.total, 1);
        assert_eq!(retention.archived, 0);
    }

    #[test]
    fn stats_aggregate_by_category_and_severity() {
        let (_dir, service) = service();
        service.record(&input("tenant-a")).unwrap();
        let mut denied = input("tenant-a");
        denied.event_type = "intent.denied".into();
        service.record(&denied).unwrap();
        service.record(&denied).unwrap();

        let stats = service.get_stats("tenant-a", Duration::hours(1)).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_category["policy"], 3);
        assert_eq!(stats.by_severity["warn"], 2);
        assert_eq!(stats.by_severity["info"], 1);
    }

    #[test]
    fn export_root_signs_the_chain_head() {
        let (_dir, service) = service();
        assert!(service
            .export_root("tenant-a", b"signing-key")
            .unwrap()
            .is_none());

        service.record(&input("tenant-a")).unwrap();
        let second = service.record(&input("tenant-a")).unwrap();

        let root = service
            .export_root("tenant-a", b"signing-key")
            .unwrap()
            .unwrap();
        assert_eq!(root.sequence_number, 2);
        assert_eq!(root.record_hash, second.record_hash);

        let payload = format!("tenant-a:2:{}", second.record_hash);
        assert!(crate::semantic::signature::verify(
            b"signing-key",
            payload.as_bytes(),
            &root.signature
        ));
    }

    #[tokio::test]
    async fn async_wrappers_round_trip() {
        let (_dir, service) = service();
        let record = service.record_async(input("tenant-a")).await.unwrap();
        assert_eq!(record.sequence_number, 1);
        let page = service
            .query_async(AuditQuery::for_tenant("tenant-a"))
            .await
            .unwrap();
        assert_eq!(page.total, 1);
    }
}

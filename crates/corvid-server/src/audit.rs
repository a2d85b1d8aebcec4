//! Audit trail for unary calls.
//!
//! One record per admitted call. Auditing is best-effort: a record that
//! cannot be built is logged and the call proceeds.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use corvid_protocol::RpcStatus;
use corvid_state::Directory;

use crate::pipeline::{Call, Interceptor};

/// Target used for audit lines so they can be routed separately.
pub const AUDIT_TARGET: &str = "corvid::audit";

/// Write-once audit entry. `request`, `session` and `beacon` hold JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub request: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beacon: Option<String>,
    pub remote_ip: String,
    pub user: String,
    pub operator: String,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, record: &AuditRecord);
}

/// Writes each record as one JSON line on the audit target.
#[derive(Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, record: &AuditRecord) {
        match serde_json::to_string(record) {
            Ok(line) => tracing::info!(target: AUDIT_TARGET, method = %record.method, "{line}"),
            Err(e) => tracing::error!(error = %e, "Failed to encode audit record"),
        }
    }
}

/// Keeps records in memory; used by embedders that ship audit elsewhere.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for MemoryAuditSink {
    fn emit(&self, record: &AuditRecord) {
        match self.records.lock() {
            Ok(mut records) => records.push(record.clone()),
            Err(poisoned) => poisoned.into_inner().push(record.clone()),
        }
    }
}

/// Session and beacon ids named by `params.request`, if any.
pub fn active_target(params: &serde_json::Value) -> (Option<String>, Option<String>) {
    let request = params.get("request");
    let field = |key: &str| {
        request
            .and_then(|r| r.get(key))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    (field("session_id"), field("beacon_id"))
}

pub struct AuditInterceptor {
    directory: Arc<Directory>,
    sink: Arc<dyn AuditSink>,
}

impl AuditInterceptor {
    pub fn new(directory: Arc<Directory>, sink: Arc<dyn AuditSink>) -> Self {
        Self { directory, sink }
    }

    async fn record(&self, call: &Call) -> Result<AuditRecord, AuditError> {
        let request = serde_json::to_string(&serde_json::json!({
            "method": call.method,
            "params": call.params,
        }))
        .map_err(|source| AuditError::Serialize { what: "request", source })?;

        // A request's session_id may name a beacon as well.
        let (session_id, beacon_id) = active_target(&call.params);
        let mut session = None;
        let mut beacon = None;
        if let Some(id) = session_id.as_deref() {
            if let Some(record) = self.directory.session(id).await {
                session = Some(
                    serde_json::to_string(&record)
                        .map_err(|source| AuditError::Serialize { what: "session", source })?,
                );
            } else if let Some(record) = self.directory.beacon(id).await {
                beacon = Some(
                    serde_json::to_string(&record)
                        .map_err(|source| AuditError::Serialize { what: "beacon", source })?,
                );
            }
        }
        if let Some(id) = beacon_id.as_deref() {
            if let Some(record) = self.directory.beacon(id).await {
                beacon = Some(
                    serde_json::to_string(&record)
                        .map_err(|source| AuditError::Serialize { what: "beacon", source })?,
                );
            }
        }

        Ok(AuditRecord {
            request,
            method: call.method.clone(),
            session,
            beacon,
            remote_ip: call.peer.addr.to_string(),
            user: call.peer.common_name.clone().unwrap_or_default(),
            operator: call.operator().to_string(),
        })
    }
}

#[async_trait]
impl Interceptor for AuditInterceptor {
    fn name(&self) -> &'static str {
        "audit"
    }

    async fn on_request(&self, call: &mut Call) -> Result<(), RpcStatus> {
        match self.record(call).await {
            Ok(record) => self.sink.emit(&record),
            Err(e) => tracing::warn!(method = %call.method, error = %e, "Audit record dropped"),
        }
        Ok(())
    }
}

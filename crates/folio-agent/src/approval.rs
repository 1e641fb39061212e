//! Approval ledger: single-use, time-boxed tokens for held actions.
//!
//! A token authorizes exactly one stored `(method, params)` pair. Redemption
//! is atomic, so a token can never be honored twice, and expired tokens are
//! inert whether or not the retention job has purged them yet.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use folio_core::error::FolioError;
use folio_core::types::Timestamp;
use folio_storage::{ApprovalRecord, ApprovalRepository, Database};

use crate::error::ApprovalError;
use crate::types::{ActionMethod, ActorContext};

/// What the requester receives for a held action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalGrant {
    pub token: String,
    pub expires_at: Timestamp,
}

/// Issues and redeems approval tokens.
pub trait ApprovalLedger: Send + Sync {
    /// Issue a fresh token. Identical requests are never deduplicated.
    fn create_approval(
        &self,
        actor: &ActorContext,
        method: &str,
        params: &Value,
        reason: &str,
        ttl_secs: u64,
    ) -> Result<ApprovalGrant, ApprovalError>;

    /// Atomically mark a live token consumed and return what it authorizes.
    fn redeem(&self, token: &str) -> Result<Option<ApprovalRecord>, ApprovalError>;

    /// `true` exactly once per live token.
    fn consume_approval(&self, token: &str) -> Result<bool, ApprovalError> {
        Ok(self.redeem(token)?.is_some())
    }

    /// Static sensitivity, independent of any workspace policy.
    fn requires_approval(&self, method: &str) -> bool {
        method
            .parse::<ActionMethod>()
            .map(|m| m.is_sensitive())
            .unwrap_or(false)
    }
}

/// Generate a random 64-character hex token.
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

fn new_record(
    actor: &ActorContext,
    method: &str,
    params: &Value,
    reason: &str,
    ttl_secs: u64,
) -> ApprovalRecord {
    let now = Timestamp::now();
    ApprovalRecord {
        token: generate_token(),
        workspace_id: actor.workspace_id,
        space_id: Some(actor.space_id),
        user_id: actor.user_id,
        method: method.to_string(),
        params: params.clone(),
        reason: reason.to_string(),
        created_at: now,
        expires_at: Timestamp(now.0.saturating_add(i64::try_from(ttl_secs).unwrap_or(i64::MAX))),
        consumed_at: None,
    }
}

/// Ledger persisted in the `agent_approvals` table.
pub struct SqliteApprovalLedger {
    repo: ApprovalRepository,
}

impl SqliteApprovalLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            repo: ApprovalRepository::new(db),
        }
    }
}

impl ApprovalLedger for SqliteApprovalLedger {
    fn create_approval(
        &self,
        actor: &ActorContext,
        method: &str,
        params: &Value,
        reason: &str,
        ttl_secs: u64,
    ) -> Result<ApprovalGrant, ApprovalError> {
        let record = new_record(actor, method, params, reason, ttl_secs);
        self.repo.insert(&record)?;
        info!(
            workspace_id = %actor.workspace_id,
            method,
            reason,
            expires_at = record.expires_at.0,
            "Approval requested"
        );
        Ok(ApprovalGrant {
            token: record.token,
            expires_at: record.expires_at,
        })
    }

    fn redeem(&self, token: &str) -> Result<Option<ApprovalRecord>, ApprovalError> {
        let redeemed = self.repo.redeem(token, Timestamp::now())?;
        if redeemed.is_none() {
            debug!("Approval token rejected");
        }
        Ok(redeemed)
    }
}

/// Process-local ledger for tests and embedded use.
#[derive(Default)]
pub struct InMemoryApprovalLedger {
    records: Mutex<HashMap<String, ApprovalRecord>>,
}

impl InMemoryApprovalLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tokens issued so far.
    pub fn issued(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, ApprovalRecord>>, ApprovalError> {
        self.records
            .lock()
            .map_err(|_| FolioError::Storage("approval ledger lock poisoned".into()).into())
    }
}

impl ApprovalLedger for InMemoryApprovalLedger {
    fn create_approval(
        &self,
        actor: &ActorContext,
        method: &str,
        params: &Value,
        reason: &str,
        ttl_secs: u64,
    ) -> Result<ApprovalGrant, ApprovalError> {
        let record = new_record(actor, method, params, reason, ttl_secs);
        let grant = ApprovalGrant {
            token: record.token.clone(),
            expires_at: record.expires_at,
        };
        let mut records = self.lock()?;
        records.insert(record.token.clone(), record);
        Ok(grant)
    }

    fn redeem(&self, token: &str) -> Result<Option<ApprovalRecord>, ApprovalError> {
        let mut records = self.lock()?;
        let now = Timestamp::now();
        match records.get_mut(token) {
            Some(record) if record.consumed_at.is_none() && record.expires_at > now => {
                record.consumed_at = Some(now);
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }
}

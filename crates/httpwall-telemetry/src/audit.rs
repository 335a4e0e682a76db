//! Tamper-evident audit trail of policy aborts

use httpwall_policy::{ChainResult, Disposition};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::time::SystemTime;
use tracing::warn;
use uuid::Uuid;

/// Audit trail with hash-chained events for tamper detection.
///
/// A bounded trail evicts its oldest events and remembers the hash of the
/// last evicted one, so verification still covers everything retained.
#[derive(Debug)]
pub struct AuditTrail {
    events: VecDeque<AuditEvent>,
    chain_hash: Option<String>,
    anchor: Option<String>,
    max_events: Option<usize>,
}

impl AuditTrail {
    /// Create an unbounded audit trail
    pub fn new() -> Self {
        Self {
            events: VecDeque::new(),
            chain_hash: None,
            anchor: None,
            max_events: None,
        }
    }

    /// Create a trail that keeps at most `max_events` events
    pub fn bounded(max_events: usize) -> Self {
        Self {
            max_events: Some(max_events.max(1)),
            ..Self::new()
        }
    }

    /// Add an event to the audit trail
    pub fn add_event(&mut self, mut event: AuditEvent) {
        event.previous_hash = self.chain_hash.clone();

        let hash = compute_hash(&event);
        event.hash = Some(hash.clone());

        self.chain_hash = Some(hash);
        self.events.push_back(event);

        if let Some(max) = self.max_events {
            while self.events.len() > max {
                if let Some(evicted) = self.events.pop_front() {
                    self.anchor = evicted.hash;
                }
            }
        }
    }

    /// Record the abort of a chain; allowed results leave no trace
    pub fn record_abort(
        &mut self,
        request_id: &str,
        method: &str,
        path: &str,
        result: &ChainResult,
        disposition: &str,
    ) {
        let Disposition::Abort { rule_id, outcome } = &result.disposition else {
            return;
        };
        let mut event = AuditEvent::new(request_id, rule_id.as_str(), method, path, disposition);
        event.message = outcome.message().map(str::to_string);
        self.add_event(event);
    }

    /// Verify the integrity of the audit trail
    pub fn verify(&self) -> bool {
        let mut prev_hash = self.anchor.clone();

        for (index, event) in self.events.iter().enumerate() {
            if event.previous_hash != prev_hash {
                warn!(index, event_id = %event.id, "Audit chain broken");
                return false;
            }

            let computed_hash = compute_hash(event);
            if event.hash.as_ref() != Some(&computed_hash) {
                warn!(index, event_id = %event.id, "Audit event hash mismatch");
                return false;
            }

            prev_hash = event.hash.clone();
        }

        true
    }

    /// Retained events, oldest first
    pub fn events(&self) -> impl ExactSizeIterator<Item = &AuditEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Hash of the most recent event
    pub fn head(&self) -> Option<&str> {
        self.chain_hash.as_deref()
    }
}

impl Default for AuditTrail {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash over every field except the event's own hash
fn compute_hash(event: &AuditEvent) -> String {
    let mut hasher = Sha256::new();

    for field in [
        event.id.as_str(),
        event.request_id.as_str(),
        event.rule_id.as_str(),
        event.method.as_str(),
        event.path.as_str(),
        event.disposition.as_str(),
    ] {
        hasher.update(field.as_bytes());
        hasher.update([0u8]);
    }
    if let Some(ref message) = event.message {
        hasher.update(message.as_bytes());
    }
    hasher.update(format!("{:?}", event.timestamp).as_bytes());
    if let Some(ref prev) = event.previous_hash {
        hasher.update(prev.as_bytes());
    }

    format!("{:x}", hasher.finalize())
}

/// A single audit event in the trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event id
    pub id: String,

    /// Request the abort belongs to
    pub request_id: String,

    /// Rule that aborted the chain
    pub rule_id: String,

    pub method: String,

    pub path: String,

    /// What the client got: block, redirect, or allow in log mode
    pub disposition: String,

    /// Diagnostic message from the rule
    pub message: Option<String>,

    pub timestamp: SystemTime,

    /// Hash of this event
    pub hash: Option<String>,

    /// Hash of previous event (for chaining)
    pub previous_hash: Option<String>,
}

impl AuditEvent {
    /// Create a new audit event
    pub fn new(
        request_id: impl Into<String>,
        rule_id: impl Into<String>,
        method: impl Into<String>,
        path: impl Into<String>,
        disposition: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            request_id: request_id.into(),
            rule_id: rule_id.into(),
            method: method.into(),
            path: path.into(),
            disposition: disposition.into(),
            message: None,
            timestamp: SystemTime::now(),
            hash: None,
            previous_hash: None,
        }
    }

    /// Set the diagnostic message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

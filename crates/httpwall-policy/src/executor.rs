//! Enforcement of chain results
//!
//! Turns the disposition of a chain into what the client gets to see:
//! - Allow the request through
//! - Block with a status code
//! - Redirect to a configured location
//!
//! The response bodies are deliberately generic; rule messages stay in the
//! logs and the audit trail.

use bytes::Bytes;
use http::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE, LOCATION};
use http::StatusCode;
use httpwall_core::{Error, RawResponse, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::{ChainResult, Disposition};
use crate::Remedy;

/// How an aborted chain is answered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementMode {
    /// Record aborts but let the request through
    Log,
    /// Answer with the block status
    #[default]
    Block,
    /// Redirect to the configured location
    Redirect,
}

/// What the boundary does with a request after a chain has run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allow,
    Block(StatusCode),
    Redirect(String),
}

impl Verdict {
    pub fn is_allow(&self) -> bool {
        matches!(self, Verdict::Allow)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Allow => "allow",
            Verdict::Block(_) => "block",
            Verdict::Redirect(_) => "redirect",
        }
    }

    /// Response replacing the application's, or `None` on allow
    pub fn into_response(self) -> Option<RawResponse> {
        let mut response = match self {
            Verdict::Allow => return None,
            Verdict::Block(status) => {
                let reason = status.canonical_reason().unwrap_or("Request rejected");
                let mut response = RawResponse::new(Bytes::from(format!("{}\n", reason)));
                *response.status_mut() = status;
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
                response
            }
            Verdict::Redirect(location) => {
                let mut response = RawResponse::new(Bytes::new());
                *response.status_mut() = StatusCode::FOUND;
                match HeaderValue::from_str(&location) {
                    Ok(value) => {
                        response.headers_mut().insert(LOCATION, value);
                    }
                    // Locations are validated at load; a rule-built one that isn't a
                    // valid header value degrades to a plain block.
                    Err(_) => {
                        *response.status_mut() = StatusCode::FORBIDDEN;
                        *response.body_mut() = Bytes::from_static(b"Forbidden\n");
                    }
                }
                response
            }
        };
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        Some(response)
    }
}

/// Resolves chain results into verdicts according to the policy settings
#[derive(Debug, Clone)]
pub struct Enforcer {
    mode: EnforcementMode,
    block_status: StatusCode,
    redirect_location: String,
}

impl Default for Enforcer {
    fn default() -> Self {
        Self {
            mode: EnforcementMode::Block,
            block_status: StatusCode::FORBIDDEN,
            redirect_location: "/error".to_string(),
        }
    }
}

impl Enforcer {
    /// Create an enforcer, validating the default remedies
    pub fn new(mode: EnforcementMode, block_status: u16, redirect_location: impl Into<String>) -> Result<Self> {
        let block_status = StatusCode::from_u16(block_status)
            .map_err(|_| Error::config(format!("invalid block status {}", block_status)))?;
        if !(block_status.is_client_error() || block_status.is_server_error()) {
            return Err(Error::config(format!(
                "block status must be a 4xx or 5xx code, got {}",
                block_status.as_u16()
            )));
        }

        let redirect_location = redirect_location.into();
        if redirect_location.is_empty() || HeaderValue::from_str(&redirect_location).is_err() {
            return Err(Error::config(format!(
                "invalid redirect location '{}'",
                redirect_location
            )));
        }

        Ok(Self {
            mode,
            block_status,
            redirect_location,
        })
    }

    pub fn mode(&self) -> EnforcementMode {
        self.mode
    }

    /// Decide what happens to the request
    pub fn resolve(&self, result: &ChainResult) -> Verdict {
        let Disposition::Abort { rule_id, outcome } = &result.disposition else {
            return Verdict::Allow;
        };

        let verdict = match (self.mode, outcome.remedy()) {
            (EnforcementMode::Log, _) => {
                info!(rule = %rule_id, "Abort recorded in log mode, request allowed");
                return Verdict::Allow;
            }
            (_, Some(Remedy::Block { status })) => Verdict::Block(*status),
            (_, Some(Remedy::Redirect { location })) => Verdict::Redirect(location.clone()),
            (EnforcementMode::Block, None) => Verdict::Block(self.block_status),
            (EnforcementMode::Redirect, None) => Verdict::Redirect(self.redirect_location.clone()),
        };

        metrics::counter!("httpwall_verdicts_total", "verdict" => verdict.label()).increment(1);
        verdict
    }
}

//! Rule chain evaluation
//!
//! A [`RuleChain`] runs its rules strictly in configured order over one
//! request, stopping at the first outcome that demands action. Whatever the
//! rules buffered in the interceptor is flushed onto the raw response exactly
//! once, on completion and on abort alike.

use httpwall_core::{request_path, Error, InspectedRequest, RawResponse, Result};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::interceptor::FlushedResponse;
use crate::{Enforcer, InterceptingResponse, Outcome, Phase, Rule, SharedRule};

/// Upper bound on rules per chain unless configured otherwise
pub const DEFAULT_MAX_RULES: usize = 256;

/// Final disposition of one chain run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Every rule ran without demanding action
    Allow,
    /// A rule demanded action; later rules were skipped
    Abort {
        /// Rule that stopped the chain
        rule_id: String,
        /// Its outcome
        outcome: Outcome,
    },
}

/// Outcome of one rule within a chain run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOutcome {
    pub rule_id: String,
    pub outcome: Outcome,
}

/// Result of evaluating a chain over one request
#[derive(Debug, Clone)]
pub struct ChainResult {
    /// Allow or abort
    pub disposition: Disposition,

    /// Outcomes in evaluation order; rules after an abort are absent
    pub outcomes: Vec<RuleOutcome>,

    /// What the interceptor committed onto the raw response
    pub flushed: FlushedResponse,

    /// Wall time spent in the chain
    pub latency: Duration,
}

impl ChainResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self.disposition, Disposition::Allow)
    }

    /// Id of the rule that aborted the chain
    pub fn aborted_by(&self) -> Option<&str> {
        match &self.disposition {
            Disposition::Allow => None,
            Disposition::Abort { rule_id, .. } => Some(rule_id),
        }
    }

    /// Rules that detected their condition
    pub fn fired(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.outcomes.iter().filter(|r| r.outcome.failed())
    }

    /// Rules that could not evaluate
    pub fn anomalies(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.outcomes.iter().filter(|r| r.outcome.is_anomaly())
    }
}

/// Ordered, immutable sequence of rules
#[derive(Debug, Clone, Default)]
pub struct RuleChain {
    rules: Vec<SharedRule>,
}

impl RuleChain {
    /// Build a chain with the default rule limit
    pub fn new(rules: Vec<SharedRule>) -> Result<Self> {
        Self::with_limit(rules, DEFAULT_MAX_RULES)
    }

    /// Build a chain, rejecting duplicate ids and more than `limit` rules
    pub fn with_limit(rules: Vec<SharedRule>, limit: usize) -> Result<Self> {
        if rules.len() > limit {
            return Err(Error::ChainTooLong {
                limit,
                actual: rules.len(),
            });
        }
        ensure_unique_ids(&rules)?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn rules(&self) -> &[SharedRule] {
        &self.rules
    }

    /// Evaluate with a fresh, empty interceptor
    pub fn evaluate(&self, request: &InspectedRequest, raw: &mut RawResponse) -> ChainResult {
        self.evaluate_with(request, InterceptingResponse::new(), raw)
    }

    /// Evaluate over an interceptor that may already hold the application's
    /// response, then flush it onto `raw`.
    pub fn evaluate_with(
        &self,
        request: &InspectedRequest,
        mut intercepted: InterceptingResponse,
        raw: &mut RawResponse,
    ) -> ChainResult {
        let start = Instant::now();
        let path = request_path(request);
        let mut outcomes = Vec::with_capacity(self.rules.len());
        let mut disposition = Disposition::Allow;

        for rule in &self.rules {
            let outcome = run_guarded(rule.as_ref(), request, &mut intercepted, raw);
            record(rule.as_ref(), &path, &outcome);

            let abort = outcome.action_necessary();
            if abort {
                disposition = Disposition::Abort {
                    rule_id: rule.id().to_string(),
                    outcome: outcome.clone(),
                };
            }
            outcomes.push(RuleOutcome {
                rule_id: rule.id().to_string(),
                outcome,
            });
            if abort {
                break;
            }
        }

        let flushed = intercepted.flush(raw).unwrap_or_else(|e| {
            error!(path = %path, error = %e, "interceptor handed to the chain was already committed");
            FlushedResponse::default()
        });

        ChainResult {
            disposition,
            outcomes,
            flushed,
            latency: start.elapsed(),
        }
    }
}

fn ensure_unique_ids(rules: &[SharedRule]) -> Result<()> {
    let mut seen = HashSet::with_capacity(rules.len());
    for rule in rules {
        if !seen.insert(rule.id()) {
            return Err(Error::DuplicateRule(rule.id().to_string()));
        }
    }
    Ok(())
}

/// Run one rule, turning a panic into an anomaly so the chain keeps going
fn run_guarded(
    rule: &dyn Rule,
    request: &InspectedRequest,
    intercepted: &mut InterceptingResponse,
    raw: &mut RawResponse,
) -> Outcome {
    catch_unwind(AssertUnwindSafe(|| rule.check(request, Some(&mut *intercepted), raw))).unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Outcome::anomaly(format!("rule panicked: {}", reason))
    })
}

fn record(rule: &dyn Rule, path: &str, outcome: &Outcome) {
    let id = rule.id();
    match outcome.label() {
        "abort" => {
            warn!(rule = %id, kind = rule.kind(), path = %path, message = ?outcome.message(), "Rule aborted the chain");
            metrics::counter!("httpwall_chain_aborts_total", "rule" => id.to_string()).increment(1);
        }
        "anomaly" => error!(rule = %id, path = %path, message = ?outcome.message(), "Rule could not evaluate"),
        label => debug!(rule = %id, path = %path, result = label, "Rule evaluated"),
    }
    metrics::counter!(
        "httpwall_rule_outcomes_total",
        "rule" => id.to_string(),
        "result" => outcome.label()
    )
    .increment(1);
}

/// Inbound and outbound chains of one policy, plus its enforcement settings
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    inbound: RuleChain,
    outbound: RuleChain,
    enforcer: Enforcer,
}

impl PolicyEngine {
    /// Split rules by phase, keeping their relative order
    pub fn new(rules: Vec<SharedRule>, enforcer: Enforcer, max_rules: usize) -> Result<Self> {
        if rules.len() > max_rules {
            return Err(Error::ChainTooLong {
                limit: max_rules,
                actual: rules.len(),
            });
        }
        ensure_unique_ids(&rules)?;

        let (inbound, outbound): (Vec<_>, Vec<_>) = rules
            .into_iter()
            .partition(|rule| rule.phase() == Phase::Inbound);

        Ok(Self {
            inbound: RuleChain::with_limit(inbound, max_rules)?,
            outbound: RuleChain::with_limit(outbound, max_rules)?,
            enforcer,
        })
    }

    /// Engine without rules that lets everything through
    pub fn empty() -> Self {
        Self {
            inbound: RuleChain::default(),
            outbound: RuleChain::default(),
            enforcer: Enforcer::default(),
        }
    }

    /// Run the inbound chain before the request reaches the application.
    ///
    /// Header writes land on `raw`, which the boundary keeps as the base of
    /// the eventual response.
    pub fn evaluate_inbound(&self, request: &InspectedRequest, raw: &mut RawResponse) -> ChainResult {
        let result = self.inbound.evaluate(request, raw);
        observe(Phase::Inbound, &result);
        result
    }

    /// Run the outbound chain over the application's buffered response
    pub fn evaluate_outbound(
        &self,
        request: &InspectedRequest,
        intercepted: InterceptingResponse,
        raw: &mut RawResponse,
    ) -> ChainResult {
        let result = self.outbound.evaluate_with(request, intercepted, raw);
        observe(Phase::Outbound, &result);
        result
    }

    pub fn inbound(&self) -> &RuleChain {
        &self.inbound
    }

    pub fn outbound(&self) -> &RuleChain {
        &self.outbound
    }

    pub fn enforcer(&self) -> &Enforcer {
        &self.enforcer
    }

    /// Total number of rules across both phases
    pub fn rule_count(&self) -> usize {
        self.inbound.len() + self.outbound.len()
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::empty()
    }
}

fn observe(phase: Phase, result: &ChainResult) {
    metrics::histogram!("httpwall_chain_latency_us", "phase" => phase.as_str())
        .record(result.latency.as_micros() as f64);
}

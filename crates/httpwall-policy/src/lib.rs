//! httpwall Policy Engine
//!
//! Ordered rule chains that inspect HTTP requests and responses and modify
//! the response on the way out.
//!
//! A policy is a YAML rule set. Each rule:
//! - Decides applicability from the request path and its exception list
//! - Checks its own condition against the request and the buffered response
//! - Reports an [`Outcome`] telling the chain whether to keep going
//!
//! Response writes are buffered in an [`InterceptingResponse`] and committed
//! to the raw response once the chain finishes.

pub mod action;
pub mod definition;
pub mod engine;
pub mod executor;
pub mod interceptor;
pub mod pattern;
pub mod rule;
pub mod rules;

pub use action::{Outcome, Remedy};
pub use definition::{ExceptionDefinition, LoadMode, PolicySettings, RuleDefinition, RuleKind, RuleSet};
pub use engine::{ChainResult, Disposition, PolicyEngine, RuleChain, RuleOutcome, DEFAULT_MAX_RULES};
pub use executor::{EnforcementMode, Enforcer, Verdict};
pub use interceptor::{response_target, FlushedResponse, InterceptingResponse, ResponseError, ResponseWriter};
pub use pattern::{Applicability, ExceptionEntry, ExceptionList, PathMatcher, PathPattern};
pub use rule::{Phase, Rule, SharedRule};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::action::{Outcome, Remedy};
    pub use crate::definition::{LoadMode, RuleSet};
    pub use crate::engine::{ChainResult, Disposition, PolicyEngine, RuleChain};
    pub use crate::executor::{Enforcer, Verdict};
    pub use crate::interceptor::{InterceptingResponse, ResponseWriter};
    pub use crate::pattern::PathMatcher;
    pub use crate::rule::{Phase, Rule, SharedRule};
}

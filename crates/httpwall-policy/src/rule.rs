//! The rule contract

use httpwall_core::{InspectedRequest, RawResponse};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::{InterceptingResponse, Outcome};

/// When in the exchange a rule runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Before the request reaches the application
    Inbound,
    /// Over the buffered application response
    Outbound,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of policy
///
/// Implementations are immutable after construction and hold no per-request
/// state, so one instance can serve concurrent requests.
///
/// `check` must be a pure function of its inputs and the rule's configuration,
/// apart from writing to the response. It writes to `intercepted` when given
/// one and to `raw` otherwise, never to both. It must not panic or block on
/// I/O; problems are reported with [`Outcome::anomaly`].
pub trait Rule: Send + Sync + fmt::Debug {
    /// Identifier, unique within a chain
    fn id(&self) -> &str;

    /// Variant name as used in rule files
    fn kind(&self) -> &'static str;

    fn phase(&self) -> Phase;

    fn check(
        &self,
        request: &InspectedRequest,
        intercepted: Option<&mut InterceptingResponse>,
        raw: &mut RawResponse,
    ) -> Outcome;
}

/// Rules are shared between the engine and concurrently running requests
pub type SharedRule = Arc<dyn Rule>;

//! Rule outcome model
//!
//! A rule answers every check with exactly one [`Outcome`]. Two flags carry the
//! verdict:
//! - `failed`: the guarded condition was detected, or the rule's corrective
//!   branch ran
//! - `action_necessary`: the chain must still act, i.e. stop and let the
//!   boundary block or redirect
//!
//! The constructors only allow the three valid combinations, so an outcome can
//! never demand action without having failed.

use http::StatusCode;
use serde::{Deserialize, Serialize};

/// What the boundary should do with an aborted exchange
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "lowercase")]
pub enum Remedy {
    /// Answer with an error status
    Block {
        /// HTTP status code
        #[serde(with = "status_code")]
        status: StatusCode,
    },

    /// Send the client elsewhere
    Redirect {
        /// Target of the `Location` header
        location: String,
    },
}

impl Remedy {
    pub fn block(status: StatusCode) -> Self {
        Self::Block { status }
    }

    pub fn redirect(location: impl Into<String>) -> Self {
        Self::Redirect {
            location: location.into(),
        }
    }
}

/// Result of evaluating one rule against one exchange
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    failed: bool,
    action_necessary: bool,
    anomaly: bool,
    remedy: Option<Remedy>,
    message: Option<String>,
}

impl Outcome {
    /// Nothing detected, nothing changed
    pub fn no_op() -> Self {
        Self::default()
    }

    /// The rule detected its condition and fully handled it in place
    pub fn applied() -> Self {
        Self {
            failed: true,
            ..Self::default()
        }
    }

    /// The rule detected its condition and the chain must stop.
    ///
    /// Without a remedy the policy's default disposition applies.
    pub fn abort(remedy: Option<Remedy>) -> Self {
        Self {
            failed: true,
            action_necessary: true,
            remedy,
            ..Self::default()
        }
    }

    /// The rule could not do its job for this exchange.
    ///
    /// Anomalies never stop the chain and never carry side effects.
    pub fn anomaly(message: impl Into<String>) -> Self {
        Self {
            anomaly: true,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Attach a diagnostic message
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn failed(&self) -> bool {
        self.failed
    }

    pub fn action_necessary(&self) -> bool {
        self.action_necessary
    }

    pub fn is_anomaly(&self) -> bool {
        self.anomaly
    }

    pub fn is_no_op(&self) -> bool {
        !self.failed && !self.anomaly
    }

    pub fn remedy(&self) -> Option<&Remedy> {
        self.remedy.as_ref()
    }

    /// Diagnostic text; for logs and audit only, never for clients
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Short label used in logs and metrics
    pub fn label(&self) -> &'static str {
        match (self.anomaly, self.failed, self.action_necessary) {
            (true, _, _) => "anomaly",
            (false, true, true) => "abort",
            (false, true, false) => "applied",
            (false, false, _) => "pass",
        }
    }
}

mod status_code {
    use http::StatusCode;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(status: &StatusCode, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(status.as_u16())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<StatusCode, D::Error> {
        let code = u16::deserialize(deserializer)?;
        StatusCode::from_u16(code).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_op() {
        let outcome = Outcome::no_op();
        assert!(!outcome.failed());
        assert!(!outcome.action_necessary());
        assert!(outcome.is_no_op());
        assert_eq!(outcome.label(), "pass");
    }

    #[test]
    fn test_applied() {
        let outcome = Outcome::applied();
        assert!(outcome.failed());
        assert!(!outcome.action_necessary());
        assert_eq!(outcome.label(), "applied");
    }

    #[test]
    fn test_abort_implies_failed() {
        let outcome = Outcome::abort(Some(Remedy::block(StatusCode::FORBIDDEN)))
            .with_message("signature matched");
        assert!(outcome.failed());
        assert!(outcome.action_necessary());
        assert_eq!(outcome.remedy(), Some(&Remedy::block(StatusCode::FORBIDDEN)));
        assert_eq!(outcome.message(), Some("signature matched"));
        assert_eq!(outcome.label(), "abort");
    }

    #[test]
    fn test_anomaly_never_aborts() {
        let outcome = Outcome::anomaly("body unreadable");
        assert!(outcome.is_anomaly());
        assert!(!outcome.failed());
        assert!(!outcome.action_necessary());
        assert!(!outcome.is_no_op());
        assert_eq!(outcome.label(), "anomaly");
    }

    #[test]
    fn test_remedy_deserialization() {
        let json = r#"{"type": "block", "status": 451}"#;
        let remedy: Remedy = serde_json::from_str(json).unwrap();
        assert_eq!(remedy, Remedy::block(StatusCode::UNAVAILABLE_FOR_LEGAL_REASONS));

        let json = r#"{"type": "redirect", "location": "/login"}"#;
        let remedy: Remedy = serde_json::from_str(json).unwrap();
        assert_eq!(remedy, Remedy::redirect("/login"));
    }

    #[test]
    fn test_remedy_rejects_bad_status() {
        let json = r#"{"type": "block", "status": 99}"#;
        assert!(serde_json::from_str::<Remedy>(json).is_err());
    }
}

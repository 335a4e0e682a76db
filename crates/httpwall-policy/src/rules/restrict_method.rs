//! HTTP method allow-listing

use http::{Method, StatusCode};
use httpwall_core::{request_path, Error, InspectedRequest, RawResponse, Result};

use crate::{InterceptingResponse, Outcome, PathMatcher, Phase, Remedy, Rule};

/// Rejects requests whose method is not on the allow-list for the path
#[derive(Debug, Clone)]
pub struct RestrictMethodRule {
    id: String,
    allowed: Vec<Method>,
    status: StatusCode,
    matcher: PathMatcher,
}

impl RestrictMethodRule {
    pub fn new<S: AsRef<str>>(
        id: impl Into<String>,
        allowed: &[S],
        status: StatusCode,
        matcher: PathMatcher,
    ) -> Result<Self> {
        let id = id.into();
        if allowed.is_empty() {
            return Err(Error::invalid_rule(&id, "allow-list is empty"));
        }
        let allowed = allowed
            .iter()
            .map(|m| {
                Method::from_bytes(m.as_ref().to_ascii_uppercase().as_bytes())
                    .map_err(|e| Error::invalid_rule(&id, format!("bad method '{}': {}", m.as_ref(), e)))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id,
            allowed,
            status,
            matcher,
        })
    }
}

impl Rule for RestrictMethodRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "restrict_method"
    }

    fn phase(&self) -> Phase {
        Phase::Inbound
    }

    fn check(
        &self,
        request: &InspectedRequest,
        _intercepted: Option<&mut InterceptingResponse>,
        _raw: &mut RawResponse,
    ) -> Outcome {
        if !self.matcher.applies_to(&request_path(request)).is_applicable() {
            return Outcome::no_op();
        }

        if self.allowed.contains(request.method()) {
            Outcome::no_op()
        } else {
            Outcome::abort(Some(Remedy::block(self.status)))
                .with_message(format!("method {} not allowed", request.method()))
        }
    }
}

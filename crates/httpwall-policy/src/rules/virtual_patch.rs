//! Virtual patching of known-vulnerable inputs

use http::header::HeaderName;
use httpwall_core::{request_path, InspectedRequest, RawResponse};
use regex::bytes::Regex;

use crate::{InterceptingResponse, Outcome, PathMatcher, Phase, Rule};

/// Request input a virtual patch inspects
#[derive(Debug, Clone)]
pub enum PatchTarget {
    /// Every value of a request header
    Header(HeaderName),
    /// Every value of a decoded query parameter
    Parameter(String),
}

/// Blocks requests whose targeted input matches an attack signature
#[derive(Debug, Clone)]
pub struct VirtualPatchRule {
    id: String,
    target: PatchTarget,
    signature: Regex,
    message: Option<String>,
    matcher: PathMatcher,
}

impl VirtualPatchRule {
    pub fn new(
        id: impl Into<String>,
        target: PatchTarget,
        signature: Regex,
        message: Option<String>,
        matcher: PathMatcher,
    ) -> Self {
        Self {
            id: id.into(),
            target,
            signature,
            message,
            matcher,
        }
    }

    fn matches(&self, request: &InspectedRequest) -> bool {
        match &self.target {
            PatchTarget::Header(name) => request
                .headers()
                .get_all(name)
                .iter()
                .any(|value| self.signature.is_match(value.as_bytes())),
            PatchTarget::Parameter(name) => {
                let Some(query) = request.uri().query() else {
                    return false;
                };
                url::form_urlencoded::parse(query.as_bytes())
                    .filter(|(key, _)| &**key == name.as_str())
                    .any(|(_, value)| self.signature.is_match(value.as_bytes()))
            }
        }
    }
}

impl Rule for VirtualPatchRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "virtual_patch"
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
        if !self.matcher.applies_to(&request_path(request)).is_applicable() || !self.matches(request) {
            return Outcome::no_op();
        }

        let message = self
            .message
            .clone()
            .unwrap_or_else(|| format!("signature matched on {:?}", self.target));
        Outcome::abort(None).with_message(message)
    }
}

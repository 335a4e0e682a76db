//! HTTPS enforcement

use http::header::HOST;
use httpwall_core::{request_path, InspectedRequest, RawResponse};

use crate::{InterceptingResponse, Outcome, PathMatcher, Phase, Remedy, Rule};

const FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Redirects plain-HTTP requests to their `https://` equivalent
#[derive(Debug, Clone)]
pub struct EnforceHttpsRule {
    id: String,
    matcher: PathMatcher,
}

impl EnforceHttpsRule {
    pub fn new(id: impl Into<String>, matcher: PathMatcher) -> Self {
        Self {
            id: id.into(),
            matcher,
        }
    }
}

/// The request arrived over TLS, directly or at a terminating proxy
fn is_secure(request: &InspectedRequest) -> bool {
    if request.uri().scheme_str() == Some("https") {
        return true;
    }
    request
        .headers()
        .get(FORWARDED_PROTO)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .is_some_and(|proto| proto.trim().eq_ignore_ascii_case("https"))
}

fn https_location(request: &InspectedRequest) -> Option<String> {
    let host = match request.uri().authority() {
        Some(authority) => authority.host().to_string(),
        None => {
            let host = request.headers().get(HOST)?.to_str().ok()?;
            // Drop the plain-HTTP port
            match host.rsplit_once(':') {
                Some((name, port)) if !port.ends_with(']') => name.to_string(),
                _ => host.to_string(),
            }
        }
    };
    let path_and_query = request
        .uri()
        .path_and_query()
        .map_or("/", |pq| pq.as_str());
    Some(format!("https://{}{}", host, path_and_query))
}

impl Rule for EnforceHttpsRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "enforce_https"
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
        if !self.matcher.applies_to(&request_path(request)).is_applicable() || is_secure(request) {
            return Outcome::no_op();
        }

        match https_location(request) {
            Some(location) => Outcome::abort(Some(Remedy::redirect(location))).with_message("plain HTTP request"),
            None => Outcome::abort(None).with_message("plain HTTP request without a host to redirect to"),
        }
    }
}

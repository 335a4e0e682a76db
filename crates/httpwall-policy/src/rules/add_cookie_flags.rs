//! Secure / HttpOnly enforcement on outgoing cookies

use http::header::{HeaderValue, SET_COOKIE};
use httpwall_core::{request_path, InspectedRequest, RawResponse};

use crate::interceptor::response_target;
use crate::{InterceptingResponse, Outcome, PathMatcher, PathPattern, Phase, Rule};

/// Appends missing `Secure` and `HttpOnly` attributes to `Set-Cookie` headers
/// already present on the response.
#[derive(Debug, Clone)]
pub struct AddCookieFlagsRule {
    id: String,
    cookie: PathPattern,
    secure: bool,
    http_only: bool,
    matcher: PathMatcher,
}

impl AddCookieFlagsRule {
    /// `cookie` is a full-match pattern over cookie names
    pub fn new(id: impl Into<String>, cookie: PathPattern, secure: bool, http_only: bool, matcher: PathMatcher) -> Self {
        Self {
            id: id.into(),
            cookie,
            secure,
            http_only,
            matcher,
        }
    }

    /// Rewritten cookie, or `None` when nothing needs to change
    fn harden(&self, cookie: &str) -> Option<String> {
        let name = cookie.split_once('=').map_or(cookie, |(name, _)| name).trim();
        if !self.cookie.matches(name) {
            return None;
        }

        let attributes: Vec<&str> = cookie.split(';').skip(1).map(str::trim).collect();
        let has = |flag: &str| attributes.iter().any(|a| a.eq_ignore_ascii_case(flag));

        let mut hardened = cookie.trim_end().trim_end_matches(';').to_string();
        let mut changed = false;
        if self.secure && !has("secure") {
            hardened.push_str("; Secure");
            changed = true;
        }
        if self.http_only && !has("httponly") {
            hardened.push_str("; HttpOnly");
            changed = true;
        }

        changed.then_some(hardened)
    }
}

impl Rule for AddCookieFlagsRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "add_cookie_flags"
    }

    fn phase(&self) -> Phase {
        Phase::Outbound
    }

    fn check(
        &self,
        request: &InspectedRequest,
        intercepted: Option<&mut InterceptingResponse>,
        raw: &mut RawResponse,
    ) -> Outcome {
        if !self.matcher.applies_to(&request_path(request)).is_applicable() {
            return Outcome::no_op();
        }

        let target = response_target(intercepted, raw);

        let mut changed = 0usize;
        let mut cookies = Vec::new();
        for value in target.headers().get_all(SET_COOKIE) {
            // Opaque values pass through untouched
            let rewritten = value
                .to_str()
                .ok()
                .and_then(|cookie| self.harden(cookie))
                .and_then(|cookie| HeaderValue::from_str(&cookie).ok());
            match rewritten {
                Some(hardened) => {
                    changed += 1;
                    cookies.push(hardened);
                }
                None => cookies.push(value.clone()),
            }
        }

        if changed == 0 {
            return Outcome::no_op();
        }

        let written = target.remove_header(&SET_COOKIE).and_then(|()| {
            cookies
                .into_iter()
                .try_for_each(|cookie| target.append_header(SET_COOKIE, cookie))
        });
        match written {
            Ok(()) => Outcome::applied().with_message(format!("hardened {} cookie(s)", changed)),
            Err(e) => Outcome::anomaly(format!("could not rewrite cookies: {}", e)),
        }
    }
}

//! Response body rewriting

use bytes::Bytes;
use http::header::CONTENT_LENGTH;
use httpwall_core::{request_path, InspectedRequest, RawResponse};
use regex::Regex;
use std::borrow::Cow;
use tracing::debug;

use crate::interceptor::response_target;
use crate::rules::content_type_matches;
use crate::{InterceptingResponse, Outcome, PathMatcher, Phase, Rule};

/// Regex substitution over the buffered response body.
///
/// Only UTF-8 bodies are rewritten; the `Content-Type` filter uses search
/// semantics so `text/html` also matches `text/html; charset=utf-8`.
#[derive(Debug, Clone)]
pub struct ReplaceContentRule {
    id: String,
    pattern: Regex,
    replacement: String,
    content_type: Option<Regex>,
    matcher: PathMatcher,
}

impl ReplaceContentRule {
    pub fn new(
        id: impl Into<String>,
        pattern: Regex,
        replacement: impl Into<String>,
        content_type: Option<Regex>,
        matcher: PathMatcher,
    ) -> Self {
        Self {
            id: id.into(),
            pattern,
            replacement: replacement.into(),
            content_type,
            matcher,
        }
    }
}

impl Rule for ReplaceContentRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "replace_content"
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
        if !content_type_matches(self.content_type.as_ref(), target) {
            return Outcome::no_op();
        }

        let Ok(body) = std::str::from_utf8(target.body()) else {
            debug!(rule = %self.id, "skipping non UTF-8 body");
            return Outcome::no_op();
        };

        let rewritten = match self.pattern.replace_all(body, self.replacement.as_str()) {
            Cow::Borrowed(_) => return Outcome::no_op(),
            Cow::Owned(rewritten) => rewritten,
        };

        let written = target
            .set_body(Bytes::from(rewritten))
            .and_then(|()| target.remove_header(&CONTENT_LENGTH));
        match written {
            Ok(()) => Outcome::applied(),
            Err(e) => Outcome::anomaly(format!("could not rewrite body: {}", e)),
        }
    }
}

//! Outbound content detection

use aho_corasick::AhoCorasick;
use http::StatusCode;
use httpwall_core::{request_path, Error, InspectedRequest, RawResponse, Result};
use regex::bytes::Regex;

use crate::interceptor::response_target;
use crate::rules::content_type_matches;
use crate::{InterceptingResponse, Outcome, PathMatcher, Phase, Remedy, Rule};

/// What a response body is scanned for
#[derive(Debug, Clone)]
pub enum ContentSignature {
    /// A single regular expression, search semantics
    Regex(Regex),
    /// Any of several case-insensitive keywords
    Keywords(AhoCorasick),
}

impl ContentSignature {
    pub fn regex(id: &str, pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Self::Regex)
            .map_err(|e| Error::invalid_rule(id, format!("bad content pattern: {}", e)))
    }

    pub fn keywords<I, S>(id: &str, keywords: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        AhoCorasick::builder()
            .ascii_case_insensitive(true)
            .build(keywords)
            .map(Self::Keywords)
            .map_err(|e| Error::invalid_rule(id, format!("failed to build keyword matcher: {}", e)))
    }

    /// Offset of the first match
    fn find(&self, body: &[u8]) -> Option<usize> {
        match self {
            Self::Regex(regex) => regex.find(body).map(|m| m.start()),
            Self::Keywords(keywords) => keywords.find(body).map(|m| m.start()),
        }
    }
}

/// Stops a response whose body leaks content it must not, such as stack
/// traces or card numbers.
#[derive(Debug, Clone)]
pub struct DetectOutboundContentRule {
    id: String,
    signature: ContentSignature,
    content_type: Option<regex::Regex>,
    status: Option<StatusCode>,
    matcher: PathMatcher,
}

impl DetectOutboundContentRule {
    /// Without a `status` the policy's default disposition applies on a match
    pub fn new(
        id: impl Into<String>,
        signature: ContentSignature,
        content_type: Option<regex::Regex>,
        status: Option<StatusCode>,
        matcher: PathMatcher,
    ) -> Self {
        Self {
            id: id.into(),
            signature,
            content_type,
            status,
            matcher,
        }
    }
}

impl Rule for DetectOutboundContentRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "detect_outbound_content"
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

        let response = response_target(intercepted, raw);
        if !content_type_matches(self.content_type.as_ref(), response) {
            return Outcome::no_op();
        }

        match self.signature.find(response.body()) {
            Some(offset) => Outcome::abort(self.status.map(Remedy::block))
                .with_message(format!("outbound content matched at byte {}", offset)),
            None => Outcome::no_op(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing::{get, raw};
    use bytes::Bytes;
    use http::header::CONTENT_TYPE;

    fn response(content_type: &str, body: &'static str) -> InterceptingResponse {
        InterceptingResponse::capture(
            http::Response::builder()
                .header(CONTENT_TYPE, content_type)
                .body(Bytes::from_static(body.as_bytes()))
                .unwrap(),
        )
    }

    #[test]
    fn test_regex_signature_aborts() {
        let rule = DetectOutboundContentRule::new(
            "stacktrace",
            ContentSignature::regex("stacktrace", r"at [\w.]+\(\w+\.java:\d+\)").unwrap(),
            None,
            Some(StatusCode::INTERNAL_SERVER_ERROR),
            PathMatcher::everywhere(),
        );
        let mut intercepted = response("text/html", "oops at com.acme.Foo(Foo.java:42)");

        let outcome = rule.check(&get("/"), Some(&mut intercepted), &mut raw());

        assert!(outcome.failed());
        assert!(outcome.action_necessary());
        assert_eq!(
            outcome.remedy(),
            Some(&Remedy::block(StatusCode::INTERNAL_SERVER_ERROR))
        );
        assert_eq!(outcome.message(), Some("outbound content matched at byte 5"));
    }

    #[test]
    fn test_keywords_are_case_insensitive() {
        let rule = DetectOutboundContentRule::new(
            "leaks",
            ContentSignature::keywords("leaks", ["ora-00933", "syntax error"]).unwrap(),
            Some(regex::Regex::new("text/").unwrap()),
            None,
            PathMatcher::everywhere(),
        );

        let mut leaking = response("text/plain", "SQL Syntax Error near 'x'");
        let outcome = rule.check(&get("/"), Some(&mut leaking), &mut raw());
        assert!(outcome.action_necessary());
        assert!(outcome.remedy().is_none());

        let mut binary = response("image/png", "syntax error");
        assert!(rule.check(&get("/"), Some(&mut binary), &mut raw()).is_no_op());

        let mut clean = response("text/plain", "all good");
        assert!(rule.check(&get("/"), Some(&mut clean), &mut raw()).is_no_op());
    }

    #[test]
    fn test_detection_does_not_modify_response() {
        let rule = DetectOutboundContentRule::new(
            "secret",
            ContentSignature::regex("secret", "secret").unwrap(),
            None,
            None,
            PathMatcher::everywhere(),
        );
        let mut intercepted = response("text/plain", "top secret");

        rule.check(&get("/"), Some(&mut intercepted), &mut raw());

        let mut committed = raw();
        intercepted.flush(&mut committed).unwrap();
        assert_eq!(committed.body().as_ref(), b"top secret");
    }

    #[test]
    fn test_bad_regex_is_config_error() {
        let err = ContentSignature::regex("broken", "([").unwrap_err();
        assert_eq!(err.rule_id(), Some("broken"));
    }
}

//! Header injection

use http::header::{HeaderName, HeaderValue};
use httpwall_core::{request_path, Error, InspectedRequest, RawResponse, Result};
use tracing::trace;

use crate::interceptor::response_target;
use crate::{InterceptingResponse, Outcome, PathMatcher, Phase, Rule};

/// Sets a fixed header on every response whose path is in scope
#[derive(Debug, Clone)]
pub struct AddHeaderRule {
    id: String,
    header: HeaderName,
    value: HeaderValue,
    matcher: PathMatcher,
}

impl AddHeaderRule {
    pub fn new(id: impl Into<String>, header: &str, value: &str, matcher: PathMatcher) -> Result<Self> {
        let id = id.into();
        let header = HeaderName::from_bytes(header.as_bytes())
            .map_err(|e| Error::invalid_rule(&id, format!("bad header name '{}': {}", header, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::invalid_rule(&id, format!("bad value for {}: {}", header, e)))?;

        Ok(Self {
            id,
            header,
            value,
            matcher,
        })
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    pub fn value(&self) -> &HeaderValue {
        &self.value
    }
}

impl Rule for AddHeaderRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "add_header"
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
        let path = request_path(request);
        let applicability = self.matcher.applies_to(&path);
        if !applicability.is_applicable() {
            trace!(rule = %self.id, path = %path, ?applicability, "header not added");
            return Outcome::no_op();
        }

        match response_target(intercepted, raw).set_header(self.header.clone(), self.value.clone()) {
            Ok(()) => Outcome::applied(),
            Err(e) => Outcome::anomaly(format!("could not set {}: {}", self.header, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing::{get, matcher, raw};
    use crate::{ExceptionEntry, ExceptionList, PathPattern, ResponseWriter};

    fn xfo(exceptions: &[&str]) -> AddHeaderRule {
        AddHeaderRule::new("xfo", "X-Frame-Options", "DENY", matcher("/admin/.*", exceptions)).unwrap()
    }

    #[test]
    fn test_sets_header_on_interceptor() {
        let rule = xfo(&[]);
        let mut intercepted = InterceptingResponse::new();
        let mut raw = raw();

        let outcome = rule.check(&get("/admin/users"), Some(&mut intercepted), &mut raw);

        assert!(outcome.failed());
        assert!(!outcome.action_necessary());
        assert_eq!(intercepted.header("x-frame-options").unwrap(), "DENY");
        assert!(raw.headers().is_empty());
    }

    #[test]
    fn test_falls_back_to_raw_response() {
        let rule = xfo(&[]);
        let mut raw = raw();

        let outcome = rule.check(&get("/admin/users"), None, &mut raw);

        assert!(outcome.failed());
        assert_eq!(raw.headers().get("x-frame-options").unwrap(), "DENY");
    }

    #[test]
    fn test_path_outside_pattern_is_no_op() {
        let rule = xfo(&[]);
        let mut intercepted = InterceptingResponse::new();
        let mut raw = raw();

        let outcome = rule.check(&get("/home"), Some(&mut intercepted), &mut raw);

        assert_eq!(outcome, Outcome::no_op());
        assert!(intercepted.headers().is_empty());
    }

    #[test]
    fn test_literal_exception_is_no_op() {
        let rule = xfo(&["/admin/export"]);
        let mut intercepted = InterceptingResponse::new();
        let mut raw = raw();

        let outcome = rule.check(&get("/admin/export"), Some(&mut intercepted), &mut raw);

        assert_eq!(outcome, Outcome::no_op());
        assert!(intercepted.header("x-frame-options").is_none());
    }

    #[test]
    fn test_pattern_exception_is_no_op() {
        let exceptions = ExceptionList::new(vec![ExceptionEntry::pattern("/admin/public/.*").unwrap()]);
        let rule = AddHeaderRule::new(
            "xfo",
            "X-Frame-Options",
            "DENY",
            PathMatcher::new(PathPattern::new("/admin/.*").unwrap(), exceptions),
        )
        .unwrap();
        let mut intercepted = InterceptingResponse::new();

        let outcome = rule.check(&get("/admin/public/logo.png"), Some(&mut intercepted), &mut raw());
        assert!(outcome.is_no_op());

        let outcome = rule.check(&get("/admin/private"), Some(&mut intercepted), &mut raw());
        assert!(outcome.failed());
    }

    #[test]
    fn test_query_string_is_not_part_of_path() {
        let rule = xfo(&["/admin/export"]);
        let outcome = rule.check(&get("/admin/export?format=csv"), None, &mut raw());
        assert!(outcome.is_no_op());
    }

    #[test]
    fn test_flushed_interceptor_reports_anomaly() {
        let rule = xfo(&[]);
        let mut intercepted = InterceptingResponse::new();
        let mut raw = raw();
        intercepted.flush(&mut raw).unwrap();

        let outcome = rule.check(&get("/admin/users"), Some(&mut intercepted), &mut raw);

        assert!(outcome.is_anomaly());
        assert!(!outcome.failed());
        assert!(raw.headers().is_empty());
    }

    #[test]
    fn test_invalid_header_name_is_rejected() {
        let err = AddHeaderRule::new("bad", "X Frame", "DENY", PathMatcher::everywhere()).unwrap_err();
        assert_eq!(err.rule_id(), Some("bad"));
    }

    #[test]
    fn test_invalid_header_value_is_rejected() {
        assert!(AddHeaderRule::new("bad", "X-Note", "line\nbreak", PathMatcher::everywhere()).is_err());
    }
}

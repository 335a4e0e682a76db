//! Concrete rule variants
//!
//! Every variant is a flat record of its own parameters plus a [`PathMatcher`]
//! deciding applicability. New variants plug in by implementing [`Rule`];
//! the evaluator does not change.
//!
//! [`PathMatcher`]: crate::PathMatcher
//! [`Rule`]: crate::Rule

mod add_cookie_flags;
mod add_header;
mod detect_outbound;
mod enforce_https;
mod replace_content;
mod require_role;
mod restrict_method;
mod virtual_patch;

pub use add_cookie_flags::AddCookieFlagsRule;
pub use add_header::AddHeaderRule;
pub use detect_outbound::{ContentSignature, DetectOutboundContentRule};
pub use enforce_https::EnforceHttpsRule;
pub use replace_content::ReplaceContentRule;
pub use require_role::RequireRoleRule;
pub use restrict_method::RestrictMethodRule;
pub use virtual_patch::{PatchTarget, VirtualPatchRule};

use http::header::CONTENT_TYPE;
use regex::Regex;

use crate::ResponseWriter;

/// Whether a response's `Content-Type` satisfies an optional filter.
///
/// Without a filter every response qualifies; with one, a response lacking
/// the header does not.
pub(crate) fn content_type_matches(filter: Option<&Regex>, response: &dyn ResponseWriter) -> bool {
    let Some(filter) = filter else {
        return true;
    };
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| filter.is_match(content_type))
}

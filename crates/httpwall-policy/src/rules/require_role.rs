//! Role-based access restriction

use httpwall_core::{current_user, request_path, InspectedRequest, RawResponse};

use crate::{InterceptingResponse, Outcome, PathMatcher, Phase, Remedy, Rule};

/// Requires a logged-in user holding at least one of the listed roles.
///
/// With an empty role list any logged-in, non-anonymous user is accepted.
#[derive(Debug, Clone)]
pub struct RequireRoleRule {
    id: String,
    roles: Vec<String>,
    remedy: Option<Remedy>,
    matcher: PathMatcher,
}

impl RequireRoleRule {
    pub fn new(id: impl Into<String>, roles: Vec<String>, remedy: Option<Remedy>, matcher: PathMatcher) -> Self {
        Self {
            id: id.into(),
            roles,
            remedy,
            matcher,
        }
    }

    fn deny(&self, reason: &str) -> Outcome {
        Outcome::abort(self.remedy.clone()).with_message(reason.to_string())
    }
}

impl Rule for RequireRoleRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &'static str {
        "require_role"
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

        let Some(user) = current_user(request) else {
            return self.deny("no user on request");
        };
        if user.is_anonymous() || !user.is_logged_in() {
            return self.deny("user not logged in");
        }
        if !self.roles.is_empty() && !self.roles.iter().any(|role| user.is_in_role(role)) {
            return self.deny(&format!("user '{}' lacks a required role", user.account_name()));
        }

        Outcome::no_op()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::testing::{get, matcher, raw};
    use httpwall_core::{CurrentUser, SessionUser};

    fn with_user(uri: &str, user: SessionUser) -> InspectedRequest {
        let mut request = get(uri);
        request.extensions_mut().insert(CurrentUser::new(user));
        request
    }

    fn rule(roles: &[&str]) -> RequireRoleRule {
        RequireRoleRule::new(
            "admins-only",
            roles.iter().map(|r| r.to_string()).collect(),
            Some(Remedy::redirect("/login")),
            matcher("/admin/.*", &[]),
        )
    }

    #[test]
    fn test_user_with_role_passes() {
        let request = with_user("/admin/users", SessionUser::logged_in("alice", ["admin"]));
        assert!(rule(&["admin", "ops"]).check(&request, None, &mut raw()).is_no_op());
    }

    #[test]
    fn test_user_without_role_is_denied() {
        let request = with_user("/admin/users", SessionUser::logged_in("bob", ["viewer"]));
        let outcome = rule(&["admin"]).check(&request, None, &mut raw());

        assert!(outcome.action_necessary());
        assert_eq!(outcome.remedy(), Some(&Remedy::redirect("/login")));
        assert_eq!(outcome.message(), Some("user 'bob' lacks a required role"));
    }

    #[test]
    fn test_missing_or_anonymous_user_is_denied() {
        assert!(rule(&[]).check(&get("/admin/users"), None, &mut raw()).action_necessary());

        let request = with_user("/admin/users", SessionUser::anonymous());
        assert!(rule(&[]).check(&request, None, &mut raw()).action_necessary());
    }

    #[test]
    fn test_any_logged_in_user_when_no_roles_listed() {
        let request = with_user("/admin/users", SessionUser::logged_in("carol", Vec::<String>::new()));
        assert!(rule(&[]).check(&request, None, &mut raw()).is_no_op());
    }

    #[test]
    fn test_paths_outside_scope_are_open() {
        assert!(rule(&["admin"]).check(&get("/public"), None, &mut raw()).is_no_op());
    }
}

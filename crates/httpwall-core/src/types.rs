//! Core types for httpwall

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use url::Url;

/// An inbound request with its body fully buffered
pub type InspectedRequest = http::Request<Bytes>;

/// The real response that is eventually committed to the client
pub type RawResponse = http::Response<Bytes>;

/// Path component of the request URI, without the query string, in the form
/// the application routes on.
///
/// Every applicability pattern and exception entry is matched against this
/// value. See [`normalize_path`].
pub fn request_path<B>(request: &http::Request<B>) -> Cow<'_, str> {
    normalize_path(request.uri().path())
}

/// Decode percent-encoded unreserved characters and resolve dot segments.
///
/// `/%61dmin/users` becomes `/admin/users` and `/public/%2e%2e/admin` becomes
/// `/admin`. Encoded reserved characters such as `%2F` stay encoded, so the
/// segment structure of the path never changes.
pub fn normalize_path(path: &str) -> Cow<'_, str> {
    let has_dot_segment = path.split('/').any(|segment| segment == "." || segment == "..");
    if !path.contains('%') && !has_dot_segment {
        return Cow::Borrowed(path);
    }

    let decoded = decode_unreserved(path);
    match Url::parse("http://localhost/") {
        Ok(mut url) => {
            url.set_path(&decoded);
            Cow::Owned(url.path().to_string())
        }
        Err(_) => Cow::Owned(decoded),
    }
}

fn decode_unreserved(path: &str) -> String {
    let mut decoded = String::with_capacity(path.len());
    let mut copied = 0;
    for (i, _) in path.match_indices('%') {
        if i < copied {
            continue;
        }
        let byte = path
            .get(i + 1..i + 3)
            .filter(|hex| hex.bytes().all(|b| b.is_ascii_hexdigit()))
            .and_then(|hex| u8::from_str_radix(hex, 16).ok());
        if let Some(byte) = byte.filter(|b| is_unreserved(*b)) {
            decoded.push_str(&path[copied..i]);
            decoded.push(char::from(byte));
            copied = i + 3;
        }
    }
    decoded.push_str(&path[copied..]);
    decoded
}

/// RFC 3986 unreserved set
fn is_unreserved(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~')
}

/// Read-only view of the authenticated user behind a request
///
/// Rules consult identity through this accessor only. Account lifecycle
/// (credentials, lockout, session expiry) lives elsewhere.
pub trait UserContext: Send + Sync {
    /// Unique account name
    fn account_name(&self) -> &str;

    /// Roles granted to the account
    fn roles(&self) -> &BTreeSet<String>;

    /// Anti-CSRF token bound to the user's session, if any
    fn csrf_token(&self) -> Option<&str>;

    /// Whether this is the anonymous placeholder user
    fn is_anonymous(&self) -> bool;

    /// Whether the user completed a login for this session
    fn is_logged_in(&self) -> bool;

    /// Check a single role
    fn is_in_role(&self, role: &str) -> bool {
        self.roles().contains(role)
    }
}

/// Shareable handle to the user of the current request
///
/// Stored in the request's `http::Extensions`.
#[derive(Clone)]
pub struct CurrentUser(Arc<dyn UserContext>);

impl CurrentUser {
    /// Wrap a user accessor
    pub fn new(user: impl UserContext + 'static) -> Self {
        Self(Arc::new(user))
    }
}

impl Deref for CurrentUser {
    type Target = dyn UserContext;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for CurrentUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CurrentUser")
            .field("account_name", &self.0.account_name())
            .field("roles", self.0.roles())
            .field("logged_in", &self.0.is_logged_in())
            .finish()
    }
}

/// User attached to a request, if the boundary resolved one
pub fn current_user<B>(request: &http::Request<B>) -> Option<&CurrentUser> {
    request.extensions().get::<CurrentUser>()
}

/// Plain record implementation of [`UserContext`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    /// Account name
    pub account_name: String,

    /// Granted roles
    #[serde(default)]
    pub roles: BTreeSet<String>,

    /// Session CSRF token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,

    /// Whether the session is authenticated
    #[serde(default)]
    pub logged_in: bool,
}

impl SessionUser {
    /// The anonymous user
    pub fn anonymous() -> Self {
        Self {
            account_name: "anonymous".to_string(),
            ..Default::default()
        }
    }

    /// A logged-in user with the given roles
    pub fn logged_in<I, S>(account_name: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            account_name: account_name.into(),
            roles: roles.into_iter().map(Into::into).collect(),
            csrf_token: None,
            logged_in: true,
        }
    }

    /// Attach a CSRF token
    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }
}

impl UserContext for SessionUser {
    fn account_name(&self) -> &str {
        &self.account_name
    }

    fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    fn csrf_token(&self) -> Option<&str> {
        self.csrf_token.as_deref()
    }

    fn is_anonymous(&self) -> bool {
        !self.logged_in && self.account_name == "anonymous"
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_path_ignores_query() {
        let request = http::Request::builder()
            .uri("https://example.com/admin/users?page=2")
            .body(Bytes::new())
            .unwrap();
        assert_eq!(request_path(&request), "/admin/users");
    }

    #[test]
    fn test_plain_path_is_borrowed() {
        assert!(matches!(normalize_path("/admin/users"), Cow::Borrowed("/admin/users")));
    }

    #[test]
    fn test_encoded_unreserved_characters_are_decoded() {
        assert_eq!(normalize_path("/%61dmin/users"), "/admin/users");
        assert_eq!(normalize_path("/%41DMIN/%7euser"), "/ADMIN/~user");

        let request = http::Request::builder()
            .uri("/%61dmin/users?q=%61")
            .body(Bytes::new())
            .unwrap();
        assert_eq!(request_path(&request), "/admin/users");
    }

    #[test]
    fn test_encoded_reserved_characters_stay_encoded() {
        assert_eq!(normalize_path("/admin%2Fusers"), "/admin%2Fusers");
        assert_eq!(normalize_path("/a%20b/%61"), "/a%20b/a");
        assert_eq!(normalize_path("/broken%6"), "/broken%6");
        assert_eq!(normalize_path("/sign%+1"), "/sign%+1");
    }

    #[test]
    fn test_dot_segments_are_resolved() {
        assert_eq!(normalize_path("/public/../admin/users"), "/admin/users");
        assert_eq!(normalize_path("/public/%2e%2E/admin"), "/admin");
        assert_eq!(normalize_path("/./admin/./users"), "/admin/users");
        assert_eq!(normalize_path("/../../admin"), "/admin");
    }

    #[test]
    fn test_current_user_roundtrip_through_extensions() {
        let mut request = http::Request::new(Bytes::new());
        assert!(current_user(&request).is_none());

        request
            .extensions_mut()
            .insert(CurrentUser::new(SessionUser::logged_in("alice", ["admin"])));

        let user = current_user(&request).unwrap();
        assert_eq!(user.account_name(), "alice");
        assert!(user.is_in_role("admin"));
        assert!(!user.is_in_role("auditor"));
        assert!(user.is_logged_in());
    }

    #[test]
    fn test_anonymous_user() {
        let user = SessionUser::anonymous();
        assert!(user.is_anonymous());
        assert!(!user.is_logged_in());
        assert!(user.roles().is_empty());
        assert!(user.csrf_token().is_none());
    }

    #[test]
    fn test_csrf_token() {
        let user = SessionUser::logged_in("bob", Vec::<String>::new()).with_csrf_token("t0k3n");
        assert_eq!(user.csrf_token(), Some("t0k3n"));
    }
}

//! Declarative rule files
//!
//! A rule set is a YAML document listing rules in evaluation order:
//!
//! ```yaml
//! name: storefront
//! settings:
//!   mode: block
//!   block_status: 403
//! rules:
//!   - type: add_header
//!     id: xfo
//!     header: X-Frame-Options
//!     value: DENY
//!     path: "/admin/.*"
//!     exceptions:
//!       - /admin/export
//!       - regex: "/admin/public/.*"
//! ```
//!
//! Paths and exception patterns must match the whole request path.

use http::StatusCode;
use httpwall_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::engine::{PolicyEngine, DEFAULT_MAX_RULES};
use crate::executor::{EnforcementMode, Enforcer};
use crate::rules::{
    AddCookieFlagsRule, AddHeaderRule, ContentSignature, DetectOutboundContentRule, EnforceHttpsRule,
    PatchTarget, ReplaceContentRule, RequireRoleRule, RestrictMethodRule, VirtualPatchRule,
};
use crate::{ExceptionEntry, ExceptionList, PathMatcher, PathPattern, Remedy, SharedRule};

/// How rule-level errors are handled while compiling a rule set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Any invalid rule fails the whole load
    #[default]
    Strict,
    /// Invalid rules are skipped with a warning
    Lenient,
}

/// A named, ordered collection of rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default = "default_version")]
    pub version: String,

    #[serde(default)]
    pub settings: PolicySettings,

    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

/// Enforcement settings of a rule set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicySettings {
    #[serde(default)]
    pub mode: EnforcementMode,

    #[serde(default = "default_block_status")]
    pub block_status: u16,

    #[serde(default = "default_redirect_location")]
    pub redirect_location: String,

    #[serde(default = "default_max_rules")]
    pub max_rules: usize,
}

impl Default for PolicySettings {
    fn default() -> Self {
        Self {
            mode: EnforcementMode::default(),
            block_status: default_block_status(),
            redirect_location: default_redirect_location(),
            max_rules: default_max_rules(),
        }
    }
}

impl PolicySettings {
    pub fn enforcer(&self) -> Result<Enforcer> {
        Enforcer::new(self.mode, self.block_status, self.redirect_location.clone())
    }
}

/// One rule as written in the rule file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: String,

    /// Paths the rule applies to
    #[serde(default = "default_path")]
    pub path: String,

    /// Paths exempt from the rule, checked in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exceptions: Vec<ExceptionDefinition>,

    #[serde(flatten)]
    pub kind: RuleKind,
}

/// An exception as written: a literal path, or `{regex: ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExceptionDefinition {
    Literal(String),
    Regex { regex: String },
}

/// Variant-specific parameters
///
/// Keys the rule itself does not know are handed to the variant, which
/// rejects any it does not know either. A misspelt `exceptions` fails the load.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", deny_unknown_fields)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    AddHeader {
        header: String,
        value: String,
    },

    AddCookieFlags {
        /// Cookie names to rewrite
        #[serde(default = "default_path")]
        cookie: String,
        #[serde(default = "default_true")]
        secure: bool,
        #[serde(default = "default_true")]
        http_only: bool,
    },

    ReplaceContent {
        pattern: String,
        replacement: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
    },

    DetectOutboundContent {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pattern: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        keywords: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
    },

    RestrictMethod {
        methods: Vec<String>,
        #[serde(default = "default_method_status")]
        status: u16,
    },

    EnforceHttps {},

    RequireRole {
        #[serde(default)]
        roles: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        redirect: Option<String>,
    },

    VirtualPatch {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        header: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parameter: Option<String>,
        pattern: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_block_status() -> u16 {
    403
}

fn default_redirect_location() -> String {
    "/error".to_string()
}

fn default_max_rules() -> usize {
    DEFAULT_MAX_RULES
}

fn default_path() -> String {
    ".*".to_string()
}

fn default_true() -> bool {
    true
}

fn default_method_status() -> u16 {
    405
}

impl RuleSet {
    /// Parse a rule set from YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a rule set from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Build every rule and split them into an engine.
    ///
    /// Settings errors and the rule limit always fail the load; per-rule
    /// errors are subject to `mode`.
    pub fn compile(&self, mode: LoadMode) -> Result<PolicyEngine> {
        let enforcer = self.settings.enforcer()?;
        if self.rules.len() > self.settings.max_rules {
            return Err(Error::ChainTooLong {
                limit: self.settings.max_rules,
                actual: self.rules.len(),
            });
        }

        let mut seen = HashSet::new();
        let mut rules: Vec<SharedRule> = Vec::with_capacity(self.rules.len());
        for definition in &self.rules {
            let built = if seen.insert(definition.id.as_str()) {
                definition.build()
            } else {
                Err(Error::DuplicateRule(definition.id.clone()))
            };

            match (built, mode) {
                (Ok(rule), _) => rules.push(rule),
                (Err(e), LoadMode::Strict) => return Err(e),
                (Err(e), LoadMode::Lenient) => {
                    warn!(policy = %self.name, rule = ?e.rule_id(), error = %e, "Skipping invalid rule");
                }
            }
        }

        let engine = PolicyEngine::new(rules, enforcer, self.settings.max_rules)?;
        info!(
            policy = %self.name,
            inbound = engine.inbound().len(),
            outbound = engine.outbound().len(),
            mode = ?self.settings.mode,
            "Policy compiled"
        );
        Ok(engine)
    }
}

impl RuleDefinition {
    /// Build the concrete rule this definition describes
    pub fn build(&self) -> Result<SharedRule> {
        let id = self.id.as_str();
        if id.trim().is_empty() {
            return Err(Error::invalid_rule(id, "rule id is empty"));
        }
        let matcher = self.matcher()?;

        let rule: SharedRule = match &self.kind {
            RuleKind::AddHeader { header, value } => Arc::new(AddHeaderRule::new(id, header, value, matcher)?),

            RuleKind::AddCookieFlags {
                cookie,
                secure,
                http_only,
            } => {
                if !secure && !http_only {
                    return Err(Error::invalid_rule(id, "neither secure nor http_only is set"));
                }
                let cookie = PathPattern::new(cookie).map_err(|e| bad_regex(id, "cookie", e))?;
                Arc::new(AddCookieFlagsRule::new(id, cookie, *secure, *http_only, matcher))
            }

            RuleKind::ReplaceContent {
                pattern,
                replacement,
                content_type,
            } => Arc::new(ReplaceContentRule::new(
                id,
                regex::Regex::new(pattern).map_err(|e| bad_regex(id, "pattern", e))?,
                replacement.as_str(),
                content_type_filter(id, content_type.as_deref())?,
                matcher,
            )),

            RuleKind::DetectOutboundContent {
                pattern,
                keywords,
                content_type,
                status,
            } => {
                let signature = match (pattern, keywords.is_empty()) {
                    (Some(pattern), true) => ContentSignature::regex(id, pattern)?,
                    (None, false) => ContentSignature::keywords(id, keywords)?,
                    _ => {
                        return Err(Error::invalid_rule(
                            id,
                            "exactly one of pattern or keywords is required",
                        ))
                    }
                };
                Arc::new(DetectOutboundContentRule::new(
                    id,
                    signature,
                    content_type_filter(id, content_type.as_deref())?,
                    status.map(|s| block_status(id, s)).transpose()?,
                    matcher,
                ))
            }

            RuleKind::RestrictMethod { methods, status } => Arc::new(RestrictMethodRule::new(
                id,
                methods.as_slice(),
                block_status(id, *status)?,
                matcher,
            )?),

            RuleKind::EnforceHttps {} => Arc::new(EnforceHttpsRule::new(id, matcher)),

            RuleKind::RequireRole {
                roles,
                status,
                redirect,
            } => {
                let remedy = match (status, redirect) {
                    (Some(_), Some(_)) => {
                        return Err(Error::invalid_rule(id, "status and redirect are mutually exclusive"))
                    }
                    (Some(status), None) => Some(Remedy::block(block_status(id, *status)?)),
                    (None, Some(location)) => Some(Remedy::redirect(redirect_location(id, location)?)),
                    (None, None) => None,
                };
                Arc::new(RequireRoleRule::new(id, roles.clone(), remedy, matcher))
            }

            RuleKind::VirtualPatch {
                header,
                parameter,
                pattern,
                message,
            } => {
                let target = match (header, parameter) {
                    (Some(header), None) => PatchTarget::Header(
                        header
                            .parse()
                            .map_err(|_| Error::invalid_rule(id, format!("invalid header name '{}'", header)))?,
                    ),
                    (None, Some(parameter)) => PatchTarget::Parameter(parameter.clone()),
                    _ => {
                        return Err(Error::invalid_rule(
                            id,
                            "exactly one of header or parameter is required",
                        ))
                    }
                };
                let signature = regex::bytes::Regex::new(pattern).map_err(|e| bad_regex(id, "pattern", e))?;
                Arc::new(VirtualPatchRule::new(id, target, signature, message.clone(), matcher))
            }
        };

        Ok(rule)
    }

    fn matcher(&self) -> Result<PathMatcher> {
        let pattern = PathPattern::new(&self.path).map_err(|e| bad_regex(&self.id, "path", e))?;
        let exceptions = self
            .exceptions
            .iter()
            .map(|exception| match exception {
                ExceptionDefinition::Literal(path) => Ok(ExceptionEntry::literal(path.as_str())),
                ExceptionDefinition::Regex { regex } => {
                    ExceptionEntry::pattern(regex).map_err(|e| bad_regex(&self.id, "exception", e))
                }
            })
            .collect::<Result<ExceptionList>>()?;
        Ok(PathMatcher::new(pattern, exceptions))
    }
}

fn bad_regex(id: &str, field: &str, err: regex::Error) -> Error {
    Error::invalid_rule(id, format!("invalid {} regex: {}", field, err))
}

fn content_type_filter(id: &str, pattern: Option<&str>) -> Result<Option<regex::Regex>> {
    pattern
        .map(|p| regex::Regex::new(p).map_err(|e| bad_regex(id, "content_type", e)))
        .transpose()
}

fn block_status(id: &str, status: u16) -> Result<StatusCode> {
    match StatusCode::from_u16(status) {
        Ok(code) if code.is_client_error() || code.is_server_error() => Ok(code),
        _ => Err(Error::invalid_rule(
            id,
            format!("status {} is not a 4xx or 5xx code", status),
        )),
    }
}

fn redirect_location(id: &str, location: &str) -> Result<String> {
    if location.is_empty() || http::HeaderValue::from_str(location).is_err() {
        return Err(Error::invalid_rule(id, format!("invalid redirect location '{}'", location)));
    }
    Ok(location.to_string())
}

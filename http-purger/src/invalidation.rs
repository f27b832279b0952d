//! Invalidation jobs, their outcomes, and the registry of invalidation types.

use crate::errors::{DispatchError, ValidationError};
use http::StatusCode;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A single unit of work: what to invalidate.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Invalidation {
    /// Type tag, e.g. `url` or `tag`
    pub r#type: String,
    /// URL, path, cache tag, ... depending on the type. Empty for `everything`.
    #[serde(default)]
    pub target: String,
}

impl Invalidation {
    pub fn new(r#type: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            r#type: r#type.into(),
            target: target.into(),
        }
    }
}

/// Terminal state of an invalidation. Once set it is never revised.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestOutcome {
    Succeeded,
    Failed(DispatchError),
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Succeeded)
    }
}

/// Which response statuses count as a successful invalidation.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(try_from = "StatusPolicyRepr")]
pub enum StatusPolicy {
    /// Any 2xx status
    #[default]
    Success,
    /// Exactly the listed status codes
    Codes(Vec<u16>),
}

impl StatusPolicy {
    pub fn accepts(&self, status: StatusCode) -> bool {
        match self {
            StatusPolicy::Success => status.is_success(),
            StatusPolicy::Codes(codes) => codes.contains(&status.as_u16()),
        }
    }
}

/// `accept: success` or `accept: [200, 404]`
#[derive(Deserialize)]
#[serde(untagged)]
enum StatusPolicyRepr {
    Keyword(String),
    Codes(Vec<u16>),
}

impl TryFrom<StatusPolicyRepr> for StatusPolicy {
    type Error = String;

    fn try_from(repr: StatusPolicyRepr) -> Result<Self, Self::Error> {
        match repr {
            StatusPolicyRepr::Keyword(keyword) if keyword == "success" => Ok(StatusPolicy::Success),
            StatusPolicyRepr::Keyword(other) => {
                Err(format!("expected \"success\" or a list of status codes, got {other:?}"))
            }
            StatusPolicyRepr::Codes(codes) => Ok(StatusPolicy::Codes(codes)),
        }
    }
}

/// How jobs of one invalidation type map onto requests and responses.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct TypeRule {
    pub name: String,
    /// Whether jobs of this type carry a target that can fill `{target}`
    #[serde(default = "default_takes_target")]
    pub takes_target: bool,
    #[serde(default)]
    pub accept: StatusPolicy,
}

fn default_takes_target() -> bool {
    true
}

impl TypeRule {
    pub fn new(name: &str, takes_target: bool) -> Self {
        Self {
            name: name.to_string(),
            takes_target,
            accept: StatusPolicy::Success,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        match &self.accept {
            StatusPolicy::Codes(codes) if codes.is_empty() => {
                Err(ValidationError::EmptyStatusPolicy(self.name.clone()))
            }
            _ => Ok(()),
        }
    }
}

/// Types shipped by the purge framework.
const BUILTIN_TYPES: &[(&str, bool)] = &[
    ("tag", true),
    ("url", true),
    ("wildcardurl", true),
    ("path", true),
    ("wildcardpath", true),
    ("domain", true),
    ("regex", true),
    ("raw", true),
    ("everything", false),
];

/// Registry mapping invalidation type names to their rules.
#[derive(Clone, Debug)]
pub struct InvalidationTypes {
    rules: IndexMap<String, TypeRule>,
}

impl Default for InvalidationTypes {
    fn default() -> Self {
        let rules = BUILTIN_TYPES
            .iter()
            .map(|(name, takes_target)| (name.to_string(), TypeRule::new(name, *takes_target)))
            .collect();
        Self { rules }
    }
}

impl InvalidationTypes {
    /// Built-in types, extended or overridden by `overrides`.
    pub fn with_overrides(overrides: Vec<TypeRule>) -> Result<Self, ValidationError> {
        let mut types = Self::default();
        for rule in overrides {
            rule.validate()?;
            types.rules.insert(rule.name.clone(), rule);
        }
        Ok(types)
    }

    pub fn get(&self, name: &str) -> Option<&TypeRule> {
        self.rules.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(String::as_str)
    }
}

//! Resource addressing.
//!
//! A [`ResourcePath`] names either one resource (`doc/42`), every resource of
//! a type (`doc/*`) or the resources whose attribute equals a value
//! (`doc/[ownerUid=u1]`). A [`Resource`] is a concrete record that permission
//! checks and resolvers operate on.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::errors::{AccessError, AccessResult};

pub const WILDCARD: &str = "*";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    Wildcard,
    Uid(String),
    Filter { attribute: String, value: String },
}

/// Immutable parsed form of `type/selector`.
///
/// Comparison is exact string equality on every part; nothing is normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePath {
    raw: String,
    resource_type: String,
    selector: Selector,
}

impl ResourcePath {
    /// Splits at the first `/`. A bracketed selector must be `[attr=value]`
    /// with no whitespace; the value may be wrapped in double quotes.
    pub fn parse(path: &str) -> AccessResult<Self> {
        let (resource_type, selector) = path
            .split_once('/')
            .ok_or_else(|| AccessError::malformed(path))?;
        if resource_type.is_empty() || selector.is_empty() {
            return Err(AccessError::malformed(path));
        }

        let selector = if selector.contains(['[', ']']) {
            parse_filter(selector).ok_or_else(|| AccessError::malformed(path))?
        } else if selector == WILDCARD {
            Selector::Wildcard
        } else {
            Selector::Uid(selector.to_string())
        };

        Ok(Self {
            raw: path.to_string(),
            resource_type: resource_type.to_string(),
            selector,
        })
    }

    pub fn wildcard(resource_type: impl Into<String>) -> Self {
        let resource_type = resource_type.into();
        Self {
            raw: format!("{resource_type}/{WILDCARD}"),
            resource_type,
            selector: Selector::Wildcard,
        }
    }

    pub fn for_uid(resource_type: impl Into<String>, uid: impl Into<String>) -> Self {
        let resource_type = resource_type.into();
        let uid = uid.into();
        Self {
            raw: format!("{resource_type}/{uid}"),
            resource_type,
            selector: Selector::Uid(uid),
        }
    }

    /// Goes through [`ResourcePath::parse`], so a value the grammar cannot
    /// carry (whitespace, say) is rejected rather than built.
    pub fn for_filter(resource_type: &str, attribute: &str, value: &str) -> AccessResult<Self> {
        Self::parse(&format!("{resource_type}/[{attribute}={value}]"))
    }

    /// The string this path was parsed from
    pub fn path(&self) -> &str {
        &self.raw
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self.selector, Selector::Wildcard)
    }

    pub fn uid(&self) -> Option<&str> {
        match &self.selector {
            Selector::Uid(uid) => Some(uid),
            _ => None,
        }
    }

    pub fn filter(&self) -> Option<(&str, &str)> {
        match &self.selector {
            Selector::Filter { attribute, value } => Some((attribute, value)),
            _ => None,
        }
    }
}

fn parse_filter(selector: &str) -> Option<Selector> {
    let inner = selector.strip_prefix('[')?.strip_suffix(']')?;
    if inner.chars().any(char::is_whitespace) {
        return None;
    }
    let (attribute, value) = inner.split_once('=')?;
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);
    if attribute.is_empty() || value.is_empty() {
        return None;
    }
    Some(Selector::Filter {
        attribute: attribute.to_string(),
        value: value.to_string(),
    })
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ResourcePath {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourcePath {
    type Error = AccessError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourcePath> for String {
    fn from(path: ResourcePath) -> Self {
        path.raw
    }
}

/// A concrete resource record as returned by a resource store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub resource_type: String,
    pub uid: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            uid: uid.into(),
            attributes: Map::new(),
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Synthetic `type/uid` path for this instance
    pub fn path(&self) -> ResourcePath {
        ResourcePath::for_uid(&self.resource_type, &self.uid)
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    /// Strings compare by content, other scalars by their JSON rendering.
    /// `uid` and `resourceType` are addressable like any other attribute.
    pub fn attribute_equals(&self, name: &str, expected: &str) -> bool {
        match name {
            "uid" if !self.attributes.contains_key(name) => self.uid == expected,
            "resourceType" if !self.attributes.contains_key(name) => self.resource_type == expected,
            _ => match self.attributes.get(name) {
                Some(Value::String(s)) => s == expected,
                Some(Value::Null) | None => false,
                Some(other) => other.to_string() == expected,
            },
        }
    }
}

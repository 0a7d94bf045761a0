use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Base of the element type URLs used by object-model JSON.
pub const SHR_SPEC_BASE: &str = "http://standardhealthrecord.org/spec/";

/// Namespace used for object-model primitives such as `decimal` or `concept`.
pub const PRIMITIVE_NAMESPACE: &str = "primitive";

const ENTRY_KEYWORD: &str = "_Entry";
const CONCEPT_KEYWORD: &str = "_Concept";

/// A namespaced object-model name, e.g. `shr.core.Quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier {
    pub namespace: String,
    pub name: String,
}

impl Identifier {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn primitive(name: impl Into<String>) -> Self {
        Self::new(PRIMITIVE_NAMESPACE, name)
    }

    /// Parses `shr.core.Quantity`, `<shr.core.Quantity>` or a bare primitive such as `decimal`.
    pub fn parse(value: &str) -> Option<Self> {
        let bare = value
            .trim()
            .trim_start_matches('<')
            .trim_end_matches('>')
            .trim();
        if bare.is_empty() {
            return None;
        }

        match bare.rsplit_once('.') {
            Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
                Some(Self::new(namespace, name))
            }
            Some(_) => None,
            None if bare.starts_with(|c: char| c.is_ascii_lowercase()) => {
                Some(Self::primitive(bare))
            }
            None => Some(Self::new("", bare)),
        }
    }

    pub fn fqn(&self) -> String {
        if self.namespace.is_empty() || self.is_primitive() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    pub fn is_primitive(&self) -> bool {
        self.namespace == PRIMITIVE_NAMESPACE
    }

    /// `_Entry` and `_Concept` are mapping keywords, not resolvable element names.
    pub fn is_keyword(&self) -> bool {
        self.namespace.is_empty() && (self.name == ENTRY_KEYWORD || self.name == CONCEPT_KEYWORD)
    }

    /// Profile id derived from the identifier, e.g. `shr-core-Quantity`.
    pub fn fhir_id(&self) -> String {
        format!("{}-{}", self.namespace.replace('.', "-"), self.name)
    }

    pub fn fhir_extension_id(&self) -> String {
        format!("{}-extension", self.fhir_id())
    }

    /// Accessor name used on instances: lowercased first letter, dashes replaced.
    pub fn accessor_name(&self) -> String {
        let sanitized = self.name.replace('-', "_");
        let mut chars = sanitized.chars();
        match chars.next() {
            Some(first) => first.to_lowercase().chain(chars).collect(),
            None => String::new(),
        }
    }

    /// Type URL, e.g. `http://standardhealthrecord.org/spec/shr/core/Quantity`.
    pub fn shr_url(&self) -> String {
        format!("{SHR_SPEC_BASE}{}/{}", self.namespace.replace('.', "/"), self.name)
    }

    /// Inverse of [`Identifier::shr_url`]; the path must be `spec/<namespace parts>/<Name>`.
    pub fn from_shr_url(value: &str) -> Option<Self> {
        let url = Url::parse(value).ok()?;
        let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            ["spec", namespace @ .., name] if !namespace.is_empty() => {
                Some(Self::new(namespace.join("."), *name))
            }
            _ => None,
        }
    }

    /// Whether a wire type code names this identifier, by fully-qualified or bare name.
    pub fn matches_code(&self, code: &str) -> bool {
        code == self.fqn() || code == self.name
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fqn())
    }
}

/// Cardinality of a field or wire element. `max == None` is unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cardinality {
    pub min: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<u32>,
}

impl Default for Cardinality {
    fn default() -> Self {
        Self::optional()
    }
}

impl Cardinality {
    pub fn new(min: u32, max: Option<u32>) -> Self {
        Self { min, max }
    }

    pub fn optional() -> Self {
        Self::new(0, Some(1))
    }

    pub fn required() -> Self {
        Self::new(1, Some(1))
    }

    pub fn unbounded() -> Self {
        Self::new(0, None)
    }

    pub fn prohibited() -> Self {
        Self::new(0, Some(0))
    }

    /// Parses FHIR-style bounds: `min` as an integer, `max` as an integer or `*`.
    pub fn parse(min: u32, max: &str) -> Option<Self> {
        let max = match max.trim() {
            "*" => None,
            other => Some(other.parse::<u32>().ok()?),
        };
        Some(Self::new(min, max))
    }

    pub fn is_list(&self) -> bool {
        match self.max {
            None => true,
            Some(max) => max > 1,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.max.is_none()
    }

    pub fn is_prohibited(&self) -> bool {
        self.max == Some(0)
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) => write!(f, "{}..{}", self.min, max),
            None => write!(f, "{}..*", self.min),
        }
    }
}

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::error::{Result, ShrMapError};
use crate::types::{Cardinality, Identifier};

static MAPPING_SEGMENT: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"<([^<>]*)>"));

const VALUE_SENTINEL: &str = "<Value>";

/// Fixed value declared on a wire element for one of its types, e.g. `fixedCodeableConcept`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedValue {
    pub field: String,
    pub value: serde_json::Value,
}

/// One allowed concrete type of a wire element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireTypeEntry {
    pub code: String,
    /// Extension or type profile URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(
        default,
        rename = "targetProfile",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed: Option<FixedValue>,
}

impl WireTypeEntry {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            profile: None,
            target_profile: None,
            fixed: None,
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_target_profile(mut self, target: impl Into<String>) -> Self {
        self.target_profile = Some(target.into());
        self
    }

    /// Attaches a fixed value under the code-derived field name.
    pub fn with_fixed(mut self, value: serde_json::Value) -> Self {
        self.fixed = Some(FixedValue {
            field: fixed_field_name(&self.code),
            value,
        });
        self
    }

    pub fn is_reference(&self) -> bool {
        self.code == "Reference"
    }

    /// FHIR primitive types use lowercase codes.
    pub fn is_primitive(&self) -> bool {
        self.code.starts_with(|c: char| c.is_ascii_lowercase())
    }

    /// Fixed value stored under `fixed<Code>`, if declared.
    pub fn fixed_value(&self) -> Option<&serde_json::Value> {
        self.fixed
            .as_ref()
            .filter(|fixed| fixed.field == fixed_field_name(&self.code))
            .map(|fixed| &fixed.value)
    }
}

/// Capitalizes the first letter of a type code, e.g. `dateTime` becomes `DateTime`.
pub fn capitalize(code: &str) -> String {
    let mut chars = code.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn fixed_field_name(code: &str) -> String {
    format!("fixed{}", capitalize(code))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlicingDescriptor {
    /// Discriminator paths relative to the sliced element.
    #[serde(rename = "discriminatorPaths")]
    pub discriminator_paths: Vec<String>,
}

/// A declared correspondence between a wire path and object-model accessors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MappingAnnotation {
    /// Maps to the value slot of the element being compiled.
    Value,
    Chain(Vec<Identifier>),
}

impl MappingAnnotation {
    pub fn chain(identifiers: Vec<Identifier>) -> Self {
        Self::Chain(identifiers)
    }

    /// Parses `<Value>` or a dotted chain such as `<shr.a.B>.<shr.c.D>`.
    pub fn parse(map: &str) -> Result<Self> {
        let map = map.trim();
        if map == VALUE_SENTINEL {
            return Ok(Self::Value);
        }

        let regex = MAPPING_SEGMENT
            .as_ref()
            .map_err(|e| ShrMapError::parsing(format!("Invalid mapping pattern: {e}")))?;

        let identifiers = regex
            .captures_iter(map)
            .map(|captures| {
                Identifier::parse(&captures[1])
                    .ok_or_else(|| ShrMapError::parsing(format!("Invalid mapping segment in '{map}'")))
            })
            .collect::<Result<Vec<_>>>()?;

        if identifiers.is_empty() {
            return Err(ShrMapError::parsing(format!(
                "Mapping '{map}' contains no <identifier> segments"
            )));
        }

        Ok(Self::Chain(identifiers))
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Self::Value)
    }

    pub fn terminal(&self) -> Option<&Identifier> {
        match self {
            Self::Value => None,
            Self::Chain(identifiers) => identifiers.last(),
        }
    }
}

impl fmt::Display for MappingAnnotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value => f.write_str(VALUE_SENTINEL),
            Self::Chain(identifiers) => {
                let rendered: Vec<String> = identifiers
                    .iter()
                    .map(|identifier| format!("<{}>", identifier.fqn()))
                    .collect();
                f.write_str(&rendered.join("."))
            }
        }
    }
}

impl TryFrom<String> for MappingAnnotation {
    type Error = ShrMapError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<MappingAnnotation> for String {
    fn from(annotation: MappingAnnotation) -> Self {
        annotation.to_string()
    }
}

/// One element of a flattened profile tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireElementNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub path: String,
    #[serde(default)]
    pub card: Cardinality,
    #[serde(default, rename = "baseCard", skip_serializing_if = "Option::is_none")]
    pub base_card: Option<Cardinality>,
    #[serde(default)]
    pub types: Vec<WireTypeEntry>,
    #[serde(default, rename = "sliceName", skip_serializing_if = "Option::is_none")]
    pub slice_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slicing: Option<SlicingDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mappings: Vec<MappingAnnotation>,
}

impl WireElementNode {
    pub fn new(path: impl Into<String>, card: Cardinality) -> Self {
        Self {
            id: None,
            path: path.into(),
            card,
            base_card: None,
            types: Vec::new(),
            slice_name: None,
            slicing: None,
            mappings: Vec::new(),
        }
    }

    pub fn with_base_card(mut self, base: Cardinality) -> Self {
        self.base_card = Some(base);
        self
    }

    pub fn with_type(mut self, entry: WireTypeEntry) -> Self {
        self.types.push(entry);
        self
    }

    pub fn with_slice_name(mut self, name: impl Into<String>) -> Self {
        self.slice_name = Some(name.into());
        self
    }

    pub fn with_slicing(mut self, discriminator_paths: Vec<String>) -> Self {
        self.slicing = Some(SlicingDescriptor {
            discriminator_paths,
        });
        self
    }

    pub fn with_mapping(mut self, annotation: MappingAnnotation) -> Self {
        self.mappings.push(annotation);
        self
    }

    pub fn last_segment(&self) -> &str {
        self.path.rsplit('.').next().unwrap_or(&self.path)
    }

    pub fn depth(&self) -> usize {
        self.path.split('.').count()
    }

    /// List-valued on the wire, by its own or its base cardinality.
    pub fn is_list(&self) -> bool {
        self.card.is_list() || self.base_card.is_some_and(|base| base.is_list())
    }

    pub fn is_prohibited(&self) -> bool {
        self.card.is_prohibited()
    }

    pub fn is_choice(&self) -> bool {
        self.path.ends_with("[x]")
    }

    pub fn is_extension(&self) -> bool {
        matches!(self.last_segment(), "extension" | "modifierExtension")
    }

    pub fn is_reference(&self) -> bool {
        !self.types.is_empty() && self.types.iter().all(WireTypeEntry::is_reference)
    }

    /// Whether every declared type is a wire primitive.
    pub fn is_primitive(&self) -> bool {
        !self.types.is_empty() && self.types.iter().all(WireTypeEntry::is_primitive)
    }

    /// Extension URL declared on the first type that carries one.
    pub fn extension_url(&self) -> Option<&str> {
        self.types.iter().find_map(|entry| entry.profile.as_deref())
    }

    pub fn target_profile(&self) -> Option<&str> {
        self.types
            .iter()
            .find_map(|entry| entry.target_profile.as_deref())
    }

    /// `a.b.c` is an ancestor of `a.b.c.d`; an unsliced node is an ancestor of its slices.
    pub fn is_ancestor_of(&self, other: &WireElementNode) -> bool {
        if other.path.len() > self.path.len()
            && other.path.starts_with(&self.path)
            && other.path.as_bytes()[self.path.len()] == b'.'
        {
            return true;
        }

        other.path == self.path && self.slice_name.is_none() && other.slice_name.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mapping_annotations() {
        assert_eq!(MappingAnnotation::parse("<Value>").unwrap(), MappingAnnotation::Value);

        let chain = MappingAnnotation::parse("<shr.vital.SystolicPressure>.<decimal>").unwrap();
        match &chain {
            MappingAnnotation::Chain(ids) => {
                assert_eq!(ids.len(), 2);
                assert_eq!(ids[0], Identifier::new("shr.vital", "SystolicPressure"));
                assert!(ids[1].is_primitive());
            }
            MappingAnnotation::Value => panic!("expected chain"),
        }
        assert_eq!(chain.to_string(), "<shr.vital.SystolicPressure>.<decimal>");

        assert!(MappingAnnotation::parse("shr.core.Foo").is_err());
    }

    #[test]
    fn test_mapping_annotation_serde_as_string() {
        let json = serde_json::json!(["<Value>", "<shr.core.Comment>"]);
        let parsed: Vec<MappingAnnotation> = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(serde_json::to_value(&parsed).unwrap(), json);
    }

    #[test]
    fn test_ancestry() {
        let component = WireElementNode::new("Observation.component", Cardinality::unbounded());
        let systolic = WireElementNode::new("Observation.component", Cardinality::optional())
            .with_slice_name("systolic");
        let code = WireElementNode::new("Observation.component.code", Cardinality::required());
        let similar = WireElementNode::new("Observation.componentX", Cardinality::optional());

        assert!(component.is_ancestor_of(&systolic));
        assert!(component.is_ancestor_of(&code));
        assert!(systolic.is_ancestor_of(&code));
        assert!(!systolic.is_ancestor_of(&component));
        assert!(!component.is_ancestor_of(&similar));
    }

    #[test]
    fn test_fixed_value_lookup() {
        let entry = WireTypeEntry::new("code").with_fixed(serde_json::json!("final"));
        assert_eq!(entry.fixed.as_ref().unwrap().field, "fixedCode");
        assert_eq!(entry.fixed_value(), Some(&serde_json::json!("final")));
        assert_eq!(capitalize("dateTime"), "DateTime");
    }
}

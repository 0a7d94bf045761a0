//! StructureDefinition input format.
//!
//! Raw FHIR StructureDefinition resources as exported alongside the object model.
//! Only the parts the compiler consumes are modeled; everything else is ignored.

use serde::{Deserialize, Serialize};

use super::{
    ExtensionStyle, MappingAnnotation, ProfileTree, WireElementNode, WireTypeEntry,
    fixed_field_name,
};
use crate::error::{Result, ShrMapError};
use crate::types::{Cardinality, Identifier};

/// Type information within a StructureDefinition element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureDefinitionType {
    /// FHIR type code
    pub code: String,
    /// Profile URLs for this type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<OneOrMany>,
    /// Target profile URLs for Reference types
    #[serde(
        default,
        rename = "targetProfile",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_profile: Option<OneOrMany>,
}

/// Older exports carry a single profile string, newer ones a list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn first(&self) -> Option<&str> {
        match self {
            Self::One(value) => Some(value.as_str()),
            Self::Many(values) => values.first().map(String::as_str),
        }
    }
}

/// Slicing definition in StructureDefinition format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureDefinitionSlicing {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discriminator: Option<Vec<StructureDefinitionDiscriminator>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureDefinitionDiscriminator {
    #[serde(rename = "type", default)]
    pub type_name: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureDefinitionBase {
    pub path: String,
    pub min: u32,
    pub max: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureDefinitionMapping {
    pub identity: String,
    pub map: String,
}

/// Element definition in StructureDefinition format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureDefinitionElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub path: String,
    #[serde(default, rename = "sliceName", skip_serializing_if = "Option::is_none")]
    pub slice_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slicing: Option<StructureDefinitionSlicing>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<StructureDefinitionBase>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_info: Option<Vec<StructureDefinitionType>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mapping: Option<Vec<StructureDefinitionMapping>>,
    /// Remaining properties, including any `fixed[x]` value.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureDefinitionIdentifier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureDefinitionSnapshot {
    pub element: Vec<StructureDefinitionElement>,
}

/// The subset of a StructureDefinition needed to build a profile tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureDefinition {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Vec<StructureDefinitionIdentifier>>,
    pub snapshot: StructureDefinitionSnapshot,
}

impl StructureDefinition {
    pub fn from_json(value: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Builds the profile tree, keeping only mappings of the given identity.
    pub fn to_profile_tree(&self, mapping_identity: &str) -> Result<ProfileTree> {
        let elements = self
            .snapshot
            .element
            .iter()
            .map(|element| convert_element(element, mapping_identity, &self.id))
            .collect::<Result<Vec<_>>>()?;

        let extension = (self.type_name == super::EXTENSION_RESOURCE_TYPE).then(|| {
            let simple = elements
                .iter()
                .any(|node| node.path == "Extension.value[x]" && !node.is_prohibited());
            if simple {
                ExtensionStyle::Simple
            } else {
                ExtensionStyle::Complex
            }
        });

        let identifier = self
            .identifier
            .as_ref()
            .and_then(|identifiers| identifiers.first())
            .and_then(|identifier| Identifier::parse(&identifier.value));

        Ok(ProfileTree {
            id: self.id.clone(),
            url: self.url.clone(),
            resource_type: self.type_name.clone(),
            identifier,
            extension,
            elements,
        })
    }
}

fn convert_element(
    element: &StructureDefinitionElement,
    mapping_identity: &str,
    profile_id: &str,
) -> Result<WireElementNode> {
    let card = parse_cardinality(element.min.unwrap_or(0), element.max.as_deref(), profile_id, &element.path)?;

    let base_card = match &element.base {
        Some(base) => Some(parse_cardinality(
            base.min,
            Some(base.max.as_str()),
            profile_id,
            &element.path,
        )?),
        None => None,
    };

    let types = element
        .type_info
        .iter()
        .flatten()
        .map(|type_info| {
            let mut entry = WireTypeEntry::new(&type_info.code);
            entry.profile = type_info
                .profile
                .as_ref()
                .and_then(OneOrMany::first)
                .map(str::to_string);
            entry.target_profile = type_info
                .target_profile
                .as_ref()
                .and_then(OneOrMany::first)
                .map(str::to_string);
            if let Some(value) = element.extra.get(&fixed_field_name(&type_info.code)) {
                entry = entry.with_fixed(value.clone());
            }
            entry
        })
        .collect();

    let mut mappings: Vec<MappingAnnotation> = Vec::new();
    for mapping in element
        .mapping
        .iter()
        .flatten()
        .filter(|mapping| mapping.identity == mapping_identity)
    {
        match MappingAnnotation::parse(&mapping.map) {
            Ok(annotation) if !mappings.contains(&annotation) => mappings.push(annotation),
            Ok(_) => {}
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    profile = profile_id,
                    path = %element.path,
                    map = %mapping.map,
                    "ignoring unparseable mapping: {e}"
                );
            }
        }
    }

    let slicing = element.slicing.as_ref().map(|slicing| {
        slicing
            .discriminator
            .iter()
            .flatten()
            .map(|discriminator| discriminator.path.clone())
            .collect::<Vec<_>>()
    });

    Ok(WireElementNode {
        id: element.id.clone(),
        path: element.path.clone(),
        card,
        base_card,
        types,
        slice_name: element.slice_name.clone(),
        slicing: slicing.map(|discriminator_paths| super::SlicingDescriptor {
            discriminator_paths,
        }),
        mappings,
    })
}

fn parse_cardinality(
    min: u32,
    max: Option<&str>,
    profile_id: &str,
    path: &str,
) -> Result<Cardinality> {
    match max {
        None => Ok(Cardinality::new(min, Some(1))),
        Some(max) => Cardinality::parse(min, max).ok_or_else(|| {
            ShrMapError::invalid_profile(profile_id, format!("invalid max '{max}' at {path}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_convert_sliced_observation() {
        let sd = StructureDefinition::from_json(json!({
            "resourceType": "StructureDefinition",
            "id": "shr-vital-BloodPressure",
            "url": "http://example.com/StructureDefinition/shr-vital-BloodPressure",
            "type": "Observation",
            "identifier": [{"system": "http://standardhealthrecord.org", "value": "shr.vital.BloodPressure"}],
            "snapshot": {"element": [
                {"path": "Observation", "min": 0, "max": "*"},
                {"path": "Observation.component", "min": 0, "max": "*",
                 "slicing": {"discriminator": [{"type": "value", "path": "code"}], "rules": "open"}},
                {"path": "Observation.component", "sliceName": "systolic", "min": 0, "max": "1",
                 "base": {"path": "Observation.component", "min": 0, "max": "*"}},
                {"path": "Observation.component.code", "min": 1, "max": "1",
                 "type": [{"code": "CodeableConcept"}],
                 "fixedCodeableConcept": {"coding": [{"system": "http://loinc.org", "code": "8480-6"}]},
                 "mapping": [{"identity": "shr", "map": "<shr.vital.SystolicPressure>.<shr.vital.ComponentCode>"},
                             {"identity": "v2", "map": "OBX-3"}]}
            ]}
        }))
        .unwrap();

        let tree = sd.to_profile_tree("shr").unwrap();
        assert_eq!(tree.resource_type, "Observation");
        assert_eq!(tree.identifier, Some(Identifier::new("shr.vital", "BloodPressure")));
        assert!(!tree.is_extension());

        let code = &tree.elements[3];
        assert_eq!(code.mappings.len(), 1);
        assert_eq!(
            code.types[0].fixed_value().unwrap()["coding"][0]["code"],
            json!("8480-6")
        );
        assert!(tree.elements[2].is_list());
        assert_eq!(
            tree.elements[1].slicing.as_ref().unwrap().discriminator_paths,
            vec!["code".to_string()]
        );
    }

    #[test]
    fn test_extension_style_detection() {
        let sd = StructureDefinition::from_json(json!({
            "id": "shr-simple-IntegerValueElement-extension",
            "url": "http://example.com/StructureDefinition/shr-simple-IntegerValueElement-extension",
            "type": "Extension",
            "snapshot": {"element": [
                {"path": "Extension", "min": 0, "max": "*"},
                {"path": "Extension.extension", "min": 0, "max": "0"},
                {"path": "Extension.url", "min": 1, "max": "1", "type": [{"code": "uri"}]},
                {"path": "Extension.value[x]", "min": 0, "max": "1", "type": [{"code": "integer"}]}
            ]}
        }))
        .unwrap();

        let tree = sd.to_profile_tree("shr").unwrap();
        assert_eq!(tree.extension, Some(ExtensionStyle::Simple));
    }

    #[test]
    fn test_invalid_max_is_rejected() {
        let sd = StructureDefinition::from_json(json!({
            "id": "broken", "type": "Patient",
            "snapshot": {"element": [{"path": "Patient", "min": 0, "max": "lots"}]}
        }))
        .unwrap();
        assert!(sd.to_profile_tree("shr").is_err());
    }
}

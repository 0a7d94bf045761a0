use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use super::CompilerConfig;
use crate::compiler::MappingCompiler;
use crate::error::Result;
use crate::model::ObjectModelGraph;
use crate::profile::{ProfileSet, ProfileTree, StructureDefinition};
use crate::types::ElementDef;

/// Everything one compilation run reads: object-model elements plus the profiles they map to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SpecificationBundle {
    pub elements: Vec<ElementDef>,
    /// Profiles already in tree form.
    pub profiles: Vec<ProfileTree>,
    /// FHIR StructureDefinitions, converted with the configured mapping identity.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub structure_definitions: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub known_types: BTreeSet<String>,
}

impl SpecificationBundle {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn into_parts(self, config: &CompilerConfig) -> Result<(ObjectModelGraph, ProfileSet)> {
        let mut profiles = self.profiles;
        for definition in self.structure_definitions {
            let definition = StructureDefinition::from_json(definition)?;
            profiles.push(definition.to_profile_tree(&config.mapping_identity)?);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            elements = self.elements.len(),
            profiles = profiles.len(),
            "loaded specification bundle"
        );

        let profiles = ProfileSet::new(profiles)?.with_known_types(self.known_types);
        Ok((ObjectModelGraph::from(self.elements), profiles))
    }

    pub fn into_compiler(self, config: CompilerConfig) -> Result<MappingCompiler> {
        config.validate()?;
        let (graph, profiles) = self.into_parts(&config)?;
        Ok(MappingCompiler::with_config(graph, profiles, config))
    }
}

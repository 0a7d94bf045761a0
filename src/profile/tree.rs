use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use url::Url;

use super::WireElementNode;
use crate::error::{Result, ShrMapError};
use crate::types::Identifier;

pub const EXTENSION_RESOURCE_TYPE: &str = "Extension";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExtensionStyle {
    /// Carries a single `value[x]`.
    Simple,
    /// Carries nested extensions.
    Complex,
}

/// Flattened element list of one profile or extension definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileTree {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "resourceType")]
    pub resource_type: String,
    /// Object-model element this definition was exported from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<ExtensionStyle>,
    pub elements: Vec<WireElementNode>,
}

impl ProfileTree {
    pub fn new(id: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: None,
            resource_type: resource_type.into(),
            identifier: None,
            extension: None,
            elements: Vec::new(),
        }
    }

    /// Profile for `identifier`, identified by its derived profile id.
    pub fn for_element(identifier: &Identifier, resource_type: impl Into<String>) -> Self {
        let mut tree = Self::new(identifier.fhir_id(), resource_type);
        tree.identifier = Some(identifier.clone());
        tree
    }

    /// Extension definition for `identifier`.
    pub fn extension_for(
        identifier: &Identifier,
        url: impl Into<String>,
        style: ExtensionStyle,
    ) -> Self {
        let mut tree = Self::new(identifier.fhir_extension_id(), EXTENSION_RESOURCE_TYPE);
        tree.identifier = Some(identifier.clone());
        tree.url = Some(url.into());
        tree.extension = Some(style);
        tree
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_element(mut self, node: WireElementNode) -> Self {
        self.elements.push(node);
        self
    }

    pub fn is_extension(&self) -> bool {
        self.extension.is_some()
    }

    pub fn root(&self) -> Option<&WireElementNode> {
        self.elements.first()
    }

    pub fn has_mappings(&self) -> bool {
        self.elements.iter().any(|node| !node.mappings.is_empty())
    }

    /// Rejects trees that cannot be compiled at all.
    pub fn validate(&self) -> Result<()> {
        let root = self
            .root()
            .ok_or_else(|| ShrMapError::invalid_profile(&self.id, "profile has no elements"))?;

        if root.path != self.resource_type {
            return Err(ShrMapError::invalid_profile(
                &self.id,
                format!(
                    "root element '{}' does not match resource type '{}'",
                    root.path, self.resource_type
                ),
            ));
        }

        let prefix = format!("{}.", self.resource_type);
        if let Some(stray) = self
            .elements
            .iter()
            .skip(1)
            .find(|node| !node.path.starts_with(&prefix))
        {
            return Err(ShrMapError::invalid_profile(
                &self.id,
                format!("element '{}' is outside the resource root", stray.path),
            ));
        }

        if self.is_extension() && self.url.is_none() {
            return Err(ShrMapError::invalid_profile(&self.id, "extension has no URL"));
        }

        Ok(())
    }
}

/// All profiles and extensions of a specification set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "RawProfileSet")]
pub struct ProfileSet {
    profiles: Vec<ProfileTree>,
    /// Resource and data type names of the wire type system. Empty disables the check.
    #[serde(default, rename = "knownTypes", skip_serializing_if = "BTreeSet::is_empty")]
    known_types: BTreeSet<String>,
    #[serde(skip)]
    by_id: HashMap<String, usize>,
    #[serde(skip)]
    by_url: HashMap<String, usize>,
}

#[derive(Deserialize)]
struct RawProfileSet {
    #[serde(default)]
    profiles: Vec<ProfileTree>,
    #[serde(default, rename = "knownTypes")]
    known_types: BTreeSet<String>,
}

impl TryFrom<RawProfileSet> for ProfileSet {
    type Error = ShrMapError;

    fn try_from(raw: RawProfileSet) -> Result<Self> {
        Ok(Self::new(raw.profiles)?.with_known_types(raw.known_types))
    }
}

impl ProfileSet {
    pub fn new(profiles: Vec<ProfileTree>) -> Result<Self> {
        let mut set = Self {
            profiles,
            ..Self::default()
        };
        set.reindex()?;
        Ok(set)
    }

    pub fn with_known_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_types = types.into_iter().map(Into::into).collect();
        self
    }

    fn reindex(&mut self) -> Result<()> {
        self.by_id.clear();
        self.by_url.clear();

        for (index, profile) in self.profiles.iter().enumerate() {
            if self.by_id.insert(profile.id.clone(), index).is_some() {
                #[cfg(feature = "tracing")]
                tracing::warn!(profile = %profile.id, "duplicate profile id, last definition wins");
            }
            if let Some(url) = &profile.url {
                Url::parse(url).map_err(|e| {
                    ShrMapError::invalid_profile(&profile.id, format!("invalid URL '{url}': {e}"))
                })?;
                self.by_url.insert(url.clone(), index);
            }
        }

        Ok(())
    }

    pub fn push(&mut self, profile: ProfileTree) -> Result<()> {
        self.profiles.push(profile);
        self.reindex()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProfileTree> {
        self.profiles.iter()
    }

    pub fn by_id(&self, id: &str) -> Option<&ProfileTree> {
        self.by_id.get(id).map(|&index| &self.profiles[index])
    }

    pub fn by_url(&self, url: &str) -> Option<&ProfileTree> {
        self.by_url.get(url).map(|&index| &self.profiles[index])
    }

    /// Resource profile exported for `identifier`.
    pub fn profile_for(&self, identifier: &Identifier) -> Option<&ProfileTree> {
        self.by_id(&identifier.fhir_id())
            .filter(|profile| !profile.is_extension())
    }

    /// Extension exported for `identifier`.
    pub fn extension_for(&self, identifier: &Identifier) -> Option<&ProfileTree> {
        self.by_id(&identifier.fhir_extension_id())
            .filter(|profile| profile.is_extension())
    }

    /// Object-model identifier behind an extension URL.
    pub fn identifier_for_url(&self, url: &str) -> Option<&Identifier> {
        self.by_url(url)?.identifier.as_ref()
    }

    pub fn is_known_type(&self, resource_type: &str) -> bool {
        self.known_types.is_empty() || self.known_types.contains(resource_type)
    }
}

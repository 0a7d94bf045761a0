use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::types::{ElementDef, FieldSpec, Identifier};

/// Read-only lookup table of object-model element definitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<ElementDef>", into = "Vec<ElementDef>")]
pub struct ObjectModelGraph {
    elements: BTreeMap<Identifier, ElementDef>,
}

impl ObjectModelGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_element(mut self, element: ElementDef) -> Self {
        self.insert(element);
        self
    }

    pub fn insert(&mut self, element: ElementDef) {
        self.elements.insert(element.identifier.clone(), element);
    }

    pub fn get(&self, identifier: &Identifier) -> Option<&ElementDef> {
        self.elements.get(identifier)
    }

    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.elements.contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ElementDef> {
        self.elements.values()
    }

    pub fn all_elements_in<'a>(&'a self, namespace: &'a str) -> impl Iterator<Item = &'a ElementDef> {
        self.elements
            .values()
            .filter(move |element| element.identifier.namespace == namespace)
    }

    pub fn namespaces(&self) -> Vec<String> {
        let mut namespaces: Vec<String> = self
            .elements
            .keys()
            .map(|identifier| identifier.namespace.clone())
            .collect();
        namespaces.dedup();
        namespaces
    }

    /// The element followed by its base chain. Stops on cycles or unknown bases.
    pub fn lineage<'a>(&'a self, element: &'a ElementDef) -> Vec<&'a ElementDef> {
        let mut chain = vec![element];
        let mut seen = HashSet::from([&element.identifier]);
        let mut current = element;

        while let Some(base) = current.base.as_ref() {
            if !seen.insert(base) {
                break;
            }
            match self.elements.get(base) {
                Some(parent) => {
                    chain.push(parent);
                    current = parent;
                }
                None => break,
            }
        }

        chain
    }

    /// Value slot of the element, inherited from a base when not declared locally.
    pub fn value_of<'a>(&'a self, element: &'a ElementDef) -> Option<&'a FieldSpec> {
        self.lineage(element)
            .into_iter()
            .find_map(|def| def.value.as_ref())
    }

    /// Named field by effective identifier, searching own fields before inherited ones.
    pub fn field_of<'a>(
        &'a self,
        element: &'a ElementDef,
        identifier: &Identifier,
    ) -> Option<&'a FieldSpec> {
        self.lineage(element)
            .into_iter()
            .find_map(|def| def.field_for(identifier))
    }
}

impl From<Vec<ElementDef>> for ObjectModelGraph {
    fn from(elements: Vec<ElementDef>) -> Self {
        let mut graph = Self::new();
        for element in elements {
            graph.insert(element);
        }
        graph
    }
}

impl From<ObjectModelGraph> for Vec<ElementDef> {
    fn from(graph: ObjectModelGraph) -> Self {
        graph.elements.into_values().collect()
    }
}

impl FromIterator<ElementDef> for ObjectModelGraph {
    fn from_iter<T: IntoIterator<Item = ElementDef>>(iter: T) -> Self {
        Self::from(iter.into_iter().collect::<Vec<_>>())
    }
}

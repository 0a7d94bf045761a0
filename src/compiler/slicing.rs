use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::CompilationContext;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::plan::{SliceConstraint, SliceSelector};
use crate::profile::WireElementNode;
use crate::types::Identifier;

const THIS_DISCRIMINATOR: &str = "$this";

/// A fixed value a slice must carry at an absolute discriminator path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscriminatorConstraint {
    pub path: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceEntry {
    pub name: String,
    pub constraints: Vec<DiscriminatorConstraint>,
    /// Set when a discriminator value could not be determined.
    pub unresolved: bool,
}

impl SliceEntry {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            constraints: Vec::new(),
            unresolved: false,
        }
    }

    pub fn is_selectable(&self) -> bool {
        !self.unresolved && !self.constraints.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceGroup {
    pub path: String,
    /// Absolute discriminator paths.
    pub discriminator_paths: Vec<String>,
    /// Slices in declaration order.
    pub slices: Vec<SliceEntry>,
}

impl SliceGroup {
    pub fn slice(&self, name: &str) -> Option<&SliceEntry> {
        self.slices.iter().find(|slice| slice.name == name)
    }

    /// Runtime selector for a slice; unresolved slices get an empty, unselectable selector.
    pub fn selector(&self, name: &str) -> Option<SliceSelector> {
        let slice = self.slice(name)?;
        let constraints = if slice.is_selectable() {
            slice
                .constraints
                .iter()
                .map(|constraint| SliceConstraint {
                    path: relative_segments(&self.path, &constraint.path),
                    value: constraint.value.clone(),
                })
                .collect()
        } else {
            Vec::new()
        };

        Some(SliceSelector {
            name: slice.name.clone(),
            constraints,
        })
    }
}

fn relative_segments(group_path: &str, path: &str) -> Vec<String> {
    path.strip_prefix(group_path)
        .map(|rest| rest.trim_start_matches('.'))
        .filter(|rest| !rest.is_empty())
        .map(|rest| rest.split('.').map(str::to_string).collect())
        .unwrap_or_default()
}

/// Group path to slice group.
pub type SliceMap = BTreeMap<String, SliceGroup>;

struct OpenGroup {
    group: SliceGroup,
    current: Option<usize>,
}

pub struct SliceResolver;

impl SliceResolver {
    pub fn new() -> Self {
        Self
    }

    pub fn resolve(
        &self,
        nodes: &[WireElementNode],
        element: &Identifier,
        context: &mut CompilationContext,
    ) -> SliceMap {
        let mut result = SliceMap::new();
        let mut stack: Vec<OpenGroup> = Vec::new();

        for node in nodes {
            while let Some(top) = stack.last() {
                if covers(&top.group.path, &node.path) {
                    break;
                }
                if let Some(open) = stack.pop() {
                    finalize(open, &mut result);
                }
            }

            if let Some(slice_name) = &node.slice_name {
                if let Some(open) = stack
                    .iter_mut()
                    .rev()
                    .find(|open| open.group.path == node.path)
                {
                    open.group.slices.push(SliceEntry::new(slice_name));
                    open.current = Some(open.group.slices.len() - 1);
                }
            }

            if let Some(slicing) = &node.slicing {
                if !node.is_extension() {
                    stack.push(OpenGroup {
                        group: SliceGroup {
                            path: node.path.clone(),
                            discriminator_paths: slicing
                                .discriminator_paths
                                .iter()
                                .map(|path| absolute_discriminator(&node.path, path))
                                .collect(),
                            slices: Vec::new(),
                        },
                        current: None,
                    });
                    continue;
                }
            }

            for open in stack.iter_mut() {
                if !open.group.discriminator_paths.contains(&node.path) {
                    continue;
                }
                let Some(current) = open.current else {
                    // Discriminator declared on the unsliced template.
                    continue;
                };
                let slice = &mut open.group.slices[current];

                match fixed_value_of(node, context.config.strict_discriminators) {
                    FixedLookup::Found(value) => slice.constraints.push(DiscriminatorConstraint {
                        path: node.path.clone(),
                        value,
                    }),
                    FixedLookup::Missing => {
                        slice.unresolved = true;
                        context.report(
                            Diagnostic::new(
                                DiagnosticKind::UnresolvedSliceDiscriminator,
                                element,
                                format!(
                                    "no fixed value for discriminator of slice '{}'",
                                    slice.name
                                ),
                            )
                            .at_path(&node.path),
                        );
                    }
                    FixedLookup::Ambiguous(count) => {
                        slice.unresolved = true;
                        context.report(
                            Diagnostic::new(
                                DiagnosticKind::UnresolvedSliceDiscriminator,
                                element,
                                format!(
                                    "{count} distinct fixed values for discriminator of slice '{}'",
                                    slice.name
                                ),
                            )
                            .at_path(&node.path),
                        );
                    }
                }
            }
        }

        while let Some(open) = stack.pop() {
            finalize(open, &mut result);
        }

        let slices = result.values().map(|group| group.slices.len()).sum();
        context.record_slices(slices);
        result
    }
}

impl Default for SliceResolver {
    fn default() -> Self {
        Self::new()
    }
}

enum FixedLookup {
    Found(serde_json::Value),
    Missing,
    Ambiguous(usize),
}

fn fixed_value_of(node: &WireElementNode, strict: bool) -> FixedLookup {
    let mut values: Vec<&serde_json::Value> = Vec::new();
    for value in node.types.iter().filter_map(|entry| entry.fixed_value()) {
        if !values.contains(&value) {
            values.push(value);
        }
    }

    match values.len() {
        0 => FixedLookup::Missing,
        1 => FixedLookup::Found(values[0].clone()),
        count if strict => FixedLookup::Ambiguous(count),
        _ => values
            .last()
            .map(|value| FixedLookup::Found((*value).clone()))
            .unwrap_or(FixedLookup::Missing),
    }
}

fn covers(group_path: &str, path: &str) -> bool {
    path == group_path
        || (path.len() > group_path.len()
            && path.starts_with(group_path)
            && path.as_bytes()[group_path.len()] == b'.')
}

fn absolute_discriminator(group_path: &str, discriminator: &str) -> String {
    if discriminator == THIS_DISCRIMINATOR {
        group_path.to_string()
    } else {
        format!("{group_path}.{discriminator}")
    }
}

fn finalize(open: OpenGroup, result: &mut SliceMap) {
    result.insert(open.group.path.clone(), open.group);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CompilerConfig;
    use crate::profile::WireTypeEntry;
    use crate::types::Cardinality;
    use serde_json::json;

    fn coded(code: &str) -> WireTypeEntry {
        WireTypeEntry::new("CodeableConcept").with_fixed(json!({
            "coding": [{"system": "http://loinc.org", "code": code}]
        }))
    }

    fn blood_pressure() -> Vec<WireElementNode> {
        vec![
            WireElementNode::new("Observation", Cardinality::unbounded()),
            WireElementNode::new("Observation.component", Cardinality::unbounded())
                .with_slicing(vec!["code".to_string()]),
            WireElementNode::new("Observation.component.code", Cardinality::required())
                .with_type(WireTypeEntry::new("CodeableConcept")),
            WireElementNode::new("Observation.component", Cardinality::optional())
                .with_slice_name("systolic"),
            WireElementNode::new("Observation.component.code", Cardinality::required())
                .with_type(coded("8480-6")),
            WireElementNode::new("Observation.component", Cardinality::optional())
                .with_slice_name("diastolic"),
            WireElementNode::new("Observation.component.code", Cardinality::required())
                .with_type(coded("8462-4")),
            WireElementNode::new("Observation.extension", Cardinality::unbounded())
                .with_slicing(vec!["url".to_string()]),
        ]
    }

    fn resolve(nodes: &[WireElementNode], config: CompilerConfig) -> (SliceMap, usize) {
        let mut context = CompilationContext::new(&config);
        let element = Identifier::new("shr.vital", "BloodPressure");
        let map = SliceResolver::new().resolve(nodes, &element, &mut context);
        (map, context.diagnostics().len())
    }

    #[test]
    fn test_blood_pressure_slices() {
        let (map, diagnostics) = resolve(&blood_pressure(), CompilerConfig::default());
        assert_eq!(diagnostics, 0);
        assert_eq!(map.len(), 1, "extension slicing is ignored");

        let group = &map["Observation.component"];
        assert_eq!(group.discriminator_paths, vec!["Observation.component.code"]);
        assert_eq!(group.slices.len(), 2);

        let systolic = group.slice("systolic").unwrap();
        assert_eq!(systolic.constraints.len(), 1);
        assert_eq!(
            systolic.constraints[0].value["coding"][0]["code"],
            json!("8480-6")
        );

        let selector = group.selector("diastolic").unwrap();
        assert_eq!(selector.constraints[0].path, vec!["code".to_string()]);
        assert!(selector.is_selectable());
    }

    #[test]
    fn test_missing_fixed_value_marks_slice_unselectable() {
        let mut nodes = blood_pressure();
        nodes[6] = WireElementNode::new("Observation.component.code", Cardinality::required())
            .with_type(WireTypeEntry::new("CodeableConcept"));

        let (map, diagnostics) = resolve(&nodes, CompilerConfig::default());
        assert_eq!(diagnostics, 1);
        let group = &map["Observation.component"];
        assert!(!group.slice("diastolic").unwrap().is_selectable());
        assert!(!group.selector("diastolic").unwrap().is_selectable());
        assert!(group.slice("systolic").unwrap().is_selectable());
    }

    #[test]
    fn test_ambiguous_fixed_values() {
        let mut nodes = blood_pressure();
        nodes[4] = WireElementNode::new("Observation.component.code", Cardinality::required())
            .with_type(coded("8480-6"))
            .with_type(WireTypeEntry::new("Coding").with_fixed(json!({"code": "x"})));

        let (strict, diagnostics) = resolve(&nodes, CompilerConfig::default());
        assert_eq!(diagnostics, 1);
        assert!(!strict["Observation.component"].slice("systolic").unwrap().is_selectable());

        let (lenient, diagnostics) = resolve(
            &nodes,
            CompilerConfig::default().with_strict_discriminators(false),
        );
        assert_eq!(diagnostics, 0);
        let systolic = lenient["Observation.component"].slice("systolic").unwrap();
        assert_eq!(systolic.constraints[0].value, json!({"code": "x"}));
    }

    #[test]
    fn test_this_discriminator() {
        let nodes = vec![
            WireElementNode::new("Patient", Cardinality::unbounded()),
            WireElementNode::new("Patient.identifier", Cardinality::unbounded())
                .with_slicing(vec!["$this".to_string()]),
            WireElementNode::new("Patient.identifier", Cardinality::optional())
                .with_slice_name("mrn")
                .with_type(WireTypeEntry::new("Identifier").with_fixed(json!({"system": "urn:mrn"}))),
        ];
        let (map, diagnostics) = resolve(&nodes, CompilerConfig::default());
        assert_eq!(diagnostics, 0);
        let selector = map["Patient.identifier"].selector("mrn").unwrap();
        assert!(selector.constraints[0].path.is_empty());
    }
}

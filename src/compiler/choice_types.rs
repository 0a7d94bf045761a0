use std::collections::{BTreeMap, BTreeSet};

use super::CompilationContext;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::model::ObjectModelGraph;
use crate::profile::{MappingAnnotation, ProfileSet, WireElementNode, WireTypeEntry, capitalize};
use crate::types::{ElementDef, FieldSpec, Identifier};

const CHOICE_SUFFIX: &str = "[x]";

/// Profile nodes after choice expansion.
#[derive(Debug, Clone, Default)]
pub struct ChoiceExpansion {
    pub nodes: Vec<WireElementNode>,
    /// Concrete nodes that share their annotation with sibling variants, keyed by node index.
    pub type_guards: BTreeMap<usize, String>,
}

/// Expands mapped `[x]` elements into one concrete element per matching wire type.
pub struct ChoiceExpander<'a> {
    graph: &'a ObjectModelGraph,
    profiles: &'a ProfileSet,
}

impl<'a> ChoiceExpander<'a> {
    pub fn new(graph: &'a ObjectModelGraph, profiles: &'a ProfileSet) -> Self {
        Self { graph, profiles }
    }

    /// Wire type codes of `node` each of its annotations can hold.
    pub fn expand(
        &self,
        node: &WireElementNode,
        root: &ElementDef,
    ) -> BTreeMap<MappingAnnotation, BTreeSet<String>> {
        node.mappings
            .iter()
            .map(|annotation| {
                let codes = node
                    .types
                    .iter()
                    .filter(|entry| self.annotation_matches(annotation, root, &entry.code))
                    .map(|entry| entry.code.clone())
                    .collect();
                (annotation.clone(), codes)
            })
            .collect()
    }

    /// Codes from `types` that a value slot of type `spec` can hold.
    pub fn value_codes(&self, spec: &FieldSpec, types: &[WireTypeEntry]) -> Vec<String> {
        let mut codes: Vec<String> = Vec::new();
        for entry in types {
            if self.spec_matches(spec, &entry.code) && !codes.contains(&entry.code) {
                codes.push(entry.code.clone());
            }
        }
        codes
    }

    fn annotation_matches(&self, annotation: &MappingAnnotation, root: &ElementDef, code: &str) -> bool {
        match annotation {
            MappingAnnotation::Value => self
                .graph
                .value_of(root)
                .is_some_and(|value| self.spec_matches(value, code)),
            MappingAnnotation::Chain(_) => match annotation.terminal() {
                Some(terminal) => self.terminal_matches(terminal, code),
                None => false,
            },
        }
    }

    fn terminal_matches(&self, terminal: &Identifier, code: &str) -> bool {
        if terminal.is_primitive() {
            return terminal.name == code;
        }

        let value_matches = self
            .graph
            .get(terminal)
            .and_then(|def| self.graph.value_of(def))
            .is_some_and(|value| self.spec_matches(value, code));

        value_matches || terminal.matches_code(code) || self.profile_type_is(terminal, code)
    }

    fn spec_matches(&self, spec: &FieldSpec, code: &str) -> bool {
        match spec {
            FieldSpec::Identifiable { .. } | FieldSpec::Reference { .. } => spec
                .effective_identifier()
                .is_some_and(|identifier| identifier.matches_code(code)),
            FieldSpec::Choice { .. } => spec.concrete_options().into_iter().any(|option| {
                option.effective_identifier().is_some_and(|identifier| {
                    identifier.matches_code(code) || self.profile_type_is(identifier, code)
                })
            }),
            FieldSpec::Placeholder { .. } => false,
        }
    }

    fn profile_type_is(&self, identifier: &Identifier, code: &str) -> bool {
        self.profiles
            .profile_for(identifier)
            .is_some_and(|profile| profile.resource_type == code)
    }

    /// Replaces every mapped `[x]` node with its concrete variants; unmapped ones pass through.
    pub fn expand_nodes(
        &self,
        nodes: &[WireElementNode],
        root: &ElementDef,
        context: &mut CompilationContext,
    ) -> ChoiceExpansion {
        let mut expansion = ChoiceExpansion::default();
        let mut position = 0;

        while position < nodes.len() {
            let node = &nodes[position];
            if !node.is_choice() || node.mappings.is_empty() {
                expansion.nodes.push(node.clone());
                position += 1;
                continue;
            }

            let mut end = position + 1;
            while end < nodes.len() && node.is_ancestor_of(&nodes[end]) {
                end += 1;
            }
            let descendants = &nodes[position + 1..end];
            position = end;

            let matches = self.expand(node, root);
            context.record_choice_expansion();

            // Each wire type is claimed by the first annotation that matches it.
            let mut claimed: BTreeSet<String> = BTreeSet::new();
            for annotation in &node.mappings {
                let codes = &matches[annotation];
                let free: BTreeSet<&String> =
                    codes.iter().filter(|code| !claimed.contains(*code)).collect();
                if free.is_empty() {
                    let message = if codes.is_empty() {
                        format!("no wire type of '{}' matches {annotation}", node.path)
                    } else {
                        format!(
                            "wire types of '{}' matching {annotation} are already mapped",
                            node.path
                        )
                    };
                    context.report(
                        Diagnostic::new(DiagnosticKind::UnresolvedMapping, &root.identifier, message)
                            .at_path(&node.path)
                            .with_annotation(annotation),
                    );
                    continue;
                }

                for entry in node.types.iter().filter(|entry| free.contains(&entry.code)) {
                    if free.len() > 1 {
                        expansion
                            .type_guards
                            .insert(expansion.nodes.len(), entry.code.clone());
                    }
                    let concrete_path = concrete_path(&node.path, &entry.code);

                    let mut concrete = node.clone();
                    concrete.path = concrete_path.clone();
                    concrete.id = None;
                    concrete.types = vec![entry.clone()];
                    concrete.mappings = vec![annotation.clone()];
                    expansion.nodes.push(concrete);

                    for descendant in descendants.iter().filter(|d| d.path != node.path) {
                        let mut moved = descendant.clone();
                        moved.path = format!("{concrete_path}{}", &descendant.path[node.path.len()..]);
                        moved.id = None;
                        expansion.nodes.push(moved);
                    }
                }
                claimed.extend(free.into_iter().cloned());
            }
        }

        expansion
    }
}

fn concrete_path(path: &str, code: &str) -> String {
    let base = path.strip_suffix(CHOICE_SUFFIX).unwrap_or(path);
    format!("{base}{}", capitalize(code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CompilerConfig;
    use crate::profile::ProfileTree;
    use crate::types::Cardinality;

    fn id(namespace: &str, name: &str) -> Identifier {
        Identifier::new(namespace, name)
    }

    fn graph() -> ObjectModelGraph {
        ObjectModelGraph::from(vec![
            ElementDef::new(id("shr.vital", "BodyWeight")).with_value(FieldSpec::identifiable(
                id("shr.core", "Quantity"),
                Cardinality::required(),
            )),
            ElementDef::new(id("shr.core", "Quantity")).with_value(FieldSpec::identifiable(
                Identifier::primitive("decimal"),
                Cardinality::required(),
            )),
            ElementDef::new(id("shr.entity", "Deceased")).with_value(FieldSpec::choice(
                vec![
                    FieldSpec::identifiable(Identifier::primitive("boolean"), Cardinality::required()),
                    FieldSpec::identifiable(Identifier::primitive("dateTime"), Cardinality::required()),
                ],
                Cardinality::optional(),
            )),
            ElementDef::new(id("shr.entity", "Person")).with_field(FieldSpec::identifiable(
                id("shr.entity", "Deceased"),
                Cardinality::optional(),
            )),
        ])
    }

    fn value_node() -> WireElementNode {
        WireElementNode::new("Observation.value[x]", Cardinality::optional())
            .with_type(WireTypeEntry::new("string"))
            .with_type(WireTypeEntry::new("Quantity"))
            .with_type(WireTypeEntry::new("CodeableConcept"))
            .with_mapping(MappingAnnotation::Value)
    }

    #[test]
    fn test_value_annotation_matches_only_structural_type() {
        let graph = graph();
        let profiles = ProfileSet::default();
        let expander = ChoiceExpander::new(&graph, &profiles);
        let root = graph.get(&id("shr.vital", "BodyWeight")).unwrap();

        let codes = expander.expand(&value_node(), root);
        assert_eq!(
            codes[&MappingAnnotation::Value],
            BTreeSet::from(["Quantity".to_string()])
        );
    }

    #[test]
    fn test_expand_nodes_emits_single_concrete_node() {
        let graph = graph();
        let profiles = ProfileSet::default();
        let expander = ChoiceExpander::new(&graph, &profiles);
        let root = graph.get(&id("shr.vital", "BodyWeight")).unwrap();
        let mut context = CompilationContext::new(&CompilerConfig::default());

        let nodes = vec![
            WireElementNode::new("Observation", Cardinality::unbounded()),
            value_node(),
            WireElementNode::new("Observation.value[x].extension", Cardinality::unbounded()),
            WireElementNode::new("Observation.status", Cardinality::required()),
        ];
        let expansion = expander.expand_nodes(&nodes, root, &mut context);

        let paths: Vec<&str> = expansion.nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "Observation",
                "Observation.valueQuantity",
                "Observation.valueQuantity.extension",
                "Observation.status"
            ]
        );
        assert_eq!(expansion.nodes[1].types.len(), 1);
        assert!(expansion.type_guards.is_empty());
        assert_eq!(context.stats().choices_expanded, 1);
    }

    #[test]
    fn test_choice_value_yields_guarded_variants() {
        let graph = graph();
        let profiles = ProfileSet::default();
        let expander = ChoiceExpander::new(&graph, &profiles);
        let root = graph.get(&id("shr.entity", "Person")).unwrap();
        let mut context = CompilationContext::new(&CompilerConfig::default());

        let nodes = vec![
            WireElementNode::new("Patient", Cardinality::unbounded()),
            WireElementNode::new("Patient.deceased[x]", Cardinality::optional())
                .with_type(WireTypeEntry::new("boolean"))
                .with_type(WireTypeEntry::new("dateTime"))
                .with_mapping(MappingAnnotation::parse("<shr.entity.Deceased>").unwrap()),
        ];
        let expansion = expander.expand_nodes(&nodes, root, &mut context);

        assert_eq!(expansion.nodes.len(), 3);
        assert_eq!(expansion.nodes[1].path, "Patient.deceasedBoolean");
        assert_eq!(expansion.nodes[2].path, "Patient.deceasedDateTime");
        assert_eq!(expansion.type_guards.get(&1).map(String::as_str), Some("boolean"));
        assert_eq!(expansion.type_guards.get(&2).map(String::as_str), Some("dateTime"));
    }

    #[test]
    fn test_profile_resource_type_matches() {
        let graph = graph();
        let person = id("shr.entity", "Person");
        let profiles = ProfileSet::new(vec![ProfileTree::for_element(&person, "Patient")]).unwrap();
        let expander = ChoiceExpander::new(&graph, &profiles);
        let root = graph.get(&id("shr.vital", "BodyWeight")).unwrap();

        let node = WireElementNode::new("Observation.subject", Cardinality::optional())
            .with_type(WireTypeEntry::new("Patient"))
            .with_type(WireTypeEntry::new("Group"))
            .with_mapping(MappingAnnotation::parse("<shr.entity.Person>").unwrap());
        let codes = expander.expand(&node, root);
        assert_eq!(codes.values().next().unwrap().len(), 1);
    }

    #[test]
    fn test_unmatched_annotation_is_reported() {
        let graph = graph();
        let profiles = ProfileSet::default();
        let expander = ChoiceExpander::new(&graph, &profiles);
        let root = graph.get(&id("shr.vital", "BodyWeight")).unwrap();
        let mut context = CompilationContext::new(&CompilerConfig::default());

        let nodes = vec![
            WireElementNode::new("Observation", Cardinality::unbounded()),
            WireElementNode::new("Observation.value[x]", Cardinality::optional())
                .with_type(WireTypeEntry::new("string"))
                .with_mapping(MappingAnnotation::Value),
        ];
        let expansion = expander.expand_nodes(&nodes, root, &mut context);
        assert_eq!(expansion.nodes.len(), 1);
        assert_eq!(context.diagnostics().len(), 1);
    }

    #[test]
    fn test_wire_type_claimed_by_first_annotation() {
        let graph = ObjectModelGraph::from(vec![
            ElementDef::new(id("shr.test", "Remark")).with_value(FieldSpec::identifiable(
                Identifier::primitive("string"),
                Cardinality::required(),
            )),
            ElementDef::new(id("shr.test", "Note")).with_value(FieldSpec::identifiable(
                Identifier::primitive("string"),
                Cardinality::required(),
            )),
        ]);
        let profiles = ProfileSet::default();
        let expander = ChoiceExpander::new(&graph, &profiles);
        let root = graph.get(&id("shr.test", "Remark")).unwrap();
        let mut context = CompilationContext::new(&CompilerConfig::default());

        let nodes = vec![
            WireElementNode::new("Observation", Cardinality::unbounded()),
            WireElementNode::new("Observation.value[x]", Cardinality::optional())
                .with_type(WireTypeEntry::new("string"))
                .with_type(WireTypeEntry::new("Quantity"))
                .with_mapping(MappingAnnotation::Value)
                .with_mapping(MappingAnnotation::parse("<shr.test.Note>").unwrap()),
        ];
        let expansion = expander.expand_nodes(&nodes, root, &mut context);

        let paths: Vec<&str> = expansion.nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["Observation", "Observation.valueString"]);
        assert_eq!(expansion.nodes[1].mappings, vec![MappingAnnotation::Value]);
        assert_eq!(context.diagnostics().len(), 1);
        assert_eq!(context.diagnostics()[0].kind, DiagnosticKind::UnresolvedMapping);
    }
}

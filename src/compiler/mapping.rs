use serde::{Deserialize, Serialize};

use crate::model::ObjectModelGraph;
use crate::plan::{ConstructTarget, PathExpr, PathSegment};
use crate::profile::MappingAnnotation;
use crate::types::{Cardinality, ElementDef, FieldSpec, Identifier};

/// Accessor name of an element's value slot.
pub const VALUE_ACCESSOR: &str = "value";

/// One step of a resolved chain: the instance field it reads and the field's declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accessor {
    pub name: String,
    /// For choice options this is the cardinality of the enclosing choice.
    pub card: Cardinality,
    pub spec: FieldSpec,
}

impl Accessor {
    /// Object-model type stored under this accessor, if it is an element.
    pub fn element(&self) -> Option<Identifier> {
        self.spec
            .effective_identifier()
            .filter(|identifier| !identifier.is_primitive())
            .cloned()
    }

    pub fn segment(&self) -> PathSegment {
        PathSegment::new(&self.name)
            .list(self.card.is_list())
            .of_element(self.element())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedChain {
    pub annotation: MappingAnnotation,
    pub accessors: Vec<Accessor>,
    pub terminal: Option<Identifier>,
}

impl ResolvedChain {
    /// Normalized accessor chain, e.g. `systolicPressure.value`.
    pub fn key(&self) -> String {
        self.names().join(".")
    }

    pub fn names(&self) -> Vec<&str> {
        self.accessors
            .iter()
            .map(|accessor| accessor.name.as_str())
            .collect()
    }

    pub fn last(&self) -> Option<&Accessor> {
        self.accessors.last()
    }

    pub fn is_list(&self) -> bool {
        self.last().is_some_and(|accessor| accessor.card.is_list())
    }

    pub fn terminal_spec(&self) -> Option<&FieldSpec> {
        self.last().map(|accessor| &accessor.spec)
    }

    pub fn includes_type_count(&self) -> usize {
        self.terminal_spec()
            .map(FieldSpec::includes_type_count)
            .unwrap_or_default()
    }

    /// Instance path over `accessors[skip..]` starting at `root`.
    pub fn path_from(&self, root: PathExpr, skip: usize) -> PathExpr {
        root.extend(self.accessors.iter().skip(skip).map(Accessor::segment))
    }

    /// Number of leading accessors shared with `other`, compared by name.
    pub fn common_prefix(&self, other: &ResolvedChain) -> usize {
        self.accessors
            .iter()
            .zip(&other.accessors)
            .take_while(|(left, right)| left.name == right.name)
            .count()
    }
}

/// Whether values of this type pass through without constructing an element.
pub fn is_primitive_spec(spec: &FieldSpec) -> bool {
    match spec {
        FieldSpec::Choice { .. } => {
            let options = spec.concrete_options();
            !options.is_empty() && options.iter().all(|option| is_primitive_spec(option))
        }
        other => other.is_primitive(),
    }
}

/// Element type to construct for a non-primitive spec.
pub fn construct_target(spec: &FieldSpec) -> Option<ConstructTarget> {
    match spec {
        FieldSpec::Identifiable { .. } | FieldSpec::Reference { .. } => spec
            .effective_identifier()
            .map(|element| ConstructTarget::Known {
                element: element.clone(),
            }),
        FieldSpec::Choice { .. } => {
            let candidates: Vec<Identifier> = spec
                .concrete_options()
                .into_iter()
                .filter_map(|option| option.effective_identifier().cloned())
                .collect();
            (!candidates.is_empty()).then_some(ConstructTarget::Dynamic { candidates })
        }
        FieldSpec::Placeholder { .. } => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChainResolution {
    Resolved(ResolvedChain),
    Unresolved {
        annotation: MappingAnnotation,
        /// Element in which the failing step was looked up.
        failed_at: Identifier,
        step: Option<Identifier>,
    },
}

impl ChainResolution {
    pub fn resolved(self) -> Option<ResolvedChain> {
        match self {
            Self::Resolved(chain) => Some(chain),
            Self::Unresolved { .. } => None,
        }
    }
}

/// Resolves mapping annotations into accessor chains against the object model.
pub struct MappingChainResolver<'a> {
    graph: &'a ObjectModelGraph,
}

impl<'a> MappingChainResolver<'a> {
    pub fn new(graph: &'a ObjectModelGraph) -> Self {
        Self { graph }
    }

    pub fn resolve(&self, annotation: &MappingAnnotation, root: &ElementDef) -> ChainResolution {
        let steps = match annotation {
            MappingAnnotation::Value => return self.resolve_value(annotation, root),
            MappingAnnotation::Chain(steps) => steps,
        };

        let unresolved = |failed_at: &Identifier, step: &Identifier| ChainResolution::Unresolved {
            annotation: annotation.clone(),
            failed_at: failed_at.clone(),
            step: Some(step.clone()),
        };

        let mut current = root;
        let mut accessors = Vec::with_capacity(steps.len());

        for (position, step) in steps.iter().enumerate() {
            if step.is_keyword() {
                return unresolved(&current.identifier, step);
            }

            let Some(accessor) = self.match_step(current, step) else {
                return unresolved(&current.identifier, step);
            };
            accessors.push(accessor);

            if position + 1 == steps.len() {
                break;
            }

            match self.graph.get(step) {
                Some(next) if !step.is_primitive() => current = next,
                _ => return unresolved(step, &steps[position + 1]),
            }
        }

        ChainResolution::Resolved(ResolvedChain {
            annotation: annotation.clone(),
            accessors,
            terminal: steps.last().cloned(),
        })
    }

    fn resolve_value(&self, annotation: &MappingAnnotation, root: &ElementDef) -> ChainResolution {
        match self.graph.value_of(root) {
            Some(value) => ChainResolution::Resolved(ResolvedChain {
                annotation: annotation.clone(),
                accessors: vec![Accessor {
                    name: VALUE_ACCESSOR.to_string(),
                    card: value.card(),
                    spec: value.clone(),
                }],
                terminal: value.effective_identifier().cloned(),
            }),
            None => ChainResolution::Unresolved {
                annotation: annotation.clone(),
                failed_at: root.identifier.clone(),
                step: None,
            },
        }
    }

    /// Value slot, then choice options of the value slot, then named fields.
    fn match_step(&self, element: &ElementDef, step: &Identifier) -> Option<Accessor> {
        if let Some(value) = self.graph.value_of(element) {
            if value.effective_identifier() == Some(step) {
                return Some(Accessor {
                    name: VALUE_ACCESSOR.to_string(),
                    card: value.card(),
                    spec: value.clone(),
                });
            }

            if let FieldSpec::Choice { card, .. } = value {
                if let Some(option) = value
                    .concrete_options()
                    .into_iter()
                    .find(|option| option.effective_identifier() == Some(step))
                {
                    return Some(Accessor {
                        name: VALUE_ACCESSOR.to_string(),
                        card: *card,
                        spec: option.clone(),
                    });
                }
            }
        }

        let field = self.graph.field_of(element, step)?;
        Some(Accessor {
            name: field.accessor_name()?,
            card: field.card(),
            spec: field.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(namespace: &str, name: &str) -> Identifier {
        Identifier::new(namespace, name)
    }

    fn graph() -> ObjectModelGraph {
        ObjectModelGraph::from(vec![
            ElementDef::new(id("shr.vital", "BloodPressure"))
                .with_field(FieldSpec::identifiable(
                    id("shr.vital", "SystolicPressure"),
                    Cardinality::optional(),
                ))
                .with_field(FieldSpec::identifiable(
                    id("shr.core", "Comment"),
                    Cardinality::unbounded(),
                )),
            ElementDef::new(id("shr.vital", "SystolicPressure")).with_value(
                FieldSpec::identifiable(Identifier::primitive("decimal"), Cardinality::required()),
            ),
            ElementDef::new(id("shr.core", "Comment")).with_value(FieldSpec::identifiable(
                Identifier::primitive("string"),
                Cardinality::required(),
            )),
            ElementDef::new(id("shr.entity", "Deceased")).with_value(FieldSpec::choice(
                vec![
                    FieldSpec::identifiable(Identifier::primitive("boolean"), Cardinality::required()),
                    FieldSpec::identifiable(Identifier::primitive("dateTime"), Cardinality::required()),
                ],
                Cardinality::optional(),
            )),
        ])
    }

    fn root<'a>(graph: &'a ObjectModelGraph, identifier: Identifier) -> &'a ElementDef {
        graph.get(&identifier).unwrap()
    }

    #[test]
    fn test_resolve_nested_chain_to_value() {
        let graph = graph();
        let resolver = MappingChainResolver::new(&graph);
        let annotation =
            MappingAnnotation::parse("<shr.vital.SystolicPressure>.<decimal>").unwrap();

        let chain = resolver
            .resolve(&annotation, root(&graph, id("shr.vital", "BloodPressure")))
            .resolved()
            .unwrap();

        assert_eq!(chain.key(), "systolicPressure.value");
        assert_eq!(chain.terminal, Some(Identifier::primitive("decimal")));
        assert!(!chain.is_list());
        assert!(is_primitive_spec(chain.terminal_spec().unwrap()));
    }

    #[test]
    fn test_value_annotation_binds_value_slot() {
        let graph = graph();
        let resolver = MappingChainResolver::new(&graph);
        let chain = resolver
            .resolve(&MappingAnnotation::Value, root(&graph, id("shr.core", "Comment")))
            .resolved()
            .unwrap();
        assert_eq!(chain.key(), VALUE_ACCESSOR);

        let missing = resolver.resolve(
            &MappingAnnotation::Value,
            root(&graph, id("shr.vital", "BloodPressure")),
        );
        assert!(matches!(missing, ChainResolution::Unresolved { step: None, .. }));
    }

    #[test]
    fn test_choice_option_binds_value_accessor() {
        let graph = graph();
        let resolver = MappingChainResolver::new(&graph);
        let chain = resolver
            .resolve(
                &MappingAnnotation::parse("<boolean>").unwrap(),
                root(&graph, id("shr.entity", "Deceased")),
            )
            .resolved()
            .unwrap();
        assert_eq!(chain.key(), VALUE_ACCESSOR);
        assert!(!chain.is_list());
    }

    #[test]
    fn test_unresolved_reports_failing_element() {
        let graph = graph();
        let resolver = MappingChainResolver::new(&graph);
        let annotation = MappingAnnotation::parse("<shr.core.Comment>.<shr.core.Missing>").unwrap();

        match resolver.resolve(&annotation, root(&graph, id("shr.vital", "BloodPressure"))) {
            ChainResolution::Unresolved {
                failed_at, step, ..
            } => {
                assert_eq!(failed_at, id("shr.core", "Comment"));
                assert_eq!(step, Some(id("shr.core", "Missing")));
            }
            ChainResolution::Resolved(_) => panic!("expected unresolved chain"),
        }

        let keyword = MappingAnnotation::parse("<_Entry>").unwrap();
        assert!(
            resolver
                .resolve(&keyword, root(&graph, id("shr.vital", "BloodPressure")))
                .resolved()
                .is_none()
        );
    }

    #[test]
    fn test_common_prefix() {
        let graph = graph();
        let resolver = MappingChainResolver::new(&graph);
        let bp = root(&graph, id("shr.vital", "BloodPressure"));
        let left = resolver
            .resolve(&MappingAnnotation::parse("<shr.core.Comment>.<string>").unwrap(), bp)
            .resolved()
            .unwrap();
        let right = resolver
            .resolve(&MappingAnnotation::parse("<shr.core.Comment>").unwrap(), bp)
            .resolved()
            .unwrap();
        assert_eq!(left.common_prefix(&right), 1);
        assert!(right.is_list());
    }
}

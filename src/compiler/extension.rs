use serde_json::json;

use super::builder::present;
use super::mapping::{
    Accessor, MappingChainResolver, VALUE_ACCESSOR, construct_target, is_primitive_spec,
};
use super::{ChoiceExpander, CompilationContext};
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::model::ObjectModelGraph;
use crate::plan::{AssignMode, Condition, Operation, PathExpr, PathSegment};
use crate::profile::{
    ExtensionStyle, MappingAnnotation, ProfileSet, ProfileTree, WireElementNode, capitalize,
};
use crate::types::{ElementDef, FieldSpec, Identifier};

const URL_FIELD: &str = "url";
const EXTENSION_FIELD: &str = "extension";
const VALUE_PREFIX: &str = "Extension.value";
const NESTED_EXTENSION_PATH: &str = "Extension.extension";
const NESTED_URL_PATH: &str = "Extension.extension.url";

/// One nested extension of a complex extension, bound to the field it carries.
struct NestedExtension {
    url: String,
    element: Identifier,
    accessor: Accessor,
    label: String,
}

/// Plans for an element exported as an extension definition.
pub struct ExtensionPlanner<'a> {
    graph: &'a ObjectModelGraph,
    profiles: &'a ProfileSet,
    element: &'a ElementDef,
    tree: &'a ProfileTree,
}

impl<'a> ExtensionPlanner<'a> {
    pub fn new(
        graph: &'a ObjectModelGraph,
        profiles: &'a ProfileSet,
        element: &'a ElementDef,
        tree: &'a ProfileTree,
    ) -> Self {
        Self {
            graph,
            profiles,
            element,
            tree,
        }
    }

    fn url(&self) -> String {
        self.tree.url.clone().unwrap_or_default()
    }

    /// `Guard(asExtension)` writing `url` and then the value or nested extensions.
    pub fn to_fhir(&self, context: &mut CompilationContext) -> Operation {
        let mut body = vec![Operation::AssignFixed {
            destination: PathExpr::wire().field(URL_FIELD),
            value: json!(self.url()),
        }];

        match self.tree.extension {
            Some(ExtensionStyle::Complex) => {
                for nested in self.nested_extensions(context) {
                    let source = PathExpr::instance().join(nested.accessor.segment());
                    body.push(Operation::Guard {
                        conditions: vec![present(&source)],
                        body: vec![Operation::AssignExtension {
                            url: nested.url,
                            source,
                            destination: extension_list(),
                            element: nested.element,
                            mode: AssignMode::Push,
                            wire_path: nested.label,
                        }],
                    });
                }
            }
            _ => {
                let mut written: Vec<PathExpr> = Vec::new();
                for (field, spec, label, guarded) in self.value_variants(context) {
                    let source = PathExpr::instance().join(value_segment(self.value_accessor()));
                    let destination = PathExpr::wire().field(&field);

                    let mut conditions = vec![present(&source)];
                    if let Some(code) = guarded {
                        conditions.push(Condition::HasType {
                            path: source.clone(),
                            code,
                        });
                        conditions.extend(
                            written
                                .iter()
                                .map(|path| Condition::Absent { path: path.clone() }),
                        );
                    }
                    written.push(destination.clone());

                    body.push(Operation::Guard {
                        conditions,
                        body: vec![value_assignment(
                            &spec,
                            source,
                            destination,
                            AssignMode::Set,
                            label,
                        )],
                    });
                }
            }
        }

        Operation::Guard {
            conditions: vec![Condition::AsExtension { value: true }],
            body,
        }
    }

    /// `Guard(asExtension)` reading the value or nested extensions back.
    pub fn from_fhir(&self, context: &mut CompilationContext) -> Operation {
        let mut body = Vec::new();

        match self.tree.extension {
            Some(ExtensionStyle::Complex) => {
                for nested in self.nested_extensions(context) {
                    let mode = if nested.accessor.card.is_list() {
                        AssignMode::Push
                    } else {
                        AssignMode::Set
                    };
                    body.push(Operation::Guard {
                        conditions: vec![present(&extension_list())],
                        body: vec![Operation::AssignExtension {
                            url: nested.url,
                            source: extension_list(),
                            destination: PathExpr::instance().join(nested.accessor.segment()),
                            element: nested.element,
                            mode,
                            wire_path: nested.label,
                        }],
                    });
                }
            }
            _ => {
                for (field, spec, label, _) in self.value_variants(context) {
                    let source = PathExpr::wire().field(&field);
                    let destination =
                        PathExpr::instance().join(value_segment(self.value_accessor()));
                    body.push(Operation::Guard {
                        conditions: vec![present(&source)],
                        body: vec![value_assignment(
                            &spec,
                            source,
                            destination,
                            AssignMode::Set,
                            label,
                        )],
                    });
                }
            }
        }

        Operation::Guard {
            conditions: vec![Condition::AsExtension { value: true }],
            body,
        }
    }

    fn value_accessor(&self) -> Option<Accessor> {
        self.graph.value_of(self.element).map(|value| Accessor {
            name: VALUE_ACCESSOR.to_string(),
            card: value.card(),
            spec: value.clone(),
        })
    }

    fn value_node(&self) -> Option<&WireElementNode> {
        self.tree
            .elements
            .iter()
            .find(|node| node.path.starts_with(VALUE_PREFIX) && !node.is_prohibited())
    }

    /// `(value<Type>, spec, label, type guard)` per wire type the value slot can hold.
    fn value_variants(
        &self,
        context: &mut CompilationContext,
    ) -> Vec<(String, FieldSpec, String, Option<String>)> {
        let (Some(value), Some(node)) = (self.graph.value_of(self.element), self.value_node())
        else {
            return Vec::new();
        };

        let expander = ChoiceExpander::new(self.graph, self.profiles);
        let codes = expander.value_codes(value, &node.types);
        if codes.is_empty() {
            context.report(
                Diagnostic::new(
                    DiagnosticKind::AmbiguousValueMapping,
                    &self.element.identifier,
                    format!("no type of '{}' holds the value slot", node.path),
                )
                .at_path(&node.path),
            );
            return Vec::new();
        }

        let guarded = codes.len() > 1;
        codes
            .into_iter()
            .map(|code| {
                let field = format!("value{}", capitalize(&code));
                let spec = option_for_code(value, &code).unwrap_or_else(|| value.clone());
                let label = format!("Extension.{field}");
                (field, spec, label, guarded.then_some(code))
            })
            .collect()
    }

    fn nested_extensions(&self, context: &mut CompilationContext) -> Vec<NestedExtension> {
        let resolver = MappingChainResolver::new(self.graph);
        let elements = &self.tree.elements;
        let mut nested = Vec::new();

        for (position, node) in elements.iter().enumerate() {
            if node.path != NESTED_EXTENSION_PATH || node.is_prohibited() {
                continue;
            }
            let Some(slice) = node.slice_name.as_deref() else {
                continue;
            };
            let label = format!("{NESTED_EXTENSION_PATH}:{slice}");

            let Some(url) = nested_url(node, &elements[position + 1..]) else {
                context.report(
                    Diagnostic::new(
                        DiagnosticKind::MissingExtension,
                        &self.element.identifier,
                        format!("nested extension '{slice}' declares no URL"),
                    )
                    .at_path(&label),
                );
                continue;
            };

            let Some(identifier) = self.profiles.identifier_for_url(&url) else {
                context.report(
                    Diagnostic::new(
                        DiagnosticKind::MissingExtension,
                        &self.element.identifier,
                        format!("extension '{url}' is not defined"),
                    )
                    .at_path(&label),
                );
                continue;
            };

            let annotation = MappingAnnotation::Chain(vec![identifier.clone()]);
            match resolver.resolve(&annotation, self.element).resolved() {
                Some(chain) => {
                    if let Some(accessor) = chain.accessors.into_iter().next() {
                        nested.push(NestedExtension {
                            url,
                            element: identifier.clone(),
                            accessor,
                            label,
                        });
                    }
                }
                None => context.report(
                    Diagnostic::new(
                        DiagnosticKind::UnresolvedMapping,
                        &self.element.identifier,
                        format!("no field of {} holds {identifier}", self.element.identifier),
                    )
                    .at_path(&label)
                    .with_annotation(&annotation),
                ),
            }
        }

        nested
    }
}

/// Value pass-through for an element without a profile, invoked as a plain value.
pub fn fallback_to_fhir(graph: &ObjectModelGraph, element: &ElementDef) -> Option<Operation> {
    let value = graph.value_of(element)?;
    let source = PathExpr::instance().join(value_segment(Some(value_accessor_of(value))));
    Some(Operation::Guard {
        conditions: vec![Condition::AsExtension { value: false }, present(&source)],
        body: vec![value_assignment(
            value,
            source,
            PathExpr::wire(),
            AssignMode::Set,
            String::new(),
        )],
    })
}

pub fn fallback_from_fhir(graph: &ObjectModelGraph, element: &ElementDef) -> Option<Operation> {
    let value = graph.value_of(element)?;
    let source = PathExpr::wire();
    Some(Operation::Guard {
        conditions: vec![Condition::AsExtension { value: false }, present(&source)],
        body: vec![value_assignment(
            value,
            source,
            PathExpr::instance().join(value_segment(Some(value_accessor_of(value)))),
            AssignMode::Set,
            String::new(),
        )],
    })
}

fn value_accessor_of(value: &FieldSpec) -> Accessor {
    Accessor {
        name: VALUE_ACCESSOR.to_string(),
        card: value.card(),
        spec: value.clone(),
    }
}

fn value_segment(accessor: Option<Accessor>) -> PathSegment {
    accessor
        .map(|accessor| accessor.segment())
        .unwrap_or_else(|| PathSegment::new(VALUE_ACCESSOR))
}

fn extension_list() -> PathExpr {
    PathExpr::wire().join(PathSegment::new(EXTENSION_FIELD).list(true))
}

fn option_for_code(value: &FieldSpec, code: &str) -> Option<FieldSpec> {
    value
        .concrete_options()
        .into_iter()
        .find(|option| {
            option
                .effective_identifier()
                .is_some_and(|identifier| identifier.matches_code(code))
        })
        .cloned()
}

/// URL from the node's type profile, or from a fixed `url` child before the next slice.
fn nested_url(node: &WireElementNode, following: &[WireElementNode]) -> Option<String> {
    if let Some(url) = node.extension_url() {
        return Some(url.to_string());
    }
    following
        .iter()
        .take_while(|next| next.path != node.path)
        .filter(|next| next.path == NESTED_URL_PATH)
        .flat_map(|next| next.types.iter())
        .find_map(|entry| entry.fixed_value()?.as_str().map(str::to_string))
}

fn value_assignment(
    spec: &FieldSpec,
    source: PathExpr,
    destination: PathExpr,
    mode: AssignMode,
    wire_path: String,
) -> Operation {
    if is_primitive_spec(spec) {
        return Operation::AssignPrimitive {
            source,
            destination,
            mode,
            wire_path,
        };
    }
    match construct_target(spec) {
        Some(target) => Operation::AssignConstructed {
            source,
            destination,
            target,
            as_extension: false,
            mode,
            wire_path,
        },
        None => Operation::AssignPrimitive {
            source,
            destination,
            mode,
            wire_path,
        },
    }
}

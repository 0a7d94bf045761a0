use std::collections::{BTreeMap, HashMap, HashSet};

use super::mapping::{
    Accessor, ChainResolution, MappingChainResolver, ResolvedChain, construct_target,
    is_primitive_spec,
};
use super::{ChoiceExpansion, CompilationContext, SliceMap, SliceResolver};
use crate::core::CompilerConfig;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::model::ObjectModelGraph;
use crate::plan::{AssignMode, Condition, InitKind, Operation, PathExpr, PathSegment};
use crate::profile::{MappingAnnotation, ProfileIndex, ProfileSet, ProfileTree};
use crate::types::{ElementDef, FieldSpec, Identifier};

/// A body opened by `IterateList`/`SelectSingle`: what the binding stands for on either side.
#[derive(Debug, Clone)]
pub(crate) struct Scope {
    pub binding: String,
    /// Wire node whose current element the scope addresses.
    pub wire_node: Option<usize>,
    /// Accessor names of the object-model list the scope iterates.
    pub shr_prefix: Option<Vec<String>>,
}

/// Per-direction emission state: dedup keys and binding names.
#[derive(Debug, Default)]
pub(crate) struct EmitState {
    seen: HashSet<String>,
    variants: HashMap<String, Vec<PathExpr>>,
    next_binding: usize,
}

impl EmitState {
    pub fn binding(&mut self) -> String {
        let name = format!("b{}", self.next_binding);
        self.next_binding += 1;
        name
    }

    /// Returns false when the chain key was already assigned in this direction.
    pub fn claim(&mut self, key: String) -> bool {
        self.seen.insert(key)
    }

    /// Destinations already written by earlier variants of the same chain.
    pub fn record_variant(&mut self, chain_key: &str, destination: &PathExpr) -> Vec<PathExpr> {
        let earlier = self.variants.entry(chain_key.to_string()).or_default();
        let previous = earlier.clone();
        earlier.push(destination.clone());
        previous
    }
}

/// Shared state of one (element, profile) compilation for both directions.
pub struct PlanBuilder<'a> {
    pub(crate) profiles: &'a ProfileSet,
    pub(crate) config: CompilerConfig,
    pub(crate) element: &'a ElementDef,
    pub(crate) tree: &'a ProfileTree,
    pub(crate) index: ProfileIndex<'a>,
    pub(crate) slices: SliceMap,
    type_guards: &'a BTreeMap<usize, String>,
    pub(crate) chains: Vec<Vec<ResolvedChain>>,
}

impl<'a> PlanBuilder<'a> {
    pub fn new(
        graph: &'a ObjectModelGraph,
        profiles: &'a ProfileSet,
        element: &'a ElementDef,
        tree: &'a ProfileTree,
        expansion: &'a ChoiceExpansion,
        context: &mut CompilationContext,
    ) -> Self {
        let index = ProfileIndex::build(&expansion.nodes);
        let slices = SliceResolver::new().resolve(&expansion.nodes, &element.identifier, context);
        let resolver = MappingChainResolver::new(graph);

        let mut chains = Vec::with_capacity(index.len());
        for position in 0..index.len() {
            if index.is_excluded(position) {
                chains.push(Vec::new());
                continue;
            }

            let node = index.node(position);
            let mut resolved = Vec::new();
            for annotation in &node.mappings {
                match resolver.resolve(annotation, element) {
                    ChainResolution::Resolved(chain) => {
                        let ambiguous = annotation.is_value()
                            && node.is_primitive()
                            && chain.terminal_spec().is_some_and(|spec| !is_primitive_spec(spec));
                        if ambiguous {
                            context.report(
                                Diagnostic::new(
                                    DiagnosticKind::AmbiguousValueMapping,
                                    &element.identifier,
                                    "value slot is not primitive but the wire element is",
                                )
                                .at_path(&node.path)
                                .with_annotation(annotation),
                            );
                        } else {
                            resolved.push(chain);
                        }
                    }
                    ChainResolution::Unresolved {
                        annotation,
                        failed_at,
                        step,
                    } => context.report(unresolved_diagnostic(
                        &element.identifier,
                        &node.path,
                        &annotation,
                        &failed_at,
                        step.as_ref(),
                    )),
                }
            }
            chains.push(resolved);
        }

        Self {
            profiles,
            config: context.config.clone(),
            element,
            tree,
            index,
            slices,
            type_guards: &expansion.type_guards,
            chains,
        }
    }

    pub(crate) fn type_guard(&self, node: usize) -> Option<&str> {
        self.type_guards.get(&node).map(String::as_str)
    }

    pub(crate) fn dedup_key(&self, node: usize, chain: &ResolvedChain) -> String {
        match self.type_guard(node) {
            Some(code) => format!("{}|{code}", chain.key()),
            None => chain.key(),
        }
    }

    /// Wire segments from below the root down to `node`, each tagged with the node it ends at.
    pub(crate) fn segment_chain(&self, node: usize) -> Vec<(usize, PathSegment)> {
        let mut lineage: Vec<usize> = self.index.ancestors(node).collect();
        lineage.reverse();
        lineage.push(node);

        let mut segments: Vec<(usize, PathSegment)> = Vec::new();
        for position in lineage {
            let Some(parent) = self.index.parent(position) else {
                continue;
            };
            let current = self.index.node(position);

            if self.index.is_slice_entry(position) {
                if let Some((owner, segment)) = segments.last_mut() {
                    segment.slice = current
                        .slice_name
                        .as_deref()
                        .and_then(|name| self.slices.get(&current.path)?.selector(name));
                    *owner = position;
                }
                continue;
            }

            let parent_path = &self.index.node(parent).path;
            let relative = current
                .path
                .strip_prefix(parent_path.as_str())
                .unwrap_or(&current.path)
                .trim_start_matches('.');
            let fields: Vec<&str> = relative.split('.').filter(|f| !f.is_empty()).collect();
            for (offset, field) in fields.iter().enumerate() {
                let last = offset + 1 == fields.len();
                segments.push((
                    position,
                    PathSegment::new(*field).list(last && current.is_list()),
                ));
            }
        }
        segments
    }

    pub(crate) fn wire_path(&self, node: usize) -> PathExpr {
        PathExpr::wire().extend(self.segment_chain(node).into_iter().map(|(_, s)| s))
    }

    /// Wire path of `node`, relative to the innermost scope bound to it or an ancestor.
    pub(crate) fn wire_source(&self, node: usize, scopes: &[Scope]) -> PathExpr {
        let chain = self.segment_chain(node);
        for scope in scopes.iter().rev() {
            let Some(bound) = scope.wire_node else {
                continue;
            };
            if bound == node {
                return PathExpr::binding(&scope.binding);
            }
            if let Some(position) = chain.iter().position(|(owner, _)| *owner == bound) {
                return PathExpr::binding(&scope.binding)
                    .extend(chain[position + 1..].iter().map(|(_, s)| s.clone()));
            }
        }
        PathExpr::wire().extend(chain.into_iter().map(|(_, s)| s))
    }

    /// Normalized node label, e.g. `Observation.component:systolic.value`.
    pub(crate) fn label(&self, node: usize) -> String {
        let top = self.index.ancestors(node).last().unwrap_or(node);
        let mut label = self.index.node(top).path.clone();
        for (_, segment) in self.segment_chain(node) {
            label.push('.');
            label.push_str(&segment.field);
            if let Some(slice) = &segment.slice {
                label.push(':');
                label.push_str(&slice.name);
            }
        }
        label
    }

    /// Length of the innermost object-model scope prefix that `names` lies under.
    pub(crate) fn scope_floor(&self, names: &[&str], scopes: &[Scope]) -> usize {
        self.innermost_shr_scope(names, scopes)
            .map(|(_, length)| length)
            .unwrap_or_default()
    }

    fn innermost_shr_scope<'s>(
        &self,
        names: &[&str],
        scopes: &'s [Scope],
    ) -> Option<(&'s Scope, usize)> {
        scopes.iter().rev().find_map(|scope| {
            let prefix = scope.shr_prefix.as_ref()?;
            let covers = prefix.len() <= names.len()
                && prefix.iter().zip(names).all(|(left, right)| left == right);
            covers.then_some((scope, prefix.len()))
        })
    }

    /// Instance path over `accessors`, rebased on the innermost covering scope binding.
    pub(crate) fn shr_source(&self, accessors: &[Accessor], scopes: &[Scope]) -> (PathExpr, usize) {
        let names: Vec<&str> = accessors.iter().map(|a| a.name.as_str()).collect();
        let (root, consumed) = match self.innermost_shr_scope(&names, scopes) {
            Some((scope, length)) => (PathExpr::binding(&scope.binding), length),
            None => (PathExpr::instance(), 0),
        };
        (
            root.extend(accessors[consumed..].iter().map(Accessor::segment)),
            consumed,
        )
    }

    pub(crate) fn is_slice_group(&self, node: usize) -> bool {
        self.index.node(node).slicing.is_some()
            && self
                .index
                .children(node)
                .iter()
                .any(|&child| self.index.is_slice_entry(child))
    }

    /// Children the walk descends into. Extension definitions are compiled separately.
    pub(crate) fn visible_children(&self, node: usize) -> Vec<usize> {
        let children = self.index.children(node);
        if self.index.node(node).is_extension() {
            children
                .iter()
                .copied()
                .filter(|&child| self.index.is_slice_entry(child))
                .collect()
        } else {
            children.to_vec()
        }
    }

    pub(crate) fn chains_below(&self, node: usize) -> Vec<(usize, &ResolvedChain)> {
        self.index
            .descendants(node)
            .into_iter()
            .filter(|&descendant| !self.index.is_excluded(descendant))
            .flat_map(|descendant| self.chains[descendant].iter().map(move |c| (descendant, c)))
            .collect()
    }

    /// Object-model list a repeating wire node iterates: the deepest list accessor shared
    /// by every mapping below it and not already iterated by an enclosing scope.
    pub(crate) fn iteration_prefix(
        &self,
        node: usize,
        scopes: &[Scope],
    ) -> Option<(&ResolvedChain, usize)> {
        let wire = self.index.node(node);
        if self.index.parent(node).is_none()
            || !wire.is_list()
            || wire.is_extension()
            || self.is_slice_group(node)
        {
            return None;
        }

        let chains = self.chains_below(node);
        let (head, rest) = chains.split_first()?;
        let first: &ResolvedChain = head.1;
        let common = rest
            .iter()
            .fold(first.accessors.len(), |length, (_, chain)| length.min(first.common_prefix(chain)));
        let floor = self.scope_floor(&first.names(), scopes);

        let deepest_list = (floor..common)
            .rev()
            .find(|&position| first.accessors[position].card.is_list())?;
        Some((first, deepest_list + 1))
    }

    /// Container a mapping is promoted into when its field carries more narrowed
    /// types than the wire element has slots.
    pub(crate) fn promoted_container(&self, node: usize, chain: &ResolvedChain) -> Option<usize> {
        if !self.config.container_promotion
            || self.index.node(node).is_list()
            || chain.includes_type_count() <= 1
        {
            return None;
        }
        self.index.nearest_unbounded_ancestor(node)
    }

    pub(crate) fn promotes_into(&self, container: usize) -> bool {
        self.chains_below(container)
            .into_iter()
            .any(|(node, chain)| self.promoted_container(node, chain) == Some(container))
    }

    /// Extension URL and element for a mapping on an `extension` node.
    pub(crate) fn extension_target(
        &self,
        node: usize,
        chain: &ResolvedChain,
        context: &mut CompilationContext,
    ) -> Option<(String, Identifier)> {
        let wire = self.index.node(node);
        let missing = |message: String| {
            Diagnostic::new(
                DiagnosticKind::MissingExtension,
                &self.element.identifier,
                message,
            )
            .at_path(self.label(node))
            .with_annotation(&chain.annotation)
        };

        let Some(url) = wire.extension_url() else {
            context.report(missing("extension element declares no profile URL".to_string()));
            return None;
        };
        let Some(element) = chain.terminal.clone().filter(|t| !t.is_primitive()) else {
            context.report(missing(format!("'{url}' does not map to an element")));
            return None;
        };
        if self.profiles.by_url(url).is_none() {
            context.report(missing(format!("extension '{url}' is not defined")));
            return None;
        }
        Some((url.to_string(), element))
    }

    /// Terminal spec, narrowed to the choice option a concrete variant holds.
    fn narrowed_spec(&self, node: usize, chain: &ResolvedChain) -> Option<FieldSpec> {
        let spec = chain.terminal_spec()?;
        let Some(code) = self.type_guard(node) else {
            return Some(spec.clone());
        };
        if !matches!(spec, FieldSpec::Choice { .. }) {
            return Some(spec.clone());
        }
        let option = spec.concrete_options().into_iter().find(|option| {
            option.effective_identifier().is_some_and(|identifier| {
                identifier.matches_code(code)
                    || self
                        .profiles
                        .profile_for(identifier)
                        .is_some_and(|profile| profile.resource_type == code)
            })
        });
        Some(option.unwrap_or(spec).clone())
    }

    /// The plain assignment for a resolved chain between `source` and `destination`.
    pub(crate) fn assignment(
        &self,
        node: usize,
        chain: &ResolvedChain,
        source: PathExpr,
        destination: PathExpr,
        mode: AssignMode,
    ) -> Operation {
        let wire = self.index.node(node);
        let wire_path = self.label(node);
        let spec = self.narrowed_spec(node, chain);

        let reference_target = match &spec {
            Some(FieldSpec::Reference { identifier, .. }) => Some(identifier.clone()),
            _ if wire.is_reference() => chain.terminal.clone().filter(|t| !t.is_primitive()),
            _ => None,
        };
        if let Some(target) = reference_target {
            return Operation::ResolveReference {
                source,
                destination,
                cache_key: target.fqn(),
                target,
                mode,
                wire_path,
            };
        }

        match spec.as_ref() {
            Some(spec) if !is_primitive_spec(spec) => match construct_target(spec) {
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
            },
            _ => Operation::AssignPrimitive {
                source,
                destination,
                mode,
                wire_path,
            },
        }
    }

    /// Chooses iteration, selection or a direct assignment from the list-ness of both sides.
    pub(crate) fn reconcile(
        &self,
        node: usize,
        chain: &ResolvedChain,
        source: PathExpr,
        destination: PathExpr,
        source_list: bool,
        destination_list: bool,
        state: &mut EmitState,
    ) -> Operation {
        match (source_list, destination_list) {
            (true, true) => {
                let binding = state.binding();
                Operation::IterateList {
                    body: vec![self.assignment(
                        node,
                        chain,
                        PathExpr::binding(&binding),
                        destination,
                        AssignMode::Push,
                    )],
                    source,
                    binding,
                    wire_path: Some(self.label(node)),
                }
            }
            (true, false) => {
                let binding = state.binding();
                Operation::SelectSingle {
                    body: vec![self.assignment(
                        node,
                        chain,
                        PathExpr::binding(&binding),
                        destination,
                        AssignMode::Set,
                    )],
                    source,
                    binding,
                    wire_path: Some(self.label(node)),
                }
            }
            (false, true) => self.assignment(node, chain, source, destination, AssignMode::Push),
            (false, false) => self.assignment(node, chain, source, destination, AssignMode::Set),
        }
    }
}

/// `InitIntermediate` for every strict prefix of `path` deeper than `floor` segments.
pub(crate) fn intermediates(path: &PathExpr, floor: usize) -> Vec<Operation> {
    (floor + 1..path.segments.len())
        .map(|length| Operation::InitIntermediate {
            path: PathExpr {
                root: path.root.clone(),
                segments: path.segments[..length].to_vec(),
            },
            kind: InitKind::Object,
        })
        .collect()
}

pub(crate) fn present(path: &PathExpr) -> Condition {
    Condition::Present { path: path.clone() }
}

pub(crate) fn unresolved_diagnostic(
    element: &Identifier,
    path: &str,
    annotation: &MappingAnnotation,
    failed_at: &Identifier,
    step: Option<&Identifier>,
) -> Diagnostic {
    let diagnostic = match step {
        Some(step) => Diagnostic::new(
            DiagnosticKind::UnresolvedMapping,
            element,
            format!("cannot resolve {step} in {failed_at} for {annotation}"),
        )
        .failed_at(failed_at),
        None => Diagnostic::new(
            DiagnosticKind::AmbiguousValueMapping,
            element,
            format!("{failed_at} has no value slot"),
        ),
    };
    diagnostic.at_path(path).with_annotation(annotation)
}

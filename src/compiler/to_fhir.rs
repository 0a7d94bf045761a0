use serde_json::json;

use super::builder::{EmitState, PlanBuilder, Scope, intermediates, present};
use super::mapping::ResolvedChain;
use super::CompilationContext;
use crate::plan::{AssignMode, Condition, InitKind, Operation, PathExpr};

pub const RESOURCE_TYPE_FIELD: &str = "resourceType";

impl PlanBuilder<'_> {
    /// Operations writing an instance into a wire document shaped by the profile.
    pub fn build_to_fhir(&self, context: &mut CompilationContext) -> Vec<Operation> {
        let mut state = EmitState::default();
        let mut scopes = Vec::new();
        let mut operations = Vec::new();

        if self.element.is_entry && self.config.emit_resource_type {
            operations.push(Operation::AssignFixed {
                destination: PathExpr::wire().field(RESOURCE_TYPE_FIELD),
                value: json!(self.tree.resource_type),
            });
        }

        let roots: Vec<usize> = self.index.roots().collect();
        for root in roots {
            self.to_fhir_node(root, &mut scopes, &mut operations, &mut state, context);
        }
        operations
    }

    fn to_fhir_node(
        &self,
        node: usize,
        scopes: &mut Vec<Scope>,
        out: &mut Vec<Operation>,
        state: &mut EmitState,
        context: &mut CompilationContext,
    ) {
        if self.index.is_excluded(node) {
            return;
        }
        context.record_visit();

        for chain in &self.chains[node] {
            self.to_fhir_mapping(node, chain, scopes, out, state, context);
        }

        if !self.index.has_mapped_descendants(node) {
            return;
        }

        let children = self.visible_children(node);
        let Some((chain, length)) = self.iteration_prefix(node, scopes) else {
            for child in children {
                self.to_fhir_node(child, scopes, out, state, context);
            }
            return;
        };

        let (source, _) = self.shr_source(&chain.accessors[..length], scopes);
        let binding = state.binding();
        let mut body = vec![Operation::InitIntermediate {
            path: self.wire_path(node),
            kind: InitKind::Append,
        }];

        scopes.push(Scope {
            binding: binding.clone(),
            wire_node: Some(node),
            shr_prefix: Some(
                chain.accessors[..length]
                    .iter()
                    .map(|accessor| accessor.name.clone())
                    .collect(),
            ),
        });
        for child in children {
            self.to_fhir_node(child, scopes, &mut body, state, context);
        }
        scopes.pop();

        out.push(Operation::IterateList {
            source,
            binding,
            wire_path: Some(self.label(node)),
            body,
        });
    }

    fn to_fhir_mapping(
        &self,
        node: usize,
        chain: &ResolvedChain,
        scopes: &[Scope],
        out: &mut Vec<Operation>,
        state: &mut EmitState,
        context: &mut CompilationContext,
    ) {
        let wire = self.index.node(node);
        let extension = if wire.is_extension() {
            match self.extension_target(node, chain, context) {
                Some(target) => Some(target),
                None => return,
            }
        } else {
            None
        };

        if !state.claim(self.dedup_key(node, chain)) {
            context.record_duplicate();
            return;
        }
        context.record_resolved_mapping();

        let (source, consumed) = self.shr_source(&chain.accessors, scopes);
        let source_list = consumed < chain.accessors.len() && chain.is_list();
        let destination = self.wire_path(node);
        let destination_list = destination.last().is_some_and(|segment| segment.list)
            && !scopes.iter().any(|scope| scope.wire_node == Some(node));

        let mut conditions = vec![present(&source)];
        if let Some(code) = self.type_guard(node) {
            conditions.push(Condition::HasType {
                path: source.clone(),
                code: code.to_string(),
            });
            for earlier in state.record_variant(&chain.key(), &destination) {
                conditions.push(Condition::Absent { path: earlier });
            }
        }

        let floor = scopes
            .iter()
            .rev()
            .find_map(|scope| scope.wire_node)
            .map(|bound| self.wire_path(bound).segments.len())
            .unwrap_or_default();

        let body = if let Some((url, element)) = extension {
            let mut body = intermediates(&destination, floor);
            body.push(Operation::AssignExtension {
                url,
                source,
                destination,
                element,
                mode: AssignMode::Push,
                wire_path: self.label(node),
            });
            body
        } else if let Some(container) = self.promoted_container(node, chain)
            && !scopes.iter().any(|scope| scope.wire_node == Some(container))
        {
            let container_path = self.wire_path(container);
            let binding = state.binding();
            let mut inner = intermediates(&destination, container_path.segments.len());
            inner.push(self.assignment(
                node,
                chain,
                PathExpr::binding(&binding),
                destination,
                AssignMode::Set,
            ));
            vec![Operation::PushToContainer {
                container: container_path,
                source,
                binding,
                wire_path: self.label(node),
                body: inner,
            }]
        } else {
            let mut body = intermediates(&destination, floor);
            body.push(self.reconcile(
                node,
                chain,
                source,
                destination,
                source_list,
                destination_list,
                state,
            ));
            body
        };

        out.push(Operation::Guard { conditions, body });
    }
}

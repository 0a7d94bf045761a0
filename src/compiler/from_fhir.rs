use super::builder::{EmitState, PlanBuilder, Scope, intermediates, present};
use super::mapping::{Accessor, ResolvedChain};
use super::CompilationContext;
use crate::plan::{AssignMode, InitKind, Operation, PathExpr};

impl PlanBuilder<'_> {
    /// Operations reading a wire document shaped by the profile into an instance.
    pub fn build_from_fhir(&self, context: &mut CompilationContext) -> Vec<Operation> {
        let mut state = EmitState::default();
        let mut scopes = Vec::new();
        let mut operations = Vec::new();

        let roots: Vec<usize> = self.index.roots().collect();
        for root in roots {
            self.from_fhir_node(root, &mut scopes, &mut operations, &mut state, context);
        }
        operations
    }

    fn from_fhir_node(
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
            self.from_fhir_mapping(node, chain, scopes, out, state, context);
        }

        if !self.index.has_mapped_descendants(node) {
            return;
        }

        let wire = self.index.node(node);
        let children = self.visible_children(node);
        let repeating = self
            .wire_path(node)
            .last()
            .is_some_and(|segment| segment.list)
            && !scopes.iter().any(|scope| scope.wire_node == Some(node));

        // Roots, extension lists, slicing roots and single elements open no scope.
        if self.index.parent(node).is_none()
            || wire.is_extension()
            || self.is_slice_group(node)
            || !repeating
        {
            for child in children {
                self.from_fhir_node(child, scopes, out, state, context);
            }
            return;
        }

        let source = self.wire_source(node, scopes);
        let binding = state.binding();
        let iteration = self.iteration_prefix(node, scopes);
        let iterate = iteration.is_some() || self.promotes_into(node);

        let mut body = Vec::new();
        let shr_prefix = iteration.map(|(chain, length)| {
            let prefix = &chain.accessors[..length];
            body.push(Operation::InitIntermediate {
                path: PathExpr::instance().extend(prefix.iter().map(Accessor::segment)),
                kind: InitKind::Append,
            });
            prefix
                .iter()
                .map(|accessor| accessor.name.clone())
                .collect::<Vec<_>>()
        });

        scopes.push(Scope {
            binding: binding.clone(),
            wire_node: Some(node),
            shr_prefix,
        });
        let opened = body.len();
        for child in children {
            self.from_fhir_node(child, scopes, &mut body, state, context);
        }
        scopes.pop();

        if body.len() == opened {
            return;
        }

        let wire_path = Some(self.label(node));
        out.push(if iterate {
            Operation::IterateList {
                source,
                binding,
                wire_path,
                body,
            }
        } else {
            Operation::SelectSingle {
                source,
                binding,
                wire_path,
                body,
            }
        });
    }

    fn from_fhir_mapping(
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

        let source = self.wire_source(node, scopes);
        let source_list = source.last().is_some_and(|segment| segment.list);
        let destination = chain.path_from(PathExpr::instance(), 0);

        let names = chain.names();
        let iterated = scopes.iter().any(|scope| {
            scope
                .shr_prefix
                .as_ref()
                .is_some_and(|prefix| prefix.iter().map(String::as_str).eq(names.iter().copied()))
        });
        let destination_list = chain.is_list() && !iterated;
        let floor = self.scope_floor(&names, scopes);

        let mut body = intermediates(&destination, floor);
        match extension {
            Some((url, element)) => body.push(Operation::AssignExtension {
                url,
                source: source.clone(),
                destination,
                element,
                mode: if destination_list {
                    AssignMode::Push
                } else {
                    AssignMode::Set
                },
                wire_path: self.label(node),
            }),
            None => body.push(self.reconcile(
                node,
                chain,
                source.clone(),
                destination,
                source_list,
                destination_list,
                state,
            )),
        }

        out.push(Operation::Guard {
            conditions: vec![present(&source)],
            body,
        });
    }
}

mod builder;
mod choice_types;
mod context;
mod extension;
mod from_fhir;
mod mapping;
mod parallel;
mod slicing;
mod to_fhir;

pub use builder::PlanBuilder;
pub use choice_types::*;
pub use context::*;
pub use extension::*;
pub use mapping::*;
pub use parallel::*;
pub use slicing::*;
pub use to_fhir::RESOURCE_TYPE_FIELD;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::CompilerConfig;
use crate::diagnostics::{Diagnostic, DiagnosticKind};
use crate::error::{Result, ShrMapError};
use crate::model::ObjectModelGraph;
use crate::plan::{Condition, Direction, Operation, TransformationPlan};
use crate::profile::{ProfileSet, ProfileTree};
use crate::types::{ElementDef, Identifier};

pub trait PlanCompiler {
    fn compile(&self, element: &ElementDef) -> Result<CompiledElement>;
    fn compile_with_context(
        &self,
        element: &ElementDef,
        context: &mut CompilationContext,
    ) -> Result<CompiledElement>;
}

#[async_trait::async_trait]
pub trait AsyncPlanCompiler {
    async fn compile_async(&self, element: ElementDef) -> Result<CompiledElement>;
    async fn compile_batch(&self, elements: Vec<ElementDef>) -> Result<CompilationReport>;
}

/// Both plans of one element together with what they were compiled against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledElement {
    pub identifier: Identifier,
    #[serde(default, rename = "profileId", skip_serializing_if = "Option::is_none")]
    pub profile_id: Option<String>,
    #[serde(default, rename = "resourceType", skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, rename = "extensionUrl", skip_serializing_if = "Option::is_none")]
    pub extension_url: Option<String>,
    #[serde(rename = "toFHIR")]
    pub to_fhir: TransformationPlan,
    #[serde(rename = "fromFHIR")]
    pub from_fhir: TransformationPlan,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl CompiledElement {
    pub fn plan(&self, direction: Direction) -> &TransformationPlan {
        match direction {
            Direction::ToFhir => &self.to_fhir,
            Direction::FromFhir => &self.from_fhir,
        }
    }

    pub fn diagnostics_of(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(move |diagnostic| diagnostic.kind == kind)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilationFailure {
    pub identifier: Identifier,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompilationReport {
    pub compiled: Vec<CompiledElement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<CompilationFailure>,
    #[serde(skip)]
    pub duration: Duration,
}

impl CompilationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, identifier: &Identifier, outcome: Result<CompiledElement>) {
        match outcome {
            Ok(compiled) => self.compiled.push(compiled),
            Err(error) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(element = %identifier, error = %error, "element compilation failed");
                self.failures.push(CompilationFailure {
                    identifier: identifier.clone(),
                    message: error.to_string(),
                });
            }
        }
    }

    pub fn total(&self) -> usize {
        self.compiled.len() + self.failures.len()
    }

    pub fn success_rate(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            self.compiled.len() as f64 / self.total() as f64
        }
    }

    pub fn throughput(&self) -> f64 {
        if self.duration.as_secs_f64() == 0.0 {
            0.0
        } else {
            self.compiled.len() as f64 / self.duration.as_secs_f64()
        }
    }

    pub fn diagnostic_count(&self) -> usize {
        self.compiled
            .iter()
            .map(|compiled| compiled.diagnostics.len())
            .sum()
    }

    pub fn get(&self, identifier: &Identifier) -> Option<&CompiledElement> {
        self.compiled
            .iter()
            .find(|compiled| &compiled.identifier == identifier)
    }

    /// Sorts by identifier so reports from parallel runs compare equal.
    pub fn sort(&mut self) {
        self.compiled
            .sort_by(|left, right| left.identifier.cmp(&right.identifier));
        self.failures
            .sort_by(|left, right| left.identifier.cmp(&right.identifier));
    }
}

/// Compiles elements of an object-model graph against a profile set.
#[derive(Debug, Clone)]
pub struct MappingCompiler {
    graph: Arc<ObjectModelGraph>,
    profiles: Arc<ProfileSet>,
    config: CompilerConfig,
}

impl MappingCompiler {
    pub fn new(graph: ObjectModelGraph, profiles: ProfileSet) -> Self {
        Self::with_config(graph, profiles, CompilerConfig::default())
    }

    pub fn with_config(graph: ObjectModelGraph, profiles: ProfileSet, config: CompilerConfig) -> Self {
        Self::from_shared(Arc::new(graph), Arc::new(profiles), config)
    }

    pub fn from_shared(
        graph: Arc<ObjectModelGraph>,
        profiles: Arc<ProfileSet>,
        config: CompilerConfig,
    ) -> Self {
        Self {
            graph,
            profiles,
            config,
        }
    }

    pub fn graph(&self) -> &ObjectModelGraph {
        &self.graph
    }

    pub fn profiles(&self) -> &ProfileSet {
        &self.profiles
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    /// Compiles every element of `namespace`; a failing element does not affect the others.
    pub fn compile_namespace(&self, namespace: &str) -> CompilationReport {
        self.compile_elements(self.graph.all_elements_in(namespace))
    }

    pub fn compile_all(&self) -> CompilationReport {
        self.compile_elements(self.graph.iter())
    }

    pub fn compile_elements<'e>(
        &self,
        elements: impl IntoIterator<Item = &'e ElementDef>,
    ) -> CompilationReport {
        let start = Instant::now();
        let mut report = CompilationReport::new();
        let mut context = CompilationContext::new(&self.config);

        for element in elements {
            let outcome = self.compile_with_context(element, &mut context);
            report.record(&element.identifier, outcome);
        }

        report.duration = start.elapsed();
        #[cfg(feature = "tracing")]
        tracing::info!(
            compiled = report.compiled.len(),
            failed = report.failures.len(),
            diagnostics = report.diagnostic_count(),
            duration_ms = report.duration.as_millis() as u64,
            "plan compilation finished"
        );
        report
    }

    fn compile_profile(
        &self,
        element: &ElementDef,
        tree: &ProfileTree,
        context: &mut CompilationContext,
    ) -> Result<(Vec<Operation>, Vec<Operation>)> {
        tree.validate()?;
        if !self.profiles.is_known_type(&tree.resource_type) {
            return Err(ShrMapError::unknown_resource_type(
                &tree.id,
                &tree.resource_type,
            ));
        }

        let expansion = ChoiceExpander::new(&self.graph, &self.profiles).expand_nodes(
            &tree.elements,
            element,
            context,
        );
        let builder = PlanBuilder::new(
            &self.graph,
            &self.profiles,
            element,
            tree,
            &expansion,
            context,
        );
        let to_fhir = builder.build_to_fhir(context);
        let from_fhir = builder.build_from_fhir(context);
        Ok((to_fhir, from_fhir))
    }
}

impl PlanCompiler for MappingCompiler {
    fn compile(&self, element: &ElementDef) -> Result<CompiledElement> {
        let mut context = CompilationContext::new(&self.config);
        self.compile_with_context(element, &mut context)
    }

    fn compile_with_context(
        &self,
        element: &ElementDef,
        context: &mut CompilationContext,
    ) -> Result<CompiledElement> {
        let identifier = &element.identifier;
        let profile = self.profiles.profile_for(identifier);
        let extension = self.profiles.extension_for(identifier);
        context.begin_element(
            identifier,
            profile.or(extension).map(|tree| tree.id.as_str()),
        );

        let mut to_fhir = Vec::new();
        let mut from_fhir = Vec::new();

        if let Some(tree) = extension {
            tree.validate()?;
            let planner = ExtensionPlanner::new(&self.graph, &self.profiles, element, tree);
            to_fhir.push(planner.to_fhir(context));
            from_fhir.push(planner.from_fhir(context));
        }

        match profile {
            Some(tree) => {
                let (to_ops, from_ops) = self.compile_profile(element, tree, context)?;
                if extension.is_some() {
                    to_fhir.push(as_resource(to_ops));
                    from_fhir.push(as_resource(from_ops));
                } else {
                    to_fhir.extend(to_ops);
                    from_fhir.extend(from_ops);
                }
            }
            None => {
                context.report(Diagnostic::new(
                    DiagnosticKind::MissingBaseProfile,
                    identifier,
                    "no profile; using value pass-through",
                ));
                if self.config.value_fallback {
                    to_fhir.extend(fallback_to_fhir(&self.graph, element));
                    from_fhir.extend(fallback_from_fhir(&self.graph, element));
                }
            }
        }

        context.end_element();
        let diagnostics = context.take_diagnostics();
        let profile_id = profile.or(extension).map(|tree| tree.id.clone());

        let plan = |direction: Direction, operations: Vec<Operation>| TransformationPlan {
            element: identifier.clone(),
            direction,
            profile: profile_id.clone(),
            operations,
            diagnostics: diagnostics.clone(),
        };

        Ok(CompiledElement {
            identifier: identifier.clone(),
            profile_id: profile_id.clone(),
            resource_type: profile.map(|tree| tree.resource_type.clone()),
            extension_url: extension.and_then(|tree| tree.url.clone()),
            to_fhir: plan(Direction::ToFhir, to_fhir),
            from_fhir: plan(Direction::FromFhir, from_fhir),
            diagnostics,
        })
    }
}

fn as_resource(operations: Vec<Operation>) -> Operation {
    Operation::Guard {
        conditions: vec![Condition::AsExtension { value: false }],
        body: operations,
    }
}

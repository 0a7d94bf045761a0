use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;

use super::navigation::{
    Datum, init_instance, init_json, read_instance, read_json, read_shr, write_instance,
    write_json,
};
use super::{
    BundleLookup, CatalogSniffer, Instance, NoBundle, ReferenceEnvelope, ShrValue, TypeSniffer,
};
use crate::compiler::{CompilationReport, CompiledElement};
use crate::error::{ExecutionError, Result};
use crate::plan::{
    AssignMode, Condition, ConstructTarget, InitKind, Operation, PathExpr, PathRoot,
};
use crate::types::Identifier;

pub const DEFAULT_RECURSION_LIMIT: usize = 64;

const ID_FIELD: &str = "id";
const URL_FIELD: &str = "url";
const REFERENCE_FIELD: &str = "reference";

/// State shared by every nested conversion of one top-level execution.
pub struct ExecutionContext<'l> {
    lookup: &'l dyn BundleLookup,
    /// Resolved references by cache key and reference string.
    memo: HashMap<String, ShrValue>,
    depth: usize,
    container_id: Option<String>,
}

impl<'l> ExecutionContext<'l> {
    pub fn new(lookup: &'l dyn BundleLookup) -> Self {
        Self {
            lookup,
            memo: HashMap::new(),
            depth: 0,
            container_id: None,
        }
    }

    pub fn resolved_references(&self) -> usize {
        self.memo.len()
    }
}

/// Working state of one plan invocation.
struct Frame {
    element: Identifier,
    instance: Instance,
    wire: Value,
    bindings: HashMap<String, Datum>,
    as_extension: bool,
}

impl Frame {
    fn new(element: Identifier, instance: Instance, wire: Value, as_extension: bool) -> Self {
        Self {
            element,
            instance,
            wire,
            bindings: HashMap::new(),
            as_extension,
        }
    }
}

/// Executes compiled plans against instances and wire documents.
pub struct PlanInterpreter {
    plans: HashMap<Identifier, CompiledElement>,
    sniffer: Arc<dyn TypeSniffer>,
    recursion_limit: usize,
}

impl PlanInterpreter {
    pub fn new(compiled: impl IntoIterator<Item = CompiledElement>) -> Self {
        Self {
            plans: compiled
                .into_iter()
                .map(|element| (element.identifier.clone(), element))
                .collect(),
            sniffer: Arc::new(CatalogSniffer::default()),
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }

    pub fn from_report(report: &CompilationReport) -> Self {
        Self::new(report.compiled.iter().cloned())
    }

    pub fn with_sniffer(mut self, sniffer: impl TypeSniffer + 'static) -> Self {
        self.sniffer = Arc::new(sniffer);
        self
    }

    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    pub fn contains(&self, identifier: &Identifier) -> bool {
        self.plans.contains_key(identifier)
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Converts `instance` into a wire document using its own type's plan.
    pub fn to_fhir(&self, instance: &Instance) -> Result<Value> {
        self.to_fhir_as(instance, false)
    }

    pub fn to_fhir_as(&self, instance: &Instance, as_extension: bool) -> Result<Value> {
        let mut context = ExecutionContext::new(&NoBundle);
        self.convert_to_wire(&instance.identifier, instance, as_extension, &mut context)
    }

    /// Reads `wire` back into an instance of `element`, resolving references through `lookup`.
    pub fn from_fhir(
        &self,
        element: &Identifier,
        wire: &Value,
        lookup: &dyn BundleLookup,
    ) -> Result<Instance> {
        self.from_fhir_as(element, wire, false, lookup)
    }

    pub fn from_fhir_as(
        &self,
        element: &Identifier,
        wire: &Value,
        as_extension: bool,
        lookup: &dyn BundleLookup,
    ) -> Result<Instance> {
        let mut context = ExecutionContext::new(lookup);
        context.container_id = wire.get(ID_FIELD).and_then(Value::as_str).map(str::to_string);
        self.convert_from_wire(element, wire, as_extension, &mut context)
    }

    fn plan_for(&self, element: &Identifier) -> Result<&CompiledElement> {
        self.plans.get(element).ok_or_else(|| {
            ExecutionError::MissingPlan {
                identifier: element.fqn(),
            }
            .into()
        })
    }

    fn enter(&self, element: &Identifier, context: &mut ExecutionContext<'_>) -> Result<()> {
        if context.depth >= self.recursion_limit {
            return Err(ExecutionError::RecursionLimit {
                limit: self.recursion_limit,
                identifier: element.fqn(),
            }
            .into());
        }
        context.depth += 1;
        Ok(())
    }

    fn convert_to_wire(
        &self,
        element: &Identifier,
        instance: &Instance,
        as_extension: bool,
        context: &mut ExecutionContext<'_>,
    ) -> Result<Value> {
        let compiled = self.plan_for(element)?;
        self.enter(element, context)?;
        let mut frame = Frame::new(element.clone(), instance.clone(), Value::Null, as_extension);
        let outcome = self.execute(&compiled.to_fhir.operations, &mut frame, context);
        context.depth -= 1;
        outcome?;
        Ok(frame.wire)
    }

    fn convert_from_wire(
        &self,
        element: &Identifier,
        wire: &Value,
        as_extension: bool,
        context: &mut ExecutionContext<'_>,
    ) -> Result<Instance> {
        let compiled = self.plan_for(element)?;
        self.enter(element, context)?;
        let mut frame = Frame::new(
            element.clone(),
            Instance::new(element.clone()),
            wire.clone(),
            as_extension,
        );
        let outcome = self.execute(&compiled.from_fhir.operations, &mut frame, context);
        context.depth -= 1;
        outcome?;
        Ok(frame.instance)
    }

    fn execute(
        &self,
        operations: &[Operation],
        frame: &mut Frame,
        context: &mut ExecutionContext<'_>,
    ) -> Result<()> {
        for operation in operations {
            self.execute_operation(operation, frame, context)?;
        }
        Ok(())
    }

    fn execute_operation(
        &self,
        operation: &Operation,
        frame: &mut Frame,
        context: &mut ExecutionContext<'_>,
    ) -> Result<()> {
        match operation {
            Operation::Guard { conditions, body } => {
                for condition in conditions {
                    if !self.holds(condition, frame)? {
                        return Ok(());
                    }
                }
                self.execute(body, frame, context)
            }
            Operation::IterateList {
                source,
                binding,
                body,
                ..
            } => {
                let items = self.items(frame, source)?;
                for item in items {
                    frame.bindings.insert(binding.clone(), item);
                    self.execute(body, frame, context)?;
                }
                frame.bindings.remove(binding);
                Ok(())
            }
            Operation::SelectSingle {
                source,
                binding,
                body,
                ..
            } => {
                if let Some(item) = self.items(frame, source)?.into_iter().next() {
                    frame.bindings.insert(binding.clone(), item);
                    self.execute(body, frame, context)?;
                    frame.bindings.remove(binding);
                }
                Ok(())
            }
            Operation::InitIntermediate { path, kind } => {
                let label = path.to_string();
                match &path.root {
                    PathRoot::Instance => {
                        init_instance(&mut frame.instance, &path.segments, *kind, &label)?
                    }
                    PathRoot::Wire => init_json(&mut frame.wire, &path.segments, *kind, &label)?,
                    PathRoot::Binding(_) => return Err(binding_write(path).into()),
                }
                Ok(())
            }
            Operation::AssignPrimitive {
                source,
                destination,
                mode,
                ..
            } => {
                if let Some(value) = self.read(frame, source)? {
                    self.write(frame, destination, value, *mode)?;
                }
                Ok(())
            }
            Operation::AssignConstructed {
                source,
                destination,
                target,
                as_extension,
                mode,
                ..
            } => {
                let Some(value) = self.read(frame, source)? else {
                    return Ok(());
                };
                let converted = match value {
                    Datum::Shr(value) => {
                        Datum::Json(self.shr_to_wire(target, &value, *as_extension, context)?)
                    }
                    Datum::Json(value) => {
                        Datum::Shr(self.wire_to_shr(target, &value, *as_extension, context)?)
                    }
                };
                self.write(frame, destination, converted, *mode)
            }
            Operation::AssignFixed { destination, value } => {
                self.write(frame, destination, Datum::Json(value.clone()), AssignMode::Set)
            }
            Operation::AssignExtension {
                url,
                source,
                destination,
                element,
                mode,
                ..
            } => self.assign_extension(frame, context, url, source, destination, element, *mode),
            Operation::ResolveReference {
                source,
                destination,
                target,
                cache_key,
                mode,
                ..
            } => self.resolve_reference(
                frame,
                context,
                source,
                destination,
                target,
                cache_key,
                *mode,
            ),
            Operation::PushToContainer {
                container,
                source,
                binding,
                body,
                ..
            } => {
                let items = self.items(frame, source)?;
                let label = container.to_string();
                for item in items {
                    init_json(&mut frame.wire, &container.segments, InitKind::Append, &label)?;
                    frame.bindings.insert(binding.clone(), item);
                    self.execute(body, frame, context)?;
                }
                frame.bindings.remove(binding);
                Ok(())
            }
        }
    }

    fn holds(&self, condition: &Condition, frame: &Frame) -> Result<bool> {
        Ok(match condition {
            Condition::Present { path } => self.read(frame, path)?.is_some_and(|d| d.is_present()),
            Condition::Absent { path } => !self.read(frame, path)?.is_some_and(|d| d.is_present()),
            Condition::AsExtension { value } => frame.as_extension == *value,
            Condition::HasType { path, code } => match self.read(frame, path)? {
                Some(Datum::Shr(value)) => self.shr_has_type(&value, code),
                Some(Datum::Json(value)) => self.sniffer.conforms(&value, code),
                None => false,
            },
        })
    }

    fn shr_has_type(&self, value: &ShrValue, code: &str) -> bool {
        match value {
            ShrValue::Primitive(value) => self.sniffer.conforms(value, code),
            ShrValue::Element(instance) => {
                instance.identifier.matches_code(code)
                    || self.resource_type(&instance.identifier) == Some(code)
                    || instance
                        .value()
                        .is_some_and(|value| self.shr_has_type(value, code))
            }
            ShrValue::List(items) => items.first().is_some_and(|item| self.shr_has_type(item, code)),
            ShrValue::Reference(envelope) => {
                code == "Reference" || envelope.entry_type.matches_code(code)
            }
        }
    }

    fn resource_type(&self, identifier: &Identifier) -> Option<&str> {
        self.plans.get(identifier)?.resource_type.as_deref()
    }

    fn read(&self, frame: &Frame, path: &PathExpr) -> Result<Option<Datum>> {
        Ok(match &path.root {
            PathRoot::Instance => read_instance(&frame.instance, &path.segments).map(Datum::Shr),
            PathRoot::Wire => match read_json(&frame.wire, &path.segments) {
                Value::Null => None,
                value => Some(Datum::Json(value)),
            },
            PathRoot::Binding(name) => {
                let bound = frame.bindings.get(name).ok_or_else(|| ExecutionError::UnboundName {
                    name: name.clone(),
                    identifier: frame.element.fqn(),
                })?;
                match bound {
                    Datum::Shr(value) => read_shr(value, &path.segments).map(Datum::Shr),
                    Datum::Json(value) => match read_json(value, &path.segments) {
                        Value::Null => None,
                        value => Some(Datum::Json(value)),
                    },
                }
            }
        })
    }

    fn write(
        &self,
        frame: &mut Frame,
        destination: &PathExpr,
        value: Datum,
        mode: AssignMode,
    ) -> Result<()> {
        let label = destination.to_string();
        match &destination.root {
            PathRoot::Wire => {
                let value = value.into_json();
                if !value.is_null() {
                    write_json(&mut frame.wire, &destination.segments, value, mode, &label)?;
                }
            }
            PathRoot::Instance => {
                let value = value.into_shr();
                if !value.is_empty() {
                    write_instance(&mut frame.instance, &destination.segments, value, mode, &label)?;
                }
            }
            PathRoot::Binding(_) => return Err(binding_write(destination).into()),
        }
        Ok(())
    }

    fn items(&self, frame: &Frame, source: &PathExpr) -> Result<Vec<Datum>> {
        Ok(self
            .read(frame, source)?
            .map(Datum::into_items)
            .unwrap_or_default())
    }

    /// Object-model value to wire JSON, delegating element instances to their own plans.
    fn shr_to_wire(
        &self,
        target: &ConstructTarget,
        value: &ShrValue,
        as_extension: bool,
        context: &mut ExecutionContext<'_>,
    ) -> Result<Value> {
        match value {
            ShrValue::List(items) => items
                .iter()
                .map(|item| self.shr_to_wire(target, item, as_extension, context))
                .collect::<Result<Vec<_>>>()
                .map(Value::Array),
            ShrValue::Element(instance) => {
                let element = self.instance_type(target, instance);
                self.convert_to_wire(&element, instance, as_extension, context)
            }
            ShrValue::Primitive(value) => Ok(value.clone()),
            ShrValue::Reference(envelope) => Ok(json!({ REFERENCE_FIELD: envelope.entry_id })),
        }
    }

    /// The instance's own type when it has a plan, else the declared target.
    fn instance_type(&self, target: &ConstructTarget, instance: &Instance) -> Identifier {
        if self.contains(&instance.identifier) {
            return instance.identifier.clone();
        }
        match target {
            ConstructTarget::Known { element } => element.clone(),
            ConstructTarget::Dynamic { candidates } => candidates
                .first()
                .cloned()
                .unwrap_or_else(|| instance.identifier.clone()),
        }
    }

    fn wire_to_shr(
        &self,
        target: &ConstructTarget,
        value: &Value,
        as_extension: bool,
        context: &mut ExecutionContext<'_>,
    ) -> Result<ShrValue> {
        if let Value::Array(items) = value {
            return items
                .iter()
                .map(|item| self.wire_to_shr(target, item, as_extension, context))
                .collect::<Result<Vec<_>>>()
                .map(ShrValue::List);
        }

        let element = match target {
            ConstructTarget::Known { element } => Some(element.clone()),
            ConstructTarget::Dynamic { candidates } => self.sniff_candidate(candidates, value),
        };
        match element {
            Some(element) if !element.is_primitive() => Ok(ShrValue::from(
                self.convert_from_wire(&element, value, as_extension, context)?,
            )),
            _ => Ok(ShrValue::Primitive(value.clone())),
        }
    }

    /// Candidate whose type the wire value conforms to.
    fn sniff_candidate(&self, candidates: &[Identifier], value: &Value) -> Option<Identifier> {
        let sniffed = self.sniffer.sniff(value);
        candidates
            .iter()
            .find(|candidate| {
                if candidate.is_primitive() {
                    return self.sniffer.conforms(value, &candidate.name);
                }
                sniffed.as_deref().is_some_and(|code| {
                    candidate.matches_code(code) || self.resource_type(candidate) == Some(code)
                })
            })
            .cloned()
    }

    #[allow(clippy::too_many_arguments)]
    fn assign_extension(
        &self,
        frame: &mut Frame,
        context: &mut ExecutionContext<'_>,
        url: &str,
        source: &PathExpr,
        destination: &PathExpr,
        element: &Identifier,
        mode: AssignMode,
    ) -> Result<()> {
        let Some(value) = self.read(frame, source)? else {
            return Ok(());
        };

        match value {
            Datum::Shr(value) => {
                for item in value.items() {
                    let instance = match item {
                        ShrValue::Element(instance) => (**instance).clone(),
                        ShrValue::Primitive(value) => {
                            Instance::new(element.clone()).with_value(value.clone())
                        }
                        _ => continue,
                    };
                    let owner = if self.contains(&instance.identifier) {
                        instance.identifier.clone()
                    } else {
                        element.clone()
                    };
                    let wire = self.convert_to_wire(&owner, &instance, true, context)?;
                    self.write(frame, destination, Datum::Json(wire), mode)?;
                }
            }
            Datum::Json(value) => {
                let entries: Vec<Value> = Datum::Json(value)
                    .into_items()
                    .into_iter()
                    .map(Datum::into_json)
                    .filter(|entry| entry.get(URL_FIELD).and_then(Value::as_str) == Some(url))
                    .collect();
                let take = if mode == AssignMode::Set { 1 } else { entries.len() };
                for entry in entries.iter().take(take) {
                    let instance = self.convert_from_wire(element, entry, true, context)?;
                    self.write(frame, destination, Datum::Shr(instance.into()), mode)?;
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_reference(
        &self,
        frame: &mut Frame,
        context: &mut ExecutionContext<'_>,
        source: &PathExpr,
        destination: &PathExpr,
        target: &Identifier,
        cache_key: &str,
        mode: AssignMode,
    ) -> Result<()> {
        let Some(value) = self.read(frame, source)? else {
            return Ok(());
        };

        match value {
            Datum::Shr(value) => {
                let references: Vec<Value> = value
                    .items()
                    .into_iter()
                    .filter_map(|item| match item {
                        ShrValue::Reference(envelope) => Some(envelope.entry_id.clone()),
                        ShrValue::Element(instance) => {
                            if instance.entry_id.is_none() {
                                #[cfg(feature = "tracing")]
                                tracing::debug!(
                                    element = %instance.identifier,
                                    "referenced instance has no entry id"
                                );
                            }
                            instance.entry_id.clone()
                        }
                        _ => None,
                    })
                    .map(|entry_id| json!({ REFERENCE_FIELD: entry_id }))
                    .collect();
                if mode == AssignMode::Set {
                    if let Some(reference) = references.into_iter().next() {
                        self.write(frame, destination, Datum::Json(reference), mode)?;
                    }
                } else {
                    for reference in references {
                        self.write(frame, destination, Datum::Json(reference), mode)?;
                    }
                }
            }
            Datum::Json(value) => {
                for item in Datum::Json(value).into_items() {
                    let Datum::Json(item) = item else {
                        continue;
                    };
                    let Some(reference) = item.get(REFERENCE_FIELD).and_then(Value::as_str) else {
                        continue;
                    };
                    let resolved = self.resolve(context, target, cache_key, reference)?;
                    self.write(frame, destination, Datum::Shr(resolved), mode)?;
                    if mode == AssignMode::Set {
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Looks up and decodes a reference target once per cache key within an execution.
    fn resolve(
        &self,
        context: &mut ExecutionContext<'_>,
        target: &Identifier,
        cache_key: &str,
        reference: &str,
    ) -> Result<ShrValue> {
        let memo_key = format!("{cache_key}|{reference}");
        if let Some(resolved) = context.memo.get(&memo_key) {
            return Ok(resolved.clone());
        }

        let lookup = context.lookup;
        let decoded = match lookup.find(reference) {
            Some(resource) => Some(Box::new(
                self.convert_from_wire(target, resource, false, context)?,
            )),
            None => {
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    reference,
                    target = %target,
                    "unresolved reference target"
                );
                None
            }
        };

        let resolved = ShrValue::Reference(ReferenceEnvelope {
            container_id: context.container_id.clone(),
            entry_id: reference.to_string(),
            entry_type: target.clone(),
            target: decoded,
        });
        context.memo.insert(memo_key, resolved.clone());
        Ok(resolved)
    }
}

fn binding_write(path: &PathExpr) -> ExecutionError {
    ExecutionError::ShapeMismatch {
        path: path.to_string(),
        segment: path
            .last()
            .map(|segment| segment.field.clone())
            .unwrap_or_default(),
    }
}

mod operation;
mod path;

pub use operation::*;
pub use path::*;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::diagnostics::Diagnostic;
use crate::types::Identifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    ToFhir,
    FromFhir,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ToFhir => f.write_str("toFHIR"),
            Self::FromFhir => f.write_str("fromFHIR"),
        }
    }
}

/// Ordered operation tree converting one element in one direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationPlan {
    pub element: Identifier,
    pub direction: Direction,
    /// Profile or extension the plan was compiled against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    pub operations: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

impl TransformationPlan {
    pub fn new(element: Identifier, direction: Direction) -> Self {
        Self {
            element,
            direction,
            profile: None,
            operations: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Every operation, depth first.
    pub fn all_operations(&self) -> Vec<&Operation> {
        let mut out = Vec::new();
        for operation in &self.operations {
            operation.walk(&mut |op| out.push(op));
        }
        out
    }

    /// Profile paths of all wire elements referenced by the plan.
    pub fn wire_paths(&self) -> Vec<&str> {
        self.all_operations()
            .into_iter()
            .filter_map(Operation::wire_path)
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.all_operations()
            .into_iter()
            .filter(|op| op.name() == name)
            .count()
    }
}

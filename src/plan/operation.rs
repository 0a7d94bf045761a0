use serde::{Deserialize, Serialize};

use super::PathExpr;
use crate::types::Identifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AssignMode {
    /// Replace the destination.
    Set,
    /// Append the value to the destination list.
    Push,
    /// Append every item of a list value to the destination list.
    Extend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InitKind {
    /// Ensure an object exists. On a list segment, ensure the list has a (slice-matching) element.
    Object,
    /// Ensure a list exists.
    Array,
    /// Append a fresh element to the list, pre-filled with the segment's slice values.
    Append,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition", rename_all = "camelCase")]
pub enum Condition {
    Present { path: PathExpr },
    Absent { path: PathExpr },
    /// Matches the `asExtension` flag the plan was invoked with.
    AsExtension { value: bool },
    /// The value at `path` has the given wire type code.
    HasType { path: PathExpr, code: String },
}

/// Type constructed by [`Operation::AssignConstructed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ConstructTarget {
    Known { element: Identifier },
    /// Decided at execution time: by the instance's own type, or by sniffing the wire shape.
    Dynamic { candidates: Vec<Identifier> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Operation {
    Guard {
        conditions: Vec<Condition>,
        body: Vec<Operation>,
    },
    IterateList {
        source: PathExpr,
        binding: String,
        #[serde(default, rename = "wirePath", skip_serializing_if = "Option::is_none")]
        wire_path: Option<String>,
        body: Vec<Operation>,
    },
    /// Binds the first item of a list, or the first matching the source's slice.
    SelectSingle {
        source: PathExpr,
        binding: String,
        #[serde(default, rename = "wirePath", skip_serializing_if = "Option::is_none")]
        wire_path: Option<String>,
        body: Vec<Operation>,
    },
    InitIntermediate {
        path: PathExpr,
        kind: InitKind,
    },
    AssignPrimitive {
        source: PathExpr,
        destination: PathExpr,
        mode: AssignMode,
        #[serde(rename = "wirePath")]
        wire_path: String,
    },
    AssignConstructed {
        source: PathExpr,
        destination: PathExpr,
        target: ConstructTarget,
        #[serde(rename = "asExtension")]
        as_extension: bool,
        mode: AssignMode,
        #[serde(rename = "wirePath")]
        wire_path: String,
    },
    AssignFixed {
        destination: PathExpr,
        value: serde_json::Value,
    },
    /// Emits or locates an extension entry by URL and delegates to the element's extension plan.
    AssignExtension {
        url: String,
        source: PathExpr,
        destination: PathExpr,
        element: Identifier,
        mode: AssignMode,
        #[serde(rename = "wirePath")]
        wire_path: String,
    },
    ResolveReference {
        source: PathExpr,
        destination: PathExpr,
        target: Identifier,
        #[serde(rename = "cacheKey")]
        cache_key: String,
        mode: AssignMode,
        #[serde(rename = "wirePath")]
        wire_path: String,
    },
    /// Appends one container element per source item, then runs `body` against it.
    PushToContainer {
        container: PathExpr,
        source: PathExpr,
        binding: String,
        #[serde(rename = "wirePath")]
        wire_path: String,
        body: Vec<Operation>,
    },
}

impl Operation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Guard { .. } => "Guard",
            Self::IterateList { .. } => "IterateList",
            Self::SelectSingle { .. } => "SelectSingle",
            Self::InitIntermediate { .. } => "InitIntermediate",
            Self::AssignPrimitive { .. } => "AssignPrimitive",
            Self::AssignConstructed { .. } => "AssignConstructed",
            Self::AssignFixed { .. } => "AssignFixed",
            Self::AssignExtension { .. } => "AssignExtension",
            Self::ResolveReference { .. } => "ResolveReference",
            Self::PushToContainer { .. } => "PushToContainer",
        }
    }

    pub fn body(&self) -> &[Operation] {
        match self {
            Self::Guard { body, .. }
            | Self::IterateList { body, .. }
            | Self::SelectSingle { body, .. }
            | Self::PushToContainer { body, .. } => body,
            _ => &[],
        }
    }

    /// Profile path of the wire element this operation consumes, if any.
    pub fn wire_path(&self) -> Option<&str> {
        match self {
            Self::IterateList { wire_path, .. } | Self::SelectSingle { wire_path, .. } => {
                wire_path.as_deref()
            }
            Self::AssignPrimitive { wire_path, .. }
            | Self::AssignConstructed { wire_path, .. }
            | Self::AssignExtension { wire_path, .. }
            | Self::ResolveReference { wire_path, .. }
            | Self::PushToContainer { wire_path, .. } => Some(wire_path),
            _ => None,
        }
    }

    pub fn is_assignment(&self) -> bool {
        matches!(
            self,
            Self::AssignPrimitive { .. }
                | Self::AssignConstructed { .. }
                | Self::AssignExtension { .. }
                | Self::ResolveReference { .. }
        )
    }

    /// Destination of an assignment.
    pub fn destination(&self) -> Option<&PathExpr> {
        match self {
            Self::AssignPrimitive { destination, .. }
            | Self::AssignConstructed { destination, .. }
            | Self::AssignFixed { destination, .. }
            | Self::AssignExtension { destination, .. }
            | Self::ResolveReference { destination, .. } => Some(destination),
            _ => None,
        }
    }

    /// Depth-first walk over this operation and everything nested in it.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Operation)) {
        visit(self);
        for child in self.body() {
            child.walk(visit);
        }
    }
}

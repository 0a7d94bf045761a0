use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::Identifier;

/// Where a path starts: the object-model instance, the wire document, or a scope binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PathRoot {
    Instance,
    Wire,
    Binding(String),
}

/// A fixed value that identifies a slice, relative to the sliced element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceConstraint {
    /// Field path below the sliced element; empty for `$this`.
    pub path: Vec<String>,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceSelector {
    pub name: String,
    pub constraints: Vec<SliceConstraint>,
}

impl SliceSelector {
    /// A slice without constraints cannot be told apart from its siblings.
    pub fn is_selectable(&self) -> bool {
        !self.constraints.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathSegment {
    pub field: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub list: bool,
    /// Object-model type created when the segment is missing on write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<Identifier>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slice: Option<SliceSelector>,
}

impl PathSegment {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            list: false,
            element: None,
            slice: None,
        }
    }

    pub fn list(mut self, list: bool) -> Self {
        self.list = list;
        self
    }

    pub fn of_element(mut self, element: Option<Identifier>) -> Self {
        self.element = element;
        self
    }

    pub fn sliced(mut self, slice: Option<SliceSelector>) -> Self {
        self.slice = slice;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathExpr {
    pub root: PathRoot,
    #[serde(default)]
    pub segments: Vec<PathSegment>,
}

impl PathExpr {
    pub fn instance() -> Self {
        Self {
            root: PathRoot::Instance,
            segments: Vec::new(),
        }
    }

    pub fn wire() -> Self {
        Self {
            root: PathRoot::Wire,
            segments: Vec::new(),
        }
    }

    pub fn binding(name: impl Into<String>) -> Self {
        Self {
            root: PathRoot::Binding(name.into()),
            segments: Vec::new(),
        }
    }

    pub fn join(mut self, segment: PathSegment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn field(self, field: impl Into<String>) -> Self {
        self.join(PathSegment::new(field))
    }

    pub fn extend(mut self, segments: impl IntoIterator<Item = PathSegment>) -> Self {
        self.segments.extend(segments);
        self
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn last(&self) -> Option<&PathSegment> {
        self.segments.last()
    }

    /// Path without its last segment.
    pub fn parent(&self) -> Option<PathExpr> {
        if self.segments.is_empty() {
            return None;
        }
        Some(PathExpr {
            root: self.root.clone(),
            segments: self.segments[..self.segments.len() - 1].to_vec(),
        })
    }

    /// Normalized key used for dedup of intermediate initialization.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PathExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.root {
            PathRoot::Instance => f.write_str("instance")?,
            PathRoot::Wire => f.write_str("wire")?,
            PathRoot::Binding(name) => write!(f, "${name}")?,
        }
        for segment in &self.segments {
            write!(f, ".{}", segment.field)?;
            if let Some(slice) = &segment.slice {
                write!(f, ":{}", slice.name)?;
            }
            if segment.list {
                f.write_str("[]")?;
            }
        }
        Ok(())
    }
}

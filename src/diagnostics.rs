use serde::{Deserialize, Serialize};
use std::fmt;

use crate::profile::MappingAnnotation;
use crate::types::Identifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticKind {
    /// A mapping chain could not be resolved; the annotation was dropped.
    UnresolvedMapping,
    /// No fixed value found for a slice discriminator; the slice is unselectable.
    UnresolvedSliceDiscriminator,
    /// A `<Value>` mapping cannot be satisfied by the element's value slot.
    AmbiguousValueMapping,
    /// The element has no profile; value pass-through is used instead.
    MissingBaseProfile,
    /// An extension referenced by URL or identifier is not defined.
    MissingExtension,
}

impl DiagnosticKind {
    pub fn severity(&self) -> Severity {
        match self {
            Self::UnresolvedMapping
            | Self::UnresolvedSliceDiscriminator
            | Self::AmbiguousValueMapping
            | Self::MissingExtension => Severity::Warning,
            Self::MissingBaseProfile => Severity::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
}

/// A non-fatal compile-time issue attached to a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub message: String,
    /// Element being compiled.
    pub element: Identifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotation: Option<MappingAnnotation>,
    /// Element at which chain resolution stopped.
    #[serde(default, rename = "failedAt", skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<Identifier>,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, element: &Identifier, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            message: message.into(),
            element: element.clone(),
            path: None,
            annotation: None,
            failed_at: None,
        }
    }

    pub fn at_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_annotation(mut self, annotation: &MappingAnnotation) -> Self {
        self.annotation = Some(annotation.clone());
        self
    }

    pub fn failed_at(mut self, identifier: &Identifier) -> Self {
        self.failed_at = Some(identifier.clone());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.kind, self.element, self.message)?;
        if let Some(path) = &self.path {
            write!(f, " (at {path})")?;
        }
        Ok(())
    }
}

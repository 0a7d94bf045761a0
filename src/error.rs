use thiserror::Error;

use crate::types::Identifier;

#[derive(Error, Debug)]
pub enum ShrMapError {
    #[error("Invalid profile '{profile}': {message}")]
    InvalidProfile { profile: String, message: String },

    #[error("Unknown resource type '{resource_type}' in profile '{profile}'")]
    UnknownResourceType {
        profile: String,
        resource_type: String,
    },

    #[error("Element not found: {identifier}")]
    ElementNotFound { identifier: String },

    #[error("Parsing error: {message}")]
    Parsing { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Concurrency error: {message}")]
    Concurrency { message: String },

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),
}

impl ShrMapError {
    pub fn invalid_profile(profile: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidProfile {
            profile: profile.into(),
            message: message.into(),
        }
    }

    pub fn unknown_resource_type(
        profile: impl Into<String>,
        resource_type: impl Into<String>,
    ) -> Self {
        Self::UnknownResourceType {
            profile: profile.into(),
            resource_type: resource_type.into(),
        }
    }

    pub fn element_not_found(identifier: &Identifier) -> Self {
        Self::ElementNotFound {
            identifier: identifier.fqn(),
        }
    }

    pub fn parsing(message: impl Into<String>) -> Self {
        Self::Parsing {
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Failures raised while a plan is executed against live data.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("No compiled plan registered for {identifier}")]
    MissingPlan { identifier: String },

    #[error("Unbound name '{name}' in plan for {identifier}")]
    UnboundName { name: String, identifier: String },

    #[error("Cannot write '{segment}' into a non-object value at {path}")]
    ShapeMismatch { path: String, segment: String },

    #[error("Recursion limit of {limit} exceeded while converting {identifier}")]
    RecursionLimit { limit: usize, identifier: String },
}

pub type Result<T> = std::result::Result<T, ShrMapError>;

//! # OctoFHIR SHR mapping compiler
//!
//! Compiles the field-mapping annotations of an SHR object model against FHIR profiles into
//! bidirectional transformation plans, and executes those plans.
//!
//! ## Features
//!
//! - **Plan compilation**: slicing, choice-type expansion, extensions and container promotion
//!   resolved once per (element, profile) pair into a serializable operation tree
//! - **Diagnostics**: unresolved mappings and discriminators are reported, never fatal
//! - **Parallel compilation**: whole namespaces compiled on worker threads with a plan cache
//! - **Runtime**: an interpreter that runs plans against instances and FHIR JSON documents
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use octofhir_shrmap::*;
//!
//! # fn example() -> Result<()> {
//! let bundle = SpecificationBundle::from_file("spec.json")?;
//! let compiler = bundle.into_compiler(CompilerConfig::default())?;
//! let report = compiler.compile_all();
//!
//! let interpreter = PlanInterpreter::from_report(&report);
//! let instance = Instance::new(Identifier::new("shr.vital", "BloodPressure"));
//! let document = interpreter.to_fhir(&instance)?;
//! # Ok(())
//! # }
//! ```

pub mod compiler;
pub mod core;
pub mod diagnostics;
pub mod error;
pub mod model;
pub mod plan;
pub mod profile;
pub mod runtime;
pub mod types;
pub mod utils;

pub use compiler::*;
pub use crate::core::*;
pub use diagnostics::*;
pub use error::Result;
pub use error::{ExecutionError, ShrMapError};
pub use model::*;
pub use plan::*;
pub use profile::*;
pub use runtime::*;
pub use types::*;
pub use utils::*;

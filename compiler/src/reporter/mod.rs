use miette::Diagnostic;
use thiserror::Error;

use crate::Stack;

pub mod diff;
pub mod dot;
pub mod ir;

pub use diff::DiffReporter;
pub use dot::DotReporter;
pub use ir::StackIrReporter;

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum ReporterError {
    #[error("reporter error: {0}")]
    #[diagnostic(code(reporter::error))]
    Other(String),
}

pub trait Reporter {
    type Artifact;

    fn emit(&self, stack: &Stack) -> Result<Self::Artifact, ReporterError>;
}

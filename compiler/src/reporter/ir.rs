use super::{Reporter, ReporterError};
use crate::Stack;

#[derive(Clone, Copy, Debug, Default)]
pub struct StackIrReporter;

impl Reporter for StackIrReporter {
    type Artifact = String;

    fn emit(&self, stack: &Stack) -> Result<Self::Artifact, ReporterError> {
        render_stack_ir(stack)
    }
}

/// Render a stack as its stable JSON IR, newline terminated.
pub fn render_stack_ir(stack: &Stack) -> Result<String, ReporterError> {
    let mut out = serde_json::to_string_pretty(&stack.to_ir())
        .map_err(|e| ReporterError::Other(format!("failed to render stack IR: {e}")))?;
    out.push('\n');
    Ok(out)
}

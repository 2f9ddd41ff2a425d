use crate::{dis::DisError, memref::MemRef, modules::MapError};
use std::io::{self, Write};

#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    #[error("{0}")]
    Map(#[from] MapError),
    #[error("{0}")]
    Dis(#[from] DisError),
    #[error("failed to write results: {0}")]
    Output(#[from] io::Error),
    #[error("{0}")]
    Other(String),
}

/// One kind of analysis over a trace.
///
/// The analyzer calls `initialize` once, `process_memref` for every event in
/// trace order, then `print_results` once. Any error ends the whole run.
pub trait AnalysisTool {
    fn name(&self) -> &str;

    /// False when the tool could not even be constructed, `error_string`
    /// then says why
    fn is_live(&self) -> bool {
        true
    }

    fn initialize(&mut self) -> Result<(), ToolError>;

    fn process_memref(&mut self, memref: &MemRef) -> Result<(), ToolError>;

    fn print_results(&mut self, out: &mut dyn Write) -> Result<(), ToolError>;

    /// Last error, empty if there was none
    fn error_string(&self) -> &str;
}

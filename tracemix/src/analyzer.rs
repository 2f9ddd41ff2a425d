//! Drives one pass over a trace, handing every event to every tool.
//!
//! Any failure is final: the first error is latched and every later call
//! gives it back without doing more work. A half processed trace gives
//! misleading numbers, so there is no "keep going".

use crate::{
    reader::{self, Events, ReadError, TraceFormat, TraceSource},
    tool::{AnalysisTool, ToolError},
};
use std::{
    io::{self, Write},
    path::Path,
};
use tracing::{debug, info};

/// Printed between the results of two tools
pub const DIVIDER: &str =
    "===========================================================================";

#[derive(thiserror::Error, Debug)]
pub enum AnalyzerError {
    #[error("Tool is not successfully initialized: {0}")]
    NotLive(String),
    #[error("Tool failed to initialize: {0}")]
    Init(String),
    #[error("{0}")]
    Read(#[from] ReadError),
    /// A tool refused an event, holds the tool's own message
    #[error("{0}")]
    Process(String),
    #[error("{0}")]
    Report(String),
    #[error("failed to write results: {0}")]
    Output(#[from] io::Error),
    /// Returned by every call after the first failure
    #[error("{0}")]
    Latched(String),
}

/// What a tool has to say about its failure, never empty
fn describe(tool: &dyn AnalysisTool, err: &ToolError) -> String {
    let own = tool.error_string();
    let msg = if own.is_empty() {
        err.to_string()
    } else {
        own.to_string()
    };

    if msg.is_empty() {
        format!("{} failed", tool.name())
    } else {
        msg
    }
}

pub struct Analyzer<'t> {
    success: bool,
    error_string: String,
    trace: Option<Box<dyn TraceSource>>,
    /// Owned by the caller, we only call into them
    tools: &'t mut [Box<dyn AnalysisTool>],
}

impl<'t> Analyzer<'t> {
    /// Initializes every tool in order and sets up the trace reader.
    ///
    /// Never fails outright, check [`Analyzer::is_live`] and
    /// [`Analyzer::error_string`] afterwards.
    pub fn new<P: AsRef<Path>>(
        trace_path: P,
        format: TraceFormat,
        tools: &'t mut [Box<dyn AnalysisTool>],
    ) -> Self {
        let mut analyzer = Self {
            success: true,
            error_string: String::new(),
            trace: None,
            tools,
        };

        if let Err(e) = analyzer.setup(trace_path.as_ref(), format) {
            analyzer.latch(e);
        }

        analyzer
    }

    /// Just the reader, for walking the trace with [`Analyzer::begin`]
    pub fn without_tools<P: AsRef<Path>>(trace_path: P, format: TraceFormat) -> Self {
        Self::new(trace_path, format, Default::default())
    }

    fn setup(&mut self, trace_path: &Path, format: TraceFormat) -> Result<(), AnalyzerError> {
        // no point starting any tool without a trace name
        if trace_path.as_os_str().is_empty() {
            return Err(ReadError::EmptyName.into());
        }

        info!("Initializing {} tools", self.tools.len());

        for tool in self.tools.iter_mut() {
            if !tool.is_live() {
                let reason = match tool.error_string() {
                    "" => tool.name().to_string(),
                    e => e.to_string(),
                };
                return Err(AnalyzerError::NotLive(reason));
            }

            debug!("initializing {}", tool.name());
            if let Err(e) = tool.initialize() {
                return Err(AnalyzerError::Init(describe(&**tool, &e)));
            }
        }

        self.trace = Some(reader::create(trace_path, format)?);

        Ok(())
    }

    /// Keeps the first error only
    fn latch(&mut self, err: AnalyzerError) -> AnalyzerError {
        if self.success {
            self.success = false;
            self.error_string = err.to_string();
            debug!("analysis failed: {}", self.error_string);
        }
        err
    }

    fn check(&self) -> Result<(), AnalyzerError> {
        if self.success {
            Ok(())
        } else {
            Err(AnalyzerError::Latched(self.error_string.clone()))
        }
    }

    pub fn is_live(&self) -> bool {
        self.success
    }

    pub fn error_string(&self) -> &str {
        &self.error_string
    }

    fn start_reading(&mut self) -> Result<&mut (dyn TraceSource + 'static), AnalyzerError> {
        self.check()?;

        let res = match self.trace.as_mut() {
            Some(trace) => trace.init(),
            None => Err(ReadError::EmptyName),
        };
        if let Err(e) = res {
            return Err(self.latch(e.into()));
        }

        match self.trace.as_deref_mut() {
            Some(trace) => Ok(trace),
            None => Err(AnalyzerError::Latched(self.error_string.clone())),
        }
    }

    /// Feeds the whole trace through every tool.
    ///
    /// Every tool sees an event before the next one is read, always in the
    /// order they were given. The first tool to fail stops everything: the
    /// tools after it don't see that event and nobody sees the rest.
    pub fn run(&mut self) -> Result<(), AnalyzerError> {
        self.start_reading()?;

        let Self { trace, tools, .. } = &mut *self;
        let trace = match trace.as_deref_mut() {
            Some(trace) => trace,
            None => return Ok(()),
        };

        let mut processed = 0u64;
        let outcome = 'trace: loop {
            let memref = match trace.current() {
                Some(memref) => memref,
                None => break Ok(()),
            };

            for tool in tools.iter_mut() {
                if let Err(e) = tool.process_memref(memref) {
                    debug!("{} failed on event {}", tool.name(), processed);
                    break 'trace Err(AnalyzerError::Process(describe(&**tool, &e)));
                }
            }

            if let Err(e) = trace.advance() {
                break Err(e.into());
            }
            processed += 1;
        };

        info!("Processed {} events", processed);

        outcome.map_err(|e| self.latch(e))
    }

    /// Results of every tool on stderr
    pub fn print_stats(&mut self) -> Result<(), AnalyzerError> {
        self.print_stats_to(&mut io::stderr().lock())
    }

    /// Asks each tool for its results in order. Stops at the first tool that
    /// fails, the ones after it don't get to report.
    pub fn print_stats_to(&mut self, out: &mut dyn Write) -> Result<(), AnalyzerError> {
        self.check()?;

        let count = self.tools.len();
        for i in 0..count {
            let tool = &mut self.tools[i];

            if let Err(e) = tool.print_results(out) {
                let msg = describe(&**tool, &e);
                return Err(self.latch(AnalyzerError::Report(msg)));
            }

            if i + 1 < count {
                if let Err(e) = writeln!(out, "\n{}", DIVIDER) {
                    return Err(self.latch(e.into()));
                }
            }
        }

        Ok(())
    }

    /// Starts reading and hands out the events for the caller to walk.
    ///
    /// Same order as [`Analyzer::run`], but tools are not involved and read
    /// errors come out of the iterator instead of being latched here.
    pub fn begin(&mut self) -> Result<Events<'_, dyn TraceSource + 'static>, AnalyzerError> {
        let trace = self.start_reading()?;
        Ok(Events::new(trace))
    }
}

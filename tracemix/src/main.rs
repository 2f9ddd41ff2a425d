use anyhow::{bail, Context};
use std::{path::PathBuf, process::exit};
use tracemix::{
    analyzer::Analyzer,
    arch::Arch,
    modules::ModuleMap,
    reader::TraceFormat,
    tool::AnalysisTool,
    tools::{BasicCounts, OpcodeMix},
};
use tracing::debug;
use tracing_subscriber::{filter::LevelFilter, prelude::*, EnvFilter};

#[derive(argh::FromArgs)]
/// analyze a memory trace
struct Arguments {
    /// the trace to read
    #[argh(positional)]
    trace: PathBuf,

    #[argh(option, short = 't')]
    /// tool to run: opcode_mix, basic_counts (can be repeated)
    tool: Vec<ToolKind>,

    #[argh(option, short = 'm')]
    /// module list for looking up instruction bytes
    modules: Option<PathBuf>,

    #[argh(option, short = 'a', default = "Arch::X86_64")]
    /// architecture of the traced program: arm64, x64, ...
    arch: Arch,

    #[argh(option, short = 'f', default = "TraceFormat::Auto")]
    /// trace format: auto, plain, gzip
    format: TraceFormat,

    #[argh(option, short = 'v', default = "1")]
    /// how much the tools print, 0 for just a summary
    verbose: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ToolKind {
    OpcodeMix,
    BasicCounts,
}

impl argh::FromArgValue for ToolKind {
    fn from_arg_value(value: &str) -> Result<Self, String> {
        match value {
            "opcode_mix" | "mix" => Ok(ToolKind::OpcodeMix),
            "basic_counts" | "counts" => Ok(ToolKind::BasicCounts),
            _ => Err(format!("Unknown tool: {}", value)),
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() {
    init_logging();

    if let Err(e) = run(argh::from_env()) {
        eprintln!("ERROR: {:#}", e);
        exit(1);
    }
}

fn run(args: Arguments) -> anyhow::Result<()> {
    let Arguments {
        trace,
        tool,
        modules,
        arch,
        format,
        verbose,
    } = args;

    let kinds = match (tool.is_empty(), &modules) {
        (false, _) => tool,
        (true, Some(_)) => vec![ToolKind::OpcodeMix],
        (true, None) => vec![ToolKind::BasicCounts],
    };
    debug!("running {:?} on {} code", kinds, arch.architecture_str());

    let mut tools = Vec::with_capacity(kinds.len());
    for kind in kinds {
        let tool: Box<dyn AnalysisTool> = match kind {
            ToolKind::OpcodeMix => {
                let Some(modules) = &modules else {
                    bail!("Usage error: the opcode mix tool needs a module list (-m)");
                };
                Box::new(OpcodeMix::<ModuleMap>::new(modules, arch, verbose))
            }
            ToolKind::BasicCounts => Box::new(BasicCounts::new()),
        };
        tools.push(tool);
    }

    let mut analyzer = Analyzer::new(&trace, format, &mut tools);
    if !analyzer.is_live() {
        bail!("failed to initialize analyzer: {}", analyzer.error_string());
    }

    analyzer.run().context("failed to run analyzer")?;
    analyzer.print_stats().context("failed to print results")?;

    Ok(())
}

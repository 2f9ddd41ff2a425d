//! Counts how often each opcode gets executed.
//!
//! Decoding is the expensive part and the same few addresses come around
//! again and again (loops, hot functions), so every address is decoded once
//! and the opcode is remembered for the rest of the run. The cache is never
//! trimmed: its size is bounded by how many distinct pcs the trace touches.

use crate::{
    arch::Arch,
    dis::{Dis, Opcode},
    memref::MemRef,
    modules::{ModuleMap, ModuleMapper},
    tool::{AnalysisTool, ToolError},
};
use itertools::Itertools;
use std::{collections::HashMap, io::Write, path::PathBuf};
use tracing::{debug, info, trace};

const TOOL_NAME: &str = "Opcode mix tool";

/// From this verbosity on the full table is printed
pub const REPORT_VERBOSITY: u32 = 1;

pub struct OpcodeMix<M: ModuleMapper = ModuleMap> {
    module_file: PathBuf,
    /// Outlives every cached decode, the bytes they came from live in here
    mapper: Option<M>,
    dis: Option<Dis>,
    verbose: u32,

    instr_count: u64,
    opcode_counts: HashMap<Opcode, u64>,
    opcode_cache: HashMap<u64, Opcode>,

    error: String,
}

impl<M: ModuleMapper> OpcodeMix<M> {
    /// The mapper is opened from `module_file` in `initialize`
    pub fn new(module_file: impl Into<PathBuf>, arch: Arch, verbose: u32) -> Self {
        Self::build(module_file.into(), None, arch, verbose)
    }

    /// Uses an already built mapper, `initialize` won't touch the filesystem
    pub fn with_mapper(mapper: M, arch: Arch, verbose: u32) -> Self {
        Self::build(PathBuf::new(), Some(mapper), arch, verbose)
    }

    fn build(module_file: PathBuf, mapper: Option<M>, arch: Arch, verbose: u32) -> Self {
        let (dis, error) = match Dis::new(arch) {
            Ok(dis) => (Some(dis), String::new()),
            Err(e) => (None, format!("failed to set up disassembler: {}", e)),
        };

        Self {
            module_file,
            mapper,
            dis,
            verbose,
            instr_count: 0,
            opcode_counts: HashMap::new(),
            opcode_cache: HashMap::new(),
            error,
        }
    }

    pub fn mapper(&self) -> Option<&M> {
        self.mapper.as_ref()
    }

    pub fn instr_count(&self) -> u64 {
        self.instr_count
    }

    pub fn opcode_counts(&self) -> &HashMap<Opcode, u64> {
        &self.opcode_counts
    }

    pub fn cached(&self, pc: u64) -> Option<Opcode> {
        self.opcode_cache.get(&pc).copied()
    }

    /// Most executed first, equal counts by opcode
    pub fn sorted_counts(&self) -> Vec<(Opcode, u64)> {
        self.opcode_counts
            .iter()
            .map(|(op, count)| (*op, *count))
            .sorted_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)))
            .collect()
    }

    pub fn opcode_name(&self, opcode: Opcode) -> String {
        match &self.dis {
            Some(dis) => dis.opcode_name(opcode),
            None => format!("<opcode {}>", opcode),
        }
    }

    fn fail(&mut self, err: ToolError) -> ToolError {
        self.error = err.to_string();
        err
    }

    fn decode(&self, pc: u64) -> Result<Opcode, ToolError> {
        let (mapper, dis) = match (&self.mapper, &self.dis) {
            (Some(mapper), Some(dis)) => (mapper, dis),
            _ => return Err(ToolError::Other(format!("{} is not initialized", TOOL_NAME))),
        };

        let bytes = mapper.find_bytes(pc)?;
        let opcode = dis.decode_opcode(bytes, pc)?;

        trace!("{:#x}: {} (miss)", pc, dis.opcode_name(opcode));

        Ok(opcode)
    }
}

impl<M: ModuleMapper> AnalysisTool for OpcodeMix<M> {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn is_live(&self) -> bool {
        self.dis.is_some()
    }

    fn initialize(&mut self) -> Result<(), ToolError> {
        if self.mapper.is_some() {
            return Ok(());
        }

        info!("Opening module list {}", self.module_file.display());

        match M::open(&self.module_file) {
            Ok(mapper) => {
                self.mapper = Some(mapper);
                Ok(())
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    fn process_memref(&mut self, memref: &MemRef) -> Result<(), ToolError> {
        if !memref.kind.is_instr() {
            return Ok(());
        }

        let pc = memref.addr;
        let opcode = match self.opcode_cache.get(&pc).copied() {
            Some(opcode) => opcode,
            None => {
                let opcode = self.decode(pc).map_err(|e| self.fail(e))?;
                self.opcode_cache.insert(pc, opcode);
                opcode
            }
        };

        *self.opcode_counts.entry(opcode).or_insert(0) += 1;
        self.instr_count += 1;

        Ok(())
    }

    fn print_results(&mut self, out: &mut dyn Write) -> Result<(), ToolError> {
        debug!(
            "{} distinct pcs decoded for {} instructions",
            self.opcode_cache.len(),
            self.instr_count
        );

        if self.verbose < REPORT_VERBOSITY {
            writeln!(
                out,
                "{}: {} instructions, {} distinct opcodes",
                TOOL_NAME,
                self.instr_count,
                self.opcode_counts.len()
            )?;
            return Ok(());
        }

        writeln!(out, "{} results:", TOOL_NAME)?;
        writeln!(out, "{:>15} : total executed instructions", self.instr_count)?;

        for (opcode, count) in self.sorted_counts() {
            let percent = count as f64 * 100.0 / self.instr_count as f64;
            writeln!(
                out,
                "{:>15} : {:<12} {:>6.2}%",
                count,
                self.opcode_name(opcode),
                percent
            )?;
        }

        Ok(())
    }

    fn error_string(&self) -> &str {
        &self.error
    }
}

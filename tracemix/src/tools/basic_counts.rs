use crate::{
    memref::{MemRef, RefKind},
    tool::{AnalysisTool, ToolError},
};
use std::{collections::HashSet, io::Write};

const TOOL_NAME: &str = "Basic counts tool";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Counts {
    pub instrs: u64,
    pub prefetches: u64,
    pub loads: u64,
    pub stores: u64,
    pub flushes: u64,
    pub markers: u64,
    pub thread_exits: u64,
}

/// Totals per kind of event, plus how many threads showed up
#[derive(Default)]
pub struct BasicCounts {
    counts: Counts,
    threads: HashSet<u64>,
}

impl BasicCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counts(&self) -> Counts {
        self.counts
    }

    pub fn threads(&self) -> usize {
        self.threads.len()
    }
}

impl AnalysisTool for BasicCounts {
    fn name(&self) -> &str {
        TOOL_NAME
    }

    fn initialize(&mut self) -> Result<(), ToolError> {
        Ok(())
    }

    fn process_memref(&mut self, memref: &MemRef) -> Result<(), ToolError> {
        self.threads.insert(memref.tid);

        let c = &mut self.counts;
        match memref.kind {
            RefKind::Instr
            | RefKind::InstrDirectJump
            | RefKind::InstrIndirectJump
            | RefKind::InstrConditionalJump
            | RefKind::InstrDirectCall
            | RefKind::InstrIndirectCall
            | RefKind::InstrReturn => c.instrs += 1,
            RefKind::InstrFlush | RefKind::DataFlush => c.flushes += 1,
            RefKind::Read => c.loads += 1,
            RefKind::Write => c.stores += 1,
            RefKind::Prefetch => c.prefetches += 1,
            RefKind::Marker => c.markers += 1,
            RefKind::ThreadExit => c.thread_exits += 1,
        }

        Ok(())
    }

    fn print_results(&mut self, out: &mut dyn Write) -> Result<(), ToolError> {
        let c = &self.counts;

        writeln!(out, "{} results:", TOOL_NAME)?;
        for (count, what) in [
            (c.instrs, "total (fetched) instructions"),
            (c.prefetches, "total prefetches"),
            (c.loads, "total data loads"),
            (c.stores, "total data stores"),
            (c.flushes, "total flushes"),
            (c.markers, "total markers"),
            (self.threads.len() as u64, "total threads"),
            (c.thread_exits, "total thread exits"),
        ] {
            writeln!(out, "{:>12} {}", count, what)?;
        }

        Ok(())
    }

    fn error_string(&self) -> &str {
        ""
    }
}

#[cfg(test)]
mod tests {
    use super::{BasicCounts, Counts};
    use crate::{
        memref::{MemRef, RefKind},
        tool::AnalysisTool,
    };

    #[test]
    fn counts() {
        let mut tool = BasicCounts::new();
        tool.initialize().unwrap();

        let mut call = MemRef::instr(2, 0x1004, 5);
        call.kind = RefKind::InstrDirectCall;
        let mut exit = MemRef::marker(2, 0);
        exit.kind = RefKind::ThreadExit;
        let flush = MemRef::data(RefKind::DataFlush, 1, 0x1000, 0x8000, 64);

        for m in [
            MemRef::instr(1, 0x1000, 4),
            MemRef::data(RefKind::Read, 1, 0x1000, 0x8000, 8),
            MemRef::data(RefKind::Write, 1, 0x1000, 0x8008, 8),
            MemRef::data(RefKind::Prefetch, 1, 0x1000, 0x9000, 64),
            flush,
            call,
            MemRef::marker(2, 7),
            exit,
        ] {
            tool.process_memref(&m).unwrap();
        }

        assert_eq!(
            tool.counts(),
            Counts {
                instrs: 2,
                prefetches: 1,
                loads: 1,
                stores: 1,
                flushes: 1,
                markers: 1,
                thread_exits: 1,
            }
        );
        assert_eq!(tool.threads(), 2);
    }

    #[test]
    fn every_kind_lands_somewhere() {
        let mut tool = BasicCounts::new();

        let kinds: Vec<_> = (0u16..).map_while(RefKind::from_repr).collect();
        for kind in &kinds {
            let mut m = MemRef::marker(1, 0);
            m.kind = *kind;
            tool.process_memref(&m).unwrap();
        }

        let c = tool.counts();
        let total = c.instrs
            + c.prefetches
            + c.loads
            + c.stores
            + c.flushes
            + c.markers
            + c.thread_exits;
        assert_eq!(total, kinds.len() as u64);
        assert_eq!(c.instrs, kinds.iter().filter(|k| k.is_instr()).count() as u64);
        assert_eq!(c.flushes, kinds.iter().filter(|k| k.is_flush()).count() as u64);
    }

    #[test]
    fn empty_report() {
        let mut tool = BasicCounts::new();

        let mut out: Vec<u8> = Vec::new();
        tool.print_results(&mut out).unwrap();
        let out = String::from_utf8(out).unwrap();

        assert!(out.starts_with("Basic counts tool results:\n"));
        assert!(out.contains("           0 total (fetched) instructions\n"));
        assert!(out.contains("           0 total threads\n"));
        assert_eq!(out.lines().count(), 9);
    }
}

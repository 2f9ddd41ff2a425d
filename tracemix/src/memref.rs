//! A single trace event and its fixed on-disk record.

use std::io::{self, Write};
use strum::{Display, FromRepr};

/// Size of one encoded record
pub const RECORD_SIZE: usize = 32;

#[repr(u16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, FromRepr)]
#[strum(serialize_all = "snake_case")]
pub enum RefKind {
    Read = 0,
    Write = 1,
    Prefetch = 2,
    Instr = 3,
    InstrDirectJump = 4,
    InstrIndirectJump = 5,
    InstrConditionalJump = 6,
    InstrDirectCall = 7,
    InstrIndirectCall = 8,
    InstrReturn = 9,
    InstrFlush = 10,
    DataFlush = 11,
    ThreadExit = 12,
    Marker = 13,
}

impl RefKind {
    /// Instruction fetches, including every branch flavour
    pub fn is_instr(self) -> bool {
        matches!(
            self,
            RefKind::Instr
                | RefKind::InstrDirectJump
                | RefKind::InstrIndirectJump
                | RefKind::InstrConditionalJump
                | RefKind::InstrDirectCall
                | RefKind::InstrIndirectCall
                | RefKind::InstrReturn
        )
    }

    pub fn is_flush(self) -> bool {
        matches!(self, RefKind::InstrFlush | RefKind::DataFlush)
    }
}

/// One recorded event.
///
/// For instruction fetches `addr` is the fetched pc, for data references
/// `pc` is the instruction that issued the access and for markers `addr`
/// holds the marker value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemRef {
    pub kind: RefKind,
    pub size: u16,
    pub pid: u32,
    pub tid: u64,
    pub addr: u64,
    pub pc: u64,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("unknown record type {0:#x}")]
pub struct UnknownKind(pub u16);

impl MemRef {
    pub fn instr(tid: u64, pc: u64, size: u16) -> Self {
        Self {
            kind: RefKind::Instr,
            size,
            pid: 0,
            tid,
            addr: pc,
            pc,
        }
    }

    pub fn data(kind: RefKind, tid: u64, pc: u64, addr: u64, size: u16) -> Self {
        Self {
            kind,
            size,
            pid: 0,
            tid,
            addr,
            pc,
        }
    }

    pub fn marker(tid: u64, value: u64) -> Self {
        Self {
            kind: RefKind::Marker,
            size: 0,
            pid: 0,
            tid,
            addr: value,
            pc: 0,
        }
    }

    pub fn decode(raw: &[u8; RECORD_SIZE]) -> Result<Self, UnknownKind> {
        let u16_at = |i: usize| u16::from_le_bytes([raw[i], raw[i + 1]]);
        let u32_at = |i: usize| {
            let mut buf = [0; 4];
            buf.copy_from_slice(&raw[i..i + 4]);
            u32::from_le_bytes(buf)
        };
        let u64_at = |i: usize| {
            let mut buf = [0; 8];
            buf.copy_from_slice(&raw[i..i + 8]);
            u64::from_le_bytes(buf)
        };

        let kind = u16_at(0);
        let kind = RefKind::from_repr(kind).ok_or(UnknownKind(kind))?;

        Ok(Self {
            kind,
            size: u16_at(2),
            pid: u32_at(4),
            tid: u64_at(8),
            addr: u64_at(16),
            pc: u64_at(24),
        })
    }

    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut raw = [0; RECORD_SIZE];
        raw[0..2].copy_from_slice(&(self.kind as u16).to_le_bytes());
        raw[2..4].copy_from_slice(&self.size.to_le_bytes());
        raw[4..8].copy_from_slice(&self.pid.to_le_bytes());
        raw[8..16].copy_from_slice(&self.tid.to_le_bytes());
        raw[16..24].copy_from_slice(&self.addr.to_le_bytes());
        raw[24..32].copy_from_slice(&self.pc.to_le_bytes());
        raw
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_all(&self.encode())
    }
}

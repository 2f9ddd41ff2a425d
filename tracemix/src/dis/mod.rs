//! Thin wrapper over capstone: decode one instruction, get its opcode.
//!
//! The opcode is capstone's instruction id, so it's only meaningful together
//! with the [`Arch`] the [`Dis`] was built for.

use crate::arch::Arch;
use capstone::InsnId;
use std::rc::Rc;
use thiserror::Error;

/// Capstone instruction id
pub type Opcode = u32;

pub struct Dis {
    pub arch: Arch,
    pub cs: Rc<capstone::Capstone>,
}

#[derive(Error, Debug)]
pub enum DisError {
    // capstone's error has no std::error::Error impl, so no #[from]
    #[error("capstone: {0}")]
    Capstone(capstone::Error),
    #[error("no valid instruction at {pc:#x} (bytes {bytes})")]
    NoInstruction { pc: u64, bytes: String },
}

impl From<capstone::Error> for DisError {
    fn from(e: capstone::Error) -> Self {
        DisError::Capstone(e)
    }
}

impl Dis {
    pub fn new(arch: Arch) -> Result<Self, DisError> {
        let cs = Rc::new(arch.make_capstone()?);
        Ok(Self { arch, cs })
    }

    /// Decodes exactly one instruction from the front of `code`
    pub fn decode_opcode(&self, code: &[u8], pc: u64) -> Result<Opcode, DisError> {
        let instructions = self.cs.disasm_count(code, pc, 1)?;

        let insn = instructions
            .iter()
            .next()
            .ok_or_else(|| DisError::NoInstruction {
                pc,
                // longest x86 insn is 15 bytes, enough to look at
                bytes: hex::encode(&code[..code.len().min(15)]),
            })?;

        Ok(insn.id().0)
    }

    pub fn opcode_name(&self, opcode: Opcode) -> String {
        self.cs
            .insn_name(InsnId(opcode))
            .unwrap_or_else(|| format!("<{} opcode {}>", self.arch.architecture_str(), opcode))
    }
}

use capstone::{prelude::BuildsCapstone, Capstone};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Arch {
    ARM64,
    X86_64,
}

impl argh::FromArgValue for Arch {
    fn from_arg_value(value: &str) -> Result<Self, String> {
        match value {
            "arm64" | "arm" | "aarch64" => Ok(Arch::ARM64),
            "x86_64" | "amd64" | "amd" | "x64" => Ok(Arch::X86_64),
            _ => Err(format!("Unknown arch: {}", value)),
        }
    }
}

impl Arch {
    /// Only the instruction id is needed to count opcodes, so no detail
    pub fn make_capstone(&self) -> Result<Capstone, capstone::Error> {
        let cs = Capstone::new();

        match self {
            Arch::ARM64 => cs
                .arm64()
                .mode(capstone::arch::arm64::ArchMode::Arm)
                .detail(false)
                .build(),
            Arch::X86_64 => cs
                .x86()
                .mode(capstone::arch::x86::ArchMode::Mode64)
                .detail(false)
                .build(),
        }
    }

    pub fn architecture_str(&self) -> &'static str {
        match self {
            Arch::ARM64 => "arm64",
            Arch::X86_64 => "x86_64",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Arch;
    use argh::FromArgValue;

    #[test]
    fn aliases() {
        assert_eq!(Arch::from_arg_value("aarch64"), Ok(Arch::ARM64));
        assert_eq!(Arch::from_arg_value("amd64"), Ok(Arch::X86_64));
        assert!(Arch::from_arg_value("mips").is_err());
    }
}

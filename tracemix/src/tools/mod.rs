pub mod basic_counts;
pub mod opcode_mix;

pub use basic_counts::BasicCounts;
pub use opcode_mix::OpcodeMix;

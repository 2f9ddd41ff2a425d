pub mod analyzer;
pub mod arch;
pub mod dis;
pub mod memref;
pub mod modules;
pub mod reader;
pub mod tool;
pub mod tools;

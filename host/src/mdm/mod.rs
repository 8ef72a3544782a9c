//! Merkleized Deterministic Machine: the metered instruction
//! interpreter renters use to read/write sectors and registry entries
//! against a contract, with streaming program input.

pub mod datastream;
pub mod instruction;
pub mod program;

pub use datastream::ProgramDataStream;
pub use instruction::Instruction;
pub use program::{ObligationSnapshot, Program, ProgramOutcome, SignedRevision};

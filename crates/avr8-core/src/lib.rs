//! Instruction-accurate emulator core for the AVR8 microcontroller family.
//!
//! The crate couples a complete bit-pattern decoder/disassembler for the
//! AVR8 encoding (mixed 16/32-bit opcodes) with a single-step execution
//! engine: 32 general registers, the SREG status flags, a 16- or 22-bit
//! program counter, stack and extension pointers, canonical per-instruction
//! cycle accounting, and sleep handling. Memory is pluggable through the
//! [`MemorySpace`] trait; loaders, peripherals, and host surfaces live
//! outside this crate. Exceptional conditions (inaccessible memory, unknown
//! opcodes, debugger break) surface as typed [`Fault`] values.

/// Bit-field extraction shared by the decoder and the execution engine.
pub mod encoding;
pub use encoding::{is_long_opcode, IO_SPACE_BASE};

/// Fault taxonomy for everything that can interrupt a step.
pub mod fault;
pub use fault::{Fault, RefusedOp};

/// Opcode classification into typed instructions.
pub mod decoder;
pub use decoder::{decode, Index, Instr, PtrMode};

/// The memory contract and a reference backend.
pub mod memory;
pub use memory::{MemorySpace, VecMemory};

/// Architectural CPU state and construction parameters.
pub mod state;
pub use state::{Cpu, CpuConfig, Flag, PcWidth, UnknownOpcodePolicy, GENERAL_REGISTER_COUNT};

/// The fetch-decode-execute engine (implemented on [`Cpu`]).
pub mod execute;

/// Textual disassembly.
pub mod disasm;
pub use disasm::{Disassembler, UNKNOWN_MARKER};

/// Per-step trace records.
pub mod trace;
pub use trace::{TraceSink, WriteSink};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;

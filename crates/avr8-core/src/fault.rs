use thiserror::Error;

/// Opcodes the core deliberately refuses to execute: their semantics
/// belong to the host (self-programming, hardware crypto).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum RefusedOp {
    /// Store-program-memory, implied and `Z+` forms.
    Spm,
    /// The hardware DES round helper.
    Des,
}

impl RefusedOp {
    /// The assembly mnemonic, for diagnostics.
    #[must_use]
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Self::Spm => "SPM",
            Self::Des => "DES",
        }
    }
}

/// Exceptional conditions surfaced by the CPU core.
///
/// Every variant carries the context a debugger front-end needs to report
/// the condition without re-deriving it from CPU state. Faults propagate
/// out of [`Cpu::step`](crate::Cpu::step) unrecovered; the host decides
/// whether to abort, resume, or translate a break into a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum Fault {
    /// The memory backend reported a read target as inaccessible.
    ///
    /// Program-memory word addresses and data-memory byte addresses share
    /// this variant; the former can exceed 16 bits on large-flash parts.
    #[error("memory unreadable at {addr:#07X}")]
    AddressUnreadable {
        /// The offending address.
        addr: u32,
    },
    /// The memory backend refused a data-memory write.
    #[error("memory unwritable at {addr:#06X} (value {value:#04X})")]
    AddressUnwritable {
        /// The offending byte address in data space.
        addr: u16,
        /// The value the core attempted to store.
        value: u8,
    },
    /// The decoder could not classify an opcode word and the CPU policy is
    /// [`UnknownOpcodePolicy::Fault`](crate::UnknownOpcodePolicy::Fault).
    #[error("unknown opcode {opcode:#06X} at {pc:#07X}")]
    UnknownOpcode {
        /// Word address of the unrecognized opcode.
        pc: u32,
        /// The raw opcode word.
        opcode: u16,
    },
    /// An instruction requiring a 22-bit program counter (`EIJMP`,
    /// `EICALL`, the `ELPM` forms) executed on a 16-bit-PC CPU.
    #[error("operation requires a 22-bit program counter")]
    InvalidOperation,
    /// Self-programming (`SPM`) and `DES` are host concerns; the core
    /// refuses them rather than silently misexecuting.
    #[error("instruction {} is not implemented by the core", .0.mnemonic())]
    NotImplemented(RefusedOp),
    /// A `BREAK` instruction was executed. Not an error: the CPU state is
    /// intact and `pc` is the word address of the `BREAK` itself, so an
    /// attached debugger can inspect and resume.
    #[error("break at {pc:#07X}")]
    BreakInterrupt {
        /// Word address of the `BREAK` opcode.
        pc: u32,
    },
}

impl Fault {
    /// True for the debugger-break condition, which callers usually route
    /// to a breakpoint handler instead of an error path.
    #[must_use]
    pub const fn is_debug_break(self) -> bool {
        matches!(self, Self::BreakInterrupt { .. })
    }
}

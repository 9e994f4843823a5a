//! Textual disassembly of AVR8 instructions.
//!
//! Output follows the classic monitor layout: a 5-digit hex word address,
//! the raw opcode word(s), and the mnemonic column. Register pairs print
//! as `R25:R24`, immediates as `#$xx`, data addresses as `$xxxx`, and
//! program-address operands as `->$xxxx` with relative displacements
//! resolved against the address after the fetch. Words the decoder cannot
//! classify render as `*** ?!?` or surface as a typed fault, depending on
//! the configured policy.

use crate::decoder::{decode, Index, Instr, PtrMode};
use crate::encoding::is_long_opcode;
use crate::fault::Fault;
use crate::memory::MemorySpace;
use crate::state::UnknownOpcodePolicy;

const BSET_NAMES: [&str; 8] = ["SEC", "SEZ", "SEN", "SEV", "SES", "SEH", "SET", "SEI"];
const BCLR_NAMES: [&str; 8] = ["CLC", "CLZ", "CLN", "CLV", "CLS", "CLH", "CLT", "CLI"];
const BRBS_NAMES: [&str; 8] = ["BRCS", "BREQ", "BRMI", "BRVS", "BRLT", "BRHS", "BRTS", "BRIE"];
const BRBC_NAMES: [&str; 8] = ["BRCC", "BRNE", "BRPL", "BRVC", "BRGE", "BRHC", "BRTC", "BRID"];

/// Marker emitted for opcode words outside the defined encoding.
pub const UNKNOWN_MARKER: &str = "*** ?!?";

/// Walks program memory and renders one instruction per call.
///
/// The internal position advances by the exact word count of each rendered
/// instruction (one, or two for the long opcodes), which is what lets the
/// sweep methods resynchronize correctly after two-word forms.
pub struct Disassembler<'m, M: MemorySpace> {
    mem: &'m mut M,
    pc: u32,
    policy: UnknownOpcodePolicy,
}

impl<'m, M: MemorySpace> Disassembler<'m, M> {
    /// Creates a disassembler positioned at `pc` that renders unknown
    /// words as [`UNKNOWN_MARKER`].
    pub fn new(mem: &'m mut M, pc: u32) -> Self {
        Self {
            mem,
            pc,
            policy: UnknownOpcodePolicy::Nop,
        }
    }

    /// Replaces the unknown-opcode policy. Under
    /// [`UnknownOpcodePolicy::Fault`] unknown words become
    /// [`Fault::UnknownOpcode`] instead of rendering.
    #[must_use]
    pub fn with_policy(mut self, policy: UnknownOpcodePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The current position, in program-memory words.
    #[must_use]
    pub const fn pc(&self) -> u32 {
        self.pc
    }

    /// Renders the instruction at the current position and advances past it.
    ///
    /// # Errors
    ///
    /// [`Fault::AddressUnreadable`] when the backend refuses a word;
    /// [`Fault::UnknownOpcode`] under the faulting policy.
    pub fn disassemble_next(&mut self) -> Result<String, Fault> {
        let pc = self.pc;
        let word = self.read_word(pc)?;
        let (second, len) = if is_long_opcode(word) {
            (Some(self.read_word(pc.wrapping_add(1))?), 2)
        } else {
            (None, 1)
        };
        self.pc = pc.wrapping_add(len);

        let (instr, _) = decode(word, second.unwrap_or(0));
        if let Instr::Unknown(opcode) = instr {
            match self.policy {
                UnknownOpcodePolicy::Fault | UnknownOpcodePolicy::EmulatePhysical => {
                    return Err(Fault::UnknownOpcode { pc, opcode });
                }
                UnknownOpcodePolicy::Nop => {}
            }
        }
        Ok(format_line(
            pc,
            word,
            second,
            &format_instr(instr, pc.wrapping_add(len)),
        ))
    }

    /// Renders the single instruction at `pc`.
    ///
    /// # Errors
    ///
    /// As [`Self::disassemble_next`].
    pub fn disassemble_instruction_at(&mut self, pc: u32) -> Result<String, Fault> {
        self.pc = pc;
        self.disassemble_next()
    }

    /// Renders `count` consecutive instructions starting at `pc`, one per
    /// line.
    ///
    /// # Errors
    ///
    /// As [`Self::disassemble_next`].
    pub fn disassemble_many_instructions_at(
        &mut self,
        pc: u32,
        count: usize,
    ) -> Result<String, Fault> {
        self.pc = pc;
        let mut out = String::new();
        for _ in 0..count {
            out.push_str(&self.disassemble_next()?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Renders every instruction from `from` through `to` (word addresses,
    /// inclusive). When the final instruction is a long opcode the sweep
    /// consumes one word past `to`.
    ///
    /// # Errors
    ///
    /// As [`Self::disassemble_next`].
    pub fn disassemble_memory(&mut self, from: u32, to: u32) -> Result<String, Fault> {
        self.pc = from;
        let mut out = String::new();
        while self.pc <= to {
            out.push_str(&self.disassemble_next()?);
            out.push('\n');
        }
        Ok(out)
    }

    fn read_word(&mut self, addr: u32) -> Result<u16, Fault> {
        self.mem
            .read_program_word(addr)
            .ok_or(Fault::AddressUnreadable { addr })
    }
}

/// Renders the instruction at `pc` without failing: unreadable words show
/// as `????`. Used by the tracer, which must never abort a step over
/// formatting.
pub(crate) fn render_instruction_lossy<M: MemorySpace>(mem: &mut M, pc: u32) -> String {
    let Some(word) = mem.read_program_word(pc) else {
        return format!("{pc:05X} : ????      : {UNKNOWN_MARKER}");
    };
    if is_long_opcode(word) {
        let Some(second) = mem.read_program_word(pc.wrapping_add(1)) else {
            return format!("{pc:05X} : {word:04X} ???? : {UNKNOWN_MARKER}");
        };
        let (instr, _) = decode(word, second);
        format_line(pc, word, Some(second), &format_instr(instr, pc.wrapping_add(2)))
    } else {
        let (instr, _) = decode(word, 0);
        format_line(pc, word, None, &format_instr(instr, pc.wrapping_add(1)))
    }
}

/// Assembles one output line: address, raw words, mnemonic column.
fn format_line(pc: u32, word: u16, second: Option<u16>, text: &str) -> String {
    match second {
        Some(second) => format!("{pc:05X} : {word:04X} {second:04X} : {text}"),
        None => format!("{pc:05X} : {word:04X}      : {text}"),
    }
}

fn reg(n: u8) -> String {
    format!("R{n}")
}

fn pair(low: u8) -> String {
    format!("R{}:R{}", low + 1, low)
}

/// Branch operand: signed word displacement plus the resolved target.
fn rel_target(k: i32, pc_after: u32) -> String {
    let target = (i64::from(pc_after) + i64::from(k)) as u32 & 0x003F_FFFF;
    format!("{k:+} ->${target:04X}")
}

fn ptr_operand(index: Index, mode: PtrMode) -> String {
    let name = match index {
        Index::X => "X",
        Index::Y => "Y",
        Index::Z => "Z",
    };
    match mode {
        PtrMode::Plain => name.to_string(),
        PtrMode::PostInc => format!("{name}+"),
        PtrMode::PreDec => format!("-{name}"),
        PtrMode::Disp(q) => format!("{name}+{q}"),
    }
}

/// Renders mnemonic and operands. `pc_after` is the word address following
/// the instruction, used to resolve relative displacements.
#[allow(clippy::too_many_lines)]
pub(crate) fn format_instr(instr: Instr, pc_after: u32) -> String {
    match instr {
        Instr::Nop => "NOP".into(),

        // Aliases for the self-operand forms.
        Instr::Add { d, r } if d == r => format!("LSL {}", reg(d)),
        Instr::Adc { d, r } if d == r => format!("ROL {}", reg(d)),
        Instr::And { d, r } if d == r => format!("TST {}", reg(d)),
        Instr::Eor { d, r } if d == r => format!("CLR {}", reg(d)),

        Instr::Add { d, r } => format!("ADD {}, {}", reg(d), reg(r)),
        Instr::Adc { d, r } => format!("ADC {}, {}", reg(d), reg(r)),
        Instr::Sub { d, r } => format!("SUB {}, {}", reg(d), reg(r)),
        Instr::Sbc { d, r } => format!("SBC {}, {}", reg(d), reg(r)),
        Instr::And { d, r } => format!("AND {}, {}", reg(d), reg(r)),
        Instr::Or { d, r } => format!("OR {}, {}", reg(d), reg(r)),
        Instr::Eor { d, r } => format!("EOR {}, {}", reg(d), reg(r)),
        Instr::Mov { d, r } => format!("MOV {}, {}", reg(d), reg(r)),
        Instr::Cp { d, r } => format!("CP {}, {}", reg(d), reg(r)),
        Instr::Cpc { d, r } => format!("CPC {}, {}", reg(d), reg(r)),
        Instr::Cpse { d, r } => format!("CPSE {}, {}", reg(d), reg(r)),
        Instr::Mul { d, r } => format!("MUL {}, {}", reg(d), reg(r)),
        Instr::Muls { d, r } => format!("MULS {}, {}", reg(d), reg(r)),
        Instr::Mulsu { d, r } => format!("MULSU {}, {}", reg(d), reg(r)),
        Instr::Fmul { d, r } => format!("FMUL {}, {}", reg(d), reg(r)),
        Instr::Fmuls { d, r } => format!("FMULS {}, {}", reg(d), reg(r)),
        Instr::Fmulsu { d, r } => format!("FMULSU {}, {}", reg(d), reg(r)),

        Instr::Subi { d, k } => format!("SUBI {}, #${k:02X}", reg(d)),
        Instr::Sbci { d, k } => format!("SBCI {}, #${k:02X}", reg(d)),
        Instr::Andi { d, k } => format!("ANDI {}, #${k:02X}", reg(d)),
        Instr::Ori { d, k } => format!("ORI {}, #${k:02X}", reg(d)),
        Instr::Cpi { d, k } => format!("CPI {}, #${k:02X}", reg(d)),
        Instr::Ldi { d, k } => format!("LDI {}, #${k:02X}", reg(d)),

        Instr::Adiw { d, k } => format!("ADIW {}, #${k:02X}", pair(d)),
        Instr::Sbiw { d, k } => format!("SBIW {}, #${k:02X}", pair(d)),
        Instr::Movw { d, r } => format!("MOVW {}, {}", pair(d), pair(r)),

        Instr::Com { d } => format!("COM {}", reg(d)),
        Instr::Neg { d } => format!("NEG {}", reg(d)),
        Instr::Swap { d } => format!("SWAP {}", reg(d)),
        Instr::Inc { d } => format!("INC {}", reg(d)),
        Instr::Dec { d } => format!("DEC {}", reg(d)),
        Instr::Asr { d } => format!("ASR {}", reg(d)),
        Instr::Lsr { d } => format!("LSR {}", reg(d)),
        Instr::Ror { d } => format!("ROR {}", reg(d)),

        Instr::Ld { d, index, mode } => {
            let mnem = if matches!(mode, PtrMode::Disp(_)) { "LDD" } else { "LD" };
            format!("{mnem} {}, {}", reg(d), ptr_operand(index, mode))
        }
        Instr::St { index, mode, r } => {
            let mnem = if matches!(mode, PtrMode::Disp(_)) { "STD" } else { "ST" };
            format!("{mnem} {}, {}", ptr_operand(index, mode), reg(r))
        }
        Instr::Lds { d, addr } => format!("LDS {}, ${addr:04X}", reg(d)),
        Instr::Sts { addr, r } => format!("STS ${addr:04X}, {}", reg(r)),
        Instr::Pop { d } => format!("POP {}", reg(d)),
        Instr::Push { r } => format!("PUSH {}", reg(r)),

        Instr::Lpm0 => "LPM".into(),
        Instr::Lpm { d, post_inc } => {
            format!("LPM {}, {}", reg(d), if post_inc { "Z+" } else { "Z" })
        }
        Instr::Elpm0 => "ELPM".into(),
        Instr::Elpm { d, post_inc } => {
            format!("ELPM {}, {}", reg(d), if post_inc { "Z+" } else { "Z" })
        }

        Instr::Xch { r } => format!("XCH Z, {}", reg(r)),
        Instr::Las { r } => format!("LAS Z, {}", reg(r)),
        Instr::Lac { r } => format!("LAC Z, {}", reg(r)),
        Instr::Lat { r } => format!("LAT Z, {}", reg(r)),

        Instr::Bset { s } => BSET_NAMES[usize::from(s & 7)].into(),
        Instr::Bclr { s } => BCLR_NAMES[usize::from(s & 7)].into(),
        Instr::Bld { d, b } => format!("BLD {}, {b}", reg(d)),
        Instr::Bst { d, b } => format!("BST {}, {b}", reg(d)),
        Instr::Cbi { a, b } => format!("CBI ${a:02X}, {b}"),
        Instr::Sbi { a, b } => format!("SBI ${a:02X}, {b}"),
        Instr::Sbic { a, b } => format!("SBIC ${a:02X}, {b}"),
        Instr::Sbis { a, b } => format!("SBIS ${a:02X}, {b}"),
        Instr::Sbrc { r, b } => format!("SBRC {}, {b}", reg(r)),
        Instr::Sbrs { r, b } => format!("SBRS {}, {b}", reg(r)),

        Instr::In { d, a } => format!("IN {}, ${a:02X}", reg(d)),
        Instr::Out { a, r } => format!("OUT ${a:02X}, {}", reg(r)),

        Instr::Rjmp { k } => format!("RJMP {}", rel_target(k.into(), pc_after)),
        Instr::Rcall { k } => format!("RCALL {}", rel_target(k.into(), pc_after)),
        Instr::Jmp { k } => format!("JMP ->${k:04X}"),
        Instr::Call { k } => format!("CALL ->${k:04X}"),
        Instr::Ijmp => "IJMP".into(),
        Instr::Eijmp => "EIJMP".into(),
        Instr::Icall => "ICALL".into(),
        Instr::Eicall => "EICALL".into(),
        Instr::Ret => "RET".into(),
        Instr::Reti => "RETI".into(),
        Instr::Brbs { s, k } => format!(
            "{} {}",
            BRBS_NAMES[usize::from(s & 7)],
            rel_target(k.into(), pc_after)
        ),
        Instr::Brbc { s, k } => format!(
            "{} {}",
            BRBC_NAMES[usize::from(s & 7)],
            rel_target(k.into(), pc_after)
        ),

        Instr::Sleep => "SLEEP".into(),
        Instr::Break => "BREAK".into(),
        Instr::Wdr => "WDR".into(),
        Instr::Spm => "SPM".into(),
        Instr::SpmZInc => "SPM Z+".into(),
        Instr::Des { k } => format!("DES #${k:02X}"),
        Instr::Unknown(_) => UNKNOWN_MARKER.into(),
    }
}

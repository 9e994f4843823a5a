//! Instruction decoder for the AVR8 encoding.
//!
//! Classifies a 16-bit opcode word (plus the following word for the four
//! two-word instructions) into a typed [`Instr`] with all operand fields
//! extracted. The same decode feeds both the execution engine and the
//! disassembler, so the encoding is interpreted in exactly one place.
//!
//! Dispatch follows the hardware's own structure: the high nibble selects
//! a group, then finer bits distinguish variants. Words that match no
//! defined encoding come back as [`Instr::Unknown`]; what happens to them
//! is a policy decision made by the caller, not the decoder.

use crate::encoding::{
    abs22, bit3, io5, io6, is_long_opcode, k6, k8, q6, rd, rd_fmul, rd_high, rd_pair,
    rd_pair_upper, rel12, rel7, rr, rr_fmul, rr_high, rr_pair, sreg_bit,
};

/// An index (pointer) register pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Index {
    /// R27:R26.
    X,
    /// R29:R28.
    Y,
    /// R31:R30.
    Z,
}

/// Addressing variant for the indirect load/store forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PtrMode {
    /// Use the pointer as-is.
    Plain,
    /// Use the pointer, then increment it.
    PostInc,
    /// Decrement the pointer, then use it.
    PreDec,
    /// Add a 6-bit displacement (Y and Z only).
    Disp(u8),
}

/// A decoded AVR8 instruction.
///
/// Register fields `d`/`r` are absolute register numbers (already offset
/// for the 16..31 and 16..23 encodings), `k` immediates are decoded to
/// their natural width, and `a` operands hold raw I/O-space addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum Instr {
    Nop,
    // Register-pair and multiply group
    Movw { d: u8, r: u8 },
    Muls { d: u8, r: u8 },
    Mulsu { d: u8, r: u8 },
    Fmul { d: u8, r: u8 },
    Fmuls { d: u8, r: u8 },
    Fmulsu { d: u8, r: u8 },
    Mul { d: u8, r: u8 },
    // Two-operand arithmetic and logic
    Cpc { d: u8, r: u8 },
    Sbc { d: u8, r: u8 },
    Add { d: u8, r: u8 },
    Cpse { d: u8, r: u8 },
    Cp { d: u8, r: u8 },
    Sub { d: u8, r: u8 },
    Adc { d: u8, r: u8 },
    And { d: u8, r: u8 },
    Eor { d: u8, r: u8 },
    Or { d: u8, r: u8 },
    Mov { d: u8, r: u8 },
    // Register-immediate forms (Rd in 16..=31)
    Cpi { d: u8, k: u8 },
    Sbci { d: u8, k: u8 },
    Subi { d: u8, k: u8 },
    Ori { d: u8, k: u8 },
    Andi { d: u8, k: u8 },
    Ldi { d: u8, k: u8 },
    // Word immediate arithmetic on the upper pointer pairs
    Adiw { d: u8, k: u8 },
    Sbiw { d: u8, k: u8 },
    // One-operand arithmetic
    Com { d: u8 },
    Neg { d: u8 },
    Swap { d: u8 },
    Inc { d: u8 },
    Asr { d: u8 },
    Lsr { d: u8 },
    Ror { d: u8 },
    Dec { d: u8 },
    // Data transfer
    Ld { d: u8, index: Index, mode: PtrMode },
    St { index: Index, mode: PtrMode, r: u8 },
    Lds { d: u8, addr: u16 },
    Sts { addr: u16, r: u8 },
    Pop { d: u8 },
    Push { r: u8 },
    // Program-memory loads
    Lpm0,
    Lpm { d: u8, post_inc: bool },
    Elpm0,
    Elpm { d: u8, post_inc: bool },
    // Read-modify-write on *Z
    Xch { r: u8 },
    Las { r: u8 },
    Lac { r: u8 },
    Lat { r: u8 },
    // Flag and bit manipulation
    Bset { s: u8 },
    Bclr { s: u8 },
    Bld { d: u8, b: u8 },
    Bst { d: u8, b: u8 },
    Cbi { a: u8, b: u8 },
    Sbi { a: u8, b: u8 },
    // Control flow
    Rjmp { k: i16 },
    Rcall { k: i16 },
    Jmp { k: u32 },
    Call { k: u32 },
    Ijmp,
    Eijmp,
    Icall,
    Eicall,
    Ret,
    Reti,
    Brbs { s: u8, k: i8 },
    Brbc { s: u8, k: i8 },
    Sbrc { r: u8, b: u8 },
    Sbrs { r: u8, b: u8 },
    Sbic { a: u8, b: u8 },
    Sbis { a: u8, b: u8 },
    // I/O
    In { d: u8, a: u8 },
    Out { a: u8, r: u8 },
    // Misc
    Sleep,
    Break,
    Wdr,
    Spm,
    SpmZInc,
    Des { k: u8 },
    Unknown(u16),
}

/// Decodes one instruction.
///
/// `next` is the program word following `word`; it is only consulted when
/// [`is_long_opcode`] holds for `word`. Returns the instruction and its
/// length in words (1 or 2).
#[must_use]
pub fn decode(word: u16, next: u16) -> (Instr, u8) {
    let instr = match word >> 12 {
        0x0 => decode_group_0(word),
        0x1 => match word & 0x0C00 {
            0x0000 => Instr::Cpse { d: rd(word), r: rr(word) },
            0x0400 => Instr::Cp { d: rd(word), r: rr(word) },
            0x0800 => Instr::Sub { d: rd(word), r: rr(word) },
            _ => Instr::Adc { d: rd(word), r: rr(word) },
        },
        0x2 => match word & 0x0C00 {
            0x0000 => Instr::And { d: rd(word), r: rr(word) },
            0x0400 => Instr::Eor { d: rd(word), r: rr(word) },
            0x0800 => Instr::Or { d: rd(word), r: rr(word) },
            _ => Instr::Mov { d: rd(word), r: rr(word) },
        },
        0x3 => Instr::Cpi { d: rd_high(word), k: k8(word) },
        0x4 => Instr::Sbci { d: rd_high(word), k: k8(word) },
        0x5 => Instr::Subi { d: rd_high(word), k: k8(word) },
        0x6 => Instr::Ori { d: rd_high(word), k: k8(word) },
        0x7 => Instr::Andi { d: rd_high(word), k: k8(word) },
        0x8 | 0xA => decode_displaced(word),
        0x9 => decode_group_9(word, next),
        0xB => {
            if word & 0x0800 == 0 {
                Instr::In { d: rd(word), a: io6(word) }
            } else {
                Instr::Out { a: io6(word), r: rd(word) }
            }
        }
        0xC => Instr::Rjmp { k: rel12(word) },
        0xD => Instr::Rcall { k: rel12(word) },
        0xE => Instr::Ldi { d: rd_high(word), k: k8(word) },
        _ => decode_group_f(word),
    };
    (instr, if is_long_opcode(word) { 2 } else { 1 })
}

/// Group `0000`: NOP, MOVW, the signed/fractional multiplies, CPC, SBC, ADD.
fn decode_group_0(word: u16) -> Instr {
    match word & 0x0C00 {
        0x0000 => match word & 0x0300 {
            0x0000 if word == 0x0000 => Instr::Nop,
            0x0100 => Instr::Movw {
                d: rd_pair(word),
                r: rr_pair(word),
            },
            0x0200 => Instr::Muls {
                d: rd_high(word),
                r: rr_high(word),
            },
            0x0300 => {
                let d = rd_fmul(word);
                let r = rr_fmul(word);
                match (word & 0x0080 != 0, word & 0x0008 != 0) {
                    (false, false) => Instr::Mulsu { d, r },
                    (false, true) => Instr::Fmul { d, r },
                    (true, false) => Instr::Fmuls { d, r },
                    (true, true) => Instr::Fmulsu { d, r },
                }
            }
            _ => Instr::Unknown(word),
        },
        0x0400 => Instr::Cpc { d: rd(word), r: rr(word) },
        0x0800 => Instr::Sbc { d: rd(word), r: rr(word) },
        _ => Instr::Add { d: rd(word), r: rr(word) },
    }
}

/// Groups `1000` and `1010`: LD/ST through Y or Z with a 6-bit displacement.
/// Bit 9 selects store, bit 3 selects Y. A zero displacement is the plain
/// pointer form.
fn decode_displaced(word: u16) -> Instr {
    let index = if word & 0x0008 != 0 { Index::Y } else { Index::Z };
    let q = q6(word);
    let mode = if q == 0 { PtrMode::Plain } else { PtrMode::Disp(q) };
    if word & 0x0200 == 0 {
        Instr::Ld { d: rd(word), index, mode }
    } else {
        Instr::St { index, mode, r: rd(word) }
    }
}

/// Group `1001`: the dense sub-table. Loads and stores with pointer
/// update, LPM/ELPM, stack, one-operand arithmetic, flag set/clear,
/// indirect and absolute control flow, ADIW/SBIW, I/O bit ops, MUL.
fn decode_group_9(word: u16, next: u16) -> Instr {
    match word & 0x0E00 {
        0x0000 => decode_load_9(word, next),
        0x0200 => decode_store_9(word, next),
        0x0400 => decode_one_operand(word, next),
        0x0600 => {
            let d = rd_pair_upper(word);
            let k = k6(word);
            if word & 0x0100 == 0 {
                Instr::Adiw { d, k }
            } else {
                Instr::Sbiw { d, k }
            }
        }
        0x0800 => {
            let a = io5(word);
            let b = bit3(word);
            if word & 0x0100 == 0 {
                Instr::Cbi { a, b }
            } else {
                Instr::Sbic { a, b }
            }
        }
        0x0A00 => {
            let a = io5(word);
            let b = bit3(word);
            if word & 0x0100 == 0 {
                Instr::Sbi { a, b }
            } else {
                Instr::Sbis { a, b }
            }
        }
        _ => Instr::Mul { d: rd(word), r: rr(word) },
    }
}

/// `1001 000d dddd ....`: LDS, LD with pointer update, LPM/ELPM, POP.
fn decode_load_9(word: u16, next: u16) -> Instr {
    let d = rd(word);
    match word & 0x000F {
        0x0 => Instr::Lds { d, addr: next },
        0x1 => Instr::Ld { d, index: Index::Z, mode: PtrMode::PostInc },
        0x2 => Instr::Ld { d, index: Index::Z, mode: PtrMode::PreDec },
        0x4 => Instr::Lpm { d, post_inc: false },
        0x5 => Instr::Lpm { d, post_inc: true },
        0x6 => Instr::Elpm { d, post_inc: false },
        0x7 => Instr::Elpm { d, post_inc: true },
        0x9 => Instr::Ld { d, index: Index::Y, mode: PtrMode::PostInc },
        0xA => Instr::Ld { d, index: Index::Y, mode: PtrMode::PreDec },
        0xC => Instr::Ld { d, index: Index::X, mode: PtrMode::Plain },
        0xD => Instr::Ld { d, index: Index::X, mode: PtrMode::PostInc },
        0xE => Instr::Ld { d, index: Index::X, mode: PtrMode::PreDec },
        0xF => Instr::Pop { d },
        _ => Instr::Unknown(word),
    }
}

/// `1001 001r rrrr ....`: STS, ST with pointer update, the *Z
/// read-modify-write quartet, PUSH.
fn decode_store_9(word: u16, next: u16) -> Instr {
    let r = rd(word);
    match word & 0x000F {
        0x0 => Instr::Sts { addr: next, r },
        0x1 => Instr::St { index: Index::Z, mode: PtrMode::PostInc, r },
        0x2 => Instr::St { index: Index::Z, mode: PtrMode::PreDec, r },
        0x4 => Instr::Xch { r },
        0x5 => Instr::Las { r },
        0x6 => Instr::Lac { r },
        0x7 => Instr::Lat { r },
        0x9 => Instr::St { index: Index::Y, mode: PtrMode::PostInc, r },
        0xA => Instr::St { index: Index::Y, mode: PtrMode::PreDec, r },
        0xC => Instr::St { index: Index::X, mode: PtrMode::Plain, r },
        0xD => Instr::St { index: Index::X, mode: PtrMode::PostInc, r },
        0xE => Instr::St { index: Index::X, mode: PtrMode::PreDec, r },
        0xF => Instr::Push { r },
        _ => Instr::Unknown(word),
    }
}

/// `1001 010. .... ....`: one-operand arithmetic, SEC…CLI, the implied-
/// operand instructions, DES, and the two-word JMP/CALL.
fn decode_one_operand(word: u16, next: u16) -> Instr {
    let d = rd(word);
    match word & 0x000F {
        0x0 => Instr::Com { d },
        0x1 => Instr::Neg { d },
        0x2 => Instr::Swap { d },
        0x3 => Instr::Inc { d },
        0x5 => Instr::Asr { d },
        0x6 => Instr::Lsr { d },
        0x7 => Instr::Ror { d },
        0xA => Instr::Dec { d },
        0x8 if word & 0x0100 == 0 => {
            let s = sreg_bit(word);
            if word & 0x0080 == 0 {
                Instr::Bset { s }
            } else {
                Instr::Bclr { s }
            }
        }
        0x8 => match word {
            0x9508 => Instr::Ret,
            0x9518 => Instr::Reti,
            0x9588 => Instr::Sleep,
            0x9598 => Instr::Break,
            0x95A8 => Instr::Wdr,
            0x95C8 => Instr::Lpm0,
            0x95D8 => Instr::Elpm0,
            0x95E8 => Instr::Spm,
            0x95F8 => Instr::SpmZInc,
            _ => Instr::Unknown(word),
        },
        0x9 => match word {
            0x9409 => Instr::Ijmp,
            0x9419 => Instr::Eijmp,
            0x9509 => Instr::Icall,
            0x9519 => Instr::Eicall,
            _ => Instr::Unknown(word),
        },
        0xB if word & 0x0100 == 0 => Instr::Des {
            k: ((word >> 4) & 0x0F) as u8,
        },
        0xC | 0xD => Instr::Jmp { k: abs22(word, next) },
        0xE | 0xF => Instr::Call { k: abs22(word, next) },
        _ => Instr::Unknown(word),
    }
}

/// Group `1111`: conditional branches, BLD/BST, SBRC/SBRS. Bit 3 must be
/// clear for the register-bit forms; encodings with it set are reserved.
fn decode_group_f(word: u16) -> Instr {
    match word & 0x0C00 {
        0x0000 => Instr::Brbs { s: bit3(word), k: rel7(word) },
        0x0400 => Instr::Brbc { s: bit3(word), k: rel7(word) },
        0x0800 => {
            if word & 0x0008 != 0 {
                Instr::Unknown(word)
            } else if word & 0x0200 == 0 {
                Instr::Bld { d: rd(word), b: bit3(word) }
            } else {
                Instr::Bst { d: rd(word), b: bit3(word) }
            }
        }
        _ => {
            if word & 0x0008 != 0 {
                Instr::Unknown(word)
            } else if word & 0x0200 == 0 {
                Instr::Sbrc { r: rd(word), b: bit3(word) }
            } else {
                Instr::Sbrs { r: rd(word), b: bit3(word) }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{decode, Index, Instr, PtrMode};

    #[test]
    fn decodes_two_word_forms_with_their_second_word() {
        assert_eq!(decode(0x940C, 0x0034), (Instr::Jmp { k: 0x0034 }, 2));
        assert_eq!(decode(0x940F, 0x1234), (Instr::Call { k: 0x0001_1234 }, 2));
        assert_eq!(
            decode(0x9100, 0x1234),
            (Instr::Lds { d: 16, addr: 0x1234 }, 2)
        );
        assert_eq!(
            decode(0x9210, 0x0060),
            (Instr::Sts { addr: 0x0060, r: 1 }, 2)
        );
    }

    #[test]
    fn register_register_forms_extract_split_fields() {
        assert_eq!(decode(0x0F01, 0).0, Instr::Add { d: 16, r: 17 });
        assert_eq!(decode(0x1001, 0).0, Instr::Cpse { d: 0, r: 1 });
        assert_eq!(decode(0x2FEF, 0).0, Instr::Mov { d: 30, r: 31 });
        assert_eq!(decode(0x9C12, 0).0, Instr::Mul { d: 1, r: 2 });
    }

    #[test]
    fn multiply_subgroup_distinguishes_by_bits_7_and_3() {
        assert_eq!(decode(0x0312, 0).0, Instr::Mulsu { d: 17, r: 18 });
        assert_eq!(decode(0x031A, 0).0, Instr::Fmul { d: 17, r: 18 });
        assert_eq!(decode(0x0392, 0).0, Instr::Fmuls { d: 17, r: 18 });
        assert_eq!(decode(0x039A, 0).0, Instr::Fmulsu { d: 17, r: 18 });
    }

    #[test]
    fn displaced_loads_decode_pointer_and_offset() {
        assert_eq!(
            decode(0x8009, 0).0,
            Instr::Ld { d: 0, index: Index::Y, mode: PtrMode::Disp(1) }
        );
        assert_eq!(
            decode(0xAFFF, 0).0,
            Instr::St { index: Index::Y, mode: PtrMode::Disp(63), r: 31 }
        );
        assert_eq!(
            decode(0x8008, 0).0,
            Instr::Ld { d: 0, index: Index::Y, mode: PtrMode::Plain }
        );
        assert_eq!(
            decode(0x8200, 0).0,
            Instr::St { index: Index::Z, mode: PtrMode::Plain, r: 0 }
        );
    }

    #[test]
    fn pointer_update_loads_live_in_group_nine() {
        assert_eq!(
            decode(0x9001, 0).0,
            Instr::Ld { d: 0, index: Index::Z, mode: PtrMode::PostInc }
        );
        assert_eq!(
            decode(0x900E, 0).0,
            Instr::Ld { d: 0, index: Index::X, mode: PtrMode::PreDec }
        );
        assert_eq!(
            decode(0x93D1, 0).0,
            Instr::St { index: Index::Z, mode: PtrMode::PostInc, r: 29 }
        );
        assert_eq!(decode(0x900F, 0).0, Instr::Pop { d: 0 });
        assert_eq!(decode(0x920F, 0).0, Instr::Push { r: 0 });
    }

    #[test]
    fn z_read_modify_write_quartet() {
        assert_eq!(decode(0x9204, 0).0, Instr::Xch { r: 0 });
        assert_eq!(decode(0x9215, 0).0, Instr::Las { r: 1 });
        assert_eq!(decode(0x9226, 0).0, Instr::Lac { r: 2 });
        assert_eq!(decode(0x9237, 0).0, Instr::Lat { r: 3 });
    }

    #[test]
    fn flag_set_clear_family() {
        assert_eq!(decode(0x9408, 0).0, Instr::Bset { s: 0 }); // SEC
        assert_eq!(decode(0x9478, 0).0, Instr::Bset { s: 7 }); // SEI
        assert_eq!(decode(0x9488, 0).0, Instr::Bclr { s: 0 }); // CLC
        assert_eq!(decode(0x94F8, 0).0, Instr::Bclr { s: 7 }); // CLI
    }

    #[test]
    fn implied_operand_instructions() {
        assert_eq!(decode(0x9508, 0).0, Instr::Ret);
        assert_eq!(decode(0x9518, 0).0, Instr::Reti);
        assert_eq!(decode(0x9588, 0).0, Instr::Sleep);
        assert_eq!(decode(0x9598, 0).0, Instr::Break);
        assert_eq!(decode(0x95A8, 0).0, Instr::Wdr);
        assert_eq!(decode(0x95C8, 0).0, Instr::Lpm0);
        assert_eq!(decode(0x95D8, 0).0, Instr::Elpm0);
        assert_eq!(decode(0x95E8, 0).0, Instr::Spm);
        assert_eq!(decode(0x95F8, 0).0, Instr::SpmZInc);
        assert_eq!(decode(0x9409, 0).0, Instr::Ijmp);
        assert_eq!(decode(0x9419, 0).0, Instr::Eijmp);
        assert_eq!(decode(0x9509, 0).0, Instr::Icall);
        assert_eq!(decode(0x9519, 0).0, Instr::Eicall);
        assert_eq!(decode(0x94FB, 0).0, Instr::Des { k: 15 });
    }

    #[test]
    fn word_arithmetic_targets_upper_pairs() {
        assert_eq!(decode(0x9601, 0).0, Instr::Adiw { d: 24, k: 1 });
        assert_eq!(decode(0x96F0, 0).0, Instr::Adiw { d: 30, k: 48 });
        assert_eq!(decode(0x9721, 0).0, Instr::Sbiw { d: 28, k: 1 });
    }

    #[test]
    fn branch_displacements_sign_extend() {
        assert_eq!(decode(0xC000, 0).0, Instr::Rjmp { k: 0 });
        assert_eq!(decode(0xCFFF, 0).0, Instr::Rjmp { k: -1 });
        assert_eq!(decode(0xF001, 0).0, Instr::Brbs { s: 1, k: 0 });
        assert_eq!(decode(0xF7F9, 0).0, Instr::Brbc { s: 1, k: -1 });
    }

    #[test]
    fn io_forms_keep_raw_io_addresses() {
        // IN R16, 0x3F / OUT 0x3F, R16
        assert_eq!(decode(0xB70F, 0).0, Instr::In { d: 16, a: 0x3F });
        assert_eq!(decode(0xBF0F, 0).0, Instr::Out { a: 0x3F, r: 16 });
        assert_eq!(decode(0x98FB, 0).0, Instr::Cbi { a: 0x1F, b: 3 });
        assert_eq!(decode(0x9AFB, 0).0, Instr::Sbi { a: 0x1F, b: 3 });
    }

    #[test]
    fn reserved_words_come_back_unknown() {
        for word in [
            0x0001, 0x00FF, 0x9003, 0x9008, 0x900B, 0x9203, 0x9208, 0x920B, 0x9404, 0x9528,
            0x95B8, 0x9429, 0x95FB, 0xF808, 0xFA0F, 0xFC08, 0xFE0F,
        ] {
            assert_eq!(decode(word, 0).0, Instr::Unknown(word), "word {word:#06X}");
        }
    }
}

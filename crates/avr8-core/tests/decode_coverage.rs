//! Exhaustive decoder coverage over the full 16-bit opcode space.
//!
//! Every one of the 65,536 words must either classify into a defined
//! instruction or be genuinely unreserved in the AVR8 encoding; the
//! reference predicate below enumerates the reserved gaps independently of
//! the decoder's own dispatch structure.

use avr8_core::{decode, is_long_opcode, Instr};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

/// Reserved encodings of the AVR8 instruction set, straight from the
/// opcode map: the gaps in group 0 and group 9, the unused one-operand
/// slot, the unassigned implied-operand rows, and the register-bit forms
/// with bit 3 set.
fn is_reserved(word: u16) -> bool {
    // Group 0000: only 0x0000 itself is NOP; 0x0001..=0x00FF are gaps.
    if word >> 8 == 0x00 && word != 0x0000 {
        return true;
    }
    // LD/ST with pointer update: sub-slots 3, 8, and B are unassigned in
    // both the load (0x90xx/0x91xx) and store (0x92xx/0x93xx) halves.
    if (word & 0xFC00) == 0x9000 && matches!(word & 0x000F, 0x3 | 0x8 | 0xB) {
        return true;
    }
    // One-operand block, first half (0x94xx): sub-slot 4 is unassigned and
    // the indirect-jump row holds only IJMP/EIJMP.
    if (word & 0xFF00) == 0x9400 {
        return match word & 0x000F {
            0x4 => true,
            0x9 => !matches!(word, 0x9409 | 0x9419),
            _ => false,
        };
    }
    // One-operand block, second half (0x95xx): the implied-operand rows
    // are sparsely assigned.
    if (word & 0xFF00) == 0x9500 {
        return match word & 0x000F {
            0x4 | 0xB => true,
            0x8 => !matches!(
                word,
                0x9508 | 0x9518 | 0x9588 | 0x9598 | 0x95A8 | 0x95C8 | 0x95D8 | 0x95E8 | 0x95F8
            ),
            0x9 => !matches!(word, 0x9509 | 0x9519),
            _ => false,
        };
    }
    // BLD/BST/SBRC/SBRS require bit 3 clear.
    if (word & 0xF808) == 0xF808 {
        return true;
    }
    false
}

#[test]
fn every_word_is_recognized_or_genuinely_reserved() {
    for word in 0..=u16::MAX {
        let (instr, _) = decode(word, 0x1234);
        let unknown = matches!(instr, Instr::Unknown(_));
        assert_eq!(
            unknown,
            is_reserved(word),
            "word {word:#06X} decoded to {instr:?}"
        );
    }
}

#[test]
fn decoded_length_agrees_with_the_long_opcode_predicate() {
    for word in 0..=u16::MAX {
        let (_, words) = decode(word, 0x1234);
        assert_eq!(
            words == 2,
            is_long_opcode(word),
            "length mismatch for {word:#06X}"
        );
    }
}

#[test]
fn exactly_the_four_two_word_instructions_are_long() {
    let mut long_count = 0u32;
    for word in 0..=u16::MAX {
        if !is_long_opcode(word) {
            continue;
        }
        long_count += 1;
        let (instr, _) = decode(word, 0x0000);
        assert!(
            matches!(
                instr,
                Instr::Lds { .. } | Instr::Sts { .. } | Instr::Jmp { .. } | Instr::Call { .. }
            ),
            "long word {word:#06X} decoded to {instr:?}"
        );
    }
    // 32 LDS + 32 STS encodings, and 64 apiece for JMP/CALL.
    assert_eq!(long_count, 32 + 32 + 64 + 64);
}

#[test]
fn unknown_words_echo_their_raw_encoding() {
    for word in [0x0001u16, 0x9003, 0x95B8, 0xFF08] {
        assert_eq!(decode(word, 0).0, Instr::Unknown(word));
    }
}

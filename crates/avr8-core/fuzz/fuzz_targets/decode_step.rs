#![no_main]

use avr8_core::{
    decode, is_long_opcode, Cpu, CpuConfig, PcWidth, UnknownOpcodePolicy, VecMemory,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 5 {
        return;
    }

    let word = u16::from_le_bytes([data[0], data[1]]);
    let next = u16::from_le_bytes([data[2], data[3]]);
    let wide = data[4] & 1 != 0;

    // Decoding must be total, and length must agree with the predicate.
    let (_, words) = decode(word, next);
    assert_eq!(words == 2, is_long_opcode(word));

    // Stepping an arbitrary program must never panic; faults are fine.
    let rom: Vec<u16> = data
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    let config = CpuConfig {
        pc_width: if wide { PcWidth::Word22 } else { PcWidth::Word16 },
        unknown_opcode_policy: UnknownOpcodePolicy::Nop,
    };
    let mut cpu = Cpu::new(VecMemory::with_full_ram(rom), config);
    cpu.set_sp(0x08FF);
    for _ in 0..16 {
        if cpu.step().is_err() {
            break;
        }
    }
});

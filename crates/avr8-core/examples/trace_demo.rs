//! Minimal host wiring: run a small program with tracing to stdout.
//!
//! ```sh
//! cargo run -p avr8-core --example trace_demo
//! ```
//!
//! The program counts R16 up to 5 with a SUBI/BRNE loop and then sleeps;
//! every executed instruction is traced with its register snapshot.

use avr8_core::{Cpu, CpuConfig, VecMemory, WriteSink};
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use thiserror as _;

fn main() {
    let rom = vec![
        0xE005, // LDI R16, #$05
        0x950A, // DEC R16
        0xF7F1, // BRNE -2
        0x9588, // SLEEP
    ];
    let mut cpu = Cpu::new(VecMemory::with_full_ram(rom), CpuConfig::default());
    cpu.set_sp(0x08FF);
    cpu.set_trace_sink(Box::new(WriteSink(std::io::stdout())));
    cpu.reset();

    match cpu.run(1_000) {
        Ok(cycles) => println!("slept after {cycles} cycles at PC={:#06X}", cpu.pc()),
        Err(fault) => eprintln!("fault: {fault}"),
    }
}

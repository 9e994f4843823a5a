//! Per-step execution tracing.
//!
//! When a sink is attached, every [`Cpu::step`] emits one logical record:
//! the disassembly of the instruction about to execute, then a snapshot of
//! PC, SP, the register file, and SREG after it. [`Cpu::reset`] inserts a
//! `*** RESET! ***` marker. Tracing is deterministic and line-oriented;
//! where the lines go is the host's business.

use std::io::Write;

use crate::disasm;
use crate::memory::MemorySpace;
use crate::state::{Cpu, Flag};

/// Receives trace output one line at a time.
pub trait TraceSink {
    /// Records one line, without a trailing newline.
    fn line(&mut self, line: &str);
}

/// Adapts any [`Write`] into a [`TraceSink`], appending newlines.
///
/// Write errors are swallowed: tracing must never abort emulation.
pub struct WriteSink<W: Write>(pub W);

impl<W: Write> TraceSink for WriteSink<W> {
    fn line(&mut self, line: &str) {
        let _ = writeln!(self.0, "{line}");
    }
}

impl<M: MemorySpace> Cpu<M> {
    /// Emits the disassembly of the instruction at PC, pre-execution.
    pub(crate) fn trace_instruction(&mut self) {
        if self.trace.is_none() {
            return;
        }
        let line = disasm::render_instruction_lossy(&mut self.mem, self.pc);
        if let Some(sink) = self.trace.as_mut() {
            sink.line(&line);
        }
    }

    /// Emits the post-execution register snapshot.
    pub(crate) fn trace_state(&mut self) {
        let (pc, sp, sreg, regs) = (self.pc, self.sp, self.sreg, self.regs);
        let Some(sink) = self.trace.as_mut() else {
            return;
        };
        sink.line(&format!("=> PC=${pc:05X}"));
        sink.line(&format!("   SP=${sp:04X}"));
        for row in 0..4 {
            let mut line = String::from("   ");
            for col in 0..8 {
                let n = row * 8 + col;
                line.push_str(&format!(" R{n}=${:02X}", regs[n]));
            }
            sink.line(&line);
        }
        let f = |flag: Flag| u8::from(sreg & flag.mask() != 0);
        sink.line(&format!(
            "   SREG=${sreg:02X} (I={} T={} H={} S={} V={} N={} Z={} C={})",
            f(Flag::I),
            f(Flag::T),
            f(Flag::H),
            f(Flag::S),
            f(Flag::V),
            f(Flag::N),
            f(Flag::Z),
            f(Flag::C),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::WriteSink;
    use crate::memory::VecMemory;
    use crate::state::{Cpu, CpuConfig};
    use crate::trace::TraceSink;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<String>>>);

    impl TraceSink for SharedSink {
        fn line(&mut self, line: &str) {
            self.0.lock().unwrap().push(line.to_string());
        }
    }

    #[test]
    fn step_emits_disassembly_then_snapshot() {
        let sink = SharedSink::default();
        let mut cpu = Cpu::new(
            VecMemory::with_full_ram(vec![0xEF0F]), // LDI R16, #$FF
            CpuConfig::default(),
        );
        cpu.set_trace_sink(Box::new(sink.clone()));
        cpu.step().unwrap();

        let lines = sink.0.lock().unwrap();
        assert_eq!(lines[0], "00000 : EF0F      : LDI R16, #$FF");
        assert_eq!(lines[1], "=> PC=$00001");
        assert_eq!(lines[2], "   SP=$0000");
        assert!(lines[3].starts_with("    R0=$"));
        assert!(lines[3].contains(" R7=$"));
        assert!(lines[5].contains(" R16=$FF"));
        let sreg_line = &lines[7];
        assert!(sreg_line.starts_with("   SREG=$00 (I=0"));
        assert!(sreg_line.ends_with("C=0)"));
    }

    #[test]
    fn reset_inserts_a_marker() {
        let sink = SharedSink::default();
        let mut cpu = Cpu::new(VecMemory::default(), CpuConfig::default());
        cpu.set_trace_sink(Box::new(sink.clone()));
        cpu.reset();
        assert_eq!(sink.0.lock().unwrap().as_slice(), ["*** RESET! ***"]);
    }

    #[test]
    fn detaching_returns_the_sink_and_stops_tracing() {
        let sink = SharedSink::default();
        let mut cpu = Cpu::new(
            VecMemory::with_full_ram(vec![0x0000]),
            CpuConfig::default(),
        );
        cpu.set_trace_sink(Box::new(sink.clone()));
        assert!(cpu.clear_trace_sink().is_some());
        cpu.step().unwrap();
        assert!(sink.0.lock().unwrap().is_empty());
    }

    #[test]
    fn write_sink_appends_newlines() {
        let mut buffer = Vec::new();
        {
            let mut sink = WriteSink(&mut buffer);
            sink.line("*** RESET! ***");
        }
        assert_eq!(buffer, b"*** RESET! ***\n");
    }
}

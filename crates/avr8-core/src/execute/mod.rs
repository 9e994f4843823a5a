//! The fetch-decode-execute engine.
//!
//! One [`Cpu::step`] performs a complete instruction: fetch the opcode word
//! (and the second word of a two-word opcode), decode, mutate CPU and
//! memory state, and account cycles. Cycle charging is carried by the typed
//! access helpers — program-word reads and RAM byte accesses cost one cycle
//! each, I/O-space accesses ride on the opcode fetch — with per-instruction
//! top-ups where the canonical cost exceeds the access count. Faults
//! propagate out of `step` without local recovery.

mod flags;

use crate::decoder::{decode, Index, Instr, PtrMode};
use crate::encoding::{is_long_opcode, IO_SPACE_BASE};
use crate::fault::{Fault, RefusedOp};
use crate::memory::MemorySpace;
use crate::state::{Cpu, Flag, PcWidth, UnknownOpcodePolicy};

impl<M: MemorySpace> Cpu<M> {
    /// Executes one instruction and returns the cycles it consumed.
    ///
    /// A sleeping CPU consumes nothing and stays put. When a trace sink is
    /// attached, the instruction's disassembly is emitted before execution
    /// and a register snapshot after it.
    ///
    /// # Errors
    ///
    /// Any [`Fault`], including [`Fault::BreakInterrupt`] for the `BREAK`
    /// instruction; see the variant docs for what state each leaves behind.
    pub fn step(&mut self) -> Result<u64, Fault> {
        if self.asleep {
            return Ok(0);
        }
        let start = self.cycles;
        self.trace_instruction();
        let op_pc = self.pc;
        let op = self.fetch_program_word()?;
        let next = if is_long_opcode(op) {
            self.fetch_program_word()?
        } else {
            0
        };
        let (instr, _) = decode(op, next);
        self.execute(instr, op_pc)?;
        self.trace_state();
        Ok(self.cycles - start)
    }

    /// Steps until at least `min_cycles` cycles have elapsed or the CPU
    /// goes to sleep. Returns the cycles actually consumed.
    ///
    /// # Errors
    ///
    /// Propagates the first [`Fault`] raised by [`Self::step`].
    pub fn run(&mut self, min_cycles: u64) -> Result<u64, Fault> {
        let mut total = 0;
        while total < min_cycles && !self.asleep {
            total += self.step()?;
        }
        Ok(total)
    }

    // --- Cycle-charging access helpers ---

    /// Reads a program word, charging one cycle.
    fn read_program_word(&mut self, addr: u32) -> Result<u16, Fault> {
        self.cycles += 1;
        self.mem
            .read_program_word(addr)
            .ok_or(Fault::AddressUnreadable { addr })
    }

    /// Reads the program word at PC and advances PC past it.
    fn fetch_program_word(&mut self) -> Result<u16, Fault> {
        let word = self.read_program_word(self.pc)?;
        self.set_pc(self.pc.wrapping_add(1));
        Ok(word)
    }

    /// Reads a data byte, charging one cycle.
    fn read_ram(&mut self, addr: u16) -> Result<u8, Fault> {
        self.cycles += 1;
        self.mem
            .read_data_byte(addr)
            .ok_or(Fault::AddressUnreadable { addr: addr.into() })
    }

    /// Writes a data byte, charging one cycle.
    fn write_ram(&mut self, addr: u16, value: u8) -> Result<(), Fault> {
        self.cycles += 1;
        if self.mem.write_data_byte(addr, value) {
            Ok(())
        } else {
            Err(Fault::AddressUnwritable { addr, value })
        }
    }

    /// Reads from I/O space (no extra cycle; I/O rides on the fetch).
    fn read_io(&mut self, a: u8) -> Result<u8, Fault> {
        let addr = IO_SPACE_BASE + u16::from(a);
        self.mem
            .read_data_byte(addr)
            .ok_or(Fault::AddressUnreadable { addr: addr.into() })
    }

    /// Writes to I/O space (no extra cycle).
    fn write_io(&mut self, a: u8, value: u8) -> Result<(), Fault> {
        let addr = IO_SPACE_BASE + u16::from(a);
        if self.mem.write_data_byte(addr, value) {
            Ok(())
        } else {
            Err(Fault::AddressUnwritable { addr, value })
        }
    }

    // --- Stack and control-flow plumbing ---

    fn push_byte(&mut self, value: u8) -> Result<(), Fault> {
        let sp = self.sp;
        self.write_ram(sp, value)?;
        self.sp = sp.wrapping_sub(1);
        Ok(())
    }

    fn pop_byte(&mut self) -> Result<u8, Fault> {
        self.sp = self.sp.wrapping_add(1);
        self.read_ram(self.sp)
    }

    /// Pushes the return address (the current PC): low byte, high byte,
    /// and on 22-bit-PC parts the extension byte.
    fn push_return_address(&mut self) -> Result<(), Fault> {
        let pc = self.pc;
        self.push_byte(pc as u8)?;
        self.push_byte((pc >> 8) as u8)?;
        if self.pc_width() == PcWidth::Word22 {
            self.push_byte((pc >> 16) as u8)?;
        }
        Ok(())
    }

    /// Pops a return address in the reverse of the push order.
    fn pop_return_address(&mut self) -> Result<u32, Fault> {
        let mut pc = 0u32;
        if self.pc_width() == PcWidth::Word22 {
            pc = u32::from(self.pop_byte()?) << 16;
        }
        pc |= u32::from(self.pop_byte()?) << 8;
        pc |= u32::from(self.pop_byte()?);
        Ok(pc)
    }

    /// Skips the instruction at PC: consumes its first word (one cycle)
    /// and, when it is a two-word opcode, advances past and charges for
    /// the second word as well.
    fn skip_next(&mut self) -> Result<(), Fault> {
        let word = self.fetch_program_word()?;
        if is_long_opcode(word) {
            self.set_pc(self.pc.wrapping_add(1));
            self.cycles += 1;
        }
        Ok(())
    }

    fn branch_to(&mut self, displacement: i32) {
        let target = (i64::from(self.pc) + i64::from(displacement)) as u32;
        self.set_pc(target);
        self.cycles += 1;
    }

    fn require_wide_pc(&self) -> Result<(), Fault> {
        if self.pc_width() == PcWidth::Word22 {
            Ok(())
        } else {
            Err(Fault::InvalidOperation)
        }
    }

    fn index_reg(&self, index: Index) -> u16 {
        match index {
            Index::X => self.x(),
            Index::Y => self.y(),
            Index::Z => self.z(),
        }
    }

    fn set_index_reg(&mut self, index: Index, value: u16) {
        match index {
            Index::X => self.set_x(value),
            Index::Y => self.set_y(value),
            Index::Z => self.set_z(value),
        }
    }

    /// Resolves an indirect access: the effective address plus the pointer
    /// value to retire. Pointer updates commit even when the access itself
    /// faults, matching hardware, so the caller applies `retire` before
    /// propagating the access result.
    fn indirect_address(&self, index: Index, mode: PtrMode) -> (u16, Option<u16>) {
        let ptr = self.index_reg(index);
        match mode {
            PtrMode::Plain => (ptr, None),
            PtrMode::Disp(q) => (ptr.wrapping_add(q.into()), None),
            PtrMode::PostInc => (ptr, Some(ptr.wrapping_add(1))),
            PtrMode::PreDec => {
                let addr = ptr.wrapping_sub(1);
                (addr, Some(addr))
            }
        }
    }

    /// Reads one byte of program memory through a byte address (bit 0
    /// selects the high half of the word), charging one cycle.
    fn read_program_byte(&mut self, byte_addr: u32) -> Result<u8, Fault> {
        let word = self.read_program_word(byte_addr >> 1)?;
        Ok(if byte_addr & 1 == 0 {
            word as u8
        } else {
            (word >> 8) as u8
        })
    }

    // --- Per-instruction semantics ---

    #[allow(clippy::too_many_lines)]
    fn execute(&mut self, instr: Instr, op_pc: u32) -> Result<(), Fault> {
        match instr {
            Instr::Nop => {}

            // -- Arithmetic and logic --
            Instr::Add { d, r } => {
                let (rd, rr) = (self.reg(d), self.reg(r));
                let res = rd.wrapping_add(rr);
                self.set_reg(d, res);
                self.sreg = flags::add(self.sreg, rd, rr, res);
            }
            Instr::Adc { d, r } => {
                let (rd, rr) = (self.reg(d), self.reg(r));
                let carry = self.sreg & 1;
                let res = rd.wrapping_add(rr).wrapping_add(carry);
                self.set_reg(d, res);
                self.sreg = flags::add(self.sreg, rd, rr, res);
            }
            Instr::Sub { d, r } => {
                let (rd, rr) = (self.reg(d), self.reg(r));
                let res = rd.wrapping_sub(rr);
                self.set_reg(d, res);
                self.sreg = flags::sub(self.sreg, rd, rr, res, false);
            }
            Instr::Subi { d, k } => {
                let rd = self.reg(d);
                let res = rd.wrapping_sub(k);
                self.set_reg(d, res);
                self.sreg = flags::sub(self.sreg, rd, k, res, false);
            }
            Instr::Sbc { d, r } => {
                let (rd, rr) = (self.reg(d), self.reg(r));
                let carry = self.sreg & 1;
                let res = rd.wrapping_sub(rr).wrapping_sub(carry);
                self.set_reg(d, res);
                self.sreg = flags::sub(self.sreg, rd, rr, res, true);
            }
            Instr::Sbci { d, k } => {
                let rd = self.reg(d);
                let carry = self.sreg & 1;
                let res = rd.wrapping_sub(k).wrapping_sub(carry);
                self.set_reg(d, res);
                self.sreg = flags::sub(self.sreg, rd, k, res, true);
            }
            Instr::And { d, r } => {
                let res = self.reg(d) & self.reg(r);
                self.set_reg(d, res);
                self.sreg = flags::logic(self.sreg, res);
            }
            Instr::Andi { d, k } => {
                let res = self.reg(d) & k;
                self.set_reg(d, res);
                self.sreg = flags::logic(self.sreg, res);
            }
            Instr::Or { d, r } => {
                let res = self.reg(d) | self.reg(r);
                self.set_reg(d, res);
                self.sreg = flags::logic(self.sreg, res);
            }
            Instr::Ori { d, k } => {
                let res = self.reg(d) | k;
                self.set_reg(d, res);
                self.sreg = flags::logic(self.sreg, res);
            }
            Instr::Eor { d, r } => {
                let res = self.reg(d) ^ self.reg(r);
                self.set_reg(d, res);
                self.sreg = flags::logic(self.sreg, res);
            }
            Instr::Com { d } => {
                let res = !self.reg(d);
                self.set_reg(d, res);
                self.sreg = flags::com(self.sreg, res);
            }
            Instr::Neg { d } => {
                let rd = self.reg(d);
                let res = 0u8.wrapping_sub(rd);
                self.set_reg(d, res);
                self.sreg = flags::sub(self.sreg, 0, rd, res, false);
            }
            Instr::Inc { d } => {
                let res = self.reg(d).wrapping_add(1);
                self.set_reg(d, res);
                self.sreg = flags::inc_dec(self.sreg, res, res == 0x80);
            }
            Instr::Dec { d } => {
                let res = self.reg(d).wrapping_sub(1);
                self.set_reg(d, res);
                self.sreg = flags::inc_dec(self.sreg, res, res == 0x7F);
            }
            Instr::Cp { d, r } => {
                let (rd, rr) = (self.reg(d), self.reg(r));
                self.sreg = flags::sub(self.sreg, rd, rr, rd.wrapping_sub(rr), false);
            }
            Instr::Cpi { d, k } => {
                let rd = self.reg(d);
                self.sreg = flags::sub(self.sreg, rd, k, rd.wrapping_sub(k), false);
            }
            Instr::Cpc { d, r } => {
                let (rd, rr) = (self.reg(d), self.reg(r));
                let carry = self.sreg & 1;
                let res = rd.wrapping_sub(rr).wrapping_sub(carry);
                self.sreg = flags::sub(self.sreg, rd, rr, res, true);
            }

            // -- Word arithmetic --
            Instr::Adiw { d, k } => {
                let old = u16::from_le_bytes([self.reg(d), self.reg(d + 1)]);
                let res = old.wrapping_add(k.into());
                self.set_reg(d, res as u8);
                self.set_reg(d + 1, (res >> 8) as u8);
                let (old15, res15) = (old & 0x8000 != 0, res & 0x8000 != 0);
                self.sreg = flags::word(self.sreg, res, res15 && !old15, !res15 && old15);
                self.cycles += 1;
            }
            Instr::Sbiw { d, k } => {
                let old = u16::from_le_bytes([self.reg(d), self.reg(d + 1)]);
                let res = old.wrapping_sub(k.into());
                self.set_reg(d, res as u8);
                self.set_reg(d + 1, (res >> 8) as u8);
                let (old15, res15) = (old & 0x8000 != 0, res & 0x8000 != 0);
                self.sreg = flags::word(self.sreg, res, !res15 && old15, res15 && !old15);
                self.cycles += 1;
            }

            // -- Multiply --
            Instr::Mul { d, r } => {
                let p = u16::from(self.reg(d)) * u16::from(self.reg(r));
                self.store_product(p, p);
            }
            Instr::Muls { d, r } => {
                let p = (i16::from(self.reg(d) as i8) * i16::from(self.reg(r) as i8)) as u16;
                self.store_product(p, p);
            }
            Instr::Mulsu { d, r } => {
                let p = (i16::from(self.reg(d) as i8) * i16::from(self.reg(r))) as u16;
                self.store_product(p, p);
            }
            Instr::Fmul { d, r } => {
                let p = u16::from(self.reg(d)) * u16::from(self.reg(r));
                self.store_product(p << 1, p);
            }
            Instr::Fmuls { d, r } => {
                let p = (i16::from(self.reg(d) as i8) * i16::from(self.reg(r) as i8)) as u16;
                self.store_product(p << 1, p);
            }
            Instr::Fmulsu { d, r } => {
                let p = (i16::from(self.reg(d) as i8) * i16::from(self.reg(r))) as u16;
                self.store_product(p << 1, p);
            }

            // -- Data transfer --
            Instr::Mov { d, r } => {
                let value = self.reg(r);
                self.set_reg(d, value);
            }
            Instr::Movw { d, r } => {
                let (lo, hi) = (self.reg(r), self.reg(r + 1));
                self.set_reg(d, lo);
                self.set_reg(d + 1, hi);
            }
            Instr::Ldi { d, k } => self.set_reg(d, k),
            Instr::Lds { d, addr } => {
                let value = self.read_ram(addr)?;
                self.cycles -= 1;
                self.set_reg(d, value);
            }
            Instr::Sts { addr, r } => {
                let value = self.reg(r);
                self.write_ram(addr, value)?;
                self.cycles -= 1;
            }
            Instr::Ld { d, index, mode } => {
                let (addr, retire) = self.indirect_address(index, mode);
                let result = self.read_ram(addr);
                if let Some(updated) = retire {
                    self.set_index_reg(index, updated);
                }
                self.set_reg(d, result?);
            }
            Instr::St { index, mode, r } => {
                let value = self.reg(r);
                let (addr, retire) = self.indirect_address(index, mode);
                let result = self.write_ram(addr, value);
                if let Some(updated) = retire {
                    self.set_index_reg(index, updated);
                }
                result?;
            }
            Instr::Pop { d } => {
                let value = self.pop_byte()?;
                self.set_reg(d, value);
            }
            Instr::Push { r } => {
                let value = self.reg(r);
                self.push_byte(value)?;
            }

            // -- Program-memory loads --
            Instr::Lpm0 => {
                let value = self.read_program_byte(self.z().into())?;
                self.set_reg(0, value);
                self.cycles += 1;
            }
            Instr::Lpm { d, post_inc } => {
                let z = self.z();
                let value = self.read_program_byte(z.into())?;
                self.set_reg(d, value);
                if post_inc {
                    self.set_z(z.wrapping_add(1));
                }
                self.cycles += 1;
            }
            Instr::Elpm0 => {
                self.require_wide_pc()?;
                let addr = (u32::from(self.rampz) << 16) | u32::from(self.z());
                let value = self.read_program_byte(addr)?;
                self.set_reg(0, value);
                self.cycles += 1;
            }
            Instr::Elpm { d, post_inc } => {
                self.require_wide_pc()?;
                let addr = (u32::from(self.rampz) << 16) | u32::from(self.z());
                let value = self.read_program_byte(addr)?;
                self.set_reg(d, value);
                if post_inc {
                    let next = addr.wrapping_add(1) & 0x00FF_FFFF;
                    self.set_z(next as u16);
                    self.rampz = (next >> 16) as u8;
                }
                self.cycles += 1;
            }

            // -- Read-modify-write through Z --
            Instr::Xch { r } => self.z_read_modify_write(r, |rr, _| rr)?,
            Instr::Las { r } => self.z_read_modify_write(r, |rr, old| rr | old)?,
            Instr::Lac { r } => self.z_read_modify_write(r, |rr, old| !rr & old)?,
            Instr::Lat { r } => self.z_read_modify_write(r, |rr, old| rr ^ old)?,

            // -- Shifts and register bits --
            Instr::Lsr { d } => {
                let rd = self.reg(d);
                let res = rd >> 1;
                self.set_reg(d, res);
                self.sreg = flags::shift_right(self.sreg, res, rd & 1 != 0);
            }
            Instr::Asr { d } => {
                let rd = self.reg(d);
                let res = ((rd as i8) >> 1) as u8;
                self.set_reg(d, res);
                self.sreg = flags::shift_right(self.sreg, res, rd & 1 != 0);
            }
            Instr::Ror { d } => {
                let rd = self.reg(d);
                let res = (rd >> 1) | ((self.sreg & 1) << 7);
                self.set_reg(d, res);
                self.sreg = flags::shift_right(self.sreg, res, rd & 1 != 0);
            }
            Instr::Swap { d } => {
                let rd = self.reg(d);
                self.set_reg(d, rd.rotate_left(4));
            }
            Instr::Bst { d, b } => {
                let bit = self.reg(d) & (1 << b) != 0;
                self.set_flag(Flag::T, bit);
            }
            Instr::Bld { d, b } => {
                let mut rd = self.reg(d);
                if self.flag(Flag::T) {
                    rd |= 1 << b;
                } else {
                    rd &= !(1 << b);
                }
                self.set_reg(d, rd);
            }
            Instr::Bset { s } => self.sreg |= 1 << s,
            Instr::Bclr { s } => self.sreg &= !(1 << s),

            // -- I/O --
            Instr::In { d, a } => {
                let value = self.read_io(a)?;
                self.set_reg(d, value);
            }
            Instr::Out { a, r } => {
                let value = self.reg(r);
                self.write_io(a, value)?;
            }
            Instr::Cbi { a, b } => {
                let value = self.read_io(a)?;
                self.write_io(a, value & !(1 << b))?;
                self.cycles += 1;
            }
            Instr::Sbi { a, b } => {
                let value = self.read_io(a)?;
                self.write_io(a, value | (1 << b))?;
                self.cycles += 1;
            }

            // -- Control flow --
            Instr::Rjmp { k } => self.branch_to(k.into()),
            Instr::Rcall { k } => {
                self.push_return_address()?;
                let target = (i64::from(self.pc) + i64::from(k)) as u32;
                self.set_pc(target);
            }
            Instr::Jmp { k } => {
                self.set_pc(k);
                self.cycles += 1;
            }
            Instr::Call { k } => {
                self.push_return_address()?;
                self.set_pc(k);
            }
            Instr::Ijmp => {
                self.set_pc(self.z().into());
                self.cycles += 1;
            }
            Instr::Eijmp => {
                self.require_wide_pc()?;
                self.set_pc((u32::from(self.eind) << 16) | u32::from(self.z()));
                self.cycles += 1;
            }
            Instr::Icall => {
                self.push_return_address()?;
                self.set_pc(self.z().into());
            }
            Instr::Eicall => {
                self.require_wide_pc()?;
                self.push_return_address()?;
                self.set_pc((u32::from(self.eind) << 16) | u32::from(self.z()));
            }
            Instr::Ret => {
                let pc = self.pop_return_address()?;
                self.set_pc(pc);
                self.cycles += 1;
            }
            Instr::Reti => {
                let pc = self.pop_return_address()?;
                self.set_pc(pc);
                self.set_flag(Flag::I, true);
                self.cycles += 1;
            }
            Instr::Brbs { s, k } => {
                if self.sreg & (1 << s) != 0 {
                    self.branch_to(k.into());
                }
            }
            Instr::Brbc { s, k } => {
                if self.sreg & (1 << s) == 0 {
                    self.branch_to(k.into());
                }
            }
            Instr::Cpse { d, r } => {
                if self.reg(d) == self.reg(r) {
                    self.skip_next()?;
                }
            }
            Instr::Sbrc { r, b } => {
                if self.reg(r) & (1 << b) == 0 {
                    self.skip_next()?;
                }
            }
            Instr::Sbrs { r, b } => {
                if self.reg(r) & (1 << b) != 0 {
                    self.skip_next()?;
                }
            }
            Instr::Sbic { a, b } => {
                if self.read_io(a)? & (1 << b) == 0 {
                    self.skip_next()?;
                }
            }
            Instr::Sbis { a, b } => {
                if self.read_io(a)? & (1 << b) != 0 {
                    self.skip_next()?;
                }
            }

            // -- Misc --
            Instr::Sleep => self.asleep = true,
            Instr::Wdr => {}
            Instr::Break => return Err(Fault::BreakInterrupt { pc: op_pc }),
            Instr::Spm | Instr::SpmZInc => {
                return Err(Fault::NotImplemented(RefusedOp::Spm));
            }
            Instr::Des { .. } => return Err(Fault::NotImplemented(RefusedOp::Des)),
            Instr::Unknown(opcode) => match self.policy {
                UnknownOpcodePolicy::Nop => {}
                UnknownOpcodePolicy::Fault | UnknownOpcodePolicy::EmulatePhysical => {
                    return Err(Fault::UnknownOpcode { pc: op_pc, opcode });
                }
            },
        }
        Ok(())
    }

    /// Stores a 16-bit product in R1:R0 and applies the multiply flags.
    /// `carry_from` is the pre-shift product for the fractional forms.
    fn store_product(&mut self, stored: u16, carry_from: u16) {
        self.set_reg(0, stored as u8);
        self.set_reg(1, (stored >> 8) as u8);
        self.sreg = flags::mul(self.sreg, stored, carry_from & 0x8000 != 0);
        self.cycles += 1;
    }

    /// Shared body of `XCH`/`LAS`/`LAC`/`LAT`: the previous memory value
    /// always ends up in the register.
    fn z_read_modify_write(&mut self, r: u8, combine: fn(u8, u8) -> u8) -> Result<(), Fault> {
        let addr = self.z();
        let old = self.read_ram(addr)?;
        let value = self.reg(r);
        self.write_ram(addr, combine(value, old))?;
        self.set_reg(r, old);
        self.cycles -= 1;
        Ok(())
    }
}

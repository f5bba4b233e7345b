//! CPU module - 2A03 (6502 variant) implementation
//!
//! The NES uses a modified 6502 CPU without decimal mode.
//!
//! Every bus access made here is exactly one CPU cycle, including the dummy
//! reads and writes the real chip performs, so instruction timings follow
//! from the access pattern rather than from a cycle table. Interrupt lines
//! are sampled at the end of every cycle; an instruction boundary services
//! whatever was pending one cycle before the instruction ended.

use bitflags::bitflags;
use thiserror::Error;
use tracing::warn;

/// NMI vector
pub const NMI_VECTOR: u16 = 0xFFFA;
/// Reset vector
pub const RESET_VECTOR: u16 = 0xFFFC;
/// IRQ/BRK vector
pub const IRQ_VECTOR: u16 = 0xFFFE;

bitflags! {
    /// CPU status flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct StatusFlags: u8 {
        const CARRY = 0b0000_0001;
        const ZERO = 0b0000_0010;
        const INTERRUPT_DISABLE = 0b0000_0100;
        const DECIMAL = 0b0000_1000;
        const BREAK = 0b0001_0000;
        const UNUSED = 0b0010_0000;
        const OVERFLOW = 0b0100_0000;
        const NEGATIVE = 0b1000_0000;
    }
}

bitflags! {
    /// Interrupt lines
    ///
    /// NMI is edge triggered; every IRQ source is level triggered and stays
    /// asserted until the source acknowledges it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Interrupt: u8 {
        const NMI = 0b0000_0001;
        const IRQ_FRAME = 0b0000_0010;
        const IRQ_DMC = 0b0000_0100;
        const IRQ_MAPPER = 0b0000_1000;
        const IRQ_EXTERNAL = 0b0001_0000;
        const IRQ = Self::IRQ_FRAME.bits()
            | Self::IRQ_DMC.bits()
            | Self::IRQ_MAPPER.bits()
            | Self::IRQ_EXTERNAL.bits();
    }
}

/// CPU execution errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CpuError {
    #[error("illegal opcode ${opcode:02X} at ${address:04X}")]
    IllegalOpcode { opcode: u8, address: u16 },
}

/// Cycle-stealing transfer requested by the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaRequest {
    /// Sprite DMA from CPU page `page` into OAM via $2004
    Oam { page: u8 },
    /// DMC sample byte fetch
    Dmc { address: u16 },
}

/// Memory interface seen by the CPU
///
/// Each `read`/`write` call is one CPU cycle; implementations advance the
/// rest of the machine from inside these calls.
pub trait CpuBus {
    fn read(&mut self, address: u16) -> u8;

    fn write(&mut self, address: u16, value: u8);

    /// Lines currently asserted by devices on the bus
    fn interrupt_lines(&self) -> Interrupt {
        Interrupt::empty()
    }

    /// Pending DMA, serviced before the next CPU read cycle
    fn take_dma_request(&mut self) -> Option<DmaRequest> {
        None
    }

    /// Deliver the byte fetched for a DMC request
    fn complete_dmc_fetch(&mut self, _value: u8) {}
}

/// 2A03 CPU registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuRegisters {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub p: StatusFlags,
    pub sp: u8,
    pub pc: u16,
}

impl Default for CpuRegisters {
    fn default() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            p: StatusFlags::UNUSED | StatusFlags::INTERRUPT_DISABLE,
            sp: 0xFD,
            pc: 0,
        }
    }
}

/// Instruction mnemonics, unofficial ones included
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mnemonic {
    ADC, AND, ASL, BCC, BCS, BEQ, BIT, BMI, BNE, BPL, BRK, BVC, BVS, CLC,
    CLD, CLI, CLV, CMP, CPX, CPY, DEC, DEX, DEY, EOR, INC, INX, INY, JMP,
    JSR, LDA, LDX, LDY, LSR, NOP, ORA, PHA, PHP, PLA, PLP, ROL, ROR, RTI,
    RTS, SBC, SEC, SED, SEI, STA, STX, STY, TAX, TAY, TSX, TXA, TXS, TYA,
    // unofficial
    ALR, ANC, ANE, ARR, AXS, DCP, ISC, JAM, LAS, LAX, LXA, RLA, RRA, SAX,
    SHA, SHX, SHY, SLO, SRE, TAS,
}

/// Addressing modes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndirectX,
    IndirectY,
    Relative,
}

const IMP: Mode = Mode::Implied;
const ACC: Mode = Mode::Accumulator;
const IMM: Mode = Mode::Immediate;
const ZPG: Mode = Mode::ZeroPage;
const ZPX: Mode = Mode::ZeroPageX;
const ZPY: Mode = Mode::ZeroPageY;
const ABS: Mode = Mode::Absolute;
const ABX: Mode = Mode::AbsoluteX;
const ABY: Mode = Mode::AbsoluteY;
const IND: Mode = Mode::Indirect;
const IZX: Mode = Mode::IndirectX;
const IZY: Mode = Mode::IndirectY;
const REL: Mode = Mode::Relative;

use Mnemonic::*;

#[rustfmt::skip]
const MNEMONICS: [Mnemonic; 256] = [
    BRK, ORA, JAM, SLO, NOP, ORA, ASL, SLO, PHP, ORA, ASL, ANC, NOP, ORA, ASL, SLO,
    BPL, ORA, JAM, SLO, NOP, ORA, ASL, SLO, CLC, ORA, NOP, SLO, NOP, ORA, ASL, SLO,
    JSR, AND, JAM, RLA, BIT, AND, ROL, RLA, PLP, AND, ROL, ANC, BIT, AND, ROL, RLA,
    BMI, AND, JAM, RLA, NOP, AND, ROL, RLA, SEC, AND, NOP, RLA, NOP, AND, ROL, RLA,
    RTI, EOR, JAM, SRE, NOP, EOR, LSR, SRE, PHA, EOR, LSR, ALR, JMP, EOR, LSR, SRE,
    BVC, EOR, JAM, SRE, NOP, EOR, LSR, SRE, CLI, EOR, NOP, SRE, NOP, EOR, LSR, SRE,
    RTS, ADC, JAM, RRA, NOP, ADC, ROR, RRA, PLA, ADC, ROR, ARR, JMP, ADC, ROR, RRA,
    BVS, ADC, JAM, RRA, NOP, ADC, ROR, RRA, SEI, ADC, NOP, RRA, NOP, ADC, ROR, RRA,
    NOP, STA, NOP, SAX, STY, STA, STX, SAX, DEY, NOP, TXA, ANE, STY, STA, STX, SAX,
    BCC, STA, JAM, SHA, STY, STA, STX, SAX, TYA, STA, TXS, TAS, SHY, STA, SHX, SHA,
    LDY, LDA, LDX, LAX, LDY, LDA, LDX, LAX, TAY, LDA, TAX, LXA, LDY, LDA, LDX, LAX,
    BCS, LDA, JAM, LAX, LDY, LDA, LDX, LAX, CLV, LDA, TSX, LAS, LDY, LDA, LDX, LAX,
    CPY, CMP, NOP, DCP, CPY, CMP, DEC, DCP, INY, CMP, DEX, AXS, CPY, CMP, DEC, DCP,
    BNE, CMP, JAM, DCP, NOP, CMP, DEC, DCP, CLD, CMP, NOP, DCP, NOP, CMP, DEC, DCP,
    CPX, SBC, NOP, ISC, CPX, SBC, INC, ISC, INX, SBC, NOP, SBC, CPX, SBC, INC, ISC,
    BEQ, SBC, JAM, ISC, NOP, SBC, INC, ISC, SED, SBC, NOP, ISC, NOP, SBC, INC, ISC,
];

#[rustfmt::skip]
const MODES: [Mode; 256] = [
    IMP, IZX, IMP, IZX, ZPG, ZPG, ZPG, ZPG, IMP, IMM, ACC, IMM, ABS, ABS, ABS, ABS,
    REL, IZY, IMP, IZY, ZPX, ZPX, ZPX, ZPX, IMP, ABY, IMP, ABY, ABX, ABX, ABX, ABX,
    ABS, IZX, IMP, IZX, ZPG, ZPG, ZPG, ZPG, IMP, IMM, ACC, IMM, ABS, ABS, ABS, ABS,
    REL, IZY, IMP, IZY, ZPX, ZPX, ZPX, ZPX, IMP, ABY, IMP, ABY, ABX, ABX, ABX, ABX,
    IMP, IZX, IMP, IZX, ZPG, ZPG, ZPG, ZPG, IMP, IMM, ACC, IMM, ABS, ABS, ABS, ABS,
    REL, IZY, IMP, IZY, ZPX, ZPX, ZPX, ZPX, IMP, ABY, IMP, ABY, ABX, ABX, ABX, ABX,
    IMP, IZX, IMP, IZX, ZPG, ZPG, ZPG, ZPG, IMP, IMM, ACC, IMM, IND, ABS, ABS, ABS,
    REL, IZY, IMP, IZY, ZPX, ZPX, ZPX, ZPX, IMP, ABY, IMP, ABY, ABX, ABX, ABX, ABX,
    IMM, IZX, IMM, IZX, ZPG, ZPG, ZPG, ZPG, IMP, IMM, IMP, IMM, ABS, ABS, ABS, ABS,
    REL, IZY, IMP, IZY, ZPX, ZPX, ZPY, ZPY, IMP, ABY, IMP, ABY, ABX, ABX, ABY, ABY,
    IMM, IZX, IMM, IZX, ZPG, ZPG, ZPG, ZPG, IMP, IMM, IMP, IMM, ABS, ABS, ABS, ABS,
    REL, IZY, IMP, IZY, ZPX, ZPX, ZPY, ZPY, IMP, ABY, IMP, ABY, ABX, ABX, ABY, ABY,
    IMM, IZX, IMM, IZX, ZPG, ZPG, ZPG, ZPG, IMP, IMM, IMP, IMM, ABS, ABS, ABS, ABS,
    REL, IZY, IMP, IZY, ZPX, ZPX, ZPX, ZPX, IMP, ABY, IMP, ABY, ABX, ABX, ABX, ABX,
    IMM, IZX, IMM, IZX, ZPG, ZPG, ZPG, ZPG, IMP, IMM, IMP, IMM, ABS, ABS, ABS, ABS,
    REL, IZY, IMP, IZY, ZPX, ZPX, ZPX, ZPX, IMP, ABY, IMP, ABY, ABX, ABX, ABX, ABX,
];

/// Decode an opcode byte
pub fn decode(opcode: u8) -> (Mnemonic, Mode) {
    (MNEMONICS[opcode as usize], MODES[opcode as usize])
}

/// Whether an opcode belongs to the documented instruction set
pub fn is_official(opcode: u8) -> bool {
    match MNEMONICS[opcode as usize] {
        NOP => opcode == 0xEA,
        SBC => opcode != 0xEB,
        ALR | ANC | ANE | ARR | AXS | DCP | ISC | JAM | LAS | LAX | LXA | RLA | RRA | SAX
        | SHA | SHX | SHY | SLO | SRE | TAS => false,
        _ => true,
    }
}

/// Instruction length in bytes for a mode
pub fn operand_length(mode: Mode) -> u16 {
    match mode {
        Mode::Implied | Mode::Accumulator => 0,
        Mode::Immediate
        | Mode::ZeroPage
        | Mode::ZeroPageX
        | Mode::ZeroPageY
        | Mode::IndirectX
        | Mode::IndirectY
        | Mode::Relative => 1,
        Mode::Absolute | Mode::AbsoluteX | Mode::AbsoluteY | Mode::Indirect => 2,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Read,
    Write,
}

/// 2A03 CPU
#[derive(Debug, Clone)]
pub struct Cpu {
    registers: CpuRegisters,
    cycles: u64,
    /// Fail on unofficial opcodes instead of executing them
    strict: bool,
    jammed: bool,
    /// IRQ/NMI raised directly on the CPU rather than through the bus
    requested: Interrupt,
    nmi_line: bool,
    need_nmi: bool,
    prev_need_nmi: bool,
    run_irq: bool,
    prev_run_irq: bool,
}

impl Cpu {
    /// Create a new CPU in its power-up register state
    pub fn new() -> Self {
        Self {
            registers: CpuRegisters::default(),
            cycles: 0,
            strict: false,
            jammed: false,
            requested: Interrupt::empty(),
            nmi_line: false,
            need_nmi: false,
            prev_need_nmi: false,
            run_irq: false,
            prev_run_irq: false,
        }
    }

    /// Reject unofficial opcodes with [`CpuError::IllegalOpcode`]
    pub fn set_strict(&mut self, strict: bool) {
        self.strict = strict;
    }

    /// Get CPU registers
    pub fn registers(&self) -> &CpuRegisters {
        &self.registers
    }

    /// Get mutable CPU registers
    pub fn registers_mut(&mut self) -> &mut CpuRegisters {
        &mut self.registers
    }

    /// Total elapsed cycles
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Whether a JAM opcode has halted the CPU
    pub fn is_jammed(&self) -> bool {
        self.jammed
    }

    /// Power-up: clear registers, then run the reset sequence
    pub fn power_on<B: CpuBus + ?Sized>(&mut self, bus: &mut B) {
        let strict = self.strict;
        *self = Self::new();
        self.strict = strict;
        self.registers.sp = 0x00;
        self.reset(bus);
    }

    /// Run the 7-cycle reset sequence and load PC from the reset vector
    pub fn reset<B: CpuBus + ?Sized>(&mut self, bus: &mut B) {
        self.jammed = false;
        self.requested = Interrupt::empty();
        self.need_nmi = false;
        self.prev_need_nmi = false;
        self.run_irq = false;
        self.prev_run_irq = false;

        let pc = self.registers.pc;
        self.read(bus, pc);
        self.read(bus, pc);
        // The three stack pushes happen with the write line held high
        for _ in 0..3 {
            self.read(bus, 0x0100 | self.registers.sp as u16);
            self.registers.sp = self.registers.sp.wrapping_sub(1);
        }
        self.registers.p.insert(StatusFlags::INTERRUPT_DISABLE);
        self.registers.pc = self.read_word(bus, RESET_VECTOR);
    }

    /// Assert an interrupt: NMI latches an edge, IRQ kinds stay raised until cleared
    pub fn request_interrupt(&mut self, interrupt: Interrupt) {
        if interrupt.contains(Interrupt::NMI) {
            self.need_nmi = true;
        }
        self.requested |= interrupt & Interrupt::IRQ;
    }

    /// Drop IRQ kinds raised with [`Cpu::request_interrupt`]
    pub fn clear_interrupt(&mut self, interrupt: Interrupt) {
        self.requested.remove(interrupt);
    }

    /// Execute one instruction or interrupt sequence, returning the cycles consumed
    pub fn step<B: CpuBus + ?Sized>(&mut self, bus: &mut B) -> Result<u32, CpuError> {
        let start = self.cycles;

        if self.jammed {
            self.read(bus, 0xFFFF);
            return Ok(1);
        }

        if self.prev_need_nmi || self.prev_run_irq {
            self.interrupt_sequence(bus);
            return Ok((self.cycles - start) as u32);
        }

        let address = self.registers.pc;
        let opcode = self.fetch(bus);
        if self.strict && !is_official(opcode) {
            self.registers.pc = address;
            return Err(CpuError::IllegalOpcode { opcode, address });
        }
        self.execute(bus, opcode);
        Ok((self.cycles - start) as u32)
    }

    // ---- cycle primitives ----

    fn read<B: CpuBus + ?Sized>(&mut self, bus: &mut B, address: u16) -> u8 {
        while let Some(request) = bus.take_dma_request() {
            self.run_dma(bus, request, address);
        }
        let value = bus.read(address);
        self.end_cycle(bus);
        value
    }

    fn write<B: CpuBus + ?Sized>(&mut self, bus: &mut B, address: u16, value: u8) {
        bus.write(address, value);
        self.end_cycle(bus);
    }

    fn end_cycle<B: CpuBus + ?Sized>(&mut self, bus: &B) {
        self.cycles += 1;
        let lines = bus.interrupt_lines() | self.requested;

        self.prev_need_nmi = self.need_nmi;
        let nmi = lines.contains(Interrupt::NMI);
        if nmi && !self.nmi_line {
            self.need_nmi = true;
        }
        self.nmi_line = nmi;

        self.prev_run_irq = self.run_irq;
        self.run_irq = lines.intersects(Interrupt::IRQ)
            && !self.registers.p.contains(StatusFlags::INTERRUPT_DISABLE);
    }

    fn run_dma<B: CpuBus + ?Sized>(&mut self, bus: &mut B, request: DmaRequest, halted_at: u16) {
        let stall = |cpu: &mut Self, bus: &mut B| {
            bus.read(halted_at);
            cpu.end_cycle(bus);
        };
        match request {
            DmaRequest::Oam { page } => {
                stall(self, bus);
                if self.cycles & 1 == 1 {
                    stall(self, bus);
                }
                let base = (page as u16) << 8;
                for offset in 0..256u16 {
                    let value = bus.read(base + offset);
                    self.end_cycle(bus);
                    bus.write(0x2004, value);
                    self.end_cycle(bus);
                }
            }
            DmaRequest::Dmc { address } => {
                for _ in 0..3 {
                    stall(self, bus);
                }
                let value = bus.read(address);
                self.end_cycle(bus);
                bus.complete_dmc_fetch(value);
            }
        }
    }

    fn fetch<B: CpuBus + ?Sized>(&mut self, bus: &mut B) -> u8 {
        let value = self.read(bus, self.registers.pc);
        self.registers.pc = self.registers.pc.wrapping_add(1);
        value
    }

    fn fetch_word<B: CpuBus + ?Sized>(&mut self, bus: &mut B) -> u16 {
        let lo = self.fetch(bus) as u16;
        let hi = self.fetch(bus) as u16;
        (hi << 8) | lo
    }

    fn read_word<B: CpuBus + ?Sized>(&mut self, bus: &mut B, address: u16) -> u16 {
        let lo = self.read(bus, address) as u16;
        let hi = self.read(bus, address.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    fn dummy_read_pc<B: CpuBus + ?Sized>(&mut self, bus: &mut B) {
        self.read(bus, self.registers.pc);
    }

    fn push<B: CpuBus + ?Sized>(&mut self, bus: &mut B, value: u8) {
        self.write(bus, 0x0100 | self.registers.sp as u16, value);
        self.registers.sp = self.registers.sp.wrapping_sub(1);
    }

    fn pull<B: CpuBus + ?Sized>(&mut self, bus: &mut B) -> u8 {
        self.registers.sp = self.registers.sp.wrapping_add(1);
        self.read(bus, 0x0100 | self.registers.sp as u16)
    }

    fn push_word<B: CpuBus + ?Sized>(&mut self, bus: &mut B, value: u16) {
        self.push(bus, (value >> 8) as u8);
        self.push(bus, value as u8);
    }

    // ---- addressing ----

    /// Resolve an operand address, returning (effective, unindexed base)
    fn resolve<B: CpuBus + ?Sized>(&mut self, bus: &mut B, mode: Mode, access: Access) -> (u16, u16) {
        match mode {
            Mode::Immediate => {
                let address = self.registers.pc;
                self.registers.pc = self.registers.pc.wrapping_add(1);
                (address, address)
            }
            Mode::ZeroPage => {
                let address = self.fetch(bus) as u16;
                (address, address)
            }
            Mode::ZeroPageX | Mode::ZeroPageY => {
                let base = self.fetch(bus);
                self.read(bus, base as u16);
                let index = if mode == Mode::ZeroPageX {
                    self.registers.x
                } else {
                    self.registers.y
                };
                (base.wrapping_add(index) as u16, base as u16)
            }
            Mode::Absolute => {
                let address = self.fetch_word(bus);
                (address, address)
            }
            Mode::AbsoluteX => {
                let base = self.fetch_word(bus);
                self.index(bus, base, self.registers.x, access)
            }
            Mode::AbsoluteY => {
                let base = self.fetch_word(bus);
                self.index(bus, base, self.registers.y, access)
            }
            Mode::IndirectX => {
                let pointer = self.fetch(bus);
                self.read(bus, pointer as u16);
                let pointer = pointer.wrapping_add(self.registers.x);
                let lo = self.read(bus, pointer as u16) as u16;
                let hi = self.read(bus, pointer.wrapping_add(1) as u16) as u16;
                let address = (hi << 8) | lo;
                (address, address)
            }
            Mode::IndirectY => {
                let pointer = self.fetch(bus);
                let lo = self.read(bus, pointer as u16) as u16;
                let hi = self.read(bus, pointer.wrapping_add(1) as u16) as u16;
                self.index(bus, (hi << 8) | lo, self.registers.y, access)
            }
            Mode::Indirect => {
                let pointer = self.fetch_word(bus);
                let lo = self.read(bus, pointer) as u16;
                // The high byte never carries into the next page
                let hi = self.read(bus, (pointer & 0xFF00) | (pointer.wrapping_add(1) & 0x00FF)) as u16;
                let address = (hi << 8) | lo;
                (address, address)
            }
            Mode::Implied | Mode::Accumulator | Mode::Relative => {
                unreachable!("{mode:?} has no operand address")
            }
        }
    }

    fn index<B: CpuBus + ?Sized>(&mut self, bus: &mut B, base: u16, offset: u8, access: Access) -> (u16, u16) {
        let address = base.wrapping_add(offset as u16);
        if (base ^ address) & 0xFF00 != 0 || access == Access::Write {
            self.read(bus, (base & 0xFF00) | (address & 0x00FF));
        }
        (address, base)
    }

    // ---- execution ----

    fn execute<B: CpuBus + ?Sized>(&mut self, bus: &mut B, opcode: u8) {
        let (mnemonic, mode) = decode(opcode);
        match mnemonic {
            // loads, arithmetic and other read instructions
            LDA | LDX | LDY | ADC | SBC | AND | ORA | EOR | CMP | CPX | CPY | BIT | LAX | ANC
            | ALR | ARR | ANE | LXA | AXS | LAS => {
                let (address, _) = self.resolve(bus, mode, Access::Read);
                let value = self.read(bus, address);
                self.read_op(mnemonic, value);
            }
            NOP => {
                if mode == Mode::Implied {
                    self.dummy_read_pc(bus);
                } else {
                    let (address, _) = self.resolve(bus, mode, Access::Read);
                    self.read(bus, address);
                }
            }

            STA | STX | STY | SAX => {
                let (address, _) = self.resolve(bus, mode, Access::Write);
                let value = match mnemonic {
                    STA => self.registers.a,
                    STX => self.registers.x,
                    STY => self.registers.y,
                    _ => self.registers.a & self.registers.x,
                };
                self.write(bus, address, value);
            }
            SHA | SHX | SHY | TAS => {
                let (address, base) = self.resolve(bus, mode, Access::Write);
                let source = match mnemonic {
                    SHA => self.registers.a & self.registers.x,
                    SHX => self.registers.x,
                    SHY => self.registers.y,
                    _ => {
                        self.registers.sp = self.registers.a & self.registers.x;
                        self.registers.sp
                    }
                };
                let value = source & ((base >> 8) as u8).wrapping_add(1);
                let address = if (base ^ address) & 0xFF00 != 0 {
                    ((value as u16) << 8) | (address & 0x00FF)
                } else {
                    address
                };
                self.write(bus, address, value);
            }

            ASL | LSR | ROL | ROR | INC | DEC | SLO | RLA | SRE | RRA | DCP | ISC => {
                if mode == Mode::Accumulator {
                    self.dummy_read_pc(bus);
                    self.registers.a = self.modify(mnemonic, self.registers.a);
                } else {
                    let (address, _) = self.resolve(bus, mode, Access::Write);
                    let value = self.read(bus, address);
                    self.write(bus, address, value);
                    let result = self.modify(mnemonic, value);
                    self.write(bus, address, result);
                }
            }

            BCC => self.branch(bus, !self.flag(StatusFlags::CARRY)),
            BCS => self.branch(bus, self.flag(StatusFlags::CARRY)),
            BNE => self.branch(bus, !self.flag(StatusFlags::ZERO)),
            BEQ => self.branch(bus, self.flag(StatusFlags::ZERO)),
            BPL => self.branch(bus, !self.flag(StatusFlags::NEGATIVE)),
            BMI => self.branch(bus, self.flag(StatusFlags::NEGATIVE)),
            BVC => self.branch(bus, !self.flag(StatusFlags::OVERFLOW)),
            BVS => self.branch(bus, self.flag(StatusFlags::OVERFLOW)),

            JMP => {
                let (address, _) = self.resolve(bus, mode, Access::Read);
                self.registers.pc = address;
            }
            JSR => {
                let lo = self.fetch(bus) as u16;
                self.read(bus, 0x0100 | self.registers.sp as u16);
                self.push_word(bus, self.registers.pc);
                let hi = self.read(bus, self.registers.pc) as u16;
                self.registers.pc = (hi << 8) | lo;
            }
            RTS => {
                self.dummy_read_pc(bus);
                self.read(bus, 0x0100 | self.registers.sp as u16);
                let lo = self.pull(bus) as u16;
                let hi = self.pull(bus) as u16;
                self.registers.pc = (hi << 8) | lo;
                self.dummy_read_pc(bus);
                self.registers.pc = self.registers.pc.wrapping_add(1);
            }
            RTI => {
                self.dummy_read_pc(bus);
                self.read(bus, 0x0100 | self.registers.sp as u16);
                let p = self.pull(bus);
                self.set_status(p);
                let lo = self.pull(bus) as u16;
                let hi = self.pull(bus) as u16;
                self.registers.pc = (hi << 8) | lo;
            }
            BRK => {
                self.fetch(bus);
                self.push_word(bus, self.registers.pc);
                let vector = self.take_vector();
                let p = self.registers.p | StatusFlags::BREAK | StatusFlags::UNUSED;
                self.push(bus, p.bits());
                self.registers.p.insert(StatusFlags::INTERRUPT_DISABLE);
                self.registers.pc = self.read_word(bus, vector);
                // An NMI that hijacked the vector must not fire again right away
                self.prev_need_nmi = false;
            }

            PHA => {
                self.dummy_read_pc(bus);
                self.push(bus, self.registers.a);
            }
            PHP => {
                self.dummy_read_pc(bus);
                let p = self.registers.p | StatusFlags::BREAK | StatusFlags::UNUSED;
                self.push(bus, p.bits());
            }
            PLA => {
                self.dummy_read_pc(bus);
                self.read(bus, 0x0100 | self.registers.sp as u16);
                self.registers.a = self.pull(bus);
                self.set_zn(self.registers.a);
            }
            PLP => {
                self.dummy_read_pc(bus);
                self.read(bus, 0x0100 | self.registers.sp as u16);
                let p = self.pull(bus);
                self.set_status(p);
            }

            JAM => {
                warn!(opcode, pc = self.registers.pc.wrapping_sub(1), "cpu jammed");
                self.jammed = true;
            }

            // remaining implied instructions
            _ => {
                self.dummy_read_pc(bus);
                self.implied_op(mnemonic);
            }
        }
    }

    fn read_op(&mut self, mnemonic: Mnemonic, value: u8) {
        let r = &mut self.registers;
        match mnemonic {
            LDA => {
                r.a = value;
                self.set_zn(value);
            }
            LDX => {
                r.x = value;
                self.set_zn(value);
            }
            LDY => {
                r.y = value;
                self.set_zn(value);
            }
            LAX => {
                r.a = value;
                r.x = value;
                self.set_zn(value);
            }
            ADC => self.adc(value),
            SBC => self.adc(!value),
            AND => {
                r.a &= value;
                self.set_zn(self.registers.a);
            }
            ORA => {
                r.a |= value;
                self.set_zn(self.registers.a);
            }
            EOR => {
                r.a ^= value;
                self.set_zn(self.registers.a);
            }
            CMP => self.compare(self.registers.a, value),
            CPX => self.compare(self.registers.x, value),
            CPY => self.compare(self.registers.y, value),
            BIT => {
                let a = r.a;
                r.p.set(StatusFlags::ZERO, a & value == 0);
                r.p.set(StatusFlags::OVERFLOW, value & 0x40 != 0);
                r.p.set(StatusFlags::NEGATIVE, value & 0x80 != 0);
            }
            ANC => {
                r.a &= value;
                let a = r.a;
                self.set_zn(a);
                self.registers.p.set(StatusFlags::CARRY, a & 0x80 != 0);
            }
            ALR => {
                let a = r.a & value;
                self.registers.a = self.modify(LSR, a);
            }
            ARR => {
                let carry = r.p.contains(StatusFlags::CARRY) as u8;
                let a = ((r.a & value) >> 1) | (carry << 7);
                r.a = a;
                self.set_zn(a);
                self.registers.p.set(StatusFlags::CARRY, a & 0x40 != 0);
                self.registers
                    .p
                    .set(StatusFlags::OVERFLOW, ((a >> 6) ^ (a >> 5)) & 1 != 0);
            }
            ANE => {
                r.a = (r.a | 0xEE) & r.x & value;
                self.set_zn(self.registers.a);
            }
            LXA => {
                let a = (r.a | 0xEE) & value;
                r.a = a;
                r.x = a;
                self.set_zn(a);
            }
            AXS => {
                let masked = r.a & r.x;
                r.x = masked.wrapping_sub(value);
                r.p.set(StatusFlags::CARRY, masked >= value);
                self.set_zn(self.registers.x);
            }
            LAS => {
                let result = value & r.sp;
                r.a = result;
                r.x = result;
                r.sp = result;
                self.set_zn(result);
            }
            _ => unreachable!("{mnemonic:?} is not a read instruction"),
        }
    }

    /// Read-modify-write core, also used for the accumulator forms
    fn modify(&mut self, mnemonic: Mnemonic, value: u8) -> u8 {
        let carry_in = self.flag(StatusFlags::CARRY) as u8;
        let result = match mnemonic {
            ASL | SLO => {
                self.registers.p.set(StatusFlags::CARRY, value & 0x80 != 0);
                value << 1
            }
            LSR | SRE => {
                self.registers.p.set(StatusFlags::CARRY, value & 0x01 != 0);
                value >> 1
            }
            ROL | RLA => {
                self.registers.p.set(StatusFlags::CARRY, value & 0x80 != 0);
                (value << 1) | carry_in
            }
            ROR | RRA => {
                self.registers.p.set(StatusFlags::CARRY, value & 0x01 != 0);
                (value >> 1) | (carry_in << 7)
            }
            INC | ISC => value.wrapping_add(1),
            DEC | DCP => value.wrapping_sub(1),
            _ => unreachable!("{mnemonic:?} is not a read-modify-write instruction"),
        };
        match mnemonic {
            SLO => self.read_op(ORA, result),
            RLA => self.read_op(AND, result),
            SRE => self.read_op(EOR, result),
            RRA => self.adc(result),
            DCP => self.compare(self.registers.a, result),
            ISC => self.adc(!result),
            _ => self.set_zn(result),
        }
        result
    }

    fn implied_op(&mut self, mnemonic: Mnemonic) {
        let r = &mut self.registers;
        match mnemonic {
            CLC => r.p.remove(StatusFlags::CARRY),
            SEC => r.p.insert(StatusFlags::CARRY),
            CLI => r.p.remove(StatusFlags::INTERRUPT_DISABLE),
            SEI => r.p.insert(StatusFlags::INTERRUPT_DISABLE),
            CLD => r.p.remove(StatusFlags::DECIMAL),
            SED => r.p.insert(StatusFlags::DECIMAL),
            CLV => r.p.remove(StatusFlags::OVERFLOW),
            TAX => {
                r.x = r.a;
                self.set_zn(self.registers.x);
            }
            TAY => {
                r.y = r.a;
                self.set_zn(self.registers.y);
            }
            TXA => {
                r.a = r.x;
                self.set_zn(self.registers.a);
            }
            TYA => {
                r.a = r.y;
                self.set_zn(self.registers.a);
            }
            TSX => {
                r.x = r.sp;
                self.set_zn(self.registers.x);
            }
            TXS => r.sp = r.x,
            INX => {
                r.x = r.x.wrapping_add(1);
                self.set_zn(self.registers.x);
            }
            INY => {
                r.y = r.y.wrapping_add(1);
                self.set_zn(self.registers.y);
            }
            DEX => {
                r.x = r.x.wrapping_sub(1);
                self.set_zn(self.registers.x);
            }
            DEY => {
                r.y = r.y.wrapping_sub(1);
                self.set_zn(self.registers.y);
            }
            _ => unreachable!("{mnemonic:?} is not an implied instruction"),
        }
    }

    fn branch<B: CpuBus + ?Sized>(&mut self, bus: &mut B, taken: bool) {
        let offset = self.fetch(bus) as i8;
        if !taken {
            return;
        }
        // A taken branch that stays on its page does not poll IRQ on its last cycle
        if self.run_irq && !self.prev_run_irq {
            self.run_irq = false;
        }
        self.dummy_read_pc(bus);
        let pc = self.registers.pc;
        let target = pc.wrapping_add(offset as i16 as u16);
        if (pc ^ target) & 0xFF00 != 0 {
            self.read(bus, (pc & 0xFF00) | (target & 0x00FF));
        }
        self.registers.pc = target;
    }

    fn interrupt_sequence<B: CpuBus + ?Sized>(&mut self, bus: &mut B) {
        self.dummy_read_pc(bus);
        self.dummy_read_pc(bus);
        self.push_word(bus, self.registers.pc);
        let vector = self.take_vector();
        let p = (self.registers.p | StatusFlags::UNUSED) - StatusFlags::BREAK;
        self.push(bus, p.bits());
        self.registers.p.insert(StatusFlags::INTERRUPT_DISABLE);
        self.registers.pc = self.read_word(bus, vector);
    }

    /// Pick the vector for BRK/IRQ, letting a pending NMI take over
    fn take_vector(&mut self) -> u16 {
        if self.need_nmi {
            self.need_nmi = false;
            NMI_VECTOR
        } else {
            IRQ_VECTOR
        }
    }

    // ---- flags and ALU ----

    fn flag(&self, flag: StatusFlags) -> bool {
        self.registers.p.contains(flag)
    }

    fn set_status(&mut self, value: u8) {
        self.registers.p =
            (StatusFlags::from_bits_truncate(value) | StatusFlags::UNUSED) - StatusFlags::BREAK;
    }

    fn set_zn(&mut self, value: u8) {
        self.registers.p.set(StatusFlags::ZERO, value == 0);
        self.registers.p.set(StatusFlags::NEGATIVE, value & 0x80 != 0);
    }

    fn adc(&mut self, value: u8) {
        let a = self.registers.a;
        let sum = a as u16 + value as u16 + self.flag(StatusFlags::CARRY) as u16;
        let result = sum as u8;
        self.registers.p.set(StatusFlags::CARRY, sum > 0xFF);
        self.registers
            .p
            .set(StatusFlags::OVERFLOW, (!(a ^ value) & (a ^ result) & 0x80) != 0);
        self.registers.a = result;
        self.set_zn(result);
    }

    fn compare(&mut self, register: u8, value: u8) {
        self.registers.p.set(StatusFlags::CARRY, register >= value);
        self.set_zn(register.wrapping_sub(value));
    }
}

impl Default for Cpu {
    fn default() -> Self {
        Self::new()
    }
}

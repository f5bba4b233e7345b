//! CPU tests: cycle counts, bus side effects and interrupt timing

use rnes_core::cpu::{Cpu, CpuBus, Interrupt, StatusFlags};
use rnes_core::testing::FlatMemory;

fn boot(program: &[u8]) -> (Cpu, FlatMemory) {
    let mut memory = FlatMemory::with_program(0x8000, program);
    let mut cpu = Cpu::new();
    cpu.power_on(&mut memory);
    (cpu, memory)
}

fn step_cycles(cpu: &mut Cpu, memory: &mut FlatMemory, count: usize) -> Vec<u32> {
    (0..count).map(|_| cpu.step(memory).unwrap()).collect()
}

/// Bus that records every access
struct RecordingBus {
    memory: FlatMemory,
    reads: Vec<u16>,
}

impl CpuBus for RecordingBus {
    fn read(&mut self, address: u16) -> u8 {
        self.reads.push(address);
        self.memory.read(address)
    }

    fn write(&mut self, address: u16, value: u8) {
        self.memory.write(address, value);
    }
}

#[test]
fn test_indexed_cycle_counts() {
    let (mut cpu, mut memory) = boot(&[
        0xA2, 0x01, // LDX #$01
        0xBD, 0xFF, 0x10, // LDA $10FF,X  (page cross)
        0xBD, 0x00, 0x10, // LDA $1000,X
        0x9D, 0x00, 0x10, // STA $1000,X
        0xFE, 0x00, 0x10, // INC $1000,X
        0xB9, 0xFF, 0x10, // LDA $10FF,Y  (no cross, Y=0)
    ]);
    assert_eq!(step_cycles(&mut cpu, &mut memory, 6), [2, 5, 4, 5, 7, 4]);
}

#[test]
fn test_subroutine_and_stack_cycles() {
    let (mut cpu, mut memory) = boot(&[
        0x20, 0x00, 0x90, // JSR $9000
        0x48, // PHA
        0x68, // PLA
        0x08, // PHP
    ]);
    memory.load(0x9000, &[0x60]); // RTS
    assert_eq!(step_cycles(&mut cpu, &mut memory, 5), [6, 6, 3, 4, 3]);
    // PHP pushes B and the unused bit; Z is set by PLA of zero
    assert_eq!(memory.peek(0x01FD), 0x36);
}

#[test]
fn test_branch_cycles() {
    let mut memory = FlatMemory::with_program(0x80F0, &[
        0xA9, 0x00, // LDA #$00
        0xD0, 0x10, // BNE (not taken)
        0xF0, 0x00, // BEQ +0 (taken, same page)
        0xF0, 0x20, // BEQ +$20 (taken, crosses to $8118)
    ]);
    let mut cpu = Cpu::new();
    cpu.power_on(&mut memory);
    assert_eq!(step_cycles(&mut cpu, &mut memory, 4), [2, 2, 3, 4]);
    assert_eq!(cpu.registers().pc, 0x8118);
}

#[test]
fn test_total_cycles_after_fixed_sequence() {
    let (mut cpu, mut memory) = boot(&[
        0xA9, 0x10, // LDA #$10       2
        0x85, 0x20, // STA $20        3
        0xE6, 0x20, // INC $20        5
        0xA6, 0x20, // LDX $20        3
        0xCA, // DEX                  2
        0xD0, 0xFD, // BNE -3         3 taken, 2 on exit
        0xEA, // NOP                  2
    ]);
    while cpu.registers().pc != 0x800C {
        cpu.step(&mut memory).unwrap();
    }
    assert_eq!(cpu.registers().x, 0);
    let loop_cycles = 17 * 2 + 16 * 3 + 2;
    assert_eq!(cpu.cycles(), 7 + 2 + 3 + 5 + 3 + loop_cycles + 2);
}

#[test]
fn test_indirect_indexed_dummy_read_on_page_cross() {
    let mut memory = FlatMemory::with_program(0x8000, &[
        0xA0, 0x01, // LDY #$01
        0xB1, 0x10, // LDA ($10),Y
    ]);
    memory.load(0x0010, &[0xFF, 0x10]);
    memory.load(0x1100, &[0x77]);
    let mut bus = RecordingBus { memory, reads: Vec::new() };
    let mut cpu = Cpu::new();
    cpu.power_on(&mut bus);
    cpu.step(&mut bus).unwrap();
    bus.reads.clear();
    assert_eq!(cpu.step(&mut bus).unwrap(), 6);
    assert_eq!(bus.reads, [0x8002, 0x8003, 0x0010, 0x0011, 0x1000, 0x1100]);
    assert_eq!(cpu.registers().a, 0x77);
}

#[test]
fn test_jmp_indirect_page_wrap() {
    let (mut cpu, mut memory) = boot(&[0x6C, 0xFF, 0x10]);
    memory.load(0x10FF, &[0x34]);
    memory.load(0x1000, &[0x12]);
    memory.load(0x1100, &[0x56]);
    assert_eq!(cpu.step(&mut memory).unwrap(), 5);
    assert_eq!(cpu.registers().pc, 0x1234);
}

#[test]
fn test_nmi_is_edge_triggered() {
    let (mut cpu, mut memory) = boot(&[0xEA; 16]);
    memory.load(0xFFFA, &[0x00, 0x90]);
    memory.load(0x9000, &[0xEA; 16]);

    memory.set_interrupt_lines(Interrupt::NMI);
    assert_eq!(cpu.step(&mut memory).unwrap(), 2);
    assert_eq!(cpu.step(&mut memory).unwrap(), 7);
    assert_eq!(cpu.registers().pc, 0x9000);
    assert_eq!(cpu.registers().sp, 0xFA);
    // Line still held: no second NMI
    step_cycles(&mut cpu, &mut memory, 4);
    assert_eq!(cpu.registers().pc, 0x9004);
}

#[test]
fn test_irq_waits_one_instruction_after_cli() {
    let (mut cpu, mut memory) = boot(&[
        0xEA, // NOP
        0x58, // CLI
        0xEA, // NOP
        0xEA, // NOP
    ]);
    memory.load(0xFFFE, &[0x00, 0x90]);
    memory.set_interrupt_lines(Interrupt::IRQ_EXTERNAL);

    step_cycles(&mut cpu, &mut memory, 3);
    assert_eq!(cpu.registers().pc, 0x8003);
    assert_eq!(cpu.step(&mut memory).unwrap(), 7);
    assert_eq!(cpu.registers().pc, 0x9000);
    assert!(cpu.registers().p.contains(StatusFlags::INTERRUPT_DISABLE));
    // return address and flags with B clear
    assert_eq!(memory.peek(0x01FD), 0x80);
    assert_eq!(memory.peek(0x01FC), 0x03);
    assert_eq!(memory.peek(0x01FB) & 0x30, 0x20);
}

#[test]
fn test_masked_irq_is_ignored() {
    let (mut cpu, mut memory) = boot(&[0xEA; 8]);
    memory.set_interrupt_lines(Interrupt::IRQ_MAPPER);
    step_cycles(&mut cpu, &mut memory, 4);
    assert_eq!(cpu.registers().pc, 0x8004);
}

#[test]
fn test_requested_nmi() {
    let (mut cpu, mut memory) = boot(&[0xEA; 8]);
    memory.load(0xFFFA, &[0x00, 0xA0]);
    cpu.request_interrupt(Interrupt::NMI);
    cpu.step(&mut memory).unwrap();
    cpu.step(&mut memory).unwrap();
    assert_eq!(cpu.registers().pc, 0xA000);
}

#[test]
fn test_brk_pushes_break_flag() {
    let (mut cpu, mut memory) = boot(&[0x00, 0x00]);
    memory.load(0xFFFE, &[0x00, 0x90]);
    assert_eq!(cpu.step(&mut memory).unwrap(), 7);
    assert_eq!(cpu.registers().pc, 0x9000);
    assert_eq!(memory.peek(0x01FC), 0x02);
    assert_eq!(memory.peek(0x01FB) & 0x30, 0x30);
}

#[test]
fn test_unofficial_lax_and_sax() {
    let (mut cpu, mut memory) = boot(&[
        0xA7, 0x10, // LAX $10
        0xA9, 0xF0, // LDA #$F0
        0x87, 0x11, // SAX $11
    ]);
    memory.load(0x0010, &[0x3C]);
    assert_eq!(step_cycles(&mut cpu, &mut memory, 3), [3, 2, 3]);
    assert_eq!(cpu.registers().x, 0x3C);
    assert_eq!(memory.peek(0x0011), 0x30);
}

//! Conformance-testing helpers
//!
//! `FlatMemory` is a 64 KiB all-RAM bus for running the CPU on its own.
//! The result-protocol functions decode the status block that test ROMs
//! leave at $6000.

use crate::cartridge::HEADER_SIZE;
use crate::cpu::{CpuBus, Interrupt, IRQ_VECTOR, NMI_VECTOR, RESET_VECTOR};

/// Status byte written by result-protocol test ROMs
pub const RESULT_STATUS: u16 = 0x6000;

/// Bytes at $6001-$6003 marking the status block as valid
pub const RESULT_SIGNATURE: [u8; 3] = [0xDE, 0xB0, 0x61];

/// Start of the NUL-terminated result text
pub const RESULT_MESSAGE: u16 = 0x6004;

/// Status while the test is still running
pub const STATUS_RUNNING: u8 = 0x80;

/// Status asking the host to press reset
pub const STATUS_RESET_REQUESTED: u8 = 0x81;

const MAX_MESSAGE_LEN: u16 = 0x1000;

/// All-RAM CPU bus
#[derive(Debug, Clone)]
pub struct FlatMemory {
    memory: Vec<u8>,
    lines: Interrupt,
    cycles: u64,
}

impl FlatMemory {
    pub fn new() -> Self {
        Self {
            memory: vec![0; 0x10000],
            lines: Interrupt::empty(),
            cycles: 0,
        }
    }

    /// Memory holding `program` at `origin`, with the reset vector pointing at it
    pub fn with_program(origin: u16, program: &[u8]) -> Self {
        let mut memory = Self::new();
        memory.load(origin, program);
        memory.load(RESET_VECTOR, &origin.to_le_bytes());
        memory
    }

    /// Copy `bytes` to `address`, wrapping at $FFFF
    pub fn load(&mut self, address: u16, bytes: &[u8]) {
        for (offset, &byte) in bytes.iter().enumerate() {
            let target = address.wrapping_add(offset as u16);
            self.memory[target as usize] = byte;
        }
    }

    /// Drive interrupt lines as a device would
    pub fn set_interrupt_lines(&mut self, lines: Interrupt) {
        self.lines = lines;
    }

    pub fn peek(&self, address: u16) -> u8 {
        self.memory[address as usize]
    }

    /// Bus cycles seen so far
    pub fn cycles(&self) -> u64 {
        self.cycles
    }
}

impl Default for FlatMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuBus for FlatMemory {
    fn read(&mut self, address: u16) -> u8 {
        self.cycles += 1;
        self.memory[address as usize]
    }

    fn write(&mut self, address: u16, value: u8) {
        self.cycles += 1;
        self.memory[address as usize] = value;
    }

    fn interrupt_lines(&self) -> Interrupt {
        self.lines
    }
}

/// iNES image of a 32 KiB NROM board holding `program` at CPU address `origin`
///
/// Reset points at `origin`; NMI and IRQ point at an RTI at $FFF0.
/// PRG RAM (8 KiB) is declared battery backed so result-protocol programs
/// can write their status block.
pub fn nrom_image(program: &[u8], origin: u16) -> Vec<u8> {
    const PRG: usize = 0x8000;
    const CHR: usize = 0x2000;

    let mut image = vec![b'N', b'E', b'S', 0x1A, 2, 1, 0x02, 0x00];
    image.resize(HEADER_SIZE, 0);
    let mut prg = vec![0xEA; PRG];
    let start = origin.wrapping_sub(0x8000) as usize;
    for (offset, &byte) in program.iter().enumerate() {
        prg[(start + offset) % PRG] = byte;
    }
    prg[0x7FF0] = 0x40;
    let set_vector = |prg: &mut Vec<u8>, at: u16, target: u16| {
        let at = (at - 0x8000) as usize;
        prg[at..at + 2].copy_from_slice(&target.to_le_bytes());
    };
    set_vector(&mut prg, NMI_VECTOR, 0xFFF0);
    set_vector(&mut prg, RESET_VECTOR, origin);
    set_vector(&mut prg, IRQ_VECTOR, 0xFFF0);
    image.extend_from_slice(&prg);
    image.resize(HEADER_SIZE + PRG + CHR, 0);
    image
}

/// Final report of a result-protocol test ROM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestOutcome {
    /// 0 on success, otherwise the failing test's code
    pub code: u8,
    pub message: String,
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        self.code == 0
    }
}

/// Decoded state of the $6000 status block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultStatus {
    /// Signature not written yet
    Absent,
    Running,
    ResetRequested,
    Done(TestOutcome),
}

/// Decode the status block through a side-effect-free reader
pub fn result_status(peek: impl Fn(u16) -> u8) -> ResultStatus {
    let signature = [peek(RESULT_STATUS + 1), peek(RESULT_STATUS + 2), peek(RESULT_STATUS + 3)];
    if signature != RESULT_SIGNATURE {
        return ResultStatus::Absent;
    }
    match peek(RESULT_STATUS) {
        STATUS_RUNNING => ResultStatus::Running,
        STATUS_RESET_REQUESTED => ResultStatus::ResetRequested,
        code if code < STATUS_RUNNING => ResultStatus::Done(TestOutcome {
            code,
            message: read_message(&peek),
        }),
        _ => ResultStatus::Running,
    }
}

fn read_message(peek: &impl Fn(u16) -> u8) -> String {
    let bytes: Vec<u8> = (0..MAX_MESSAGE_LEN)
        .map(|offset| peek(RESULT_MESSAGE + offset))
        .take_while(|&byte| byte != 0)
        .collect();
    String::from_utf8_lossy(&bytes).trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cartridge::Cartridge;

    #[test]
    fn test_flat_memory_counts_cycles() {
        let mut memory = FlatMemory::with_program(0x0200, &[0xEA]);
        assert_eq!(memory.read(0x0200), 0xEA);
        memory.write(0x0000, 1);
        assert_eq!(memory.cycles(), 2);
        assert_eq!(memory.peek(RESET_VECTOR), 0x00);
        assert_eq!(memory.peek(RESET_VECTOR + 1), 0x02);
    }

    #[test]
    fn test_nrom_image_loads() {
        let cartridge = Cartridge::from_rom(&nrom_image(&[0xA9, 0x01], 0xC000)).unwrap();
        let mapper = cartridge.mapper();
        assert_eq!(mapper.read_prg(0xC000), Some(0xA9));
        assert_eq!(mapper.read_prg(0xFFFC), Some(0x00));
        assert_eq!(mapper.read_prg(0xFFFD), Some(0xC0));
        assert_eq!(mapper.read_prg(0xFFF0), Some(0x40));
    }

    #[test]
    fn test_result_status_decoding() {
        let mut memory = FlatMemory::new();
        assert_eq!(result_status(|a| memory.peek(a)), ResultStatus::Absent);
        memory.load(RESULT_STATUS, &[0x80, 0xDE, 0xB0, 0x61]);
        assert_eq!(result_status(|a| memory.peek(a)), ResultStatus::Running);
        memory.load(RESULT_STATUS, &[0x81]);
        assert_eq!(result_status(|a| memory.peek(a)), ResultStatus::ResetRequested);
        memory.load(RESULT_STATUS, &[0x03]);
        memory.load(RESULT_MESSAGE, b"Failed #3\n\0");
        assert_eq!(
            result_status(|a| memory.peek(a)),
            ResultStatus::Done(TestOutcome { code: 3, message: "Failed #3".into() })
        );
    }
}

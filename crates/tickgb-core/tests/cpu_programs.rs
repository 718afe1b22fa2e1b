//! Small hand-assembled programs run through the whole machine.

mod common;

use common::{machine, run_ticks, RomBuilder, ENTRY};
use tickgb_core::cpu::CpuStatus;
use tickgb_core::{Button, GameBoy};

#[test]
fn vblank_is_serviced_before_timer() {
    let program = [
        0x21, 0x00, 0xC0, // LD HL,$C000
        0x3E, 0x05, // LD A,$05
        0xE0, 0xFF, // LDH ($FF),A   IE = VBlank | Timer
        0xE0, 0x0F, // LDH ($0F),A   IF = VBlank | Timer
        0xFB, // EI
        0x00, // NOP
        0x18, 0xFE, // JR -2
    ];
    let vblank = [0x3E, 0x40, 0x22, 0xD9]; // LD A,$40; LD (HL+),A; RETI
    let timer = [0x3E, 0x50, 0x22, 0xD9]; // LD A,$50; LD (HL+),A; RETI
    let rom = RomBuilder::rom_only()
        .code(ENTRY, &program)
        .code(0x40, &vblank)
        .code(0x50, &timer)
        .build();
    let mut gb = GameBoy::new();
    gb.load_cartridge(rom).unwrap();
    run_ticks(&mut gb, 40);

    assert_eq!(gb.mmu.read(0xC000), 0x40);
    assert_eq!(gb.mmu.read(0xC001), 0x50);
    assert_eq!(gb.mmu.read(0xFF0F) & 0x1F, 0);
}

#[test]
fn halt_with_interrupts_disabled_repeats_next_byte() {
    let mut gb = machine(&[
        0x3E, 0x04, // LD A,$04
        0xE0, 0xFF, // LDH ($FF),A
        0xE0, 0x0F, // LDH ($0F),A
        0x06, 0x00, // LD B,$00
        0x76, // HALT
        0x04, // INC B
        0x18, 0xFE, // JR -2
    ]);
    run_ticks(&mut gb, 12);
    assert_eq!(gb.cpu.regs.b, 2);
    assert_eq!(gb.cpu.status(), CpuStatus::Running);
}

#[test]
fn timer_overflow_reloads_and_interrupts() {
    let program = [
        0x3E, 0xF0, // LD A,$F0
        0xE0, 0x06, // LDH ($06),A   TMA
        0x3E, 0xFE, // LD A,$FE
        0xE0, 0x05, // LDH ($05),A   TIMA
        0x3E, 0x04, // LD A,$04
        0xE0, 0xFF, // LDH ($FF),A   IE = Timer
        0x3E, 0x05, // LD A,$05
        0xE0, 0x07, // LDH ($07),A   TAC: enabled, 16 cycles
        0xFB, // EI
        0x18, 0xFE, // JR -2
    ];
    let handler = [0x3E, 0x99, 0xEA, 0x00, 0xC0, 0xD9]; // LD A,$99; LD ($C000),A; RETI
    let rom = RomBuilder::rom_only()
        .code(ENTRY, &program)
        .code(0x50, &handler)
        .build();
    let mut gb = GameBoy::new();
    gb.load_cartridge(rom).unwrap();
    run_ticks(&mut gb, 60);

    assert_eq!(gb.mmu.read(0xC000), 0x99);
    assert!(gb.mmu.read(0xFF05) >= 0xF0);
}

#[test]
fn stop_waits_for_a_button() {
    let mut gb = machine(&[
        0x10, 0x00, // STOP
        0x04, // INC B
        0x18, 0xFE, // JR -2
    ]);
    let b = gb.cpu.regs.b;
    run_ticks(&mut gb, 10);
    assert_eq!(gb.cpu.status(), CpuStatus::Stopped);
    assert_eq!(gb.cpu.regs.b, b);
    assert!(gb.tick());

    gb.set_button(Button::Start, true);
    run_ticks(&mut gb, 5);
    assert_eq!(gb.cpu.status(), CpuStatus::Running);
    assert_eq!(gb.cpu.regs.b, b.wrapping_add(1));
}

#[test]
fn illegal_opcode_locks_the_processor() {
    let mut gb = machine(&[0xD3, 0x04]);
    run_ticks(&mut gb, 5);
    assert!(gb.cpu.is_locked());
    let pc = gb.cpu.regs.pc;
    run_ticks(&mut gb, 100);
    assert_eq!(gb.cpu.regs.pc, pc);
    // Time still passes, so frames keep coming.
    gb.run_frame();
}

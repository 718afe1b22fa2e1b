mod common;

use common::{ENTRY, RomBuilder, machine};
use tickgb_core::{GameBoy, SaveStateError};

/// `LD HL,$C000` then `INC (HL)` forever.
const COUNTER: &[u8] = &[0x21, 0x00, 0xC0, 0x34, 0x18, 0xFD];

#[test]
fn restored_machine_replays_identically() {
    let mut gb = machine(COUNTER);
    gb.run_frame();
    let snapshot = gb.save_state().unwrap();

    for _ in 0..3 {
        gb.run_frame();
    }
    let expected_counter = gb.mmu.read(0xC000);
    let expected_state = gb.save_state().unwrap();

    gb.load_state(&snapshot).unwrap();
    for _ in 0..3 {
        gb.run_frame();
    }
    assert_eq!(gb.mmu.read(0xC000), expected_counter);
    assert_eq!(gb.save_state().unwrap(), expected_state);
}

#[test]
fn reset_is_idempotent() {
    let mut gb = machine(COUNTER);
    gb.reset();
    let first = gb.save_state().unwrap();
    gb.run_frame();
    gb.reset();
    gb.reset();
    assert_eq!(gb.save_state().unwrap(), first);
}

#[test]
fn state_from_another_cartridge_is_rejected() {
    let mut gb = machine(COUNTER);
    gb.run_frame();
    let state = gb.save_state().unwrap();

    let mut other = GameBoy::new();
    other
        .load_cartridge(
            RomBuilder::rom_only()
                .global_checksum(0x1234)
                .code(ENTRY, COUNTER)
                .build(),
        )
        .unwrap();
    let before = other.save_state().unwrap();
    assert_eq!(
        other.load_state(&state),
        Err(SaveStateError::InvalidValue {
            section: "machine",
            value: 0xBEEF
        })
    );
    assert_eq!(other.save_state().unwrap(), before);
}

#[test]
fn banked_cartridge_state_survives_a_fresh_machine() {
    let rom = RomBuilder::new(0x1B, 0x03, 0x03)
        .cgb(0x80)
        .code(
            ENTRY,
            &[
                0x3E, 0x0A, 0xEA, 0x00, 0x00, // enable RAM
                0x3E, 0x05, 0xEA, 0x00, 0x20, // ROM bank 5
                0x3E, 0x03, 0xEA, 0x00, 0x40, // RAM bank 3
                0x3E, 0x77, 0xEA, 0x00, 0xA0, // LD ($A000),$77
                0x18, 0xFE,
            ],
        )
        .build();

    let mut gb = GameBoy::new();
    gb.load_cartridge(rom.clone()).unwrap();
    gb.run_frame();
    let state = gb.save_state().unwrap();

    let mut restored = GameBoy::new();
    restored.load_cartridge(rom).unwrap();
    assert_eq!(restored.mmu.read(0x4000), 0x01);
    restored.load_state(&state).unwrap();
    assert!(restored.mode().is_cgb());
    assert_eq!(restored.mmu.read(0x4000), 0x05);
    assert_eq!(restored.mmu.read(0xA000), 0x77);
    assert_eq!(restored.cpu.regs.pc, gb.cpu.regs.pc);
}

#[test]
fn saving_without_cartridge_fails() {
    let mut gb = GameBoy::new();
    assert_eq!(gb.save_state(), Err(SaveStateError::NoCartridge));
    assert_eq!(gb.load_state(&[]), Err(SaveStateError::NoCartridge));
}

//! Machine-level tests driving the public API with a hand-assembled NROM
//! ROM (mapper 0, one PRG bank, one CHR bank).

use pretty_assertions::assert_eq;

use emu::joypad::{Button, Player};
use emu::{EmuError, Nes, SaveState, FRAME_BYTES};

/// Where the controller-test program parks when the A button is pressed.
const PRESSED_LOOP: u16 = 0x8011;
/// Where it parks when A is not pressed.
const IDLE_LOOP: u16 = 0x8014;

/// A program that strobes the controller, reads the A button, and parks
/// in one of two distinct infinite loops:
///
/// ```text
/// 8000  LDA #$01      A9 01
/// 8002  STA $4016     8D 16 40
/// 8005  LDA #$00      A9 00
/// 8007  STA $4016     8D 16 40
/// 800A  LDA $4016     AD 16 40
/// 800D  AND #$01      29 01
/// 800F  BEQ idle      F0 03
/// 8011  JMP pressed   4C 11 80   ; pressed: A was down
/// 8014  JMP idle      4C 14 80   ; idle: A was up
/// ```
const CONTROLLER_PROGRAM: [u8; 23] = [
    0xA9, 0x01, 0x8D, 0x16, 0x40, 0xA9, 0x00, 0x8D, 0x16, 0x40, 0xAD, 0x16, 0x40, 0x29,
    0x01, 0xF0, 0x03, 0x4C, 0x11, 0x80, 0x4C, 0x14, 0x80,
];

fn build_rom(program: &[u8]) -> Vec<u8> {
    let mut prg = vec![0xEA_u8; 16 * 1024];
    prg[..program.len()].copy_from_slice(program);
    prg[0x3FFC] = 0x00;
    prg[0x3FFD] = 0x80;

    let mut data = vec![0_u8; 16];
    data[0..4].copy_from_slice(b"NES\x1A");
    data[4] = 1; // one 16KB PRG bank
    data[5] = 1; // one 8KB CHR bank
    data.extend_from_slice(&prg);
    data.extend_from_slice(&[0; 8 * 1024]);
    data
}

fn machine_with(program: &[u8]) -> Nes {
    let mut nes = Nes::new();
    nes.load_rom(&build_rom(program)).unwrap();
    nes
}

#[test]
fn load_and_reset_reproduce_identical_state_across_runs() {
    let mut first = machine_with(&CONTROLLER_PROGRAM);
    let mut second = machine_with(&CONTROLLER_PROGRAM);
    first.reset();
    second.reset();

    assert_eq!(first.program_counter(), second.program_counter());
    assert_eq!(first.cpu_registers(), second.cpu_registers());
    assert_eq!(first.cycle_count(), second.cycle_count());

    first.step_frame().unwrap();
    second.step_frame().unwrap();

    assert_eq!(first.program_counter(), second.program_counter());
    assert_eq!(first.cycle_count(), second.cycle_count());

    let mut pixels_a = vec![0_u8; FRAME_BYTES];
    let mut pixels_b = vec![0_u8; FRAME_BYTES];
    first.read_pixels(&mut pixels_a).unwrap();
    second.read_pixels(&mut pixels_b).unwrap();
    assert_eq!(pixels_a, pixels_b);
}

#[test]
fn nrom_scenario_matches_reference_after_one_frame() {
    let mut nes = machine_with(&CONTROLLER_PROGRAM);
    nes.reset();
    nes.step_frame().unwrap();

    // With no input, the program parks in the idle loop; each iteration
    // ends with the JMP leaving PC back at its own address.
    assert_eq!(nes.program_counter(), IDLE_LOOP);
    assert_eq!(nes.frame_count(), 1);
    // One NTSC frame is 341 * 262 / 3 CPU cycles, plus the instruction
    // that overshoots the boundary.
    let cycles = nes.cycle_count();
    assert!((29_780..29_900).contains(&cycles), "cycles = {cycles}");

    let mut exact = vec![0_u8; FRAME_BYTES];
    nes.read_pixels(&mut exact).unwrap();

    let mut short = vec![0_u8; FRAME_BYTES - 1];
    assert!(matches!(
        nes.read_pixels(&mut short),
        Err(EmuError::BufferTooSmall { .. })
    ));
}

#[test]
fn step_frame_advances_exactly_one_frame_per_call() {
    let mut nes = machine_with(&CONTROLLER_PROGRAM);
    nes.step_frame().unwrap();
    nes.step_frame().unwrap();
    assert_eq!(nes.frame_count(), 2);
}

#[test]
fn pressed_button_has_observable_effect() {
    let mut pressed = machine_with(&CONTROLLER_PROGRAM);
    pressed.set_button(Player::One, Button::A, true);
    pressed.step_frame().unwrap();

    let mut idle = machine_with(&CONTROLLER_PROGRAM);
    idle.step_frame().unwrap();

    assert_eq!(pressed.program_counter(), PRESSED_LOOP);
    assert_eq!(idle.program_counter(), IDLE_LOOP);

    // Releasing afterwards does not rewrite history: the machine stays
    // parked in the pressed loop.
    pressed.set_button(Player::One, Button::A, false);
    pressed.step_frame().unwrap();
    assert_eq!(pressed.program_counter(), PRESSED_LOOP);
}

#[test]
fn capture_restore_reproduces_bit_identical_frames() {
    let mut original = machine_with(&CONTROLLER_PROGRAM);
    original.step_frame().unwrap();
    original.step_frame().unwrap();

    let state = SaveState::capture(&original).unwrap();

    let mut restored = machine_with(&CONTROLLER_PROGRAM);
    state.restore(&mut restored).unwrap();

    assert_eq!(restored.program_counter(), original.program_counter());
    assert_eq!(restored.cycle_count(), original.cycle_count());
    assert_eq!(restored.frame_count(), original.frame_count());

    for _ in 0..5 {
        original.step_frame().unwrap();
        restored.step_frame().unwrap();

        assert_eq!(restored.program_counter(), original.program_counter());
        assert_eq!(restored.cycle_count(), original.cycle_count());

        let mut pixels_a = vec![0_u8; FRAME_BYTES];
        let mut pixels_b = vec![0_u8; FRAME_BYTES];
        original.read_pixels(&mut pixels_a).unwrap();
        restored.read_pixels(&mut pixels_b).unwrap();
        assert_eq!(pixels_a, pixels_b);
    }
}

#[test]
fn state_round_trips_through_bytes() {
    let mut nes = machine_with(&CONTROLLER_PROGRAM);
    nes.step_frame().unwrap();

    let bytes = nes.save_state_to_bytes().unwrap();
    let pc_at_capture = nes.program_counter();

    nes.step_frame().unwrap();
    nes.load_state_from_bytes(&bytes).unwrap();
    assert_eq!(nes.program_counter(), pc_at_capture);
}

#[test]
fn restoring_against_a_different_rom_is_rejected() {
    let nes_a = {
        let mut nes = machine_with(&CONTROLLER_PROGRAM);
        nes.step_frame().unwrap();
        nes
    };
    let state = SaveState::capture(&nes_a).unwrap();

    // A different program is a different ROM identity.
    let mut nes_b = machine_with(&[0xEA, 0x4C, 0x01, 0x80]);
    assert!(matches!(
        state.restore(&mut nes_b),
        Err(EmuError::IncompatibleState(_))
    ));
}

#[test]
fn truncated_state_bytes_are_rejected() {
    let mut nes = machine_with(&CONTROLLER_PROGRAM);
    nes.step_frame().unwrap();

    let bytes = nes.save_state_to_bytes().unwrap();
    let truncated = &bytes[..bytes.len() - 1];
    assert!(matches!(
        nes.load_state_from_bytes(truncated),
        Err(EmuError::IncompatibleState(_))
    ));
}

#[test]
fn file_round_trip_and_io_errors_are_distinct() {
    let mut nes = machine_with(&CONTROLLER_PROGRAM);
    nes.step_frame().unwrap();

    let path = std::env::temp_dir().join("satsuma-machine-test.sst");
    nes.save_state_to_file(&path).unwrap();
    nes.load_state_from_file(&path).unwrap();
    std::fs::remove_file(&path).unwrap();

    let missing = std::env::temp_dir().join("satsuma-machine-test-missing.sst");
    assert!(matches!(
        nes.load_state_from_file(&missing),
        Err(EmuError::Io(_))
    ));
}

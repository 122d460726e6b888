//! C interface.
//!
//! Opaque handles plus primitive arguments: a host application links the
//! cdylib and drives either a bare machine (`nes_*`) or a threaded
//! session (`session_*`). Status returns follow the 0/nonzero convention;
//! buffer-based state calls return byte counts (negative on error).
//!
//! Every pointer argument is null-checked before use, and every
//! caller-supplied buffer length is validated before anything is written.
//! Callers own handle lifetimes: each `*_create`/`*_start` must be paired
//! with exactly one `*_destroy`/`*_cleanup`, and handles must not be used
//! concurrently from multiple threads except where the session API
//! documents it.

use std::ffi::CStr;
use std::os::raw::{c_char, c_float, c_int, c_uchar};
use std::slice;

use emu::joypad::{Button, Player};
use emu::Nes;

use crate::input::{shared_registry, VirtualButton};
use crate::session::EmuSession;

/// Button ids shared with host applications. 8 and 9 are the virtual
/// reset/power-off controls; 10-13 belong to the dual-screen variant.
fn map_pad_button(id: c_int) -> Option<Button> {
    match id {
        0 => Some(Button::A),
        1 => Some(Button::B),
        2 => Some(Button::Select),
        3 => Some(Button::Start),
        4 => Some(Button::Up),
        5 => Some(Button::Down),
        6 => Some(Button::Left),
        7 => Some(Button::Right),
        _ => None,
    }
}

fn map_virtual_button(id: c_int) -> Option<VirtualButton> {
    match id {
        0 => Some(VirtualButton::A),
        1 => Some(VirtualButton::B),
        2 => Some(VirtualButton::Select),
        3 => Some(VirtualButton::Start),
        4 => Some(VirtualButton::Up),
        5 => Some(VirtualButton::Down),
        6 => Some(VirtualButton::Left),
        7 => Some(VirtualButton::Right),
        10 => Some(VirtualButton::X),
        11 => Some(VirtualButton::Y),
        12 => Some(VirtualButton::L),
        13 => Some(VirtualButton::R),
        _ => None,
    }
}

unsafe fn path_from_c(path: *const c_char) -> Option<String> {
    if path.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(path) }
        .to_str()
        .ok()
        .map(str::to_owned)
}

// ---- direct machine handles ----

#[unsafe(no_mangle)]
pub extern "C" fn nes_create() -> *mut Nes {
    Box::into_raw(Box::new(Nes::new()))
}

#[unsafe(no_mangle)]
pub extern "C" fn nes_destroy(nes: *mut Nes) {
    if nes.is_null() {
        return;
    }
    drop(unsafe { Box::from_raw(nes) });
}

#[unsafe(no_mangle)]
pub extern "C" fn nes_load_rom(nes: *mut Nes, data: *const c_uchar, len: usize) -> c_int {
    if nes.is_null() || data.is_null() {
        return 0;
    }
    let nes = unsafe { &mut *nes };
    let data = unsafe { slice::from_raw_parts(data, len) };
    match nes.load_rom(data) {
        Ok(()) => 1,
        Err(err) => {
            tracing::warn!(error = %err, "ROM load failed");
            0
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn nes_reset(nes: *mut Nes) {
    if let Some(nes) = unsafe { nes.as_mut() } {
        nes.reset();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn nes_step_frame(nes: *mut Nes) -> c_int {
    let Some(nes) = (unsafe { nes.as_mut() }) else {
        return 0;
    };
    match nes.step_frame() {
        Ok(()) => 1,
        Err(err) => {
            tracing::warn!(error = %err, "frame step failed");
            0
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn nes_get_pixels(nes: *mut Nes, buffer: *mut c_uchar, len: usize) -> c_int {
    if nes.is_null() || buffer.is_null() {
        return 0;
    }
    let nes = unsafe { &*nes };
    let buffer = unsafe { slice::from_raw_parts_mut(buffer, len) };
    i32::from(nes.read_pixels(buffer).is_ok())
}

/// Returns the number of samples written.
#[unsafe(no_mangle)]
pub extern "C" fn nes_get_audio_samples(
    nes: *mut Nes,
    buffer: *mut c_float,
    len: usize,
) -> c_int {
    if nes.is_null() || buffer.is_null() {
        return 0;
    }
    let nes = unsafe { &mut *nes };
    let buffer = unsafe { slice::from_raw_parts_mut(buffer, len) };
    nes.read_audio(buffer) as c_int
}

#[unsafe(no_mangle)]
pub extern "C" fn nes_input(nes: *mut Nes, button_id: c_int, pressed: c_int) {
    let Some(nes) = (unsafe { nes.as_mut() }) else {
        return;
    };
    if let Some(button) = map_pad_button(button_id) {
        nes.set_button(Player::One, button, pressed != 0);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn nes_touch(nes: *mut Nes, x: c_int, y: c_int, pressed: c_int) {
    let Some(nes) = (unsafe { nes.as_mut() }) else {
        return;
    };
    if x >= 0 && y >= 0 {
        nes.set_touch(x as u16, y as u16, pressed != 0);
    }
}

/// 1 when the loaded title runs on the dual-screen/touch variant.
#[unsafe(no_mangle)]
pub extern "C" fn nes_is_dual_screen(nes: *mut Nes) -> c_int {
    match unsafe { nes.as_ref() } {
        Some(nes) => i32::from(nes.is_dual_screen()),
        None => 0,
    }
}

/// Encode the machine state into `buffer`, returning the bytes written.
/// With a null buffer, returns the required size; on error, -1.
#[unsafe(no_mangle)]
pub extern "C" fn nes_save_state_buffer(
    nes: *mut Nes,
    buffer: *mut c_uchar,
    capacity: usize,
) -> c_int {
    let Some(nes) = (unsafe { nes.as_ref() }) else {
        return -1;
    };
    let bytes = match nes.save_state_to_bytes() {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, "state capture failed");
            return -1;
        }
    };
    if buffer.is_null() {
        return bytes.len() as c_int;
    }
    if capacity < bytes.len() {
        return -1;
    }
    let out = unsafe { slice::from_raw_parts_mut(buffer, capacity) };
    out[..bytes.len()].copy_from_slice(&bytes);
    bytes.len() as c_int
}

/// Restore machine state from `buffer`; returns the bytes consumed, or -1.
#[unsafe(no_mangle)]
pub extern "C" fn nes_load_state_buffer(
    nes: *mut Nes,
    buffer: *const c_uchar,
    len: usize,
) -> c_int {
    if nes.is_null() || buffer.is_null() {
        return -1;
    }
    let nes = unsafe { &mut *nes };
    let data = unsafe { slice::from_raw_parts(buffer, len) };
    match nes.load_state_from_bytes(data) {
        Ok(()) => len as c_int,
        Err(err) => {
            tracing::warn!(error = %err, "state restore failed");
            -1
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn nes_save_state_file(nes: *mut Nes, path: *const c_char) -> c_int {
    let Some(nes) = (unsafe { nes.as_ref() }) else {
        return 0;
    };
    let Some(path) = (unsafe { path_from_c(path) }) else {
        return 0;
    };
    i32::from(nes.save_state_to_file(path).is_ok())
}

#[unsafe(no_mangle)]
pub extern "C" fn nes_load_state_file(nes: *mut Nes, path: *const c_char) -> c_int {
    let Some(nes) = (unsafe { nes.as_mut() }) else {
        return 0;
    };
    let Some(path) = (unsafe { path_from_c(path) }) else {
        return 0;
    };
    i32::from(nes.load_state_from_file(path).is_ok())
}

// ---- threaded session handles ----

/// Start a session on the process-wide virtual input registry. Returns a
/// null pointer when the ROM cannot be loaded.
#[unsafe(no_mangle)]
pub extern "C" fn session_start(rom_path: *const c_char) -> *mut EmuSession {
    let Some(path) = (unsafe { path_from_c(rom_path) }) else {
        return std::ptr::null_mut();
    };
    match EmuSession::start(path, shared_registry()) {
        Ok(session) => Box::into_raw(Box::new(session)),
        Err(err) => {
            tracing::warn!(error = %err, "session start failed");
            std::ptr::null_mut()
        }
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn session_set_paused(session: *mut EmuSession, paused: c_int) {
    if let Some(session) = unsafe { session.as_ref() } {
        session.set_paused(paused != 0);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn session_stop(session: *mut EmuSession) {
    if let Some(session) = unsafe { session.as_ref() } {
        session.stop();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn session_reset(session: *mut EmuSession) {
    if let Some(session) = unsafe { session.as_ref() } {
        session.reset();
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn session_frame_count(session: *mut EmuSession) -> u64 {
    match unsafe { session.as_ref() } {
        Some(session) => session.frame_count(),
        None => 0,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn session_is_dual_screen(session: *mut EmuSession) -> c_int {
    match unsafe { session.as_ref() } {
        Some(session) => i32::from(session.is_dual_screen()),
        None => 0,
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn session_render_frame(
    session: *mut EmuSession,
    buffer: *mut c_uchar,
    len: usize,
) -> c_int {
    if session.is_null() || buffer.is_null() {
        return 0;
    }
    let session = unsafe { &*session };
    let buffer = unsafe { slice::from_raw_parts_mut(buffer, len) };
    i32::from(session.render_frame(buffer).is_ok())
}

#[unsafe(no_mangle)]
pub extern "C" fn session_get_audio_samples(
    session: *mut EmuSession,
    buffer: *mut c_float,
    len: usize,
) -> c_int {
    if session.is_null() || buffer.is_null() {
        return 0;
    }
    let session = unsafe { &*session };
    let buffer = unsafe { slice::from_raw_parts_mut(buffer, len) };
    session.drain_audio(buffer) as c_int
}

#[unsafe(no_mangle)]
pub extern "C" fn session_save_state_file(
    session: *mut EmuSession,
    path: *const c_char,
) -> c_int {
    let Some(session) = (unsafe { session.as_ref() }) else {
        return 0;
    };
    let Some(path) = (unsafe { path_from_c(path) }) else {
        return 0;
    };
    i32::from(session.save_state_to_file(path).is_ok())
}

#[unsafe(no_mangle)]
pub extern "C" fn session_load_state_file(
    session: *mut EmuSession,
    path: *const c_char,
) -> c_int {
    let Some(session) = (unsafe { session.as_ref() }) else {
        return 0;
    };
    let Some(path) = (unsafe { path_from_c(path) }) else {
        return 0;
    };
    i32::from(session.load_state_from_file(path).is_ok())
}

/// Terminal: joins the execution thread and releases the machine. The
/// handle must not be used afterwards.
#[unsafe(no_mangle)]
pub extern "C" fn session_cleanup(session: *mut EmuSession) {
    if session.is_null() {
        return;
    }
    let session = unsafe { Box::from_raw(session) };
    session.cleanup();
}

// ---- process-wide virtual input ----

/// Set a virtual button outside any handle's scope. Affects every session
/// sampling the shared registry. Ids 8/9 are virtual reset/power-off.
#[unsafe(no_mangle)]
pub extern "C" fn set_virtual_button(button_id: c_int, pressed: c_int) {
    let registry = shared_registry();
    match button_id {
        8 => {
            if pressed != 0 {
                registry.request_reset();
            }
        }
        9 => {
            if pressed != 0 {
                registry.request_poweroff();
            }
        }
        _ => {
            if let Some(button) = map_virtual_button(button_id) {
                registry.set_button(button, pressed != 0);
            }
        }
    }
}

/// Process-wide touch state for the dual-screen variant.
#[unsafe(no_mangle)]
pub extern "C" fn set_virtual_touch(x: c_int, y: c_int, pressed: c_int) {
    if x >= 0 && y >= 0 {
        shared_registry().set_touch(x as u16, y as u16, pressed != 0);
    }
}

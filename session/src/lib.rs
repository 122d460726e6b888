//! Execution harness for the emulation core.
//!
//! Wraps an [`emu::Nes`] in a dedicated execution thread
//! ([`session::EmuSession`]), shares virtual input across sessions
//! ([`input::InputRegistry`]), and exposes the whole engine to host
//! applications through an opaque-handle C interface ([`ffi`]).

pub mod ffi;
pub mod input;
pub mod session;

pub use input::{InputRegistry, TouchState, VirtualButton};
pub use session::{start_simple, EmuSession, SessionState};

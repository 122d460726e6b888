use std::fmt;

/// Errors surfaced by the emulation core.
///
/// Recoverable conditions (bad ROM data, undersized buffers, incompatible
/// save states) are reported through this enum. Internal invariant
/// corruption (e.g. cycle counter overflow) panics instead: silently
/// continuing with corrupted machine state would be worse than a crash.
#[derive(Debug)]
pub enum EmuError {
    /// The ROM image is not a well-formed iNES file.
    InvalidRom(&'static str),
    /// The ROM header names a mapper this engine does not implement.
    UnsupportedMapper { mapper: u8 },
    /// The CPU fetched an opcode outside the supported set (the JAM group
    /// or an unstable undocumented encoding). See `cpu` module docs for
    /// the exact policy.
    IllegalOpcode { opcode: u8, pc: u16 },
    /// A caller-supplied buffer is too small for the requested readback.
    BufferTooSmall { required: usize, provided: usize },
    /// File-based save/load failed at the I/O layer.
    Io(std::io::Error),
    /// The save-state blob was produced by an unknown format revision.
    FormatVersionMismatch { version: u32 },
    /// The save-state blob does not match this machine (wrong ROM, bad
    /// magic, or corrupt payload).
    IncompatibleState(&'static str),
}

impl fmt::Display for EmuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRom(reason) => write!(f, "invalid ROM: {reason}"),
            Self::UnsupportedMapper { mapper } => {
                write!(f, "unsupported mapper {mapper}")
            }
            Self::IllegalOpcode { opcode, pc } => {
                write!(f, "illegal opcode {opcode:#04x} at {pc:#06x}")
            }
            Self::BufferTooSmall { required, provided } => {
                write!(f, "buffer too small: need {required} bytes, got {provided}")
            }
            Self::Io(err) => write!(f, "i/o failure: {err}"),
            Self::FormatVersionMismatch { version } => {
                write!(f, "unknown save-state format version {version}")
            }
            Self::IncompatibleState(reason) => {
                write!(f, "incompatible save state: {reason}")
            }
        }
    }
}

impl std::error::Error for EmuError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EmuError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

//! Register snapshot decoding and line formatting
//!
//! Every traced register produces exactly one line:
//!
//! ```text
//! cpu=<vcpu>, <name>=<hex>, size=<bytes>
//! ```
//!
//! The hex value is lowercase and zero-padded to twice the register width,
//! so 4-byte registers render with 8 digits and 8-byte registers with 16.

use std::fmt::{self, Write};

use serde::{Deserialize, Serialize};

/// Value of a register of a supported width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterValue {
    U32(u32),
    U64(u64),
}

impl RegisterValue {
    /// Decode little-endian raw register bytes
    ///
    /// Returns `None` for any width other than 4 or 8 bytes.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        if let Ok(bytes) = <[u8; 4]>::try_from(raw) {
            Some(Self::U32(u32::from_le_bytes(bytes)))
        } else if let Ok(bytes) = <[u8; 8]>::try_from(raw) {
            Some(Self::U64(u64::from_le_bytes(bytes)))
        } else {
            None
        }
    }

    /// Register width in bytes
    pub fn size(&self) -> usize {
        match self {
            Self::U32(_) => 4,
            Self::U64(_) => 8,
        }
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::U32(v) => write!(f, "{v:08x}"),
            Self::U64(v) => write!(f, "{v:016x}"),
        }
    }
}

/// Append the trace line for one register to `out`
pub fn write_line(out: &mut String, vcpu: usize, name: &str, value: RegisterValue) {
    // Writing into a String cannot fail
    let _ = writeln!(out, "cpu={vcpu}, {name}={value}, size={}", value.size());
}

/// Format the trace line for one register
pub fn format_line(vcpu: usize, name: &str, value: RegisterValue) -> String {
    let mut line = String::with_capacity(48);
    write_line(&mut line, vcpu, name, value);
    line
}

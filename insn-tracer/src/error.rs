//! Error type for tracer operations

use std::io;

use thiserror::Error;

/// Errors raised by the tracer core
///
/// Register resolution misses are deliberately absent: an unknown register
/// is dropped from the context's catalog and never reported as an error.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TracerError {
    /// The register facility returned a value of a width the formatter cannot render
    #[error("cpu={vcpu}: register {register} has unsupported width {size} (raw bytes: {raw})")]
    UnsupportedWidth {
        vcpu: usize,
        register: String,
        size: usize,
        /// Raw bytes as lowercase hex, in the order the facility returned them
        raw: String,
    },

    /// Writing a flushed buffer to the output sink failed
    #[error("cpu={vcpu}: failed to write trace output")]
    Sink {
        vcpu: usize,
        #[source]
        source: io::Error,
    },

    /// The engine reported an execution context outside the allocated range
    #[error("cpu={vcpu}: context index out of range (max contexts: {max})")]
    ContextOutOfRange { vcpu: usize, max: usize },

    /// The engine reported zero execution contexts at install time
    #[error("engine reports no execution contexts")]
    NoContexts,

    /// Flush threshold must be at least one instruction
    #[error("invalid flush threshold {0}: must be at least 1")]
    InvalidThreshold(u64),

    /// Malformed or unknown plugin argument
    #[error("invalid plugin argument {arg:?}: {reason}")]
    InvalidArgument { arg: String, reason: String },
}

impl TracerError {
    /// Build an [`TracerError::UnsupportedWidth`] from the raw register bytes
    pub fn unsupported_width(vcpu: usize, register: &str, raw: &[u8]) -> Self {
        Self::UnsupportedWidth {
            vcpu,
            register: register.to_string(),
            size: raw.len(),
            raw: hex::encode(raw),
        }
    }

    /// Index of the execution context the error belongs to, if any
    pub fn vcpu(&self) -> Option<usize> {
        match self {
            Self::UnsupportedWidth { vcpu, .. }
            | Self::Sink { vcpu, .. }
            | Self::ContextOutOfRange { vcpu, .. } => Some(*vcpu),
            _ => None,
        }
    }
}
